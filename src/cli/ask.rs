use anyhow::Result;
use clap::Args;

use nlfs::oplog::OperationStatus;
use nlfs::pipeline::Approval;

use super::{GlobalOpts, Session, confirm, print_record};

#[derive(Args)]
pub struct AskArgs {
    /// What you want done, in plain English
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,

    /// Ask before running, even when there are no warnings
    #[arg(long)]
    pub confirm: bool,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: AskArgs, opts: &GlobalOpts) -> Result<()> {
    let query = args.query.join(" ");
    let session = Session::open(opts, true).await?;

    let mut ask = confirm;
    let approval = if args.confirm {
        Approval::Always(&mut ask)
    } else {
        Approval::OnWarnings(&mut ask)
    };
    let record = session.pipeline().process(&query, approval).await;
    session.close().await;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&record)?),
        _ => print_record(&record),
    }

    match record.status {
        OperationStatus::GenerationError | OperationStatus::Blocked => std::process::exit(1),
        _ => Ok(()),
    }
}

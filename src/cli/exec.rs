use anyhow::Result;
use clap::Args;

use nlfs::oplog::OperationStatus;
use nlfs::pipeline::Approval;

use super::{GlobalOpts, Session, confirm, print_record};

#[derive(Args)]
pub struct ExecArgs {
    /// Shell command to validate and run
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Ask before running, even when there are no warnings
    #[arg(long)]
    pub confirm: bool,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: ExecArgs, opts: &GlobalOpts) -> Result<()> {
    let command = args.command.join(" ");
    let session = Session::open(opts, false).await?;

    let mut ask = confirm;
    let approval = if args.confirm {
        Approval::Always(&mut ask)
    } else {
        Approval::OnWarnings(&mut ask)
    };
    let record = session.pipeline().run_command(&command, approval).await;
    session.close().await;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&record)?),
        _ => print_record(&record),
    }

    if record.status == OperationStatus::Blocked {
        std::process::exit(1);
    }
    if let Some(execution) = record.execution
        && !execution.is_success()
    {
        std::process::exit(execution.exit_code.clamp(1, 255));
    }
    Ok(())
}

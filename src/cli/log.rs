use anyhow::Result;
use clap::Args;

use nlfs::oplog::{OperationLog, OperationStatus};

use super::GlobalOpts;

#[derive(Args)]
pub struct LogArgs {
    /// Number of records to show
    #[arg(short = 'n', long, default_value_t = 10)]
    pub limit: usize,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub fn run(args: LogArgs, opts: &GlobalOpts) -> Result<()> {
    let config = opts.load_config()?;
    let log = OperationLog::new(&config.paths, &config.operations);
    let records = log.recent(args.limit)?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No operations recorded in {}", log.path().display());
        return Ok(());
    }

    for record in records {
        let status = match record.status {
            OperationStatus::Completed => "completed",
            OperationStatus::Blocked => "blocked",
            OperationStatus::CancelledByUser => "cancelled",
            OperationStatus::GenerationError => "generation error",
        };
        println!(
            "{}  {:<16}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            status,
            record.query
        );
        if let Some(command) = record.final_command.or(record.generated_command)
            && command != record.query
        {
            println!("{:21}  -> {}", "", command);
        }
        if let Some(execution) = record.execution {
            println!("{:21}  exit {}", "", execution.exit_code);
        }
        if let Some(error) = record.error {
            println!("{:21}  {}", "", error.lines().next().unwrap_or_default());
        }
    }

    Ok(())
}

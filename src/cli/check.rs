//! CLI subcommand: `nlfs check`
//!
//! Runs the validator only. Nothing is executed and no container starts.

use anyhow::Result;
use clap::Args;

use nlfs::safety::{CommandValidator, ValidationOutcome};

use super::GlobalOpts;

#[derive(Args)]
pub struct CheckArgs {
    /// Shell command to validate
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub fn run(args: CheckArgs, opts: &GlobalOpts) -> Result<()> {
    let command = args.command.join(" ");
    let config = opts.load_config()?;
    let validator = CommandValidator::new(config.layout());
    let result = validator.validate(&command);

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let outcome = match result.outcome() {
            ValidationOutcome::Forbidden => "forbidden",
            ValidationOutcome::BlockedByBoundary => "blocked (sandbox boundary)",
            ValidationOutcome::BlockedByInjection => "blocked (injection)",
            ValidationOutcome::Safe => "safe",
            ValidationOutcome::SafeWithWarnings => "safe, with warnings",
        };
        println!("Outcome:   {}", outcome);
        let reason = result.reason();
        if let Some(ref reason) = reason {
            println!("Reason:    {}", reason);
        }
        for warning in result.warnings() {
            if reason.as_ref() != Some(warning) {
                println!("Warning:   {}", warning);
            }
        }
        if let Some(sanitized) = result.sanitized_command() {
            println!("Sanitized: {}", sanitized);
        }
        if validator.is_safe_for_readonly(&command) {
            println!("Read-only: yes");
        }
    }

    if !result.is_safe() {
        std::process::exit(1);
    }
    Ok(())
}

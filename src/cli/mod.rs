pub mod ask;
pub mod check;
pub mod config;
pub mod exec;
pub mod log;
pub mod paths;
pub mod sandbox;
pub mod shell;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use nlfs::concurrency::{SandboxLock, SandboxLockGuard};
use nlfs::config::{Config, SandboxMode};
use nlfs::generator::create_generator;
use nlfs::oplog::{OperationLog, OperationRecord, OperationStatus};
use nlfs::pipeline::{PendingCommand, Pipeline};
use nlfs::safety::CommandValidator;
use nlfs::sandbox::{ExecutionMethod, SandboxExecutor};

#[derive(Parser)]
#[command(name = "nlfs")]
#[command(
    author,
    version,
    about = "Ask for filesystem tasks in plain English; commands run in a sandbox"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "NLFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run commands on the host instead of in a container
    #[arg(long, global = true)]
    pub no_sandbox: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate one request into a command and run it
    Ask(ask::AskArgs),

    /// Interactive session
    Shell,

    /// Validate and run a literal shell command
    Exec(exec::ExecArgs),

    /// Validate a command without running it
    Check(check::CheckArgs),

    /// Container sandbox management
    Sandbox(sandbox::SandboxArgs),

    /// Show recent operations
    Log(log::LogArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub no_sandbox: bool,
}

impl From<&Cli> for GlobalOpts {
    fn from(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            no_sandbox: cli.no_sandbox,
        }
    }
}

impl GlobalOpts {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_with(self.config.as_deref())?;
        if self.no_sandbox {
            config.sandbox.mode = SandboxMode::Local;
        }
        Ok(config)
    }

    /// `logging.level`, or `info` if the config cannot be read yet.
    pub fn configured_log_level(&self) -> String {
        self.load_config()
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    }
}

/// A pipeline plus the session lock that protects its container.
pub struct Session {
    pub config: Config,
    pipeline: Pipeline,
    _guard: SandboxLockGuard,
}

impl Session {
    /// Take the session lock, discover mounts and start the backend.
    ///
    /// Fails if the container cannot start and fallback is disabled.
    pub async fn open(opts: &GlobalOpts, with_generator: bool) -> Result<Self> {
        let config = opts.load_config()?;

        let lock = SandboxLock::new(&config.paths)?;
        let guard = lock.acquire_async().await?;

        let layout = config.layout();
        let executor =
            SandboxExecutor::new(&config.sandbox, layout.clone(), &config.workspace_path())?;
        executor.ready().await?;

        let oplog = OperationLog::new(&config.paths, &config.operations);
        let mut pipeline = Pipeline::new(CommandValidator::new(layout), executor, oplog);
        if with_generator {
            pipeline = pipeline.with_generator(create_generator(&config.generator)?);
        }

        Ok(Self {
            config,
            pipeline,
            _guard: guard,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Tear down the container. The lock is released when `self` drops.
    pub async fn close(self) {
        self.pipeline.executor().cleanup().await;
    }
}

/// Ask on the terminal whether to run a command.
pub fn confirm(pending: &PendingCommand<'_>) -> bool {
    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "\nCommand: {}", pending.command);
    for warning in pending.validation.warnings() {
        let _ = writeln!(stderr, "  warning: {}", warning);
    }
    let _ = write!(stderr, "Run it? [y/N] ");
    let _ = stderr.flush();

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// Human-readable rendering of a finished operation.
pub fn print_record(record: &OperationRecord) {
    if let Some(ref generated) = record.generated_command
        && record.query != *generated
    {
        println!("Command: {}", generated);
    }
    if let Some(ref explanation) = record.explanation {
        println!("  {}", explanation);
    }
    if let Some(ref validation) = record.validation {
        for warning in validation.warnings() {
            if record.error.as_ref() != Some(warning) {
                println!("  warning: {}", warning);
            }
        }
    }

    match record.status {
        OperationStatus::GenerationError => {
            eprintln!(
                "Could not generate a command: {}",
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
        OperationStatus::Blocked => {
            eprintln!(
                "Blocked: {}",
                record.error.as_deref().unwrap_or("command failed validation")
            );
        }
        OperationStatus::CancelledByUser => println!("Cancelled."),
        OperationStatus::Completed => {
            let Some(ref execution) = record.execution else {
                return;
            };
            if let Some(ref command) = record.final_command
                && record.generated_command.as_deref() != Some(command.as_str())
            {
                println!("Ran: {}", command);
            }
            print!("{}", execution.stdout);
            if !execution.stdout.is_empty() && !execution.stdout.ends_with('\n') {
                println!();
            }
            if !execution.stderr.is_empty() {
                eprint!("{}", execution.stderr);
                if !execution.stderr.ends_with('\n') {
                    eprintln!();
                }
            }
            let method = match execution.execution_method {
                ExecutionMethod::Sandboxed => "sandboxed",
                ExecutionMethod::Local => "local",
            };
            if !execution.is_success() {
                eprintln!("[{}] exit code {}", method, execution.exit_code);
            }
        }
    }
}

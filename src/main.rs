use anyhow::Result;
use clap::Parser;

mod cli;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let opts = cli::GlobalOpts::from(&cli);

    // RUST_LOG wins, then --verbose, then logging.level from config
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        opts.configured_log_level()
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    match cli.command {
        Commands::Ask(args) => cli::ask::run(args, &opts).await,
        Commands::Shell => cli::shell::run(&opts).await,
        Commands::Exec(args) => cli::exec::run(args, &opts).await,
        Commands::Check(args) => cli::check::run(args, &opts),
        Commands::Sandbox(args) => cli::sandbox::run(args, &opts).await,
        Commands::Log(args) => cli::log::run(args, &opts),
        Commands::Config(args) => cli::config::run(args, &opts),
        Commands::Paths => cli::paths::run(),
    }
}

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use nlfs::config::Config;

use super::GlobalOpts;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., sandbox.image)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., sandbox.mode)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, opts: &GlobalOpts) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(opts, &format),
        ConfigCommands::Get { key } => get_config(opts, &key),
        ConfigCommands::Set { key, value } => set_config(opts, &key, &value),
        ConfigCommands::Path => show_path(opts),
        ConfigCommands::Init { force } => init_config(opts, force),
    }
}

fn config_file(opts: &GlobalOpts) -> Result<PathBuf> {
    match opts.config {
        Some(ref path) => Ok(path.clone()),
        None => Config::config_path(),
    }
}

fn show_config(opts: &GlobalOpts, format: &str) -> Result<()> {
    let config = opts.load_config()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn get_config(opts: &GlobalOpts, key: &str) -> Result<()> {
    let config = opts.load_config()?;
    println!("{}", config.get_value(key)?);
    Ok(())
}

fn set_config(opts: &GlobalOpts, key: &str, value: &str) -> Result<()> {
    // --no-sandbox must not leak into the saved file
    let mut config = Config::load_with(opts.config.as_deref())?;
    config.set_value(key, value)?;
    config.save_to(&config_file(opts)?)?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn show_path(opts: &GlobalOpts) -> Result<()> {
    println!("{}", config_file(opts)?.display());
    Ok(())
}

fn init_config(opts: &GlobalOpts, force: bool) -> Result<()> {
    let path = config_file(opts)?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    Config::write_template(&path)?;
    println!("Created config file at {}", path.display());
    Ok(())
}

//! CLI subcommand: `nlfs paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use nlfs::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("nlfs Paths (XDG Base Directory)");
    println!("===============================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  workspace:      {}", paths.workspace.display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  operations:     {}", paths.operations_log().display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available)"),
    }
    println!("  sandbox lock:   {}", paths.sandbox_lock().display());

    Ok(())
}

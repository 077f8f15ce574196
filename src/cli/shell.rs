use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use nlfs::pipeline::Approval;
use nlfs::sandbox::ExecutorState;

use super::{GlobalOpts, Session, confirm, print_record};

const HELP: &str = "\
Describe what you want done, e.g. \"find all pdf files in Documents\".

  help        show this message
  workspace   list the mounted folders
  history     show recent operations
  exit        leave (also: quit, Ctrl+D)

Desktop, Documents and Downloads are read-only; write to ~/workspace.";

pub async fn run(opts: &GlobalOpts) -> Result<()> {
    let session = Session::open(opts, true).await?;

    let backend = match session.pipeline().executor().state() {
        ExecutorState::SandboxReady => "container sandbox",
        ExecutorState::LocalReady => "local (no container)",
        ExecutorState::LocalFallbackReady => "local fallback (container unavailable)",
        ExecutorState::MountsProbed => "not started",
    };
    println!("nlfs shell  (backend: {})", backend);
    println!(
        "Workspace: {}",
        session.config.workspace_path().display()
    );
    println!("Type 'help' for commands, 'exit' to quit\n");

    let mut rl = DefaultEditor::new()?;

    loop {
        let input = match rl.readline("nlfs> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        match input.to_lowercase().as_str() {
            "exit" | "quit" => break,
            "help" => {
                println!("{}\n", HELP);
                continue;
            }
            "workspace" => {
                print!("{}", session.pipeline().executor().get_workspace_contents().await);
                println!();
                continue;
            }
            "history" => {
                match session.pipeline().oplog().recent(10) {
                    Ok(records) if records.is_empty() => println!("No history yet.\n"),
                    Ok(records) => {
                        for record in records.iter().rev() {
                            let command = record
                                .final_command
                                .as_deref()
                                .or(record.generated_command.as_deref())
                                .unwrap_or("-");
                            println!("  {}  ->  {}", record.query, command);
                        }
                        println!();
                    }
                    Err(e) => eprintln!("Could not read history: {}\n", e),
                }
                continue;
            }
            _ => {}
        }

        let mut ask = confirm;
        let record = session
            .pipeline()
            .process(input, Approval::OnWarnings(&mut ask))
            .await;
        print_record(&record);
        println!();
    }

    session.close().await;
    Ok(())
}

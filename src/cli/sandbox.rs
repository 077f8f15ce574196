use anyhow::Result;
use clap::{Args, Subcommand};
use std::time::Duration;

use nlfs::concurrency::SandboxLock;
use nlfs::config::SandboxMode;
use nlfs::layout::MountAccess;
use nlfs::sandbox::{ContainerRuntime, DockerCli, ExecutorState, MountTable, SandboxExecutor};

use super::{GlobalOpts, Session};

#[derive(Args)]
pub struct SandboxArgs {
    #[command(subcommand)]
    pub command: SandboxCommands,
}

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Show the mount table and container runtime status
    Status,

    /// Run smoke tests to verify sandbox enforcement
    Test,

    /// Force-remove any existing container and start a fresh one
    Rebuild,

    /// Stop and remove the sandbox container
    Cleanup,
}

pub async fn run(args: SandboxArgs, opts: &GlobalOpts) -> Result<()> {
    match args.command {
        SandboxCommands::Status => run_status(opts).await,
        SandboxCommands::Test => run_test(opts).await,
        SandboxCommands::Rebuild => run_rebuild(opts).await,
        SandboxCommands::Cleanup => run_cleanup(opts).await,
    }
}

async fn run_status(opts: &GlobalOpts) -> Result<()> {
    let config = opts.load_config()?;
    let settings = &config.sandbox;

    println!("Configuration:");
    println!("  Mode:        {:?}", settings.mode);
    println!("  Fallback:    {}", settings.fallback_to_local);
    println!("  Runtime:     {}", settings.runtime);
    println!("  Image:       {}", settings.image);
    println!("  Container:   {}", settings.container_name);
    println!("  Memory:      {}", settings.memory_limit);
    println!("  CPU quota:   {} / 100000", settings.cpu_quota);
    println!("  Network:     {}", settings.network);
    println!("  Timeout:     {}s", settings.exec_timeout_secs);
    println!();

    let mounts = MountTable::discover(&config.layout(), &config.workspace_path(), &settings.mounts)?;
    println!("Mounts:");
    for mapping in mounts.mappings() {
        let access = match mapping.access {
            MountAccess::ReadOnly => "ro",
            MountAccess::ReadWrite => "rw",
        };
        println!(
            "  {:<26} {}  {}",
            mapping.sandbox_path.display(),
            access,
            mapping.host_path.display()
        );
    }
    println!();

    let runtime = DockerCli::new(settings.runtime.clone());
    println!("Runtime:");
    match runtime.ping().await {
        Ok(()) => {
            println!("  {}: reachable", runtime.binary());
            let image = runtime.image_exists(&settings.image).await.unwrap_or(false);
            println!(
                "  Image {}: {}",
                settings.image,
                if image { "present" } else { "missing" }
            );
            match runtime.inspect(&settings.container_name).await {
                Ok(Some(state)) => println!("  Container: {:?}", state),
                Ok(None) => println!("  Container: not created"),
                Err(e) => println!("  Container: unknown ({})", e),
            }
        }
        Err(e) => {
            println!("  {}", e);
            if settings.fallback_to_local {
                println!("  Commands will run locally.");
            }
        }
    }

    Ok(())
}

struct Tally {
    passed: usize,
    failed: usize,
}

impl Tally {
    fn check(&mut self, label: &str, ok: bool, detail: &str) {
        if ok {
            println!("  {:<36} ok", label);
            self.passed += 1;
        } else {
            println!("  {:<36} FAIL ({})", label, detail);
            self.failed += 1;
        }
    }
}

async fn run_test(opts: &GlobalOpts) -> Result<()> {
    let session = Session::open(opts, false).await?;
    let executor = session.pipeline().executor();
    let isolated = executor.state() == ExecutorState::SandboxReady;

    println!("Running sandbox smoke tests...");
    println!("  Backend: {:?}", executor.state());
    println!();

    let mut tally = Tally {
        passed: 0,
        failed: 0,
    };
    run_checks(executor, isolated, &mut tally).await;
    session.close().await;

    println!();
    println!("{} passed, {} failed", tally.passed, tally.failed);
    if tally.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_checks(executor: &SandboxExecutor, isolated: bool, tally: &mut Tally) {
    let echo = executor.execute("echo hello", None).await;
    tally.check(
        "Echo command succeeds",
        echo.is_success() && echo.stdout.contains("hello"),
        echo.stderr.trim(),
    );

    let marker = "/home/user/workspace/.nlfs-write-check";
    let write = executor
        .execute(&format!("touch {marker} && rm {marker}"), None)
        .await;
    tally.check("Workspace is writable", write.is_success(), write.stderr.trim());

    let timeout = executor
        .execute("sleep 10", Some(Duration::from_secs(1)))
        .await;
    tally.check("Timeout is enforced", timeout.timed_out, "command was not stopped");

    if !isolated {
        println!("  (read-only and network checks need the container; skipped)");
        return;
    }

    for mapping in executor.mounts().mappings() {
        if mapping.access != MountAccess::ReadOnly || !mapping.available {
            continue;
        }
        let target = mapping.sandbox_path.join(".nlfs-write-check");
        let result = executor
            .execute(&format!("touch {}", target.display()), None)
            .await;
        tally.check(
            &format!("{} is read-only", mapping.folder.canonical_name()),
            !result.is_success(),
            "write succeeded",
        );
    }

    let network = executor
        .execute("timeout 3 bash -c 'echo > /dev/tcp/1.1.1.1/80'", None)
        .await;
    tally.check("Network is disabled", !network.is_success(), "connection succeeded");
}

async fn run_rebuild(opts: &GlobalOpts) -> Result<()> {
    let mut strict = opts.clone();
    strict.no_sandbox = false;
    let config = strict.load_config()?;
    if config.sandbox.mode == SandboxMode::Local {
        anyhow::bail!("sandbox.mode is local; there is no container to rebuild");
    }

    // Opening always tears down a stale container before creating a new one.
    let session = Session::open(&strict, false).await?;
    let state = session.pipeline().executor().state();
    session.close().await;

    if state == ExecutorState::SandboxReady {
        println!(
            "Container {} recreated from {}",
            config.sandbox.container_name, config.sandbox.image
        );
        Ok(())
    } else {
        anyhow::bail!("Container could not be started; running in {:?}", state)
    }
}

async fn run_cleanup(opts: &GlobalOpts) -> Result<()> {
    let config = opts.load_config()?;
    let lock = SandboxLock::new(&config.paths)?;
    let _guard = lock.acquire_async().await?;

    let runtime = DockerCli::new(config.sandbox.runtime.clone());
    let name = &config.sandbox.container_name;
    match runtime.inspect(name).await? {
        None => println!("No container named {}", name),
        Some(_) => {
            runtime.remove(name).await?;
            println!("Removed container {}", name);
        }
    }
    Ok(())
}

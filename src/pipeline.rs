//! Query → command → validation → approval → execution → record.

use tracing::{debug, info, warn};

use crate::generator::{CommandGenerator, GeneratedCommand};
use crate::oplog::{OperationLog, OperationRecord, OperationStatus};
use crate::safety::{CommandValidator, ValidationResult};
use crate::sandbox::SandboxExecutor;

/// A validated command waiting for a go/no-go decision.
#[derive(Debug, Clone, Copy)]
pub struct PendingCommand<'a> {
    pub query: &'a str,
    pub command: &'a str,
    pub explanation: &'a str,
    pub validation: &'a ValidationResult,
}

/// When to ask the caller before running a command.
pub enum Approval<'a> {
    /// Run everything that validates.
    Auto,
    /// Ask only when validation produced warnings.
    OnWarnings(&'a mut (dyn FnMut(&PendingCommand<'_>) -> bool + Send)),
    /// Ask before every command.
    Always(&'a mut (dyn FnMut(&PendingCommand<'_>) -> bool + Send)),
}

impl Approval<'_> {
    fn approve(&mut self, pending: &PendingCommand<'_>) -> bool {
        match self {
            Approval::Auto => true,
            Approval::OnWarnings(ask) => pending.validation.warnings().is_empty() || ask(pending),
            Approval::Always(ask) => ask(pending),
        }
    }
}

pub struct Pipeline {
    generator: Option<Box<dyn CommandGenerator>>,
    validator: CommandValidator,
    executor: SandboxExecutor,
    oplog: OperationLog,
}

impl Pipeline {
    /// A pipeline that can only run literal commands until a generator is
    /// attached.
    pub fn new(validator: CommandValidator, executor: SandboxExecutor, oplog: OperationLog) -> Self {
        Self {
            generator: None,
            validator,
            executor,
            oplog,
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn CommandGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn oplog(&self) -> &OperationLog {
        &self.oplog
    }

    /// Turn a natural-language query into a command and run it.
    pub async fn process(&self, query: &str, approval: Approval<'_>) -> OperationRecord {
        let Some(generator) = &self.generator else {
            return self.finish(generation_failed(query, "No command generator configured"));
        };

        info!("Processing query: {}", query);
        let generated = match generator.generate(query).await {
            Ok(generated) if !generated.command.trim().is_empty() => generated,
            Ok(_) => {
                return self.finish(generation_failed(query, "Generator returned no command"));
            }
            Err(e) => {
                warn!("Command generation failed: {:#}", e);
                return self.finish(generation_failed(query, &format!("{e:#}")));
            }
        };
        debug!("Generated: {}", generated.command);

        self.validate_and_run(query, generated, approval).await
    }

    /// Same cycle as [`process`](Self::process) for a command the caller
    /// already has.
    pub async fn run_command(&self, command: &str, approval: Approval<'_>) -> OperationRecord {
        let generated = GeneratedCommand {
            command: command.to_string(),
            explanation: String::new(),
        };
        self.validate_and_run(command, generated, approval).await
    }

    async fn validate_and_run(
        &self,
        query: &str,
        generated: GeneratedCommand,
        mut approval: Approval<'_>,
    ) -> OperationRecord {
        let validation = self.validator.validate(&generated.command);

        let mut record = OperationRecord::new(query, OperationStatus::Blocked);
        record.generated_command = Some(generated.command.clone());
        if !generated.explanation.is_empty() {
            record.explanation = Some(generated.explanation.clone());
        }

        let Some(command) = validation.sanitized_command().map(str::to_string) else {
            info!(
                "Blocked: {} ({})",
                generated.command,
                validation.reason().unwrap_or_default()
            );
            record.error = validation.reason();
            record.validation = Some(validation);
            return self.finish(record);
        };

        let pending = PendingCommand {
            query,
            command: &command,
            explanation: &generated.explanation,
            validation: &validation,
        };
        if !approval.approve(&pending) {
            info!("Declined by user: {}", command);
            record.status = OperationStatus::CancelledByUser;
            record.validation = Some(validation);
            return self.finish(record);
        }

        let execution = self.executor.execute(&command, None).await;
        record.status = OperationStatus::Completed;
        if !execution.is_success() && !execution.stderr.is_empty() {
            record.error = Some(execution.stderr.trim().to_string());
        }
        record.final_command = Some(command);
        record.validation = Some(validation);
        record.execution = Some(execution);
        self.finish(record)
    }

    fn finish(&self, record: OperationRecord) -> OperationRecord {
        self.oplog.record(&record);
        record
    }
}

fn generation_failed(query: &str, error: &str) -> OperationRecord {
    let mut record = OperationRecord::new(query, OperationStatus::GenerationError);
    record.error = Some(error.to_string());
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SandboxConfig, SandboxMode};
    use crate::generator::MockCommandGenerator;
    use crate::layout::SandboxLayout;
    use crate::safety::ValidationOutcome;
    use crate::sandbox::{DockerCli, ExecutionMethod, MountTable};
    use std::sync::Arc;

    struct Fixture {
        dir: tempfile::TempDir,
        pipeline: Pipeline,
    }

    impl Fixture {
        fn workspace(&self) -> std::path::PathBuf {
            self.dir.path().join("ws")
        }

        fn log(&self) -> OperationLog {
            OperationLog::at(self.dir.path().join("ops.jsonl"), 100, true)
        }
    }

    fn fixture(generator: Option<MockCommandGenerator>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("Documents")).unwrap();
        std::fs::write(root.join("Documents/notes.txt"), "hello\n").unwrap();

        let layout = SandboxLayout::default();
        let mounts = MountTable::discover_with(&layout, &root.join("ws"), |f| {
            Some(root.join(f.canonical_name()))
        })
        .unwrap();
        let settings = SandboxConfig {
            mode: SandboxMode::Local,
            ..SandboxConfig::default()
        };
        let executor = SandboxExecutor::with_runtime(
            settings,
            layout.clone(),
            mounts,
            Arc::new(DockerCli::new("nlfs-unused-runtime")),
        );

        let mut pipeline = Pipeline::new(
            CommandValidator::new(layout),
            executor,
            OperationLog::at(dir.path().join("ops.jsonl"), 100, true),
        );
        if let Some(generator) = generator {
            pipeline = pipeline.with_generator(Box::new(generator));
        }
        Fixture { dir, pipeline }
    }

    fn generating(command: &'static str) -> MockCommandGenerator {
        let mut generator = MockCommandGenerator::new();
        generator.expect_generate().returning(move |_| {
            Ok(GeneratedCommand {
                command: command.to_string(),
                explanation: "explained".to_string(),
            })
        });
        generator
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generated_command_runs_and_is_recorded() {
        let fx = fixture(Some(generating("cat ~/Documents/notes.txt")));

        let record = fx.pipeline.process("show my notes", Approval::Auto).await;

        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(
            record.final_command.as_deref(),
            Some("cat /home/user/Documents/notes.txt")
        );
        let execution = record.execution.as_ref().unwrap();
        assert_eq!(execution.stdout, "hello\n");
        assert_eq!(execution.execution_method, ExecutionMethod::Local);
        assert_eq!(record.explanation.as_deref(), Some("explained"));

        let logged = fx.log().recent(1).unwrap();
        assert_eq!(logged[0].id, record.id);
    }

    #[tokio::test]
    async fn unsafe_command_is_blocked_before_execution() {
        let fx = fixture(Some(generating("rm -rf ~/Documents/notes.txt")));

        let record = fx.pipeline.process("delete notes", Approval::Auto).await;

        assert_eq!(record.status, OperationStatus::Blocked);
        assert!(record.execution.is_none());
        assert!(record.final_command.is_none());
        assert_eq!(
            record.validation.as_ref().unwrap().outcome(),
            ValidationOutcome::BlockedByBoundary
        );
        assert!(fx.dir.path().join("Documents/notes.txt").exists());
    }

    #[tokio::test]
    async fn generation_failure_halts_before_validation() {
        let mut generator = MockCommandGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let fx = fixture(Some(generator));

        let record = fx.pipeline.process("anything", Approval::Auto).await;

        assert_eq!(record.status, OperationStatus::GenerationError);
        assert!(record.validation.is_none());
        assert!(record.error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(fx.log().read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_generator_is_a_generation_error() {
        let fx = fixture(None);
        let record = fx.pipeline.process("list files", Approval::Auto).await;
        assert_eq!(record.status, OperationStatus::GenerationError);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn declining_a_warned_command_cancels_it() {
        let fx = fixture(None);
        let target = fx.workspace().join("scratch.txt");
        std::fs::write(&target, "x").unwrap();

        let mut asked = 0;
        let mut decline = |pending: &PendingCommand<'_>| -> bool {
            asked += 1;
            assert!(!pending.validation.warnings().is_empty());
            false
        };
        let record = fx
            .pipeline
            .run_command("rm ~/workspace/scratch.txt", Approval::OnWarnings(&mut decline))
            .await;

        assert_eq!(asked, 1);
        assert_eq!(record.status, OperationStatus::CancelledByUser);
        assert!(record.execution.is_none());
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn approving_a_warned_command_runs_it() {
        let fx = fixture(None);
        let target = fx.workspace().join("scratch.txt");
        std::fs::write(&target, "x").unwrap();

        let mut approve = |_: &PendingCommand<'_>| true;
        let record = fx
            .pipeline
            .run_command("rm ~/workspace/scratch.txt", Approval::OnWarnings(&mut approve))
            .await;

        assert_eq!(record.status, OperationStatus::Completed);
        assert!(record.execution.as_ref().unwrap().is_success());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quiet_commands_skip_the_prompt() {
        let fx = fixture(None);
        let mut never = |_: &PendingCommand<'_>| -> bool { panic!("should not ask") };
        let record = fx
            .pipeline
            .run_command("ls ~/Documents", Approval::OnWarnings(&mut never))
            .await;
        assert_eq!(record.status, OperationStatus::Completed);
        assert!(record.execution.unwrap().stdout.contains("notes.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_execution_still_completes() {
        let fx = fixture(None);
        let record = fx
            .pipeline
            .run_command("ls ~/Documents/missing", Approval::Auto)
            .await;
        assert_eq!(record.status, OperationStatus::Completed);
        assert!(!record.execution.as_ref().unwrap().is_success());
        assert!(record.error.is_some());
    }
}

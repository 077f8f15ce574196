//! Decides whether a generated command may run.
//!
//! Checks run in a fixed order and the first hard failure wins:
//!
//! 1. empty input
//! 2. forbidden patterns, on the raw command
//! 3. path normalization
//! 4. write-target boundaries, for every segment of a chain, resolved
//!    against every directory an earlier `cd` may have left the shell in
//! 5. injection patterns (suspicious shapes only warn)
//! 6. a sweep over every path-like token for system roots and excessive
//!    `..` traversal
//!
//! Validation is pure: it never touches the filesystem or spawns anything.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::layout::SandboxLayout;

use super::commands::{self, CommandClass, WriteTarget};
use super::normalize::PathNormalizer;
use super::patterns::{self, FORBIDDEN_PATTERNS, INJECTION_PATTERNS, SUSPICIOUS_PATTERNS};
use super::tokenizer::{chained_segments, is_operator, segments, tokenize, unquote};

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Empty command")]
    Empty,

    #[error("Forbidden operation: {name}")]
    Forbidden { name: String },

    #[error("Cannot write to read-only mount: {path}")]
    ReadOnlyTarget { path: String },

    #[error("Write target outside sandbox: {path}")]
    OutsideSandbox { path: String },

    #[error("Cannot resolve write target: {path}")]
    UnresolvedTarget { path: String },

    #[error("Potential injection detected: {name}")]
    Injection { name: String },

    #[error("Access to forbidden path: {root}")]
    ForbiddenPath { root: String },

    #[error("Excessive directory traversal ({count} levels)")]
    ExcessiveTraversal { count: usize },
}

impl Rejection {
    pub fn outcome(&self) -> ValidationOutcome {
        match self {
            Rejection::ReadOnlyTarget { .. }
            | Rejection::OutsideSandbox { .. }
            | Rejection::UnresolvedTarget { .. } => ValidationOutcome::BlockedByBoundary,
            Rejection::Injection { .. } => ValidationOutcome::BlockedByInjection,
            _ => ValidationOutcome::Forbidden,
        }
    }
}

/// Coarse verdict, recorded in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Forbidden,
    BlockedByBoundary,
    BlockedByInjection,
    Safe,
    SafeWithWarnings,
}

/// Result of validating one command.
///
/// A safe result always carries the normalized command to execute; an
/// unsafe one carries the rejection and never a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    is_safe: bool,
    outcome: ValidationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejection: Option<Rejection>,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sanitized_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_class: Option<CommandClass>,
}

impl ValidationResult {
    /// The rejection reason is appended to the warnings so that callers
    /// listing warnings also show why the command was refused.
    fn rejected(
        rejection: Rejection,
        mut warnings: Vec<String>,
        class: Option<CommandClass>,
    ) -> Self {
        warnings.push(rejection.to_string());
        Self {
            is_safe: false,
            outcome: rejection.outcome(),
            rejection: Some(rejection),
            warnings,
            sanitized_command: None,
            command_class: class,
        }
    }

    fn accepted(command: String, warnings: Vec<String>, class: CommandClass) -> Self {
        let outcome = if warnings.is_empty() {
            ValidationOutcome::Safe
        } else {
            ValidationOutcome::SafeWithWarnings
        };
        Self {
            is_safe: true,
            outcome,
            rejection: None,
            warnings,
            sanitized_command: Some(command),
            command_class: Some(class),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.is_safe
    }

    pub fn outcome(&self) -> ValidationOutcome {
        self.outcome
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    /// Human-readable rejection reason.
    pub fn reason(&self) -> Option<String> {
        self.rejection.as_ref().map(ToString::to_string)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn sanitized_command(&self) -> Option<&str> {
        self.sanitized_command.as_deref()
    }

    pub fn command_class(&self) -> Option<CommandClass> {
        self.command_class
    }
}

#[derive(Debug, Clone)]
pub struct CommandValidator {
    layout: SandboxLayout,
    normalizer: PathNormalizer,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(SandboxLayout::default())
    }
}

impl CommandValidator {
    pub fn new(layout: SandboxLayout) -> Self {
        let normalizer = PathNormalizer::new(&layout);
        Self { layout, normalizer }
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    pub fn validate(&self, command: &str) -> ValidationResult {
        let raw = command.trim();
        if raw.is_empty() {
            return ValidationResult::rejected(Rejection::Empty, Vec::new(), None);
        }

        if let Some(p) = patterns::first_match(&FORBIDDEN_PATTERNS, raw) {
            return ValidationResult::rejected(
                Rejection::Forbidden {
                    name: p.name.to_string(),
                },
                Vec::new(),
                None,
            );
        }

        let normalized = self.normalizer.normalize(raw);
        let tokens = tokenize(&normalized);
        let segs = segments(&tokens);

        let class = segs
            .first()
            .map(|s| commands::classify_segment(s))
            .unwrap_or(CommandClass::Unknown);

        let mut warnings = Vec::new();
        let mut dirs = WorkingDirs::new(self.layout.home.clone());
        let mut previous: Option<&[String]> = None;

        for (op, segment) in chained_segments(&tokens) {
            let piped_from = match op {
                Some("|") | Some("|&") => previous,
                _ => None,
            };
            let checked = self.check_segment(segment, &dirs, piped_from, &mut warnings);
            if let Err(rejection) = checked {
                return ValidationResult::rejected(rejection, warnings, Some(class));
            }
            self.follow_cd(segment, &mut dirs);
            previous = Some(segment);
        }

        if let Some(p) = patterns::first_match(&INJECTION_PATTERNS, &normalized) {
            return ValidationResult::rejected(
                Rejection::Injection {
                    name: p.name.to_string(),
                },
                warnings,
                Some(class),
            );
        }

        for p in SUSPICIOUS_PATTERNS.iter() {
            if p.regex.is_match(&normalized) {
                warnings.push(p.name.to_string());
            }
        }

        if let Err(rejection) = self.sweep_paths(&tokens) {
            return ValidationResult::rejected(rejection, warnings, Some(class));
        }

        ValidationResult::accepted(normalized, warnings, class)
    }

    /// Whether `command` would pass validation and writes nothing.
    pub fn is_safe_for_readonly(&self, command: &str) -> bool {
        let result = self.validate(command);
        if !result.is_safe() {
            return false;
        }
        let Some(normalized) = result.sanitized_command() else {
            return false;
        };
        let tokens = tokenize(normalized);
        segments(&tokens).iter().all(|segment| {
            commands::classify_segment(segment) == CommandClass::ReadOnly
                && commands::redirection_targets(segment).is_empty()
        })
    }

    fn check_segment(
        &self,
        segment: &[String],
        dirs: &WorkingDirs,
        piped_from: Option<&[String]>,
        warnings: &mut Vec<String>,
    ) -> Result<(), Rejection> {
        let writes = commands::segment_writes(segment);

        let mut targets = writes.targets;
        if writes.from_input {
            // Only a `find` feeding the pipe says where its paths come from.
            let source = piped_from
                .filter(|prev| commands::base_name(prev).as_deref() == Some("find"))
                .ok_or_else(|| Rejection::UnresolvedTarget {
                    path: format!("input of {}", writes.label),
                })?;
            targets.extend(
                commands::search_roots(source)
                    .into_iter()
                    .map(|path| WriteTarget { path, recursive: true }),
            );
        }
        targets.extend(
            commands::redirection_targets(segment)
                .into_iter()
                .map(|path| WriteTarget { path, recursive: false }),
        );

        for target in &targets {
            self.check_target(target, dirs)?;
        }

        if writes.destructive {
            let warning = format!("Destructive command: {}", writes.label);
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }

        Ok(())
    }

    /// Check one write target from every directory the shell may be in.
    fn check_target(&self, target: &WriteTarget, dirs: &WorkingDirs) -> Result<(), Rejection> {
        let path = target.path.as_str();
        let unresolved = || Rejection::UnresolvedTarget {
            path: path.to_string(),
        };

        // Expansions the shell would still perform.
        if path.starts_with('~') || path.contains(['$', '`']) {
            return Err(unresolved());
        }

        let candidates: Vec<PathBuf> = if path.starts_with('/') {
            vec![self.layout.resolve(path)]
        } else if dirs.unknown {
            return Err(unresolved());
        } else {
            dirs.known
                .iter()
                .map(|cwd| self.layout.resolve_from(cwd, path))
                .collect()
        };

        for resolved in &candidates {
            let read_only = self
                .layout
                .read_only_mount_containing(resolved)
                .or_else(|| self.layout.read_only_mount_matching(resolved))
                .or_else(|| {
                    target
                        .recursive
                        .then(|| self.layout.read_only_mount_below(resolved))
                        .flatten()
                });
            if read_only.is_some() {
                return Err(Rejection::ReadOnlyTarget {
                    path: path.to_string(),
                });
            }
            if !self.layout.within_safe_roots(resolved) {
                return Err(Rejection::OutsideSandbox {
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Record where a `cd`/`pushd`/`popd` segment may move the shell.
    fn follow_cd(&self, segment: &[String], dirs: &mut WorkingDirs) {
        let Some(name) = commands::base_name(segment) else {
            return;
        };
        if !matches!(name.as_str(), "cd" | "pushd" | "popd") {
            return;
        }

        let previous_dir = segment.iter().any(|t| t == "-");
        let operand = commands::operands(segment).into_iter().next();
        let dest = match (name.as_str(), operand) {
            _ if previous_dir => None,
            ("cd", None) => Some(self.layout.home.to_string_lossy().into_owned()),
            ("popd", _) | (_, None) => None,
            (_, Some(dir)) => Some(dir),
        };

        match dest {
            Some(dir) if !dir.starts_with('~') && !dir.contains(['$', '`', '*', '?', '[', '{']) => {
                dirs.enter(&self.layout, &dir)
            }
            _ => dirs.unknown = true,
        }
    }

    fn sweep_paths(&self, tokens: &[String]) -> Result<(), Rejection> {
        let mut traversal = 0;

        for token in tokens {
            if is_operator(token) && !token.contains('/') {
                continue;
            }

            for candidate in path_candidates(token) {
                if let Some(root) = self.layout.forbidden_root_for(candidate) {
                    return Err(Rejection::ForbiddenPath { root });
                }
                traversal += candidate.split('/').filter(|c| *c == "..").count();
            }
        }

        if traversal > self.layout.max_traversal_depth {
            return Err(Rejection::ExcessiveTraversal { count: traversal });
        }
        Ok(())
    }
}

/// Directories the shell may be in when a segment runs. A `cd` can fail or
/// run in a subshell, so it adds a candidate rather than replacing one.
#[derive(Debug, Clone)]
struct WorkingDirs {
    known: Vec<PathBuf>,
    unknown: bool,
}

impl WorkingDirs {
    fn new(home: PathBuf) -> Self {
        Self {
            known: vec![home],
            unknown: false,
        }
    }

    fn enter(&mut self, layout: &SandboxLayout, dir: &str) {
        let next: Vec<PathBuf> = self
            .known
            .iter()
            .map(|cwd| layout.resolve_from(cwd, dir))
            .collect();
        for path in next {
            if !self.known.contains(&path) {
                self.known.push(path);
            }
        }
    }
}

/// Path-like substrings of a token: the unquoted token itself, the value
/// after `=` in `--flag=/path` or `of=/path`, and the target glued to a
/// redirection such as `>/etc/x`.
fn path_candidates(token: &str) -> Vec<&str> {
    let body = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '&');
    let body = body.trim_start_matches(['>', '<', '|']);
    let body = unquote(body);

    let mut out = vec![body];
    if let Some((_, value)) = body.rsplit_once('=') {
        out.push(unquote(value));
    }
    out
}

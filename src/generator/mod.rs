//! Natural-language to shell command generation.
//!
//! The generator is an untrusted collaborator: whatever it returns goes
//! through the validator before anything runs.

mod providers;

pub use providers::{OllamaGenerator, OpenAIGenerator};

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;

/// System prompt sent with every query.
pub const SYSTEM_PROMPT: &str = "You are an expert Linux filesystem assistant. When users ask about file operations, provide accurate bash commands with clear explanations. For dangerous operations, include warnings.";

/// A single best-effort command plus optional explanation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCommand {
    pub command: String,
    pub explanation: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandGenerator: Send + Sync {
    async fn generate(&self, query: &str) -> Result<GeneratedCommand>;
}

/// Build the configured generator. Fails if the provider is unknown or
/// missing required settings.
pub fn create_generator(config: &GeneratorConfig) -> Result<Box<dyn CommandGenerator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaGenerator::new(
            &config.endpoint,
            &config.model,
            config.timeout_secs,
        )?)),
        "openai" => {
            let api_key = config
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty() && !k.starts_with('$'))
                .ok_or_else(|| {
                    anyhow::anyhow!("generator.api_key is required for the openai provider")
                })?;
            Ok(Box::new(OpenAIGenerator::new(
                api_key,
                &config.endpoint,
                &config.model,
                config.timeout_secs,
            )?))
        }
        other => anyhow::bail!("Unknown generator provider: {} (ollama | openai)", other),
    }
}

static KNOWN_COMMAND_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(find|ls|grep|du|df|cat|head|tail|sort|chmod|rm|cp|mv|mkdir|touch|echo)\b")
        .unwrap_or_else(|e| panic!("invalid command-start pattern: {e}"))
});

static GLUED_FIND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[\s;|&])find\.").unwrap_or_else(|e| panic!("invalid find pattern: {e}"))
});

/// Split raw model output into a command and an explanation.
///
/// Command lines run until the first blank line or the first line that
/// starts with `#` or `This`; everything after is explanation. Markdown
/// fences and an `Assistant:` transcript prefix are dropped.
pub fn parse_response(raw: &str) -> GeneratedCommand {
    let text = match raw.rfind("Assistant:") {
        Some(idx) => &raw[idx + "Assistant:".len()..],
        None => raw,
    };
    let text: String = text
        .trim()
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();

    let mut command_lines = Vec::new();
    let mut explanation_lines = Vec::new();
    let mut in_explanation = false;

    for line in text.lines() {
        let line = line.trim();
        if in_explanation {
            explanation_lines.push(line);
        } else if line.is_empty() {
            in_explanation = true;
        } else if line.starts_with('#') || line.starts_with("This") {
            in_explanation = true;
            explanation_lines.push(line);
        } else {
            command_lines.push(line);
        }
    }

    let mut command = command_lines.join(" ").trim().to_string();
    let mut explanation = explanation_lines.join(" ").trim().to_string();

    if command.is_empty() {
        if KNOWN_COMMAND_START.is_match(text) {
            let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
            command = first.trim().to_string();
            explanation = rest.trim().to_string();
        } else {
            command = text.to_string();
            explanation = String::new();
        }
    }

    GeneratedCommand {
        command: GLUED_FIND.replace_all(&command, "${1}find .").into_owned(),
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_then_explanation() {
        let parsed = parse_response("ls -la ~/Desktop\n\nLists everything on the desktop.");
        assert_eq!(parsed.command, "ls -la ~/Desktop");
        assert_eq!(parsed.explanation, "Lists everything on the desktop.");
    }

    #[test]
    fn explanation_starts_at_comment_or_this() {
        let parsed = parse_response("du -sh ~/Downloads\n# shows total size\nmore");
        assert_eq!(parsed.command, "du -sh ~/Downloads");
        assert_eq!(parsed.explanation, "# shows total size more");

        let parsed = parse_response("find . -name '*.pdf'\nThis finds PDFs.");
        assert_eq!(parsed.command, "find . -name '*.pdf'");
        assert_eq!(parsed.explanation, "This finds PDFs.");
    }

    #[test]
    fn multi_line_command_is_joined() {
        let parsed = parse_response("find ~/Documents -name '*.txt'\n-mtime -7\n\nRecent text files.");
        assert_eq!(parsed.command, "find ~/Documents -name '*.txt' -mtime -7");
    }

    #[test]
    fn strips_transcript_prefix_and_fences() {
        let raw = "System: be helpful\n\nUser: list pdfs\n\nAssistant: ```bash\nfind. -name \"*.pdf\"\n```\nThis searches recursively.";
        let parsed = parse_response(raw);
        assert_eq!(parsed.command, "find . -name \"*.pdf\"");
        assert_eq!(parsed.explanation, "This searches recursively.");
    }

    #[test]
    fn leading_comment_falls_back_to_whole_text() {
        let parsed = parse_response("# no idea");
        assert_eq!(parsed.command, "# no idea");
        assert_eq!(parsed.explanation, "");
    }

    #[test]
    fn leading_blank_is_trimmed() {
        let parsed = parse_response("\n\n  ls\n");
        assert_eq!(parsed.command, "ls");
    }

    #[test]
    fn glued_find_only_at_word_start() {
        assert_eq!(parse_response("find.").command, "find .");
        assert_eq!(parse_response("ls | find./x").command, "ls | find ./x");
        assert_eq!(parse_response("cat myfind.sh").command, "cat myfind.sh");
    }

    #[test]
    fn provider_selection() {
        let mut config = GeneratorConfig::default();
        assert!(create_generator(&config).is_ok());

        config.provider = "openai".into();
        config.api_key = None;
        assert!(create_generator(&config).is_err());

        config.api_key = Some("${UNSET_KEY}".into());
        assert!(create_generator(&config).is_err());

        config.api_key = Some("sk-test".into());
        assert!(create_generator(&config).is_ok());

        config.provider = "granite".into();
        let err = create_generator(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown generator provider"));
    }
}

//! Regex blocklists.
//!
//! These are a minimum bar, not the safety boundary: target-path and
//! boundary checks in the validator do the real work. Patterns are compiled
//! once and matched against the trimmed raw command (forbidden) or the
//! normalized command (injection).

use once_cell::sync::Lazy;
use regex::Regex;

/// A compiled pattern with the human-readable name reported on a match.
pub struct NamedPattern {
    pub name: &'static str,
    pub regex: Regex,
}

fn compile(table: &[(&'static str, &str)]) -> Vec<NamedPattern> {
    table
        .iter()
        .map(|&(name, pattern)| NamedPattern {
            name,
            regex: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {name}: {e}")),
        })
        .collect()
}

/// Operations that are never allowed, whatever the paths involved.
pub static FORBIDDEN_PATTERNS: Lazy<Vec<NamedPattern>> = Lazy::new(|| {
    compile(&[
        (
            "recursive deletion of root or home",
            r#"\brm\s+(-\S+\s+)*(/|/\*|~|~/|~/\*|\$HOME|\$HOME/|\$HOME/\*|\$\{HOME\}|\$\{HOME\}/|/home/user|/home/user/|/home/user/\*)(\s|;|&|\||$)"#,
        ),
        (
            "recursive deletion of a system directory",
            r"\brm\s+(-\S+\s+)*/(etc|usr|var|bin|sbin|lib|lib64|boot|opt)(/|\s|;|&|\||$)",
        ),
        ("fork bomb", r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
        (
            "raw block-device write",
            r"(?i)\bdd\s+.*\bof=/dev/(sd|hd|nvme|xvd|mmcblk)",
        ),
        ("raw block-device write", r">\s*/dev/(sd|hd|nvme|xvd|mmcblk)"),
        ("filesystem formatting", r"\b(mkfs|mkswap|wipefs)\b"),
        (
            "recursive permission change on root",
            r"\bchmod\s+(-\S+\s+)*(-[a-zA-Z]*R[a-zA-Z]*|--recursive)\s+(-\S+\s+)*\S+\s+/\*?(\s|;|&|\||$)",
        ),
        (
            "recursive ownership change on root",
            r"\bch(own|grp)\s+(-\S+\s+)*(-[a-zA-Z]*R[a-zA-Z]*|--recursive)\s+(-\S+\s+)*\S+\s+/\*?(\s|;|&|\||$)",
        ),
        (
            "download-and-execute pipeline",
            r"(?i)\b(curl|wget|fetch)\b.*\|\s*(sudo\s+)?(ba|z|da|k)?sh\b",
        ),
        (
            "download-and-execute pipeline",
            r"(?i)\b(curl|wget|fetch)\b.*\|\s*(sudo\s+)?(python[0-9.]*|perl|ruby)\b",
        ),
        ("write to /etc", r">\s*/etc/"),
        ("write to /etc", r"\btee\s+(-\S+\s+)*/etc/"),
    ])
});

/// High-confidence injection shapes; any match blocks.
pub static INJECTION_PATTERNS: Lazy<Vec<NamedPattern>> = Lazy::new(|| {
    compile(&[
        ("chained destructive command", r"(?i);\s*rm\s+-[a-z]*[rf]"),
        ("command substitution with rm", r"\$\([^)]*\brm\b[^)]*\)"),
        ("backtick command with rm", r"`[^`]*\brm\b[^`]*`"),
        ("piping to a shell", r"\|\s*(sudo\s+)?(ba|z|da|k)?sh\b"),
        ("use of eval", r"\beval\s+"),
        ("potential reverse shell", r"2>&1.*\|\s*(nc|ncat|netcat)\b"),
        ("potential reverse shell", r"/dev/(tcp|udp)/"),
        (
            "background execution with redirect",
            r">\s*/dev/null\s*2>&1\s*&(\s*$|[^&])",
        ),
    ])
});

/// Lower-confidence shapes that only warn.
pub static SUSPICIOUS_PATTERNS: Lazy<Vec<NamedPattern>> = Lazy::new(|| {
    compile(&[
        ("Command substitution used", r"\$\([^)]+\)"),
        ("Backtick substitution used", r"`[^`]+`"),
    ])
});

/// First pattern in `set` matching `text`.
pub fn first_match<'a>(set: &'a [NamedPattern], text: &str) -> Option<&'a NamedPattern> {
    set.iter().find(|p| p.regex.is_match(text))
}

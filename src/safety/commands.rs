//! Static classification of base commands.
//!
//! Each known command maps to a [`CommandClass`]; write-capable commands
//! carry the strategy that picks their target operands out of the argument
//! list. `find` and `xargs` are read-only by name but can run a write
//! command of their own, so [`segment_writes`] looks past the command word.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::tokenizer::{is_operator, is_redirection, strip_quotes};

/// Which operands of a write-capable command name the files it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStrategy {
    /// Every operand (`rm a b`, `mkdir -p x`, `touch f`).
    AllOperands,
    /// Only the destination (`mv a b dest`, `cp -r src dest`).
    LastOperand,
    /// Everything after the mode/owner operand (`chmod 644 f`).
    AfterFirstOperand,
    /// The starting points of a `find` that deletes or runs a write command
    /// on what it finds.
    SearchRoots,
    /// Paths `xargs` reads from its input and hands to a write command.
    PipedInput,
}

/// Coarse classification of a base command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "targets")]
pub enum CommandClass {
    ReadOnly,
    Write(TargetStrategy),
    Unknown,
}

impl CommandClass {
    pub fn is_write(self) -> bool {
        matches!(self, CommandClass::Write(_))
    }
}

const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "more", "find", "grep", "egrep", "fgrep", "rg", "wc",
    "file", "stat", "du", "df", "tree", "pwd", "echo", "printf", "sort", "uniq", "cut", "awk",
    "sed", "diff", "comm", "cmp", "basename", "dirname", "realpath", "readlink", "md5sum",
    "sha1sum", "sha256sum", "strings", "od", "hexdump", "xxd", "nl", "tac", "rev", "column",
    "date", "cal", "env", "printenv", "id", "whoami", "hostname", "true", "false", "test", "[",
    "expr", "xargs", "tr", "locate",
];

const WRITE_COMMANDS: &[(&str, TargetStrategy)] = &[
    ("rm", TargetStrategy::AllOperands),
    ("rmdir", TargetStrategy::AllOperands),
    ("shred", TargetStrategy::AllOperands),
    ("truncate", TargetStrategy::AllOperands),
    ("touch", TargetStrategy::AllOperands),
    ("mkdir", TargetStrategy::AllOperands),
    ("tee", TargetStrategy::AllOperands),
    ("mv", TargetStrategy::LastOperand),
    ("cp", TargetStrategy::LastOperand),
    ("ln", TargetStrategy::LastOperand),
    ("chmod", TargetStrategy::AfterFirstOperand),
    ("chown", TargetStrategy::AfterFirstOperand),
    ("chgrp", TargetStrategy::AfterFirstOperand),
];

/// Commands that get a non-blocking "destructive" warning.
pub const DESTRUCTIVE_COMMANDS: &[&str] = &["rm", "rmdir", "shred", "truncate"];

/// Write commands whose `-r`/`-R` flag reaches everything below a target.
const RECURSIVE_COMMANDS: &[&str] = &["rm", "chmod", "chown", "chgrp"];

/// Words that run the rest of the line as a command of their own.
const WRAPPER_COMMANDS: &[&str] = &[
    "sudo", "env", "nice", "ionice", "nohup", "time", "command", "exec", "stdbuf", "timeout",
];


/// `find` actions that run a command per match.
const FIND_EXEC_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir"];

/// `find` actions that write their listing into a file.
const FIND_FILE_ACTIONS: &[&str] = &["-fprint", "-fprint0", "-fprintf", "-fls"];

/// `xargs` options that take a separate value.
const XARGS_VALUE_FLAGS: &[&str] = &[
    "-I", "-n", "-P", "-L", "-s", "-d", "-E", "-a", "--arg-file", "--delimiter", "--max-args",
    "--max-procs", "--max-lines", "--max-chars", "--eof",
];

static COMMAND_TABLE: Lazy<HashMap<&'static str, CommandClass>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for name in READ_ONLY_COMMANDS {
        table.insert(*name, CommandClass::ReadOnly);
    }
    for (name, strategy) in WRITE_COMMANDS {
        table.insert(*name, CommandClass::Write(*strategy));
    }
    table
});

pub fn classify(name: &str) -> CommandClass {
    COMMAND_TABLE
        .get(name)
        .copied()
        .unwrap_or(CommandClass::Unknown)
}

pub fn is_destructive(name: &str) -> bool {
    DESTRUCTIVE_COMMANDS.contains(&name)
}

/// Index of the command word in a segment, skipping wrappers such as
/// `sudo`, `env` or `timeout 5` (and their flags) and leading `VAR=value`
/// assignments. A wrapper with nothing after it is the command itself.
pub fn command_position(segment: &[String]) -> Option<usize> {
    let mut i = 0;
    let mut last_wrapper = None;
    while i < segment.len() {
        let token = segment[i].as_str();
        if WRAPPER_COMMANDS.contains(&token) {
            last_wrapper = Some(i);
            i += 1;
            while i < segment.len() && segment[i].starts_with('-') {
                if wrapper_flag_takes_value(token, &segment[i]) {
                    i += 1;
                }
                i += 1;
            }
            if token == "timeout" && i < segment.len() {
                i += 1;
            }
            continue;
        }
        if is_assignment(token) {
            i += 1;
            continue;
        }
        return Some(i);
    }
    last_wrapper
}

/// Command name of a segment with any directory prefix removed
/// (`/usr/bin/rm` becomes `rm`).
pub fn base_name(segment: &[String]) -> Option<String> {
    let token = &segment[command_position(segment)?];
    let name = token.rsplit('/').next().unwrap_or(token);
    Some(name.to_string())
}

/// Operands of a segment: everything after the command word that is not a
/// flag, an operator, or the target glued to or following a redirection.
pub fn operands(segment: &[String]) -> Vec<String> {
    let Some(pos) = command_position(segment) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut skip_next = false;
    for token in &segment[pos + 1..] {
        if skip_next {
            skip_next = false;
            continue;
        }
        if is_redirection(token) {
            skip_next = redirection_needs_target(token);
            continue;
        }
        if token.starts_with('-') || is_operator(token) {
            continue;
        }
        out.push(strip_quotes(token));
    }
    out
}

/// Files an output redirection in this segment would write.
pub fn redirection_targets(segment: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = segment.iter().peekable();
    while let Some(token) = iter.next() {
        if !is_redirection(token) {
            continue;
        }
        let body = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '&');
        if !body.starts_with('>') {
            continue;
        }
        let glued = body.trim_start_matches('>').trim_start_matches('|');
        let target = if glued.is_empty() {
            match iter.peek() {
                Some(next) if !is_operator(next) => iter.next().map(String::as_str),
                _ => None,
            }
        } else if glued.starts_with('&') {
            // fd duplication such as 2>&1
            None
        } else {
            Some(glued)
        };
        if let Some(t) = target {
            let t = strip_quotes(t);
            if t != "/dev/null" {
                out.push(t);
            }
        }
    }
    out
}

/// Target paths a write-capable command would create, modify or delete.
///
/// `cp`, `mv` and `ln` given `-t DIR` (or `--target-directory=DIR`) write
/// into `DIR` whatever their operand order.
pub fn extract_targets(strategy: TargetStrategy, segment: &[String]) -> Vec<String> {
    match strategy {
        TargetStrategy::AllOperands => operands(segment),
        TargetStrategy::LastOperand => match target_directory(segment) {
            Some(dir) => vec![dir],
            None => operands(segment).pop().into_iter().collect(),
        },
        TargetStrategy::AfterFirstOperand => operands(segment).into_iter().skip(1).collect(),
        TargetStrategy::SearchRoots | TargetStrategy::PipedInput => segment_writes(segment)
            .targets
            .into_iter()
            .map(|t| t.path)
            .collect(),
    }
}

/// A path a command would change. A recursive target covers everything
/// beneath it too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub path: String,
    pub recursive: bool,
}

impl WriteTarget {
    fn new(path: String, recursive: bool) -> Self {
        Self { path, recursive }
    }
}

/// What one segment of a command line writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentWrites {
    pub class: CommandClass,
    /// Name used in warnings: `rm`, or `find -delete`.
    pub label: String,
    pub targets: Vec<WriteTarget>,
    /// More targets arrive on stdin (`... | xargs rm`).
    pub from_input: bool,
    pub destructive: bool,
}

impl SegmentWrites {
    fn none(class: CommandClass, label: String) -> Self {
        Self {
            class,
            label,
            targets: Vec::new(),
            from_input: false,
            destructive: false,
        }
    }
}

/// Classify a whole segment, looking inside `find` actions and `xargs`.
pub fn classify_segment(segment: &[String]) -> CommandClass {
    segment_writes(segment).class
}

/// The write targets of one segment, redirections excluded.
pub fn segment_writes(segment: &[String]) -> SegmentWrites {
    let Some(pos) = command_position(segment) else {
        return SegmentWrites::none(CommandClass::Unknown, String::new());
    };
    let Some(name) = base_name(segment) else {
        return SegmentWrites::none(CommandClass::Unknown, String::new());
    };

    match (name.as_str(), classify(&name)) {
        ("find", _) => find_writes(segment, pos),
        ("xargs", _) => xargs_writes(segment, pos),
        (_, CommandClass::Write(strategy)) => {
            let recursive =
                RECURSIVE_COMMANDS.contains(&name.as_str()) && has_recursive_flag(segment, pos);
            SegmentWrites {
                class: CommandClass::Write(strategy),
                targets: extract_targets(strategy, segment)
                    .into_iter()
                    .map(|path| WriteTarget::new(path, recursive))
                    .collect(),
                from_input: false,
                destructive: is_destructive(&name),
                label: name,
            }
        }
        (_, class) => SegmentWrites::none(class, name),
    }
}

/// Starting points of a `find`: the operands before the first expression
/// token. `find` with none searches `.`.
pub fn search_roots(segment: &[String]) -> Vec<String> {
    let Some(pos) = command_position(segment) else {
        return Vec::new();
    };
    let roots: Vec<String> = segment[pos + 1..]
        .iter()
        .take_while(|t| !is_expression_start(t) && !is_operator(t))
        .map(|t| strip_quotes(t))
        .collect();
    if roots.is_empty() {
        vec![".".to_string()]
    } else {
        roots
    }
}

fn find_writes(segment: &[String], pos: usize) -> SegmentWrites {
    let expression = &segment[pos + 1..];
    let mut writes = SegmentWrites::none(CommandClass::ReadOnly, "find".to_string());
    let mut reaches_matches = false;

    let mut i = 0;
    while i < expression.len() {
        let token = expression[i].as_str();
        if token == "-delete" {
            reaches_matches = true;
            writes.destructive = true;
            writes.label = "find -delete".to_string();
        } else if FIND_FILE_ACTIONS.contains(&token) {
            if let Some(file) = expression.get(i + 1) {
                writes.targets.push(WriteTarget::new(strip_quotes(file), false));
                i += 1;
            }
        } else if FIND_EXEC_ACTIONS.contains(&token) {
            let end = expression[i + 1..]
                .iter()
                .position(|t| matches!(t.as_str(), ";" | "\\;" | "\\" | "+"))
                .map_or(expression.len(), |p| i + 1 + p);
            let inner = segment_writes(&expression[i + 1..end]);
            if inner.class.is_write() {
                // `cp {} dest` only reads the matches; `rm {}` writes them.
                reaches_matches |= inner.targets.iter().any(|t| t.path.contains("{}"));
                if inner.destructive || !writes.destructive {
                    writes.label = inner.label.clone();
                }
                writes.destructive |= inner.destructive;
                writes.targets.extend(without_placeholders(inner.targets, "{}"));
            }
            i = end;
        }
        i += 1;
    }

    if reaches_matches {
        writes.targets.extend(
            search_roots(segment)
                .into_iter()
                .map(|root| WriteTarget::new(root, true)),
        );
    }
    if reaches_matches || !writes.targets.is_empty() {
        writes.class = CommandClass::Write(TargetStrategy::SearchRoots);
    }
    writes
}

fn xargs_writes(segment: &[String], pos: usize) -> SegmentWrites {
    let mut replace: Option<String> = None;
    let mut i = pos + 1;
    while i < segment.len() && segment[i].starts_with('-') {
        let flag = segment[i].as_str();
        if flag == "-I" {
            replace = segment.get(i + 1).map(|r| strip_quotes(r));
            i += 1;
        } else if let Some(r) = flag.strip_prefix("-I") {
            replace = Some(strip_quotes(r));
        } else if flag == "-i" || flag == "--replace" {
            replace = Some("{}".to_string());
        } else if let Some(r) = flag.strip_prefix("--replace=").or_else(|| flag.strip_prefix("-i")) {
            replace = Some(strip_quotes(r));
        } else if XARGS_VALUE_FLAGS.contains(&flag) {
            i += 1;
        }
        i += 1;
    }

    let inner_segment = &segment[i.min(segment.len())..];
    let inner = segment_writes(inner_segment);
    if !inner.class.is_write() {
        return SegmentWrites::none(CommandClass::ReadOnly, "xargs".to_string());
    }

    let placeholder = replace.clone().unwrap_or_else(|| "{}".to_string());
    let explicit_destination = inner.class == CommandClass::Write(TargetStrategy::LastOperand)
        && (replace.is_some() || target_directory(inner_segment).is_some());

    SegmentWrites {
        class: CommandClass::Write(TargetStrategy::PipedInput),
        label: inner.label,
        targets: without_placeholders(inner.targets, &placeholder),
        from_input: !explicit_destination,
        destructive: inner.destructive,
    }
}

fn without_placeholders(targets: Vec<WriteTarget>, placeholder: &str) -> Vec<WriteTarget> {
    targets
        .into_iter()
        .filter(|t| !t.path.contains(placeholder))
        .collect()
}

fn is_expression_start(token: &str) -> bool {
    token.starts_with('-') || token.starts_with('(') || token.starts_with('!') || token == "\\("
}

/// The `-t DIR` / `--target-directory=DIR` destination of `cp`, `mv`, `ln`.
pub fn target_directory(segment: &[String]) -> Option<String> {
    let pos = command_position(segment)?;
    let mut iter = segment[pos + 1..].iter();
    while let Some(token) = iter.next() {
        if token == "--" {
            break;
        }
        if token == "-t" || token == "--target-directory" {
            return iter.next().map(|dir| strip_quotes(dir));
        }
        if let Some(dir) = token.strip_prefix("--target-directory=") {
            return Some(strip_quotes(dir));
        }
        if let Some(cluster) = token.strip_prefix('-')
            && !cluster.starts_with('-')
            && let Some(idx) = cluster.find('t')
        {
            let glued = &cluster[idx + 1..];
            return if glued.is_empty() {
                iter.next().map(|dir| strip_quotes(dir))
            } else {
                Some(strip_quotes(glued))
            };
        }
    }
    None
}

fn has_recursive_flag(segment: &[String], pos: usize) -> bool {
    segment[pos + 1..]
        .iter()
        .take_while(|t| t.as_str() != "--")
        .any(|t| {
            t == "--recursive"
                || (t.starts_with('-') && !t.starts_with("--") && t.contains(['r', 'R']))
        })
}

/// Wrapper flags that take a separate value (`nice -n 10`, `sudo -u bob`).
fn wrapper_flag_takes_value(wrapper: &str, flag: &str) -> bool {
    match wrapper {
        "sudo" => matches!(flag, "-u" | "-g" | "-C" | "-h" | "-p" | "-U" | "-r" | "-t"),
        "env" => matches!(flag, "-u" | "-C" | "-S"),
        "nice" => flag == "-n",
        "ionice" => matches!(flag, "-c" | "-n" | "-p"),
        "stdbuf" => matches!(flag, "-i" | "-o" | "-e"),
        "timeout" => matches!(flag, "-s" | "-k"),
        _ => false,
    }
}

fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

fn redirection_needs_target(token: &str) -> bool {
    let body = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '&');
    let rest = body.trim_start_matches(['>', '<', '|']);
    rest.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::tokenizer::tokenize;

    #[test]
    fn classification_table() {
        assert_eq!(classify("ls"), CommandClass::ReadOnly);
        assert_eq!(classify("rm"), CommandClass::Write(TargetStrategy::AllOperands));
        assert_eq!(classify("cp"), CommandClass::Write(TargetStrategy::LastOperand));
        assert_eq!(
            classify("chmod"),
            CommandClass::Write(TargetStrategy::AfterFirstOperand)
        );
        assert_eq!(classify("python3"), CommandClass::Unknown);
        assert!(is_destructive("shred"));
        assert!(!is_destructive("cp"));
    }

    #[test]
    fn base_name_skips_sudo_and_paths() {
        assert_eq!(base_name(&tokenize("sudo -n /usr/bin/rm -rf x")).as_deref(), Some("rm"));
        assert_eq!(base_name(&tokenize("LC_ALL=C sort f")).as_deref(), Some("sort"));
        assert_eq!(base_name(&tokenize("sudo")), None);
    }

    #[test]
    fn operands_skip_flags_and_redirections() {
        let seg = tokenize("cp -r src 'my dest' 2>/dev/null > log.txt");
        assert_eq!(operands(&seg), vec!["src", "my dest"]);
    }

    #[test]
    fn target_strategies() {
        let rm = tokenize("rm -f a.txt b.txt");
        assert_eq!(
            extract_targets(TargetStrategy::AllOperands, &rm),
            vec!["a.txt", "b.txt"]
        );

        let mv = tokenize("mv a b /home/user/workspace");
        assert_eq!(
            extract_targets(TargetStrategy::LastOperand, &mv),
            vec!["/home/user/workspace"]
        );

        let chmod = tokenize("chmod -R 644 x y");
        assert_eq!(
            extract_targets(TargetStrategy::AfterFirstOperand, &chmod),
            vec!["x", "y"]
        );
    }

    #[test]
    fn redirection_targets_found() {
        assert_eq!(
            redirection_targets(&tokenize("echo hi > /home/user/Desktop/a.txt")),
            vec!["/home/user/Desktop/a.txt"]
        );
        assert_eq!(redirection_targets(&tokenize("ls >>out.log")), vec!["out.log"]);
        assert!(redirection_targets(&tokenize("ls 2>/dev/null")).is_empty());
        assert!(redirection_targets(&tokenize("ls 2>&1")).is_empty());
        assert!(redirection_targets(&tokenize("wc -l < input.txt")).is_empty());
    }

    #[test]
    fn wrappers_are_looked_through() {
        assert_eq!(base_name(&tokenize("env rm ~/Desktop/a")).as_deref(), Some("rm"));
        assert_eq!(base_name(&tokenize("nice -n 10 touch f")).as_deref(), Some("touch"));
        assert_eq!(base_name(&tokenize("timeout 5 rm f")).as_deref(), Some("rm"));
        assert_eq!(base_name(&tokenize("env")).as_deref(), Some("env"));
        assert_eq!(base_name(&tokenize("sudo -s rm f")).as_deref(), Some("rm"));
        assert_eq!(base_name(&tokenize("timeout -s KILL 5 rm f")).as_deref(), Some("rm"));
    }

    #[test]
    fn target_directory_flag_names_the_destination() {
        let cp = tokenize("cp -t /home/user/Desktop a.txt b.txt");
        assert_eq!(
            extract_targets(TargetStrategy::LastOperand, &cp),
            vec!["/home/user/Desktop"]
        );

        let mv = tokenize("mv --target-directory=/tmp/out a");
        assert_eq!(extract_targets(TargetStrategy::LastOperand, &mv), vec!["/tmp/out"]);

        let glued = tokenize("cp -vt/home/user/Documents a");
        assert_eq!(
            extract_targets(TargetStrategy::LastOperand, &glued),
            vec!["/home/user/Documents"]
        );
    }

    #[test]
    fn quote_removal_applies_to_targets() {
        let seg = tokenize(r#"touch "/home/user/Desktop"/a.txt"#);
        assert_eq!(operands(&seg), vec!["/home/user/Desktop/a.txt"]);
        assert_eq!(
            redirection_targets(&tokenize(r#"echo x >"/home/user/Desktop"/b"#)),
            vec!["/home/user/Desktop/b"]
        );
    }

    #[test]
    fn plain_find_is_read_only() {
        assert_eq!(
            classify_segment(&tokenize("find . -name '*.pdf' -print")),
            CommandClass::ReadOnly
        );
        assert_eq!(classify_segment(&tokenize("xargs grep todo")), CommandClass::ReadOnly);
    }

    #[test]
    fn find_delete_writes_under_its_roots() {
        let writes = segment_writes(&tokenize("find /home/user/Documents -name '*.tmp' -delete"));
        assert_eq!(writes.class, CommandClass::Write(TargetStrategy::SearchRoots));
        assert_eq!(writes.label, "find -delete");
        assert!(writes.destructive);
        assert_eq!(
            writes.targets,
            vec![WriteTarget::new("/home/user/Documents".into(), true)]
        );

        let bare = segment_writes(&tokenize("find -delete"));
        assert_eq!(bare.targets, vec![WriteTarget::new(".".into(), true)]);
    }

    #[test]
    fn find_exec_takes_the_inner_command() {
        let writes = segment_writes(&tokenize("find /home/user -name x -exec rm {} +"));
        assert_eq!(writes.label, "rm");
        assert!(writes.destructive);
        assert_eq!(writes.targets, vec![WriteTarget::new("/home/user".into(), true)]);

        let copy = segment_writes(&tokenize("find . -name '*.pdf' -exec cp {} /home/user/Desktop +"));
        assert!(copy.class.is_write());
        assert_eq!(
            copy.targets,
            vec![WriteTarget::new("/home/user/Desktop".into(), false)]
        );

        let rename = segment_writes(&tokenize("find . -exec mv {} {}.bak +"));
        assert_eq!(rename.targets, vec![WriteTarget::new(".".into(), true)]);

        let read = segment_writes(&tokenize("find . -exec wc -l {} +"));
        assert_eq!(read.class, CommandClass::ReadOnly);
        assert!(read.targets.is_empty());
    }

    #[test]
    fn find_file_actions_are_targets() {
        let writes = segment_writes(&tokenize("find . -fprint /home/user/Desktop/list"));
        assert!(writes.class.is_write());
        assert!(!writes.destructive);
        assert_eq!(
            writes.targets,
            vec![WriteTarget::new("/home/user/Desktop/list".into(), false)]
        );
    }

    #[test]
    fn xargs_hands_its_input_to_write_commands() {
        let rm = segment_writes(&tokenize("xargs -0 rm -f"));
        assert_eq!(rm.class, CommandClass::Write(TargetStrategy::PipedInput));
        assert!(rm.from_input);
        assert!(rm.destructive);

        let copy = segment_writes(&tokenize("xargs cp -t /home/user/workspace"));
        assert!(!copy.from_input);
        assert_eq!(
            copy.targets,
            vec![WriteTarget::new("/home/user/workspace".into(), false)]
        );

        let replace = segment_writes(&tokenize("xargs -I % mv % /home/user/Desktop/"));
        assert!(!replace.from_input);
        assert_eq!(
            replace.targets,
            vec![WriteTarget::new("/home/user/Desktop/".into(), false)]
        );
    }

    #[test]
    fn recursive_flags_mark_targets() {
        let rm = segment_writes(&tokenize("rm -rf /home/user/workspace/.."));
        assert_eq!(
            rm.targets,
            vec![WriteTarget::new("/home/user/workspace/..".into(), true)]
        );
        let touch = segment_writes(&tokenize("touch -r ref new"));
        assert!(touch.targets.iter().all(|t| !t.recursive));
    }
}

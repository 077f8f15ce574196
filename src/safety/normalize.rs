//! Rewrites path references in a generated command into the canonical
//! sandbox layout.
//!
//! Rules, per token:
//! 1. `~`, `~/x`, `$HOME`, `${HOME}` and their `/x` forms expand to the
//!    sandbox home.
//! 2. Known folders are recased (`documents` becomes `Documents`). Under the
//!    home prefix only the casing changes; bare relative references
//!    (`desktop`, `desktop/a.txt`) become absolute sandbox paths.
//! 3. Flags, operators, fully quoted tokens, `find` name patterns and the
//!    pattern argument of `grep`/`sed`/`awk` are never touched, except that
//!    a double-quoted `"$HOME/..."` still has the home substituted.
//! 4. A redirection target is a path, glued (`>~/x`) or not.
//! 5. A command word glued to its path (`find.`, `ls~/Desktop`) is split.
//!
//! The output is a fixed point: normalizing it again returns it unchanged.

use crate::layout::{KnownFolder, SandboxLayout};

use super::commands::command_position;
use super::tokenizer::{is_chain_operator, is_fully_quoted, is_redirection, tokenize, unquote};

/// Commands whose first operand is a pattern or script, not a path.
const PATTERN_COMMANDS: &[&str] = &["grep", "egrep", "fgrep", "rg", "sed", "awk"];

/// Commands whose operands are free text.
const TEXT_COMMANDS: &[&str] = &["echo", "printf"];

/// `find` predicates whose value is a pattern.
const FIND_PATTERN_FLAGS: &[&str] = &[
    "-name", "-iname", "-path", "-ipath", "-wholename", "-iwholename", "-regex", "-iregex",
    "-lname", "-ilname",
];

/// Flags that take the search pattern as their value.
const PATTERN_VALUE_FLAGS: &[&str] = &["-e", "--regexp", "-f", "--file"];

/// Commands that users and models glue to a following path.
const GLUE_PRONE_COMMANDS: &[&str] = &["find", "ls", "du", "tree", "stat", "cd"];

#[derive(Debug, Clone)]
pub struct PathNormalizer {
    home: String,
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new(&SandboxLayout::default())
    }
}

impl PathNormalizer {
    pub fn new(layout: &SandboxLayout) -> Self {
        let home = layout.home.to_string_lossy().trim_end_matches('/').to_string();
        Self { home }
    }

    pub fn normalize(&self, command: &str) -> String {
        let mut state = SegmentState::default();
        let mut out: Vec<String> = Vec::new();

        for token in tokenize(command) {
            if is_chain_operator(&token) {
                state = SegmentState::default();
                out.push(token);
                continue;
            }

            if is_redirection(&token) {
                let (op, target) = split_redirection(&token);
                if target.is_empty() {
                    state.redirect_target_next = redirection_is_bare(&token);
                    out.push(token);
                } else if target.starts_with('&') || op.ends_with("<<") {
                    out.push(token);
                } else {
                    out.push(format!("{}{}", op, self.redirect_target(target)));
                }
                continue;
            }

            if state.awaiting_command {
                if token.starts_with('-') || precedes_command_word(&token) {
                    out.push(token);
                    continue;
                }
                state.awaiting_command = false;

                if let Some((word, rest)) = split_glued_command(&token) {
                    state.enter_command(word);
                    out.push(word.to_string());
                    out.push(self.operand(&mut state, rest));
                } else {
                    let name = token.rsplit('/').next().unwrap_or(&token).to_string();
                    state.enter_command(&name);
                    out.push(token);
                }
                continue;
            }

            let rewritten = self.operand(&mut state, &token);
            out.push(rewritten);
        }

        out.join(" ")
    }

    /// Decide whether an argument token is a path and rewrite it if so.
    fn operand(&self, state: &mut SegmentState, token: &str) -> String {
        if state.redirect_target_next {
            state.redirect_target_next = false;
            return self.redirect_target(token);
        }

        if state.skip_next {
            state.skip_next = false;
            return token.to_string();
        }

        if token.starts_with('-') {
            if state.in_find && FIND_PATTERN_FLAGS.contains(&token) {
                state.skip_next = true;
            }
            if state.pattern_pending && PATTERN_VALUE_FLAGS.contains(&token) {
                state.skip_next = true;
                state.pattern_pending = false;
            }
            return token.to_string();
        }

        if state.pattern_pending {
            state.pattern_pending = false;
            return token.to_string();
        }

        if state.text_only {
            return token.to_string();
        }

        if is_fully_quoted(token) {
            return self.expand_quoted_home(token);
        }

        self.rewrite_path(token)
    }

    fn redirect_target(&self, token: &str) -> String {
        if is_fully_quoted(token) {
            self.expand_quoted_home(token)
        } else {
            self.rewrite_path(token)
        }
    }

    /// `"$HOME/my docs"` expands inside double quotes, so the home is
    /// substituted there too. Casing is left alone.
    fn expand_quoted_home(&self, token: &str) -> String {
        let inner = unquote(token);
        if token.starts_with('"') && inner.starts_with('$') {
            let expanded = self.expand_home(inner);
            if expanded != inner {
                return format!("\"{}\"", expanded);
            }
        }
        token.to_string()
    }

    /// Apply home expansion then folder canonicalization to one path token.
    pub fn rewrite_path(&self, token: &str) -> String {
        let expanded = self.expand_home(token);
        self.canonicalize_folder(&expanded)
    }

    fn expand_home(&self, token: &str) -> String {
        for bare in ["~", "$HOME", "${HOME}"] {
            if token == bare {
                return self.home.clone();
            }
            if let Some(rest) = token.strip_prefix(bare).and_then(|r| r.strip_prefix('/')) {
                return format!("{}/{}", self.home, rest);
            }
        }
        token.to_string()
    }

    fn canonicalize_folder(&self, token: &str) -> String {
        let home_prefix = format!("{}/", self.home);

        if let Some(rest) = token.strip_prefix(&home_prefix) {
            return format!("{}{}", home_prefix, self.recase_below_home(rest));
        }

        if token.starts_with(['/', '.', '~', '$']) {
            return token.to_string();
        }

        let (first, _) = split_first_component(token);
        match KnownFolder::from_name(first) {
            Some(_) => format!("{}{}", home_prefix, self.recase_below_home(token)),
            None => token.to_string(),
        }
    }

    /// Recase each component that lands directly in the home, following
    /// `..` lexically: `Desktop/../documents` gives `Desktop/../Documents`.
    fn recase_below_home(&self, rest: &str) -> String {
        let home: Vec<&str> = self.home.split('/').filter(|c| !c.is_empty()).collect();
        let mut at = home.clone();

        rest.split('/')
            .map(|component| match component {
                "" | "." => component,
                ".." => {
                    at.pop();
                    component
                }
                name => {
                    let recased = if at == home {
                        KnownFolder::from_name(name).map(KnownFolder::canonical_name)
                    } else {
                        None
                    };
                    at.push(name);
                    recased.unwrap_or(name)
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Normalize with the default sandbox layout.
pub fn normalize_command(command: &str) -> String {
    PathNormalizer::default().normalize(command)
}

#[derive(Debug)]
struct SegmentState {
    awaiting_command: bool,
    in_find: bool,
    pattern_pending: bool,
    text_only: bool,
    skip_next: bool,
    redirect_target_next: bool,
}

impl Default for SegmentState {
    fn default() -> Self {
        Self {
            awaiting_command: true,
            in_find: false,
            pattern_pending: false,
            text_only: false,
            skip_next: false,
            redirect_target_next: false,
        }
    }
}

impl SegmentState {
    fn enter_command(&mut self, name: &str) {
        self.in_find = name == "find";
        self.pattern_pending = PATTERN_COMMANDS.contains(&name);
        self.text_only = TEXT_COMMANDS.contains(&name);
    }
}

/// `("Desktop", "/a/b")` for `"Desktop/a/b"`; `("Desktop", "")` for `"Desktop"`.
fn split_first_component(path: &str) -> (&str, &str) {
    match path.find('/') {
        Some(idx) => (&path[..idx], &path[idx..]),
        None => (path, ""),
    }
}

fn split_glued_command(token: &str) -> Option<(&str, &str)> {
    GLUE_PRONE_COMMANDS.iter().find_map(|cmd| {
        let rest = token.strip_prefix(cmd)?;
        let glued = rest == "."
            || rest == ".."
            || rest.starts_with("./")
            || rest.starts_with("../")
            || rest.starts_with('/')
            || rest.starts_with('~');
        glued.then(|| (&token[..cmd.len()], rest))
    })
}

/// Split a redirection into its operator and glued target:
/// `2>>~/log` gives `("2>>", "~/log")`.
fn split_redirection(token: &str) -> (&str, &str) {
    let fd = token.len() - token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '&').len();
    let body = &token[fd..];
    let op = body.len() - body.trim_start_matches(['>', '<', '|']).len();
    token.split_at(fd + op)
}

fn redirection_is_bare(token: &str) -> bool {
    let body = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '&');
    body.starts_with('>') && body.trim_start_matches(['>', '|']).is_empty()
}

fn precedes_command_word(token: &str) -> bool {
    let segment = [token.to_string(), String::from("_")];
    command_position(&segment) == Some(1)
}

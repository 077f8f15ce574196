//! Shell-like tokenization that keeps quoted substrings whole.
//!
//! Not a shell parser: no escapes, no expansion. It only needs to find word
//! boundaries well enough for path rewriting and target extraction, and must
//! never fail.

/// Split `command` on unquoted whitespace and chain operators.
///
/// A quote (`'` or `"`) opens a span that runs, spaces included, until the
/// same quote character closes it. Quote characters stay in the token. An
/// unterminated quote swallows the rest of the input into one token.
///
/// Unquoted `;`, `|`, `||`, `&`, `&&` and `|&` become tokens of their own
/// even when glued to a word (`ls;rm`). An `&` that belongs to a
/// redirection (`2>&1`, `&>file`) stays in the word.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut open_quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if let Some(q) = open_quote {
            current.push(ch);
            if ch == q {
                open_quote = None;
            }
            continue;
        }

        match ch {
            c if c.is_whitespace() => flush(&mut tokens, &mut current),
            '\'' | '"' => {
                open_quote = Some(ch);
                current.push(ch);
            }
            ';' => {
                flush(&mut tokens, &mut current);
                tokens.push(";".to_string());
            }
            '|' => {
                flush(&mut tokens, &mut current);
                match chars.peek() {
                    Some('|') | Some('&') => {
                        let next = chars.next().unwrap_or_default();
                        tokens.push(format!("|{next}"));
                    }
                    _ => tokens.push("|".to_string()),
                }
            }
            '&' if current.ends_with('>') || current.ends_with('<') => current.push(ch),
            '&' if chars.peek() == Some(&'>') => {
                flush(&mut tokens, &mut current);
                current.push(ch);
            }
            '&' => {
                flush(&mut tokens, &mut current);
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push("&&".to_string());
                } else {
                    tokens.push("&".to_string());
                }
            }
            _ => current.push(ch),
        }
    }

    flush(&mut tokens, &mut current);
    tokens
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// True when the whole token is a single quoted span: `'*.pdf'`, `"a b"`.
pub fn is_fully_quoted(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let first = bytes[0];
    (first == b'\'' || first == b'"')
        && bytes[bytes.len() - 1] == first
        && !token[1..token.len() - 1].contains(first as char)
}

/// Strip one layer of surrounding quotes, if the token is fully quoted.
pub fn unquote(token: &str) -> &str {
    if is_fully_quoted(token) {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// The word the shell would see after quote removal: quote characters that
/// open or close a span are dropped and escaping backslashes are removed
/// (`"my "docs`, `Desk\top`).
pub fn strip_quotes(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut open_quote: Option<char> = None;
    let mut chars = token.chars().peekable();

    while let Some(ch) = chars.next() {
        match (open_quote, ch) {
            (Some(q), c) if c == q => open_quote = None,
            (Some('\''), c) => out.push(c),
            (Some(_), '\\') => match chars.peek() {
                Some(&next) if matches!(next, '$' | '`' | '"' | '\\') => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push('\\'),
            },
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            (Some(_), c) => out.push(c),
            (None, '\'' | '"') => open_quote = Some(ch),
            (None, c) => out.push(c),
        }
    }
    out
}

/// Tokens that chain or pipe commands.
pub fn is_chain_operator(token: &str) -> bool {
    matches!(token, "|" | "||" | "&&" | ";" | "&" | "|&")
}

/// Redirection tokens, either bare (`>`, `2>>`) or glued to their target
/// (`>out.txt`, `2>/dev/null`, `2>&1`).
pub fn is_redirection(token: &str) -> bool {
    let rest = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '&');
    rest.starts_with('>') || rest.starts_with('<')
}

/// Operators of either kind; the normalizer never rewrites these.
pub fn is_operator(token: &str) -> bool {
    is_chain_operator(token) || is_redirection(token)
}

/// Split a token stream into command segments at chain operators.
pub fn segments(tokens: &[String]) -> Vec<&[String]> {
    tokens
        .split(|t| is_chain_operator(t))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Like [`segments`], with each segment paired with the chain operator in
/// front of it (`None` for the first).
pub fn chained_segments(tokens: &[String]) -> Vec<(Option<&str>, &[String])> {
    let mut out = Vec::new();
    let mut op = None;
    let mut start = 0;

    for (i, token) in tokens.iter().enumerate() {
        if is_chain_operator(token) {
            if i > start {
                out.push((op, &tokens[start..i]));
            }
            op = Some(token.as_str());
            start = i + 1;
        }
    }
    if start < tokens.len() {
        out.push((op, &tokens[start..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("ls  -la\tDesktop"), vec!["ls", "-la", "Desktop"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn keeps_quoted_spans_whole() {
        assert_eq!(
            tokenize(r#"find . -name "*.pdf" -path '*/my docs/*'"#),
            vec!["find", ".", "-name", "\"*.pdf\"", "-path", "'*/my docs/*'"]
        );
    }

    #[test]
    fn quote_inside_word() {
        assert_eq!(
            tokenize(r#"grep --include="*.rs" foo"#),
            vec!["grep", "--include=\"*.rs\"", "foo"]
        );
    }

    #[test]
    fn unterminated_quote_takes_the_rest() {
        assert_eq!(
            tokenize("echo 'hello world | wc"),
            vec!["echo", "'hello world | wc"]
        );
    }

    #[test]
    fn glued_operators_split() {
        assert_eq!(tokenize("ls;rm x"), vec!["ls", ";", "rm", "x"]);
        assert_eq!(tokenize("a&&b||c"), vec!["a", "&&", "b", "||", "c"]);
        assert_eq!(tokenize("ls|wc -l"), vec!["ls", "|", "wc", "-l"]);
        assert_eq!(tokenize("run 2>&1 &"), vec!["run", "2>&1", "&"]);
        assert_eq!(tokenize("run &>out.log"), vec!["run", "&>out.log"]);
        assert_eq!(tokenize("echo 'a;b|c'"), vec!["echo", "'a;b|c'"]);
    }

    #[test]
    fn fully_quoted_detection() {
        assert!(is_fully_quoted("'*/documents/*'"));
        assert!(is_fully_quoted("\"a b\""));
        assert!(!is_fully_quoted("'a'b'"));
        assert!(!is_fully_quoted("--name='x'"));
        assert!(!is_fully_quoted("'"));
        assert_eq!(unquote("'x y'"), "x y");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn operator_classification() {
        for op in ["|", "&&", "||", ";", ">", ">>", "2>", "2>&1", "&>", "<", ">out.txt"] {
            assert!(is_operator(op), "{op} should be an operator");
        }
        for word in ["ls", "-la", "file>", "a|b"] {
            assert!(!is_operator(word), "{word} should not be an operator");
        }
    }

    #[test]
    fn segments_split_on_chains() {
        let tokens = tokenize("ls Desktop | wc -l && echo done");
        let segs = segments(&tokens);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0], ["ls", "Desktop"]);
        assert_eq!(segs[2], ["echo", "done"]);
    }

    #[test]
    fn quote_removal_matches_the_shell() {
        assert_eq!(strip_quotes("'x y'"), "x y");
        assert_eq!(strip_quotes(r#""/home/user/Desktop"/a"#), "/home/user/Desktop/a");
        assert_eq!(strip_quotes(r"/home/user/Desk\top/a"), "/home/user/Desktop/a");
        assert_eq!(strip_quotes(r#"'it"s'"#), "it\"s");
        assert_eq!(strip_quotes(r"'a\b'"), r"a\b");
        assert_eq!(strip_quotes("plain"), "plain");
    }

    #[test]
    fn chained_segments_keep_their_operator() {
        let tokens = tokenize("find . -name x | xargs rm && cd ~");
        let chain = chained_segments(&tokens);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].0, None);
        assert_eq!(chain[1], (Some("|"), &tokens[5..7]));
        assert_eq!(chain[2].0, Some("&&"));
        assert_eq!(chain[2].1, ["cd", "~"]);
    }
}

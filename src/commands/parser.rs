//! Command line parsing for message content
//!
//! `!echo hello "big world"` parses to the command `echo` with arguments
//! `["hello", "big world"]` and raw arguments `hello "big world"`.

/// A parsed command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Command name as typed
    pub name: String,
    /// Whitespace separated arguments, with double quotes grouping
    pub args: Vec<String>,
    /// Everything after the command name, trimmed
    pub raw_args: String,
}

/// Parse `content` as a command if it starts with `prefix`
pub fn parse(content: &str, prefix: &str) -> Option<Invocation> {
    if prefix.is_empty() {
        return None;
    }
    let rest = content.trim_start().strip_prefix(prefix)?;

    // The name must follow the prefix directly: "! ping" is not a command
    if rest.starts_with(char::is_whitespace) {
        return None;
    }

    let (name, raw_args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }

    Some(Invocation {
        name: name.to_string(),
        args: tokenize(raw_args),
        raw_args: raw_args.to_string(),
    })
}

/// Split on whitespace, keeping double-quoted runs together.
/// An unterminated quote runs to the end of the input.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_command() {
        let invocation = parse("!ping", "!").unwrap();
        assert_eq!(invocation.name, "ping");
        assert!(invocation.args.is_empty());
        assert_eq!(invocation.raw_args, "");
    }

    #[test]
    fn test_arguments() {
        let invocation = parse("!echo hello   world", "!").unwrap();
        assert_eq!(invocation.name, "echo");
        assert_eq!(invocation.args, vec!["hello", "world"]);
        assert_eq!(invocation.raw_args, "hello   world");
    }

    #[test]
    fn test_quoted_arguments() {
        let invocation = parse(r#"!say "big world" again """#, "!").unwrap();
        assert_eq!(invocation.args, vec!["big world", "again", ""]);
    }

    #[test]
    fn test_not_a_command() {
        assert!(parse("hello bot", "!").is_none());
        assert!(parse("! ping", "!").is_none());
        assert!(parse("!", "!").is_none());
        assert!(parse("!ping", "").is_none());
    }

    #[test]
    fn test_multi_character_prefix() {
        let invocation = parse("wave!help me", "wave!").unwrap();
        assert_eq!(invocation.name, "help");
        assert_eq!(invocation.args, vec!["me"]);
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(tokenize(r#"a "b c"#), vec!["a", "b c"]);
    }
}

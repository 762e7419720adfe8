//! Raw dotenv parsing
//!
//! Values are returned unexpanded together with a flag saying whether the
//! caller should run them through [`expand`](super::expand). Single-quoted
//! values are literal; double-quoted and bare values expand.

use super::{Env, ExpandOptions};
use crate::error::{DotEnvError, DotEnvResult, ExpandError};
use std::path::Path;
use thiserror::Error;

/// A single `KEY=value` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub expand: bool,
}

/// Parse dotenv content into ordered entries
pub fn parse(content: &str) -> DotEnvResult<Vec<Entry>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut entries = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line_no = i + 1;
        let line = lines[i].trim();
        i += 1;

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line
            .strip_prefix("export ")
            .map(str::trim_start)
            .unwrap_or(line);

        let (key, raw) = line
            .split_once('=')
            .ok_or(DotEnvError::MissingEquals { line: line_no })?;
        let key = key.trim();
        if !is_valid_key(key) {
            return Err(DotEnvError::InvalidKey {
                line: line_no,
                key: key.to_string(),
            });
        }

        let raw = raw.trim_start();
        let entry = match raw.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let mut body = raw[1..].to_string();
                // Quoted values may span lines
                let close = loop {
                    if let Some(pos) = find_unescaped(&body, quote) {
                        break pos;
                    }
                    if i >= lines.len() {
                        return Err(DotEnvError::UnterminatedQuote { line: line_no });
                    }
                    body.push('\n');
                    body.push_str(lines[i]);
                    i += 1;
                };
                let inner = &body[..close];
                if quote == '\'' {
                    Entry {
                        key: key.to_string(),
                        value: inner.to_string(),
                        expand: false,
                    }
                } else {
                    Entry {
                        key: key.to_string(),
                        value: unescape(inner),
                        expand: true,
                    }
                }
            }
            _ => Entry {
                key: key.to_string(),
                value: strip_inline_comment(raw).trim_end().to_string(),
                expand: true,
            },
        };

        entries.push(entry);
    }

    Ok(entries)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn find_unescaped(s: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' && quote == '"' {
            escaped = true;
            continue;
        }
        if c == quote {
            return Some(idx);
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            // keep `\$` so expansion sees the escape
            Some('$') => out.push_str("\\$"),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn strip_inline_comment(raw: &str) -> &str {
    match raw.find(" #") {
        Some(idx) => &raw[..idx],
        None => raw,
    }
}

/// Failure loading a dotenv file into an environment
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Parse(#[from] DotEnvError),

    #[error("failed to expand {key}: {source}")]
    Expand {
        key: String,
        #[source]
        source: ExpandError,
    },
}

/// Parse `content` and apply each entry to `env` in order
///
/// Each value is expanded against `env` as it stands at that point, so later
/// entries can refer to earlier ones. Returns the applied key/value pairs.
pub fn apply(
    content: &str,
    env: &mut Env,
    options: &ExpandOptions,
) -> Result<Vec<(String, String)>, LoadError> {
    let entries = parse(content)?;
    let mut applied = Vec::with_capacity(entries.len());

    for entry in entries {
        let value = if entry.expand {
            env.expand(&entry.value, options)
                .map_err(|source| LoadError::Expand {
                    key: entry.key.clone(),
                    source,
                })?
        } else {
            entry.value
        };
        env.set(entry.key.clone(), value.clone());
        applied.push((entry.key, value));
    }

    Ok(applied)
}

/// Read a dotenv file and apply it to `env`
pub fn load_file(
    path: &Path,
    env: &mut Env,
    options: &ExpandOptions,
) -> Result<Vec<(String, String)>, LoadError> {
    let content = std::fs::read_to_string(path)?;
    apply(&content, env, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let content = r#"
# comment
A=1
export B = two
C="quoted value"
D='single $A'
E=bare # trailing comment
"#;
        let entries = parse(content).unwrap();
        let pairs: Vec<(&str, &str, bool)> = entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_str(), e.expand))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("A", "1", true),
                ("B", "two", true),
                ("C", "quoted value", true),
                ("D", "single $A", false),
                ("E", "bare", true),
            ]
        );
    }

    #[test]
    fn test_parse_multiline_and_escapes() {
        let content = "CERT=\"line1\nline2\"\nTAB=\"a\\tb\"\n";
        let entries = parse(content).unwrap();
        assert_eq!(entries[0].value, "line1\nline2");
        assert_eq!(entries[1].value, "a\tb");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse("A=1\nnot a pair\n"),
            Err(DotEnvError::MissingEquals { line: 2 })
        );
        assert_eq!(
            parse("1BAD=x"),
            Err(DotEnvError::InvalidKey {
                line: 1,
                key: "1BAD".to_string()
            })
        );
        assert_eq!(
            parse("A=\"open"),
            Err(DotEnvError::UnterminatedQuote { line: 1 })
        );
    }

    #[test]
    fn test_apply_expands_against_running_env() {
        let mut env = Env::new();
        env.set("HOME", "/home/me");

        let applied = apply(
            "DATA=$HOME/data\nCACHE=${DATA}/cache\nRAW='$HOME'\n",
            &mut env,
            &ExpandOptions::literal(),
        )
        .unwrap();

        assert_eq!(applied.len(), 3);
        assert_eq!(env.get("DATA"), Some("/home/me/data"));
        assert_eq!(env.get("CACHE"), Some("/home/me/data/cache"));
        assert_eq!(env.get("RAW"), Some("$HOME"));
    }
}

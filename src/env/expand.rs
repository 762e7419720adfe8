//! Shell-style variable expansion
//!
//! Supported forms:
//! - `$VAR` and `${VAR}`
//! - `${VAR:-default}` / `${VAR-default}` - default when unset (or empty with `:`)
//! - `${VAR:=default}` / `${VAR=default}` - default, also assigned into the env
//! - `${VAR:?message}` / `${VAR?message}` - error when unset (or empty with `:`)
//! - `${VAR:+alt}` / `${VAR+alt}` - alt when set
//! - `$(command)` - command substitution, when enabled
//! - `\$` - a literal dollar sign
//!
//! Unknown variables expand to an empty string.

use super::Env;
use crate::error::{ExpandError, ExpandResult};
use std::process::{Command, Stdio};
use tracing::trace;

/// Options controlling expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Run `$(...)` through the shell
    pub command_substitution: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            command_substitution: true,
        }
    }
}

impl ExpandOptions {
    /// Options with command substitution disabled
    pub fn literal() -> Self {
        ExpandOptions {
            command_substitution: false,
        }
    }
}

/// Expand `input` against `env`
pub fn expand(input: &str, env: &mut Env, options: &ExpandOptions) -> ExpandResult<String> {
    if !input.contains('$') {
        return Ok(input.to_string());
    }

    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' && chars.get(i + 1) == Some(&'$') {
            out.push('$');
            i += 2;
            continue;
        }

        if c != '$' {
            out.push(c);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('{') => {
                let end = find_closing(&chars, i + 2, '{', '}').ok_or(ExpandError::Unterminated(i))?;
                let body: String = chars[i + 2..end].iter().collect();
                out.push_str(&expand_braced(&body, env, options)?);
                i = end + 1;
            }
            Some('(') => {
                let end = find_closing(&chars, i + 2, '(', ')').ok_or(ExpandError::Unterminated(i))?;
                let command: String = chars[i + 2..end].iter().collect();
                if options.command_substitution {
                    out.push_str(&substitute(&command, env)?);
                } else {
                    out.push_str("$(");
                    out.push_str(&command);
                    out.push(')');
                }
                i = end + 1;
            }
            Some(&next) if is_name_start(next) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                out.push_str(env.get(&name).unwrap_or(""));
                i = end;
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }

    Ok(out)
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Index of the delimiter closing the group that starts at `from`
fn find_closing(chars: &[char], from: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 1;
    let mut i = from;
    while i < chars.len() {
        if chars[i] == open {
            depth += 1;
        } else if chars[i] == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn expand_braced(body: &str, env: &mut Env, options: &ExpandOptions) -> ExpandResult<String> {
    let name_len = body
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map(|(idx, _)| idx)
        .unwrap_or(body.len());

    let name = &body[..name_len];
    if name.is_empty() || !name.starts_with(is_name_start) {
        return Err(ExpandError::InvalidSyntax(format!("${{{}}}", body)));
    }

    let rest = &body[name_len..];
    if rest.is_empty() {
        return Ok(env.get(name).unwrap_or("").to_string());
    }

    let (check_empty, op_and_word) = match rest.strip_prefix(':') {
        Some(r) => (true, r),
        None => (false, rest),
    };

    let mut op_chars = op_and_word.chars();
    let op = op_chars
        .next()
        .ok_or_else(|| ExpandError::InvalidSyntax(format!("${{{}}}", body)))?;
    let word = op_chars.as_str();

    let current = env.get(name).map(String::from);
    let is_set = match &current {
        Some(v) => !(check_empty && v.is_empty()),
        None => false,
    };

    match op {
        '-' => {
            if is_set {
                Ok(current.unwrap_or_default())
            } else {
                expand(word, env, options)
            }
        }
        '=' => {
            if is_set {
                Ok(current.unwrap_or_default())
            } else {
                let value = expand(word, env, options)?;
                env.set(name, value.clone());
                Ok(value)
            }
        }
        '?' => {
            if is_set {
                Ok(current.unwrap_or_default())
            } else {
                let message = if word.is_empty() {
                    "parameter null or not set".to_string()
                } else {
                    expand(word, env, options)?
                };
                Err(ExpandError::Required {
                    name: name.to_string(),
                    message,
                })
            }
        }
        '+' => {
            if is_set {
                expand(word, env, options)
            } else {
                Ok(String::new())
            }
        }
        _ => Err(ExpandError::InvalidSyntax(format!("${{{}}}", body))),
    }
}

fn substitute(command: &str, env: &Env) -> ExpandResult<String> {
    trace!(command, "command substitution");

    let (shell, flag) = if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    let output = Command::new(shell)
        .arg(flag)
        .arg(command)
        .envs(env.iter())
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| ExpandError::Substitution {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ExpandError::Substitution {
            command: command.to_string(),
            reason: format!("exit status {}", output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end_matches(['\n', '\r']).to_string())
}

//! Expression evaluation for predicates, templates and cwd/timeout values
//!
//! The engine only depends on the [`Evaluator`] trait; [`DefaultEvaluator`]
//! backs it with the small language in [`expr`].

pub mod expr;

use crate::error::{EvalError, EvalResult};
use crate::value::{Mapping, Value};
use once_cell::sync::Lazy;
use regex::Regex;

/// `${{ expr }}` template placeholders
static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("template regex is valid"));

/// Variables visible to an expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: Mapping,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            vars: Mapping::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Merge another scope on top of this one
    pub fn extend(&mut self, other: &Scope) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.vars
    }
}

/// Evaluates expressions against a scope
pub trait Evaluator: Send + Sync {
    /// Evaluate a single expression
    fn eval(&self, expr: &str, scope: &Scope) -> EvalResult<Value>;

    /// Evaluate a predicate
    ///
    /// A bare `${{ expr }}` wrapper is accepted. Non-bool results are false
    /// unless they are the strings `"true"` or `"1"`.
    fn eval_bool(&self, expr: &str, scope: &Scope) -> EvalResult<bool> {
        let trimmed = expr.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|s| s.strip_suffix("}}"))
            .unwrap_or(trimmed);
        Ok(self.eval(inner, scope)?.is_truthy())
    }

    /// Replace every `${{ expr }}` in `template` with its evaluated value
    fn render(&self, template: &str, scope: &Scope) -> EvalResult<String> {
        render_with(template, |expr| self.eval(expr, scope))
    }
}

/// Render `${{ }}` placeholders using `eval` for each inner expression
pub fn render_with<F>(template: &str, mut eval: F) -> EvalResult<String>
where
    F: FnMut(&str) -> EvalResult<Value>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in TEMPLATE.captures_iter(template) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        out.push_str(&eval(inner.as_str().trim())?.to_string());
        last = whole.end();
    }

    let rest = &template[last..];
    if rest.contains("${{") {
        return Err(EvalError::UnterminatedTemplate);
    }
    out.push_str(rest);

    Ok(out)
}

/// Whether a string contains a `${{ }}` placeholder
pub fn is_template(s: &str) -> bool {
    s.contains("${{")
}

/// The built-in expression language
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn eval(&self, input: &str, scope: &Scope) -> EvalResult<Value> {
        expr::evaluate(input, scope)
    }
}

//! A small expression language for predicates and templates
//!
//! ```text
//! env.CI == "true" && os != "windows"
//! outputs["build"].version || "dev"
//! len(args) > 0 and startsWith(env.BRANCH, "release/")
//! ```
//!
//! `&&`/`||` short-circuit and yield the deciding operand, so `a || "b"`
//! works as a default. Missing identifiers and keys evaluate to null.

use super::Scope;
use crate::error::{EvalError, EvalResult};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("\"{}\"", s),
            Token::Ident(s) => s.clone(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::Dot => ".".into(),
            Token::Comma => ",".into(),
            Token::Not => "!".into(),
            Token::Eq => "==".into(),
            Token::Ne => "!=".into(),
            Token::Lt => "<".into(),
            Token::Le => "<=".into(),
            Token::Gt => ">".into(),
            Token::Ge => ">=".into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
        }
    }
}

fn tokenize(input: &str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| EvalError::UnexpectedToken(text.clone()))?;
            tokens.push(Token::Number(n));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                _ => Token::Ident(word),
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                match chars.get(i) {
                    None => return Err(EvalError::UnterminatedString),
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(&other) => s.push(other),
                            None => return Err(EvalError::UnterminatedString),
                        }
                        i += 2;
                    }
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('!', _) => (Token::Not, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            _ => return Err(EvalError::UnexpectedChar(c, i)),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn from_token(token: &Token) -> Option<BinOp> {
        Some(match token {
            Token::Or => BinOp::Or,
            Token::And => BinOp::And,
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::Ident(word) if word == "in" => BinOp::In,
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Rem,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::In => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> EvalResult<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::UnexpectedToken(t.describe())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> EvalResult<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(op) = self.peek().and_then(BinOp::from_token) {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.parse_expr(prec + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> EvalResult<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> EvalResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let key = match self.next() {
                        Some(Token::Ident(name)) => name,
                        Some(Token::Number(n)) if n.fract() == 0.0 => (n as i64).to_string(),
                        Some(t) => return Err(EvalError::UnexpectedToken(t.describe())),
                        None => return Err(EvalError::UnexpectedEnd),
                    };
                    expr = Expr::Member(Box::new(expr), key);
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr(1)?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let expr = self.parse_expr(1)?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr(1)?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                Some(t) => return Err(EvalError::UnexpectedToken(t.describe())),
                                None => return Err(EvalError::UnexpectedEnd),
                            }
                        }
                    } else {
                        self.pos += 1;
                    }
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Some(t) => Err(EvalError::UnexpectedToken(t.describe())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

/// Parse and evaluate `input` against `scope`
pub fn evaluate(input: &str, scope: &Scope) -> EvalResult<Value> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EvalError::UnexpectedEnd);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(1)?;
    if let Some(extra) = parser.peek() {
        return Err(EvalError::UnexpectedToken(extra.describe()));
    }

    eval(&expr, scope)
}

/// Loose truthiness used inside expressions
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Sequence(_), _) | (Value::Mapping(_), _) => a == b,
        _ => a.to_string() == b.to_string(),
    }
}

fn member(value: Value, key: &str) -> Value {
    match value {
        Value::Mapping(mut map) => map.shift_remove(key).unwrap_or_default(),
        Value::Sequence(mut seq) => match key.parse::<usize>() {
            Ok(idx) if idx < seq.len() => seq.swap_remove(idx),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

fn eval(expr: &Expr, scope: &Scope) -> EvalResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => Ok(scope.get(name).cloned().unwrap_or_default()),
        Expr::Member(target, key) => Ok(member(eval(target, scope)?, key)),
        Expr::Index(target, index) => {
            let target = eval(target, scope)?;
            let key = match eval(index, scope)? {
                Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => (n as usize).to_string(),
                Value::String(s) => s,
                other => {
                    return Err(EvalError::Type(format!(
                        "cannot index with {}",
                        other.type_name()
                    )))
                }
            };
            Ok(member(target, &key))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::Neg(inner) => match as_number(&eval(inner, scope)?) {
            Some(n) => Ok(Value::Number(-n)),
            None => Err(EvalError::Type("cannot negate a non-number".to_string())),
        },
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, scope),
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<EvalResult<Vec<Value>>>()?;
            call(name, &args)
        }
    }
}

fn eval_binary(op: BinOp, left: &Expr, right: &Expr, scope: &Scope) -> EvalResult<Value> {
    let lhs = eval(left, scope)?;

    match op {
        BinOp::And => {
            if !truthy(&lhs) {
                return Ok(lhs);
            }
            return eval(right, scope);
        }
        BinOp::Or => {
            if truthy(&lhs) {
                return Ok(lhs);
            }
            return eval(right, scope);
        }
        _ => {}
    }

    let rhs = eval(right, scope)?;

    let value = match op {
        BinOp::Eq => Value::Bool(loose_eq(&lhs, &rhs)),
        BinOp::Ne => Value::Bool(!loose_eq(&lhs, &rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (as_number(&lhs), as_number(&rhs)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(lhs.to_string().cmp(&rhs.to_string())),
            };
            let result = match ordering {
                Some(o) => match op {
                    BinOp::Lt => o.is_lt(),
                    BinOp::Le => o.is_le(),
                    BinOp::Gt => o.is_gt(),
                    _ => o.is_ge(),
                },
                None => false,
            };
            Value::Bool(result)
        }
        BinOp::In => Value::Bool(contains(&rhs, &lhs)),
        BinOp::Add => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ => Value::String(format!("{}{}", lhs, rhs)),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let (a, b) = match (as_number(&lhs), as_number(&rhs)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EvalError::Type(format!(
                        "arithmetic on {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )))
                }
            };
            Value::Number(match op {
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => a % b,
            })
        }
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled above"),
    };

    Ok(value)
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Sequence(seq) => seq.iter().any(|v| loose_eq(v, needle)),
        Value::Mapping(map) => map.contains_key(&needle.to_string()),
        Value::String(s) => s.contains(&needle.to_string()),
        _ => false,
    }
}

fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
    let arity = |n: usize| -> EvalResult<()> {
        if args.len() != n {
            return Err(EvalError::Type(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )));
        }
        Ok(())
    };

    match name {
        "len" => {
            arity(1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Sequence(seq) => seq.len(),
                Value::Mapping(map) => map.len(),
                Value::Null => 0,
                other => {
                    return Err(EvalError::Type(format!(
                        "len() of {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::from(n))
        }
        "contains" => {
            arity(2)?;
            Ok(Value::Bool(contains(&args[0], &args[1])))
        }
        "startsWith" => {
            arity(2)?;
            Ok(Value::Bool(
                args[0].to_string().starts_with(&args[1].to_string()),
            ))
        }
        "endsWith" => {
            arity(2)?;
            Ok(Value::Bool(args[0].to_string().ends_with(&args[1].to_string())))
        }
        "lower" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string().to_lowercase()))
        }
        "upper" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string().to_uppercase()))
        }
        "trim" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string().trim().to_string()))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut env = crate::value::Mapping::new();
        env.insert("CI".into(), Value::from("true"));
        env.insert("BRANCH".into(), Value::from("release/1.0"));

        let mut build = crate::value::Mapping::new();
        build.insert("version".into(), Value::from("1.2.3"));
        let mut outputs = crate::value::Mapping::new();
        outputs.insert("build".into(), Value::Mapping(build));

        let mut scope = Scope::new();
        scope.insert("env", Value::Mapping(env));
        scope.insert("outputs", Value::Mapping(outputs));
        scope.insert("os", Value::from("linux"));
        scope.insert("args", Value::from(vec!["a".to_string(), "b".to_string()]));
        scope
    }

    fn run(expr: &str) -> Value {
        evaluate(expr, &scope()).unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(run("true"), Value::Bool(true));
        assert_eq!(run("false"), Value::Bool(false));
        assert_eq!(run("42"), Value::Number(42.0));
        assert_eq!(run("'single'"), Value::from("single"));
        assert_eq!(run("null"), Value::Null);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run(r#"env.CI == "true""#), Value::Bool(true));
        assert_eq!(run(r#"os != "windows""#), Value::Bool(true));
        assert_eq!(run("2 < 10"), Value::Bool(true));
        assert_eq!(run(r#""10" > 9"#), Value::Bool(true));
        assert_eq!(run("len(args) >= 2"), Value::Bool(true));
    }

    #[test]
    fn test_logic_and_precedence() {
        assert_eq!(run(r#"env.CI == "true" && os == "linux""#), Value::Bool(true));
        assert_eq!(run(r#"false || os == "linux" and !false"#), Value::Bool(true));
        assert_eq!(run("not (1 == 1)"), Value::Bool(false));
        assert_eq!(run("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(run("-(2 - 5)"), Value::Number(3.0));
    }

    #[test]
    fn test_or_yields_default() {
        assert_eq!(run(r#"env.MISSING || "dev""#), Value::from("dev"));
        assert_eq!(run("env.MISSING"), Value::Null);
    }

    #[test]
    fn test_member_and_index() {
        assert_eq!(run("outputs.build.version"), Value::from("1.2.3"));
        assert_eq!(run(r#"outputs["build"]["version"]"#), Value::from("1.2.3"));
        assert_eq!(run("args[1]"), Value::from("b"));
        assert_eq!(run("args.0"), Value::from("a"));
        assert_eq!(run("outputs.nope.version"), Value::Null);
    }

    #[test]
    fn test_in_and_functions() {
        assert_eq!(run(r#""a" in args"#), Value::Bool(true));
        assert_eq!(run(r#""build" in outputs"#), Value::Bool(true));
        assert_eq!(run(r#"startsWith(env.BRANCH, "release/")"#), Value::Bool(true));
        assert_eq!(run(r#"endsWith(env.BRANCH, ".0")"#), Value::Bool(true));
        assert_eq!(run(r#"upper(os) + "-" + lower("X")"#), Value::from("LINUX-x"));
        assert_eq!(run(r#"trim("  x ")"#), Value::from("x"));
        assert_eq!(run(r#"contains("haystack", "st")"#), Value::Bool(true));
    }

    #[test]
    fn test_errors() {
        let s = scope();
        assert_eq!(evaluate("", &s), Err(EvalError::UnexpectedEnd));
        assert_eq!(evaluate("1 +", &s), Err(EvalError::UnexpectedEnd));
        assert_eq!(evaluate("\"open", &s), Err(EvalError::UnterminatedString));
        assert_eq!(evaluate("a # b", &s), Err(EvalError::UnexpectedChar('#', 2)));
        assert_eq!(
            evaluate("nope(1)", &s),
            Err(EvalError::UnknownFunction("nope".to_string()))
        );
        assert_eq!(
            evaluate("1 2", &s),
            Err(EvalError::UnexpectedToken("2".to_string()))
        );
    }
}

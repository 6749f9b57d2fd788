//! Arithmetic over column values: `+ - * /`, unary minus, parentheses, numeric
//! literals and column references (`[Unit Price]` or a bare name such as `qty`).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn precedence(&self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
        }
    }

    fn symbol(&self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Column(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected `{0}` at position {1}")]
    Unexpected(String, usize),
    #[error("unterminated column reference starting at position {0}")]
    Unterminated(usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '[' | ']')
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                out.push((Token::Op(c), i));
                i += 1;
            }
            '(' => {
                out.push((Token::Open, i));
                i += 1;
            }
            ')' => {
                out.push((Token::Close, i));
                i += 1;
            }
            '[' => {
                let start = i;
                let close = chars[i + 1..]
                    .iter()
                    .position(|c| *c == ']')
                    .ok_or(ExprError::Unterminated(start))?;
                let name: String = chars[i + 1..i + 1 + close].iter().collect();
                out.push((Token::Ident(name.trim().to_string()), start));
                i += close + 2;
            }
            ']' => return Err(ExprError::Unexpected("]".into(), i)),
            _ => {
                let start = i;
                while i < chars.len() && !is_delimiter(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.parse::<f64>() {
                    Ok(n) if n.is_finite() => out.push((Token::Number(n), start)),
                    _ => out.push((Token::Ident(word), start)),
                }
            }
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinOp::Add } else { BinOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { BinOp::Mul } else { BinOp::Div };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some((Token::Op('-'), _)) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some((Token::Op('+'), _)) => self.factor(),
            Some((Token::Number(n), _)) => Ok(Expr::Number(n)),
            Some((Token::Ident(name), at)) => {
                if name.is_empty() {
                    return Err(ExprError::Unexpected("[]".into(), at));
                }
                Ok(Expr::Column(name))
            }
            Some((Token::Open, _)) => {
                let inner = self.expr()?;
                match self.next() {
                    Some((Token::Close, _)) => Ok(inner),
                    Some((t, at)) => Err(ExprError::Unexpected(render_token(&t), at)),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some((t, at)) => Err(ExprError::Unexpected(render_token(&t), at)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn render_token(t: &Token) -> String {
    match t {
        Token::Number(n) => n.to_string(),
        Token::Ident(s) => s.clone(),
        Token::Op(c) => c.to_string(),
        Token::Open => "(".into(),
        Token::Close => ")".into(),
    }
}

impl Expr {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let src = src.trim();
        let src = src.strip_prefix('=').unwrap_or(src);
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some((t, at)) = parser.next() {
            return Err(ExprError::Unexpected(render_token(&t), at));
        }
        Ok(expr)
    }

    /// Evaluates with `lookup` supplying column values. Any missing operand,
    /// division by zero or non-finite result gives `None`.
    pub fn eval(&self, lookup: &impl Fn(&str) -> Option<f64>) -> Option<f64> {
        let out = match self {
            Expr::Number(n) => *n,
            Expr::Column(name) => lookup(name)?,
            Expr::Neg(inner) => -inner.eval(lookup)?,
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.eval(lookup)?;
                let b = rhs.eval(lookup)?;
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div if b == 0.0 => return None,
                    BinOp::Div => a / b,
                }
            }
        };
        out.is_finite().then_some(out)
    }

    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_columns(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
        }
    }

    pub fn rewrite_columns<E>(
        &mut self,
        f: &mut impl FnMut(&str) -> Result<String, E>,
    ) -> Result<(), E> {
        match self {
            Expr::Number(_) => Ok(()),
            Expr::Column(name) => {
                *name = f(name)?;
                Ok(())
            }
            Expr::Neg(inner) => inner.rewrite_columns(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.rewrite_columns(f)?;
                rhs.rewrite_columns(f)
            }
        }
    }

    fn write(&self, out: &mut String, min_prec: u8) {
        match self {
            Expr::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    out.push_str(&format!("{}", *n as i64));
                } else {
                    out.push_str(&n.to_string());
                }
            }
            Expr::Column(name) => {
                out.push('[');
                out.push_str(name);
                out.push(']');
            }
            Expr::Neg(inner) => {
                out.push('-');
                inner.write(out, 3);
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let wrap = prec < min_prec;
                if wrap {
                    out.push('(');
                }
                lhs.write(out, prec);
                out.push(' ');
                out.push(op.symbol());
                out.push(' ');
                rhs.write(out, prec + 1);
                if wrap {
                    out.push(')');
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write(&mut out, 0);
        f.write_str(&out)
    }
}

/// An `add-column` formula, parsed when the plan is read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression(pub Expr);

impl TryFrom<String> for Expression {
    type Error = ExprError;

    fn try_from(src: String) -> Result<Self, Self::Error> {
        Expr::parse(&src).map(Expression)
    }
}

impl From<Expression> for String {
    fn from(e: Expression) -> Self {
        e.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, a: Option<f64>, b: Option<f64>) -> Option<f64> {
        let expr = Expr::parse(src).unwrap();
        expr.eval(&|name: &str| match name {
            "a" | "单价" => a,
            "b" | "Unit Cost" => b,
            _ => None,
        })
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(eval("a + b * 2", Some(1.0), Some(3.0)), Some(7.0));
        assert_eq!(eval("(a + b) * 2", Some(1.0), Some(3.0)), Some(8.0));
        assert_eq!(eval("-a - -b", Some(1.0), Some(3.0)), Some(2.0));
        assert_eq!(eval("a - b - 1", Some(10.0), Some(3.0)), Some(6.0));
    }

    #[test]
    fn bracketed_and_unicode_references() {
        assert_eq!(eval("=[单价] * [Unit Cost]", Some(2.0), Some(4.5)), Some(9.0));
        assert_eq!(eval("单价/2", Some(3.0), None), Some(1.5));
    }

    #[test]
    fn division_by_zero_and_missing_operands_are_none() {
        assert_eq!(eval("a / b", Some(1.0), Some(0.0)), None);
        assert_eq!(eval("a + b", Some(1.0), None), None);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(Expr::parse("a +"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(Expr::parse("(a"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(Expr::parse("[a"), Err(ExprError::Unterminated(0))));
        assert!(matches!(Expr::parse("a b"), Err(ExprError::Unexpected(..))));
        assert!(matches!(Expr::parse("  "), Err(ExprError::Empty)));
    }

    #[test]
    fn rendering_keeps_meaning() {
        let expr = Expr::parse("a - (b - 1) * 2").unwrap();
        assert_eq!(expr.to_string(), "[a] - ([b] - 1) * 2");
        assert_eq!(Expr::parse(&expr.to_string()).unwrap(), expr);
        assert_eq!(expr.columns(), vec!["a", "b"]);
    }
}

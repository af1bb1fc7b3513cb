//! A small expression language for filter and stateless-transformation
//! configs (§4.4). Expressions are compiled once per pipeline start and
//! reused per record; the grammar is deliberately minimal — field paths,
//! literals, comparisons, boolean connectives, and arithmetic.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("expression compile error: {0}")]
    Compile(String),

    #[error("expression eval error: {0}")]
    Eval(String),
}

type Result<T> = std::result::Result<T, ExprError>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Field(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

/// A compiled expression, ready for repeated per-record evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    root: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ExprError::Compile(format!(
                "unexpected trailing tokens in '{source}'"
            )));
        }
        Ok(Self { root })
    }

    pub fn eval(&self, payload: &Value) -> Result<Value> {
        eval_expr(&self.root, payload)
    }

    /// Evaluates and requires a boolean result, for filter expressions.
    pub fn eval_bool(&self, payload: &Value) -> Result<bool> {
        match self.eval(payload)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::Eval(format!(
                "expected boolean result, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Bool(bool),
    Op(&'static str),
    LParen,
    RParen,
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExprError::Compile("unterminated string literal".to_string()));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Op("!"));
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(">="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op("<"));
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(">"));
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            '+' => {
                tokens.push(Token::Op("+"));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op("-"));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op("*"));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op("/"));
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num = num_str
                    .parse()
                    .map_err(|_| ExprError::Compile(format!("invalid number '{num_str}'")))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => return Err(ExprError::Compile(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Op("||"))) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(Box::new(left), BinOp::Or, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::Op("&&"))) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary(Box::new(left), BinOp::And, Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => Some(BinOp::Eq),
            Some(Token::Op("!=")) => Some(BinOp::Ne),
            Some(Token::Op("<")) => Some(BinOp::Lt),
            Some(Token::Op("<=")) => Some(BinOp::Le),
            Some(Token::Op(">")) => Some(BinOp::Gt),
            Some(Token::Op(">=")) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Binary(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("+")) => Some(BinOp::Add),
                Some(Token::Op("-")) => Some(BinOp::Sub),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.advance();
                    let right = self.parse_multiplicative()?;
                    left = Expr::Binary(Box::new(left), op, Box::new(right));
                }
                None => break,
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("*")) => Some(BinOp::Mul),
                Some(Token::Op("/")) => Some(BinOp::Div),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Expr::Binary(Box::new(left), op, Box::new(right));
                }
                None => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Op("-")) => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(serde_json::json!(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::Ident(name)) => Ok(Expr::Field(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Compile("expected ')'".to_string())),
                }
            }
            other => Err(ExprError::Compile(format!("unexpected token {other:?}"))),
        }
    }
}

fn eval_expr(expr: &Expr, payload: &Value) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Field(path) => Ok(resolve_path(payload, path).cloned().unwrap_or(Value::Null)),
        Expr::Not(inner) => {
            let v = eval_expr(inner, payload)?;
            let b = v
                .as_bool()
                .ok_or_else(|| ExprError::Eval(format!("! applied to non-boolean {v}")))?;
            Ok(Value::Bool(!b))
        }
        Expr::Neg(inner) => {
            let v = eval_expr(inner, payload)?;
            let n = v
                .as_f64()
                .ok_or_else(|| ExprError::Eval(format!("unary - applied to non-number {v}")))?;
            Ok(serde_json::json!(-n))
        }
        Expr::Binary(lhs, op, rhs) => eval_binary(lhs, *op, rhs, payload),
    }
}

fn eval_binary(lhs: &Expr, op: BinOp, rhs: &Expr, payload: &Value) -> Result<Value> {
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = eval_expr(lhs, payload)?
            .as_bool()
            .ok_or_else(|| ExprError::Eval("boolean operand expected".to_string()))?;
        return match op {
            BinOp::And if !l => Ok(Value::Bool(false)),
            BinOp::Or if l => Ok(Value::Bool(true)),
            _ => {
                let r = eval_expr(rhs, payload)?
                    .as_bool()
                    .ok_or_else(|| ExprError::Eval("boolean operand expected".to_string()))?;
                Ok(Value::Bool(r))
            }
        };
    }

    let l = eval_expr(lhs, payload)?;
    let r = eval_expr(rhs, payload)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (ln, rn) = (numeric(&l)?, numeric(&r)?);
            Ok(Value::Bool(match op {
                BinOp::Lt => ln < rn,
                BinOp::Le => ln <= rn,
                BinOp::Gt => ln > rn,
                BinOp::Ge => ln >= rn,
                _ => unreachable!(),
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let (ln, rn) = (numeric(&l)?, numeric(&r)?);
            let result = match op {
                BinOp::Add => ln + rn,
                BinOp::Sub => ln - rn,
                BinOp::Mul => ln * rn,
                BinOp::Div => {
                    if rn == 0.0 {
                        return Err(ExprError::Eval("division by zero".to_string()));
                    }
                    ln / rn
                }
                _ => unreachable!(),
            };
            Ok(serde_json::json!(result))
        }
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

fn numeric(v: &Value) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| ExprError::Eval(format!("expected number, got {v}")))
}

fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_path_resolves() {
        let e = CompiledExpr::compile("user.age").unwrap();
        let v = e.eval(&json!({"user": {"age": 30}})).unwrap();
        assert_eq!(v, json!(30.0));
    }

    #[test]
    fn comparison_and_boolean_connectives() {
        let e = CompiledExpr::compile("age >= 18 && active == true").unwrap();
        assert!(e
            .eval_bool(&json!({"age": 20, "active": true}))
            .unwrap());
        assert!(!e
            .eval_bool(&json!({"age": 10, "active": true}))
            .unwrap());
    }

    #[test]
    fn arithmetic_expression() {
        let e = CompiledExpr::compile("price * quantity").unwrap();
        let v = e.eval(&json!({"price": 3, "quantity": 4})).unwrap();
        assert_eq!(v, json!(12.0));
    }

    #[test]
    fn non_boolean_filter_result_is_rejected() {
        let e = CompiledExpr::compile("price * quantity").unwrap();
        assert!(e.eval_bool(&json!({"price": 3, "quantity": 4})).is_err());
    }

    #[test]
    fn missing_field_resolves_to_null_not_error() {
        let e = CompiledExpr::compile("missing == true").unwrap();
        assert!(!e.eval_bool(&json!({})).unwrap());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(CompiledExpr::compile("age >=").is_err());
    }

    #[test]
    fn string_equality() {
        let e = CompiledExpr::compile("status == \"active\"").unwrap();
        assert!(e.eval_bool(&json!({"status": "active"})).unwrap());
    }
}

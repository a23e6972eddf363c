//! A small text parser for symbolic expressions.
//!
//! Intended for exercising the analyses and transformations directly:
//! bare identifiers are variables, `$`-prefixed identifiers are parameters.
//! `+`, `-` and `*` associate to the left; `-` also acts as negation.
//! `#` starts a line comment.

use crate::inference::expr::{Expr, ExprRef, OpKind};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Constant(u64),
    Variable(String),
    Parameter(String),
    Times,
    Minus,
    Plus,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Tok>, String> {
    let bytes = input.as_bytes();
    let mut toks = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let b = bytes[pos];
        if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if b == b'#' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        if b.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let value: u64 = input[start..pos]
                .parse()
                .map_err(|_| format!("invalid constant '{}'", &input[start..pos]))?;
            toks.push(Tok::Constant(value));
            continue;
        }
        if b.is_ascii_alphabetic() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_alphanumeric() {
                pos += 1;
            }
            toks.push(Tok::Variable(input[start..pos].to_string()));
            continue;
        }
        if b == b'$' {
            pos += 1;
            let start = pos;
            if pos >= bytes.len() || !bytes[pos].is_ascii_alphabetic() {
                return Err("invalid parameter name".to_string());
            }
            while pos < bytes.len() && bytes[pos].is_ascii_alphanumeric() {
                pos += 1;
            }
            toks.push(Tok::Parameter(input[start..pos].to_string()));
            continue;
        }
        let tok = match b {
            b'*' => Tok::Times,
            b'-' => Tok::Minus,
            b'+' => Tok::Plus,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            other => return Err(format!("invalid character '{}'", other as char)),
        };
        toks.push(tok);
        pos += 1;
    }

    Ok(toks)
}

struct TokStream {
    toks: Vec<Tok>,
    pos: usize,
}

impl TokStream {
    fn cur(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_term(&mut self) -> Result<ExprRef, String> {
        let mut result = self.parse_product()?;
        while matches!(self.cur(), Some(Tok::Plus) | Some(Tok::Minus)) {
            let op = if self.cur() == Some(&Tok::Plus) {
                OpKind::Plus
            } else {
                OpKind::Minus
            };
            self.next();
            let rhs = self.parse_product()?;
            result = Expr::bin(op, result, rhs);
        }
        Ok(result)
    }

    fn parse_product(&mut self) -> Result<ExprRef, String> {
        let mut result = self.parse_atom()?;
        while self.cur() == Some(&Tok::Times) {
            self.next();
            let rhs = self.parse_atom()?;
            result = Expr::bin(OpKind::Times, result, rhs);
        }
        Ok(result)
    }

    fn parse_atom(&mut self) -> Result<ExprRef, String> {
        match self.next() {
            Some(Tok::Minus) => Ok(Expr::neg(self.parse_atom()?)),
            Some(Tok::Variable(n)) => Ok(Expr::var(n)),
            Some(Tok::Parameter(n)) => Ok(Expr::param(n)),
            Some(Tok::Constant(c)) => Ok(Expr::constant(c)),
            Some(Tok::LParen) => {
                let e = self.parse_term()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(e),
                    _ => Err("expected ')'".to_string()),
                }
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

/// Parse a symbolic expression from text.
pub fn parse_expr(input: &str) -> Result<ExprRef, String> {
    let toks = tokenize(input)?;
    if toks.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut stream = TokStream { toks, pos: 0 };
    let result = stream.parse_term()?;
    if stream.cur().is_some() {
        return Err("dangling input after expression".to_string());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms() {
        assert_eq!(parse_expr("42").unwrap().to_string(), "42");
        assert_eq!(parse_expr("i").unwrap().to_string(), "i");
        assert_eq!(parse_expr("$N").unwrap().to_string(), "$N");
        assert_eq!(parse_expr("-i").unwrap().to_string(), "(-i)");
    }

    #[test]
    fn test_left_association() {
        assert_eq!(parse_expr("a - b - c").unwrap().to_string(), "((a-b)-c)");
        assert_eq!(parse_expr("a * b * c").unwrap().to_string(), "((a*b)*c)");
    }

    #[test]
    fn test_precedence() {
        assert_eq!(parse_expr("a + b * c").unwrap().to_string(), "(a+(b*c))");
        assert_eq!(parse_expr("(a + b) * c").unwrap().to_string(), "((a+b)*c)");
    }

    #[test]
    fn test_comments() {
        let e = parse_expr("a + # trailing\n b").unwrap();
        assert_eq!(e.to_string(), "(a+b)");
    }

    #[test]
    fn test_errors() {
        assert!(parse_expr("").is_err());
        assert!(parse_expr("a +").is_err());
        assert!(parse_expr("(a").is_err());
        assert!(parse_expr("a b").is_err());
        assert!(parse_expr("$1").is_err());
    }
}

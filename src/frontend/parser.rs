//! Parser for the TC kernel language.
//!
//! Kernel definitions, parameter lists and statements are parsed by
//! recursive descent; expressions use precedence climbing over the shared
//! operator tables.

use crate::frontend::ast::*;
use crate::frontend::lexer::{shared_data, Lexer};
use crate::frontend::token::{Token, TokenKind};
use crate::utils::errors::{CompileResult, ParseError};

/// A parser over one source buffer.
pub struct Parser {
    lexer: Lexer,
}

/// Parse all kernel definitions in a source buffer.
pub fn parse_defs(source: &str, filename: &str) -> CompileResult<Vec<Def>> {
    let mut parser = Parser::new(source, filename)?;
    let mut defs = Vec::new();
    while !parser.at_eof() {
        defs.push(parser.parse_def()?);
    }
    Ok(defs)
}

impl Parser {
    /// Create a parser for the given source.
    pub fn new(source: &str, filename: &str) -> CompileResult<Self> {
        Ok(Self {
            lexer: Lexer::new(source, filename)?,
        })
    }

    /// True once the token stream is exhausted.
    pub fn at_eof(&self) -> bool {
        self.lexer.cur().is_eof()
    }

    fn cur(&self) -> &Token {
        self.lexer.cur()
    }

    fn next(&mut self) -> CompileResult<Token> {
        Ok(self.lexer.next()?)
    }

    fn next_if(&mut self, kind: TokenKind) -> CompileResult<bool> {
        Ok(self.lexer.next_if(kind)?)
    }

    fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
        if self.cur().kind != kind {
            return Err(ParseError::expected(
                kind.name(),
                format!("{} '{}'", self.cur().kind.name(), self.cur().lexeme),
                self.cur().range.clone(),
            )
            .into());
        }
        self.next()
    }

    fn expect_ident(&mut self) -> CompileResult<Ident> {
        let t = self.expect(TokenKind::Ident)?;
        Ok(Ident::new(t.lexeme, t.range))
    }

    /// Parse a single `def`.
    pub fn parse_def(&mut self) -> CompileResult<Def> {
        let start = self.expect(TokenKind::Def)?.range;
        let name = self.expect_ident()?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_param_list(false)?;
        self.expect(TokenKind::RParen)?;

        self.expect(TokenKind::Arrow)?;
        self.expect(TokenKind::LParen)?;
        let returns = self.parse_param_list(true)?;
        self.expect(TokenKind::RParen)?;

        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while self.cur().kind != TokenKind::RBrace {
            statements.push(self.parse_comprehension()?);
        }
        let end = self.expect(TokenKind::RBrace)?.range;

        Ok(Def {
            name,
            params,
            returns,
            statements,
            range: start.merge(&end),
        })
    }

    fn parse_param_list(&mut self, allow_inferred: bool) -> CompileResult<Vec<Param>> {
        let mut params = Vec::new();
        if self.cur().kind == TokenKind::RParen {
            return Ok(params);
        }
        loop {
            params.push(self.parse_param(allow_inferred)?);
            if !self.next_if(TokenKind::Comma)? {
                break;
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self, allow_inferred: bool) -> CompileResult<Param> {
        if self.cur().kind.is_scalar_type() {
            let tensor_type = self.parse_tensor_type()?;
            let ident = self.expect_ident()?;
            let range = tensor_type.range.merge(&ident.range);
            Ok(Param {
                ident,
                tensor_type: Some(tensor_type),
                range,
            })
        } else if allow_inferred {
            let ident = self.expect_ident()?;
            let range = ident.range.clone();
            Ok(Param {
                ident,
                tensor_type: None,
                range,
            })
        } else {
            Err(ParseError::expected(
                "scalar type",
                format!("{} '{}'", self.cur().kind.name(), self.cur().lexeme),
                self.cur().range.clone(),
            )
            .into())
        }
    }

    fn scalar_kind_from_token(kind: TokenKind) -> Option<ScalarKind> {
        use TokenKind::*;
        Some(match kind {
            Bool => ScalarKind::Bool,
            UInt8 => ScalarKind::UInt8,
            UInt16 => ScalarKind::UInt16,
            UInt32 => ScalarKind::UInt32,
            UInt64 => ScalarKind::UInt64,
            Int8 => ScalarKind::Int8,
            Int16 => ScalarKind::Int16,
            Int32 => ScalarKind::Int32,
            Int64 => ScalarKind::Int64,
            SizeT => ScalarKind::SizeT,
            Float16 => ScalarKind::Float16,
            Float32 | Float => ScalarKind::Float32,
            Float64 | Double => ScalarKind::Float64,
            _ => return None,
        })
    }

    fn parse_tensor_type(&mut self) -> CompileResult<TensorType> {
        let tok = self.next()?;
        let scalar = match Self::scalar_kind_from_token(tok.kind) {
            Some(s) => s,
            None => {
                return Err(ParseError::expected(
                    "scalar type",
                    format!("{} '{}'", tok.kind.name(), tok.lexeme),
                    tok.range,
                )
                .into())
            }
        };
        let mut range = tok.range;
        let mut dims = Vec::new();
        if self.next_if(TokenKind::LParen)? {
            if self.cur().kind != TokenKind::RParen {
                loop {
                    dims.push(self.parse_dim()?);
                    if !self.next_if(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            range = range.merge(&self.expect(TokenKind::RParen)?.range);
        }
        Ok(TensorType {
            scalar,
            dims,
            range,
        })
    }

    fn parse_dim(&mut self) -> CompileResult<DimExpr> {
        match self.cur().kind {
            TokenKind::Ident => {
                let ident = self.expect_ident()?;
                Ok(DimExpr::Ident(ident))
            }
            TokenKind::Number => {
                let tok = self.next()?;
                let value: i64 = tok.num_value_str().parse().map_err(|_| {
                    ParseError::new(
                        format!("invalid tensor dimension '{}'", tok.lexeme),
                        tok.range.clone(),
                    )
                })?;
                Ok(DimExpr::Const {
                    value,
                    range: tok.range,
                })
            }
            _ => Err(ParseError::expected(
                "tensor dimension",
                format!("{} '{}'", self.cur().kind.name(), self.cur().lexeme),
                self.cur().range.clone(),
            )
            .into()),
        }
    }

    fn parse_assignment_op(&mut self) -> CompileResult<AssignOp> {
        use TokenKind::*;
        let op = match self.cur().kind {
            Assign => AssignOp::Assign,
            PlusEq => AssignOp::PlusEq,
            TimesEq => AssignOp::TimesEq,
            MinEq => AssignOp::MinEq,
            MaxEq => AssignOp::MaxEq,
            PlusEqB => AssignOp::PlusEqB,
            TimesEqB => AssignOp::TimesEqB,
            MinEqB => AssignOp::MinEqB,
            MaxEqB => AssignOp::MaxEqB,
            _ => {
                return Err(ParseError::expected(
                    "assignment operator",
                    format!("{} '{}'", self.cur().kind.name(), self.cur().lexeme),
                    self.cur().range.clone(),
                )
                .into())
            }
        };
        self.next()?;
        Ok(op)
    }

    /// Parse one comprehension: `lhs(i, ...) op rhs [where clauses] [<=> eq]`.
    pub fn parse_comprehension(&mut self) -> CompileResult<Comprehension> {
        let ident = self.expect_ident()?;
        let start = ident.range.clone();

        let mut indices = Vec::new();
        if self.next_if(TokenKind::LParen)? {
            if self.cur().kind != TokenKind::RParen {
                loop {
                    indices.push(self.expect_ident()?);
                    if !self.next_if(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let assignment = self.parse_assignment_op()?;
        let rhs = self.parse_exp(0)?;

        let mut where_clauses = Vec::new();
        if self.next_if(TokenKind::Where)? {
            loop {
                where_clauses.push(self.parse_where_clause()?);
                if !self.next_if(TokenKind::Comma)? {
                    break;
                }
            }
        }

        let equivalent = if self.next_if(TokenKind::Equivalent)? {
            let name = self.expect_ident()?;
            let eq_start = name.range.clone();
            self.expect(TokenKind::LParen)?;
            let mut accesses = Vec::new();
            if self.cur().kind != TokenKind::RParen {
                loop {
                    accesses.push(self.parse_exp(0)?);
                    if !self.next_if(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            let eq_end = self.expect(TokenKind::RParen)?.range;
            Some(Equivalent {
                name,
                accesses,
                range: eq_start.merge(&eq_end),
            })
        } else {
            None
        };

        let mut range = start.merge(&rhs.range);
        for clause in &where_clauses {
            let clause_range = match clause {
                WhereClause::Range(rc) => &rc.range,
                WhereClause::Let(l) => &l.range,
                WhereClause::Exists(e) => &e.range,
            };
            range = range.merge(clause_range);
        }
        if let Some(eq) = &equivalent {
            range = range.merge(&eq.range);
        }
        Ok(Comprehension {
            ident,
            indices,
            assignment,
            rhs,
            where_clauses,
            equivalent,
            reduction_vars: Vec::new(),
            ranges: Default::default(),
            range,
        })
    }

    fn parse_where_clause(&mut self) -> CompileResult<WhereClause> {
        if self.next_if(TokenKind::Exists)? {
            let exp = self.parse_exp(0)?;
            return Ok(WhereClause::Exists(exp));
        }

        // `let` is not reserved; it arrives as an identifier and is only a
        // binding when followed by another identifier.
        if self.cur().kind == TokenKind::Ident
            && self.cur().lexeme == "let"
            && self.lexer.lookahead()?.kind == TokenKind::Ident
        {
            let let_tok = self.next()?;
            let name = self.expect_ident()?;
            self.expect(TokenKind::Assign)?;
            let rhs = self.parse_exp(0)?;
            let range = let_tok.range.merge(&rhs.range);
            return Ok(WhereClause::Let(LetBinding { name, rhs, range }));
        }

        let ident = self.expect_ident()?;
        self.expect(TokenKind::In)?;
        let start = self.parse_exp(0)?;
        self.expect(TokenKind::Colon)?;
        let end = self.parse_exp(0)?;
        let range = ident.range.merge(&end.range);
        Ok(WhereClause::Range(RangeConstraint {
            ident,
            start,
            end,
            range,
        }))
    }

    fn binary_op_from_token(kind: TokenKind) -> Option<BinaryOp> {
        use TokenKind::*;
        Some(match kind {
            Plus => BinaryOp::Add,
            Minus => BinaryOp::Sub,
            Star => BinaryOp::Mul,
            Slash => BinaryOp::Div,
            Percent => BinaryOp::Mod,
            Lt => BinaryOp::Lt,
            Gt => BinaryOp::Gt,
            Le => BinaryOp::Le,
            Ge => BinaryOp::Ge,
            EqEq => BinaryOp::Eq,
            Ne => BinaryOp::Ne,
            AndAnd => BinaryOp::And,
            OrOr => BinaryOp::Or,
            _ => return None,
        })
    }

    /// Precedence-climbing expression parser.
    fn parse_exp(&mut self, min_prec: u8) -> CompileResult<Expr> {
        let shared = shared_data();

        let mut lhs = if let Some(prec) = shared.unary_prec(self.cur().kind) {
            let op_tok = self.next()?;
            let op = match op_tok.kind {
                TokenKind::Minus => UnaryOp::Neg,
                _ => UnaryOp::Not,
            };
            let operand = self.parse_exp(prec)?;
            let range = op_tok.range.merge(&operand.range);
            Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                range,
            )
        } else {
            self.parse_base_exp()?
        };

        while let Some(prec) = shared.binary_prec(self.cur().kind) {
            if prec <= min_prec {
                break;
            }
            let op_tok = self.next()?;
            if op_tok.kind == TokenKind::Question {
                let then_expr = self.parse_exp(0)?;
                self.expect(TokenKind::Colon)?;
                let else_expr = self.parse_exp(prec - 1)?;
                let range = lhs.range.merge(&else_expr.range);
                lhs = Expr::new(
                    ExprKind::Ternary {
                        condition: Box::new(lhs),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    },
                    range,
                );
                continue;
            }
            let sub_prec = if shared.is_right_associative(op_tok.kind) {
                prec - 1
            } else {
                prec
            };
            let rhs = self.parse_exp(sub_prec)?;
            let op = match Self::binary_op_from_token(op_tok.kind) {
                Some(op) => op,
                None => {
                    return Err(ParseError::new(
                        format!("'{}' cannot be used as a binary operator", op_tok.lexeme),
                        op_tok.range,
                    )
                    .into())
                }
            };
            let range = lhs.range.merge(&rhs.range);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                range,
            );
        }

        Ok(lhs)
    }

    fn parse_exp_list(&mut self) -> CompileResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        if self.cur().kind != TokenKind::RParen {
            loop {
                exprs.push(self.parse_exp(0)?);
                if !self.next_if(TokenKind::Comma)? {
                    break;
                }
            }
        }
        Ok(exprs)
    }

    fn parse_number_const(&mut self) -> CompileResult<Expr> {
        let tok = self.next()?;
        let suffix = tok.num_suffix().to_string();
        let value_str = tok.num_value_str().to_string();
        let is_float_lexeme =
            value_str.contains('.') || value_str.contains('e') || value_str.contains('E');

        let kind = match suffix.as_str() {
            "" => {
                if is_float_lexeme {
                    ScalarKind::Float32
                } else {
                    ScalarKind::Int32
                }
            }
            "u8" => ScalarKind::UInt8,
            "u16" => ScalarKind::UInt16,
            "u32" => ScalarKind::UInt32,
            "u64" => ScalarKind::UInt64,
            "i8" => ScalarKind::Int8,
            "i16" => ScalarKind::Int16,
            "i32" => ScalarKind::Int32,
            "i64" => ScalarKind::Int64,
            "z" => ScalarKind::SizeT,
            "f16" => ScalarKind::Float16,
            "f32" => ScalarKind::Float32,
            "f64" => ScalarKind::Float64,
            other => {
                return Err(ParseError::new(
                    format!("unknown numeric suffix '{}'", other),
                    tok.range,
                )
                .into())
            }
        };

        let value = if matches!(
            kind,
            ScalarKind::Float16 | ScalarKind::Float32 | ScalarKind::Float64
        ) {
            let v: f64 = value_str.parse().map_err(|_| {
                ParseError::new(format!("invalid number '{}'", tok.lexeme), tok.range.clone())
            })?;
            ConstValue::Float(v)
        } else {
            let v: i64 = value_str.parse().map_err(|_| {
                ParseError::new(format!("invalid number '{}'", tok.lexeme), tok.range.clone())
            })?;
            ConstValue::Int(v)
        };

        Ok(Expr::new(ExprKind::Const { value, kind }, tok.range))
    }

    fn parse_base_exp(&mut self) -> CompileResult<Expr> {
        match self.cur().kind {
            TokenKind::Number => self.parse_number_const(),

            TokenKind::Ident => {
                let ident = self.expect_ident()?;

                if self.next_if(TokenKind::LParen)? {
                    let args = self.parse_exp_list()?;
                    let end = self.expect(TokenKind::RParen)?.range;
                    let range = ident.range.merge(&end);
                    return Ok(Expr::new(ExprKind::Apply { name: ident, args }, range));
                }

                // Dim access `A.0` arrives as an identifier followed by a
                // dotted number token.
                if self.cur().kind == TokenKind::Number && self.cur().lexeme.starts_with('.') {
                    let tok = self.next()?;
                    let dim: usize = tok.lexeme[1..].parse().map_err(|_| {
                        ParseError::new(
                            format!("invalid dimension selector '{}'", tok.lexeme),
                            tok.range.clone(),
                        )
                    })?;
                    let range = ident.range.merge(&tok.range);
                    return Ok(Expr::new(ExprKind::Select { name: ident, dim }, range));
                }

                let range = ident.range.clone();
                Ok(Expr::new(ExprKind::Ident(ident.name), range))
            }

            TokenKind::Min | TokenKind::Max => {
                let tok = self.next()?;
                let op = if tok.kind == TokenKind::Min {
                    BinaryOp::Min
                } else {
                    BinaryOp::Max
                };
                self.expect(TokenKind::LParen)?;
                let left = self.parse_exp(0)?;
                self.expect(TokenKind::Comma)?;
                let right = self.parse_exp(0)?;
                let end = self.expect(TokenKind::RParen)?.range;
                let range = tok.range.merge(&end);
                Ok(Expr::new(
                    ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    range,
                ))
            }

            kind if kind.is_scalar_type() => {
                let tok = self.next()?;
                // `is_scalar_type` guarantees the conversion succeeds.
                let kind = Self::scalar_kind_from_token(tok.kind).ok_or_else(|| {
                    ParseError::new("expected scalar type", tok.range.clone())
                })?;
                self.expect(TokenKind::LParen)?;
                let expr = self.parse_exp(0)?;
                let end = self.expect(TokenKind::RParen)?.range;
                let range = tok.range.merge(&end);
                Ok(Expr::new(
                    ExprKind::Cast {
                        expr: Box::new(expr),
                        kind,
                    },
                    range,
                ))
            }

            TokenKind::LParen => {
                self.next()?;
                let exp = self.parse_exp(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(exp)
            }

            _ => Err(ParseError::expected(
                "expression",
                format!("{} '{}'", self.cur().kind.name(), self.cur().lexeme),
                self.cur().range.clone(),
            )
            .into()),
        }
    }
}

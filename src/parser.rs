use super::ast::{Expr, Function, Item, ProtoKind, Prototype};
use super::cursor::TokenCursor;
use super::error::{Error, ErrorKind, Result};
use super::operators::{OperatorTable, DEFAULT_PRECEDENCE};
use super::token::Token;
use log::{trace, warn};

/// Recursive-descent parser with operator-precedence climbing.
///
/// Binary operator precedences come from the borrowed [`OperatorTable`],
/// which grows as `def binary...` items are parsed.
pub struct Parser<'a> {
    cursor: TokenCursor,
    operators: &'a mut OperatorTable,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, operators: &'a mut OperatorTable) -> Parser<'a> {
        Parser {
            cursor: TokenCursor::new(tokens),
            operators,
        }
    }

    pub fn operators(&mut self) -> &mut OperatorTable {
        &mut *self.operators
    }

    /// Parses the next top-level item, skipping `;` separators. Returns `None`
    /// at end of input.
    ///
    /// On error the token the parser stopped at is discarded, so calling
    /// again resumes after it.
    pub fn parse_item(&mut self) -> Option<Result<Item>> {
        while *self.cursor.current() == Token::Semicolon {
            self.cursor.advance();
        }

        let result = match self.cursor.current() {
            Token::Eof => return None,
            Token::Def => self.parse_definition().map(Item::Definition),
            Token::Extern => self.parse_extern().map(Item::Extern),
            _ => self.parse_top_level_expr().map(Item::Expression),
        };

        match &result {
            Ok(item) => trace!("parsed item `{}`", item.name()),
            Err(e) => {
                let skipped = self.cursor.advance();
                warn!("{}; skipping {}", e, skipped);
            }
        }
        Some(result)
    }

    /// Parses every remaining item of the unit.
    pub fn parse_program(&mut self) -> Vec<Result<Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.parse_item() {
            items.push(item);
        }
        items
    }

    /// definition ::= 'def' prototype expression
    fn parse_definition(&mut self) -> Result<Function> {
        self.cursor.advance();
        let proto = self.parse_prototype()?;

        // Install before the body so the operator can be used recursively.
        let installed = proto.binary_operator().map(|(op, precedence)| {
            self.operators.define(op, precedence);
            op
        });

        match self.parse_expression() {
            Ok(body) => Ok(Function { proto, body }),
            Err(e) => {
                if let Some(op) = installed {
                    self.operators.rollback(op);
                }
                Err(e)
            }
        }
    }

    /// external ::= 'extern' prototype
    fn parse_extern(&mut self) -> Result<Prototype> {
        self.cursor.advance();
        self.parse_prototype()
    }

    fn parse_top_level_expr(&mut self) -> Result<Function> {
        let body = self.parse_expression()?;
        Ok(Function {
            proto: Prototype::anonymous(),
            body,
        })
    }

    /// prototype
    ///   ::= id '(' id* ')'
    ///   ::= 'unary' OP '(' id ')'
    ///   ::= 'binary' OP number? '(' id id ')'
    fn parse_prototype(&mut self) -> Result<Prototype> {
        let (name, kind) = match self.cursor.current() {
            Token::Ident(_) => (self.expect_ident("function name in prototype")?, ProtoKind::Function),
            Token::Unary => {
                self.cursor.advance();
                let op = self.expect_operator("unary operator")?;
                (format!("unary{}", op), ProtoKind::Unary(op))
            }
            Token::Binary => {
                self.cursor.advance();
                let op = self.expect_operator("binary operator")?;
                let precedence = match *self.cursor.current() {
                    Token::Int(n) => {
                        if n < 1 || n > 100 {
                            return Err(ErrorKind::InvalidPrecedence(n).into());
                        }
                        self.cursor.advance();
                        n as u32
                    }
                    Token::Float(_) => return Err(self.unexpected("integer precedence")),
                    _ => DEFAULT_PRECEDENCE,
                };
                (format!("binary{}", op), ProtoKind::Binary(op, precedence))
            }
            _ => return Err(self.unexpected("function name in prototype")),
        };

        self.expect(Token::LParen, "'(' in prototype")?;
        let mut params = Vec::new();
        while let Token::Ident(_) = self.cursor.current() {
            params.push(self.expect_ident("parameter name")?);
        }
        self.expect(Token::RParen, "')' in prototype")?;

        let arity = match kind {
            ProtoKind::Function => None,
            ProtoKind::Unary(_) => Some(1),
            ProtoKind::Binary(..) => Some(2),
        };
        if let Some(expected) = arity {
            if params.len() != expected {
                return Err(ErrorKind::OperatorArity {
                    expected,
                    found: params.len(),
                }
                .into());
            }
        }

        Ok(Prototype { name, params, kind })
    }

    /// expression ::= unary binoprhs
    pub(crate) fn parse_expression(&mut self) -> Result<Expr> {
        let lhs = self.parse_unary()?;
        self.parse_bin_op_rhs(0, lhs)
    }

    fn current_precedence(&self) -> Option<u32> {
        self.cursor
            .current()
            .operator_symbol()
            .and_then(|op| self.operators.precedence(op))
    }

    /// binoprhs ::= (OP unary)*
    fn parse_bin_op_rhs(&mut self, min_precedence: u32, mut lhs: Expr) -> Result<Expr> {
        loop {
            let precedence = match self.current_precedence() {
                Some(p) if p >= min_precedence => p,
                _ => return Ok(lhs),
            };
            let op = match self.cursor.advance().operator_symbol() {
                Some(op) => op,
                None => return Ok(lhs),
            };

            let mut rhs = self.parse_unary()?;

            // A tighter operator after rhs takes rhs as its own lhs.
            if let Some(next) = self.current_precedence() {
                if precedence < next {
                    rhs = self.parse_bin_op_rhs(precedence + 1, rhs)?;
                }
            }

            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// unary ::= primary | OP unary
    fn parse_unary(&mut self) -> Result<Expr> {
        if let &Token::Op(op) = self.cursor.current() {
            self.cursor.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.cursor.current() {
            Token::Ident(_) => self.parse_identifier_expr(),
            Token::Int(_) | Token::Float(_) => self.parse_number_expr(),
            Token::LParen => self.parse_paren_expr(),
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::Var => self.parse_var(),
            other => Err(ErrorKind::ExpectedExpression(other.clone()).into()),
        }
    }

    fn parse_number_expr(&mut self) -> Result<Expr> {
        match self.cursor.advance() {
            Token::Int(n) => Ok(Expr::Number(n as f64)),
            Token::Float(n) => Ok(Expr::Number(n)),
            other => Err(ErrorKind::ExpectedExpression(other).into()),
        }
    }

    /// parenexpr ::= '(' expression ')'
    fn parse_paren_expr(&mut self) -> Result<Expr> {
        self.cursor.advance();
        let e = self.parse_expression()?;
        self.expect(Token::RParen, "')'")?;
        Ok(e)
    }

    /// identifierexpr ::= id | id '(' (expression (',' expression)*)? ')'
    fn parse_identifier_expr(&mut self) -> Result<Expr> {
        let name = self.expect_ident("identifier")?;
        if *self.cursor.current() != Token::LParen {
            return Ok(Expr::Variable(name));
        }
        self.cursor.advance();

        let mut args = Vec::new();
        if *self.cursor.current() != Token::RParen {
            loop {
                args.push(self.parse_expression()?);
                match self.cursor.current() {
                    Token::RParen => break,
                    Token::Comma => {
                        self.cursor.advance();
                    }
                    _ => return Err(self.unexpected("')' or ',' in argument list")),
                }
            }
        }
        self.cursor.advance();

        Ok(Expr::Call(name, args))
    }

    /// ifexpr ::= 'if' expression 'then' expression 'else' expression
    fn parse_if(&mut self) -> Result<Expr> {
        self.cursor.advance();
        let cond = self.parse_expression()?;
        self.expect(Token::Then, "'then'")?;
        let then = self.parse_expression()?;
        self.expect(Token::Else, "'else'")?;
        let otherwise = self.parse_expression()?;
        Ok(Expr::If(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    /// forexpr ::= 'for' id '=' expression ',' expression (',' expression)? 'in' expression
    fn parse_for(&mut self) -> Result<Expr> {
        self.cursor.advance();
        let var = self.expect_ident("identifier after 'for'")?;
        self.expect(Token::Assign, "'=' after 'for'")?;
        let start = self.parse_expression()?;
        self.expect(Token::Comma, "',' after for start value")?;
        let end = self.parse_expression()?;

        let step = if *self.cursor.current() == Token::Comma {
            self.cursor.advance();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        self.expect(Token::In, "'in' after 'for'")?;
        let body = self.parse_expression()?;

        Ok(Expr::For(var, Box::new(start), Box::new(end), step, Box::new(body)))
    }

    /// varexpr ::= 'var' id ('=' expression)? (',' id ('=' expression)?)* 'in' expression
    fn parse_var(&mut self) -> Result<Expr> {
        self.cursor.advance();

        let mut vars = Vec::new();
        loop {
            let name = self.expect_ident("identifier after 'var'")?;
            let init = if *self.cursor.current() == Token::Assign {
                self.cursor.advance();
                Some(self.parse_expression()?)
            } else {
                None
            };
            vars.push((name, init));

            if *self.cursor.current() != Token::Comma {
                break;
            }
            self.cursor.advance();
        }

        self.expect(Token::In, "'in' after 'var'")?;
        let body = self.parse_expression()?;

        Ok(Expr::Var(vars, Box::new(body)))
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<()> {
        if *self.cursor.current() == expected {
            self.cursor.advance();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &'static str) -> Result<String> {
        if let Token::Ident(name) = self.cursor.current() {
            let name = name.clone();
            self.cursor.advance();
            Ok(name)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_operator(&mut self, what: &'static str) -> Result<char> {
        if let &Token::Op(op) = self.cursor.current() {
            self.cursor.advance();
            Ok(op)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        ErrorKind::Expected {
            expected,
            found: self.cursor.current().clone(),
        }
        .into()
    }
}

//! Precedence-climbing expression parser.
//!
//! Parses a `;`-separated sequence of statements into an [`Ast`], resolving
//! symbols against the [`Context`] snapshot as it goes. Symbols bound to
//! constants are substituted at parse time; symbols followed by `(` resolve
//! to function bindings and parse as calls with their declared arity.
//!
//! Operator table:
//!
//! | op        | precedence | associativity |
//! |-----------|------------|---------------|
//! | `=`       | 5          | right         |
//! | `+` `-`   | 10         | left          |
//! | `*` `/` `%` | 15       | left          |
//! | `^`       | 20         | right         |
//! | unary `-` | 25         | right         |
//!
//! Unary minus parses its operand at the power operator's precedence, so
//! `-a^2` negates the whole power while `-a*b` negates only `a`.

use tracing::trace;

use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, Transform};
use crate::context::{Context, Symbol};
use crate::error::{Error, Result};
use crate::tokenizer::{Token, TokenKind, Tokenizer};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

fn op_info(op: BinaryOp) -> (u32, Assoc) {
    match op {
        BinaryOp::Assign => (5, Assoc::Right),
        BinaryOp::Add | BinaryOp::Sub => (10, Assoc::Left),
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => (15, Assoc::Left),
        BinaryOp::Pow => (20, Assoc::Right),
    }
}

/// Precedence a unary-minus operand is parsed at: `^` still binds into the
/// operand, everything looser does not.
const UNARY_OPERAND_PREC: u32 = 20;

pub struct Parser<'a> {
    ctx: &'a Context,
    tokenizer: Tokenizer<'a>,
    input: &'a str,
    ast: Ast,
}

impl<'a> Parser<'a> {
    pub fn new(ctx: &'a Context, input: &'a str) -> Self {
        Parser {
            ctx,
            tokenizer: Tokenizer::new(input),
            input,
            ast: Ast::default(),
        }
    }

    /// Parse the whole input. Returns the AST and its root: a single
    /// statement directly, or a Block for several.
    pub fn parse(mut self) -> Result<(Ast, NodeId)> {
        let mut statements = Vec::new();

        loop {
            match self.peek().kind {
                TokenKind::EndOfInput => break,
                // Empty statement between separators.
                TokenKind::Semicolon => {
                    self.advance();
                    continue;
                }
                _ => {}
            }

            let stmt = self.parse_expr(0)?;
            statements.push(stmt);

            let token = self.advance();
            match token.kind {
                TokenKind::Semicolon => {}
                TokenKind::EndOfInput => break,
                TokenKind::Error => return Err(Error::InvalidToken),
                _ => return Err(Error::UnexpectedToken),
            }
        }

        let root = match statements.len() {
            0 => return Err(Error::NoExpression),
            1 => statements[0],
            _ => {
                let block = self.ast.push(NodeKind::Block(statements.clone()));
                for stmt in statements {
                    self.ast.adopt(block, stmt);
                }
                block
            }
        };

        trace!(nodes = root.index() + 1, "parsed expression");
        Ok((self.ast, root))
    }

    fn advance(&mut self) -> Token {
        self.tokenizer.next()
    }

    fn peek(&mut self) -> Token {
        self.tokenizer.peek()
    }

    fn parse_expr(&mut self, min_prec: u32) -> Result<NodeId> {
        let mut left = self.parse_unary()?;

        loop {
            let token = self.peek();
            let op = match token.kind {
                TokenKind::Operator(op) => op,
                TokenKind::Error => return Err(Error::InvalidToken),
                _ => break,
            };

            let (prec, assoc) = op_info(op);
            if prec < min_prec {
                break;
            }
            self.advance();

            if op == BinaryOp::Assign && !matches!(self.ast.kind(left), NodeKind::Variable(_)) {
                return Err(Error::AssignmentToNonVariable);
            }

            let next_min = match assoc {
                Assoc::Left => prec + 1,
                Assoc::Right => prec,
            };
            let right = self.parse_expr(next_min)?;

            let node = self.ast.push(NodeKind::Operator { op, left, right });
            self.ast.adopt(node, left);
            self.ast.adopt(node, right);
            left = node;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<NodeId> {
        let token = self.peek();
        if let TokenKind::Operator(op) = token.kind {
            match op {
                // Unary plus is discarded.
                BinaryOp::Add => {
                    self.advance();
                    return self.parse_unary();
                }
                BinaryOp::Sub => {
                    self.advance();
                    let operand = self.parse_expr_for_unary()?;
                    let node = self.ast.push(NodeKind::Transform {
                        kind: Transform::Negate,
                        child: operand,
                    });
                    self.ast.adopt(node, operand);
                    return Ok(node);
                }
                _ => return Err(Error::ExpectedExpression),
            }
        }
        self.parse_primary()
    }

    fn parse_expr_for_unary(&mut self) -> Result<NodeId> {
        self.parse_expr(UNARY_OPERAND_PREC)
    }

    fn parse_primary(&mut self) -> Result<NodeId> {
        let token = self.advance();
        match token.kind {
            TokenKind::Integer | TokenKind::Float => {
                Ok(self.ast.push(NodeKind::Constant(token.value)))
            }

            TokenKind::LParen => {
                let inner = self.parse_expr(0)?;
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(match close.kind {
                        TokenKind::Error => Error::InvalidToken,
                        _ => Error::UnexpectedToken,
                    });
                }
                Ok(inner)
            }

            TokenKind::Symbol => {
                let name = &self.input[token.pos..token.pos + token.len];
                if self.peek().kind == TokenKind::LParen {
                    self.parse_call(name)
                } else {
                    match self.ctx.get(name) {
                        Some(Symbol::Constant(value)) => {
                            Ok(self.ast.push(NodeKind::Constant(*value)))
                        }
                        Some(Symbol::Variable(slot)) => {
                            Ok(self.ast.push(NodeKind::Variable(*slot)))
                        }
                        // A function name without a call is not a value.
                        Some(Symbol::Function(_)) | None => Err(Error::NoSymbol),
                    }
                }
            }

            TokenKind::Error => Err(Error::InvalidToken),
            TokenKind::EndOfInput
            | TokenKind::Semicolon
            | TokenKind::Comma
            | TokenKind::RParen => Err(Error::ExpectedExpression),
            TokenKind::Operator(_) => Err(Error::ExpectedExpression),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<NodeId> {
        let func = match self.ctx.get(name) {
            Some(Symbol::Function(binding)) => *binding,
            _ => return Err(Error::NoSymbol),
        };

        // Consume the '(' that peek saw.
        let open = self.advance();
        debug_assert_eq!(open.kind, TokenKind::LParen);

        let mut args = crate::ast::ArgList::new();

        if self.peek().kind == TokenKind::RParen {
            self.advance();
        } else {
            loop {
                let arg = self.parse_expr(0)?;
                args.push(arg);

                let token = self.advance();
                match token.kind {
                    TokenKind::Comma => {
                        // Detect overflow at the delimiter, before parsing
                        // further arguments.
                        if args.len() >= func.arity() as usize {
                            return Err(Error::TooManyArguments);
                        }
                    }
                    TokenKind::RParen => break,
                    TokenKind::Error => return Err(Error::InvalidToken),
                    _ => return Err(Error::UnexpectedToken),
                }
            }
        }

        if args.len() < func.arity() as usize {
            return Err(Error::NotEnoughArguments);
        }
        debug_assert_eq!(args.len(), func.arity() as usize);

        let node = self.ast.push(NodeKind::Call {
            func,
            args: args.clone(),
        });
        for arg in args {
            self.ast.adopt(node, arg);
        }
        Ok(node)
    }
}

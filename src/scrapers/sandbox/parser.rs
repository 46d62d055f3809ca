//! Recursive-descent parser producing [`Stmt`] lists.

use std::rc::Rc;

use super::ast::{BinOp, Expr, FunctionDef, Stmt, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::SandboxError;

pub fn parse_program(src: &str) -> Result<Vec<Stmt>, SandboxError> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(body)
}

const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), SandboxError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", p)))
        }
    }

    fn ident(&mut self) -> Result<String, SandboxError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn error(&self, message: String) -> SandboxError {
        SandboxError::Syntax {
            pos: self.tokens[self.pos.min(self.tokens.len() - 1)].pos,
            message,
        }
    }

    fn statement(&mut self) -> Result<Stmt, SandboxError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.eat_punct("{") {
            return Ok(Stmt::Block(self.block_rest()?));
        }
        if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            self.advance();
            let mut decls = Vec::new();
            loop {
                let name = self.ident()?;
                let init = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                decls.push((name, init));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.eat_punct(";");
            return Ok(Stmt::Var(decls));
        }
        if self.is_keyword("function") {
            let next_is_name = matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.token),
                Some(Token::Ident(_))
            );
            if next_is_name {
                self.advance();
                let name = self.ident()?;
                let func = self.function_rest()?;
                return Ok(Stmt::Function(name, func));
            }
        }
        if self.is_keyword("return") {
            self.advance();
            let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                None
            } else {
                Some(self.expression()?)
            };
            self.eat_punct(";");
            return Ok(Stmt::Return(value));
        }
        if self.is_keyword("if") {
            self.advance();
            self.expect_punct("(")?;
            let test = self.expression()?;
            self.expect_punct(")")?;
            let then = Box::new(self.statement()?);
            let otherwise = if self.is_keyword("else") {
                self.advance();
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            return Ok(Stmt::If(test, then, otherwise));
        }

        let expr = self.expression()?;
        self.eat_punct(";");
        Ok(Stmt::Expr(expr))
    }

    fn block_rest(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.error("unterminated block".to_string()));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn function_rest(&mut self) -> Result<Rc<FunctionDef>, SandboxError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.ident()?);
                if self.eat_punct(")") {
                    break;
                }
                self.expect_punct(",")?;
            }
        }
        self.expect_punct("{")?;
        let body = self.block_rest()?;
        Ok(Rc::new(FunctionDef { params, body }))
    }

    fn expression(&mut self) -> Result<Expr, SandboxError> {
        let first = self.assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn assignment(&mut self) -> Result<Expr, SandboxError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let result = self.assignment_inner();
        self.depth -= 1;
        result
    }

    fn assignment_inner(&mut self) -> Result<Expr, SandboxError> {
        let target = self.conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => None,
            Token::Punct("+=") => Some(BinOp::Add),
            Token::Punct("-=") => Some(BinOp::Sub),
            Token::Punct("*=") => Some(BinOp::Mul),
            Token::Punct("/=") => Some(BinOp::Div),
            Token::Punct("%=") => Some(BinOp::Rem),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member(..)) {
            return Err(self.error("invalid assignment target".to_string()));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign(op, Box::new(target), Box::new(value)))
    }

    fn conditional(&mut self) -> Result<Expr, SandboxError> {
        let test = self.or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn or(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.and()?;
        while self.eat_punct("||") {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.binary(0)?;
        while self.eat_punct("&&") {
            let right = self.binary(0)?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Precedence climbing over the left-associative binary levels.
    fn binary(&mut self, level: usize) -> Result<Expr, SandboxError> {
        const LEVELS: &[&[(&str, BinOp)]] = &[
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNotEq),
                ("==", BinOp::Eq),
                ("!=", BinOp::NotEq),
            ],
            &[
                ("<=", BinOp::LtEq),
                (">=", BinOp::GtEq),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
        ];

        if level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(level + 1)?;
        'outer: loop {
            for (punct, op) in LEVELS[level] {
                if self.eat_punct(punct) {
                    let right = self.binary(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        let op = match self.peek() {
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Punct("-") => Some(UnaryOp::Minus),
            Token::Ident(name) if name == "typeof" => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            if self.depth >= MAX_NESTING {
                return Err(self.error("expression nested too deeply".to_string()));
            }
            self.advance();
            self.depth += 1;
            let operand = self.unary();
            self.depth -= 1;
            return Ok(Expr::Unary(op, Box::new(operand?)));
        }
        if self.is_punct("++") || self.is_punct("--") {
            let delta = if self.is_punct("++") { 1.0 } else { -1.0 };
            self.advance();
            let target = self.unary()?;
            return Ok(Expr::Update {
                prefix: true,
                delta,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let expr = self.call_member()?;
        if self.is_punct("++") || self.is_punct("--") {
            let delta = if self.is_punct("++") { 1.0 } else { -1.0 };
            self.advance();
            return Ok(Expr::Update {
                prefix: false,
                delta,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let name = self.ident()?;
                expr = Expr::Member(Box::new(expr), Box::new(Expr::Str(name)));
            } else if self.eat_punct("[") {
                let key = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member(Box::new(expr), Box::new(key));
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.assignment()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Token::Num(n) => Ok(Expr::Num(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Regex { pattern, flags } => Ok(Expr::Regex { pattern, flags }),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "function" => {
                    if matches!(self.peek(), Token::Ident(_)) {
                        self.advance();
                    }
                    Ok(Expr::Function(self.function_rest()?))
                }
                "new" | "class" | "while" | "for" | "do" | "switch" | "try" | "throw" => {
                    Err(SandboxError::Unsupported(name))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Token::Punct("(") => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    if self.is_punct(",") {
                        self.advance();
                        items.push(Expr::Ident("undefined".to_string()));
                        continue;
                    }
                    items.push(self.assignment()?);
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => {
                let mut props = Vec::new();
                while !self.eat_punct("}") {
                    let key = match self.advance() {
                        Token::Ident(name) | Token::Str(name) => name,
                        Token::Num(n) => super::value::number_to_string(n),
                        other => {
                            return Err(self.error(format!("invalid property key {:?}", other)))
                        }
                    };
                    self.expect_punct(":")?;
                    props.push((key, self.assignment()?));
                    if !self.is_punct("}") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(props))
            }
            Token::Eof => Err(self.error("unexpected end of script".to_string())),
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }
}

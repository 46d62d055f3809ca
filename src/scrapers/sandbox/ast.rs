//! Syntax tree for the script subset.

use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Stmt {
    Var(Vec<(String, Option<Expr>)>),
    Expr(Expr),
    Return(Option<Expr>),
    Function(String, Rc<FunctionDef>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    Block(Vec<Stmt>),
    Empty,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Plus,
    Minus,
    Typeof,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Regex { pattern: String, flags: String },
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
    Member(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `target op= value`; `None` is plain assignment.
    Assign(Option<BinOp>, Box<Expr>, Box<Expr>),
    /// `++x`, `x--` and friends.
    Update { prefix: bool, delta: f64, target: Box<Expr> },
    Sequence(Vec<Expr>),
}

//! Expression nodes of the query AST.
//!
//! Expressions are plain owned trees. Literals are registered with the
//! query's parameter map at compile time; identifiers are emitted as
//! (escaped) names and never parameterized.

use super::ast::PathPattern;
use super::query::Query;
use crate::packstream::Value;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A value: becomes a `$pN` parameter when rendered.
    Literal(Value),
    /// A user-declared parameter name: rendered `$name` verbatim.
    Param(String),
    /// An alias or variable reference: rendered as an identifier.
    Ident(String),
    Property {
        subject: Box<Expr>,
        key: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FnCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// `expr AS alias` in projections.
    Aliased {
        expr: Box<Expr>,
        alias: String,
    },
    List(Vec<Expr>),
    Map(IndexMap<String, Expr>),
    /// `EXISTS { (pattern) }`
    ExistsPattern(Box<PathPattern>),
    /// `EXISTS { <subquery> }`; the subquery's parameters are hoisted into
    /// the outer query when rendered.
    ExistsSubquery(Box<Query>),
    Case {
        subject: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    /// `[ pattern WHERE predicate | projection ]`
    PatternComprehension {
        pattern: Box<PathPattern>,
        predicate: Option<Box<Expr>>,
        projection: Box<Expr>,
    },
    /// Escape hatch: raw Cypher text spliced verbatim.
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    StartsWith,
    EndsWith,
    Contains,
    Regex,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub(crate) fn token(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "IN",
            BinaryOp::StartsWith => "STARTS WITH",
            BinaryOp::EndsWith => "ENDS WITH",
            BinaryOp::Contains => "CONTAINS",
            BinaryOp::Regex => "=~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        }
    }

    /// Binding strength; children of weaker binding get parenthesized.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::StartsWith
            | BinaryOp::EndsWith
            | BinaryOp::Contains
            | BinaryOp::Regex => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
            BinaryOp::Pow => 7,
        }
    }
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Expr {
        Expr::Param(name.into())
    }

    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(name.into())
    }

    /// `alias.key`
    pub fn prop(alias: impl Into<String>, key: impl Into<String>) -> Expr {
        Expr::Property {
            subject: Box::new(Expr::Ident(alias.into())),
            key: key.into(),
        }
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::FnCall {
            name: name.into(),
            args,
            distinct: false,
        }
    }

    pub fn raw(text: impl Into<String>) -> Expr {
        Expr::Raw(text.into())
    }

    fn binary(self, op: BinaryOp, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, rhs.into())
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, rhs.into())
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, rhs.into())
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, rhs.into())
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, rhs.into())
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, rhs.into())
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, rhs.into())
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, rhs.into())
    }

    pub fn xor(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Xor, rhs.into())
    }

    pub fn add(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, rhs.into())
    }

    pub fn sub(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, rhs.into())
    }

    pub fn mul(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mul, rhs.into())
    }

    pub fn div(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Div, rhs.into())
    }

    pub fn in_list(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::In, rhs.into())
    }

    pub fn starts_with(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::StartsWith, rhs.into())
    }

    pub fn ends_with(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::EndsWith, rhs.into())
    }

    pub fn contains(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Contains, rhs.into())
    }

    pub fn regex(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Regex, rhs.into())
    }

    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::IsNotNull,
            operand: Box::new(self),
        }
    }

    /// `self AS alias`
    pub fn as_alias(self, alias: impl Into<String>) -> Expr {
        Expr::Aliased {
            expr: Box::new(self),
            alias: alias.into(),
        }
    }

    /// Access a property of this expression.
    pub fn property(self, key: impl Into<String>) -> Expr {
        Expr::Property {
            subject: Box::new(self),
            key: key.into(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(Value::Int(value))
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Literal(Value::Int(value as i64))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Literal(Value::Float(value))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(Value::Bool(value))
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(Value::String(value.to_owned()))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(Value::String(value))
    }
}

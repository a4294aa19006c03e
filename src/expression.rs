//! Symbolic expressions over spatial coordinates and Field values
//!
//! Expressions are trees of [`Expr`] nodes built with ordinary arithmetic operators:
//! ```
//! use hp_adapt::expression::Expr;
//!
//! let (x, y) = (Expr::x(), Expr::y());
//! let criterion = (5.0 * x.clone()).sin() * (3.0 * y.clone()).sin();
//! let target = x.clone().powi(3) + y.clone().powi(3) + 0.25 * y * x.powi(2);
//! # let _ = (criterion, target);
//! ```
//! They are evaluated point-wise through an [`EvalContext`], which supplies coordinates and Field values.

use crate::domain::mesh::space::V2D;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use thiserror::Error;

/// Identifier of a Field within a Domain
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub usize);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "field {}", self.0)
    }
}

/// Spatial coordinate axes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Result of evaluating an [`Expr`] at a point
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(V2D),
}

impl Value {
    pub fn as_scalar(&self) -> Result<f64, EvalError> {
        match self {
            Self::Scalar(s) => Ok(*s),
            Self::Vector(_) => Err(EvalError::TypeMismatch("expected a scalar value")),
        }
    }

    /// Absolute value of a scalar or euclidean norm of a vector
    pub fn magnitude(&self) -> f64 {
        match self {
            Self::Scalar(s) => s.abs(),
            Self::Vector(v) => v.norm(),
        }
    }

    /// Inner product of two values of the same kind
    pub fn dot(&self, other: &Self) -> Result<f64, EvalError> {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Ok(a * b),
            (Self::Vector(a), Self::Vector(b)) => Ok(a.dot_with(b)),
            _ => Err(EvalError::TypeMismatch(
                "cannot take the inner product of a scalar and a vector",
            )),
        }
    }

    pub fn scaled(&self, coefficient: f64) -> Self {
        match self {
            Self::Scalar(s) => Self::Scalar(s * coefficient),
            Self::Vector(v) => Self::Vector(*v * coefficient),
        }
    }

    /// Sum of two values of the same kind
    pub fn sum(&self, other: &Self) -> Result<Self, EvalError> {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Ok(Self::Scalar(a + b)),
            (Self::Vector(a), Self::Vector(b)) => Ok(Self::Vector(*a + *b)),
            _ => Err(EvalError::TypeMismatch("cannot add a scalar and a vector")),
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            Self::Scalar(s) => s.is_finite(),
            Self::Vector(v) => v.x().is_finite() && v.y().is_finite(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sin,
    Cos,
    Exp,
    Sqrt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Expression AST
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(f64),
    Coord(Axis),
    Field(FieldId),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// 2-vector built from two scalar expressions
    Array(Box<[Expr; 2]>),
    /// Component of a vector expression
    Component(Box<Expr>, usize),
    /// Euclidean norm of a vector expression (absolute value of a scalar)
    Norm(Box<Expr>),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("Type mismatch: {0}")]
    TypeMismatch(&'static str),
    #[error("Expression references {0}, which is not defined")]
    UndefinedField(FieldId),
    #[error("Vector component {0} does not exist")]
    InvalidComponent(usize),
    #[error("Expression produced a non-finite value at ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
    #[error("Point ({x}, {y}) is outside of the Mesh")]
    OutsideMesh { x: f64, y: f64 },
    #[error("Elem {0} is not part of the Mesh")]
    UnknownElem(usize),
}

/// Supplies the data an [`Expr`] needs to be evaluated at a single point
pub trait EvalContext {
    fn coordinate(&self, axis: Axis) -> f64;

    fn field(&self, field: FieldId) -> Result<Value, EvalError>;
}

impl Expr {
    pub fn x() -> Self {
        Self::Coord(Axis::X)
    }

    pub fn y() -> Self {
        Self::Coord(Axis::Y)
    }

    pub fn constant(value: f64) -> Self {
        Self::Const(value)
    }

    pub fn field(field: FieldId) -> Self {
        Self::Field(field)
    }

    pub fn array(x: Expr, y: Expr) -> Self {
        Self::Array(Box::new([x, y]))
    }

    pub fn sin(self) -> Self {
        Self::Unary(UnaryOp::Sin, Box::new(self))
    }

    pub fn cos(self) -> Self {
        Self::Unary(UnaryOp::Cos, Box::new(self))
    }

    pub fn exp(self) -> Self {
        Self::Unary(UnaryOp::Exp, Box::new(self))
    }

    pub fn sqrt(self) -> Self {
        Self::Unary(UnaryOp::Sqrt, Box::new(self))
    }

    pub fn abs(self) -> Self {
        Self::Unary(UnaryOp::Abs, Box::new(self))
    }

    pub fn pow(self, exponent: Expr) -> Self {
        Self::Binary(BinaryOp::Pow, Box::new(self), Box::new(exponent))
    }

    pub fn powi(self, exponent: i32) -> Self {
        self.pow(Self::Const(exponent as f64))
    }

    pub fn component(self, idx: usize) -> Self {
        Self::Component(Box::new(self), idx)
    }

    pub fn norm(self) -> Self {
        Self::Norm(Box::new(self))
    }

    /// All Fields referenced by this expression
    pub fn fields(&self) -> BTreeSet<FieldId> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut BTreeSet<FieldId>) {
        match self {
            Self::Const(_) | Self::Coord(_) => {}
            Self::Field(id) => {
                fields.insert(*id);
            }
            Self::Unary(_, e) | Self::Component(e, _) | Self::Norm(e) => e.collect_fields(fields),
            Self::Binary(_, a, b) => {
                a.collect_fields(fields);
                b.collect_fields(fields);
            }
            Self::Array(items) => {
                items[0].collect_fields(fields);
                items[1].collect_fields(fields);
            }
        }
    }

    /// Evaluate the expression at the point described by `ctx`
    pub fn evaluate(&self, ctx: &impl EvalContext) -> Result<Value, EvalError> {
        let value = self.visit(ctx)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NonFinite {
                x: ctx.coordinate(Axis::X),
                y: ctx.coordinate(Axis::Y),
            })
        }
    }

    /// Evaluate the expression, requiring a scalar result
    pub fn evaluate_scalar(&self, ctx: &impl EvalContext) -> Result<f64, EvalError> {
        self.evaluate(ctx)?.as_scalar()
    }

    fn visit(&self, ctx: &impl EvalContext) -> Result<Value, EvalError> {
        match self {
            Self::Const(c) => Ok(Value::Scalar(*c)),
            Self::Coord(axis) => Ok(Value::Scalar(ctx.coordinate(*axis))),
            Self::Field(id) => ctx.field(*id),
            Self::Unary(op, e) => apply_unary(*op, e.visit(ctx)?),
            Self::Binary(op, a, b) => apply_binary(*op, a.visit(ctx)?, b.visit(ctx)?),
            Self::Array(items) => Ok(Value::Vector(V2D::from([
                items[0].visit(ctx)?.as_scalar()?,
                items[1].visit(ctx)?.as_scalar()?,
            ]))),
            Self::Component(e, idx) => match (e.visit(ctx)?, idx) {
                (Value::Vector(v), 0 | 1) => Ok(Value::Scalar(v[*idx])),
                (Value::Vector(_), _) => Err(EvalError::InvalidComponent(*idx)),
                (Value::Scalar(_), _) => Err(EvalError::TypeMismatch(
                    "cannot take a component of a scalar",
                )),
            },
            Self::Norm(e) => Ok(Value::Scalar(e.visit(ctx)?.magnitude())),
        }
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Neg, v) => Ok(v.scaled(-1.0)),
        (UnaryOp::Abs, Value::Scalar(s)) => Ok(Value::Scalar(s.abs())),
        (UnaryOp::Sin, Value::Scalar(s)) => Ok(Value::Scalar(s.sin())),
        (UnaryOp::Cos, Value::Scalar(s)) => Ok(Value::Scalar(s.cos())),
        (UnaryOp::Exp, Value::Scalar(s)) => Ok(Value::Scalar(s.exp())),
        (UnaryOp::Sqrt, Value::Scalar(s)) => Ok(Value::Scalar(s.sqrt())),
        (_, Value::Vector(_)) => Err(EvalError::TypeMismatch(
            "elementary functions only apply to scalars",
        )),
    }
}

fn apply_binary(op: BinaryOp, a: Value, b: Value) -> Result<Value, EvalError> {
    use Value::*;
    match (op, a, b) {
        (BinaryOp::Add, _, _) => a.sum(&b),
        (BinaryOp::Sub, _, _) => a.sum(&b.scaled(-1.0)),
        (BinaryOp::Mul, Scalar(s), v) | (BinaryOp::Mul, v, Scalar(s)) => Ok(v.scaled(s)),
        (BinaryOp::Div, v, Scalar(s)) => Ok(v.scaled(1.0 / s)),
        (BinaryOp::Pow, Scalar(base), Scalar(exponent)) => Ok(Scalar(pow(base, exponent))),
        (BinaryOp::Mul, Vector(_), Vector(_)) => Err(EvalError::TypeMismatch(
            "cannot multiply two vectors (use a component-wise expression)",
        )),
        (BinaryOp::Div, _, Vector(_)) => Err(EvalError::TypeMismatch("cannot divide by a vector")),
        (BinaryOp::Pow, _, _) => Err(EvalError::TypeMismatch("powers only apply to scalars")),
    }
}

// integer exponents are evaluated by repeated multiplication so polynomial expressions are exact
fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
        base.powi(exponent as i32)
    } else {
        base.powf(exponent)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::Const(value)
    }
}

impl From<FieldId> for Expr {
    fn from(field: FieldId) -> Self {
        Self::Field(field)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(rhs))
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(Expr::Const(rhs)))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::Binary($op, Box::new(Expr::Const(self)), Box::new(rhs))
            }
        }

        impl $trait<FieldId> for Expr {
            type Output = Expr;
            fn $method(self, rhs: FieldId) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(Expr::Field(rhs)))
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Const(c) => write!(f, "{}", c),
            Self::Coord(Axis::X) => write!(f, "x"),
            Self::Coord(Axis::Y) => write!(f, "y"),
            Self::Field(id) => write!(f, "f{}", id.0),
            Self::Unary(UnaryOp::Neg, e) => write!(f, "-({})", e),
            Self::Unary(op, e) => write!(f, "{}({})", format!("{:?}", op).to_lowercase(), e),
            Self::Binary(op, a, b) => {
                let symbol = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "^",
                };
                write!(f, "({} {} {})", a, symbol, b)
            }
            Self::Array(items) => write!(f, "[{}, {}]", items[0], items[1]),
            Self::Component(e, idx) => write!(f, "{}[{}]", e, idx),
            Self::Norm(e) => write!(f, "|{}|", e),
        }
    }
}

/// An [`EvalContext`] with only spatial coordinates (Field references are undefined)
#[derive(Clone, Copy, Debug)]
pub struct CoordContext(pub [f64; 2]);

impl EvalContext for CoordContext {
    fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.0[0],
            Axis::Y => self.0[1],
        }
    }

    fn field(&self, field: FieldId) -> Result<Value, EvalError> {
        Err(EvalError::UndefinedField(field))
    }
}

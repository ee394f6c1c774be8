// Forward-mode differentiation over an owned expression tree.
// Each node returns its value together with the partial derivative
// of that value w.r.t. every depth unknown it touches.
use indexmap::IndexMap;

use crate::id::Id;

/// Partial derivatives of an expression, keyed by the unknown they're taken with respect to.
pub type Partials = IndexMap<Id, f64>;

/// Result of evaluating an expression.
#[derive(Debug, PartialEq)]
pub struct Eval {
    /// The value of the expression.
    pub value: f64,
    /// All nonzero partial derivatives.
    pub derivatives: Partials,
}

/// One `coefficient * d[id]` summand of a [`Polynomial`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    /// Scale applied to the unknown.
    pub coefficient: f64,
    /// Which unknown.
    pub id: Id,
}

/// An affine combination of unknowns: `Σ cᵢ·d[idᵢ] + constant`.
/// Every linear residual (inertia, smoothness, derivative) is one of these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polynomial {
    terms: Vec<Term>,
    constant: f64,
}

impl Polynomial {
    /// A polynomial with no unknowns.
    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    /// Just `d[id]`.
    pub fn variable(id: Id) -> Self {
        Self::term(1.0, id)
    }

    /// Just `coefficient * d[id]`.
    pub fn term(coefficient: f64, id: Id) -> Self {
        let mut p = Self::default();
        p.add_term(coefficient, id);
        p
    }

    /// Adds `coefficient * d[id]`, merging with an existing term for the same unknown.
    pub fn add_term(&mut self, coefficient: f64, id: Id) {
        match self.terms.iter_mut().find(|t| t.id == id) {
            Some(term) => term.coefficient += coefficient,
            None => self.terms.push(Term { coefficient, id }),
        }
    }

    /// The summands, one per distinct unknown.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// The part which doesn't depend on any unknown.
    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    /// Value at the given assignment of unknowns.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms.iter().fold(self.constant, |acc, term| {
            acc + term.coefficient * values[term.id as usize]
        })
    }

    /// Multiply every term and the constant by `k`.
    pub fn scale(mut self, k: f64) -> Self {
        self.terms.iter_mut().for_each(|t| t.coefficient *= k);
        self.constant *= k;
        self
    }
}

impl std::ops::Add for Polynomial {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        for Term { coefficient, id } in rhs.terms {
            self.add_term(coefficient, id);
        }
        self.constant += rhs.constant;
        self
    }
}

impl std::ops::Sub for Polynomial {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl std::ops::Neg for Polynomial {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.scale(-1.0)
    }
}

impl std::ops::Add<f64> for Polynomial {
    type Output = Self;

    fn add(mut self, rhs: f64) -> Self::Output {
        self.constant += rhs;
        self
    }
}

impl std::ops::Sub<f64> for Polynomial {
    type Output = Self;

    fn sub(self, rhs: f64) -> Self::Output {
        self + (-rhs)
    }
}

impl std::ops::Mul<f64> for Polynomial {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        self.scale(rhs)
    }
}

/// Operations with one operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// `-a`
    Neg,
    /// `a^p` for a fixed real exponent.
    Pow(f64),
}

/// Operations with two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
}

/// Symbolic expression over depth unknowns.
/// Each node owns its children, so dropping an expression frees the whole tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Doesn't depend on any unknown.
    Constant(f64),
    /// A single unknown.
    Variable(Id),
    /// An affine combination of unknowns, kept flat because it's so common.
    Linear(Polynomial),
    /// Operation on one subexpression.
    Unary(UnaryOp, Box<Expr>),
    /// Operation on two subexpressions.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// A constant expression.
    pub fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    /// The unknown with this ID.
    pub fn variable(id: Id) -> Self {
        Self::Variable(id)
    }

    /// `self ^ exponent`
    pub fn powf(self, exponent: f64) -> Self {
        Self::Unary(UnaryOp::Pow(exponent), Box::new(self))
    }

    /// `self ^ 0.5`
    pub fn sqrt(self) -> Self {
        self.powf(0.5)
    }

    /// `self ^ 2`
    pub fn squared(self) -> Self {
        self.powf(2.0)
    }

    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Value only, skipping the derivative bookkeeping.
    pub fn value(&self, values: &[f64]) -> f64 {
        match self {
            Expr::Constant(c) => *c,
            Expr::Variable(id) => values[*id as usize],
            Expr::Linear(p) => p.evaluate(values),
            Expr::Unary(op, a) => {
                let a = a.value(values);
                match op {
                    UnaryOp::Neg => -a,
                    UnaryOp::Pow(p) => libm::pow(a, *p),
                }
            }
            Expr::Binary(op, a, b) => {
                let a = a.value(values);
                let b = b.value(values);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                }
            }
        }
    }

    /// Value and all partial derivatives.
    pub fn evaluate(&self, values: &[f64]) -> Eval {
        match self {
            Expr::Constant(value) => Eval {
                value: *value,
                derivatives: Partials::new(),
            },
            Expr::Variable(id) => {
                let mut derivatives = Partials::with_capacity(1);
                derivatives.insert(*id, 1.0);
                Eval {
                    value: values[*id as usize],
                    derivatives,
                }
            }
            Expr::Linear(p) => Eval {
                value: p.evaluate(values),
                derivatives: p.terms.iter().map(|t| (t.id, t.coefficient)).collect(),
            },
            Expr::Unary(UnaryOp::Neg, a) => {
                let Eval {
                    value,
                    mut derivatives,
                } = a.evaluate(values);
                derivatives.values_mut().for_each(|d| *d = -*d);
                Eval {
                    value: -value,
                    derivatives,
                }
            }
            Expr::Unary(UnaryOp::Pow(p), a) => {
                let Eval {
                    value,
                    mut derivatives,
                } = a.evaluate(values);
                // Power rule, then chain rule.
                let outer = p * libm::pow(value, p - 1.0);
                derivatives.values_mut().for_each(|d| *d *= outer);
                Eval {
                    value: libm::pow(value, *p),
                    derivatives,
                }
            }
            Expr::Binary(op, a, b) => {
                let Eval {
                    value: va,
                    derivatives: mut das,
                } = a.evaluate(values);
                let Eval {
                    value: vb,
                    derivatives: mut dbs,
                } = b.evaluate(values);
                match op {
                    BinaryOp::Add => Eval {
                        value: va + vb,
                        derivatives: union_with(das, dbs, |a, b| a + b),
                    },
                    BinaryOp::Sub => {
                        dbs.values_mut().for_each(|d| *d = -*d);
                        Eval {
                            value: va - vb,
                            derivatives: union_with(das, dbs, |a, b| a + b),
                        }
                    }
                    BinaryOp::Mul => {
                        // Product rule. Reuse storage for derivatives of A and B
                        // so we don't have to reallocate.
                        das.values_mut().for_each(|d| *d *= vb);
                        dbs.values_mut().for_each(|d| *d *= va);
                        Eval {
                            value: va * vb,
                            derivatives: union_with(das, dbs, |a, b| a + b),
                        }
                    }
                    BinaryOp::Div => {
                        // Quotient rule.
                        das.values_mut().for_each(|d| *d *= vb);
                        dbs.values_mut().for_each(|d| *d *= -va);
                        let mut derivatives = union_with(das, dbs, |a, b| a + b);
                        let vb_squared = vb * vb;
                        derivatives.values_mut().for_each(|d| *d /= vb_squared);
                        Eval {
                            value: va / vb,
                            derivatives,
                        }
                    }
                }
            }
        }
    }

    /// Pushes every unknown this expression mentions (possibly with repeats).
    pub fn collect_variables(&self, out: &mut Vec<Id>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Variable(id) => out.push(*id),
            Expr::Linear(p) => out.extend(p.terms.iter().map(|t| t.id)),
            Expr::Unary(_, a) => a.collect_variables(out),
            Expr::Binary(_, a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Constant(value)
    }
}

impl From<Polynomial> for Expr {
    fn from(p: Polynomial) -> Self {
        Expr::Linear(p)
    }
}

impl std::ops::Add for Expr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Expr::Linear(a), Expr::Linear(b)) => Expr::Linear(a + b),
            (a, b) => Expr::binary(BinaryOp::Add, a, b),
        }
    }
}

impl std::ops::Sub for Expr {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Expr::Linear(a), Expr::Linear(b)) => Expr::Linear(a - b),
            (a, b) => Expr::binary(BinaryOp::Sub, a, b),
        }
    }
}

impl std::ops::Mul for Expr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Expr::Constant(k), Expr::Linear(p)) | (Expr::Linear(p), Expr::Constant(k)) => {
                Expr::Linear(p.scale(k))
            }
            (a, b) => Expr::binary(BinaryOp::Mul, a, b),
        }
    }
}

impl std::ops::Div for Expr {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Expr::binary(BinaryOp::Div, self, rhs)
    }
}

impl std::ops::Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self::Output {
        match self {
            Expr::Constant(c) => Expr::Constant(-c),
            Expr::Linear(p) => Expr::Linear(-p),
            other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
        }
    }
}

impl std::ops::Mul<f64> for Expr {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        self * Expr::Constant(rhs)
    }
}

impl std::ops::Sub<f64> for Expr {
    type Output = Self;

    fn sub(self, rhs: f64) -> Self::Output {
        self - Expr::Constant(rhs)
    }
}

/// One cell of a Jacobian row.
#[derive(Clone, Copy)]
#[cfg_attr(any(test, feature = "dbg-jac"), derive(Debug, PartialEq))]
pub struct JacobianVar {
    /// Which unknown (column).
    pub id: Id,
    /// Partial derivative of the residual w.r.t. that unknown.
    pub partial_derivative: f64,
}

/// A scalar residual which the solver drives towards zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Equation {
    /// Affine in the unknowns, so its Jacobian row is constant.
    Linear(Polynomial),
    /// Anything else.
    Algebraic(Expr),
}

impl From<Polynomial> for Equation {
    fn from(p: Polynomial) -> Self {
        Equation::Linear(p)
    }
}

impl From<Expr> for Equation {
    fn from(e: Expr) -> Self {
        match e {
            Expr::Linear(p) => Equation::Linear(p),
            other => Equation::Algebraic(other),
        }
    }
}

impl Equation {
    /// Residual value.
    pub fn value(&self, values: &[f64]) -> f64 {
        match self {
            Equation::Linear(p) => p.evaluate(values),
            Equation::Algebraic(e) => e.value(values),
        }
    }

    /// Write this residual's partial derivatives into `out`.
    pub fn jacobian_row(&self, values: &[f64], out: &mut Vec<JacobianVar>) {
        match self {
            Equation::Linear(p) => out.extend(p.terms.iter().map(|t| JacobianVar {
                id: t.id,
                partial_derivative: t.coefficient,
            })),
            Equation::Algebraic(e) => {
                out.extend(e.evaluate(values).derivatives.into_iter().map(
                    |(id, partial_derivative)| JacobianVar {
                        id,
                        partial_derivative,
                    },
                ));
            }
        }
    }

    /// Which unknowns can have a nonzero partial derivative in this residual.
    pub fn nonzeroes(&self, out: &mut Vec<Id>) {
        match self {
            Equation::Linear(p) => out.extend(p.terms.iter().map(|t| t.id)),
            Equation::Algebraic(e) => e.collect_variables(out),
        }
    }
}

/// Union two maps. If a value appears in both maps,
/// pass both instances into `f` and insert that value.
fn union_with<K: std::hash::Hash + Eq, V: Copy>(
    a: IndexMap<K, V>,
    b: IndexMap<K, V>,
    f: impl Fn(V, V) -> V,
) -> IndexMap<K, V> {
    let mut out = a;
    out.reserve(b.len());
    for (b_key, b_val) in b {
        if let Some(a_val) = out.get_mut(&b_key) {
            *a_val = f(*a_val, b_val);
        } else {
            out.insert(b_key, b_val);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(id: Id) -> Expr {
        Expr::variable(id)
    }

    fn c(value: f64) -> Expr {
        Expr::constant(value)
    }

    fn partials(pairs: &[(Id, f64)]) -> Partials {
        pairs.iter().copied().collect()
    }

    #[test]
    fn eval_single_var() {
        let actual = x(0).evaluate(&[14.0]);
        let expected = Eval {
            value: 14.0,
            derivatives: partials(&[(0, 1.0)]),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn eval_same_var_added() {
        let equation = x(0) + x(0) + x(1);
        let actual = equation.evaluate(&[14.0, 3.0]);
        let expected = Eval {
            value: 31.0,
            derivatives: partials(&[(0, 2.0), (1, 1.0)]),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn eval_divided() {
        let equation = (x(0) + x(0) + x(1)) / x(0);
        let actual = equation.evaluate(&[3.0, 2.0]);
        assert_nearly(actual.value, 8.0 / 3.0);
        assert_nearly(actual.derivatives[&0], -2.0 / 9.0);
        assert_nearly(actual.derivatives[&1], 1.0 / 3.0);
    }

    #[test]
    fn eval_with_constant() {
        // (x + 5) * (x + y)
        let equation = (x(0) + c(5.0)) * (x(0) + x(1));
        let actual = equation.evaluate(&[2.0, 3.0]);
        let expected = Eval {
            value: 35.0,
            derivatives: partials(&[(0, 12.0), (1, 7.0)]),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn eval_negated() {
        let equation0 = -x(0);
        let equation1 = x(0) * c(-1.0);
        let expected = Eval {
            value: -2.0,
            derivatives: partials(&[(0, -1.0)]),
        };
        assert_eq!(equation0.evaluate(&[2.0]), expected);
        assert_eq!(equation1.evaluate(&[2.0]), expected);
    }

    #[test]
    fn eval_subtracted() {
        let equation = x(0) * x(1) - x(1);
        let actual = equation.evaluate(&[4.0, 3.0]);
        let expected = Eval {
            value: 9.0,
            derivatives: partials(&[(0, 3.0), (1, 3.0)]),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn eval_inverse_square() {
        // (x + 1)^-2, the shape of the range barrier.
        let equation = Expr::from(Polynomial::variable(0) + 1.0).powf(-2.0);
        let actual = equation.evaluate(&[1.0]);
        assert_nearly(actual.value, 0.25);
        // d/dx (x+1)^-2 = -2 (x+1)^-3
        assert_nearly(actual.derivatives[&0], -0.25);
    }

    #[test]
    fn eval_normalized_component() {
        // a / sqrt(a^2 + b^2)
        let equation = x(0) / (x(0).squared() + x(1).squared()).sqrt();
        let actual = equation.evaluate(&[3.0, 4.0]);
        assert_nearly(actual.value, 0.6);
        // d/da = b^2 / len^3, d/db = -ab / len^3
        assert_nearly(actual.derivatives[&0], 16.0 / 125.0);
        assert_nearly(actual.derivatives[&1], -12.0 / 125.0);
        assert_nearly(equation.value(&[3.0, 4.0]), 0.6);
    }

    #[test]
    fn linear_arithmetic_stays_flat() {
        let a = Expr::from(Polynomial::variable(0));
        let b = Expr::from(Polynomial::term(2.0, 1) + 1.0);
        let sum = (a - b) * 3.0;
        let Expr::Linear(p) = &sum else {
            panic!("expected a flat polynomial, got {sum:?}");
        };
        assert_eq!(
            p.terms(),
            &[
                Term {
                    coefficient: 3.0,
                    id: 0
                },
                Term {
                    coefficient: -6.0,
                    id: 1
                }
            ]
        );
        assert_nearly(p.constant_term(), -3.0);
    }

    #[test]
    fn polynomial_merges_repeated_unknowns() {
        let p = Polynomial::variable(3) - Polynomial::variable(3) + Polynomial::term(2.0, 3);
        assert_eq!(p.terms().len(), 1);
        assert_nearly(p.evaluate(&[0.0, 0.0, 0.0, 5.0]), 10.0);
    }

    #[test]
    fn equation_jacobian_matches_expression() {
        let equation = Equation::from(x(0) * x(1));
        let mut row = Vec::new();
        equation.jacobian_row(&[2.0, 5.0], &mut row);
        assert_eq!(
            row,
            vec![
                JacobianVar {
                    id: 0,
                    partial_derivative: 5.0
                },
                JacobianVar {
                    id: 1,
                    partial_derivative: 2.0
                },
            ]
        );
        let mut nonzeroes = Vec::new();
        equation.nonzeroes(&mut nonzeroes);
        assert_eq!(nonzeroes, vec![0, 1]);
    }

    #[track_caller]
    fn assert_nearly(lhs: f64, rhs: f64) {
        let difference = (lhs - rhs).abs();
        assert!(
            difference < EPSILON,
            "LHS was {lhs}, RHS was {rhs}, difference was {difference}"
        );
    }
    const EPSILON: f64 = 0.0001;
}

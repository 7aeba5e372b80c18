//! Compilation of the expression tree into elementwise closures.
//!
//! Each node becomes a boxed kernel over a [`Frame`] holding the three reserved
//! arrays and the resolved parameter slots. Kernels produce either a scalar or a
//! full column; binary operations broadcast scalars across columns.
//!
//! Array arithmetic follows IEEE semantics (`1/0 = inf`, `0/0 = NaN`). A
//! *scalar* divisor of exactly zero, or a scalar zero raised to a negative
//! scalar power, is a [`NumericFault::DivisionByZero`] instead: that is how a
//! swept parameter value of 0 is detected structurally. So is a scalar
//! exponent of exactly zero applied to a base holding `inf` or `NaN`, which
//! would otherwise collapse the singular item to `1` (`(1/m)^\alpha` at
//! `alpha = 0`).

use std::collections::BTreeMap;
use std::sync::Arc;

use super::parser::{BinaryOp, Expr, Function, Symbol, RESERVED_SYMBOLS};
use crate::error::{NumericFault, Result, SimError};

/// Named scalar parameters supplied at evaluation time.
pub type Parameters = BTreeMap<String, f64>;

/// Intermediate value of a kernel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Column {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Column {
    fn into_vec(self, len: usize) -> Vec<f64> {
        match self {
            Column::Scalar(value) => vec![value; len],
            Column::Vector(values) => values,
        }
    }

    fn map(self, f: impl Fn(f64) -> f64) -> Column {
        match self {
            Column::Scalar(value) => Column::Scalar(f(value)),
            Column::Vector(mut values) => {
                values.iter_mut().for_each(|v| *v = f(*v));
                Column::Vector(values)
            }
        }
    }

    fn any(&self, f: impl Fn(f64) -> bool) -> bool {
        match self {
            Column::Scalar(value) => f(*value),
            Column::Vector(values) => values.iter().any(|v| f(*v)),
        }
    }

    fn zip(self, other: Column, f: impl Fn(f64, f64) -> f64) -> Column {
        match (self, other) {
            (Column::Scalar(a), Column::Scalar(b)) => Column::Scalar(f(a, b)),
            (Column::Scalar(a), Column::Vector(mut bs)) => {
                bs.iter_mut().for_each(|b| *b = f(a, *b));
                Column::Vector(bs)
            }
            (Column::Vector(mut values), Column::Scalar(b)) => {
                values.iter_mut().for_each(|a| *a = f(*a, b));
                Column::Vector(values)
            }
            (Column::Vector(mut values), Column::Vector(bs)) => {
                values.iter_mut().zip(bs).for_each(|(a, b)| *a = f(*a, b));
                Column::Vector(values)
            }
        }
    }
}

/// Inputs visible to a kernel during one evaluation.
pub(crate) struct Frame<'a> {
    pub rank: &'a [f64],
    pub cumulative: &'a [f64],
    pub raw: &'a [f64],
    /// Parameter values in the order of [`CompiledFormula::parameters`].
    pub params: &'a [f64],
}

impl Frame<'_> {
    fn len(&self) -> usize {
        self.rank.len()
    }
}

/// Preorder index of the binary node that hit a singularity.
///
/// Rendering the offending subexpression is deferred until a fault actually
/// happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Singular(usize);

type Kernel = Box<dyn Fn(&Frame<'_>) -> std::result::Result<Column, Singular> + Send + Sync>;

/// The per-item arrays a compiled formula is evaluated over.
#[derive(Debug, Clone, Copy)]
pub struct FormulaInputs<'a> {
    /// Item rank index (0-based) for every item.
    pub rank: &'a [f64],
    /// Running sum of the raw popularity.
    pub cumulative: &'a [f64],
    /// Raw popularity of every item.
    pub raw: &'a [f64],
}

/// A formula compiled into a reusable, thread-safe evaluator.
///
/// Cloning is cheap; the kernel tree is shared.
#[derive(Clone)]
pub struct CompiledFormula {
    source: Arc<str>,
    expr: Arc<Expr>,
    parameters: Arc<[String]>,
    kernel: Arc<Kernel>,
}

impl std::fmt::Debug for CompiledFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFormula")
            .field("source", &self.source)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl CompiledFormula {
    pub(crate) fn from_expr(source: &str, expr: Expr) -> Self {
        let parameters: Vec<String> = expr.parameters().into_iter().collect();
        let kernel = build(&expr, &parameters, &mut 0);
        Self {
            source: source.into(),
            expr: Arc::new(expr),
            parameters: parameters.into(),
            kernel: Arc::new(kernel),
        }
    }

    /// The normalized formula this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed expression tree.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Free parameter names the caller must supply, sorted.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Whether the formula reads the given reserved symbol.
    pub fn references(&self, symbol: &Symbol) -> bool {
        self.expr.references(symbol)
    }

    /// Resolve caller parameters into slot order.
    ///
    /// Reserved names are rejected even if the formula does not need them.
    /// Extra names the formula does not use are ignored.
    pub fn resolve(&self, params: &Parameters) -> Result<Vec<f64>> {
        if let Some(name) = params
            .keys()
            .find(|name| RESERVED_SYMBOLS.contains(&name.as_str()))
        {
            return Err(SimError::ReservedParameter(name.clone()));
        }
        self.parameters
            .iter()
            .map(|name| {
                params
                    .get(name)
                    .copied()
                    .ok_or_else(|| SimError::MissingParameter(name.clone()))
            })
            .collect()
    }

    /// Evaluate elementwise over the item domain, one value per item.
    ///
    /// # Errors
    ///
    /// - `ReservedParameter` / `MissingParameter` from [`resolve`](Self::resolve)
    /// - `LengthMismatch` if the input arrays differ in length
    /// - `Numeric` for a scalar division by zero
    pub fn evaluate(&self, inputs: FormulaInputs<'_>, params: &Parameters) -> Result<Vec<f64>> {
        let slots = self.resolve(params)?;
        self.evaluate_resolved(inputs, &slots)
    }

    pub(crate) fn evaluate_resolved(
        &self,
        inputs: FormulaInputs<'_>,
        slots: &[f64],
    ) -> Result<Vec<f64>> {
        let len = inputs.rank.len();
        for other in [inputs.cumulative.len(), inputs.raw.len()] {
            if other != len {
                return Err(SimError::LengthMismatch { left: len, right: other });
            }
        }
        let frame = Frame {
            rank: inputs.rank,
            cumulative: inputs.cumulative,
            raw: inputs.raw,
            params: slots,
        };
        match (self.kernel.as_ref())(&frame) {
            Ok(column) => Ok(column.into_vec(len)),
            Err(Singular(node)) => Err(NumericFault::DivisionByZero {
                expression: render_binary(&self.expr, node)
                    .unwrap_or_else(|| self.source.to_string()),
            }
            .into()),
        }
    }
}

/// Render the `node`-th binary operation of `expr`, counted in preorder.
fn render_binary(expr: &Expr, node: usize) -> Option<String> {
    let mut seen = 0;
    let mut rendered = None;
    expr.visit(&mut |e| {
        if let Expr::Binary { .. } = e {
            if seen == node {
                rendered = Some(e.to_string());
            }
            seen += 1;
        }
    });
    rendered
}

fn kernel<F>(f: F) -> Kernel
where
    F: Fn(&Frame<'_>) -> std::result::Result<Column, Singular> + Send + Sync + 'static,
{
    Box::new(f)
}

/// `next` numbers binary nodes in preorder so a fault can be traced back to
/// its subexpression.
fn build(expr: &Expr, parameters: &[String], next: &mut usize) -> Kernel {
    match expr {
        Expr::Literal(value) => {
            let value = *value;
            kernel(move |_| Ok(Column::Scalar(value)))
        }
        Expr::Symbol(Symbol::Rank) => kernel(|frame| Ok(Column::Vector(frame.rank.to_vec()))),
        Expr::Symbol(Symbol::Cumulative) => {
            kernel(|frame| Ok(Column::Vector(frame.cumulative.to_vec())))
        }
        Expr::Symbol(Symbol::Raw) => kernel(|frame| Ok(Column::Vector(frame.raw.to_vec()))),
        Expr::Symbol(Symbol::Param(name)) => {
            // parameters is derived from this very tree, so the name is present
            let slot = parameters.iter().position(|p| p == name).unwrap_or(0);
            kernel(move |frame| Ok(Column::Scalar(frame.params[slot])))
        }
        Expr::Neg(inner) => {
            let inner = build(inner, parameters, next);
            kernel(move |frame| Ok(inner(frame)?.map(|v| -v)))
        }
        Expr::Call { func, arg } => {
            let arg = build(arg, parameters, next);
            let f: fn(f64) -> f64 = match func {
                Function::Exp => f64::exp,
                Function::Ln => f64::ln,
                Function::Sqrt => f64::sqrt,
                Function::Sin => f64::sin,
                Function::Cos => f64::cos,
                Function::Tan => f64::tan,
            };
            kernel(move |frame| Ok(arg(frame)?.map(f)))
        }
        Expr::RunningSum(body) => {
            let body = build(body, parameters, next);
            kernel(move |frame| {
                let mut values = body(frame)?.into_vec(frame.len());
                let mut total = 0.0;
                for v in values.iter_mut() {
                    total += *v;
                    *v = total;
                }
                Ok(Column::Vector(values))
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let node = Singular(*next);
            *next += 1;
            let lhs = build(lhs, parameters, next);
            let rhs = build(rhs, parameters, next);
            let op = *op;
            kernel(move |frame| {
                let a = lhs(frame)?;
                let b = rhs(frame)?;
                binary(op, a, b).ok_or(node)
            })
        }
    }
}

/// Apply a binary operator; `None` signals a scalar division by zero or a
/// singular base hidden by a zero exponent.
fn binary(op: BinaryOp, a: Column, b: Column) -> Option<Column> {
    match op {
        BinaryOp::Add => Some(a.zip(b, |x, y| x + y)),
        BinaryOp::Sub => Some(a.zip(b, |x, y| x - y)),
        BinaryOp::Mul => Some(a.zip(b, |x, y| x * y)),
        BinaryOp::Div => match b {
            Column::Scalar(d) if d == 0.0 => None,
            b => Some(a.zip(b, |x, y| x / y)),
        },
        BinaryOp::Pow => match (&a, &b) {
            (Column::Scalar(x), Column::Scalar(y)) if *x == 0.0 && *y < 0.0 => None,
            (base, Column::Scalar(y)) if *y == 0.0 && base.any(|v| !v.is_finite()) => None,
            _ => Some(a.zip(b, f64::powf)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;

    fn inputs<'a>(rank: &'a [f64], cumulative: &'a [f64], raw: &'a [f64]) -> FormulaInputs<'a> {
        FormulaInputs {
            rank,
            cumulative,
            raw,
        }
    }

    fn params(pairs: &[(&str, f64)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_constant_broadcasts() {
        let formula = compile("2").unwrap();
        let out = formula
            .evaluate(inputs(&[0.0, 1.0, 2.0], &[0.0; 3], &[0.0; 3]), &Parameters::new())
            .unwrap();
        assert_eq!(out, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_reserved_arrays() {
        let formula = compile("m+10v+100r").unwrap();
        let out = formula
            .evaluate(
                inputs(&[0.0, 1.0], &[0.5, 1.0], &[0.5, 0.5]),
                &Parameters::new(),
            )
            .unwrap();
        assert_eq!(out, vec![55.0, 61.0]);
    }

    #[test]
    fn test_parameters_sorted_and_resolved() {
        let formula = compile("\\beta r+\\alpha").unwrap();
        assert_eq!(formula.parameters(), ["alpha", "beta"]);
        let out = formula
            .evaluate(
                inputs(&[0.0], &[1.0], &[1.0]),
                &params(&[("alpha", 1.0), ("beta", 2.0), ("unused", 9.0)]),
            )
            .unwrap();
        assert_eq!(out, vec![3.0]);
    }

    #[test]
    fn test_missing_parameter() {
        let formula = compile("r^k").unwrap();
        let err = formula
            .evaluate(inputs(&[0.0], &[1.0], &[1.0]), &Parameters::new())
            .unwrap_err();
        assert!(matches!(err, SimError::MissingParameter(name) if name == "k"));
    }

    #[test]
    fn test_reserved_parameter_rejected() {
        let formula = compile("r").unwrap();
        let err = formula
            .evaluate(inputs(&[0.0], &[1.0], &[1.0]), &params(&[("v", 1.0)]))
            .unwrap_err();
        assert!(matches!(err, SimError::ReservedParameter(name) if name == "v"));
    }

    #[test]
    fn test_scalar_division_by_zero_faults() {
        let formula = compile("r^{1/\\alpha}").unwrap();
        let err = formula
            .evaluate(inputs(&[0.0], &[1.0], &[1.0]), &params(&[("alpha", 0.0)]))
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Numeric(NumericFault::DivisionByZero { ref expression }) if expression == "(1/alpha)"
        ));
    }

    #[test]
    fn test_array_division_is_ieee() {
        let formula = compile("1/m").unwrap();
        let out = formula
            .evaluate(inputs(&[0.0, 2.0], &[0.0; 2], &[0.0; 2]), &Parameters::new())
            .unwrap();
        assert!(out[0].is_infinite());
        assert_eq!(out[1], 0.5);
    }

    #[test]
    fn test_scalar_zero_negative_power_faults() {
        let formula = compile("k^{-1}").unwrap();
        let err = formula
            .evaluate(inputs(&[0.0], &[0.0], &[0.0]), &params(&[("k", 0.0)]))
            .unwrap_err();
        assert!(err.is_numeric());
    }

    #[test]
    fn test_zero_power_of_singular_base_faults() {
        let formula = compile(r"{(1/m)}^{\alpha}").unwrap();
        let err = formula
            .evaluate(
                inputs(&[0.0, 1.0, 2.0], &[0.0; 3], &[0.0; 3]),
                &params(&[("alpha", 0.0)]),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Numeric(NumericFault::DivisionByZero { ref expression }) if expression == "((1/m)^alpha)"
        ));

        // a finite base or a nonzero exponent keeps IEEE semantics
        let out = formula
            .evaluate(inputs(&[1.0, 2.0], &[0.0; 2], &[0.0; 2]), &params(&[("alpha", 0.0)]))
            .unwrap();
        assert_eq!(out, vec![1.0, 1.0]);
        let out = formula
            .evaluate(inputs(&[0.0, 2.0], &[0.0; 2], &[0.0; 2]), &params(&[("alpha", 1.0)]))
            .unwrap();
        assert!(out[0].is_infinite());
        assert_eq!(out[1], 0.5);
    }

    #[test]
    fn test_fault_names_the_innermost_binary() {
        // preorder numbering must pick the division, not the enclosing sum
        let formula = compile("m+r*(2+1/k)").unwrap();
        let err = formula
            .evaluate(inputs(&[0.0], &[0.0], &[1.0]), &params(&[("k", 0.0)]))
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Numeric(NumericFault::DivisionByZero { ref expression }) if expression == "(1/k)"
        ));
    }

    #[test]
    fn test_long_formula_compiles_and_evaluates() {
        let source = vec!["r"; 400].join("+");
        let formula = compile(&source).unwrap();
        let out = formula
            .evaluate(inputs(&[0.0, 1.0], &[0.0; 2], &[0.5, 0.25]), &Parameters::new())
            .unwrap();
        assert_eq!(out, vec![200.0, 100.0]);
    }

    #[test]
    fn test_running_sum_of_body() {
        let formula = compile("\\sum_{n=1}^{m}{p_r(n)^2}").unwrap();
        let out = formula
            .evaluate(
                inputs(&[0.0, 1.0, 2.0], &[0.0; 3], &[1.0, 2.0, 3.0]),
                &Parameters::new(),
            )
            .unwrap();
        assert_eq!(out, vec![1.0, 5.0, 14.0]);
    }

    #[test]
    fn test_functions() {
        let formula = compile("\\exp{0}+\\sqrt{r}+\\ln{1}").unwrap();
        let out = formula
            .evaluate(inputs(&[0.0], &[0.0], &[4.0]), &Parameters::new())
            .unwrap();
        assert_eq!(out, vec![3.0]);
    }

    #[test]
    fn test_length_mismatch() {
        let formula = compile("r").unwrap();
        let err = formula
            .evaluate(inputs(&[0.0, 1.0], &[0.0], &[0.0, 1.0]), &Parameters::new())
            .unwrap_err();
        assert!(matches!(err, SimError::LengthMismatch { left: 2, right: 1 }));
    }

    #[test]
    fn test_compiled_formula_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledFormula>();
    }
}

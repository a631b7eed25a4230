//! Folding of parameter-free subtrees into constants.

pub mod interpret;
pub mod nominate;

use relq_error::Result;
use tracing::trace;

use crate::expr::Expr;
use crate::expr::source::ConstantExpr;
use nominate::Nomination;

/// Default predicate for what can be evaluated before binding.
///
/// Parameters block evaluation, as does anything with no value outside of a
/// query (collections, lambdas, outer rows).
pub fn can_evaluate_locally(expr: &Expr) -> bool {
    !matches!(
        expr,
        Expr::Parameter(_) | Expr::Collection(_) | Expr::Lambda(_) | Expr::OuterRow(_)
    )
}

/// Predicate used when re-evaluating a nested projection before executing it
/// as a sub-query. SQL nodes additionally block so the bound tree survives.
pub fn can_evaluate_in_subquery(expr: &Expr) -> bool {
    !expr.is_sql_node() && can_evaluate_locally(expr)
}

/// Replaces every maximal evaluable subtree of an expression with its value.
#[derive(Debug)]
pub struct PartialEvaluator<F> {
    can_evaluate: F,
}

impl PartialEvaluator<fn(&Expr) -> bool> {
    pub fn new() -> Self {
        PartialEvaluator {
            can_evaluate: can_evaluate_locally,
        }
    }
}

impl Default for PartialEvaluator<fn(&Expr) -> bool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> PartialEvaluator<F>
where
    F: Fn(&Expr) -> bool,
{
    pub fn with_predicate(can_evaluate: F) -> Self {
        PartialEvaluator { can_evaluate }
    }

    pub fn evaluate(&self, mut expr: Expr) -> Result<Expr> {
        let nomination = Nomination::compute(&expr, &self.can_evaluate, |_| false)?;
        nomination.rewrite(&mut expr, &mut |subtree| {
            if !matches!(subtree, Expr::Constant(_)) {
                *subtree = fold(subtree)?;
            }
            Ok(())
        })?;

        Ok(expr)
    }
}

fn fold(expr: &Expr) -> Result<Expr> {
    let thunk = || interpret::evaluate_constant(expr);
    let value = thunk()?;

    let datatype = expr.static_type().unwrap_or_else(|| value.datatype());
    let value = value.cast_to(&datatype)?;
    trace!(%expr, %value, "folded constant");

    Ok(Expr::Constant(ConstantExpr { value, datatype }))
}

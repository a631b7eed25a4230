use relq_error::Result;

use crate::expr::Expr;

struct Predicates<'a> {
    can_nominate: &'a dyn Fn(&Expr) -> bool,
    always: &'a dyn Fn(&Expr) -> bool,
    opens_scope: &'a dyn Fn(&Expr) -> bool,
}

/// Bottom-up nomination of subtrees that may be replaced as a whole.
///
/// A node is nominated if the predicate accepts it and none of its
/// descendants blocked. A node the predicate rejects blocks every ancestor.
/// Nodes accepted by `always` are nominated regardless of their descendants,
/// but still pass a block upwards. `always` isn't consulted below a node
/// accepted by `opens_scope`.
///
/// `nominated[i]` and `sizes[i]` describe the i-th node in pre-order, sizes
/// including the node itself.
#[derive(Debug, Default)]
pub struct Nomination {
    nominated: Vec<bool>,
    sizes: Vec<usize>,
}

impl Nomination {
    pub fn compute<F, A>(expr: &Expr, can_nominate: F, always: A) -> Result<Self>
    where
        F: Fn(&Expr) -> bool,
        A: Fn(&Expr) -> bool,
    {
        Self::compute_scoped(expr, can_nominate, always, |_| false)
    }

    pub fn compute_scoped<F, A, S>(
        expr: &Expr,
        can_nominate: F,
        always: A,
        opens_scope: S,
    ) -> Result<Self>
    where
        F: Fn(&Expr) -> bool,
        A: Fn(&Expr) -> bool,
        S: Fn(&Expr) -> bool,
    {
        let mut nomination = Nomination::default();
        let predicates = Predicates {
            can_nominate: &can_nominate,
            always: &always,
            opens_scope: &opens_scope,
        };
        nomination.visit(expr, &predicates, false)?;
        Ok(nomination)
    }

    /// Returns true if this node blocks its ancestors.
    fn visit(&mut self, expr: &Expr, predicates: &Predicates, in_scope: bool) -> Result<bool> {
        let idx = self.nominated.len();
        self.nominated.push(false);
        self.sizes.push(1);

        let child_scope = in_scope || (predicates.opens_scope)(expr);
        let mut blocked = false;
        expr.for_each_child(&mut |child| {
            blocked |= self.visit(child, predicates, child_scope)?;
            Ok(())
        })?;

        if !in_scope && (predicates.always)(expr) {
            self.nominated[idx] = true;
        } else if !blocked {
            if (predicates.can_nominate)(expr) {
                self.nominated[idx] = true;
            } else {
                blocked = true;
            }
        }

        self.sizes[idx] = self.nominated.len() - idx;

        Ok(blocked)
    }

    /// Walk the tree top-down calling `func` on the first nominated node of
    /// every path. Nominated subtrees are not descended into.
    ///
    /// The tree must be the same tree nomination was computed on.
    pub fn rewrite<F>(&self, expr: &mut Expr, func: &mut F) -> Result<()>
    where
        F: FnMut(&mut Expr) -> Result<()>,
    {
        let mut idx = 0;
        self.rewrite_inner(expr, &mut idx, func)
    }

    fn rewrite_inner<F>(&self, expr: &mut Expr, idx: &mut usize, func: &mut F) -> Result<()>
    where
        F: FnMut(&mut Expr) -> Result<()>,
    {
        let current = *idx;
        if self.nominated[current] {
            *idx += self.sizes[current];
            return func(expr);
        }

        *idx += 1;
        expr.for_each_child_mut(&mut |child| self.rewrite_inner(child, idx, func))
    }
}

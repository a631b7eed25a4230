use std::fmt;
use std::marker::PhantomData;

use relq_error::{DbError, DbErrorKind, Result};

use super::QueryProvider;
use crate::expr::{self, Expr};
use crate::projection::reader::ProjectionReader;
use crate::types::FromValue;

/// A deferred query producing values of type `T`.
///
/// Holds a provider and a composed expression. Nothing runs until `execute`
/// is called, and every call runs the full pipeline again.
pub struct Query<T> {
    provider: QueryProvider,
    expr: Expr,
    _element: PhantomData<fn() -> T>,
}

impl<T> Query<T> {
    pub(crate) fn new(provider: QueryProvider, expr: Expr) -> Self {
        Query {
            provider,
            expr,
            _element: PhantomData,
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    pub fn provider(&self) -> &QueryProvider {
        &self.provider
    }

    /// Command text this query currently translates to.
    pub fn sql(&self) -> Result<String> {
        Ok(self.provider.translate(self.expr.clone())?.sql)
    }

    /// Project each element through `selector`, a single parameter lambda.
    pub fn select<U>(&self, selector: Expr) -> Query<U> {
        self.derive(expr::select(self.expr.clone(), selector))
    }

    /// Keep elements matching `predicate`, a single parameter lambda.
    pub fn filter(&self, predicate: Expr) -> Query<T> {
        self.derive(expr::filter(self.expr.clone(), predicate))
    }

    /// Inner join on equal keys.
    pub fn join<I, U>(
        &self,
        inner: &Query<I>,
        outer_key: Expr,
        inner_key: Expr,
        result_selector: Expr,
    ) -> Query<U> {
        self.derive(expr::join(
            self.expr.clone(),
            inner.expr.clone(),
            outer_key,
            inner_key,
            result_selector,
        ))
    }

    /// This query as a nested list, for use inside a selector.
    pub fn to_list(&self) -> Expr {
        expr::to_list(self.expr.clone())
    }

    /// `EXISTS` predicate over this query, for use inside another query's
    /// predicate. Only supported on an unfiltered entity query.
    pub fn exists(&self, predicate: Expr) -> Expr {
        expr::exists(self.expr.clone(), predicate)
    }

    pub fn not_exists(&self, predicate: Expr) -> Expr {
        expr::not_exists(self.expr.clone(), predicate)
    }

    fn derive<U>(&self, expr: Expr) -> Query<U> {
        Query::new(self.provider.clone(), expr)
    }
}

impl<T: FromValue> Query<T> {
    /// Translate and execute the query.
    pub fn execute(&self) -> Result<QueryResults<T>> {
        let reader = self.provider.execute(self.expr.clone())?;
        Ok(QueryResults::new(reader))
    }

    /// Execute the query and collect every result.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.execute()?.reader()?.collect()
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Query::new(self.provider.clone(), self.expr.clone())
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("expr", &self.expr).finish()
    }
}

impl<T> fmt::Display for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

/// Results of a single query execution.
///
/// The rows can only be read once.
pub struct QueryResults<T> {
    reader: Option<ProjectionReader>,
    _element: PhantomData<fn() -> T>,
}

impl<T: FromValue> QueryResults<T> {
    fn new(reader: ProjectionReader) -> Self {
        QueryResults {
            reader: Some(reader),
            _element: PhantomData,
        }
    }

    /// Take the iterator over the results.
    ///
    /// Errors if called more than once.
    pub fn reader(&mut self) -> Result<ResultIter<T>> {
        match self.reader.take() {
            Some(reader) => Ok(ResultIter {
                reader,
                _element: PhantomData,
            }),
            None => Err(DbError::new("Query results can only be enumerated once")
                .with_kind(DbErrorKind::SinglePass)),
        }
    }
}

impl<T> fmt::Debug for QueryResults<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults")
            .field("reader", &self.reader)
            .finish()
    }
}

/// Iterator over typed query results.
pub struct ResultIter<T> {
    reader: ProjectionReader,
    _element: PhantomData<fn() -> T>,
}

impl<T: FromValue> Iterator for ResultIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.reader.next()?;
        Some(value.and_then(T::from_value))
    }
}

impl<T> fmt::Debug for ResultIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultIter")
            .field("reader", &self.reader)
            .finish()
    }
}

//! Backend-agnostic filter expression tree (spec.md §4.5).
//!
//! `FilterExpr` is the common core every `FilterBuilder` produces.
//! Literals are carried as `serde_json::Value` data, never interpolated
//! into strings, so a real backend's `to_native()` translation has
//! something to parameterize against instead of a formatted query string.

use serde_json::Value;

/// A field/value filter expression, backend-agnostic where possible.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Lt(String, Value),
    In(String, Vec<Value>),
    Between(String, Value, Value),
    Contains(String, Value),
    StartsWith(String, String),
    MatchesRegex(String, String),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    /// Always-true predicate (an unfiltered query).
    All,
}

impl Default for FilterExpr {
    fn default() -> Self {
        FilterExpr::All
    }
}

impl FilterExpr {
    /// Evaluate the expression against a field map. This is the
    /// in-process stand-in for what a real adapter's `to_native()`
    /// translation would hand to its query engine; mock adapters use it
    /// directly since they have no wire protocol to translate into.
    pub fn evaluate(&self, fields: &std::collections::HashMap<String, Value>) -> bool {
        match self {
            FilterExpr::All => true,
            FilterExpr::Eq(k, v) => fields.get(k) == Some(v),
            FilterExpr::Ne(k, v) => fields.get(k) != Some(v),
            FilterExpr::Gt(k, v) => compare_numeric(fields.get(k), v, |a, b| a > b),
            FilterExpr::Lt(k, v) => compare_numeric(fields.get(k), v, |a, b| a < b),
            FilterExpr::In(k, vs) => fields.get(k).map(|f| vs.contains(f)).unwrap_or(false),
            FilterExpr::Between(k, lo, hi) => {
                compare_numeric(fields.get(k), lo, |a, b| a >= b)
                    && compare_numeric(fields.get(k), hi, |a, b| a <= b)
            }
            FilterExpr::Contains(k, v) => match (fields.get(k), v) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.contains(needle),
                _ => false,
            },
            FilterExpr::StartsWith(k, prefix) => matches!(
                fields.get(k),
                Some(Value::String(s)) if s.starts_with(prefix.as_str())
            ),
            FilterExpr::MatchesRegex(k, pattern) => {
                let Ok(re) = regex::Regex::new(pattern) else {
                    return false;
                };
                matches!(fields.get(k), Some(Value::String(s)) if re.is_match(s))
            }
            FilterExpr::And(exprs) => exprs.iter().all(|e| e.evaluate(fields)),
            FilterExpr::Or(exprs) => exprs.iter().any(|e| e.evaluate(fields)),
            FilterExpr::Not(inner) => !inner.evaluate(fields),
        }
    }
}

fn compare_numeric(field: Option<&Value>, literal: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (field.and_then(Value::as_f64), literal.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// Fluent builder shared by all backend-specific `FilterBuilder`s.
///
/// Each backend wraps one of these and adds its own native knobs
/// (projection/sort/limit for relational, similarity threshold for
/// vector, depth/edge-types for graph) before calling `to_native()`.
#[derive(Debug, Clone, Default)]
pub struct ExprBuilder {
    clauses: Vec<FilterExpr>,
}

impl ExprBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(FilterExpr::Eq(field.into(), value.into()));
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(FilterExpr::Ne(field.into(), value.into()));
        self
    }

    pub fn gt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(FilterExpr::Gt(field.into(), value.into()));
        self
    }

    pub fn lt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(FilterExpr::Lt(field.into(), value.into()));
        self
    }

    pub fn in_(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.clauses.push(FilterExpr::In(field.into(), values));
        self
    }

    pub fn between(
        mut self,
        field: impl Into<String>,
        lo: impl Into<Value>,
        hi: impl Into<Value>,
    ) -> Self {
        self.clauses
            .push(FilterExpr::Between(field.into(), lo.into(), hi.into()));
        self
    }

    pub fn contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses
            .push(FilterExpr::Contains(field.into(), value.into()));
        self
    }

    pub fn starts_with(mut self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.clauses
            .push(FilterExpr::StartsWith(field.into(), prefix.into()));
        self
    }

    pub fn matches_regex(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.clauses
            .push(FilterExpr::MatchesRegex(field.into(), pattern.into()));
        self
    }

    pub fn or_where(mut self, exprs: Vec<FilterExpr>) -> Self {
        self.clauses.push(FilterExpr::Or(exprs));
        self
    }

    pub fn not(mut self, expr: FilterExpr) -> Self {
        self.clauses.push(FilterExpr::Not(Box::new(expr)));
        self
    }

    /// Inject a row-level security predicate (spec.md §4.3 step 3). The
    /// gate calls this, never the caller — it must never trust
    /// caller-supplied `owner_id` metadata.
    pub fn and_owner_or_read_all(mut self, owner_id: &str, has_read_all: bool) -> Self {
        if !has_read_all {
            self.clauses
                .push(FilterExpr::Eq("owner_id".to_string(), owner_id.into()));
        }
        self
    }

    /// Collapse accumulated clauses into a single AND expression.
    pub fn build(self) -> FilterExpr {
        match self.clauses.len() {
            0 => FilterExpr::All,
            1 => self.clauses.into_iter().next().unwrap(),
            _ => FilterExpr::And(self.clauses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_of_eq_and_gt() {
        let expr = ExprBuilder::new().eq("title", "A").gt("score", 1).build();
        let mut fields = std::collections::HashMap::new();
        fields.insert("title".to_string(), Value::from("A"));
        fields.insert("score".to_string(), Value::from(2));
        assert!(expr.evaluate(&fields));

        fields.insert("score".to_string(), Value::from(0));
        assert!(!expr.evaluate(&fields));
    }

    #[test]
    fn owner_predicate_skipped_for_read_all() {
        let expr = ExprBuilder::new()
            .and_owner_or_read_all("alice", true)
            .build();
        assert_eq!(expr, FilterExpr::All);

        let expr = ExprBuilder::new()
            .and_owner_or_read_all("alice", false)
            .build();
        assert_eq!(expr, FilterExpr::Eq("owner_id".to_string(), "alice".into()));
    }

    #[test]
    fn starts_with_and_regex() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("name".to_string(), Value::from("hello-world"));

        assert!(ExprBuilder::new()
            .starts_with("name", "hello")
            .build()
            .evaluate(&fields));
        assert!(ExprBuilder::new()
            .matches_regex("name", "^hello-\\w+$")
            .build()
            .evaluate(&fields));
        assert!(!ExprBuilder::new()
            .matches_regex("name", "^goodbye")
            .build()
            .evaluate(&fields));
    }

    #[test]
    fn not_negates() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("x".to_string(), Value::from(1));
        let expr = ExprBuilder::new().not(FilterExpr::Eq("x".to_string(), 1.into())).build();
        assert!(!expr.evaluate(&fields));
    }
}

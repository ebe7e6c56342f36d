//! Per-backend `FilterBuilder`s and their native query forms.
//!
//! `to_native()` is the only path that produces a form an adapter will
//! accept — callers never hand adapters a raw `FilterExpr`.

use super::filter::{ExprBuilder, FilterExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// Native query form accepted by the relational adapter's `query()`.
#[derive(Debug, Clone, Default)]
pub struct RelationalNativeQuery {
    pub filter: FilterExpr,
    pub projection: Vec<String>,
    pub sort: Vec<(String, SortDir)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationalFilterBuilder {
    expr: ExprBuilder,
    projection: Vec<String>,
    sort: Vec<(String, SortDir)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl RelationalFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: impl FnOnce(ExprBuilder) -> ExprBuilder) -> Self {
        self.expr = f(self.expr);
        self
    }

    pub fn project(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.sort.push((field.into(), dir));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn to_native(self) -> RelationalNativeQuery {
        RelationalNativeQuery {
            filter: self.expr.build(),
            projection: self.projection,
            sort: self.sort,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Native query form accepted by the document adapter's metadata filter.
#[derive(Debug, Clone, Default)]
pub struct DocumentNativeQuery {
    pub filter: FilterExpr,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilterBuilder {
    expr: ExprBuilder,
}

impl DocumentFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: impl FnOnce(ExprBuilder) -> ExprBuilder) -> Self {
        self.expr = f(self.expr);
        self
    }

    pub fn to_native(self) -> DocumentNativeQuery {
        DocumentNativeQuery {
            filter: self.expr.build(),
        }
    }
}

/// Native query form accepted by the vector adapter's `search()`.
#[derive(Debug, Clone)]
pub struct VectorNativeQuery {
    pub query_vector: Vec<f32>,
    pub k: usize,
    pub filter: FilterExpr,
    /// Vector-specific: minimum similarity score to keep a hit.
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorFilterBuilder {
    expr: ExprBuilder,
    query_vector: Vec<f32>,
    k: usize,
    similarity_threshold: Option<f32>,
}

impl VectorFilterBuilder {
    pub fn new(query_vector: Vec<f32>, k: usize) -> Self {
        Self {
            expr: ExprBuilder::new(),
            query_vector,
            k,
            similarity_threshold: None,
        }
    }

    pub fn filter(mut self, f: impl FnOnce(ExprBuilder) -> ExprBuilder) -> Self {
        self.expr = f(self.expr);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn to_native(self) -> VectorNativeQuery {
        VectorNativeQuery {
            query_vector: self.query_vector,
            k: self.k,
            filter: self.expr.build(),
            similarity_threshold: self.similarity_threshold,
        }
    }
}

/// Native query form accepted by the graph adapter's `query_pattern`/`traverse`.
#[derive(Debug, Clone, Default)]
pub struct GraphNativeQuery {
    pub filter: FilterExpr,
    pub start_ids: Vec<uuid::Uuid>,
    /// Graph-specific: traversal depth bound.
    pub depth: u32,
    /// Graph-specific: edge types allowed during traversal.
    pub edge_types: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphFilterBuilder {
    expr: ExprBuilder,
    start_ids: Vec<uuid::Uuid>,
    depth: u32,
    edge_types: Vec<String>,
}

impl GraphFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: impl FnOnce(ExprBuilder) -> ExprBuilder) -> Self {
        self.expr = f(self.expr);
        self
    }

    pub fn from(mut self, ids: Vec<uuid::Uuid>) -> Self {
        self.start_ids = ids;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn edge_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.edge_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_native(self) -> GraphNativeQuery {
        GraphNativeQuery {
            filter: self.expr.build(),
            start_ids: self.start_ids,
            depth: self.depth,
            edge_types: self.edge_types,
        }
    }
}

/// Union of the four native query forms, keyed implicitly by variant.
/// This is what `PolyglotPlanner::execute` takes one of per backend.
#[derive(Debug, Clone)]
pub enum NativeFilter {
    Relational(RelationalNativeQuery),
    Document(DocumentNativeQuery),
    Vector(VectorNativeQuery),
    Graph(GraphNativeQuery),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_builder_collects_knobs() {
        let q = RelationalFilterBuilder::new()
            .filter(|e| e.eq("title", "A"))
            .project(["id", "title"])
            .sort_by("title", SortDir::Asc)
            .limit(10)
            .offset(5)
            .to_native();
        assert_eq!(q.projection, vec!["id", "title"]);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, Some(5));
    }

    #[test]
    fn vector_builder_carries_threshold() {
        let q = VectorFilterBuilder::new(vec![0.1, 0.2], 5)
            .similarity_threshold(0.8)
            .to_native();
        assert_eq!(q.k, 5);
        assert_eq!(q.similarity_threshold, Some(0.8));
    }
}

//! `PolyglotPlanner` — composes per-backend queries under a join
//! semantics (spec.md §4.5, C5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

use crate::adapter::{AdapterError, AdapterResult, BackendKind};
use crate::error::CoordinatorError;
use crate::model::DocumentId;

use super::builders::NativeFilter;
use super::filter::FilterExpr;

/// Maximum length of the `id ∈ {…}` constraint the planner will
/// propagate between stages of a `Sequential` join.
///
/// Open question in spec.md §9: the source leaves the threshold for a
/// production implementation to decide. This crate makes it the
/// planner's responsibility (rather than each adapter's) and fixes it
/// here; see DESIGN.md.
pub const MAX_SEQUENTIAL_ID_CONSTRAINT: usize = 10_000;

/// A single backend's hit for a document id, with a rank used to order
/// `Union` results (smallest rank first, then id).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedId {
    pub id: DocumentId,
    pub rank: f64,
}

/// Anything the planner can run a native filter against.
#[async_trait]
pub trait QueryableBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    async fn execute_filter(&self, filter: &NativeFilter) -> AdapterResult<Vec<RankedId>>;
}

/// Join semantics for a polyglot query (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Intersection,
    Union,
    Sequential,
    /// Chooses parallel execution for Intersection/Union, sequential for Sequential.
    Auto,
}

/// Result of a polyglot query.
#[derive(Debug, Clone, Default)]
pub struct PolyglotResult {
    pub ids: Vec<DocumentId>,
    pub per_backend_ids: HashMap<BackendKind, Vec<DocumentId>>,
    pub errors: HashMap<BackendKind, String>,
    pub latencies_per_backend: HashMap<BackendKind, Duration>,
}

/// Extracts a document id from a loosely-typed record by trying field
/// names in order: `document_id`, `id`, `_id` (spec.md §4.5 edge cases).
pub fn extract_id(record: &Value) -> Option<DocumentId> {
    for key in ["document_id", "id", "_id"] {
        if let Some(v) = record.get(key) {
            if let Some(s) = v.as_str() {
                if let Ok(id) = DocumentId::parse_str(s) {
                    return Some(id);
                }
            }
        }
    }
    None
}

/// Composes per-backend filter execution under `Intersection`/`Union`/
/// `Sequential` join semantics.
pub struct PolyglotPlanner {
    backends: HashMap<BackendKind, Arc<dyn QueryableBackend>>,
}

impl PolyglotPlanner {
    pub fn new(backends: Vec<Arc<dyn QueryableBackend>>) -> Self {
        let backends = backends.into_iter().map(|b| (b.kind(), b)).collect();
        Self { backends }
    }

    /// `Auto` runs backends in parallel and joins by intersection — the
    /// same strategy `Intersection` uses — since join semantics (unlike
    /// execution strategy) cannot be inferred; callers that want `Union`
    /// results must request it explicitly. See DESIGN.md for this
    /// resolution of spec.md §4.5's `Auto` mode.
    pub async fn execute(
        &self,
        filters_per_backend: HashMap<BackendKind, NativeFilter>,
        join: JoinKind,
    ) -> Result<PolyglotResult, CoordinatorError> {
        match join {
            JoinKind::Sequential => self.execute_sequential(filters_per_backend).await,
            JoinKind::Union => self.execute_parallel(filters_per_backend, JoinKind::Union).await,
            JoinKind::Intersection | JoinKind::Auto => {
                self.execute_parallel(filters_per_backend, JoinKind::Intersection).await
            }
        }
    }

    async fn execute_parallel(
        &self,
        filters_per_backend: HashMap<BackendKind, NativeFilter>,
        join: JoinKind,
    ) -> Result<PolyglotResult, CoordinatorError> {
        let kinds: Vec<BackendKind> = filters_per_backend.keys().copied().collect();
        let futures = filters_per_backend.into_iter().map(|(kind, filter)| {
            let backend = self.backends.get(&kind).cloned();
            async move {
                let start = Instant::now();
                let outcome = match backend {
                    Some(b) => b.execute_filter(&filter).await,
                    None => Err(AdapterError::Permanent {
                        backend: kind,
                        cause: "no backend registered for this kind".to_string(),
                    }),
                };
                (kind, outcome, start.elapsed())
            }
        });

        let results = join_all(futures).await;

        let mut per_backend_ids = HashMap::new();
        let mut per_backend_ranked: HashMap<BackendKind, Vec<RankedId>> = HashMap::new();
        let mut errors = HashMap::new();
        let mut latencies = HashMap::new();

        for (kind, outcome, elapsed) in results {
            latencies.insert(kind, elapsed);
            match outcome {
                Ok(hits) => {
                    per_backend_ids.insert(kind, hits.iter().map(|h| h.id).collect());
                    per_backend_ranked.insert(kind, hits);
                }
                Err(e) => {
                    // A non-`Union` join has no retry path of its own by the
                    // time an error reaches here (adapters already exhausted
                    // their own retries), so any error aborts the whole plan
                    // rather than silently narrowing the result.
                    if join != JoinKind::Union {
                        return Err(CoordinatorError::from(e));
                    }
                    errors.insert(kind, e.to_string());
                }
            }
        }

        let ids = match join {
            JoinKind::Intersection => intersect(&per_backend_ids, &kinds),
            JoinKind::Union | JoinKind::Auto => union_ranked(per_backend_ranked),
            JoinKind::Sequential => unreachable!("handled by execute_sequential"),
        };

        Ok(PolyglotResult {
            ids,
            per_backend_ids,
            errors,
            latencies_per_backend: latencies,
        })
    }

    async fn execute_sequential(
        &self,
        mut filters_per_backend: HashMap<BackendKind, NativeFilter>,
    ) -> Result<PolyglotResult, CoordinatorError> {
        // Deterministic stage order: Relational, Document, Vector, Graph.
        let order = [
            BackendKind::Relational,
            BackendKind::Document,
            BackendKind::Vector,
            BackendKind::Graph,
        ];

        let mut per_backend_ids = HashMap::new();
        let mut errors = HashMap::new();
        let mut latencies = HashMap::new();
        let mut carry: Option<Vec<DocumentId>> = None;

        for kind in order {
            let Some(mut filter) = filters_per_backend.remove(&kind) else {
                continue;
            };

            if let Some(ids) = &carry {
                if ids.is_empty() {
                    // Short-circuit on empty intermediate result.
                    break;
                }
                if ids.len() > MAX_SEQUENTIAL_ID_CONSTRAINT {
                    return Err(CoordinatorError::ValidationFailed(format!(
                        "sequential join id constraint too large: {} ids exceeds limit {}",
                        ids.len(),
                        MAX_SEQUENTIAL_ID_CONSTRAINT
                    )));
                }
                filter = constrain_ids(filter, ids);
            }

            let backend = self.backends.get(&kind).cloned().ok_or_else(|| {
                CoordinatorError::Permanent {
                    backend: kind,
                    cause: "no backend registered for this kind".to_string(),
                }
            })?;

            let start = Instant::now();
            let outcome = backend.execute_filter(&filter).await;
            latencies.insert(kind, start.elapsed());

            match outcome {
                Ok(hits) => {
                    let ids: Vec<DocumentId> = hits.iter().map(|h| h.id).collect();
                    per_backend_ids.insert(kind, ids.clone());
                    carry = Some(ids);
                }
                Err(e) => {
                    // Sequential is not Union either; same rule applies.
                    return Err(CoordinatorError::from(e));
                }
            }
        }

        Ok(PolyglotResult {
            ids: carry.unwrap_or_default(),
            per_backend_ids,
            errors,
            latencies_per_backend: latencies,
        })
    }
}

fn intersect(
    per_backend_ids: &HashMap<BackendKind, Vec<DocumentId>>,
    kinds: &[BackendKind],
) -> Vec<DocumentId> {
    let mut iter = kinds.iter().filter_map(|k| per_backend_ids.get(k));
    let Some(first) = iter.next() else {
        return vec![];
    };
    let mut acc: std::collections::HashSet<DocumentId> = first.iter().copied().collect();
    for ids in iter {
        let set: std::collections::HashSet<DocumentId> = ids.iter().copied().collect();
        acc = acc.intersection(&set).copied().collect();
    }
    let mut result: Vec<DocumentId> = acc.into_iter().collect();
    result.sort();
    result
}

fn union_ranked(per_backend: HashMap<BackendKind, Vec<RankedId>>) -> Vec<DocumentId> {
    let mut best_rank: HashMap<DocumentId, f64> = HashMap::new();
    for hits in per_backend.values() {
        for hit in hits {
            best_rank
                .entry(hit.id)
                .and_modify(|r| {
                    if hit.rank < *r {
                        *r = hit.rank;
                    }
                })
                .or_insert(hit.rank);
        }
    }
    let mut ids: Vec<(DocumentId, f64)> = best_rank.into_iter().collect();
    ids.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ids.into_iter().map(|(id, _)| id).collect()
}

/// Injects `(owner_id = owner_id) OR has(ReadAll)` into a caller-supplied
/// filter before it ever reaches an adapter — the only place row-level
/// read scoping happens, since a `NativeFilter` arriving at `execute()`
/// cannot otherwise be trusted to have been built through `SecurityGate`.
pub fn scope_filter(filter: NativeFilter, owner_id: &str, has_read_all: bool) -> NativeFilter {
    if has_read_all {
        return filter;
    }
    let owner_expr = FilterExpr::Eq("owner_id".to_string(), Value::from(owner_id));
    match filter {
        NativeFilter::Relational(mut q) => {
            q.filter = and_with(q.filter, owner_expr);
            NativeFilter::Relational(q)
        }
        NativeFilter::Document(mut q) => {
            q.filter = and_with(q.filter, owner_expr);
            NativeFilter::Document(q)
        }
        NativeFilter::Vector(mut q) => {
            q.filter = and_with(q.filter, owner_expr);
            NativeFilter::Vector(q)
        }
        NativeFilter::Graph(mut q) => {
            q.filter = and_with(q.filter, owner_expr);
            NativeFilter::Graph(q)
        }
    }
}

fn constrain_ids(filter: NativeFilter, ids: &[DocumentId]) -> NativeFilter {
    let id_values: Vec<Value> = ids.iter().map(|id| Value::from(id.to_string())).collect();
    let in_expr = FilterExpr::In("id".to_string(), id_values);
    match filter {
        NativeFilter::Relational(mut q) => {
            q.filter = and_with(q.filter, in_expr);
            NativeFilter::Relational(q)
        }
        NativeFilter::Document(mut q) => {
            q.filter = and_with(q.filter, in_expr);
            NativeFilter::Document(q)
        }
        NativeFilter::Vector(mut q) => {
            q.filter = and_with(q.filter, in_expr);
            NativeFilter::Vector(q)
        }
        NativeFilter::Graph(mut q) => {
            q.filter = and_with(q.filter, in_expr);
            NativeFilter::Graph(q)
        }
    }
}

fn and_with(existing: FilterExpr, extra: FilterExpr) -> FilterExpr {
    match existing {
        FilterExpr::All => extra,
        FilterExpr::And(mut clauses) => {
            clauses.push(extra);
            FilterExpr::And(clauses)
        }
        other => FilterExpr::And(vec![other, extra]),
    }
}

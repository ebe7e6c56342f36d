//! In-memory mock of the graph backend.
//!
//! Nodes are `DocumentFragment`s with a `Graph` payload; edges are kept
//! separately in an adjacency list keyed by source id, since a fragment
//! has no edge field of its own (spec.md §3).

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{DocumentFragment, DocumentId, FragmentPayload};
use crate::query::planner::{QueryableBackend, RankedId};
use crate::query::NativeFilter;

use super::{AdapterError, AdapterResult, BackendAdapter, BackendKind, Health, PutOptions};

#[derive(Debug, Clone)]
pub struct Edge {
    pub to: DocumentId,
    pub edge_type: String,
}

#[derive(Default)]
struct Faults {
    fail_next_put: Option<AdapterError>,
    health: Option<Health>,
}

pub struct MockGraphAdapter {
    rows: RwLock<HashMap<DocumentId, DocumentFragment>>,
    edges: RwLock<HashMap<DocumentId, Vec<Edge>>>,
    faults: StdMutex<Faults>,
}

impl Default for MockGraphAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraphAdapter {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            edges: RwLock::new(HashMap::new()),
            faults: StdMutex::new(Faults::default()),
        }
    }

    pub fn fail_next_put(&self, err: AdapterError) {
        self.faults.lock().unwrap().fail_next_put = Some(err);
    }

    pub fn set_health(&self, health: Health) {
        self.faults.lock().unwrap().health = Some(health);
    }

    /// Backend-specific operation (spec.md §4.1).
    pub async fn upsert_node(
        &self,
        id: DocumentId,
        owner_id: String,
        labels: Vec<String>,
        props: HashMap<String, serde_json::Value>,
    ) -> AdapterResult<()> {
        self.rows.write().await.insert(
            id,
            DocumentFragment {
                id,
                owner_id,
                version: 1,
                deleted_at: None,
                payload: FragmentPayload::Graph { labels, props },
            },
        );
        Ok(())
    }

    /// Backend-specific operation: add a directed edge between two nodes.
    pub async fn upsert_edge(&self, from: DocumentId, to: DocumentId, edge_type: &str) {
        self.edges
            .write()
            .await
            .entry(from)
            .or_default()
            .push(Edge {
                to,
                edge_type: edge_type.to_string(),
            });
    }

    /// Backend-specific operation: breadth-first traversal bounded by
    /// `depth`, restricted to `edge_types` when non-empty.
    pub async fn traverse(
        &self,
        start_ids: &[DocumentId],
        edge_types: &[String],
        depth: u32,
    ) -> AdapterResult<Vec<DocumentId>> {
        let edges = self.edges.read().await;
        let mut visited: Vec<DocumentId> = start_ids.to_vec();
        let mut frontier: Vec<DocumentId> = start_ids.to_vec();

        for _ in 0..depth {
            let mut next = Vec::new();
            for id in &frontier {
                if let Some(out) = edges.get(id) {
                    for edge in out {
                        if !edge_types.is_empty() && !edge_types.contains(&edge.edge_type) {
                            continue;
                        }
                        if !visited.contains(&edge.to) {
                            visited.push(edge.to);
                            next.push(edge.to);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(visited)
    }
}

#[async_trait]
impl BackendAdapter for MockGraphAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn get(&self, id: DocumentId) -> AdapterResult<DocumentFragment> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AdapterError::NotFound)
    }

    async fn get_many(
        &self,
        ids: &[DocumentId],
    ) -> AdapterResult<HashMap<DocumentId, DocumentFragment>> {
        let rows = self.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|f| (*id, f.clone())))
            .collect())
    }

    async fn exists(&self, ids: &[DocumentId]) -> AdapterResult<HashMap<DocumentId, bool>> {
        let rows = self.rows.read().await;
        Ok(ids.iter().map(|id| (*id, rows.contains_key(id))).collect())
    }

    async fn put(
        &self,
        id: DocumentId,
        fragment: DocumentFragment,
        options: PutOptions,
    ) -> AdapterResult<()> {
        if let Some(err) = self.faults.lock().unwrap().fail_next_put.take() {
            return Err(err);
        }
        let mut rows = self.rows.write().await;
        if let Some(expected) = options.if_version {
            if let Some(existing) = rows.get(&id) {
                if existing.version != expected {
                    return Err(AdapterError::VersionConflict {
                        expected,
                        actual: existing.version,
                    });
                }
            }
        }
        rows.insert(id, fragment);
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> AdapterResult<()> {
        self.rows.write().await.remove(&id);
        self.edges.write().await.remove(&id);
        Ok(())
    }

    async fn health(&self) -> Health {
        self.faults.lock().unwrap().health.unwrap_or(Health::Ok)
    }
}

#[async_trait]
impl QueryableBackend for MockGraphAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn execute_filter(&self, filter: &NativeFilter) -> AdapterResult<Vec<RankedId>> {
        let NativeFilter::Graph(query) = filter else {
            return Err(AdapterError::Permanent {
                backend: BackendKind::Graph,
                cause: "wrong native filter variant for graph adapter".to_string(),
            });
        };

        let candidate_ids = if query.start_ids.is_empty() {
            self.rows.read().await.keys().copied().collect::<Vec<_>>()
        } else {
            self.traverse(&query.start_ids, &query.edge_types, query.depth.max(1))
                .await?
        };

        let rows = self.rows.read().await;
        let mut hits: Vec<RankedId> = candidate_ids
            .into_iter()
            .filter_map(|id| rows.get(&id).map(|f| (id, f)))
            .filter(|(_, f)| match &f.payload {
                FragmentPayload::Graph { props, .. } => {
                    let mut fields = props.clone();
                    fields.insert("owner_id".to_string(), f.owner_id.clone().into());
                    query.filter.evaluate(&fields)
                }
                _ => false,
            })
            .enumerate()
            .map(|(rank, (id, _))| RankedId { id, rank: rank as f64 })
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn traverse_follows_edges_up_to_depth() {
        let adapter = MockGraphAdapter::new();
        let a = DocumentId::new_v4();
        let b = DocumentId::new_v4();
        let c = DocumentId::new_v4();
        adapter.upsert_edge(a, b, "references").await;
        adapter.upsert_edge(b, c, "references").await;

        let one_hop = adapter.traverse(&[a], &[], 1).await.unwrap();
        assert!(one_hop.contains(&b));
        assert!(!one_hop.contains(&c));

        let two_hop = adapter.traverse(&[a], &[], 2).await.unwrap();
        assert!(two_hop.contains(&c));
    }

    #[tokio::test]
    async fn traverse_filters_by_edge_type() {
        let adapter = MockGraphAdapter::new();
        let a = DocumentId::new_v4();
        let b = DocumentId::new_v4();
        adapter.upsert_edge(a, b, "owns").await;

        let filtered = adapter
            .traverse(&[a], &["references".to_string()], 1)
            .await
            .unwrap();
        assert!(!filtered.contains(&b));
    }

    #[tokio::test]
    async fn delete_removes_node_and_outgoing_edges() {
        let adapter = MockGraphAdapter::new();
        let a = DocumentId::new_v4();
        let b = DocumentId::new_v4();
        adapter
            .upsert_node(a, "alice".into(), vec!["Doc".into()], HashMap::new())
            .await
            .unwrap();
        adapter.upsert_edge(a, b, "references").await;
        adapter.delete(a).await.unwrap();

        assert!(adapter.get(a).await.is_err());
        assert!(adapter.traverse(&[a], &[], 1).await.unwrap().is_empty());
    }
}

//! Polyglot search against real mock adapters (not the planner's own
//! `FixedBackend` test double): each backend applies its own filtering
//! semantics before the planner joins the per-backend hit lists.

use std::collections::HashMap;
use std::sync::Arc;

use polyglot_coordinator::adapter::{
    BackendAdapter, BackendKind, MockGraphAdapter, MockRelationalAdapter, MockVectorAdapter,
};
use polyglot_coordinator::model::{DocumentFragment, DocumentId, FragmentPayload};
use polyglot_coordinator::query::{
    GraphFilterBuilder, JoinKind, NativeFilter, PolyglotPlanner, QueryableBackend,
    RelationalFilterBuilder, VectorFilterBuilder,
};

fn relational_fragment(id: DocumentId, owner: &str) -> DocumentFragment {
    DocumentFragment {
        id,
        owner_id: owner.to_string(),
        version: 1,
        deleted_at: None,
        payload: FragmentPayload::Relational { attributes: HashMap::new() },
    }
}

fn id_filter(ids: &[DocumentId]) -> Vec<serde_json::Value> {
    ids.iter().map(|id| serde_json::Value::from(id.to_string())).collect()
}

/// Seeds three backends with overlapping id sets — relational
/// `{1,2,3,4}`, vector `{2,3,5}`, graph `{3,4,6}` — and confirms an
/// intersection join narrows down to exactly the common id, the same
/// shape `PolyglotPlanner`'s own unit tests cover with a stub backend,
/// but here driven through each adapter's actual `execute_filter`.
#[tokio::test]
async fn intersection_across_three_real_backends_narrows_to_common_id() {
    let relational = Arc::new(MockRelationalAdapter::new());
    let vector = Arc::new(MockVectorAdapter::new());
    let graph = Arc::new(MockGraphAdapter::new());

    let ids: Vec<DocumentId> = (0..6).map(|_| DocumentId::new_v4()).collect();
    let [a, b, c, d, e, f] = <[DocumentId; 6]>::try_from(ids.clone()).unwrap();

    for id in [a, b, c, d] {
        relational
            .put(id, relational_fragment(id, "alice"), Default::default())
            .await
            .unwrap();
    }

    // Vector/graph mock adapters filter against their own metadata/props
    // map, which has no automatic "id" field the way relational does —
    // it has to be placed there explicitly to filter by id.
    let query_vector = vec![1.0, 0.0, 0.0];
    for id in [b, c, e] {
        let mut metadata = HashMap::new();
        metadata.insert("id".to_string(), id.to_string().into());
        vector
            .upsert_vector(id, query_vector.clone(), "alice".to_string(), metadata)
            .await
            .unwrap();
    }

    for id in [c, d, f] {
        let mut props = HashMap::new();
        props.insert("id".to_string(), id.to_string().into());
        graph
            .upsert_node(id, "alice".to_string(), vec!["Document".to_string()], props)
            .await
            .unwrap();
    }

    let backends: Vec<Arc<dyn QueryableBackend>> = vec![relational.clone(), vector.clone(), graph.clone()];
    let planner = PolyglotPlanner::new(backends);

    let mut filters = HashMap::new();
    filters.insert(
        BackendKind::Relational,
        NativeFilter::Relational(RelationalFilterBuilder::new().filter(|e| e.in_("id", id_filter(&ids))).to_native()),
    );
    filters.insert(
        BackendKind::Vector,
        NativeFilter::Vector(
            VectorFilterBuilder::new(query_vector, ids.len())
                .filter(|e| e.in_("id", id_filter(&ids)))
                .to_native(),
        ),
    );
    filters.insert(
        BackendKind::Graph,
        NativeFilter::Graph(GraphFilterBuilder::new().filter(|e| e.in_("id", id_filter(&ids))).to_native()),
    );

    let result = planner.execute(filters, JoinKind::Intersection).await.unwrap();
    assert_eq!(result.ids, vec![c], "only id c is present in all three backends");
}

/// A filter naming a backend kind with no registered adapter fails the
/// whole intersection plan rather than silently narrowing the result.
#[tokio::test]
async fn intersection_surfaces_permanent_backend_error() {
    let relational = Arc::new(MockRelationalAdapter::new());
    let id = DocumentId::new_v4();
    relational.put(id, relational_fragment(id, "alice"), Default::default()).await.unwrap();
    // No graph backend registered with the planner at all; its filter
    // below therefore hits the planner's "no backend registered" path.
    let planner = PolyglotPlanner::new(vec![relational.clone() as Arc<dyn QueryableBackend>]);

    let mut filters = HashMap::new();
    filters.insert(
        BackendKind::Relational,
        NativeFilter::Relational(RelationalFilterBuilder::new().to_native()),
    );
    filters.insert(
        BackendKind::Graph,
        NativeFilter::Graph(GraphFilterBuilder::new().to_native()),
    );

    let result = planner.execute(filters, JoinKind::Intersection).await;
    assert!(matches!(result, Err(polyglot_coordinator::CoordinatorError::Permanent { backend: BackendKind::Graph, .. })));
}

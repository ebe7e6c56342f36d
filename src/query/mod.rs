//! `FilterBuilder` family and `PolyglotPlanner` (spec.md §4.5, C5).

pub mod builders;
pub mod filter;
pub mod planner;

pub use builders::{
    DocumentFilterBuilder, DocumentNativeQuery, GraphFilterBuilder, GraphNativeQuery, NativeFilter,
    RelationalFilterBuilder, RelationalNativeQuery, SortDir, VectorFilterBuilder,
    VectorNativeQuery,
};
pub use filter::{ExprBuilder, FilterExpr};
pub use planner::{
    extract_id, scope_filter, JoinKind, PolyglotPlanner, PolyglotResult, QueryableBackend,
    RankedId, MAX_SEQUENTIAL_ID_CONSTRAINT,
};

/// Reconciliation core: change detection, identity resolution, conflict
/// classification, and the per-card sync cycle.
pub mod conflict;
pub mod detect;
pub mod engine;
pub mod identity;

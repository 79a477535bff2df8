use haulflow_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an
/// aggregate. They are **transient** (not persisted) and are transformed into
/// events (which are persisted). Commands are rejected if invalid; events
/// represent accepted changes.
///
/// Commands must specify which aggregate they target via
/// `target_aggregate_id()`. This is what lets infrastructure route a command
/// to the right per-aggregate critical section: commands against different
/// aggregates proceed fully in parallel, commands against the same aggregate
/// are serialized.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}

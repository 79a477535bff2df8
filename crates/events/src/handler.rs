/// Execute an aggregate command deterministically (no IO, no async).
///
/// Canonical event-sourced lifecycle in one step:
///
/// 1. **Decide**: `aggregate.handle(command)` produces events (pure, no mutation)
/// 2. **Evolve**: each event is applied via `aggregate.apply(event)`
///
/// This mutates the aggregate in place. For the full pipeline (per-aggregate
/// locking, persistence, publication), use the infra command dispatcher; this
/// helper is for tests and inline processing.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: haulflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

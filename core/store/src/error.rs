use astra_types::CoreError;

/// Map a rusqlite failure onto the shared error taxonomy. Constraint
/// violations on the schema tables only ever happen on the primary key,
/// which callers treat as a benign idempotent no-op rather than routing
/// through here.
pub fn to_core(err: rusqlite::Error) -> CoreError {
    CoreError::Database(err.to_string())
}

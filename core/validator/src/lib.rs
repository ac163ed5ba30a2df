use std::time::Duration;

use astra_types::{CoreError, CoreResult, SchemaName};
use async_trait::async_trait;

/// Maximum time a deep-validation call may take before the validator gives
/// up on it and reports `ValidationUnavailable` instead of blocking the
/// caller.
pub const DEEP_VALIDATION_DEADLINE: Duration = Duration::from_millis(500);

/// Default per-record size ceiling enforced by shallow validation.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Outcome of a validation call. `Unavailable` is distinct from `Invalid`:
/// it means the validator could not reach a verdict in time, not that the
/// bytes are known-bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
    Unavailable,
}

/// Capability interface for deep, schema-aware validation delegated to the
/// plugin runtime. Implementations must respect the deadline passed to
/// them; the validator itself enforces a hard timeout regardless.
#[async_trait]
pub trait DeepValidator: Send + Sync {
    async fn validate_deep(&self, schema: SchemaName, bytes: &[u8]) -> CoreResult<bool>;
}

/// Enforces the closed schema set, per-schema file-identifier check and
/// size limits. Deep validation is optional and delegated through an
/// injected `DeepValidator`.
pub struct SchemaValidator {
    max_record_size: usize,
    deep: Option<Box<dyn DeepValidator>>,
}

impl SchemaValidator {
    pub fn new(max_record_size: usize) -> Self {
        Self {
            max_record_size,
            deep: None,
        }
    }

    pub fn with_deep_validator(mut self, deep: Box<dyn DeepValidator>) -> Self {
        self.deep = Some(deep);
        self
    }

    /// The closed set of schemas this validator (and the store) recognize.
    pub fn schemas(&self) -> &'static [SchemaName] {
        SchemaName::ALL
    }

    /// Shallow, synchronous-cost validation: non-empty, within the size
    /// limit, and the first four bytes match the schema's canonical file
    /// identifier.
    pub fn validate(&self, schema: SchemaName, bytes: &[u8]) -> CoreResult<()> {
        if bytes.is_empty() {
            return Err(CoreError::Validation("empty record".into()));
        }
        if bytes.len() > self.max_record_size {
            return Err(CoreError::Validation(format!(
                "record of {} bytes exceeds limit of {}",
                bytes.len(),
                self.max_record_size
            )));
        }
        let ident = schema.file_identifier();
        if bytes.len() < ident.len() || &bytes[..ident.len()] != ident {
            return Err(CoreError::Validation(format!(
                "file identifier mismatch for schema {schema}"
            )));
        }
        Ok(())
    }

    /// Deep validation, if a `DeepValidator` was injected. Bounded by
    /// `DEEP_VALIDATION_DEADLINE`; a timeout yields `Verdict::Unavailable`
    /// rather than blocking the caller or propagating an error.
    pub async fn validate_deep(&self, schema: SchemaName, bytes: &[u8]) -> Verdict {
        let Some(deep) = &self.deep else {
            return Verdict::Unavailable;
        };
        match tokio::time::timeout(DEEP_VALIDATION_DEADLINE, deep.validate_deep(schema, bytes)).await {
            Ok(Ok(true)) => Verdict::Valid,
            Ok(Ok(false)) => Verdict::Invalid,
            Ok(Err(err)) => {
                tracing::warn!(%err, %schema, "deep validation call failed");
                Verdict::Unavailable
            }
            Err(_) => {
                tracing::warn!(%schema, "deep validation timed out");
                Verdict::Unavailable
            }
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_SIZE)
    }
}

mod envelope;

use std::sync::Arc;
use std::time::Instant;

use astra_registry::{PeerRegistry, TrustScaledRateLimiter};
use astra_types::{CoreError, CoreResult, PeerId, SchemaName, TrustLevel};
use astra_validator::SchemaValidator;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use envelope::{Envelope, EnvelopeError};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub max_message_size: usize,
    pub max_schema_name: usize,
    pub max_query_size: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10 * 1024 * 1024,
            max_schema_name: 256,
            max_query_size: 4 * 1024,
        }
    }
}

/// The request kind encoded as the leading byte of an envelope's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Store,
    Query,
    Push,
}

impl RequestKind {
    fn from_tag(tag: u8) -> Result<Self, ExchangeError> {
        match tag {
            0 => Ok(RequestKind::Store),
            1 => Ok(RequestKind::Query),
            2 => Ok(RequestKind::Push),
            other => Err(ExchangeError::Validation(format!("unknown request kind tag {other}"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("framing error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("rejected: peer is below the required trust level")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("query exceeds max_query_size limit")]
    QueryTooLarge,
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] CoreError),
}

/// Capability interface that actually executes a parsed request -- backed,
/// in practice, by the record store and tip queue. Kept separate from the
/// protocol handler so the wire-level pipeline doesn't depend on either
/// concretely.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn store(
        &self,
        peer: &PeerId,
        schema: SchemaName,
        body: &[u8],
        signature: Option<Bytes>,
    ) -> CoreResult<Vec<u8>>;
    async fn query(&self, schema: SchemaName, body: &[u8]) -> CoreResult<Vec<u8>>;
    async fn push(
        &self,
        peer: &PeerId,
        schema: SchemaName,
        body: &[u8],
        signature: Option<Bytes>,
    ) -> CoreResult<Vec<u8>>;
}

/// Minimum trust level required to have a request considered at all.
pub const MIN_REQUEST_TRUST_LEVEL: TrustLevel = TrustLevel::Standard;

/// Runs the per-request pipeline: rate-limit, trust check, schema
/// validation, dispatch. Requests from peers below `MIN_REQUEST_TRUST_LEVEL`
/// are rejected before validation ever runs.
pub struct ExchangeHandler {
    config: ExchangeConfig,
    registry: Arc<PeerRegistry>,
    rate_limiter: Arc<TrustScaledRateLimiter>,
    validator: Arc<SchemaValidator>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ExchangeHandler {
    pub fn new(
        config: ExchangeConfig,
        registry: Arc<PeerRegistry>,
        rate_limiter: Arc<TrustScaledRateLimiter>,
        validator: Arc<SchemaValidator>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            config,
            registry,
            rate_limiter,
            validator,
            dispatcher,
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub async fn handle(&self, peer: &PeerId, envelope: Envelope, now: Instant) -> Result<Vec<u8>, ExchangeError> {
        let trust = self
            .registry
            .get(peer)
            .map(|p| p.trust_level)
            .unwrap_or_default();

        if !self.rate_limiter.admit(peer, trust, now) {
            return Err(ExchangeError::RateLimited);
        }

        if trust < MIN_REQUEST_TRUST_LEVEL {
            return Err(ExchangeError::Unauthorized);
        }

        if envelope.payload.is_empty() {
            return Err(ExchangeError::Validation("empty payload".into()));
        }
        let kind = RequestKind::from_tag(envelope.payload[0])?;
        let body = &envelope.payload[1..];

        if kind == RequestKind::Query && body.len() > self.config.max_query_size {
            return Err(ExchangeError::QueryTooLarge);
        }

        if kind != RequestKind::Query {
            self.validator
                .validate(envelope.schema, body)
                .map_err(|err| ExchangeError::Validation(err.to_string()))?;
        }

        let response = match kind {
            RequestKind::Store => {
                self.dispatcher
                    .store(peer, envelope.schema, body, envelope.signature.clone())
                    .await?
            }
            RequestKind::Query => self.dispatcher.query(envelope.schema, body).await?,
            RequestKind::Push => {
                self.dispatcher
                    .push(peer, envelope.schema, body, envelope.signature.clone())
                    .await?
            }
        };
        Ok(response)
    }
}

pub fn encode_request(kind: RequestKind, schema: SchemaName, body: &[u8]) -> Envelope {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(match kind {
        RequestKind::Store => 0,
        RequestKind::Query => 1,
        RequestKind::Push => 2,
    });
    payload.extend_from_slice(body);
    Envelope {
        schema,
        payload: Bytes::from(payload),
        signature: None,
    }
}

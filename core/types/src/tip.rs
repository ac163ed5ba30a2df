use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;
use crate::schema::SchemaName;

/// An announcement that some content exists elsewhere; never carries bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub peer_id: PeerId,
    pub cid: String,
    pub schema: SchemaName,
    pub received_at: i64,
    pub signature: Option<Vec<u8>>,
}

/// The policy computed once per incoming tip by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub auto_fetch: bool,
    pub auto_pin: bool,
    pub ttl: Duration,
    pub priority: u8,
    pub trusted: bool,
}

/// A partially-specified policy: any field left `None` falls through to the
/// next-lower-priority level during resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialTipPolicy {
    pub auto_fetch: Option<bool>,
    pub auto_pin: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    pub ttl: Option<Duration>,
    pub priority: Option<u8>,
    pub trusted: Option<bool>,
}

impl PartialTipPolicy {
    /// Overlay `self` on top of `base`: a field present in `self` wins, a
    /// missing one falls through to `base`.
    pub fn merge_onto(&self, base: PartialTipPolicy) -> PartialTipPolicy {
        PartialTipPolicy {
            auto_fetch: self.auto_fetch.or(base.auto_fetch),
            auto_pin: self.auto_pin.or(base.auto_pin),
            ttl: self.ttl.or(base.ttl),
            priority: self.priority.or(base.priority),
            trusted: self.trusted.or(base.trusted),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipQueueConfig {
    pub default_auto_fetch: bool,
    pub default_auto_pin: bool,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    pub default_priority: u8,
    pub max_queue_size: usize,
    pub max_in_flight_fetches: usize,
    pub schema_defaults: HashMap<SchemaName, PartialTipPolicy>,
    pub source_overrides: HashMap<PeerId, PartialTipPolicy>,
    pub source_schema_overrides: HashMap<PeerId, HashMap<SchemaName, PartialTipPolicy>>,
}

impl Default for TipQueueConfig {
    fn default() -> Self {
        Self {
            default_auto_fetch: false,
            default_auto_pin: false,
            default_ttl: Duration::from_secs(24 * 3600),
            default_priority: 0,
            max_queue_size: 10_000,
            max_in_flight_fetches: 16,
            schema_defaults: HashMap::new(),
            source_overrides: HashMap::new(),
            source_schema_overrides: HashMap::new(),
        }
    }
}

impl TipQueueConfig {
    /// Resolve the policy for a tip from `peer` on `schema`, per the
    /// priority order: source+schema override, then source override merged
    /// onto schema defaults, then schema defaults, then system defaults.
    ///
    /// `trusted = true` at the source-override level may only lengthen a
    /// shorter schema-level TTL, never shorten it.
    pub fn resolve(&self, peer: &PeerId, schema: SchemaName) -> ResolvedConfig {
        let system_default = PartialTipPolicy {
            auto_fetch: Some(self.default_auto_fetch),
            auto_pin: Some(self.default_auto_pin),
            ttl: Some(self.default_ttl),
            priority: Some(self.default_priority),
            trusted: Some(false),
        };
        let schema_default = self
            .schema_defaults
            .get(&schema)
            .copied()
            .unwrap_or_default();
        let schema_level = schema_default.merge_onto(system_default);

        if let Some(per_schema) = self
            .source_schema_overrides
            .get(peer)
            .and_then(|m| m.get(&schema))
        {
            if is_fully_defined(per_schema) {
                return finalize(*per_schema, schema_level);
            }
        }

        let source_override = self.source_overrides.get(peer).copied().unwrap_or_default();
        let merged = source_override.merge_onto(schema_level);
        finalize(merged, schema_level)
    }
}

fn is_fully_defined(p: &PartialTipPolicy) -> bool {
    p.auto_fetch.is_some()
        && p.auto_pin.is_some()
        && p.ttl.is_some()
        && p.priority.is_some()
        && p.trusted.is_some()
}

/// Apply the "trusted only lengthens TTL" rule, then collapse to a fully
/// resolved config. `merged` always has every field defined by the time it
/// reaches here because `schema_level` (its fallback) is itself fully
/// defined.
fn finalize(merged: PartialTipPolicy, schema_level: PartialTipPolicy) -> ResolvedConfig {
    let trusted = merged.trusted.unwrap_or(false);
    let schema_ttl = schema_level.ttl.unwrap_or_default();
    let mut ttl = merged.ttl.unwrap_or(schema_ttl);
    if trusted && ttl < schema_ttl {
        ttl = schema_ttl;
    }
    ResolvedConfig {
        auto_fetch: merged.auto_fetch.unwrap_or(false),
        auto_pin: merged.auto_pin.unwrap_or(false),
        ttl,
        priority: merged.priority.unwrap_or(0),
        trusted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TipQueueConfig {
        let mut schema_defaults = HashMap::new();
        schema_defaults.insert(
            SchemaName::Cdm,
            PartialTipPolicy {
                auto_fetch: Some(true),
                auto_pin: Some(true),
                ttl: Some(Duration::from_secs(48 * 3600)),
                priority: None,
                trusted: None,
            },
        );
        let mut source_overrides = HashMap::new();
        source_overrides.insert(
            PeerId::from("peer-p"),
            PartialTipPolicy {
                trusted: Some(true),
                ttl: Some(Duration::from_secs(72 * 3600)),
                ..Default::default()
            },
        );
        TipQueueConfig {
            default_auto_fetch: false,
            default_auto_pin: false,
            default_ttl: Duration::from_secs(24 * 3600),
            default_priority: 0,
            schema_defaults,
            source_overrides,
            ..Default::default()
        }
    }

    #[test]
    fn s3_policy_resolution() {
        let resolved = cfg().resolve(&PeerId::from("peer-p"), SchemaName::Cdm);
        assert_eq!(resolved.auto_fetch, true);
        assert_eq!(resolved.auto_pin, true);
        assert_eq!(resolved.ttl, Duration::from_secs(72 * 3600));
        assert!(resolved.trusted);
    }

    #[test]
    fn trusted_override_never_shortens_ttl() {
        let mut config = cfg();
        config.source_overrides.insert(
            PeerId::from("peer-short"),
            PartialTipPolicy {
                trusted: Some(true),
                ttl: Some(Duration::from_secs(3600)),
                ..Default::default()
            },
        );
        let resolved = config.resolve(&PeerId::from("peer-short"), SchemaName::Cdm);
        assert_eq!(resolved.ttl, Duration::from_secs(48 * 3600));
    }

    #[test]
    fn falls_through_to_system_default() {
        let resolved = cfg().resolve(&PeerId::from("unknown-peer"), SchemaName::Omm);
        assert_eq!(resolved.auto_fetch, false);
        assert_eq!(resolved.ttl, Duration::from_secs(24 * 3600));
    }
}

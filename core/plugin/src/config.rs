/// The configuration blob passed to `plugin_init`, little-endian:
/// `priv[32] || pub[65] || secret_len u32 || secret[N] || domains_csv_nul ||
/// epoch_period_ms u64 || max_skew_ms u64 || lease_ms u64`.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub signing_priv: [u8; 32],
    pub signing_pub: [u8; 65],
    pub secret: Vec<u8>,
    pub domains: Vec<String>,
    pub epoch_period_ms: u64,
    pub max_skew_ms: u64,
    pub lease_ms: u64,
}

impl PluginConfig {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 65 + 4 + self.secret.len() + 64);
        out.extend_from_slice(&self.signing_priv);
        out.extend_from_slice(&self.signing_pub);
        out.extend_from_slice(&(self.secret.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.secret);
        out.extend_from_slice(self.domains.join(",").as_bytes());
        out.push(0);
        out.extend_from_slice(&self.epoch_period_ms.to_le_bytes());
        out.extend_from_slice(&self.max_skew_ms.to_le_bytes());
        out.extend_from_slice(&self.lease_ms.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_in_declared_field_order() {
        let config = PluginConfig {
            signing_priv: [1u8; 32],
            signing_pub: [2u8; 65],
            secret: vec![3, 4, 5],
            domains: vec!["a.example".into(), "b.example".into()],
            epoch_period_ms: 60_000,
            max_skew_ms: 5_000,
            lease_ms: 3_600_000,
        };
        let encoded = config.encode();
        assert_eq!(&encoded[0..32], &[1u8; 32]);
        assert_eq!(&encoded[32..97], &[2u8; 65]);
        assert_eq!(&encoded[97..101], &3u32.to_le_bytes());
        assert_eq!(&encoded[101..104], &[3, 4, 5]);
        let domains_start = 104;
        let domains_str = b"a.example,b.example\0";
        assert_eq!(&encoded[domains_start..domains_start + domains_str.len()], domains_str);
        let tail = &encoded[domains_start + domains_str.len()..];
        assert_eq!(&tail[0..8], &60_000u64.to_le_bytes());
        assert_eq!(&tail[8..16], &5_000u64.to_le_bytes());
        assert_eq!(&tail[16..24], &3_600_000u64.to_le_bytes());
    }
}

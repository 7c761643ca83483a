//! Handshake configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::HandshakeError;
use crate::transcript::SUITE_ID;

/// Knobs shared by initiator and responder. Hooks (cookie policies, key-id
/// binders) are injected on the state machines directly, not here.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Accepted clock drift for init-payload timestamps.
    pub max_skew: chrono::Duration,
    /// Replay-store TTL. MUST be at least `2 * max_skew`.
    pub nonce_ttl: Duration,
    /// Suite whitelist. Responders refuse to serve, and initiators refuse
    /// to accept, suites outside this list.
    pub allowed_suites: Vec<String>,
    /// Initiator-side TOFU pins: DID → expected signing-key bytes.
    pub tofu_pins: HashMap<String, Vec<u8>>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_skew: chrono::Duration::minutes(2),
            nonce_ttl: Duration::from_secs(600),
            allowed_suites: vec![SUITE_ID.to_string()],
            tofu_pins: HashMap::new(),
        }
    }
}

impl HandshakeConfig {
    pub fn validate(&self) -> Result<(), HandshakeError> {
        let min_ttl = (self.max_skew * 2)
            .to_std()
            .map_err(|_| HandshakeError::InvalidInput("max_skew must be positive".into()))?;
        if self.nonce_ttl < min_ttl {
            return Err(HandshakeError::InvalidInput(
                "nonce_ttl must be at least twice max_skew".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn suite_allowed(&self) -> bool {
        self.allowed_suites.iter().any(|s| s == SUITE_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        HandshakeConfig::default().validate().unwrap();
    }

    #[test]
    fn short_ttl_is_rejected() {
        let config = HandshakeConfig {
            nonce_ttl: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_whitelist_contains_active_suite() {
        assert!(HandshakeConfig::default().suite_allowed());
    }
}

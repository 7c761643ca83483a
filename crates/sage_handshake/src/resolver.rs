//! DID resolution seam.
//!
//! The core never talks to a registry itself; it consumes a [`Resolver`]
//! that maps DIDs to signing and KEM keys. Chain-backed implementations
//! live outside this crate. [`StaticResolver`] is an in-memory
//! implementation for tests and embedders with a fixed peer set.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use sage_crypto::hpke::KemPublicKey;
use sage_crypto::keys::PublicSigningKey;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("DID not found: {0}")]
    NotFound(String),

    #[error("agent is not active: {0}")]
    Inactive(String),

    #[error("resolution failed: {0}")]
    Failed(String),
}

/// What a resolver knows about an agent.
#[derive(Debug, Clone)]
pub struct AgentMetadata {
    pub did: String,
    pub is_active: bool,
    pub signing_pub: PublicSigningKey,
    pub kem_pub: KemPublicKey,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Raw metadata lookup. Does not check liveness; the key accessors do.
    async fn resolve(&self, did: &str) -> Result<AgentMetadata, ResolverError>;

    /// Signing key of an active agent. Inactive agents are fatal here.
    async fn resolve_public_key(&self, did: &str) -> Result<PublicSigningKey, ResolverError> {
        let meta = self.resolve(did).await?;
        if !meta.is_active {
            return Err(ResolverError::Inactive(did.to_string()));
        }
        Ok(meta.signing_pub)
    }

    /// KEM key of an active agent. Inactive agents are fatal here.
    async fn resolve_kem_key(&self, did: &str) -> Result<KemPublicKey, ResolverError> {
        let meta = self.resolve(did).await?;
        if !meta.is_active {
            return Err(ResolverError::Inactive(did.to_string()));
        }
        Ok(meta.kem_pub)
    }
}

/// Fixed in-memory resolver. Registration happens before the resolver is
/// shared; lookups are read-only.
#[derive(Default)]
pub struct StaticResolver {
    agents: HashMap<String, AgentMetadata>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, meta: AgentMetadata) {
        self.agents.insert(meta.did.clone(), meta);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, did: &str) -> Result<AgentMetadata, ResolverError> {
        self.agents
            .get(did)
            .cloned()
            .ok_or_else(|| ResolverError::NotFound(did.to_string()))
    }
}

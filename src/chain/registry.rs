//! Configuration-time mapping from chain type tags to adapters

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Address, ChainType};

use super::adapter::ChainAdapter;

/// Immutable-after-construction adapter table
///
/// Built once by the host, then shared read-only. Lookups for an
/// unregistered chain type fail with `UnsupportedType`.
#[derive(Default, Clone)]
pub struct ChainRegistry {
    adapters: HashMap<ChainType, Arc<dyn ChainAdapter>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own chain type tag
    ///
    /// Re-registering a tag replaces the previous adapter.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain_type().clone(), adapter);
    }

    /// Look up the adapter for a chain type
    pub fn get(&self, chain_type: &ChainType) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(chain_type)
            .cloned()
            .ok_or_else(|| Error::UnsupportedType(chain_type.to_string()))
    }

    pub fn contains(&self, chain_type: &ChainType) -> bool {
        self.adapters.contains_key(chain_type)
    }

    /// Registered chain type tags, unordered
    pub fn chain_types(&self) -> impl Iterator<Item = &ChainType> {
        self.adapters.keys()
    }

    /// Parse an address string for a chain type in one step
    pub fn parse_address(&self, chain_type: &ChainType, s: &str) -> Result<Address> {
        self.get(chain_type)?.parse_address(s)
    }
}

impl std::fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("chain_types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

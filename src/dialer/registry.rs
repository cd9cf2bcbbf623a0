//! # Adapter Registry
//!
//! Process-wide mapping from a vendor name to its [`DialerAdapter`]. The
//! registry is populated once during startup and then moved behind `Arc`
//! into the shared application state; there is no mutation after that point,
//! so lookups need no locking.

use crate::dialer::DialerAdapter;
use crate::error::BridgeError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Read-mostly vendor name -> adapter mapping.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<DialerAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter under its vendor name (case-insensitive).
    ///
    /// Re-registering a name replaces the previous adapter; existing bridges
    /// keep the `Arc` they already resolved.
    pub fn register(&mut self, adapter: DialerAdapter) {
        let key = adapter.name().to_lowercase();

        if self.adapters.contains_key(&key) {
            warn!("Dialer '{}' already registered, overwriting", key);
        }

        self.adapters.insert(key.clone(), Arc::new(adapter));
        info!("Registered dialer: {}", key);
    }

    /// Look up an adapter by vendor name (case-insensitive).
    pub fn get(&self, name: &str) -> Result<Arc<DialerAdapter>, BridgeError> {
        self.adapters
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| BridgeError::UnknownVendor(name.to_string()))
    }

    /// Names of all registered vendors.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.adapters.contains_key(&name.to_lowercase())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::twilio;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = AdapterRegistry::new();
        registry.register(twilio::adapter());

        assert!(registry.get("twilio").is_ok());
        assert!(registry.get("Twilio").is_ok());
        assert!(registry.is_registered("TWILIO"));
        assert_eq!(registry.list(), vec!["twilio".to_string()]);
    }

    #[test]
    fn test_unknown_vendor_is_an_error() {
        let registry = AdapterRegistry::new();
        let err = registry.get("plivo").unwrap_err();
        assert!(matches!(err, BridgeError::UnknownVendor(_)));
    }
}

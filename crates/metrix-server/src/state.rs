//! Shared application state.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::IpAddr;
use std::sync::Arc;

use metrix_core::security::{Decryptor, Signer, TrustedSubnet};
use metrix_core::storage::{Storage, StoreError};

use crate::error::ApiError;

/// Transport protection settings, shared by the HTTP and RPC front ends.
#[derive(Default)]
pub(crate) struct Security {
    pub signer: Option<Signer>,
    pub decryptor: Option<Decryptor>,
    pub trusted: Option<TrustedSubnet>,
}

impl Security {
    /// `None` means no subnet restriction is configured.
    pub fn admits(&self, real_ip: Option<&str>) -> Option<bool> {
        let subnet = self.trusted.as_ref()?;
        Some(
            real_ip
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
                .is_some_and(|ip| subnet.contains(ip)),
        )
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<dyn Storage>,
    pub security: Arc<Security>,
}

impl AppState {
    pub fn new(store: Arc<dyn Storage>, security: Security) -> Self {
        Self {
            store,
            security: Arc::new(security),
        }
    }

    /// Runs a storage call on the blocking pool.
    pub async fn with_store<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ApiError::Internal(format!("storage task failed: {e}")))?
            .map_err(ApiError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits() {
        let open = Security::default();
        assert_eq!(open.admits(None), None);

        let closed = Security {
            trusted: Some("192.168.1.0/24".parse().unwrap()),
            ..Security::default()
        };
        assert_eq!(closed.admits(Some("192.168.1.10")), Some(true));
        assert_eq!(closed.admits(Some("10.0.0.1")), Some(false));
        assert_eq!(closed.admits(Some("not-an-ip")), Some(false));
        assert_eq!(closed.admits(None), Some(false));
    }
}

use std::sync::Arc;
use std::time::Instant;

use crate::crypto_service::CryptoService;
use crate::identity_lock::IdentityLocks;
use crate::key_store::KeyStore;

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppState {
    crypto: CryptoService,
    keys: Arc<dyn KeyStore>,
    locks: IdentityLocks,
    started: Instant,
}

impl AppState {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self {
            crypto: CryptoService::new(),
            keys,
            locks: IdentityLocks::new(),
            started: Instant::now(),
        }
    }

    pub fn crypto(&self) -> &CryptoService {
        &self.crypto
    }

    pub fn keys(&self) -> &dyn KeyStore {
        self.keys.as_ref()
    }

    pub fn locks(&self) -> &IdentityLocks {
        &self.locks
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

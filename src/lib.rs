// Key exchange service: routes, crypto facade and key storage
pub mod config;
pub mod crypto_service;
pub mod handlers;
pub mod identity_lock;
pub mod key_store;
pub mod models;
pub mod server;
pub mod state;

// Types needed to assemble the service outside this crate
pub use config::Config;
pub use crypto_service::{AesKey, CryptoError, CryptoService};
pub use key_store::{FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
pub use server::{router, run};
pub use state::AppState;

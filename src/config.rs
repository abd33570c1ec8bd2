use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::key_store::{FileKeyStore, KeyStore, MemoryKeyStore};

#[derive(Debug, Clone, Parser)]
#[command(name = "browser-key-exchange", version, about = "Browser-keyed AES/RSA key exchange service")]
pub struct Config {
    /// Address for the HTTP server to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: SocketAddr,

    /// Directory holding one `<browserid>.json` key file per browser
    #[arg(long, env = "AES_KEYS_DIR", default_value = "aes_keys")]
    pub key_dir: PathBuf,

    /// Keep keys in memory only; they are lost on restart
    #[arg(long, env = "IN_MEMORY_KEYS")]
    pub in_memory: bool,

    // log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}

impl Config {
    pub fn key_store(&self) -> Arc<dyn KeyStore> {
        if self.in_memory {
            tracing::warn!("using in-memory key store, keys will not survive a restart");
            Arc::new(MemoryKeyStore::new())
        } else {
            tracing::info!(dir = %self.key_dir.display(), "using file key store");
            Arc::new(FileKeyStore::new(&self.key_dir))
        }
    }
}

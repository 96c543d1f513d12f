use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Runtime settings, read from the environment. The binary loads a `.env`
/// file first, so a checked-in dotfile works as local configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub ui_dir: PathBuf,
    pub block_manifest: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store_path = env::var("FLOWVAULT_STORE")
            .unwrap_or_else(|_| "schemas.pkl".to_string())
            .into();
        let listen_addr = env::var("FLOWVAULT_LISTEN")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("FLOWVAULT_LISTEN is not a valid socket address")?;
        let ui_dir = env::var("FLOWVAULT_UI_DIR")
            .unwrap_or_else(|_| "ui".to_string())
            .into();
        let block_manifest = env::var("FLOWVAULT_BLOCKS").ok().map(PathBuf::from);
        Ok(Self {
            store_path,
            listen_addr,
            ui_dir,
            block_manifest,
        })
    }
}

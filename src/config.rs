//! Support for library configuration options

use std::path::Path;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The product name that is sent as the HTTP `User-Agent`.
/// Feel free to override it when initing this library.
pub static PRODUCT_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("caldav-mirror".to_string())));

/// How long a single sync request may take when no timeout is configured
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Where and how to connect to a CalDAV server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Read a config from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| Error::Config(format!("Unable to open file {:?}: {}", path, err)))?;
        serde_json::from_reader(file)
            .map_err(|err| Error::Config(format!("Invalid config in {:?}: {}", path, err)))
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// The current `User-Agent` value
pub fn user_agent() -> String {
    match PRODUCT_NAME.lock() {
        Ok(name) => name.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

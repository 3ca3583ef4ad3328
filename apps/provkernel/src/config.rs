//! # Daemon Configuration
//!
//! Read once at startup from `<root>/cfg/provkernel.toml` (or `--config`).
//! Every field has a default, so an absent default file is not an error.
//!
//! ```toml
//! root = "/opt/provkernel"
//!
//! [ports]
//! control = 19999
//! query = 19998
//! remote_query = 29999
//! remote_sketch = 29998
//!
//! [tls]
//! enabled = true
//!
//! [kernel]
//! removal_timeout_ms = 30000
//! ```

use crate::error::ServerError;
use provkernel_core::KernelSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file name under `<root>/cfg/`.
pub const CONFIG_FILE_NAME: &str = "provkernel.toml";

/// Replayable control script under `<root>/cfg/`.
pub const SCRIPT_FILE_NAME: &str = "provkernel.config";

/// PID file under `<root>/`.
pub const PID_FILE_NAME: &str = "provkernel.pid";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Ports {
    pub control: u16,
    pub query: u16,
    pub remote_query: u16,
    pub remote_sketch: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            control: 19999,
            query: 19998,
            remote_query: 29999,
            remote_sketch: 29998,
        }
    }
}

/// Bind addresses. Control and query are local only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Listen {
    pub local: String,
    pub remote: String,
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            local: "127.0.0.1".to_string(),
            remote: "0.0.0.0".to_string(),
        }
    }
}

/// PEM material. Relative or absent paths resolve under `<root>/cfg/ssl/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
    /// CA that client certificates must chain to.
    pub client_ca: Option<PathBuf>,
    /// CA the one-shot clients trust for the kernel's certificate.
    pub server_ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_cert: None,
            server_key: None,
            client_ca: None,
            server_ca: None,
            client_cert: None,
            client_key: None,
        }
    }
}

/// Fully resolved TLS file paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_ca: PathBuf,
    pub server_ca: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub level: Option<String>,
    /// `text` or `json`.
    pub format: Option<String>,
}

/// Kernel tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tuning {
    pub batch_limit: usize,
    pub idle_interval_ms: u64,
    /// Absent means `remove reporter|storage` waits without bound.
    pub removal_timeout_ms: Option<u64>,
    pub control_read_timeout_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            batch_limit: provkernel_core::kernel::DEFAULT_BATCH_LIMIT,
            idle_interval_ms: 10,
            removal_timeout_ms: None,
            control_read_timeout_ms: 1000,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KernelConfig {
    pub root: PathBuf,
    pub ports: Ports,
    pub listen: Listen,
    pub tls: TlsConfig,
    pub log: LogConfig,
    pub kernel: Tuning,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ports: Ports::default(),
            listen: Listen::default(),
            tls: TlsConfig::default(),
            log: LogConfig::default(),
            kernel: Tuning::default(),
        }
    }
}

impl KernelConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `<root>/cfg/provkernel.toml`
    /// is read when present and defaults are used otherwise. `root` overrides
    /// the file's `root`.
    pub fn load(path: Option<&Path>, root: Option<&Path>) -> Result<Self, ServerError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_root = root.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
                let candidate = default_root.join("cfg").join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        if let Some(root) = root {
            config.root = root.to_path_buf();
        }
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ServerError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents).map_err(|e| match e {
            ServerError::Config(msg) => ServerError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse TOML text.
    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn cfg_dir(&self) -> PathBuf {
        self.root.join("cfg")
    }

    /// The control script replayed at startup and saved at shutdown.
    pub fn script_file(&self) -> PathBuf {
        self.cfg_dir().join(SCRIPT_FILE_NAME)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }

    pub fn control_read_timeout(&self) -> Duration {
        Duration::from_millis(self.kernel.control_read_timeout_ms.max(1))
    }

    /// Settings handed to the kernel.
    pub fn settings(&self) -> KernelSettings {
        KernelSettings {
            config_file: Some(self.script_file()),
            batch_limit: self.kernel.batch_limit.max(1),
            idle_interval: Duration::from_millis(self.kernel.idle_interval_ms),
            removal_timeout: self.kernel.removal_timeout_ms.map(Duration::from_millis),
        }
    }

    /// TLS paths with defaults filled in and relative paths anchored at
    /// `<root>/cfg/ssl/`.
    pub fn tls_paths(&self) -> TlsPaths {
        let ssl = self.cfg_dir().join("ssl");
        let resolve = |configured: &Option<PathBuf>, default: &str| match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => ssl.join(path),
            None => ssl.join(default),
        };
        TlsPaths {
            server_cert: resolve(&self.tls.server_cert, "server.crt"),
            server_key: resolve(&self.tls.server_key, "server.key"),
            client_ca: resolve(&self.tls.client_ca, "ca.crt"),
            server_ca: resolve(&self.tls.server_ca, "ca.crt"),
            client_cert: resolve(&self.tls.client_cert, "client.crt"),
            client_key: resolve(&self.tls.client_key, "client.key"),
        }
    }

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub fn log_directives(&self) -> String {
        self.log
            .level
            .clone()
            .unwrap_or_else(|| "provkernel=info,provkernel_core=info".to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "MedBridge";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: &str = "127.0.0.1:5173";
const DEFAULT_INTERPRETER: &str = "python";
const DEFAULT_MAX_PROCESSES: usize = 8;
const DEFAULT_MAX_UPLOAD_MB: usize = 50;
const BYTES_PER_MB: usize = 1024 * 1024;

/// Wall-clock limit for one buffered script run.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "medbridge_lib=info,medbridge=info,tower_http=info"
}

/// Get the application data directory.
/// `~/MedBridge/` when a home directory exists, otherwise the working directory.
pub fn app_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(APP_NAME),
        None => PathBuf::from("."),
    }
}

/// Default location of the inference scripts.
pub fn default_scripts_dir() -> PathBuf {
    app_data_dir().join("scripts")
}

/// Default upload staging directory, private to this app under the
/// platform temp dir.
pub fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("medbridge-staging")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid socket address '{value}'")]
    InvalidAddress { var: &'static str, value: String },
    #[error("{var}: expected a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Runtime settings for the bridge and its HTTP front.
///
/// Passed explicitly to the router and bridge; nothing reads the
/// environment after startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_addr: SocketAddr,
    /// Executable that runs every script (`python`, `python3`, a venv path...).
    pub interpreter: PathBuf,
    pub scripts_dir: PathBuf,
    /// Where uploads are staged while a script reads them.
    pub staging_dir: PathBuf,
    /// Upper bound on concurrently running scripts.
    pub max_concurrent_processes: usize,
    pub max_upload_bytes: usize,
    /// Buffered scripts still running after this are killed. Streams are
    /// not limited.
    pub script_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5173)),
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            scripts_dir: default_scripts_dir(),
            staging_dir: default_staging_dir(),
            max_concurrent_processes: DEFAULT_MAX_PROCESSES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * BYTES_PER_MB,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup. Unset or empty variables
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let bind = get("MEDBRIDGE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        config.bind_addr = bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                var: "MEDBRIDGE_BIND",
                value: bind.clone(),
            })?;

        if let Some(interpreter) = get("MEDBRIDGE_INTERPRETER") {
            config.interpreter = PathBuf::from(interpreter);
        }
        if let Some(dir) = get("MEDBRIDGE_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("MEDBRIDGE_STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Some(value) = get("MEDBRIDGE_MAX_PROCESSES") {
            config.max_concurrent_processes = parse_positive("MEDBRIDGE_MAX_PROCESSES", &value)?;
        }
        if let Some(value) = get("MEDBRIDGE_MAX_UPLOAD_MB") {
            config.max_upload_bytes = parse_positive("MEDBRIDGE_MAX_UPLOAD_MB", &value)?
                .checked_mul(BYTES_PER_MB)
                .ok_or_else(|| ConfigError::InvalidNumber {
                    var: "MEDBRIDGE_MAX_UPLOAD_MB",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = get("MEDBRIDGE_SCRIPT_TIMEOUT_SECS") {
            let secs = parse_positive("MEDBRIDGE_SCRIPT_TIMEOUT_SECS", &value)?;
            config.script_timeout = Duration::from_secs(secs as u64);
        }

        Ok(config)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        if dirs::home_dir().is_some() {
            assert!(app_data_dir().ends_with("MedBridge"));
        }
    }

    #[test]
    fn scripts_dir_under_app_data() {
        assert!(default_scripts_dir().starts_with(app_data_dir()));
        assert!(default_scripts_dir().ends_with("scripts"));
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:5173");
        assert_eq!(config.interpreter, PathBuf::from("python"));
        assert_eq!(config.max_concurrent_processes, 8);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.staging_dir, default_staging_dir());
        assert_eq!(config.script_timeout, Duration::from_secs(300));
    }

    #[test]
    fn overrides_are_applied() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("MEDBRIDGE_BIND", "0.0.0.0:9000"),
            ("MEDBRIDGE_INTERPRETER", "/opt/venv/bin/python3"),
            ("MEDBRIDGE_SCRIPTS_DIR", "/srv/scripts"),
            ("MEDBRIDGE_STAGING_DIR", "/var/tmp/medbridge"),
            ("MEDBRIDGE_MAX_PROCESSES", "2"),
            ("MEDBRIDGE_MAX_UPLOAD_MB", "5"),
            ("MEDBRIDGE_SCRIPT_TIMEOUT_SECS", "45"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.interpreter, PathBuf::from("/opt/venv/bin/python3"));
        assert_eq!(config.scripts_dir, PathBuf::from("/srv/scripts"));
        assert_eq!(config.staging_dir, PathBuf::from("/var/tmp/medbridge"));
        assert_eq!(config.max_concurrent_processes, 2);
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.script_timeout, Duration::from_secs(45));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            BridgeConfig::from_lookup(lookup(&[("MEDBRIDGE_INTERPRETER", "  ")])).unwrap();
        assert_eq!(config.interpreter, PathBuf::from("python"));
    }

    #[test]
    fn zero_processes_rejected() {
        let err = BridgeConfig::from_lookup(lookup(&[("MEDBRIDGE_MAX_PROCESSES", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "MEDBRIDGE_MAX_PROCESSES",
                value: "0".into()
            }
        );
    }

    #[test]
    fn non_numeric_upload_limit_rejected() {
        let err = BridgeConfig::from_lookup(lookup(&[("MEDBRIDGE_MAX_UPLOAD_MB", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("MEDBRIDGE_MAX_UPLOAD_MB"));
    }

    #[test]
    fn upload_limit_overflowing_bytes_rejected() {
        let huge = (usize::MAX / BYTES_PER_MB + 1).to_string();
        let vars = [("MEDBRIDGE_MAX_UPLOAD_MB", huge.as_str())];
        let err = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "MEDBRIDGE_MAX_UPLOAD_MB",
                value: huge
            }
        );
    }

    #[test]
    fn zero_script_timeout_rejected() {
        let err = BridgeConfig::from_lookup(lookup(&[("MEDBRIDGE_SCRIPT_TIMEOUT_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn bad_bind_address_rejected() {
        let err =
            BridgeConfig::from_lookup(lookup(&[("MEDBRIDGE_BIND", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }
}

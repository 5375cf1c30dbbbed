use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_storage_config")]
    pub storage: StorageConfig,
    #[serde(default = "default_dispatch_config")]
    pub dispatch: DispatchConfig,
    #[serde(default = "default_cloud_api_config")]
    pub cloud_api: CloudApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Artificial latency applied in simulation mode so the console feels like a real handshake.
    #[serde(default = "default_simulation_delay_ms")]
    pub simulation_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloudApiConfig {
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    #[serde(default = "default_cloud_version")]
    pub version: String,
    /// Prefix prepended to the URL-encoded target when the gateway asks for the CORS proxy.
    #[serde(default = "default_cors_proxy_prefix")]
    pub cors_proxy_prefix: String,
}

impl CloudApiConfig {
    /// Messages endpoint for a given phone number ID.
    pub fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url.trim_end_matches('/'),
            self.version,
            phone_number_id.trim()
        )
    }

    pub fn proxied(&self, target: &str) -> String {
        format!("{}{}", self.cors_proxy_prefix, urlencoding::encode(target))
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("temple-dispatch.db")
}

fn default_simulation_delay_ms() -> u64 {
    800
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_cloud_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_cloud_version() -> String {
    "v21.0".to_string()
}

fn default_cors_proxy_prefix() -> String {
    "https://corsproxy.io/?url=".to_string()
}

fn default_storage_config() -> StorageConfig {
    StorageConfig {
        database_path: default_db_path(),
    }
}

fn default_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        simulation_delay_ms: default_simulation_delay_ms(),
        request_timeout_ms: default_request_timeout_ms(),
    }
}

fn default_cloud_api_config() -> CloudApiConfig {
    CloudApiConfig {
        base_url: default_cloud_base_url(),
        version: default_cloud_version(),
        cors_proxy_prefix: default_cors_proxy_prefix(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: default_storage_config(),
            dispatch: default_dispatch_config(),
            cloud_api: default_cloud_api_config(),
        }
    }
}

impl Config {
    /// Load `config.toml`. A missing file is not an error: every section has defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "No config file at {}, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("temple-dispatch.db")
        );
        assert_eq!(config.dispatch.simulation_delay_ms, 800);
        assert_eq!(config.cloud_api.version, "v21.0");
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nsimulation_delay_ms = 0").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.dispatch.simulation_delay_ms, 0);
        assert_eq!(config.dispatch.request_timeout_ms, 10_000);
        assert_eq!(config.cloud_api.base_url, "https://graph.facebook.com");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch\nbroken").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_messages_url_trims_slashes() {
        let api = CloudApiConfig {
            base_url: "https://graph.example.com/".to_string(),
            version: "v21.0".to_string(),
            cors_proxy_prefix: default_cors_proxy_prefix(),
        };
        assert_eq!(
            api.messages_url(" 1234 "),
            "https://graph.example.com/v21.0/1234/messages"
        );
    }

    #[test]
    fn test_proxied_encodes_target() {
        let api = default_cloud_api_config();
        assert_eq!(
            api.proxied("https://a.b/c?d=1"),
            "https://corsproxy.io/?url=https%3A%2F%2Fa.b%2Fc%3Fd%3D1"
        );
    }
}

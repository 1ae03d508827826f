//! Configuration management
//!
//! Supports loading from TOML files and `TESSERA_*` environment variables.
//! Every section is optional and falls back to the production defaults.

use crate::encryption::{Cipher, EncryptionScheme, Key, PathCipher};
use crate::error::{Result, TesseraError};
use crate::node::{NodeId, ReputationThresholds};
use crate::redundancy::RedundancyScheme;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redundancy: RedundancyConfig,

    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Reputation thresholds for new uploads
    #[serde(default)]
    pub node_selection: NodeSelectionConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Segment pointer database
    #[serde(default)]
    pub pointers: PointerDbConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// A numeric override that does not parse is an `InvalidConfiguration`
    /// error naming the variable.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(key) = std::env::var("TESSERA_ENCRYPTION_KEY") {
            self.encryption.key = key;
        }

        if let Ok(url) = std::env::var("TESSERA_OVERLAY_DATABASE_URL") {
            self.overlay.database_url = url;
        }

        if let Ok(url) = std::env::var("TESSERA_POINTERS_DATABASE_URL") {
            self.pointers.database_url = url;
        }

        if let Some(ms) = env_number("TESSERA_REFRESH_INTERVAL_MS")? {
            self.overlay.refresh_interval_ms = ms;
        }

        if let Some(bytes) = env_number("TESSERA_SEGMENT_SIZE")? {
            self.client.segment_size = bytes;
        }

        if let Some(depth) = env_number("TESSERA_PIPELINE_DEPTH")? {
            self.client.pipeline_depth = depth;
        }

        Ok(self)
    }

    /// Validate the configuration.
    ///
    /// Builds both schemes and parses both database URLs, so a bad setting
    /// fails at startup rather than on the first upload.
    pub fn validate(&self) -> Result<()> {
        let redundancy = self.redundancy_scheme()?;
        self.encryption_scheme(&redundancy)?;

        if self.client.segment_size == 0 {
            return Err(TesseraError::InvalidConfiguration(
                "segment size cannot be 0".to_string(),
            ));
        }
        if self.client.pipeline_depth == 0 {
            return Err(TesseraError::InvalidConfiguration(
                "pipeline depth cannot be 0".to_string(),
            ));
        }
        if self.overlay.refresh_interval_ms == 0 {
            return Err(TesseraError::InvalidConfiguration(
                "overlay refresh interval cannot be 0".to_string(),
            ));
        }

        DatabaseUrl::parse(&self.overlay.database_url)?;
        DatabaseUrl::parse(&self.pointers.database_url)?;
        Ok(())
    }

    pub fn redundancy_scheme(&self) -> Result<RedundancyScheme> {
        let r = &self.redundancy;
        RedundancyScheme::new(
            r.min_threshold,
            r.repair_threshold,
            r.success_threshold,
            r.max_threshold,
            r.erasure_share_size,
        )
    }

    pub fn encryption_scheme(&self, redundancy: &RedundancyScheme) -> Result<EncryptionScheme> {
        EncryptionScheme::new(self.encryption.data_type, self.encryption.block_size, redundancy)
    }

    pub fn root_key(&self) -> Key {
        Key::from_config(&self.encryption.key)
    }

    pub fn thresholds(&self) -> ReputationThresholds {
        let s = &self.node_selection;
        ReputationThresholds {
            min_uptime_ratio: s.uptime_ratio,
            min_uptime_count: s.uptime_count,
            min_audit_success_ratio: s.audit_success_ratio,
            min_audit_count: s.audit_count,
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|e| {
            TesseraError::InvalidConfiguration(format!("{}={:?}: {}", name, value, e))
        }),
        Err(_) => Ok(None),
    }
}

/// Erasure coding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyConfig {
    /// Size of each erasure share slot in bytes
    #[serde(default = "default_erasure_share_size")]
    pub erasure_share_size: usize,

    /// Pieces needed to rebuild a segment (k)
    #[serde(default = "default_min_threshold")]
    pub min_threshold: u16,

    /// Piece count that triggers repair (m)
    #[serde(default = "default_repair_threshold")]
    pub repair_threshold: u16,

    /// Successful uploads after which a write stops waiting (o)
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u16,

    /// Pieces created per segment (n)
    #[serde(default = "default_max_threshold")]
    pub max_threshold: u16,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            erasure_share_size: default_erasure_share_size(),
            min_threshold: default_min_threshold(),
            repair_threshold: default_repair_threshold(),
            success_threshold: default_success_threshold(),
            max_threshold: default_max_threshold(),
        }
    }
}

fn default_erasure_share_size() -> usize {
    crate::DEFAULT_ERASURE_SHARE_SIZE
}

fn default_min_threshold() -> u16 {
    crate::DEFAULT_REQUIRED_SHARES
}

fn default_repair_threshold() -> u16 {
    crate::DEFAULT_REPAIR_SHARES
}

fn default_success_threshold() -> u16 {
    crate::DEFAULT_OPTIMAL_SHARES
}

fn default_max_threshold() -> u16 {
    crate::DEFAULT_TOTAL_SHARES
}

/// Encryption settings
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Root secret; content and path keys are derived from it
    #[serde(default)]
    pub key: String,

    /// Encrypted block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Data cipher (1=AES-GCM, 2=SecretBox)
    #[serde(default = "default_data_type")]
    pub data_type: Cipher,

    /// Path cipher (0=Unencrypted, 1=AES-GCM, 2=SecretBox)
    #[serde(default = "default_path_type")]
    pub path_type: PathCipher,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            block_size: default_block_size(),
            data_type: default_data_type(),
            path_type: default_path_type(),
        }
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &"[REDACTED]")
            .field("block_size", &self.block_size)
            .field("data_type", &self.data_type)
            .field("path_type", &self.path_type)
            .finish()
    }
}

fn default_block_size() -> usize {
    crate::DEFAULT_BLOCK_SIZE
}

fn default_data_type() -> Cipher {
    Cipher::AesGcm
}

fn default_path_type() -> PathCipher {
    PathCipher::AesGcm
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSelectionConfig {
    #[serde(default)]
    pub uptime_ratio: f64,

    #[serde(default)]
    pub uptime_count: u64,

    #[serde(default)]
    pub audit_success_ratio: f64,

    #[serde(default)]
    pub audit_count: u64,
}

/// Upload/download client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Segments up to this size are stored inline with their pointer
    #[serde(default = "default_max_inline_size")]
    pub max_inline_size: usize,

    /// Plaintext bytes per segment
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,

    /// Per-node timeout for a single piece transfer
    #[serde(default = "default_piece_timeout")]
    pub piece_timeout_secs: u64,

    /// Segments in flight during a stream upload or download
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_inline_size: default_max_inline_size(),
            segment_size: default_segment_size(),
            piece_timeout_secs: default_piece_timeout(),
            pipeline_depth: default_pipeline_depth(),
        }
    }
}

impl ClientConfig {
    pub fn piece_timeout(&self) -> Duration {
        Duration::from_secs(self.piece_timeout_secs)
    }
}

fn default_max_inline_size() -> usize {
    crate::DEFAULT_MAX_INLINE_SIZE
}

fn default_segment_size() -> u64 {
    crate::DEFAULT_SEGMENT_SIZE
}

fn default_piece_timeout() -> u64 {
    30
}

fn default_pipeline_depth() -> usize {
    2
}

/// Overlay cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Reputation database, e.g. `sled://overlay.db` or `redis://127.0.0.1:6379`
    #[serde(default = "default_overlay_db")]
    pub database_url: String,

    /// Interval between discovery refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            database_url: default_overlay_db(),
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

impl OverlayConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn default_overlay_db() -> String {
    "sled://overlay.db".to_string()
}

fn default_refresh_interval() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerDbConfig {
    #[serde(default = "default_pointer_db")]
    pub database_url: String,
}

impl Default for PointerDbConfig {
    fn default() -> Self {
        Self {
            database_url: default_pointer_db(),
        }
    }
}

fn default_pointer_db() -> String {
    "sled://pointers.db".to_string()
}

/// Key-value engine named by a database URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScheme {
    Memory,
    Sled,
    RocksDb,
    Redis,
}

/// A `scheme://location` database URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    pub scheme: StoreScheme,

    /// Everything after `://`; a path for embedded engines
    pub location: String,

    /// The URL as configured (Redis needs it whole)
    pub raw: String,
}

impl DatabaseUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, location) = url.split_once("://").ok_or_else(|| {
            TesseraError::InvalidConfiguration(format!(
                "database url {:?} must look like scheme://location",
                url
            ))
        })?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "memory" | "mem" => StoreScheme::Memory,
            "sled" | "bolt" => StoreScheme::Sled,
            "rocksdb" | "rocks" => StoreScheme::RocksDb,
            "redis" => StoreScheme::Redis,
            other => return Err(TesseraError::UnsupportedStoreScheme(other.to_string())),
        };

        Ok(Self {
            scheme,
            location: location.to_string(),
            raw: url.to_string(),
        })
    }
}

/// Node IDs to look up, as a delimited base58 list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default)]
    pub node_ids: String,

    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            node_ids: String::new(),
            delimiter: default_delimiter(),
        }
    }
}

impl LookupConfig {
    pub fn parse_ids(&self) -> Result<Vec<NodeId>> {
        NodeId::parse_list(&self.node_ids, &self.delimiter)
    }
}

fn default_delimiter() -> String {
    ",".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.redundancy.min_threshold, 29);
        assert_eq!(config.redundancy.repair_threshold, 35);
        assert_eq!(config.redundancy.success_threshold, 80);
        assert_eq!(config.redundancy.max_threshold, 95);
        assert_eq!(config.encryption.block_size, 1024);
        assert_eq!(config.client.segment_size, 64_000_000);
        assert_eq!(config.overlay.refresh_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [redundancy]
            erasure_share_size = 256
            min_threshold = 2
            repair_threshold = 3
            success_threshold = 4
            max_threshold = 5

            [encryption]
            key = "hunter2"
            block_size = 512
            data_type = 2
            path_type = 0

            [node_selection]
            audit_count = 10

            [overlay]
            database_url = "memory://overlay"
        "#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.redundancy.max_threshold, 5);
        assert_eq!(config.encryption.data_type, Cipher::SecretBox);
        assert_eq!(config.encryption.path_type, PathCipher::Unencrypted);
        assert_eq!(config.thresholds().min_audit_count, 10);
        // Untouched sections keep their defaults
        assert_eq!(config.client.max_inline_size, 4096);
        assert_eq!(config.pointers.database_url, "sled://pointers.db");
    }

    #[test]
    fn test_block_size_must_tile_stripe() {
        let toml = r#"
            [redundancy]
            erasure_share_size = 1000

            [encryption]
            block_size = 1024
        "#;
        assert!(matches!(
            Config::from_toml_str(toml),
            Err(TesseraError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_thresholds() {
        let toml = r#"
            [redundancy]
            min_threshold = 40
        "#;
        assert!(matches!(
            Config::from_toml_str(toml),
            Err(TesseraError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_unknown_cipher_rejected() {
        let toml = r#"
            [encryption]
            data_type = 7
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_database_url() {
        let url = DatabaseUrl::parse("sled:///var/lib/overlay.db").unwrap();
        assert_eq!(url.scheme, StoreScheme::Sled);
        assert_eq!(url.location, "/var/lib/overlay.db");

        let url = DatabaseUrl::parse("redis://127.0.0.1:6379/2").unwrap();
        assert_eq!(url.scheme, StoreScheme::Redis);
        assert_eq!(url.raw, "redis://127.0.0.1:6379/2");

        assert!(matches!(
            DatabaseUrl::parse("postgres://db"),
            Err(TesseraError::UnsupportedStoreScheme(s)) if s == "postgres"
        ));
        assert!(matches!(
            DatabaseUrl::parse("overlay.db"),
            Err(TesseraError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unsupported_overlay_scheme_fails_validation() {
        let toml = r#"
            [overlay]
            database_url = "etcd://localhost"
        "#;
        assert!(matches!(
            Config::from_toml_str(toml),
            Err(TesseraError::UnsupportedStoreScheme(_))
        ));
    }

    #[test]
    fn test_lookup_ids() {
        let a = NodeId::from_seed(b"a");
        let b = NodeId::from_seed(b"b");
        let lookup = LookupConfig {
            node_ids: format!("{};{}", a, b),
            delimiter: ";".to_string(),
        };
        assert_eq!(lookup.parse_ids().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_key_is_redacted() {
        let mut config = Config::default();
        config.encryption.key = "super secret".to_string();
        assert!(!format!("{:?}", config).contains("super secret"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(
            &path,
            "[client]\nsegment_size = 1000000\npipeline_depth = 4\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.client.segment_size, 1_000_000);
        assert_eq!(config.client.pipeline_depth, 4);

        std::fs::write(&path, "[client\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(TesseraError::InvalidConfiguration(_))));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::from_file(&missing), Err(TesseraError::Io(_))));
    }

    #[test]
    fn test_env_overrides() {
        // Only this test touches these variables
        std::env::set_var("TESSERA_PIPELINE_DEPTH", "6");
        std::env::set_var("TESSERA_REFRESH_INTERVAL_MS", "250");
        let config = Config::default().with_env_overrides().unwrap();
        assert_eq!(config.client.pipeline_depth, 6);
        assert_eq!(config.overlay.refresh_interval(), Duration::from_millis(250));

        std::env::set_var("TESSERA_REFRESH_INTERVAL_MS", "soon");
        let err = Config::default().with_env_overrides().unwrap_err();
        std::env::remove_var("TESSERA_PIPELINE_DEPTH");
        std::env::remove_var("TESSERA_REFRESH_INTERVAL_MS");

        assert!(err.is_configuration());
        assert!(err.to_string().contains("TESSERA_REFRESH_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_pipeline_depth_rejected() {
        let toml = r#"
            [client]
            pipeline_depth = 0
        "#;
        assert!(matches!(
            Config::from_toml_str(toml),
            Err(TesseraError::InvalidConfiguration(_))
        ));
    }
}

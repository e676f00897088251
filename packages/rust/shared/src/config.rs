//! Application configuration for catalogsync.
//!
//! User config lives at `~/.catalogsync/catalogsync.toml`.
//! CLI flags (and their env fallbacks) override config file values, which
//! override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "catalogsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".catalogsync";

/// Outbound enrichment ceiling used when nothing else is configured.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

// ---------------------------------------------------------------------------
// Config structs (matching catalogsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub invalidation: InvalidationConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

/// `[source]` section: where the catalog REST API lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// REST base URL, e.g. `https://shop.example.com/rest/default`.
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Name of the env var holding the integration access token (never store
    /// the token itself).
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Per-request timeout. Bounds how long a hung fetch can hold its
    /// rate-limiter slot.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            access_token_env: default_access_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_url() -> String {
    "http://localhost/rest".into()
}
fn default_access_token_env() -> String {
    "MAGENTO_ACCESS_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Regenerate every url key as `<slug(name)>-<id>`.
    #[serde(default = "default_true")]
    pub generate_unique_url_keys: bool,

    /// Fetch each category's full record and enrich the whole tree.
    #[serde(default)]
    pub extended_categories: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            generate_unique_url_keys: true,
            extended_categories: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum enrichment calls started per second.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
        }
    }
}

fn default_requests_per_second() -> u32 {
    DEFAULT_REQUESTS_PER_SECOND
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path of the libSQL cache database. `~` expands to the home directory.
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> String {
    "~/.catalogsync/cache.db".into()
}

/// `[invalidation]` section: storefront cache invalidation webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Prefix the entity tag (`C<id>`) is appended to.
    #[serde(default = "default_invalidation_url")]
    pub url: String,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_invalidation_url(),
        }
    }
}

fn default_invalidation_url() -> String {
    "http://localhost:3000/invalidate?tag=".into()
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Search index the emitted documents are destined for.
    #[serde(default = "default_index_name")]
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
        }
    }
}

fn default_index_name() -> String {
    "vue_storefront_catalog".into()
}

// ---------------------------------------------------------------------------
// Sync options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Per-run switches consumed by the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub generate_unique_url_keys: bool,
    pub extended_categories: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SyncOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            generate_unique_url_keys: config.sync.generate_unique_url_keys,
            extended_categories: config.sync.extended_categories,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.catalogsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CatalogSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.catalogsync/catalogsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogSyncError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CatalogSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CatalogSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CatalogSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CatalogSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    url::Url::parse(&config.source.url).map_err(|e| {
        CatalogSyncError::config(format!("invalid source url '{}': {e}", config.source.url))
    })?;
    if config.rate_limit.requests_per_second == 0 {
        return Err(CatalogSyncError::config(
            "rate_limit.requests_per_second must be at least 1",
        ));
    }
    if config.invalidation.enabled && config.invalidation.url.is_empty() {
        return Err(CatalogSyncError::config(
            "invalidation is enabled but invalidation.url is empty",
        ));
    }
    Ok(())
}

/// Read the access token from the env var named in `[source]`.
///
/// Returns `Ok(None)` when the variable is unset, since anonymous catalogs
/// are allowed; an empty value is rejected.
pub fn access_token(config: &AppConfig) -> Result<Option<String>> {
    let var_name = &config.source.access_token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        Ok(_) => Err(CatalogSyncError::config(format!(
            "{var_name} is set but empty; unset it or provide an integration access token"
        ))),
        Err(_) => Ok(None),
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| CatalogSyncError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

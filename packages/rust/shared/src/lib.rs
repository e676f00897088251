//! Shared types, error model, and configuration for catalogsync.
//!
//! This crate is the foundation depended on by all other catalogsync crates.
//! It provides:
//! - [`CatalogSyncError`]: the unified error type
//! - Domain types ([`CategoryNode`], [`CategoryId`], [`CustomAttribute`], [`SyncRunId`])
//! - Configuration ([`AppConfig`], [`SyncOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, DEFAULT_REQUESTS_PER_SECOND, IndexConfig, InvalidationConfig,
    RateLimitConfig, SourceConfig, SyncOptions, SyncSection, access_token, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, validate_config,
};
pub use error::{CatalogSyncError, Result};
pub use types::{CategoryId, CategoryNode, CustomAttribute, EntityKind, SyncRunId};

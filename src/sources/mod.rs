//! Source adapter registry and factory
//!
//! This module provides:
//! - Central registration of all supported platforms
//! - A factory function to build adapters from configuration
//!
//! All platform-specific logic must live in dedicated adapter
//! modules. The collector interacts exclusively through the
//! `SourceAdapter` trait.

pub mod adapter;
pub mod facebook;
pub mod http;
pub mod twitter;

use std::sync::Arc;

use adapter::SourceAdapter;

use crate::config::{Config, SourceKind};
use crate::error::FetchError;

/// Builds the adapter for the configured platform.
///
/// `token` is the platform credential, already read from the
/// environment by the caller.
pub fn get_adapter(config: &Config, token: String) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    Ok(match config.source {
        SourceKind::Twitter => Arc::new(twitter::TwitterAdapter::new(token, config)?),
        SourceKind::Facebook => Arc::new(facebook::FacebookAdapter::new(token, config)?),
    })
}

//! Delivery capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::EchoResult;

/// One asset to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Catalog id of the asset.
    pub asset_id: String,
    /// Absolute path of the asset file.
    pub path: PathBuf,
    /// Tag the asset was selected for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Delivers a named asset to a session.
///
/// A failure affects only that session; callers dispatching to several
/// sessions continue with the rest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver `delivery` to `session_id`.
    async fn send(&self, session_id: &str, delivery: &Delivery) -> EchoResult<()>;
}

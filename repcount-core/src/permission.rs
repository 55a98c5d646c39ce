//! Microphone permission contract.
//!
//! Mobile hosts gate the microphone behind a user prompt; desktop hosts
//! generally do not, and use `AlwaysGranted`.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

/// Future returned by `PermissionProvider::request`; resolves to `true` when granted.
pub type PermissionRequest = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

pub trait PermissionProvider: Send + Sync + 'static {
    fn status(&self) -> PermissionStatus;

    /// Prompt the user. Only called while the status is `Undetermined`.
    fn request(&self) -> PermissionRequest;
}

/// Resolve the current status, prompting once if undetermined.
pub async fn ensure_granted(provider: &dyn PermissionProvider) -> bool {
    match provider.status() {
        PermissionStatus::Granted => true,
        PermissionStatus::Denied => false,
        PermissionStatus::Undetermined => provider.request().await,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionProvider for AlwaysGranted {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    fn request(&self) -> PermissionRequest {
        Box::pin(async { true })
    }
}

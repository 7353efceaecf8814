//! Identity provider seam used to re-fetch user attributes.

// std
use std::fmt::Debug;
// crates.io
use serde_json::Value;
// self
use crate::_prelude::*;

/// Contacts upstream identity providers for fresh attribute data.
///
/// Implementations own any timeout or retry handling for the upstream call; failures are
/// expected to surface as [`Error::ProviderFetch`] and are passed through to callers
/// unchanged.
#[async_trait::async_trait]
pub trait IdentityRefresher: Debug + Send + Sync {
	/// Fetch the current provider-derived payload for `identity`.
	async fn fetch(&self, identity: &str) -> Result<Value>;
}

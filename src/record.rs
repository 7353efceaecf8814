//! Cached per-user attribute records.

// crates.io
use chrono::SubsecRound;
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::_prelude::*;

/// Cached authentication metadata for a single user.
///
/// The payload is opaque to the scheduler; only the staleness bookkeeping
/// (`last_refresh`, `needs_refresh`) and the payload itself are ever rewritten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttributeRecord {
	/// External-facing key used to fetch provider data and serialize refreshes.
	pub identity: String,
	/// UTC timestamp of the most recent successful refresh, at second precision.
	#[serde(default)]
	pub last_refresh: Option<DateTime<Utc>>,
	/// Explicit invalidation flag; when set the record is due regardless of age.
	#[serde(default)]
	pub needs_refresh: bool,
	/// Provider-derived attributes such as group principals and extra claims.
	#[serde(default)]
	pub payload: Value,
}
impl UserAttributeRecord {
	/// Create a record that has never been refreshed.
	pub fn new(identity: impl Into<String>) -> Self {
		Self {
			identity: identity.into(),
			last_refresh: None,
			needs_refresh: false,
			payload: Value::Null,
		}
	}

	/// Set the last refresh timestamp.
	pub fn with_last_refresh(mut self, at: DateTime<Utc>) -> Self {
		self.last_refresh = Some(at);

		self
	}

	/// Flag the record for refresh on the next sweep.
	pub fn with_needs_refresh(mut self, needs_refresh: bool) -> Self {
		self.needs_refresh = needs_refresh;

		self
	}

	/// Replace the provider payload.
	pub fn with_payload(mut self, payload: Value) -> Self {
		self.payload = payload;

		self
	}

	/// Age of the record at `now`, or `None` when it was never refreshed.
	///
	/// Timestamps in the future yield a zero age.
	pub fn age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
		self.last_refresh.map(|last| (now - last).max(TimeDelta::zero()))
	}

	/// Produce the refreshed form of this record carrying `payload`.
	pub fn refreshed(&self, payload: Value, now: DateTime<Utc>) -> Self {
		Self {
			identity: self.identity.clone(),
			last_refresh: Some(now.trunc_subsecs(0)),
			needs_refresh: false,
			payload,
		}
	}
}

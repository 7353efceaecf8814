//! Attribute store seam and an in-memory implementation.

// std
use std::{collections::BTreeMap, fmt::Debug};
// crates.io
use tokio::sync::RwLock;
// self
use crate::{_prelude::*, record::UserAttributeRecord};

/// Lookup, list, and write access to persisted user-attribute records.
#[async_trait::async_trait]
pub trait AttributeStore: Debug + Send + Sync {
	/// List every stored record.
	async fn list(&self) -> Result<Vec<UserAttributeRecord>>;

	/// Look up the record for `identity`.
	async fn get(&self, identity: &str) -> Result<Option<UserAttributeRecord>>;

	/// Persist `record`, replacing any previous record for the same identity.
	async fn write(&self, record: &UserAttributeRecord) -> Result<()>;
}

/// Store keeping records in process memory, ordered by identity.
#[derive(Debug, Default)]
pub struct MemoryAttributeStore {
	records: RwLock<BTreeMap<String, UserAttributeRecord>>,
}
impl MemoryAttributeStore {
	/// Create an empty store.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Create a store seeded with `records`.
	pub fn with_records(records: impl IntoIterator<Item = UserAttributeRecord>) -> Arc<Self> {
		let records = records.into_iter().map(|record| (record.identity.clone(), record)).collect();

		Arc::new(Self { records: RwLock::new(records) })
	}

	/// Number of stored records.
	pub async fn len(&self) -> usize {
		self.records.read().await.len()
	}

	/// Whether the store holds no records.
	pub async fn is_empty(&self) -> bool {
		self.records.read().await.is_empty()
	}

	/// Delete the record for `identity`, returning it when present.
	pub async fn remove(&self, identity: &str) -> Option<UserAttributeRecord> {
		self.records.write().await.remove(identity)
	}

	/// Flag `identity` for refresh on the next sweep; returns false when unknown.
	pub async fn invalidate(&self, identity: &str) -> bool {
		match self.records.write().await.get_mut(identity) {
			Some(record) => {
				record.needs_refresh = true;

				true
			},
			None => false,
		}
	}
}
#[async_trait::async_trait]
impl AttributeStore for MemoryAttributeStore {
	async fn list(&self) -> Result<Vec<UserAttributeRecord>> {
		Ok(self.records.read().await.values().cloned().collect())
	}

	async fn get(&self, identity: &str) -> Result<Option<UserAttributeRecord>> {
		Ok(self.records.read().await.get(identity).cloned())
	}

	async fn write(&self, record: &UserAttributeRecord) -> Result<()> {
		self.records.write().await.insert(record.identity.clone(), record.clone());

		Ok(())
	}
}

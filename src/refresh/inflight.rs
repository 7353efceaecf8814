//! Registry of in-flight refreshes keyed by identity.

// std
use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};
// crates.io
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
// self
use crate::_prelude::*;

type Slot = Arc<AsyncMutex<()>>;

/// Serializes refreshes per identity while letting distinct identities proceed in parallel.
///
/// A slot exists only while some caller holds or awaits it; the last guard to leave
/// removes it.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
	slots: Mutex<HashMap<String, Slot>>,
}
impl InFlightRegistry {
	/// Create an empty registry.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Wait until no other refresh for `identity` is running, then claim it.
	pub async fn acquire(self: &Arc<Self>, identity: &str) -> IdentityGuard {
		let slot = self.lock_slots().entry(identity.to_owned()).or_default().clone();
		let (guard, waited) = match slot.clone().try_lock_owned() {
			Ok(guard) => (guard, false),
			Err(_) => {
				tracing::debug!(identity, "refresh already in flight; waiting");

				(slot.clone().lock_owned().await, true)
			},
		};

		IdentityGuard {
			registry: self.clone(),
			identity: identity.to_owned(),
			slot,
			guard: Some(guard),
			waited,
		}
	}

	/// Number of identities currently held or awaited.
	pub fn len(&self) -> usize {
		self.lock_slots().len()
	}

	/// Whether no refresh is in flight.
	pub fn is_empty(&self) -> bool {
		self.lock_slots().is_empty()
	}

	fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
		self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

/// Exclusive claim on an identity; released on drop.
#[derive(Debug)]
pub struct IdentityGuard {
	registry: Arc<InFlightRegistry>,
	identity: String,
	slot: Slot,
	guard: Option<OwnedMutexGuard<()>>,
	waited: bool,
}
impl IdentityGuard {
	/// Identity this guard serializes.
	pub fn identity(&self) -> &str {
		&self.identity
	}

	/// Whether another refresh for the identity had to finish first.
	pub fn waited(&self) -> bool {
		self.waited
	}
}
impl Drop for IdentityGuard {
	fn drop(&mut self) {
		self.guard.take();

		let mut slots = self.registry.lock_slots();

		// Remaining references: the registry map and this guard. Waiters hold their own.
		if Arc::strong_count(&self.slot) == 2 {
			slots.remove(&self.identity);
		}
	}
}

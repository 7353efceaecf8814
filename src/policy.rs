//! Staleness policy deciding when cached attributes must be refreshed.

// self
use crate::{_prelude::*, record::UserAttributeRecord};

/// Whether `record` is due for refresh under `max_age` at `now`.
///
/// Explicit invalidation always wins, a zero max age makes every record due, and a record
/// that was never refreshed is due. Otherwise the record is due once its age reaches
/// `max_age`.
pub fn is_due(record: &UserAttributeRecord, max_age: Duration, now: DateTime<Utc>) -> bool {
	if record.needs_refresh || max_age.is_zero() {
		return true;
	}

	let Some(age) = record.age(now) else {
		return true;
	};

	// Max ages beyond the `TimeDelta` range can never be reached.
	match TimeDelta::from_std(max_age) {
		Ok(max_age) => age >= max_age,
		Err(_) => false,
	}
}

/// Parse a max-age setting expressed as whole seconds.
pub fn parse_max_age(setting: &str) -> Result<Duration> {
	let trimmed = setting.trim();
	let seconds = trimmed.parse::<u64>().map_err(|err| Error::MaxAgeFormat {
		value: setting.to_owned(),
		reason: format!("Expected a non-negative whole number of seconds ({err})."),
	})?;

	Ok(Duration::from_secs(seconds))
}

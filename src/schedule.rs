//! Cron schedule parsing for the recurring refresh trigger.

// std
use std::{fmt, str::FromStr};
// crates.io
use smallvec::{SmallVec, smallvec};
// self
use crate::_prelude::*;

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parsed, immutable representation of a standard 5-field cron expression.
///
/// When both day-of-month and day-of-week are restricted, a day matching either field
/// fires, as in classic cron.
#[derive(Clone, Debug)]
pub struct CronSchedule {
	expression: Arc<str>,
	// One schedule, or one per day field when both are restricted.
	schedules: SmallVec<[cron::Schedule; 2]>,
}
impl CronSchedule {
	/// Parse a cron expression.
	///
	/// An empty expression is valid and disables the recurring trigger, yielding `None`.
	/// Otherwise the expression must have the standard five fields
	/// (`minute hour day-of-month month day-of-week`) or be one of the predefined
	/// descriptors such as `@daily`.
	pub fn parse(expression: &str) -> Result<Option<Self>> {
		let trimmed = expression.trim();

		if trimmed.is_empty() {
			return Ok(None);
		}

		let standard = expand_descriptor(trimmed)?;
		let fields = standard.split_whitespace().collect::<Vec<_>>();
		let &[minute, hour, day, month, weekday] = fields.as_slice() else {
			return Err(syntax_error(
				expression,
				format!("Expected 5 fields (minute hour day month weekday), found {}.", fields.len()),
			));
		};
		// The underlying parser expects a leading seconds field and named weekdays.
		let weekday = normalize_weekdays(weekday);
		let build = |day: &str, weekday: &str| {
			cron::Schedule::from_str(&format!("0 {minute} {hour} {day} {month} {weekday}"))
				.map_err(|err| syntax_error(expression, err.to_string()))
		};
		let schedules = if is_unrestricted(day) || is_unrestricted(&weekday) {
			smallvec![build(day, &weekday)?]
		} else {
			smallvec![build(day, "*")?, build("*", &weekday)?]
		};

		Ok(Some(Self { expression: Arc::from(trimmed), schedules }))
	}

	/// Expression this schedule was parsed from.
	pub fn expression(&self) -> &str {
		&self.expression
	}

	/// Next fire instant strictly after `after`, if the schedule ever fires again.
	pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
		self.schedules.iter().filter_map(|schedule| schedule.after(&after).next()).min()
	}
}
impl fmt::Display for CronSchedule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.expression)
	}
}

fn expand_descriptor(expression: &str) -> Result<&str> {
	if !expression.starts_with('@') {
		return Ok(expression);
	}

	match expression.to_ascii_lowercase().as_str() {
		"@yearly" | "@annually" => Ok("0 0 1 1 *"),
		"@monthly" => Ok("0 0 1 * *"),
		"@weekly" => Ok("0 0 * * 0"),
		"@daily" | "@midnight" => Ok("0 0 * * *"),
		"@hourly" => Ok("0 * * * *"),
		_ => Err(syntax_error(expression, "Unrecognized descriptor.".into())),
	}
}

// Rewrites numeric weekdays (0-7, both 0 and 7 meaning Sunday) into names so the
// numbering is unambiguous for the underlying parser.
fn normalize_weekdays(field: &str) -> String {
	field
		.split(',')
		.map(|item| {
			let (base, step) = match item.split_once('/') {
				Some((base, step)) => (base, Some(step)),
				None => (item, None),
			};
			let base = match base.split_once('-') {
				Some((start, "7")) if step.is_none() && weekday_name(start).is_some() =>
					match start {
						"0" => "SUN-SAT".to_owned(),
						"7" => "SUN".to_owned(),
						_ => format!("{}-SAT,SUN", weekday_name(start).unwrap_or(start)),
					},
				Some((start, end)) => format!(
					"{}-{}",
					weekday_name(start).unwrap_or(start),
					weekday_name(end).unwrap_or(end)
				),
				None => weekday_name(base).unwrap_or(base).to_owned(),
			};

			match step {
				Some(step) => format!("{base}/{step}"),
				None => base,
			}
		})
		.collect::<Vec<_>>()
		.join(",")
}

fn is_unrestricted(field: &str) -> bool {
	matches!(field, "*" | "?")
}

fn weekday_name(token: &str) -> Option<&'static str> {
	token.parse::<usize>().ok().and_then(|index| WEEKDAY_NAMES.get(index).copied())
}

fn syntax_error(expression: &str, reason: String) -> Error {
	Error::ScheduleSyntax { expression: expression.to_owned(), reason }
}

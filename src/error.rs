//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the attribute refresh crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Serde(#[from] serde_json::Error),

	#[error("Refresh coordinator has not been initialized.")]
	NotInitialized,
	#[error("Invalid refresh cron expression '{expression}': {reason}")]
	ScheduleSyntax { expression: String, reason: String },
	#[error("Invalid refresh max age '{value}': {reason}")]
	MaxAgeFormat { value: String, reason: String },
	#[error("Identity provider fetch failed for '{identity}': {reason}")]
	ProviderFetch { identity: String, reason: String },
	#[error("Failed to persist attributes for '{identity}': {reason}")]
	StoreWrite { identity: String, reason: String },
	#[error("Failed to read attribute store: {0}")]
	StoreRead(String),
	#[error("No attribute record for identity '{identity}'.")]
	RecordNotFound { identity: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}

//! Task record types, identity keys and status definitions.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::CatalogError;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Leased by a worker.
    InProgress,
    /// Artifact stored; terminal.
    Completed,
    /// Retry budget exhausted; terminal until an operator reset.
    Failed,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Natural identity of a task: one symbol, one expiration, one quote date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, FromRow, Serialize, Deserialize)]
pub struct TaskKey {
    /// Option root symbol, upper-cased (e.g. `SPXW`).
    pub symbol: String,
    /// Contract expiration date.
    pub expiration: NaiveDate,
    /// Quote date the data covers.
    pub target_date: NaiveDate,
}

impl TaskKey {
    /// Builds a key from raw strings, validating the symbol and both dates.
    ///
    /// Dates are accepted as `YYYY-MM-DD` or `YYYYMMDD`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidKey`] for an empty or non-alphanumeric
    /// symbol or an unparseable date.
    pub fn parse(symbol: &str, expiration: &str, target_date: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            symbol: Self::normalize_symbol(symbol)?,
            expiration: parse_date(expiration)?,
            target_date: parse_date(target_date)?,
        })
    }

    /// Trims and upper-cases a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidKey`] for an empty or non-alphanumeric
    /// symbol.
    pub fn normalize_symbol(symbol: &str) -> Result<String, CatalogError> {
        let symbol = symbol.trim();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CatalogError::invalid_key(format!(
                "symbol '{symbol}' must be non-empty and alphanumeric"
            )));
        }
        Ok(symbol.to_ascii_uppercase())
    }

    /// Expiration formatted the way the provider API expects (`YYYYMMDD`).
    #[must_use]
    pub fn expiration_compact(&self) -> String {
        self.expiration.format("%Y%m%d").to_string()
    }

    /// Target date formatted the way the provider API expects (`YYYYMMDD`).
    #[must_use]
    pub fn target_date_compact(&self) -> String {
        self.target_date.format("%Y%m%d").to_string()
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, CatalogError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| CatalogError::invalid_key(format!("'{raw}' is not a YYYY-MM-DD date")))
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.symbol, self.expiration, self.target_date)
    }
}

/// Parses `symbol,expiration,date` (commas or whitespace as separators).
impl FromStr for TaskKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect();
        match parts.as_slice() {
            [symbol, expiration, target_date] => Self::parse(symbol, expiration, target_date),
            _ => Err(CatalogError::invalid_key(format!(
                "expected 'symbol,expiration,date', got '{}'",
                s.trim()
            ))),
        }
    }
}

/// A row of the task catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    /// Surrogate identifier.
    pub id: i64,
    /// Identity fields, never mutated after creation.
    #[sqlx(flatten)]
    pub key: TaskKey,
    /// Current lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    /// When the current lease was taken; set only while `in_progress`.
    pub lease_started_at: Option<String>,
    /// Fencing counter, bumped by every claim. Reports must present the
    /// value their claim returned.
    pub lease_token: i64,
    /// When the task completed; set exactly once.
    pub completed_at: Option<String>,
    /// Failed attempts so far.
    pub retry_count: i64,
    /// Most recent failure description.
    pub last_error: Option<String>,
    /// Locator of the stored artifact; set only when completed.
    pub artifact_reference: Option<String>,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

impl Task {
    /// Returns true while a worker holds the lease.
    #[must_use]
    pub fn is_leased(&self) -> bool {
        self.status == TaskStatus::InProgress
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {{ id: {}, key: {}, status: {}, retries: {} }}",
            self.id, self.key, self.status, self.retry_count
        )
    }
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Waiting to be claimed.
    pub pending: i64,
    /// Currently leased.
    pub in_progress: i64,
    /// Finished successfully.
    pub completed: i64,
    /// Terminally failed.
    pub failed: i64,
}

impl StatusCounts {
    /// Returns the count for one status.
    #[must_use]
    pub fn get(&self, status: TaskStatus) -> i64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
        }
    }

    pub(crate) fn set(&mut self, status: TaskStatus, count: i64) {
        match status {
            TaskStatus::Pending => self.pending = count,
            TaskStatus::InProgress => self.in_progress = count,
            TaskStatus::Completed => self.completed = count,
            TaskStatus::Failed => self.failed = count,
        }
    }

    /// Total number of tasks in the catalog.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fixed-width UTC timestamp; lexical order equals chronological order.
pub fn timestamp(at: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    at.to_offset(time::UtcOffset::UTC).format(&fmt).unwrap_or_default()
}

pub fn now_timestamp() -> String {
    timestamp(OffsetDateTime::now_utc())
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub started_at: String,
    pub mode: String,
    pub tool_version: String,
    pub seeds_json: String,
}

impl RunMeta {
    pub fn new(mode: &str, seeds: &[String]) -> Self {
        RunMeta {
            run_id: Uuid::now_v7(),
            started_at: now_timestamp(),
            mode: mode.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            seeds_json: serde_json::to_string(seeds).unwrap_or_else(|_| "[]".into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTotals {
    pub candidate_count: i64,
    pub new_active: i64,
    pub new_live: i64,
    pub deprecated_active: i64,
    pub deprecated_live: i64,
    pub error_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub mode: String,
    pub seeds: Vec<String>,
    pub totals: RunTotals,
}

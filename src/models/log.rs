use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct LogGroup {
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub retention_days: Option<u32>,
    pub streams: std::collections::BTreeMap<String, LogStream>,
}

impl LogGroup {
    pub fn stored_bytes(&self) -> u64 {
        self.streams.values().map(|s| s.stored_bytes).sum()
    }
}

#[derive(Debug, Clone)]
pub struct LogStream {
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub last_ingestion_time: Option<DateTime<Utc>>,
    pub stored_bytes: u64,
    pub events: Vec<LogEvent>,
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub ingestion_time_ms: i64,
    pub message: String,
}

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::error::CoreError;
use crate::models::log::{LogEvent, LogGroup, LogStream};

/// Owns every log group/stream/event. Single owner, `RwLock`-guarded:
/// concurrent reads (describe/get) are cheap, writes (create/append/delete)
/// take the write half.
pub struct LogLedger {
    groups: RwLock<BTreeMap<String, LogGroup>>,
}

impl Default for LogLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LogLedger {
    pub fn new() -> Self {
        Self { groups: RwLock::new(BTreeMap::new()) }
    }

    pub fn create_group(&self, name: &str, retention_days: Option<u32>) -> Result<(), CoreError> {
        let mut groups = self.groups.write().unwrap();
        if groups.contains_key(name) {
            return Err(CoreError::already_exists(format!(
                "The specified log group already exists: {name}"
            )));
        }
        groups.insert(
            name.to_string(),
            LogGroup {
                name: name.to_string(),
                creation_time: Utc::now(),
                retention_days,
                streams: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn delete_group(&self, name: &str) -> Result<(), CoreError> {
        let mut groups = self.groups.write().unwrap();
        groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("The specified log group does not exist: {name}")))
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.groups.read().unwrap().contains_key(name)
    }

    pub fn create_stream(&self, group: &str, stream: &str) -> Result<(), CoreError> {
        let mut groups = self.groups.write().unwrap();
        let g = groups
            .get_mut(group)
            .ok_or_else(|| CoreError::not_found(format!("The specified log group does not exist: {group}")))?;
        if g.streams.contains_key(stream) {
            return Err(CoreError::already_exists(format!(
                "The specified log stream already exists: {stream}"
            )));
        }
        g.streams.insert(
            stream.to_string(),
            LogStream {
                name: stream.to_string(),
                creation_time: Utc::now(),
                last_ingestion_time: None,
                stored_bytes: 0,
                events: Vec::new(),
            },
        );
        Ok(())
    }

    /// Auto-creates the group and stream if missing. `timestamp_ms` defaults
    /// to now; `ingestionTime` is always now. Re-sorts and recomputes
    /// `storedBytes` after insert.
    pub fn append_event(
        &self,
        group: &str,
        stream: &str,
        message: &str,
        timestamp_ms: Option<i64>,
    ) -> i64 {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let ts = timestamp_ms.unwrap_or(now_ms);

        let mut groups = self.groups.write().unwrap();
        let g = groups.entry(group.to_string()).or_insert_with(|| LogGroup {
            name: group.to_string(),
            creation_time: now,
            retention_days: None,
            streams: BTreeMap::new(),
        });
        let s = g.streams.entry(stream.to_string()).or_insert_with(|| LogStream {
            name: stream.to_string(),
            creation_time: now,
            last_ingestion_time: None,
            stored_bytes: 0,
            events: Vec::new(),
        });

        s.events.push(LogEvent {
            timestamp_ms: ts,
            ingestion_time_ms: now_ms,
            message: message.to_string(),
        });
        // stable sort preserves insertion order for ties
        s.events.sort_by_key(|e| e.timestamp_ms);
        s.stored_bytes = s.events.iter().map(|e| e.message.len() as u64).sum();
        s.last_ingestion_time = Some(now);

        ts
    }

    pub fn describe_groups(&self, prefix: &str) -> Vec<(String, i64, u64, Option<u32>)> {
        let groups = self.groups.read().unwrap();
        let mut out: Vec<_> = groups
            .values()
            .filter(|g| g.name.starts_with(prefix))
            .map(|g| (g.name.clone(), g.creation_time.timestamp_millis(), g.stored_bytes(), g.retention_days))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<(String, i64, u64, Option<i64>)>, CoreError> {
        let groups = self.groups.read().unwrap();
        let g = groups
            .get(group)
            .ok_or_else(|| CoreError::not_found(format!("The specified log group does not exist: {group}")))?;
        let mut out: Vec<_> = g
            .streams
            .values()
            .filter(|s| s.name.starts_with(prefix))
            .map(|s| {
                (
                    s.name.clone(),
                    s.creation_time.timestamp_millis(),
                    s.stored_bytes,
                    s.last_ingestion_time.map(|t| t.timestamp_millis()),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    pub fn get_events(&self, group: &str, stream: &str) -> Result<Vec<LogEvent>, CoreError> {
        let groups = self.groups.read().unwrap();
        let g = groups
            .get(group)
            .ok_or_else(|| CoreError::not_found(format!("The specified log group does not exist: {group}")))?;
        let s = g
            .streams
            .get(stream)
            .ok_or_else(|| CoreError::not_found(format!("The specified log stream does not exist: {stream}")))?;
        let mut events = s.events.clone();
        events.sort_by_key(|e| e.timestamp_ms);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_group_rejects_duplicate() {
        let ledger = LogLedger::new();
        ledger.create_group("/aws/lambda/f", None).unwrap();
        let err = ledger.create_group("/aws/lambda/f", None).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn delete_group_not_found() {
        let ledger = LogLedger::new();
        let err = ledger.delete_group("/nope").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn append_auto_creates_and_sorts_by_timestamp() {
        let ledger = LogLedger::new();
        ledger.append_event("g", "s", "second", Some(200));
        ledger.append_event("g", "s", "first", Some(100));
        let events = ledger.get_events("g", "s").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "first");
        assert_eq!(events[1].message, "second");
    }

    #[test]
    fn stored_bytes_equals_sum_of_message_lengths() {
        let ledger = LogLedger::new();
        ledger.append_event("g", "s", "abc", Some(1));
        ledger.append_event("g", "s", "de", Some(2));
        let streams = ledger.describe_streams("g", "").unwrap();
        assert_eq!(streams[0].2, 5);
    }

    #[test]
    fn stable_sort_preserves_insertion_order_on_ties() {
        let ledger = LogLedger::new();
        ledger.append_event("g", "s", "a", Some(100));
        ledger.append_event("g", "s", "b", Some(100));
        let events = ledger.get_events("g", "s").unwrap();
        assert_eq!(events[0].message, "a");
        assert_eq!(events[1].message, "b");
    }

    #[test]
    fn describe_groups_filters_by_prefix_and_sorts() {
        let ledger = LogLedger::new();
        ledger.create_group("/aws/lambda/b", None).unwrap();
        ledger.create_group("/aws/lambda/a", None).unwrap();
        ledger.create_group("/other", None).unwrap();
        let groups = ledger.describe_groups("/aws/lambda/");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "/aws/lambda/a");
        assert_eq!(groups[1].0, "/aws/lambda/b");
    }
}

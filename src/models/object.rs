use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub objects: std::collections::BTreeMap<String, StoredObject>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub body: Vec<u8>,
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct ListV2Page {
    pub keys: Vec<StoredObject>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

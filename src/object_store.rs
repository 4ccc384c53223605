use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::CoreError;
use crate::models::object::{Bucket, ListV2Page, StoredObject, DEFAULT_CONTENT_TYPE};

fn bucket_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").unwrap())
}

/// Owns every bucket/object. Single owner, `RwLock`-guarded.
pub struct ObjectStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self { buckets: RwLock::new(BTreeMap::new()) }
    }

    pub fn validate_bucket_name(name: &str) -> Result<(), CoreError> {
        if !bucket_name_re().is_match(name) {
            return Err(CoreError::invalid_argument(format!("Invalid bucket name: {name}")));
        }
        Ok(())
    }

    pub fn create_bucket(&self, name: &str) -> Result<(), CoreError> {
        Self::validate_bucket_name(name)?;
        let mut buckets = self.buckets.write().unwrap();
        if buckets.contains_key(name) {
            return Err(CoreError::already_exists(format!("Bucket already exists: {name}")));
        }
        buckets.insert(
            name.to_string(),
            Bucket { name: name.to_string(), creation_time: Utc::now(), objects: BTreeMap::new() },
        );
        Ok(())
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.buckets.read().unwrap().contains_key(name)
    }

    pub fn list_buckets(&self) -> Vec<(String, chrono::DateTime<Utc>)> {
        self.buckets.read().unwrap().values().map(|b| (b.name.clone(), b.creation_time)).collect()
    }

    pub fn delete_bucket(&self, name: &str) -> Result<(), CoreError> {
        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets
            .get(name)
            .ok_or_else(|| CoreError::not_found(format!("The specified bucket does not exist: {name}")))?;
        if !bucket.objects.is_empty() {
            return Err(CoreError::conflict("The bucket you tried to delete is not empty"));
        }
        buckets.remove(name);
        Ok(())
    }

    pub fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: Option<String>) -> Result<String, CoreError> {
        if key.is_empty() {
            return Err(CoreError::invalid_argument("Object key must not be empty"));
        }
        let mut buckets = self.buckets.write().unwrap();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| CoreError::not_found(format!("The specified bucket does not exist: {bucket}")))?;
        let etag = format!("{:x}", md5::compute(&body));
        b.objects.insert(
            key.to_string(),
            StoredObject {
                key: key.to_string(),
                body,
                etag: etag.clone(),
                content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                last_modified: Utc::now(),
            },
        );
        Ok(etag)
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, CoreError> {
        let buckets = self.buckets.read().unwrap();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| CoreError::not_found(format!("The specified bucket does not exist: {bucket}")))?;
        b.objects
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("The specified key does not exist: {key}")))
    }

    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CoreError> {
        let mut buckets = self.buckets.write().unwrap();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| CoreError::not_found(format!("The specified bucket does not exist: {bucket}")))?;
        b.objects.remove(key);
        Ok(())
    }

    /// `listV2` semantics: ascending-sorted candidates filtered by prefix;
    /// the token (if any) excludes keys `<= token`; page length is `max_keys`.
    pub fn list_v2(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListV2Page, CoreError> {
        let buckets = self.buckets.read().unwrap();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| CoreError::not_found(format!("The specified bucket does not exist: {bucket}")))?;

        let mut candidates: Vec<&StoredObject> =
            b.objects.values().filter(|o| o.key.starts_with(prefix)).collect();
        candidates.sort_by(|a, c| a.key.cmp(&c.key));

        let start = match continuation_token {
            Some(tok) => candidates.iter().position(|o| o.key.as_str() > tok).unwrap_or(candidates.len()),
            None => 0,
        };
        let remaining = &candidates[start..];
        let page_len = remaining.len().min(max_keys);
        let page: Vec<StoredObject> = remaining[..page_len].iter().map(|o| (*o).clone()).collect();
        let is_truncated = remaining.len() > page_len;
        let next_continuation_token = if is_truncated { page.last().map(|o| o.key.clone()) } else { None };

        Ok(ListV2Page { keys: page, is_truncated, next_continuation_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_equals_md5_of_body() {
        let store = ObjectStore::new();
        store.create_bucket("my-bucket").unwrap();
        let etag = store.put_object("my-bucket", "k", b"hello".to_vec(), None).unwrap();
        assert_eq!(etag, format!("{:x}", md5::compute(b"hello")));
        let obj = store.get_object("my-bucket", "k").unwrap();
        assert_eq!(obj.body, b"hello");
        assert_eq!(obj.etag, etag);
    }

    #[test]
    fn delete_nonempty_bucket_fails() {
        let store = ObjectStore::new();
        store.create_bucket("b").unwrap();
        store.put_object("b", "k", b"x".to_vec(), None).unwrap();
        let err = store.delete_bucket("b").unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn invalid_bucket_name_rejected() {
        let store = ObjectStore::new();
        let err = store.create_bucket("AB").unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn list_v2_pagination_matches_spec_scenario() {
        let store = ObjectStore::new();
        store.create_bucket("b").unwrap();
        for k in ["a", "b", "c", "d", "e"] {
            store.put_object("b", k, vec![], None).unwrap();
        }

        let p1 = store.list_v2("b", "", 2, None).unwrap();
        assert_eq!(p1.keys.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(p1.is_truncated);
        assert_eq!(p1.next_continuation_token.as_deref(), Some("b"));

        let p2 = store.list_v2("b", "", 2, Some("b")).unwrap();
        assert_eq!(p2.keys.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(), vec!["c", "d"]);
        assert!(p2.is_truncated);
        assert_eq!(p2.next_continuation_token.as_deref(), Some("d"));

        let p3 = store.list_v2("b", "", 2, Some("d")).unwrap();
        assert_eq!(p3.keys.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(), vec!["e"]);
        assert!(!p3.is_truncated);
    }
}

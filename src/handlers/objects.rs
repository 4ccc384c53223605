use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use serde::Deserialize;

use crate::AppState;
use crate::dialect::xml;

#[derive(Debug, Deserialize, Default)]
pub struct ListObjectsV2Query {
    #[serde(rename = "list-type")]
    #[serde(default)]
    pub list_type: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(rename = "max-keys")]
    #[serde(default)]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    #[serde(default)]
    pub continuation_token: Option<String>,
}

const DEFAULT_MAX_KEYS: usize = 1000;

pub async fn list_buckets(State(state): State<AppState>) -> Response {
    let buckets = state.object_store.list_buckets();
    xml::xml_response(StatusCode::OK, xml::list_buckets_xml(&buckets))
}

pub async fn create_bucket(State(state): State<AppState>, Path(bucket): Path<String>) -> Response {
    match state.object_store.create_bucket(&bucket) {
        Ok(()) => Response::builder().status(StatusCode::OK).header(header::LOCATION, format!("/{bucket}")).body(axum::body::Body::empty()).unwrap(),
        Err(e) => xml::error_response(&e, &bucket),
    }
}

pub async fn delete_bucket(State(state): State<AppState>, Path(bucket): Path<String>) -> Response {
    match state.object_store.delete_bucket(&bucket) {
        Ok(()) => Response::builder().status(StatusCode::NO_CONTENT).body(axum::body::Body::empty()).unwrap(),
        Err(e) => xml::error_response(&e, &bucket),
    }
}

pub async fn head_bucket(State(state): State<AppState>, Path(bucket): Path<String>) -> Response {
    let status = if state.object_store.bucket_exists(&bucket) { StatusCode::OK } else { StatusCode::NOT_FOUND };
    Response::builder().status(status).body(axum::body::Body::empty()).unwrap()
}

pub async fn list_objects_v2(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsV2Query>,
) -> Response {
    let max_keys = q.max_keys.unwrap_or(DEFAULT_MAX_KEYS);
    match state.object_store.list_v2(&bucket, &q.prefix, max_keys, q.continuation_token.as_deref()) {
        Ok(page) => xml::xml_response(StatusCode::OK, xml::list_objects_v2_xml(&bucket, &q.prefix, max_keys, &page)),
        Err(e) => xml::error_response(&e, &bucket),
    }
}

pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    match state.object_store.put_object(&bucket, &key, body.to_vec(), content_type) {
        Ok(etag) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{etag}\""))
            .body(axum::body::Body::empty())
            .unwrap(),
        Err(e) => xml::error_response(&e, &format!("{bucket}/{key}")),
    }
}

pub async fn get_object(State(state): State<AppState>, Path((bucket, key)): Path<(String, String)>) -> Response {
    match state.object_store.get_object(&bucket, &key) {
        Ok(obj) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, obj.content_type)
            .header(header::ETAG, format!("\"{}\"", obj.etag))
            .header(header::LAST_MODIFIED, obj.last_modified.to_rfc2822())
            .body(axum::body::Body::from(obj.body))
            .unwrap(),
        Err(e) => xml::error_response(&e, &format!("{bucket}/{key}")),
    }
}

pub async fn head_object(State(state): State<AppState>, Path((bucket, key)): Path<(String, String)>) -> Response {
    match state.object_store.get_object(&bucket, &key) {
        Ok(obj) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, obj.content_type)
            .header(header::ETAG, format!("\"{}\"", obj.etag))
            .header(header::CONTENT_LENGTH, obj.body.len())
            .body(axum::body::Body::empty())
            .unwrap(),
        Err(_) => Response::builder().status(StatusCode::NOT_FOUND).body(axum::body::Body::empty()).unwrap(),
    }
}

pub async fn delete_object(State(state): State<AppState>, Path((bucket, key)): Path<(String, String)>) -> Response {
    match state.object_store.delete_object(&bucket, &key) {
        Ok(()) => Response::builder().status(StatusCode::NO_CONTENT).body(axum::body::Body::empty()).unwrap(),
        Err(e) => xml::error_response(&e, &format!("{bucket}/{key}")),
    }
}

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::object::ListV2Page;

fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

pub fn xml_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}")))
        .unwrap()
}

/// Renders the shared error taxonomy into the S3-style
/// `<Error><Code>…</Code><Message>…</Message></Error>` document.
pub fn error_response(err: &CoreError, resource: &str) -> Response {
    let body = format!(
        "<Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource></Error>",
        escape(err.aws_code()),
        escape(&err.message()),
        escape(resource),
    );
    xml_response(err.status(), body)
}

pub fn list_buckets_xml(buckets: &[(String, DateTime<Utc>)]) -> String {
    let mut inner = String::new();
    for (name, created) in buckets {
        inner.push_str(&format!(
            "<Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            escape(name),
            created.to_rfc3339(),
        ));
    }
    format!(
        "<ListAllMyBucketsResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Owner><ID>microstack</ID><DisplayName>microstack</DisplayName></Owner><Buckets>{inner}</Buckets></ListAllMyBucketsResult>"
    )
}

pub fn list_objects_v2_xml(bucket: &str, prefix: &str, max_keys: usize, page: &ListV2Page) -> String {
    let mut contents = String::new();
    for obj in &page.keys {
        contents.push_str(&format!(
            "<Contents><Key>{}</Key><LastModified>{}</LastModified><ETag>&quot;{}&quot;</ETag><Size>{}</Size><StorageClass>STANDARD</StorageClass></Contents>",
            escape(&obj.key),
            obj.last_modified.to_rfc3339(),
            obj.etag,
            obj.body.len(),
        ));
    }
    let next_token_tag = page
        .next_continuation_token
        .as_ref()
        .map(|t| format!("<NextContinuationToken>{}</NextContinuationToken>", escape(t)))
        .unwrap_or_default();
    format!(
        "<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Name>{}</Name><Prefix>{}</Prefix><KeyCount>{}</KeyCount><MaxKeys>{}</MaxKeys><IsTruncated>{}</IsTruncated>{next_token_tag}{contents}</ListBucketResult>",
        escape(bucket),
        escape(prefix),
        page.keys.len(),
        max_keys,
        page.is_truncated,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::StoredObject;

    #[test]
    fn escape_handles_xml_metacharacters() {
        assert_eq!(escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn error_response_renders_s3_style_document() {
        let resp = error_response(&CoreError::not_found("no such bucket"), "my-bucket");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "application/xml");
    }

    #[test]
    fn list_objects_v2_xml_includes_truncation_token() {
        let page = ListV2Page {
            keys: vec![StoredObject {
                key: "a".to_string(),
                body: vec![1, 2, 3],
                etag: "abc".to_string(),
                content_type: "text/plain".to_string(),
                last_modified: Utc::now(),
            }],
            is_truncated: true,
            next_continuation_token: Some("a".to_string()),
        };
        let xml = list_objects_v2_xml("bucket", "", 10, &page);
        assert!(xml.contains("<NextContinuationToken>a</NextContinuationToken>"));
        assert!(xml.contains("<Key>a</Key>"));
        assert!(xml.contains("<Size>3</Size>"));
    }
}

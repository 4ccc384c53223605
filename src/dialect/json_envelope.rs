use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use serde::Serialize;

use crate::error::CoreError;

pub const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Renders the shared error taxonomy into the AWS JSON 1.1 envelope:
/// `{"__type": ..., "message": ...}` plus the `X-Amzn-ErrorType` header.
pub fn error_response(err: &CoreError) -> Response {
    let body = serde_json::json!({ "__type": err.aws_code(), "message": err.message() });
    Response::builder()
        .status(err.status())
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .header("x-amzn-errortype", err.aws_code())
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// Extracts the operation name off `X-Amz-Target: Logs_20140328.<Op>`.
pub fn extract_action(headers: &HeaderMap) -> Result<String, CoreError> {
    let target = headers
        .get("x-amz-target")
        .ok_or_else(|| CoreError::invalid_argument("Missing x-amz-target header"))?
        .to_str()
        .map_err(|_| CoreError::invalid_argument("x-amz-target header is not valid ASCII"))?;
    Ok(target.rsplit('.').next().unwrap_or(target).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_action_splits_on_last_dot() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-target", "Logs_20140328.DescribeLogGroups".parse().unwrap());
        assert_eq!(extract_action(&headers).unwrap(), "DescribeLogGroups");
    }

    #[test]
    fn extract_action_missing_header_is_invalid_argument() {
        let headers = HeaderMap::new();
        assert!(matches!(extract_action(&headers).unwrap_err(), CoreError::InvalidArgument(_)));
    }

    #[test]
    fn error_response_carries_error_type_header() {
        let resp = error_response(&CoreError::not_found("gone"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get("x-amzn-errortype").unwrap(), "ResourceNotFoundException");
    }
}

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::dialect::json_envelope::{self, json_response};
use crate::error::CoreError;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest {
    log_group_name: String,
    #[serde(default)]
    retention_in_days: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DeleteLogGroupRequest {
    log_group_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest {
    log_group_name: String,
    log_stream_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InputLogEvent {
    timestamp: i64,
    message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest {
    log_group_name: String,
    log_stream_name: String,
    #[serde(default)]
    log_events: Vec<InputLogEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsRequest {
    #[serde(default)]
    log_group_name_prefix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogGroupInfo {
    log_group_name: String,
    creation_time: i64,
    stored_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    retention_in_days: Option<u32>,
    arn: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsResponse {
    log_groups: Vec<LogGroupInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest {
    log_group_name: String,
    #[serde(default)]
    log_stream_name_prefix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamInfo {
    log_stream_name: String,
    creation_time: i64,
    stored_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_ingestion_time: Option<i64>,
    arn: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    log_streams: Vec<LogStreamInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsRequest {
    log_group_name: String,
    log_stream_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputLogEvent {
    timestamp: i64,
    ingestion_time: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsResponse {
    events: Vec<OutputLogEvent>,
}

fn parse_body<T: serde::de::DeserializeOwned + Default>(body: &[u8]) -> Result<T, CoreError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| CoreError::invalid_argument(format!("invalid request body: {e}")))
}

/// Single entry point for the Logs dialect: every operation rides `POST /`
/// with `X-Amz-Target: Logs_20140328.<Op>` and an AWS JSON 1.1 body.
pub async fn handle_logs_request(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match dispatch(&state, &headers, &body) {
        Ok(response) => response,
        Err(e) => json_envelope::error_response(&e),
    }
}

fn dispatch(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response, CoreError> {
    let action = json_envelope::extract_action(headers)?;
    match action.as_str() {
        "CreateLogGroup" => {
            let req: CreateLogGroupRequest = parse_body(body)?;
            state.log_ledger.create_group(&req.log_group_name, req.retention_in_days)?;
            Ok(json_response(StatusCode::OK, &serde_json::json!({})))
        }
        "DeleteLogGroup" => {
            let req: DeleteLogGroupRequest = parse_body(body)?;
            state.log_ledger.delete_group(&req.log_group_name)?;
            Ok(json_response(StatusCode::OK, &serde_json::json!({})))
        }
        "CreateLogStream" => {
            let req: CreateLogStreamRequest = parse_body(body)?;
            state.log_ledger.create_stream(&req.log_group_name, &req.log_stream_name)?;
            Ok(json_response(StatusCode::OK, &serde_json::json!({})))
        }
        "PutLogEvents" => {
            let req: PutLogEventsRequest = parse_body(body)?;
            let mut next_token = 0i64;
            for event in &req.log_events {
                next_token = state.log_ledger.append_event(
                    &req.log_group_name,
                    &req.log_stream_name,
                    &event.message,
                    Some(event.timestamp),
                );
            }
            Ok(json_response(
                StatusCode::OK,
                &PutLogEventsResponse { next_sequence_token: next_token.to_string() },
            ))
        }
        "DescribeLogGroups" => {
            let req: DescribeLogGroupsRequest = parse_body(body)?;
            let prefix = req.log_group_name_prefix.unwrap_or_default();
            let log_groups = state
                .log_ledger
                .describe_groups(&prefix)
                .into_iter()
                .map(|(name, creation_time, stored_bytes, retention_in_days)| LogGroupInfo {
                    arn: format!("arn:aws:logs:us-east-1:000000000000:log-group:{name}:*"),
                    log_group_name: name,
                    creation_time,
                    stored_bytes,
                    retention_in_days,
                })
                .collect();
            Ok(json_response(StatusCode::OK, &DescribeLogGroupsResponse { log_groups }))
        }
        "DescribeLogStreams" => {
            let req: DescribeLogStreamsRequest = parse_body(body)?;
            let prefix = req.log_stream_name_prefix.unwrap_or_default();
            let group = req.log_group_name.clone();
            let log_streams = state
                .log_ledger
                .describe_streams(&req.log_group_name, &prefix)?
                .into_iter()
                .map(|(name, creation_time, stored_bytes, last_ingestion_time)| LogStreamInfo {
                    arn: format!("arn:aws:logs:us-east-1:000000000000:log-group:{group}:log-stream:{name}"),
                    log_stream_name: name,
                    creation_time,
                    stored_bytes,
                    last_ingestion_time,
                })
                .collect();
            Ok(json_response(StatusCode::OK, &DescribeLogStreamsResponse { log_streams }))
        }
        "GetLogEvents" => {
            let req: GetLogEventsRequest = parse_body(body)?;
            let events = state
                .log_ledger
                .get_events(&req.log_group_name, &req.log_stream_name)?
                .into_iter()
                .map(|e| OutputLogEvent { timestamp: e.timestamp_ms, ingestion_time: e.ingestion_time_ms, message: e.message })
                .collect();
            Ok(json_response(StatusCode::OK, &GetLogEventsResponse { events }))
        }
        other => Err(CoreError::invalid_argument(format!("Unknown operation: {other}"))),
    }
}

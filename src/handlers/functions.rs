use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::AppState;
use crate::dialect::json_envelope;
use crate::function_registry::{ConfigPatch, CreateInput};
use crate::function_runtime;
use crate::models::function::{CreateFunctionRequest, FunctionRecord, ListFunctionsResponse, UpdateCodeRequest, UpdateConfigRequest};

pub async fn create_function(
    State(state): State<AppState>,
    Json(req): Json<CreateFunctionRequest>,
) -> Result<Response, Response> {
    let environment = req.environment.map(|e| e.variables).unwrap_or_default();
    let input = CreateInput {
        name: req.function_name,
        runtime: req.runtime,
        role: req.role,
        handler: req.handler,
        code_bundle_base64: req.code.zip_file,
        timeout_seconds: req.timeout,
        environment,
    };
    let record = state.function_registry.create(input).map_err(|e| json_envelope::error_response(&e))?;
    Ok(json_envelope::json_response(StatusCode::CREATED, &record.to_config_response()))
}

pub async fn list_functions(State(state): State<AppState>) -> Response {
    let functions = state.function_registry.list().iter().map(FunctionRecord::to_config_response).collect();
    json_envelope::json_response(StatusCode::OK, &ListFunctionsResponse { functions })
}

pub async fn get_function(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response, Response> {
    let record = state.function_registry.get(&name).map_err(|e| json_envelope::error_response(&e))?;
    Ok(json_envelope::json_response(StatusCode::OK, &record.to_config_response()))
}

pub async fn delete_function(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response, Response> {
    state.function_registry.delete(&name).map_err(|e| json_envelope::error_response(&e))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn update_function_configuration(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<Response, Response> {
    let patch = ConfigPatch {
        runtime: req.runtime,
        role: req.role,
        handler: req.handler,
        timeout_seconds: req.timeout,
        environment: req.environment.map(|e| e.variables),
    };
    let record = state
        .function_registry
        .update_config(&name, patch)
        .map_err(|e| json_envelope::error_response(&e))?;
    Ok(json_envelope::json_response(StatusCode::OK, &record.to_config_response()))
}

pub async fn update_function_code(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateCodeRequest>,
) -> Result<Response, Response> {
    let record = state
        .function_registry
        .update_code(&name, &req.zip_file)
        .map_err(|e| json_envelope::error_response(&e))?;
    Ok(json_envelope::json_response(StatusCode::OK, &record.to_config_response()))
}

/// Invocations always answer 200 on a handler fault or timeout (§4.D) —
/// `functionError` surfaces only through the `X-Amz-Function-Error` header.
pub async fn invoke_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, Response> {
    let scratch_root = state.config.runtime_scratch_root();
    let result = function_runtime::invoke(&state.function_registry, &state.log_ledger, &scratch_root, &name, &body)
        .await
        .map_err(|e| json_envelope::error_response(&e))?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-amz-executed-version", "$LATEST");
    if result.function_error.is_some() {
        builder = builder.header("x-amz-function-error", "Unhandled");
    }
    Ok(builder.body(Body::from(result.payload)).unwrap())
}

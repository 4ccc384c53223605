use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;

use crate::AppState;
use crate::dialect::query_xml;
use crate::error::CoreError;

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    form_urlencoded::parse(body).into_owned().collect()
}

fn required<'a>(form: &'a HashMap<String, String>, key: &str) -> Result<&'a str, CoreError> {
    form.get(key)
        .map(String::as_str)
        .ok_or_else(|| CoreError::invalid_argument(format!("Missing required parameter: {key}")))
}

/// Single entry point for the CloudFormation-style dialect: every operation
/// rides `POST /` with an `application/x-www-form-urlencoded` body whose
/// `Action` field selects the operation.
pub async fn handle_stacks_request(State(state): State<AppState>, body: Bytes) -> Response {
    let form = parse_form(&body);
    match dispatch(&state, &form) {
        Ok(response) => response,
        Err(e) => query_xml::error_response(&e),
    }
}

fn dispatch(state: &AppState, form: &HashMap<String, String>) -> Result<Response, CoreError> {
    let action = required(form, "Action")?;
    match action {
        "CreateStack" => {
            let stack_name = required(form, "StackName")?;
            let template_body = required(form, "TemplateBody")?;
            let summary = state.stack_orchestrator.create_stack(stack_name, template_body)?;
            Ok(query_xml::xml_response(StatusCode::OK, query_xml::create_stack_response(&summary.stack_id)))
        }
        "UpdateStack" => {
            let stack_name = required(form, "StackName")?;
            let template_body = required(form, "TemplateBody")?;
            let summary = state.stack_orchestrator.update_stack(stack_name, template_body)?;
            Ok(query_xml::xml_response(StatusCode::OK, query_xml::update_stack_response(&summary.stack_id)))
        }
        "DeleteStack" => {
            let stack_name = required(form, "StackName")?;
            state.stack_orchestrator.delete_stack(stack_name)?;
            Ok(query_xml::xml_response(StatusCode::OK, query_xml::delete_stack_response()))
        }
        "DescribeStacks" => {
            let name_filter = form.get("StackName").map(String::as_str);
            let stacks = state.stack_orchestrator.describe_stacks(name_filter)?;
            Ok(query_xml::xml_response(StatusCode::OK, query_xml::describe_stacks_response(&stacks)))
        }
        "DescribeStackResources" => {
            let stack_name = required(form, "StackName")?;
            let resources = state.stack_orchestrator.describe_stack_resources(stack_name)?;
            Ok(query_xml::xml_response(StatusCode::OK, query_xml::describe_stack_resources_response(&resources)))
        }
        "DescribeStackEvents" => {
            let stack_name = required(form, "StackName")?;
            let events = state.stack_orchestrator.describe_stack_events(stack_name)?;
            Ok(query_xml::xml_response(StatusCode::OK, query_xml::describe_stack_events_response(&events)))
        }
        other => Err(CoreError::invalid_argument(format!("Unknown operation: {other}"))),
    }
}

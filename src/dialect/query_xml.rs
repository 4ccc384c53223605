use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::stack::{ResourceRecord, StackEvent};
use crate::stack_orchestrator::StackSummary;

fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

pub fn xml_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/xml")
        .body(Body::from(format!("<?xml version=\"1.0\"?>\n{body}")))
        .unwrap()
}

/// Renders the shared error taxonomy into the CloudFormation-style
/// `<ErrorResponse><Error>…</Error></ErrorResponse>` envelope.
pub fn error_response(err: &CoreError) -> Response {
    let body = format!(
        "<ErrorResponse><Error><Type>Sender</Type><Code>{}</Code><Message>{}</Message></Error><RequestId>{}</RequestId></ErrorResponse>",
        escape(err.aws_code()),
        escape(&err.message()),
        Uuid::new_v4(),
    );
    xml_response(err.status(), body)
}

fn response_metadata() -> String {
    format!("<ResponseMetadata><RequestId>{}</RequestId></ResponseMetadata>", Uuid::new_v4())
}

pub fn create_stack_response(stack_id: &str) -> String {
    format!(
        "<CreateStackResponse xmlns=\"http://cloudformation.amazonaws.com/doc/2010-05-15/\"><CreateStackResult><StackId>{}</StackId></CreateStackResult>{}</CreateStackResponse>",
        escape(stack_id),
        response_metadata(),
    )
}

pub fn update_stack_response(stack_id: &str) -> String {
    format!(
        "<UpdateStackResponse xmlns=\"http://cloudformation.amazonaws.com/doc/2010-05-15/\"><UpdateStackResult><StackId>{}</StackId></UpdateStackResult>{}</UpdateStackResponse>",
        escape(stack_id),
        response_metadata(),
    )
}

pub fn delete_stack_response() -> String {
    format!(
        "<DeleteStackResponse xmlns=\"http://cloudformation.amazonaws.com/doc/2010-05-15/\">{}</DeleteStackResponse>",
        response_metadata(),
    )
}

fn stack_member_xml(s: &StackSummary) -> String {
    let reason = s
        .status_reason
        .as_ref()
        .map(|r| format!("<StackStatusReason>{}</StackStatusReason>", escape(r)))
        .unwrap_or_default();
    format!(
        "<member><StackId>{}</StackId><StackName>{}</StackName><CreationTime>{}</CreationTime><StackStatus>{}</StackStatus>{reason}</member>",
        escape(&s.stack_id),
        escape(&s.stack_name),
        s.creation_time.to_rfc3339(),
        s.status,
    )
}

pub fn describe_stacks_response(stacks: &[StackSummary]) -> String {
    let members: String = stacks.iter().map(stack_member_xml).collect();
    format!(
        "<DescribeStacksResponse xmlns=\"http://cloudformation.amazonaws.com/doc/2010-05-15/\"><DescribeStacksResult><Stacks>{members}</Stacks></DescribeStacksResult>{}</DescribeStacksResponse>",
        response_metadata(),
    )
}

fn resource_member_xml(r: &ResourceRecord) -> String {
    let reason = r
        .status_reason
        .as_ref()
        .map(|m| format!("<ResourceStatusReason>{}</ResourceStatusReason>", escape(m)))
        .unwrap_or_default();
    format!(
        "<member><LogicalResourceId>{}</LogicalResourceId><PhysicalResourceId>{}</PhysicalResourceId><ResourceType>{}</ResourceType><Timestamp>{}</Timestamp><ResourceStatus>{}</ResourceStatus>{reason}</member>",
        escape(&r.logical_id),
        escape(&r.physical_id),
        escape(&r.resource_type),
        r.timestamp.to_rfc3339(),
        r.status.as_str(),
    )
}

pub fn describe_stack_resources_response(resources: &[ResourceRecord]) -> String {
    let members: String = resources.iter().map(resource_member_xml).collect();
    format!(
        "<DescribeStackResourcesResponse xmlns=\"http://cloudformation.amazonaws.com/doc/2010-05-15/\"><DescribeStackResourcesResult><StackResources>{members}</StackResources></DescribeStackResourcesResult>{}</DescribeStackResourcesResponse>",
        response_metadata(),
    )
}

fn event_member_xml(e: &StackEvent) -> String {
    let reason = e
        .resource_status_reason
        .as_ref()
        .map(|m| format!("<ResourceStatusReason>{}</ResourceStatusReason>", escape(m)))
        .unwrap_or_default();
    format!(
        "<member><EventId>{}</EventId><LogicalResourceId>{}</LogicalResourceId><PhysicalResourceId>{}</PhysicalResourceId><ResourceType>{}</ResourceType><Timestamp>{}</Timestamp><ResourceStatus>{}</ResourceStatus>{reason}</member>",
        escape(&e.event_id),
        escape(&e.logical_resource_id),
        escape(&e.physical_resource_id),
        escape(&e.resource_type),
        e.timestamp.to_rfc3339(),
        e.resource_status,
    )
}

pub fn describe_stack_events_response(events: &[StackEvent]) -> String {
    let members: String = events.iter().map(event_member_xml).collect();
    format!(
        "<DescribeStackEventsResponse xmlns=\"http://cloudformation.amazonaws.com/doc/2010-05-15/\"><DescribeStackEventsResult><StackEvents>{members}</StackEvents></DescribeStackEventsResult>{}</DescribeStackEventsResponse>",
        response_metadata(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn error_response_renders_sender_fault_envelope() {
        let resp = error_response(&CoreError::invalid_argument("bad template"));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn create_stack_response_includes_stack_id_and_request_id() {
        let body = create_stack_response("arn:aws:cloudformation:us-east-1:000000000000:stack/MyStack/abc");
        assert!(body.contains("<StackId>arn:aws:cloudformation:us-east-1:000000000000:stack/MyStack/abc</StackId>"));
        assert!(body.contains("<RequestId>"));
    }

    #[test]
    fn describe_stacks_response_renders_one_member_per_stack() {
        let stacks = vec![
            StackSummary {
                stack_id: "id-1".to_string(),
                stack_name: "A".to_string(),
                template_body: "{}".to_string(),
                creation_time: Utc::now(),
                status: "CREATE_COMPLETE",
                status_reason: None,
            },
            StackSummary {
                stack_id: "id-2".to_string(),
                stack_name: "B".to_string(),
                template_body: "{}".to_string(),
                creation_time: Utc::now(),
                status: "CREATE_FAILED",
                status_reason: Some("boom".to_string()),
            },
        ];
        let body = describe_stacks_response(&stacks);
        assert!(body.contains("<StackName>A</StackName>"));
        assert!(body.contains("<StackName>B</StackName>"));
        assert!(body.contains("<StackStatusReason>boom</StackStatusReason>"));
    }
}

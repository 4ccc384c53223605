use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::UpdateFailed => "UPDATE_FAILED",
            StackStatus::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            StackStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            StackStatus::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::DeleteFailed => "DELETE_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StackStatus::CreateInProgress
                | StackStatus::UpdateInProgress
                | StackStatus::UpdateRollbackInProgress
                | StackStatus::DeleteInProgress
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            ResourceStatus::CreateComplete => "CREATE_COMPLETE",
            ResourceStatus::CreateFailed => "CREATE_FAILED",
            ResourceStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            ResourceStatus::UpdateComplete => "UPDATE_COMPLETE",
            ResourceStatus::UpdateFailed => "UPDATE_FAILED",
            ResourceStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            ResourceStatus::DeleteComplete => "DELETE_COMPLETE",
            ResourceStatus::DeleteFailed => "DELETE_FAILED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub logical_id: String,
    pub physical_id: String,
    pub resource_type: String,
    pub status: ResourceStatus,
    pub status_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StackEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub logical_resource_id: String,
    pub physical_resource_id: String,
    pub resource_type: String,
    pub resource_status: String,
    pub resource_status_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub stack_id: String,
    pub stack_name: String,
    pub template_body: String,
    pub creation_time: DateTime<Utc>,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub resources: Vec<ResourceRecord>,
    pub creation_order: Vec<String>,
    pub events: Vec<StackEvent>,
}

impl Stack {
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut ResourceRecord> {
        self.resources.iter_mut().find(|r| r.logical_id == logical_id)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }
}

pub fn stack_arn(stack_name: &str, unique_suffix: &str) -> String {
    format!("arn:aws:cloudformation:us-east-1:000000000000:stack/{stack_name}/{unique_suffix}")
}

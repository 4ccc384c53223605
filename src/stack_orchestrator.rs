use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use base64::Engine;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;
use crate::function_registry::{CreateInput, FunctionRegistry};
use crate::function_runtime::package_inline_source;
use crate::log_ledger::LogLedger;
use crate::models::function::function_arn;
use crate::models::stack::{ResourceRecord, ResourceStatus, Stack, StackEvent, StackStatus, stack_arn};
use crate::object_store::ObjectStore;
use crate::stack_template::{self, Template, TYPE_BUCKET, TYPE_LAMBDA, TYPE_LOG_GROUP};

fn stack_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").unwrap())
}

/// Dispatches resource create/delete onto a core component. Every
/// implementation maps one CloudFormation-style resource `Type` onto the
/// corresponding component owned by [`StackOrchestrator`].
trait ResourceAdapter: Send + Sync {
    fn create(&self, properties: &Value) -> Result<String, CoreError>;
    fn delete(&self, physical_id: &str) -> Result<(), CoreError>;
    fn arn(&self, physical_id: &str) -> String;
}

struct LambdaAdapter {
    registry: Arc<FunctionRegistry>,
}

impl ResourceAdapter for LambdaAdapter {
    fn create(&self, properties: &Value) -> Result<String, CoreError> {
        let function_name = properties["FunctionName"].as_str().unwrap_or_default().to_string();
        let runtime = properties["Runtime"].as_str().unwrap_or_default().to_string();
        let role = properties["Role"].as_str().unwrap_or_default().to_string();
        let handler = properties["Handler"].as_str().unwrap_or_default().to_string();
        let zip_file = properties["Code"]["ZipFile"].as_str().unwrap_or_default().to_string();
        let timeout_seconds = properties.get("Timeout").and_then(Value::as_f64).map(|t| t as u32);
        let environment: HashMap<String, String> = properties
            .get("Environment")
            .and_then(|e| e.get("Variables"))
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
            .unwrap_or_default();

        let module = handler.split('.').next().unwrap_or("index");
        let bundle = package_inline_source(module, &zip_file)
            .map_err(|e| CoreError::internal(format!("failed to package inline code: {e}")))?;
        let code_bundle_base64 = base64::engine::general_purpose::STANDARD.encode(bundle);

        self.registry.create(CreateInput {
            name: function_name.clone(),
            runtime,
            role,
            handler,
            code_bundle_base64,
            timeout_seconds,
            environment,
        })?;
        Ok(function_name)
    }

    fn delete(&self, physical_id: &str) -> Result<(), CoreError> {
        self.registry.delete(physical_id)
    }

    fn arn(&self, physical_id: &str) -> String {
        function_arn(physical_id)
    }
}

struct LogGroupAdapter {
    ledger: Arc<LogLedger>,
}

impl ResourceAdapter for LogGroupAdapter {
    fn create(&self, properties: &Value) -> Result<String, CoreError> {
        let name = properties["LogGroupName"].as_str().unwrap_or_default().to_string();
        let retention = properties.get("RetentionInDays").and_then(Value::as_f64).map(|d| d as u32);
        self.ledger.create_group(&name, retention)?;
        Ok(name)
    }

    fn delete(&self, physical_id: &str) -> Result<(), CoreError> {
        self.ledger.delete_group(physical_id)
    }

    fn arn(&self, physical_id: &str) -> String {
        format!("arn:aws:logs:us-east-1:000000000000:log-group:{physical_id}:*")
    }
}

struct BucketAdapter {
    store: Arc<ObjectStore>,
}

impl ResourceAdapter for BucketAdapter {
    fn create(&self, properties: &Value) -> Result<String, CoreError> {
        let name = properties["BucketName"].as_str().unwrap_or_default().to_string();
        self.store.create_bucket(&name)?;
        Ok(name)
    }

    fn delete(&self, physical_id: &str) -> Result<(), CoreError> {
        self.store.delete_bucket(physical_id)
    }

    fn arn(&self, physical_id: &str) -> String {
        format!("arn:aws:s3:::{physical_id}")
    }
}

/// A slim read-only view of a stack, returned from every orchestrator call
/// instead of a borrow of the guarded [`Stack`] itself.
#[derive(Debug, Clone)]
pub struct StackSummary {
    pub stack_id: String,
    pub stack_name: String,
    pub template_body: String,
    pub creation_time: chrono::DateTime<Utc>,
    pub status: &'static str,
    pub status_reason: Option<String>,
}

impl From<&Stack> for StackSummary {
    fn from(s: &Stack) -> Self {
        StackSummary {
            stack_id: s.stack_id.clone(),
            stack_name: s.stack_name.clone(),
            template_body: s.template_body.clone(),
            creation_time: s.creation_time,
            status: s.status.as_str(),
            status_reason: s.status_reason.clone(),
        }
    }
}

/// Owns every stack. Each stack gets its own [`Mutex`], so concurrent
/// operations against different stacks never block each other, while
/// create/update/delete against the *same* stack are fully serialized.
pub struct StackOrchestrator {
    stacks: RwLock<HashMap<String, Arc<Mutex<Stack>>>>,
    lambda_adapter: LambdaAdapter,
    log_group_adapter: LogGroupAdapter,
    bucket_adapter: BucketAdapter,
}

impl StackOrchestrator {
    pub fn new(registry: Arc<FunctionRegistry>, ledger: Arc<LogLedger>, store: Arc<ObjectStore>) -> Self {
        Self {
            stacks: RwLock::new(HashMap::new()),
            lambda_adapter: LambdaAdapter { registry },
            log_group_adapter: LogGroupAdapter { ledger },
            bucket_adapter: BucketAdapter { store },
        }
    }

    fn adapter_for(&self, resource_type: &str) -> Option<&dyn ResourceAdapter> {
        match resource_type {
            TYPE_LAMBDA => Some(&self.lambda_adapter),
            TYPE_LOG_GROUP => Some(&self.log_group_adapter),
            TYPE_BUCKET => Some(&self.bucket_adapter),
            _ => None,
        }
    }

    fn resolve_properties(&self, stack: &Stack, properties: &Value) -> Result<Value, CoreError> {
        stack_template::resolve_intrinsics(
            properties,
            &|ref_id: &str| {
                stack
                    .resource(ref_id)
                    .filter(|r| matches!(r.status, ResourceStatus::CreateComplete | ResourceStatus::UpdateComplete))
                    .map(|r| r.physical_id.clone())
                    .ok_or_else(|| CoreError::invalid_argument(format!("Ref to unresolved resource {ref_id}")))
            },
            &|getatt_id: &str, _attr: &str| {
                let target = stack
                    .resource(getatt_id)
                    .filter(|r| matches!(r.status, ResourceStatus::CreateComplete | ResourceStatus::UpdateComplete))
                    .ok_or_else(|| CoreError::invalid_argument(format!("Fn::GetAtt on unresolved resource {getatt_id}")))?;
                let adapter = self
                    .adapter_for(&target.resource_type)
                    .ok_or_else(|| CoreError::invalid_argument("Fn::GetAtt on unsupported resource type"))?;
                Ok(adapter.arn(&target.physical_id))
            },
        )
    }

    fn push_event(stack: &mut Stack, r: &ResourceRecord) {
        stack.events.insert(
            0,
            StackEvent {
                event_id: Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                logical_resource_id: r.logical_id.clone(),
                physical_resource_id: r.physical_id.clone(),
                resource_type: r.resource_type.clone(),
                resource_status: r.status.as_str().to_string(),
                resource_status_reason: r.status_reason.clone(),
            },
        );
    }

    fn push_stack_event(stack: &mut Stack) {
        stack.events.insert(
            0,
            StackEvent {
                event_id: Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                logical_resource_id: stack.stack_name.clone(),
                physical_resource_id: stack.stack_id.clone(),
                resource_type: "AWS::CloudFormation::Stack".to_string(),
                resource_status: stack.status.as_str().to_string(),
                resource_status_reason: stack.status_reason.clone(),
            },
        );
    }

    /// Materialises `order` against `template`, resolving intrinsics against
    /// resources already created earlier in *this* walk. Returns the failure
    /// reason on the first error; resources already created stay in the
    /// stack (there is no automatic rollback on a create failure).
    fn run_create_walk(
        &self,
        stack: &mut Stack,
        template: &Template,
        order: &[String],
        in_progress: ResourceStatus,
        complete: ResourceStatus,
        failed: ResourceStatus,
    ) -> Option<String> {
        for logical_id in order {
            let Some(def) = template.resource(logical_id) else { continue };

            stack.resources.retain(|r| r.logical_id != *logical_id);
            stack.resources.push(ResourceRecord {
                logical_id: logical_id.clone(),
                physical_id: String::new(),
                resource_type: def.resource_type.clone(),
                status: in_progress,
                status_reason: None,
                timestamp: Utc::now(),
            });
            let snapshot = stack.resources.last().unwrap().clone();
            Self::push_event(stack, &snapshot);

            let Some(adapter) = self.adapter_for(&def.resource_type) else {
                let reason = format!("Unsupported resource type: {}", def.resource_type);
                let r = stack.resources.last_mut().unwrap();
                r.status = failed;
                r.status_reason = Some(reason.clone());
                let snapshot = r.clone();
                Self::push_event(stack, &snapshot);
                return Some(reason);
            };

            let resolved = self.resolve_properties(stack, &Value::Object(def.properties.clone()));
            let outcome = resolved.and_then(|props| adapter.create(&props));

            match outcome {
                Ok(physical_id) => {
                    let r = stack.resources.last_mut().unwrap();
                    r.physical_id = physical_id;
                    r.status = complete;
                    r.timestamp = Utc::now();
                    let snapshot = r.clone();
                    stack.creation_order.push(logical_id.clone());
                    Self::push_event(stack, &snapshot);
                }
                Err(e) => {
                    let reason = e.message();
                    let r = stack.resources.last_mut().unwrap();
                    r.status = failed;
                    r.status_reason = Some(reason.clone());
                    let snapshot = r.clone();
                    Self::push_event(stack, &snapshot);
                    return Some(reason);
                }
            }
        }
        None
    }

    /// Walks `creation_order` in reverse, tolerating resources that are
    /// already gone. Returns the failure reason on the first non-tolerable
    /// error (e.g. a non-empty bucket); clears `creation_order` on full
    /// success.
    fn run_delete_walk(&self, stack: &mut Stack) -> Option<String> {
        let order: Vec<String> = stack.creation_order.iter().rev().cloned().collect();
        for logical_id in &order {
            let Some(existing) = stack.resource(logical_id).cloned() else { continue };
            if existing.status == ResourceStatus::DeleteComplete {
                continue;
            }

            if let Some(r) = stack.resource_mut(logical_id) {
                r.status = ResourceStatus::DeleteInProgress;
                r.timestamp = Utc::now();
            }
            let snapshot = stack.resource(logical_id).cloned().unwrap();
            Self::push_event(stack, &snapshot);

            let Some(adapter) = self.adapter_for(&existing.resource_type) else { continue };

            match adapter.delete(&existing.physical_id) {
                Ok(()) | Err(CoreError::NotFound(_)) => {
                    let r = stack.resource_mut(logical_id).unwrap();
                    r.status = ResourceStatus::DeleteComplete;
                    r.timestamp = Utc::now();
                    let snapshot = r.clone();
                    Self::push_event(stack, &snapshot);
                }
                Err(e) => {
                    let reason = e.message();
                    let r = stack.resource_mut(logical_id).unwrap();
                    r.status = ResourceStatus::DeleteFailed;
                    r.status_reason = Some(reason.clone());
                    let snapshot = r.clone();
                    Self::push_event(stack, &snapshot);
                    return Some(reason);
                }
            }
        }
        stack.creation_order.clear();
        None
    }

    pub fn create_stack(&self, stack_name: &str, template_body: &str) -> Result<StackSummary, CoreError> {
        if !stack_name_re().is_match(stack_name) {
            return Err(CoreError::invalid_argument(format!("Invalid stack name: {stack_name}")));
        }
        {
            let stacks = self.stacks.read().unwrap();
            if stacks.contains_key(stack_name) {
                return Err(CoreError::already_exists(format!("Stack already exists: {stack_name}")));
            }
        }

        let template = stack_template::parse_template(template_body)?;
        let order = stack_template::topological_order(&template.resources)?;

        let stack_id = stack_arn(stack_name, &Uuid::new_v4().to_string());
        let mut stack = Stack {
            stack_id,
            stack_name: stack_name.to_string(),
            template_body: template_body.to_string(),
            creation_time: Utc::now(),
            status: StackStatus::CreateInProgress,
            status_reason: None,
            resources: Vec::new(),
            creation_order: Vec::new(),
            events: Vec::new(),
        };
        Self::push_stack_event(&mut stack);

        let handle = Arc::new(Mutex::new(stack));
        self.stacks.write().unwrap().insert(stack_name.to_string(), handle.clone());

        let mut guard = handle.lock().unwrap();
        let failure = self.run_create_walk(
            &mut guard,
            &template,
            &order,
            ResourceStatus::CreateInProgress,
            ResourceStatus::CreateComplete,
            ResourceStatus::CreateFailed,
        );
        match failure {
            None => {
                guard.status = StackStatus::CreateComplete;
                guard.status_reason = None;
            }
            Some(reason) => {
                guard.status = StackStatus::CreateFailed;
                guard.status_reason = Some(reason);
            }
        }
        Self::push_stack_event(&mut guard);
        Ok(StackSummary::from(&*guard))
    }

    /// Deletes every current resource in reverse creation order, then
    /// recreates the new template from scratch. On any failure, rolls back
    /// by recreating the previous template.
    pub fn update_stack(&self, stack_name: &str, new_template_body: &str) -> Result<StackSummary, CoreError> {
        let handle = {
            let stacks = self.stacks.read().unwrap();
            stacks
                .get(stack_name)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("Stack not found: {stack_name}")))?
        };

        let new_template = stack_template::parse_template(new_template_body)?;
        let new_order = stack_template::topological_order(&new_template.resources)?;

        let mut guard = handle.lock().unwrap();
        let previous_template_body = guard.template_body.clone();
        let previous_template = stack_template::parse_template(&previous_template_body)?;
        let previous_order = stack_template::topological_order(&previous_template.resources)?;

        guard.status = StackStatus::UpdateInProgress;
        guard.status_reason = None;
        Self::push_stack_event(&mut guard);

        let delete_failure = self.run_delete_walk(&mut guard);

        let failure = if delete_failure.is_some() {
            delete_failure
        } else {
            guard.resources.clear();
            self.run_create_walk(
                &mut guard,
                &new_template,
                &new_order,
                ResourceStatus::UpdateInProgress,
                ResourceStatus::UpdateComplete,
                ResourceStatus::UpdateFailed,
            )
        };

        match failure {
            None => {
                guard.status = StackStatus::UpdateComplete;
                guard.status_reason = None;
                guard.template_body = new_template_body.to_string();
                Self::push_stack_event(&mut guard);
            }
            Some(reason) => {
                guard.status = StackStatus::UpdateFailed;
                guard.status_reason = Some(reason);
                Self::push_stack_event(&mut guard);

                guard.status = StackStatus::UpdateRollbackInProgress;
                Self::push_stack_event(&mut guard);

                // tear down whatever the failed attempt managed to create
                // before restoring the previous template from scratch
                self.run_delete_walk(&mut guard);
                guard.resources.clear();
                guard.creation_order.clear();
                let rollback_failure = self.run_create_walk(
                    &mut guard,
                    &previous_template,
                    &previous_order,
                    ResourceStatus::UpdateInProgress,
                    ResourceStatus::UpdateComplete,
                    ResourceStatus::UpdateFailed,
                );
                match rollback_failure {
                    None => {
                        guard.status = StackStatus::UpdateRollbackComplete;
                        guard.status_reason = None;
                    }
                    Some(rb_reason) => {
                        guard.status = StackStatus::UpdateRollbackFailed;
                        guard.status_reason = Some(rb_reason);
                    }
                }
                Self::push_stack_event(&mut guard);
            }
        }

        Ok(StackSummary::from(&*guard))
    }

    pub fn delete_stack(&self, stack_name: &str) -> Result<StackSummary, CoreError> {
        let handle = {
            let stacks = self.stacks.read().unwrap();
            stacks
                .get(stack_name)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("Stack not found: {stack_name}")))?
        };

        let mut guard = handle.lock().unwrap();
        guard.status = StackStatus::DeleteInProgress;
        guard.status_reason = None;
        Self::push_stack_event(&mut guard);

        let failure = self.run_delete_walk(&mut guard);
        match failure {
            None => {
                guard.status = StackStatus::DeleteComplete;
                guard.status_reason = None;
            }
            Some(reason) => {
                guard.status = StackStatus::DeleteFailed;
                guard.status_reason = Some(reason);
            }
        }
        Self::push_stack_event(&mut guard);
        Ok(StackSummary::from(&*guard))
    }

    pub fn describe_stacks(&self, name_filter: Option<&str>) -> Result<Vec<StackSummary>, CoreError> {
        let stacks = self.stacks.read().unwrap();
        match name_filter {
            Some(name) => {
                let handle = stacks
                    .get(name)
                    .ok_or_else(|| CoreError::not_found(format!("Stack not found: {name}")))?;
                Ok(vec![StackSummary::from(&*handle.lock().unwrap())])
            }
            None => Ok(stacks.values().map(|h| StackSummary::from(&*h.lock().unwrap())).collect()),
        }
    }

    pub fn describe_stack_resources(&self, stack_name: &str) -> Result<Vec<ResourceRecord>, CoreError> {
        let stacks = self.stacks.read().unwrap();
        let handle = stacks
            .get(stack_name)
            .ok_or_else(|| CoreError::not_found(format!("Stack not found: {stack_name}")))?;
        Ok(handle.lock().unwrap().resources.clone())
    }

    pub fn describe_stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>, CoreError> {
        let stacks = self.stacks.read().unwrap();
        let handle = stacks
            .get(stack_name)
            .ok_or_else(|| CoreError::not_found(format!("Stack not found: {stack_name}")))?;
        Ok(handle.lock().unwrap().events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> (StackOrchestrator, Arc<FunctionRegistry>, Arc<LogLedger>, Arc<ObjectStore>) {
        let registry = Arc::new(FunctionRegistry::new());
        let ledger = Arc::new(LogLedger::new());
        let store = Arc::new(ObjectStore::new());
        let orch = StackOrchestrator::new(registry.clone(), ledger.clone(), store.clone());
        (orch, registry, ledger, store)
    }

    const DEPENDENT_TEMPLATE: &str = r#"{
        "Resources": {
            "MyLogGroup": {
                "Type": "AWS::Logs::LogGroup",
                "Properties": { "LogGroupName": "/aws/lambda/g" }
            },
            "MyFunction": {
                "Type": "AWS::Lambda::Function",
                "DependsOn": "MyLogGroup",
                "Properties": {
                    "FunctionName": "g",
                    "Runtime": "nodejs18.x",
                    "Role": "arn:aws:iam::000000000000:role/x",
                    "Handler": "index.handler",
                    "Code": { "ZipFile": "export async function handler(event){ return { ok: true }; }" }
                }
            }
        }
    }"#;

    #[test]
    fn create_with_dependency_reaches_complete() {
        let (orch, registry, ledger, _store) = orchestrator();
        let summary = orch.create_stack("MyStack", DEPENDENT_TEMPLATE).unwrap();
        assert_eq!(summary.status, "CREATE_COMPLETE");

        let resources = orch.describe_stack_resources("MyStack").unwrap();
        assert_eq!(resources.len(), 2);
        assert!(resources.iter().all(|r| r.status == ResourceStatus::CreateComplete));
        assert!(registry.get("g").is_ok());
        assert!(ledger.group_exists("/aws/lambda/g"));
    }

    #[test]
    fn create_rejects_duplicate_stack_name() {
        let (orch, ..) = orchestrator();
        orch.create_stack("MyStack", DEPENDENT_TEMPLATE).unwrap();
        let err = orch.create_stack("MyStack", DEPENDENT_TEMPLATE).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn unsupported_resource_type_fails_create_without_rollback() {
        let (orch, ..) = orchestrator();
        let template = r#"{
            "Resources": {
                "A": { "Type": "AWS::S3::Bucket", "Properties": { "BucketName": "kept" } },
                "B": { "Type": "AWS::DynamoDB::Table", "Properties": {} }
            }
        }"#;
        let summary = orch.create_stack("BadStack", template).unwrap();
        assert_eq!(summary.status, "CREATE_FAILED");
        assert!(summary.status_reason.unwrap().contains("Unsupported resource type"));

        let resources = orch.describe_stack_resources("BadStack").unwrap();
        let a = resources.iter().find(|r| r.logical_id == "A").unwrap();
        assert_eq!(a.status, ResourceStatus::CreateComplete);
    }

    #[test]
    fn delete_tolerates_resource_already_removed_out_of_band() {
        let (orch, registry, ..) = orchestrator();
        orch.create_stack("S2", DEPENDENT_TEMPLATE).unwrap();
        registry.delete("g").unwrap();

        let summary = orch.delete_stack("S2").unwrap();
        assert_eq!(summary.status, "DELETE_COMPLETE");
    }

    #[test]
    fn update_recreates_resources_under_new_template() {
        let (orch, registry, ..) = orchestrator();
        orch.create_stack("S3", DEPENDENT_TEMPLATE).unwrap();

        let updated_template = DEPENDENT_TEMPLATE.replace("\"FunctionName\": \"g\"", "\"FunctionName\": \"g2\"");
        let summary = orch.update_stack("S3", &updated_template).unwrap();
        assert_eq!(summary.status, "UPDATE_COMPLETE");
        assert!(registry.get("g").is_err());
        assert!(registry.get("g2").is_ok());
    }

    #[test]
    fn update_rolls_back_on_failure() {
        let (orch, registry, ..) = orchestrator();
        orch.create_stack("S4", DEPENDENT_TEMPLATE).unwrap();

        let broken_template = r#"{
            "Resources": {
                "MyLogGroup": {
                    "Type": "AWS::Logs::LogGroup",
                    "Properties": { "LogGroupName": "/aws/lambda/g" }
                },
                "Broken": { "Type": "AWS::DynamoDB::Table", "Properties": {} }
            }
        }"#;
        let summary = orch.update_stack("S4", broken_template).unwrap();
        assert_eq!(summary.status, "UPDATE_ROLLBACK_COMPLETE");
        assert!(registry.get("g").is_ok());
    }

    #[test]
    fn describe_stacks_not_found() {
        let (orch, ..) = orchestrator();
        let err = orch.describe_stacks(Some("nope")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::CoreError;

pub const TYPE_LAMBDA: &str = "AWS::Lambda::Function";
pub const TYPE_LOG_GROUP: &str = "AWS::Logs::LogGroup";
pub const TYPE_BUCKET: &str = "AWS::S3::Bucket";

#[derive(Debug, Clone)]
pub struct ResourceDef {
    pub logical_id: String,
    pub resource_type: String,
    pub properties: Map<String, Value>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Template {
    /// In first-appearance order, as read off the template's resource mapping.
    pub resources: Vec<ResourceDef>,
}

impl Template {
    pub fn resource(&self, logical_id: &str) -> Option<&ResourceDef> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }
}

/// Parses `body` as JSON first, falling back to YAML, then validates shape
/// and per-type required properties.
pub fn parse_template(body: &str) -> Result<Template, CoreError> {
    let doc: Value = match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(_) => {
            let yaml_val: serde_yaml::Value = serde_yaml::from_str(body)
                .map_err(|e| CoreError::invalid_argument(format!("template is neither valid JSON nor valid YAML: {e}")))?;
            serde_json::to_value(yaml_val)
                .map_err(|e| CoreError::invalid_argument(format!("invalid template structure: {e}")))?
        }
    };

    let obj = doc
        .as_object()
        .ok_or_else(|| CoreError::invalid_argument("template must be a mapping"))?;
    let resources_val = obj
        .get("Resources")
        .and_then(Value::as_object)
        .ok_or_else(|| CoreError::invalid_argument("template must contain a Resources mapping"))?;

    let mut resources = Vec::new();
    for (logical_id, resource_val) in resources_val {
        let resource_obj = resource_val
            .as_object()
            .ok_or_else(|| CoreError::invalid_argument(format!("resource {logical_id} must be a mapping")))?;
        let resource_type = resource_obj
            .get("Type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::invalid_argument(format!("resource {logical_id} is missing a non-empty Type")))?
            .to_string();
        let properties = resource_obj.get("Properties").and_then(Value::as_object).cloned().unwrap_or_default();
        let depends_on = match resource_obj.get("DependsOn") {
            None => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                        CoreError::invalid_argument(format!("DependsOn entries must be strings in resource {logical_id}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(CoreError::invalid_argument(format!(
                    "DependsOn must be a string or list of strings in resource {logical_id}"
                )));
            }
        };
        resources.push(ResourceDef { logical_id: logical_id.clone(), resource_type, properties, depends_on });
    }

    let known: HashSet<&str> = resources.iter().map(|r| r.logical_id.as_str()).collect();
    for r in &resources {
        for dep in &r.depends_on {
            if !known.contains(dep.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "resource {} depends on unknown resource {}",
                    r.logical_id, dep
                )));
            }
        }
    }

    for r in &resources {
        match r.resource_type.as_str() {
            TYPE_LAMBDA => validate_lambda_properties(r)?,
            TYPE_LOG_GROUP => validate_log_group_properties(r)?,
            TYPE_BUCKET => validate_bucket_properties(r)?,
            // Unsupported types are rejected at creation time (CREATE_FAILED),
            // not at parse time -- the template itself may still be well-formed.
            _ => {}
        }
    }

    Ok(Template { resources })
}

fn require_nonempty_string(props: &Map<String, Value>, key: &str, logical_id: &str) -> Result<String, CoreError> {
    props
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::invalid_argument(format!("resource {logical_id} is missing required non-empty property {key}")))
}

fn reject_unknown_properties(props: &Map<String, Value>, allowed: &[&str], logical_id: &str) -> Result<(), CoreError> {
    for key in props.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(CoreError::invalid_argument(format!("resource {logical_id} has unsupported property {key}")));
        }
    }
    Ok(())
}

fn validate_lambda_properties(r: &ResourceDef) -> Result<(), CoreError> {
    reject_unknown_properties(
        &r.properties,
        &["FunctionName", "Runtime", "Role", "Handler", "Code", "Environment", "Timeout"],
        &r.logical_id,
    )?;
    require_nonempty_string(&r.properties, "FunctionName", &r.logical_id)?;
    require_nonempty_string(&r.properties, "Runtime", &r.logical_id)?;
    require_nonempty_string(&r.properties, "Role", &r.logical_id)?;
    require_nonempty_string(&r.properties, "Handler", &r.logical_id)?;

    let code = r
        .properties
        .get("Code")
        .and_then(Value::as_object)
        .ok_or_else(|| CoreError::invalid_argument(format!("resource {} Code must be a mapping", r.logical_id)))?;
    let zip_file_ok = code.len() == 1 && code.get("ZipFile").and_then(Value::as_str).is_some();
    if !zip_file_ok {
        return Err(CoreError::invalid_argument(format!(
            "resource {} Code must contain exactly the key ZipFile",
            r.logical_id
        )));
    }

    if let Some(env) = r.properties.get("Environment") {
        let env_obj = env
            .as_object()
            .ok_or_else(|| CoreError::invalid_argument(format!("resource {} Environment must be a mapping", r.logical_id)))?;
        reject_unknown_properties(env_obj, &["Variables"], &r.logical_id)?;
        if let Some(vars) = env_obj.get("Variables") {
            let vars_obj = vars.as_object().ok_or_else(|| {
                CoreError::invalid_argument(format!("resource {} Environment.Variables must be a mapping", r.logical_id))
            })?;
            if vars_obj.values().any(|v| !v.is_string()) {
                return Err(CoreError::invalid_argument(format!(
                    "resource {} Environment.Variables must be string to string",
                    r.logical_id
                )));
            }
        }
    }

    if let Some(timeout) = r.properties.get("Timeout") {
        if !timeout.is_number() {
            return Err(CoreError::invalid_argument(format!("resource {} Timeout must be numeric", r.logical_id)));
        }
    }
    Ok(())
}

fn validate_log_group_properties(r: &ResourceDef) -> Result<(), CoreError> {
    reject_unknown_properties(&r.properties, &["LogGroupName", "RetentionInDays"], &r.logical_id)?;
    require_nonempty_string(&r.properties, "LogGroupName", &r.logical_id)?;
    if let Some(retention) = r.properties.get("RetentionInDays") {
        if !retention.is_number() {
            return Err(CoreError::invalid_argument(format!(
                "resource {} RetentionInDays must be numeric",
                r.logical_id
            )));
        }
    }
    Ok(())
}

fn validate_bucket_properties(r: &ResourceDef) -> Result<(), CoreError> {
    reject_unknown_properties(&r.properties, &["BucketName"], &r.logical_id)?;
    require_nonempty_string(&r.properties, "BucketName", &r.logical_id)?;
    Ok(())
}

/// Depth-first topological order over `DependsOn`; resources with no
/// dependency are ordered by first appearance in the resource mapping.
pub fn topological_order(resources: &[ResourceDef]) -> Result<Vec<String>, CoreError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a ResourceDef>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), CoreError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                return Err(CoreError::invalid_argument(format!("dependency cycle detected at resource {id}")));
            }
            _ => {}
        }
        marks.insert(id, Mark::InProgress);
        if let Some(r) = by_id.get(id) {
            for dep in &r.depends_on {
                visit(dep, by_id, marks, order)?;
            }
        }
        marks.insert(id, Mark::Done);
        order.push(id.to_string());
        Ok(())
    }

    let by_id: HashMap<&str, &ResourceDef> = resources.iter().map(|r| (r.logical_id.as_str(), r)).collect();
    let mut marks: HashMap<&str, Mark> = resources.iter().map(|r| (r.logical_id.as_str(), Mark::Unvisited)).collect();
    let mut order = Vec::new();
    for r in resources {
        visit(&r.logical_id, &by_id, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// Walks `value`, replacing `{"Ref": id}` and `{"Fn::GetAtt": ...}` forms;
/// any other `Fn::*` key fails template validation.
pub fn resolve_intrinsics<F, G>(value: &Value, resolve_ref: &F, resolve_getatt: &G) -> Result<Value, CoreError>
where
    F: Fn(&str) -> Result<String, CoreError>,
    G: Fn(&str, &str) -> Result<String, CoreError>,
{
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(logical_id)) = map.get("Ref") {
                    return Ok(Value::String(resolve_ref(logical_id)?));
                }
                if let Some(getatt) = map.get("Fn::GetAtt") {
                    let (logical_id, attr) = match getatt {
                        Value::String(s) => {
                            let mut parts = s.splitn(2, '.');
                            (parts.next().unwrap_or("").to_string(), parts.next().unwrap_or("").to_string())
                        }
                        Value::Array(items) if items.len() == 2 => (
                            items[0].as_str().unwrap_or("").to_string(),
                            items[1].as_str().unwrap_or("").to_string(),
                        ),
                        _ => return Err(CoreError::invalid_argument("Fn::GetAtt must be \"Id.Attr\" or [Id, Attr]")),
                    };
                    if attr != "Arn" {
                        return Err(CoreError::invalid_argument("only the Arn attribute is supported by Fn::GetAtt"));
                    }
                    return Ok(Value::String(resolve_getatt(&logical_id, &attr)?));
                }
                if let Some(key) = map.keys().find(|k| k.starts_with("Fn::")) {
                    return Err(CoreError::invalid_argument(format!("unsupported intrinsic function {key}")));
                }
            }
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_intrinsics(v, resolve_ref, resolve_getatt)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_intrinsics(item, resolve_ref, resolve_getatt)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"{
        "Resources": {
            "MyLogGroup": {
                "Type": "AWS::Logs::LogGroup",
                "Properties": { "LogGroupName": "/aws/lambda/g" }
            },
            "MyFunction": {
                "Type": "AWS::Lambda::Function",
                "DependsOn": "MyLogGroup",
                "Properties": {
                    "FunctionName": "f",
                    "Runtime": "nodejs18.x",
                    "Role": "arn:aws:iam::0:role/x",
                    "Handler": "index.handler",
                    "Code": { "ZipFile": "export async function handler(){}" }
                }
            }
        }
    }"#;

    #[test]
    fn parses_json_template_and_preserves_appearance_order() {
        let t = parse_template(TEMPLATE).unwrap();
        assert_eq!(t.resources[0].logical_id, "MyLogGroup");
        assert_eq!(t.resources[1].logical_id, "MyFunction");
    }

    #[test]
    fn topological_order_respects_depends_on() {
        let t = parse_template(TEMPLATE).unwrap();
        let order = topological_order(&t.resources).unwrap();
        let log_pos = order.iter().position(|x| x == "MyLogGroup").unwrap();
        let fn_pos = order.iter().position(|x| x == "MyFunction").unwrap();
        assert!(log_pos < fn_pos);
    }

    #[test]
    fn cycle_is_rejected() {
        let cyclic = r#"{
            "Resources": {
                "A": { "Type": "AWS::S3::Bucket", "DependsOn": "B", "Properties": { "BucketName": "a" } },
                "B": { "Type": "AWS::S3::Bucket", "DependsOn": "A", "Properties": { "BucketName": "b" } }
            }
        }"#;
        let t = parse_template(cyclic).unwrap();
        assert!(topological_order(&t.resources).is_err());
    }

    #[test]
    fn unsupported_property_rejected() {
        let bad = r#"{
            "Resources": {
                "A": { "Type": "AWS::S3::Bucket", "Properties": { "BucketName": "a", "Extra": "nope" } }
            }
        }"#;
        assert!(parse_template(bad).is_err());
    }

    #[test]
    fn ref_and_getatt_resolve() {
        let value: Value = serde_json::from_str(r#"{"a": {"Ref": "X"}, "b": {"Fn::GetAtt": ["X", "Arn"]}}"#).unwrap();
        let resolved = resolve_intrinsics(
            &value,
            &|id| Ok(format!("physical-{id}")),
            &|id, _attr| Ok(format!("arn-{id}")),
        )
        .unwrap();
        assert_eq!(resolved["a"], "physical-X");
        assert_eq!(resolved["b"], "arn-X");
    }

    #[test]
    fn unsupported_fn_rejected() {
        let value: Value = serde_json::from_str(r#"{"a": {"Fn::Join": ["-", ["x","y"]]}}"#).unwrap();
        let result = resolve_intrinsics(&value, &|id| Ok(id.to_string()), &|id, _| Ok(id.to_string()));
        assert!(result.is_err());
    }
}

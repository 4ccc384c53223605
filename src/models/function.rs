use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SUPPORTED_RUNTIME: &str = "nodejs18.x";

/// A stored function: code + config, as owned by the registry.
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub name: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub timeout_seconds: u32,
    pub environment: HashMap<String, String>,
    pub code_bundle: Vec<u8>,
    pub code_digest: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
}

impl FunctionRecord {
    pub fn to_config_response(&self) -> FunctionConfiguration {
        FunctionConfiguration {
            function_name: self.name.clone(),
            function_arn: function_arn(&self.name),
            runtime: self.runtime.clone(),
            role: self.role.clone(),
            handler: self.handler.clone(),
            code_size: self.code_bundle.len() as u64,
            description: String::new(),
            timeout: self.timeout_seconds,
            last_modified: self.last_modified.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string(),
            code_sha256: self.code_digest.clone(),
            version: self.version.to_string(),
            environment: EnvironmentResponse {
                variables: self.environment.clone(),
            },
        }
    }
}

pub fn function_arn(name: &str) -> String {
    format!("arn:aws:lambda:us-east-1:000000000000:function:{name}")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFunctionRequest {
    pub function_name: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub code: CodeInput,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub environment: Option<EnvironmentInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeInput {
    pub zip_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentInput {
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateConfigRequest {
    pub runtime: Option<String>,
    pub role: Option<String>,
    pub handler: Option<String>,
    pub timeout: Option<u32>,
    pub environment: Option<EnvironmentInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateCodeRequest {
    pub zip_file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionConfiguration {
    pub function_name: String,
    pub function_arn: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub code_size: u64,
    pub description: String,
    pub timeout: u32,
    pub last_modified: String,
    pub code_sha256: String,
    pub version: String,
    pub environment: EnvironmentResponse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentResponse {
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListFunctionsResponse {
    #[serde(rename = "Functions")]
    pub functions: Vec<FunctionConfiguration>,
}

/// The contract every invocation always yields, regardless of success/fault/timeout.
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub payload: Vec<u8>,
    pub function_error: Option<String>,
}

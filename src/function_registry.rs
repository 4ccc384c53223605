use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::models::function::{FunctionRecord, SUPPORTED_RUNTIME};

pub struct CreateInput {
    pub name: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub code_bundle_base64: String,
    pub timeout_seconds: Option<u32>,
    pub environment: HashMap<String, String>,
}

#[derive(Default)]
pub struct ConfigPatch {
    pub runtime: Option<String>,
    pub role: Option<String>,
    pub handler: Option<String>,
    pub timeout_seconds: Option<u32>,
    pub environment: Option<HashMap<String, String>>,
}

fn code_digest(bundle: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bundle);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Owns every function record. Single owner, `RwLock`-guarded.
pub struct FunctionRegistry {
    functions: RwLock<BTreeMap<String, FunctionRecord>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self { functions: RwLock::new(BTreeMap::new()) }
    }

    pub fn create(&self, input: CreateInput) -> Result<FunctionRecord, CoreError> {
        if input.runtime != SUPPORTED_RUNTIME {
            return Err(CoreError::invalid_argument(format!(
                "Unsupported runtime tag: {} (only {} accepted)",
                input.runtime, SUPPORTED_RUNTIME
            )));
        }
        if input.code_bundle_base64.is_empty() {
            return Err(CoreError::invalid_argument("Code bundle must not be empty"));
        }
        let bundle = base64::engine::general_purpose::STANDARD
            .decode(&input.code_bundle_base64)
            .map_err(|e| CoreError::invalid_argument(format!("Code bundle is not valid base64: {e}")))?;

        let mut functions = self.functions.write().unwrap();
        if functions.contains_key(&input.name) {
            return Err(CoreError::already_exists(format!(
                "Function already exist: {}",
                input.name
            )));
        }

        let record = FunctionRecord {
            name: input.name.clone(),
            runtime: input.runtime,
            role: input.role,
            handler: input.handler,
            timeout_seconds: input.timeout_seconds.unwrap_or(3),
            environment: input.environment,
            code_digest: code_digest(&bundle),
            code_bundle: bundle,
            version: 1,
            last_modified: Utc::now(),
        };
        functions.insert(input.name, record.clone());
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Result<FunctionRecord, CoreError> {
        self.functions
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("Function not found: {name}")))
    }

    pub fn list(&self) -> Vec<FunctionRecord> {
        self.functions.read().unwrap().values().cloned().collect()
    }

    pub fn delete(&self, name: &str) -> Result<(), CoreError> {
        self.functions
            .write()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("Function not found: {name}")))
    }

    pub fn update_config(&self, name: &str, patch: ConfigPatch) -> Result<FunctionRecord, CoreError> {
        let mut functions = self.functions.write().unwrap();
        let record = functions
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(format!("Function not found: {name}")))?;
        if let Some(runtime) = patch.runtime {
            if runtime != SUPPORTED_RUNTIME {
                return Err(CoreError::invalid_argument(format!(
                    "Unsupported runtime tag: {runtime} (only {SUPPORTED_RUNTIME} accepted)"
                )));
            }
            record.runtime = runtime;
        }
        if let Some(role) = patch.role {
            record.role = role;
        }
        if let Some(handler) = patch.handler {
            record.handler = handler;
        }
        if let Some(timeout) = patch.timeout_seconds {
            record.timeout_seconds = timeout;
        }
        if let Some(env) = patch.environment {
            record.environment = env;
        }
        record.last_modified = Utc::now();
        Ok(record.clone())
    }

    pub fn update_code(&self, name: &str, bundle_base64: &str) -> Result<FunctionRecord, CoreError> {
        let bundle = base64::engine::general_purpose::STANDARD
            .decode(bundle_base64)
            .map_err(|e| CoreError::invalid_argument(format!("Code bundle is not valid base64: {e}")))?;
        let mut functions = self.functions.write().unwrap();
        let record = functions
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(format!("Function not found: {name}")))?;
        record.code_digest = code_digest(&bundle);
        record.code_bundle = bundle;
        record.version += 1;
        record.last_modified = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(name: &str) -> CreateInput {
        CreateInput {
            name: name.to_string(),
            runtime: SUPPORTED_RUNTIME.to_string(),
            role: "arn:aws:iam::000000000000:role/x".to_string(),
            handler: "index.handler".to_string(),
            code_bundle_base64: base64::engine::general_purpose::STANDARD.encode(b"fake zip"),
            timeout_seconds: None,
            environment: HashMap::new(),
        }
    }

    #[test]
    fn code_digest_equals_sha256_of_bundle() {
        let registry = FunctionRegistry::new();
        let record = registry.create(sample_input("f")).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"fake zip");
        let expected = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        assert_eq!(record.code_digest, expected);
        assert_eq!(record.version, 1);
    }

    #[test]
    fn update_code_bumps_version_update_config_does_not() {
        let registry = FunctionRegistry::new();
        registry.create(sample_input("f")).unwrap();
        let updated = registry
            .update_code("f", &base64::engine::general_purpose::STANDARD.encode(b"new zip"))
            .unwrap();
        assert_eq!(updated.version, 2);

        let cfg_patch = ConfigPatch { role: Some("new-role".to_string()), ..Default::default() };
        let after_config = registry.update_config("f", cfg_patch).unwrap();
        assert_eq!(after_config.version, 2);
        assert_eq!(after_config.role, "new-role");
    }

    #[test]
    fn duplicate_name_rejected() {
        let registry = FunctionRegistry::new();
        registry.create(sample_input("f")).unwrap();
        let err = registry.create(sample_input("f")).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn unsupported_runtime_rejected() {
        let registry = FunctionRegistry::new();
        let mut input = sample_input("f");
        input.runtime = "python3.9".to_string();
        let err = registry.create(input).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }
}

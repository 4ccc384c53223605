use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::function_registry::FunctionRegistry;
use crate::log_ledger::LogLedger;
use crate::models::function::InvokeResult;

/// The process-wide ambient environment is a single shared resource;
/// `§5` allows invocations of *different* functions to proceed concurrently,
/// but each one's install/run/restore sequence against `std::env` must still
/// be serialized against every other invocation's, or they corrupt each
/// other's "prior value" captures. Held for the full blocking call, not just
/// the install/restore edges.
fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Saves the prior value (or absence) of every variable the function's
/// `environment` installs, and restores it unconditionally on drop — the
/// guaranteed-release discipline §4.D/§5 requires for the ambient process
/// environment. Must only be constructed while holding [`env_lock`].
struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn install(vars: &HashMap<String, String>) -> Self {
        let mut previous = Vec::with_capacity(vars.len());
        for (k, v) in vars {
            previous.push((k.clone(), std::env::var(k).ok()));
            // SAFETY: caller holds `env_lock()` for the entire install/restore
            // window, so no other invocation can observe or mutate process
            // env while this guard is live.
            unsafe { std::env::set_var(k, v) };
        }
        Self { previous }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (k, prior) in self.previous.drain(..) {
            match prior {
                Some(v) => unsafe { std::env::set_var(&k, v) },
                None => unsafe { std::env::remove_var(&k) },
            }
        }
    }
}

fn split_handler(handler: &str) -> Result<(String, String), CoreError> {
    let (module, export) = handler
        .split_once('.')
        .ok_or_else(|| CoreError::invalid_argument(format!("Malformed handler: {handler}")))?;
    if module.is_empty() || export.is_empty() {
        return Err(CoreError::invalid_argument(format!("Malformed handler: {handler}")));
    }
    Ok((module.to_string(), export.to_string()))
}

fn extract_bundle(bundle: &[u8], dest: &Path) -> anyhow::Result<()> {
    let reader = std::io::Cursor::new(bundle);
    let mut archive = zip::ZipArchive::new(reader)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            continue;
        };
        let outpath = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }
    Ok(())
}

/// Packages inline source text (a template's `Code.ZipFile` string) into a
/// single-entry ZIP the rest of the runtime can extract like any other
/// code bundle.
pub fn package_inline_source(module: &str, source: &str) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer.start_file(format!("{module}.js"), options)?;
        writer.write_all(source.as_bytes())?;
        writer.finish()?;
    }
    Ok(buf)
}

fn locate_handler_file(dir: &Path, module: &str) -> Option<PathBuf> {
    for ext in ["mjs", "js", "cjs"] {
        let candidate = dir.join(format!("{module}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Rewrites top-level `export` syntax into plain bindings so the evaluated
/// source declares ordinary globals the wrapper can call by name — the
/// simplified stand-in for a full ES module loader the source's module
/// cache busting relied on (see design notes).
fn strip_export_syntax(source: &str) -> String {
    source
        .replace("export default async function", "async function")
        .replace("export default function", "function")
        .replace("export async function", "async function")
        .replace("export function", "function")
        .replace("export const", "const")
        .replace("export let", "let")
        .replace("export var", "var")
}

fn register_host_functions(ctx: &rquickjs::Ctx<'_>) -> rquickjs::Result<()> {
    let microstack = rquickjs::Object::new(ctx.clone())?;
    microstack.set(
        "sleep",
        rquickjs::Function::new(ctx.clone(), |ms: f64| {
            std::thread::sleep(Duration::from_millis(ms.max(0.0) as u64));
        })?,
    )?;
    ctx.globals().set("microstack", microstack)?;
    Ok(())
}

fn extract_error_from_value(value: &rquickjs::Value<'_>) -> (String, String) {
    if let Some(obj) = value.as_object() {
        let name: String = obj.get("name").unwrap_or_else(|_| "Error".to_string());
        let message: String = obj.get("message").unwrap_or_else(|_| "Unknown error".to_string());
        (name, message)
    } else if let Some(s) = value.as_string() {
        ("Error".to_string(), s.to_string().unwrap_or_else(|_| "Unknown error".to_string()))
    } else {
        ("Error".to_string(), "Unknown error".to_string())
    }
}

/// A fault raised while the handler itself was running (captured as
/// `functionError`), versus a fault in resolving the handler before it ever
/// runs (propagated as a `CoreError` per §4.D/§7 — the named export was
/// missing or not callable).
#[derive(Debug)]
enum RunOutcome {
    Fault(String, String),
    PreInvocation(String),
}

/// Evaluates the handler source and calls the named export with
/// `(event, context)`, run synchronously on the calling (blocking) thread.
/// Returns `Ok(json_text)` on success, `Err(RunOutcome::PreInvocation(_))` if
/// the export doesn't resolve to a callable, or `Err(RunOutcome::Fault(_))`
/// for any other fault escaping the handler.
fn run_handler(
    source: &str,
    export_name: &str,
    event_json: &str,
    request_id: &str,
    function_name: &str,
) -> Result<String, RunOutcome> {
    let stripped = strip_export_syntax(source);

    let invoke_script = format!(
        "(async () => {{\n  const event = JSON.parse({event_literal});\n  const context = {{\n    awsRequestId: {request_id_literal},\n    functionName: {function_name_literal},\n    getRemainingTimeInMillis: () => 0,\n  }};\n  const result = await ({export_name})(event, context);\n  return JSON.stringify(result === undefined ? null : result);\n}})()",
        event_literal = serde_json::to_string(event_json).unwrap_or_else(|_| "\"null\"".to_string()),
        request_id_literal = serde_json::to_string(request_id).unwrap(),
        function_name_literal = serde_json::to_string(function_name).unwrap(),
    );

    let rt = rquickjs::Runtime::new()
        .map_err(|e| RunOutcome::Fault("Error".to_string(), format!("failed to start engine: {e}")))?;
    let ctx = rquickjs::Context::full(&rt)
        .map_err(|e| RunOutcome::Fault("Error".to_string(), format!("failed to start engine: {e}")))?;

    ctx.with(|ctx| {
        if let Err(e) = register_host_functions(&ctx) {
            return Err(RunOutcome::Fault("Error".to_string(), format!("failed to register host functions: {e}")));
        }

        if let Err(e) = ctx.eval::<(), _>(stripped.as_bytes()) {
            return Err(RunOutcome::Fault("Error".to_string(), e.to_string()));
        }

        // `typeof` never throws on an undeclared identifier, so this is a
        // safe pre-invocation probe for "is the named export callable".
        let export_type: String = ctx
            .eval(format!("typeof ({export_name})").into_bytes())
            .unwrap_or_else(|_| "undefined".to_string());
        if export_type != "function" {
            return Err(RunOutcome::PreInvocation(format!(
                "handler export {export_name} is not a function"
            )));
        }

        let promise: rquickjs::Promise = match ctx.eval(invoke_script.as_bytes()) {
            Ok(p) => p,
            Err(e) => return Err(RunOutcome::Fault("Error".to_string(), e.to_string())),
        };

        loop {
            match promise.state() {
                rquickjs::PromiseState::Pending => {
                    if !rt.execute_pending_job() {
                        break;
                    }
                }
                _ => break,
            }
        }

        match promise.state() {
            rquickjs::PromiseState::Fulfilled => promise
                .result::<String>()
                .map_err(|e| RunOutcome::Fault("Error".to_string(), format!("invalid handler result: {e}"))),
            rquickjs::PromiseState::Rejected => {
                let err_val: rquickjs::Value = promise
                    .result()
                    .unwrap_or_else(|_| rquickjs::Value::new_undefined(ctx.clone()));
                let (error_type, error_message) = extract_error_from_value(&err_val);
                Err(RunOutcome::Fault(error_type, error_message))
            }
            rquickjs::PromiseState::Pending => {
                Err(RunOutcome::Fault("Error".to_string(), "handler did not settle".to_string()))
            }
        }
    })
}

/// Invokes `name` with `payload` against the current function record,
/// always returning `Ok(InvokeResult)` unless a *pre-invocation* error
/// occurs (missing function, malformed handler, missing handler file,
/// non-callable export) — those propagate as `CoreError` per the failure
/// taxonomy in §7/§4.D.
pub async fn invoke(
    registry: &FunctionRegistry,
    ledger: &LogLedger,
    scratch_root: &Path,
    name: &str,
    payload: &[u8],
) -> Result<InvokeResult, CoreError> {
    let record = registry.get(name)?;
    let (module, export) = split_handler(&record.handler)?;

    let event_value: serde_json::Value = if payload.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(payload)
            .map_err(|e| CoreError::invalid_argument(format!("payload is not valid JSON: {e}")))?
    };
    let event_json = serde_json::to_string(&event_value).unwrap();

    std::fs::create_dir_all(scratch_root)
        .map_err(|e| CoreError::internal(format!("failed to prepare scratch root: {e}")))?;
    let scratch_dir = tempfile::Builder::new()
        .prefix(&format!("{}-{}-", record.name, record.version))
        .tempdir_in(scratch_root)
        .map_err(|e| CoreError::internal(format!("failed to create scratch directory: {e}")))?;

    extract_bundle(&record.code_bundle, scratch_dir.path())
        .map_err(|e| CoreError::invalid_argument(format!("failed to extract code bundle: {e}")))?;

    let source_path = locate_handler_file(scratch_dir.path(), &module).ok_or_else(|| {
        CoreError::invalid_argument(format!(
            "could not find {module}.mjs, {module}.js, or {module}.cjs in the code bundle"
        ))
    })?;
    let source = std::fs::read_to_string(&source_path)
        .map_err(|e| CoreError::internal(format!("failed to read handler source: {e}")))?;

    let request_id = Uuid::new_v4().to_string();
    let start = Utc::now();
    let start_ms = start.timestamp_millis();

    let timeout_dur = Duration::from_secs(record.timeout_seconds.max(1) as u64);

    let export_name = export.clone();
    let request_id_for_js = request_id.clone();
    let function_name = record.name.clone();
    let environment = record.environment.clone();
    let join_handle = tokio::task::spawn_blocking(move || {
        // Held for the whole install/run sequence: two invocations of
        // *different* functions racing on std::env would otherwise corrupt
        // each other's prior-value capture and restoration (§5).
        let _env_lock = env_lock().lock().unwrap();
        let _env_guard = EnvGuard::install(&environment);
        run_handler(&source, &export_name, &event_json, &request_id_for_js, &function_name)
    });

    let (payload_out, function_error): (Vec<u8>, Option<String>) =
        match tokio::time::timeout(timeout_dur, join_handle).await {
            Ok(Ok(Ok(json_text))) => (json_text.into_bytes(), None),
            Ok(Ok(Err(RunOutcome::Fault(error_type, error_message)))) => {
                let body = serde_json::json!({ "errorType": error_type, "errorMessage": error_message });
                (serde_json::to_vec(&body).unwrap(), Some("Unhandled".to_string()))
            }
            Ok(Ok(Err(RunOutcome::PreInvocation(message)))) => {
                drop(scratch_dir);
                return Err(CoreError::invalid_argument(message));
            }
            Ok(Err(join_err)) => {
                let body = serde_json::json!({
                    "errorType": "Error",
                    "errorMessage": format!("handler task failed: {join_err}"),
                });
                (serde_json::to_vec(&body).unwrap(), Some("Unhandled".to_string()))
            }
            Err(_) => {
                let seconds = record.timeout_seconds as f64;
                let body = serde_json::json!({
                    "errorType": "TimeoutError",
                    "errorMessage": format!("Task timed out after {seconds:.2} seconds"),
                });
                (serde_json::to_vec(&body).unwrap(), Some("Unhandled".to_string()))
            }
        };

    // guaranteed release on every exit path, success/fault/timeout alike
    drop(scratch_dir);

    let group = format!("/aws/lambda/{}", record.name);
    let stream = format!("{}/[$LATEST]{}", start.format("%Y/%m/%d"), request_id);
    let result_tag = if function_error.is_some() { "ERROR" } else { "RESULT" };
    ledger.append_event(&group, &stream, &format!("START RequestId: {request_id}"), Some(start_ms));
    ledger.append_event(
        &group,
        &stream,
        &format!("{result_tag} {}", String::from_utf8_lossy(&payload_out)),
        Some(start_ms + 1),
    );
    ledger.append_event(&group, &stream, &format!("END RequestId: {request_id}"), Some(start_ms + 2));

    Ok(InvokeResult { payload: payload_out, function_error })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_handler_requires_both_parts() {
        assert!(split_handler("index.handler").is_ok());
        assert!(split_handler("index.").is_err());
        assert!(split_handler(".handler").is_err());
        assert!(split_handler("noseparator").is_err());
    }

    #[test]
    fn strip_export_syntax_leaves_a_plain_declaration() {
        let stripped = strip_export_syntax("export async function handler(event) { return event; }");
        assert!(stripped.starts_with("async function handler"));
        assert!(!stripped.contains("export"));
    }

    #[test]
    fn env_guard_restores_prior_value_and_absence() {
        unsafe { std::env::set_var("MICROSTACK_TEST_EXISTING", "before") };
        unsafe { std::env::remove_var("MICROSTACK_TEST_ABSENT") };

        let mut vars = HashMap::new();
        vars.insert("MICROSTACK_TEST_EXISTING".to_string(), "during".to_string());
        vars.insert("MICROSTACK_TEST_ABSENT".to_string(), "during".to_string());

        {
            let _guard = EnvGuard::install(&vars);
            assert_eq!(std::env::var("MICROSTACK_TEST_EXISTING").unwrap(), "during");
            assert_eq!(std::env::var("MICROSTACK_TEST_ABSENT").unwrap(), "during");
        }

        assert_eq!(std::env::var("MICROSTACK_TEST_EXISTING").unwrap(), "before");
        assert!(std::env::var("MICROSTACK_TEST_ABSENT").is_err());
    }

    #[test]
    fn locate_handler_file_prefers_mjs_then_js_then_cjs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "// js").unwrap();
        std::fs::write(dir.path().join("index.cjs"), "// cjs").unwrap();
        let found = locate_handler_file(dir.path(), "index").unwrap();
        assert_eq!(found.file_name().unwrap(), "index.js");
    }

    #[test]
    fn run_handler_rejects_non_callable_export_as_pre_invocation() {
        let result = run_handler("const handler = 42;", "handler", "null", "req-1", "f");
        assert!(matches!(result, Err(RunOutcome::PreInvocation(_))));
    }

    #[test]
    fn run_handler_rejects_missing_export_as_pre_invocation() {
        let result = run_handler("function other(){}", "handler", "null", "req-1", "f");
        assert!(matches!(result, Err(RunOutcome::PreInvocation(_))));
    }

    #[test]
    fn run_handler_returns_json_result_on_success() {
        let result = run_handler(
            "async function handler(event){ return { ok: true }; }",
            "handler",
            "null",
            "req-1",
            "f",
        );
        assert_eq!(result.unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn run_handler_captures_thrown_error_as_fault() {
        let result = run_handler(
            "async function handler(event){ throw new Error(\"boom\"); }",
            "handler",
            "null",
            "req-1",
            "f",
        );
        match result {
            Err(RunOutcome::Fault(error_type, message)) => {
                assert_eq!(error_type, "Error");
                assert_eq!(message, "boom");
            }
            other => panic!("expected a handler fault, got {other:?}"),
        }
    }
}

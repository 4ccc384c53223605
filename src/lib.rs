pub mod config;
pub mod dialect;
pub mod error;
pub mod function_registry;
pub mod function_runtime;
pub mod handlers;
pub mod log_ledger;
pub mod models;
pub mod object_store;
pub mod stack_orchestrator;
pub mod stack_template;

use std::sync::Arc;

use config::MicrostackConfig;
use function_registry::FunctionRegistry;
use log_ledger::LogLedger;
use object_store::ObjectStore;
use stack_orchestrator::StackOrchestrator;

/// Shared handle to every core component, cloned into each request. Each
/// component owns its own interior `RwLock`/`Mutex`, so cloning the `Arc`s
/// is the only sharing this needs.
#[derive(Clone)]
pub struct AppState {
    pub log_ledger: Arc<LogLedger>,
    pub object_store: Arc<ObjectStore>,
    pub function_registry: Arc<FunctionRegistry>,
    pub stack_orchestrator: Arc<StackOrchestrator>,
    pub config: Arc<MicrostackConfig>,
}

//! Purpose: Process-wide runtime state set up by `init` and torn down by `fini`.
//! Exports: `init`, `fini`, `param`, `ensure_initialized`, `install_tracing`.
//! Role: Gate for every KVDB lifecycle call; owns global params.
//! Invariants: `init` is idempotent; a second call keeps the first call's params.
//! Invariants: Tracing is installed with `try_init`, so an existing subscriber wins.
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing_subscriber::EnvFilter;

use crate::core::error::{Error, ErrorKind};
use crate::core::params::{GlobalParams, ParamSet, apply_json, apply_params, load_global_config};

struct Runtime {
    params: GlobalParams,
}

static RUNTIME: Mutex<Option<Runtime>> = Mutex::new(None);

fn runtime() -> MutexGuard<'static, Option<Runtime>> {
    RUNTIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn init<S: AsRef<str>>(config: Option<&Path>, params: &[S]) -> Result<(), Error> {
    let mut guard = runtime();
    if guard.is_some() {
        return Ok(());
    }

    let mut global = GlobalParams::default();
    if let Some(path) = config {
        apply_json(&mut global, &load_global_config(path)?)?;
    }
    apply_params(&mut global, params)?;

    if global.logging_enabled {
        install_tracing(&global.logging_level.to_string().to_lowercase());
    }
    tracing::debug!(logging = global.logging_enabled, "hsekv runtime initialized");
    *guard = Some(Runtime { params: global });
    Ok(())
}

pub fn fini() {
    if runtime().take().is_some() {
        tracing::debug!("hsekv runtime finalized");
    }
}

pub fn param(name: &str) -> Result<String, Error> {
    let guard = runtime();
    let runtime = guard.as_ref().ok_or_else(not_initialized)?;
    runtime.params.get(name).ok_or_else(|| {
        Error::new(ErrorKind::Usage).with_message(format!("unknown global param: {name}"))
    })
}

pub(crate) fn ensure_initialized() -> Result<(), Error> {
    if runtime().is_some() {
        Ok(())
    } else {
        Err(not_initialized())
    }
}

fn not_initialized() -> Error {
    Error::new(ErrorKind::Usage).with_message("hsekv runtime is not initialized")
}

/// `RUST_LOG` overrides `default_level` when set.
pub fn install_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

//! Pipeline lifecycle state machine (C2). A process-wide manager, shared by
//! reference across sessions. Loading is long (tens of seconds); callers never
//! block the request-handling thread on it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ScopeError, Result};
use crate::pipeline::Pipeline;
use crate::types::ParameterBag;

/// Bound on the pre-warm background load.
pub const PREWARM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A constructor for a named pipeline, injected by the binary crate so
/// scope-core never names a concrete model implementation.
pub type PipelineFactory = Arc<dyn Fn(&str, &ParameterBag) -> Result<Box<dyn Pipeline>> + Send + Sync>;

/// Injected hook for releasing device-global state (GPU cache flush) after
/// a pipeline is unloaded. scope-core does not depend on CUDA directly.
pub type ReleaseHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadKey {
    pub id: String,
    pub params: Vec<(String, String)>,
}

impl LoadKey {
    pub fn new(id: impl Into<String>, params: &ParameterBag) -> Self {
        let mut pairs: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        pairs.sort();
        Self {
            id: id.into(),
            params: pairs,
        }
    }
}

/// Current state of the pipeline manager.
#[derive(Debug, Clone)]
pub enum PipelineStatus {
    NotLoaded,
    Loading,
    Loaded {
        id: String,
        load_params: ParameterBag,
    },
    Error {
        message: String,
    },
}

struct Inner {
    status: PipelineStatus,
    key: Option<LoadKey>,
    pipeline: Option<Arc<Mutex<Box<dyn Pipeline>>>>,
}

/// Serializes load/unload/reload of the single process-wide pipeline.
pub struct PipelineManager {
    inner: Mutex<Inner>,
    factory: PipelineFactory,
    release_hook: Option<ReleaseHook>,
}

impl PipelineManager {
    pub fn new(factory: PipelineFactory) -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: PipelineStatus::NotLoaded,
                key: None,
                pipeline: None,
            }),
            factory,
            release_hook: None,
        }
    }

    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.release_hook = Some(hook);
        self
    }

    /// `load(id, params)`. Returns `true` if the pipeline ends up loaded with the
    /// requested `(id, params)`, `false` if another load is already in flight.
    pub fn load(&self, id: &str, params: ParameterBag) -> Result<bool> {
        let key = LoadKey::new(id, &params);

        {
            let inner = self.inner.lock();
            if matches!(inner.status, PipelineStatus::Loading) {
                return Ok(false);
            }
            if let (PipelineStatus::Loaded { .. }, Some(current)) = (&inner.status, &inner.key) {
                if *current == key {
                    return Ok(true);
                }
            }
        }

        let params_for_status = params.clone();

        // Unload any existing pipeline before loading the replacement.
        self.unload_locked();

        {
            let mut inner = self.inner.lock();
            inner.status = PipelineStatus::Loading;
        }

        info!(pipeline_id = %id, "loading pipeline");
        match (self.factory)(id, &params) {
            Ok(pipeline) => {
                let mut inner = self.inner.lock();
                inner.pipeline = Some(Arc::new(Mutex::new(pipeline)));
                inner.key = Some(key);
                inner.status = PipelineStatus::Loaded {
                    id: id.to_string(),
                    load_params: params_for_status,
                };
                info!(pipeline_id = %id, "pipeline loaded");
                Ok(true)
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.status = PipelineStatus::Error {
                    message: e.to_string(),
                };
                inner.key = None;
                inner.pipeline = None;
                warn!(pipeline_id = %id, error = %e, "pipeline load failed");
                Err(ScopeError::LoadFailure {
                    pipeline_id: id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Unload the current pipeline, if any. Transitions state to `NotLoaded` before
    /// running the release hook, so a concurrent `get_pipeline` observes the unload
    /// promptly.
    pub fn unload(&self) {
        self.unload_locked();
    }

    fn unload_locked(&self) {
        let had_pipeline = {
            let mut inner = self.inner.lock();
            let had = inner.pipeline.take().is_some();
            inner.key = None;
            inner.status = PipelineStatus::NotLoaded;
            had
        };
        if had_pipeline {
            if let Some(hook) = &self.release_hook {
                hook();
            }
            debug!("pipeline unloaded");
        }
    }

    /// Fails with [`ScopeError::PipelineNotAvailable`] unless the manager
    /// is currently `Loaded`.
    pub fn get_pipeline(&self) -> Result<Arc<Mutex<Box<dyn Pipeline>>>> {
        let inner = self.inner.lock();
        match (&inner.status, &inner.pipeline) {
            (PipelineStatus::Loaded { .. }, Some(p)) => Ok(Arc::clone(p)),
            _ => Err(ScopeError::PipelineNotAvailable),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.inner.lock().status.clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.inner.lock().status, PipelineStatus::Loaded { .. })
    }

    /// Launch a background load that must not block startup, bounded by
    /// [`PREWARM_TIMEOUT`]. The load itself runs on its own detached thread;
    /// this thread only bounds how long it waits for the result before giving
    /// up and logging a timeout (the load cannot be forcibly cancelled
    /// mid-flight, consistent with §4.1's "pipelines are not thread-safe" —
    /// nothing else may touch them concurrently anyway). Intended to be
    /// driven from an async context via `tokio::task::spawn_blocking` around
    /// the call; see `scope-server::main` for the wiring.
    pub fn prewarm(self: &Arc<Self>, id: String, params: ParameterBag) {
        let outer_manager = Arc::clone(self);
        std::thread::spawn(move || {
            let (tx, rx) = std::sync::mpsc::channel();
            let manager = outer_manager;
            let load_id = id.clone();
            std::thread::spawn(move || {
                let result = manager.load(&load_id, params);
                let _ = tx.send(result);
            });

            match rx.recv_timeout(PREWARM_TIMEOUT) {
                Ok(Ok(true)) => info!(pipeline_id = %id, "pre-warm complete"),
                Ok(Ok(false)) => warn!(pipeline_id = %id, "pre-warm skipped: load already in flight"),
                Ok(Err(e)) => warn!(pipeline_id = %id, error = %e, "pre-warm failed"),
                Err(_) => warn!(
                    pipeline_id = %id,
                    timeout_secs = PREWARM_TIMEOUT.as_secs(),
                    "pre-warm timed out waiting for load"
                ),
            }
        });
    }
}

//! Background training service
//!
//! Training runs on a worker thread so the active version keeps
//! serving while a new one fits. At most one run per model name is in
//! flight; a second request is rejected, never queued silently. Every
//! run carries a cancel flag and a wall-clock budget.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::data::Store;
use crate::model::FitControl;
use crate::registry::ModelRegistry;
use crate::training::pipeline::{TrainingPipeline, TrainingRequest};
use crate::{FootyError, Result, TrainingGuards};

/// Observable state of one training run
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingStatus {
    Queued,
    Training,
    Completed { name: String, version: u32 },
    Failed { reason: String },
}

impl TrainingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingStatus::Completed { .. } | TrainingStatus::Failed { .. }
        )
    }
}

struct TaskShared {
    status: Mutex<TrainingStatus>,
    cancel: Arc<AtomicBool>,
}

/// Handle returned by `spawn`; pollable and cancellable
pub struct TrainingHandle {
    name: String,
    shared: Arc<TaskShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TrainingHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TrainingStatus {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Request cancellation; the worker aborts at its next checkpoint
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Relaxed);
    }

    /// Block until the run reaches a terminal state
    pub fn wait(&self) -> TrainingStatus {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.status()
    }
}

/// Spawns and tracks training runs
pub struct TrainingService {
    store: Store,
    registry: ModelRegistry,
    guards: TrainingGuards,
    running: Arc<Mutex<HashMap<String, Arc<TaskShared>>>>,
}

impl TrainingService {
    pub fn new(store: Store, registry: ModelRegistry, guards: TrainingGuards) -> Self {
        TrainingService {
            store,
            registry,
            guards,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a training run in the background. Fails fast with
    /// `TrainingInProgress` when the name already has a run in flight
    /// and with `InvalidRequest` on a malformed request.
    pub fn spawn(&self, request: TrainingRequest) -> Result<TrainingHandle> {
        request.validate()?;
        let name = request.model_name.clone();

        let shared = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if running.contains_key(&name) {
                return Err(FootyError::TrainingInProgress(name));
            }
            let shared = Arc::new(TaskShared {
                status: Mutex::new(TrainingStatus::Queued),
                cancel: Arc::new(AtomicBool::new(false)),
            });
            running.insert(name.clone(), shared.clone());
            shared
        };

        let store = self.store.clone();
        let registry = self.registry.clone();
        let guards = self.guards.clone();
        let running = self.running.clone();
        let worker_shared = shared.clone();
        let worker_name = name.clone();

        let thread = std::thread::spawn(move || {
            set_status(&worker_shared, TrainingStatus::Training);
            let ctl = FitControl::new(worker_shared.cancel.clone(), guards.budget_secs);
            let pipeline = TrainingPipeline::new(store, guards.min_samples);

            let outcome = pipeline
                .run(&request, &ctl)
                .and_then(|artifact| registry.put(artifact));

            let status = match outcome {
                Ok(meta) => TrainingStatus::Completed {
                    name: meta.name,
                    version: meta.version,
                },
                Err(e) => {
                    log::warn!("Training {} failed: {}", worker_name, e);
                    TrainingStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            set_status(&worker_shared, status);

            running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&worker_name);
        });

        Ok(TrainingHandle {
            name,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Status of an in-flight run for a name, if any
    pub fn status(&self, name: &str) -> Option<TrainingStatus> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|shared| {
                shared
                    .status
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
            })
    }
}

fn set_status(shared: &TaskShared, status: TrainingStatus) {
    *shared.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
}

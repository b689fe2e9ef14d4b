use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Shared;
use crate::pipeline::{PipelineConfigKey, PipelineObjectFactory};

/// Outcome counts of one precompilation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrecompileReport {
    pub requested: usize,
    pub compiled: usize,
    pub already_cached: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Keys skipped or discarded because their material was unregistered or
    /// re-keyed before the build finished.
    pub stale: usize,
}

impl PrecompileReport {
    pub fn merge(&mut self, other: &Self) {
        self.requested += other.requested;
        self.compiled += other.compiled;
        self.already_cached += other.already_cached;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.stale += other.stale;
    }
}

enum Outcome {
    Compiled,
    AlreadyCached,
    Failed,
    Cancelled,
    Stale,
}

/// Resolves every key, at most `max_parallel_creations` at a time.
///
/// Each item acquires its own permit; a failing item is logged and does not
/// affect the others. Once `token` is cancelled no further items start.
pub(crate) async fn precompile_batch<F: PipelineObjectFactory>(
    shared: Arc<Shared<F>>,
    keys: Vec<PipelineConfigKey>,
    token: CancellationToken,
) -> PrecompileReport {
    let requested = keys.len();
    let tasks = keys.into_iter().map(|key| {
        let shared = shared.clone();
        let token = token.clone();
        async move {
            let permit = tokio::select! {
                biased;
                () = token.cancelled() => return Outcome::Cancelled,
                permit = shared.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Outcome::Cancelled,
                },
            };
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }
            if !shared.is_current(&key) {
                return Outcome::Stale;
            }
            if shared.cache.contains(&key) {
                return Outcome::AlreadyCached;
            }

            let worker = shared.clone();
            let task_key = key.clone();
            let result =
                tokio::task::spawn_blocking(move || worker.resolve(&task_key).map(|l| l.was_cached))
                    .await;
            drop(permit);

            match result {
                Ok(Ok(true)) => Outcome::AlreadyCached,
                // The material went away while this build was running.
                Ok(Ok(false)) if !shared.is_current(&key) => {
                    shared.cache.remove(&key);
                    Outcome::Stale
                }
                Ok(Ok(false)) => Outcome::Compiled,
                Ok(Err(err)) => {
                    log::warn!("Precompilation of {} failed: {err}", key.material_name());
                    Outcome::Failed
                }
                Err(join_err) => {
                    log::warn!(
                        "Precompilation worker for {} panicked: {join_err}",
                        key.material_name()
                    );
                    Outcome::Failed
                }
            }
        }
    });

    let mut report = PrecompileReport {
        requested,
        ..Default::default()
    };
    for outcome in join_all(tasks).await {
        match outcome {
            Outcome::Compiled => report.compiled += 1,
            Outcome::AlreadyCached => report.already_cached += 1,
            Outcome::Failed => report.failed += 1,
            Outcome::Cancelled => report.cancelled += 1,
            Outcome::Stale => report.stale += 1,
        }
    }

    shared
        .counters
        .precompiled
        .fetch_add(report.compiled as u64, Ordering::Relaxed);
    shared
        .counters
        .precompile_failures
        .fetch_add(report.failed as u64, Ordering::Relaxed);

    log::debug!(
        "Precompile batch: {} requested, {} compiled, {} cached, {} failed, {} cancelled, {} stale",
        report.requested,
        report.compiled,
        report.already_cached,
        report.failed,
        report.cancelled,
        report.stale
    );
    report
}

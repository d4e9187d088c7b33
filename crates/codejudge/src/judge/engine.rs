//! Caller-facing entry point
//!
//! Ties validation, the worker pool and the orchestrator together. Every
//! submission initializes the isolate box of its slot on entry and cleans it
//! up on the way out, whichever way it leaves.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::isolate::{IsolateBox, locate_program};
use crate::judge::{JudgeError, JudgeRequest, SubmissionResult, run_submission, validate};
use crate::pool::{PoolStats, WorkerPool};
use crate::runner::IsolateSandbox;

/// Liveness as seen by the health probe
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(flatten)]
    pub pool: PoolStats,
    /// Languages submissions may use on this host
    pub languages: Vec<String>,
}

/// The judging engine; cheap to clone, shares one worker pool
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<Config>,
    pool: WorkerPool,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let pool = WorkerPool::from_config(&config);
        info!(
            capacity = pool.capacity(),
            queue_length = config.pool.queue_length,
            languages = config.languages.len(),
            "judging engine ready"
        );
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Judge one submission.
    ///
    /// Waits for a worker slot, so the future may take a while to resolve.
    /// Dropping it, or cancelling `cancel`, kills the running program and
    /// frees the slot.
    #[instrument(skip_all, fields(language = %request.language, cases = request.test_cases.len()))]
    pub async fn judge(
        &self,
        request: JudgeRequest,
        cancel: CancellationToken,
    ) -> Result<SubmissionResult, JudgeError> {
        let request = validate(request, &self.config)?;

        let slot = tokio::select! {
            slot = self.pool.acquire() => slot?,
            _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
        };
        let box_id = slot.box_id();

        let mut sandbox =
            match IsolateBox::init(box_id, self.config.isolate_binary(), self.config.cgroup).await {
                Ok(sandbox) => sandbox.with_slot(slot),
                Err(e) => {
                    let err = JudgeError::internal("failed to initialize sandbox", e);
                    error!(box_id, error = %err, "judging aborted");
                    return Err(err);
                }
            };

        let result = run_submission(
            &IsolateSandbox::new(&sandbox, &self.config),
            &request,
            &self.config.judge,
            &cancel,
        )
        .await;

        if let Err(e) = sandbox.cleanup().await {
            warn!(box_id, error = %e, "failed to clean up box");
        }

        match result {
            Ok(ref submission) => info!(
                box_id,
                status = ?submission.overall_status,
                passed = submission.passed_count(),
                "submission judged"
            ),
            Err(ref e @ JudgeError::Internal { .. }) => error!(box_id, error = %e, "judging aborted"),
            Err(ref e) => info!(box_id, error = %e, "submission not judged"),
        }

        result
    }

    /// Whether the engine can judge at all. Looks for the isolate binary and
    /// reads the pool counters; never spawns a process.
    pub fn health(&self) -> HealthReport {
        let isolate = self.config.isolate_binary();
        let healthy = isolate
            .to_str()
            .and_then(locate_program)
            .is_some_and(|path| path.is_file());

        HealthReport {
            healthy,
            pool: self.pool.stats(),
            languages: self
                .config
                .runnable_languages()
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

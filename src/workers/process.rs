use std::sync::Arc;

use async_trait::async_trait;
use tokio::task;
use tracing::{error, info, warn};

use super::{JobExecution, JobHandler, RetryPolicy};
use crate::{
    claim::JobClaim,
    error::{ServiceError, ServiceResult},
    extract::extract_metadata,
    jobs::JOB_PROCESS_RESOURCE,
    models::{Job, Resource, ResourceStatus},
    state::AppState,
};

/// Where in the workflow a failure happened. Only processing failures touch resource status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Authorization,
    Processing,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Authorization => "authorization",
            FailureStage::Processing => "processing",
        }
    }
}

#[derive(Debug)]
pub struct ProcessFailure {
    pub stage: FailureStage,
    pub error: ServiceError,
}

impl ProcessFailure {
    fn authorization(error: ServiceError) -> Self {
        Self {
            stage: FailureStage::Authorization,
            error,
        }
    }

    fn processing(error: ServiceError) -> Self {
        Self {
            stage: FailureStage::Processing,
            error,
        }
    }
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Completed(Resource),
    AlreadyCompleted,
    AlreadyFailed,
    /// Another delivery moved the resource to a terminal state first.
    Superseded,
}

pub struct ProcessResourceJob;

impl ProcessResourceJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessResourceJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ProcessResourceJob {
    fn job_type(&self) -> &'static str {
        JOB_PROCESS_RESOURCE
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let claim = match JobClaim::from_payload(&job.payload) {
            Ok(claim) => claim,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid job claim: {err}"),
                }
            }
        };

        match process_claim(&state, &claim).await {
            Ok(outcome) => {
                info!(
                    job_id = %job.id,
                    resource_id = %claim.resource_id,
                    tenant_id = %claim.tenant_id,
                    outcome = outcome_label(&outcome),
                    "processed resource"
                );
                JobExecution::Success
            }
            Err(failure) => settle_failure(&state, &job, &claim, failure),
        }
    }
}

fn outcome_label(outcome: &ProcessOutcome) -> &'static str {
    match outcome {
        ProcessOutcome::Completed(_) => "completed",
        ProcessOutcome::AlreadyCompleted => "already_completed",
        ProcessOutcome::AlreadyFailed => "already_failed",
        ProcessOutcome::Superseded => "superseded",
    }
}

fn settle_failure(
    state: &AppState,
    job: &Job,
    claim: &JobClaim,
    failure: ProcessFailure,
) -> JobExecution {
    let policy = RetryPolicy::from_config(&state.config);
    let message = failure.error.to_string();

    if failure.error.is_retryable() && !policy.exhausted(job.attempts) {
        return JobExecution::Retry {
            delay: policy.delay_for(job.attempts),
            error: message,
        };
    }

    // An authorization-stage outage leaves the resource `pending`, so this log line is the
    // only record of it. Resubmitting the claim resumes the workflow.
    if failure.error.is_retryable() {
        error!(
            job_id = %job.id,
            resource_id = %claim.resource_id,
            tenant_id = %claim.tenant_id,
            attempts = job.attempts,
            stage = failure.stage.as_str(),
            error = %message,
            "retries exhausted; operator attention required"
        );
    }

    if failure.stage == FailureStage::Processing {
        if let Err(err) = state
            .resources
            .mark_failed(claim.tenant_id, claim.resource_id)
        {
            warn!(
                resource_id = %claim.resource_id,
                error = %err,
                "failed to record resource failure"
            );
        }
    }

    JobExecution::Failed { error: message }
}

/// Runs one claim end to end. Authorization comes first and nothing is touched before it passes.
pub async fn process_claim(
    state: &AppState,
    claim: &JobClaim,
) -> Result<ProcessOutcome, ProcessFailure> {
    let job = state
        .authorizer()
        .authorize(claim)
        .map_err(ProcessFailure::authorization)?;

    match job.resource().status() {
        ResourceStatus::Completed => return Ok(ProcessOutcome::AlreadyCompleted),
        ResourceStatus::Failed => return Ok(ProcessOutcome::AlreadyFailed),
        ResourceStatus::Pending | ResourceStatus::Processing => {}
    }

    run_processing(state, job.tenant_id(), job.resource())
        .await
        .map_err(ProcessFailure::processing)
}

async fn run_processing(
    state: &AppState,
    tenant_id: uuid::Uuid,
    resource: &Resource,
) -> ServiceResult<ProcessOutcome> {
    if state
        .resources
        .begin_processing(tenant_id, resource.id)?
        .is_none()
    {
        return Ok(ProcessOutcome::Superseded);
    }

    let bytes = state.storage.read(tenant_id, &resource.storage_key).await?;

    let mime_type = resource.mime_type.clone();
    let metadata = task::spawn_blocking(move || extract_metadata(&mime_type, &bytes))
        .await
        .map_err(|err| ServiceError::FatalProcessing(format!("extraction panicked: {err}")))?;

    match state.resources.complete(tenant_id, resource.id, metadata)? {
        Some(resource) => Ok(ProcessOutcome::Completed(resource)),
        None => Ok(ProcessOutcome::Superseded),
    }
}

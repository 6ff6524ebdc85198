mod common;

use std::fs;

use anyhow::Result;
use common::{TestApp, TestUser};
use orgfiles::claim::JobClaim;
use orgfiles::error::{AuthorizationFailure, ServiceError};
use orgfiles::jobs::{JOB_PROCESS_RESOURCE, STATUS_FAILED, STATUS_QUEUED, STATUS_SUCCEEDED};
use orgfiles::models::Resource;
use orgfiles::workers::process::{process_claim, FailureStage};

async fn uploaded(app: &TestApp, user: &TestUser, name: &str, data: &[u8]) -> Result<Resource> {
    let body = app.upload_ok(name, data, &user.token).await?;
    app.resource(user.tenant_id, body.id)
}

fn resubmit(app: &TestApp, claim: JobClaim) -> Result<()> {
    app.state
        .queue
        .enqueue(JOB_PROCESS_RESOURCE, claim.to_payload(), None)?;
    Ok(())
}

#[tokio::test]
async fn processing_completes_with_metadata() -> Result<()> {
    let app = TestApp::new().await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"alpha beta\ngamma\n").await?;

    assert_eq!(app.run_jobs().await?, 1);

    let done = app.resource(user.tenant_id, resource.id)?;
    assert_eq!(done.status, "completed");
    assert!(done.processed_at.is_some());
    let metadata = done.metadata.expect("metadata recorded");
    assert_eq!(metadata["type"], "text");
    assert_eq!(metadata["words"], 3);
    assert_eq!(metadata["lines"], 2);
    assert_eq!(metadata["size_bytes"], 17);

    assert_eq!(app.jobs()[0].status, STATUS_SUCCEEDED);
    Ok(())
}

#[tokio::test]
async fn redelivery_of_a_completed_claim_is_a_no_op() -> Result<()> {
    let app = TestApp::new().await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;
    app.run_jobs().await?;
    let first = app.resource(user.tenant_id, resource.id)?;

    resubmit(&app, JobClaim::for_resource(&resource))?;
    assert_eq!(app.run_jobs().await?, 1);

    let second = app.resource(user.tenant_id, resource.id)?;
    assert_eq!(second.status, "completed");
    assert_eq!(second.processed_at, first.processed_at);
    assert!(app.jobs().iter().all(|job| job.status == STATUS_SUCCEEDED));
    Ok(())
}

#[tokio::test]
async fn redelivery_while_processing_reruns_the_workflow() -> Result<()> {
    let app = TestApp::new().await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;

    app.state
        .resources
        .begin_processing(user.tenant_id, resource.id)?;
    app.run_jobs().await?;

    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "completed");
    Ok(())
}

#[tokio::test]
async fn authorizer_is_deterministic_for_an_unmodified_claim() -> Result<()> {
    let app = TestApp::new().await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;
    let claim = JobClaim::for_resource(&resource);

    let authorizer = app.state.authorizer();
    for _ in 0..5 {
        let job = authorizer.authorize(&claim)?;
        assert_eq!(job.claim(), &claim);
        assert_eq!(job.tenant_id(), user.tenant_id);
    }
    Ok(())
}

#[tokio::test]
async fn swapped_tenant_claim_fails_without_retry() -> Result<()> {
    let app = TestApp::new().await?;
    let alice = app.sign_up("alice@acme.test", "Acme").await?;
    let mallory = app.sign_up("mallory@globex.test", "Globex").await?;
    let resource = uploaded(&app, &alice, "notes.txt", b"hello").await?;

    // only the forged claim should be in the queue
    app.store.jobs().iter().for_each(|job| {
        app.state
            .queue
            .mark_failed(job.id, "discarded by test")
            .expect("discard job");
    });
    let forged = JobClaim {
        tenant_id: mallory.tenant_id,
        ..JobClaim::for_resource(&resource)
    };
    resubmit(&app, forged)?;

    assert_eq!(app.run_jobs().await?, 1);
    let jobs = app.jobs();
    let job = jobs.last().expect("forged job");
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.last_error.as_deref(),
        Some("authorization error: tenant mismatch")
    );
    assert!(jobs.iter().all(|job| job.status != STATUS_QUEUED));

    assert_eq!(app.resource(alice.tenant_id, resource.id)?.status, "pending");
    Ok(())
}

#[tokio::test]
async fn deactivated_principal_is_fatal_until_reactivated() -> Result<()> {
    let app = TestApp::new().await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;

    app.state.identity.set_active(user.id, false)?;
    app.run_jobs().await?;

    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.last_error.as_deref(),
        Some("authorization error: principal deactivated")
    );
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "pending");

    app.state.identity.set_active(user.id, true)?;
    resubmit(&app, JobClaim::for_resource(&resource))?;
    app.run_jobs().await?;

    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "completed");
    Ok(())
}

#[tokio::test]
async fn authorization_runs_before_any_side_effect() -> Result<()> {
    let app = TestApp::new().await?;
    let alice = app.sign_up("alice@acme.test", "Acme").await?;
    let bob = app.sign_up("bob@acme.test", "Acme").await?;
    let resource = uploaded(&app, &alice, "notes.txt", b"hello").await?;

    let forged = JobClaim {
        principal_id: bob.id,
        ..JobClaim::for_resource(&resource)
    };
    let failure = process_claim(&app.state, &forged)
        .await
        .expect_err("colleague claim must be refused");
    assert_eq!(failure.stage, FailureStage::Authorization);
    assert!(matches!(
        failure.error,
        ServiceError::Authorization(AuthorizationFailure::OwnerMismatch)
    ));
    assert_eq!(app.resource(alice.tenant_id, resource.id)?.status, "pending");
    Ok(())
}

#[tokio::test]
async fn transient_io_retries_then_fails_when_exhausted() -> Result<()> {
    let app = TestApp::with_config(|config| config.job_max_attempts = 2).await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;

    // a directory where the file should be makes every read fail with an I/O error
    let path = app
        .state
        .storage
        .resolve(user.tenant_id, &resource.storage_key)
        .await?;
    fs::remove_file(&path)?;
    fs::create_dir(&path)?;

    assert_eq!(app.run_jobs().await?, 1);
    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_QUEUED);
    assert_eq!(job.attempts, 1);
    assert!(job.run_after > chrono::Utc::now().naive_utc());
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "processing");

    app.store.expire_backoff();
    assert_eq!(app.run_jobs().await?, 1);
    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, 2);
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "failed");
    Ok(())
}

#[tokio::test]
async fn missing_bytes_fail_immediately() -> Result<()> {
    let app = TestApp::new().await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;

    app.state
        .storage
        .delete(user.tenant_id, &resource.storage_key)
        .await?;
    app.run_jobs().await?;

    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, 1);
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "failed");

    resubmit(&app, JobClaim::for_resource(&resource))?;
    app.run_jobs().await?;
    assert_eq!(app.jobs()[1].status, STATUS_SUCCEEDED);
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "failed");
    Ok(())
}

#[tokio::test]
async fn malformed_payload_fails_the_job() -> Result<()> {
    let app = TestApp::new().await?;
    app.state.queue.enqueue(
        JOB_PROCESS_RESOURCE,
        serde_json::json!({ "resource_id": "nope", "extra": true }),
        None,
    )?;

    app.run_jobs().await?;
    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_FAILED);
    assert!(job
        .last_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("invalid job claim"));
    Ok(())
}

#[tokio::test]
async fn exhausted_lookup_outage_leaves_the_resource_pending() -> Result<()> {
    let app = TestApp::with_config(|config| config.job_max_attempts = 2).await?;
    let user = app.sign_up("alice@acme.test", "Acme").await?;
    let resource = uploaded(&app, &user, "notes.txt", b"hello").await?;

    app.store.set_user_lookups_available(false);
    assert_eq!(app.run_jobs().await?, 1);
    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_QUEUED);
    assert_eq!(job.attempts, 1);

    app.store.expire_backoff();
    assert_eq!(app.run_jobs().await?, 1);
    let job = &app.jobs()[0];
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, 2);
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "pending");

    app.store.set_user_lookups_available(true);
    resubmit(&app, JobClaim::for_resource(&resource))?;
    app.run_jobs().await?;
    assert_eq!(app.resource(user.tenant_id, resource.id)?.status, "completed");
    Ok(())
}

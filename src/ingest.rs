//! Request side of the upload workflow: validate, store bytes, record, enqueue.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::{
    auth::Principal,
    claim::JobClaim,
    error::{ServiceError, ServiceResult},
    jobs::JOB_PROCESS_RESOURCE,
    models::Resource,
    repository::ResourceDraft,
    state::AppState,
    storage::sanitize_display_name,
};

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Accepts an upload for background processing. The returned resource is still `pending`.
pub async fn accept_upload(
    state: &AppState,
    principal: &Principal,
    upload: Upload,
) -> ServiceResult<Resource> {
    principal.require_active()?;

    let display_name = sanitize_display_name(&upload.file_name);
    validate_extension(state, &display_name)?;

    let size = upload.bytes.len() as u64;
    if size == 0 {
        return Err(ServiceError::validation("file must not be empty"));
    }
    if size > state.config.max_upload_bytes {
        return Err(ServiceError::validation(format!(
            "file exceeds the maximum size of {} bytes",
            state.config.max_upload_bytes
        )));
    }

    let used = state.resources.tenant_usage_bytes(principal.tenant_id)?;
    check_quota(state, used, size)?;

    let mime_type = resolve_mime_type(upload.content_type.as_deref(), &display_name);
    let checksum = hex::encode(Sha256::digest(&upload.bytes));

    let stored = state
        .storage
        .put(principal.tenant_id, upload.bytes, &upload.file_name)
        .await?;

    let draft = ResourceDraft {
        storage_key: stored.storage_key.clone(),
        display_name: stored.display_name,
        mime_type,
        size_bytes: size,
        checksum,
    };
    let resource = match state.resources.create(principal, draft) {
        Ok(resource) => resource,
        Err(err) => {
            discard_bytes(state, principal, &stored.storage_key).await;
            return Err(err);
        }
    };

    // Concurrent uploads from one tenant can all pass the first check. The row now counts
    // towards usage, so a second look sees every racing upload that got this far.
    let recheck = state
        .resources
        .tenant_usage_bytes(principal.tenant_id)
        .and_then(|used_after| check_quota(state, used_after.saturating_sub(size), size));
    if let Err(err) = recheck {
        warn!(
            resource_id = %resource.id,
            tenant_id = %resource.tenant_id,
            error = %err,
            "withdrawing upload after quota recheck"
        );
        if let Err(delete_err) = state.resources.soft_delete(resource.id, principal) {
            warn!(resource_id = %resource.id, error = %delete_err, "failed to withdraw upload");
        }
        discard_bytes(state, principal, &stored.storage_key).await;
        return Err(err);
    }

    let claim = JobClaim::for_resource(&resource);
    if let Err(err) = state
        .queue
        .enqueue(JOB_PROCESS_RESOURCE, claim.to_payload(), None)
    {
        error!(
            resource_id = %resource.id,
            tenant_id = %resource.tenant_id,
            error = %err,
            "failed to enqueue processing job"
        );
        if let Err(mark_err) = state.resources.mark_failed(resource.tenant_id, resource.id) {
            warn!(resource_id = %resource.id, error = %mark_err, "failed to mark resource failed");
        }
        return Err(ServiceError::TransientIo(
            "could not schedule processing".into(),
        ));
    }

    info!(
        resource_id = %resource.id,
        tenant_id = %resource.tenant_id,
        owner_id = %resource.owner_id,
        size_bytes = resource.size_bytes,
        mime_type = %resource.mime_type,
        "accepted upload"
    );
    Ok(resource)
}

fn check_quota(state: &AppState, used: u64, requested: u64) -> ServiceResult<()> {
    let limit = state.config.tenant_quota_bytes;
    if used.saturating_add(requested) > limit {
        return Err(ServiceError::QuotaExceeded {
            limit,
            used,
            requested,
        });
    }
    Ok(())
}

fn validate_extension(state: &AppState, display_name: &str) -> ServiceResult<()> {
    let extension = display_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .ok_or_else(|| ServiceError::validation("file name must have an extension"))?;

    if state.config.is_extension_allowed(extension) {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "file type '.{}' is not allowed",
            extension.to_ascii_lowercase()
        )))
    }
}

/// The declared part type wins unless it is missing or the generic octet-stream.
fn resolve_mime_type(declared: Option<&str>, display_name: &str) -> String {
    let declared = declared
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != OCTET_STREAM);

    declared.unwrap_or_else(|| {
        mime_guess::from_path(display_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    })
}

async fn discard_bytes(state: &AppState, principal: &Principal, storage_key: &str) {
    if let Err(err) = state.storage.delete(principal.tenant_id, storage_key).await {
        warn!(
            tenant_id = %principal.tenant_id,
            error = %err,
            "failed to remove orphaned upload bytes"
        );
    }
}

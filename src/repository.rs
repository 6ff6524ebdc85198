//! The only path to resource records.
//!
//! Request-side operations take a verified [`Principal`]; worker-side operations take the tenant
//! id explicitly. Nothing here can read or write outside the tenant it was handed.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::{ServiceError, ServiceResult},
    models::{NewResource, Resource, ResourceStatus},
    store::{StatusChange, Store, TenantScope, Visibility},
};

/// Caller-supplied fields of a new resource. Tenant and owner come from the principal.
#[derive(Debug, Clone)]
pub struct ResourceDraft {
    pub storage_key: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub checksum: String,
}

#[derive(Clone)]
pub struct ResourceRepository {
    store: Arc<dyn Store>,
}

impl ResourceRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn scoped_list(&self, principal: &Principal) -> ServiceResult<Vec<Resource>> {
        principal.require_active()?;
        Ok(self
            .store
            .list_resources(TenantScope::live(principal.tenant_id))?)
    }

    /// Absent, soft-deleted and foreign resources are all `NotFound`.
    pub fn scoped_get(&self, id: Uuid, principal: &Principal) -> ServiceResult<Resource> {
        principal.require_active()?;
        self.scoped_get_explicit(id, principal.tenant_id, Visibility::Live)
    }

    pub fn scoped_get_explicit(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        visibility: Visibility,
    ) -> ServiceResult<Resource> {
        self.store
            .find_resource(TenantScope::new(tenant_id, visibility), id)?
            .ok_or(ServiceError::NotFound)
    }

    pub fn create(&self, principal: &Principal, draft: ResourceDraft) -> ServiceResult<Resource> {
        principal.require_active()?;
        let size_bytes = i64::try_from(draft.size_bytes)
            .map_err(|_| ServiceError::validation("file is too large"))?;

        Ok(self.store.insert_resource(NewResource {
            id: Uuid::new_v4(),
            tenant_id: principal.tenant_id,
            owner_id: principal.user_id,
            storage_key: draft.storage_key,
            display_name: draft.display_name,
            mime_type: draft.mime_type,
            size_bytes,
            checksum: draft.checksum,
            status: ResourceStatus::Pending.as_str().to_string(),
        })?)
    }

    /// Hides the resource from every read path. Returns the record as it was before deletion.
    pub fn soft_delete(&self, id: Uuid, principal: &Principal) -> ServiceResult<Resource> {
        let resource = self.scoped_get(id, principal)?;
        let deleted =
            self.store
                .soft_delete_resource(principal.tenant_id, id, Utc::now().naive_utc())?;
        if deleted {
            Ok(resource)
        } else {
            Err(ServiceError::NotFound)
        }
    }

    /// `None` when the resource is no longer pending or processing.
    pub fn begin_processing(&self, tenant_id: Uuid, id: Uuid) -> ServiceResult<Option<Resource>> {
        self.transition(tenant_id, id, StatusChange::Processing)
    }

    pub fn complete(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        metadata: Value,
    ) -> ServiceResult<Option<Resource>> {
        self.transition(tenant_id, id, StatusChange::Completed { metadata })
    }

    pub fn mark_failed(&self, tenant_id: Uuid, id: Uuid) -> ServiceResult<Option<Resource>> {
        self.transition(tenant_id, id, StatusChange::Failed)
    }

    pub fn tenant_usage_bytes(&self, tenant_id: Uuid) -> ServiceResult<u64> {
        let used = self.store.tenant_usage_bytes(tenant_id)?;
        Ok(u64::try_from(used).unwrap_or_default())
    }

    fn transition(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        change: StatusChange,
    ) -> ServiceResult<Option<Resource>> {
        Ok(self
            .store
            .transition_resource(tenant_id, id, change, Utc::now().naive_utc())?)
    }
}

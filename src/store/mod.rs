//! Persistence for tenants, users and resources.
//!
//! Every resource operation takes the tenant it runs in as an argument, and every read takes an
//! explicit [`Visibility`]. There is no way to look a resource up by id alone.

use chrono::NaiveDateTime;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewResource, NewTenant, NewUser, Resource, ResourceStatus, Tenant, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Whether soft-deleted resources take part in a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Live,
    IncludeDeleted,
}

/// The tenant boundary a resource read runs inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: Uuid,
    visibility: Visibility,
}

impl TenantScope {
    pub fn new(tenant_id: Uuid, visibility: Visibility) -> Self {
        Self {
            tenant_id,
            visibility,
        }
    }

    pub fn live(tenant_id: Uuid) -> Self {
        Self::new(tenant_id, Visibility::Live)
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn admits(&self, resource: &Resource) -> bool {
        resource.tenant_id == self.tenant_id
            && (self.visibility == Visibility::IncludeDeleted || !resource.is_deleted())
    }
}

/// A worker-side status change. Applied only if the current status allows it.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Processing,
    Completed { metadata: Value },
    Failed,
}

impl StatusChange {
    pub fn target(&self) -> ResourceStatus {
        match self {
            StatusChange::Processing => ResourceStatus::Processing,
            StatusChange::Completed { .. } => ResourceStatus::Completed,
            StatusChange::Failed => ResourceStatus::Failed,
        }
    }
}

pub trait Store: Send + Sync + 'static {
    fn find_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>>;

    fn find_tenant_by_name(&self, name: &str) -> StoreResult<Option<Tenant>>;

    /// Fails with [`StoreError::Conflict`] when the name is taken.
    fn insert_tenant(&self, tenant: NewTenant) -> StoreResult<Tenant>;

    fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Fails with [`StoreError::Conflict`] when the email is taken.
    fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    fn set_user_active(&self, id: Uuid, active: bool) -> StoreResult<Option<User>>;

    fn insert_resource(&self, resource: NewResource) -> StoreResult<Resource>;

    fn find_resource(&self, scope: TenantScope, id: Uuid) -> StoreResult<Option<Resource>>;

    /// Newest first.
    fn list_resources(&self, scope: TenantScope) -> StoreResult<Vec<Resource>>;

    /// Returns `false` when no live resource with that id exists in the tenant.
    fn soft_delete_resource(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<bool>;

    /// Compare-and-set on status. `None` means the resource is absent from the tenant or its
    /// current status does not permit the change. Deletion does not block status changes.
    fn transition_resource(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        change: StatusChange,
        at: NaiveDateTime,
    ) -> StoreResult<Option<Resource>>;

    /// Bytes held by live resources that have not failed.
    fn tenant_usage_bytes(&self, tenant_id: Uuid) -> StoreResult<i64>;
}

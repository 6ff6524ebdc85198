use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tenants)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tenants)]
pub struct NewTenant {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = users)]
#[diesel(belongs_to(Tenant))]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
}

/// Processing state of a resource. Soft deletion is tracked separately and never changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Processing => "processing",
            ResourceStatus::Completed => "completed",
            ResourceStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceStatus::Completed | ResourceStatus::Failed)
    }

    /// States a resource may be in immediately before moving to `self`.
    ///
    /// `processing -> processing` is allowed so a redelivered claim can re-run extraction.
    pub fn allowed_predecessors(&self) -> &'static [ResourceStatus] {
        match self {
            ResourceStatus::Pending => &[],
            ResourceStatus::Processing => &[ResourceStatus::Pending, ResourceStatus::Processing],
            ResourceStatus::Completed => &[ResourceStatus::Processing],
            ResourceStatus::Failed => &[ResourceStatus::Pending, ResourceStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, next: ResourceStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ResourceStatus::Pending),
            "processing" => Ok(ResourceStatus::Processing),
            "completed" => Ok(ResourceStatus::Completed),
            "failed" => Ok(ResourceStatus::Failed),
            other => Err(format!("unknown resource status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = resources)]
#[diesel(belongs_to(Tenant))]
pub struct Resource {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub storage_key: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl Resource {
    /// Unknown stored values are treated as `failed` so they are never picked up again.
    pub fn status(&self) -> ResourceStatus {
        self.status.parse().unwrap_or(ResourceStatus::Failed)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = resources)]
pub struct NewResource {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub storage_key: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

//! In-process store used by tests and single-node development runs.
//!
//! Mirrors the constraints the Postgres schema enforces: unique tenant names and emails, and
//! status compare-and-set on resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{StatusChange, Store, StoreError, StoreResult, TenantScope};
use crate::{
    jobs::{
        new_job, next_run_at, JobQueue, JobQueueError, JobQueueResult, STATUS_FAILED,
        STATUS_PROCESSING, STATUS_QUEUED, STATUS_SUCCEEDED,
    },
    models::{Job, NewResource, NewTenant, NewUser, Resource, ResourceStatus, Tenant, User},
};

#[derive(Default)]
struct Tables {
    tenants: Vec<Tenant>,
    users: Vec<User>,
    resources: Vec<Resource>,
    jobs: Vec<Job>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    users_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }

    fn lock_queue(&self) -> JobQueueResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| JobQueueError::Unavailable("memory store poisoned".into()))
    }

    /// Snapshot of every job, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.tables
            .lock()
            .map(|tables| tables.jobs.clone())
            .unwrap_or_default()
    }

    pub fn tenant_count(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.tenants.len())
            .unwrap_or_default()
    }

    /// Simulates an outage of user lookups by id. Other operations keep working.
    pub fn set_user_lookups_available(&self, available: bool) {
        self.users_unavailable.store(!available, Ordering::SeqCst);
    }

    /// Makes every queued job due now, as if its backoff had elapsed.
    pub fn expire_backoff(&self) {
        if let Ok(mut tables) = self.tables.lock() {
            let now = Utc::now().naive_utc();
            for job in tables.jobs.iter_mut() {
                if job.status == STATUS_QUEUED {
                    job.run_after = now;
                }
            }
        }
    }

    fn settle_job(
        &self,
        job_id: Uuid,
        apply: impl FnOnce(&mut Job, NaiveDateTime),
    ) -> JobQueueResult<()> {
        let mut tables = self.lock_queue()?;
        let job = tables
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or(JobQueueError::UnknownJob(job_id))?;
        apply(job, Utc::now().naive_utc());
        Ok(())
    }
}

impl Store for MemoryStore {
    fn find_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        let tables = self.lock()?;
        Ok(tables.tenants.iter().find(|t| t.id == id).cloned())
    }

    fn find_tenant_by_name(&self, name: &str) -> StoreResult<Option<Tenant>> {
        let tables = self.lock()?;
        Ok(tables.tenants.iter().find(|t| t.name == name).cloned())
    }

    fn insert_tenant(&self, tenant: NewTenant) -> StoreResult<Tenant> {
        let mut tables = self.lock()?;
        if tables.tenants.iter().any(|t| t.name == tenant.name) {
            return Err(StoreError::Conflict("tenant already exists".into()));
        }
        let row = Tenant {
            id: tenant.id,
            name: tenant.name,
            created_at: Utc::now().naive_utc(),
        };
        tables.tenants.push(row.clone());
        Ok(row)
    }

    fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        if self.users_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("user lookups disabled".into()));
        }
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.lock()?;
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("user already exists".into()));
        }
        let now = Utc::now().naive_utc();
        let row = User {
            id: user.id,
            tenant_id: user.tenant_id,
            email: user.email,
            password_hash: user.password_hash,
            active: user.active,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(row.clone());
        Ok(row)
    }

    fn set_user_active(&self, id: Uuid, active: bool) -> StoreResult<Option<User>> {
        let mut tables = self.lock()?;
        Ok(tables.users.iter_mut().find(|u| u.id == id).map(|user| {
            user.active = active;
            user.updated_at = Utc::now().naive_utc();
            user.clone()
        }))
    }

    fn insert_resource(&self, resource: NewResource) -> StoreResult<Resource> {
        let mut tables = self.lock()?;
        let now = Utc::now().naive_utc();
        let row = Resource {
            id: resource.id,
            tenant_id: resource.tenant_id,
            owner_id: resource.owner_id,
            storage_key: resource.storage_key,
            display_name: resource.display_name,
            mime_type: resource.mime_type,
            size_bytes: resource.size_bytes,
            checksum: resource.checksum,
            status: resource.status,
            metadata: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            deleted_at: None,
        };
        tables.resources.push(row.clone());
        Ok(row)
    }

    fn find_resource(&self, scope: TenantScope, id: Uuid) -> StoreResult<Option<Resource>> {
        let tables = self.lock()?;
        Ok(tables
            .resources
            .iter()
            .find(|r| r.id == id && scope.admits(r))
            .cloned())
    }

    fn list_resources(&self, scope: TenantScope) -> StoreResult<Vec<Resource>> {
        let tables = self.lock()?;
        // later inserts win timestamp ties
        let mut rows: Vec<Resource> = tables
            .resources
            .iter()
            .rev()
            .filter(|r| scope.admits(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    fn soft_delete_resource(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let scope = TenantScope::live(tenant_id);
        match tables
            .resources
            .iter_mut()
            .find(|r| r.id == id && scope.admits(r))
        {
            Some(resource) => {
                resource.deleted_at = Some(at);
                resource.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn transition_resource(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        change: StatusChange,
        at: NaiveDateTime,
    ) -> StoreResult<Option<Resource>> {
        let mut tables = self.lock()?;
        let target = change.target();
        let Some(resource) = tables
            .resources
            .iter_mut()
            .find(|r| r.id == id && r.tenant_id == tenant_id)
        else {
            return Ok(None);
        };

        if !target.allowed_predecessors().contains(&resource.status()) {
            return Ok(None);
        }

        resource.status = target.as_str().to_string();
        resource.updated_at = at;
        if let StatusChange::Completed { metadata } = change {
            resource.metadata = Some::<Value>(metadata);
            resource.processed_at = Some(at);
        }
        Ok(Some(resource.clone()))
    }

    fn tenant_usage_bytes(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let tables = self.lock()?;
        let scope = TenantScope::live(tenant_id);
        Ok(tables
            .resources
            .iter()
            .filter(|r| scope.admits(r) && r.status() != ResourceStatus::Failed)
            .map(|r| r.size_bytes)
            .sum())
    }
}

impl JobQueue for MemoryStore {
    fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        run_after: Option<NaiveDateTime>,
    ) -> JobQueueResult<Job> {
        let mut tables = self.lock_queue()?;
        let new_job = new_job(job_type, payload, run_after);
        let now = Utc::now().naive_utc();
        let job = Job {
            id: new_job.id,
            job_type: new_job.job_type,
            payload: new_job.payload,
            status: new_job.status,
            attempts: 0,
            run_after: new_job.run_after,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.push(job.clone());
        Ok(job)
    }

    fn reserve(&self, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
        let mut tables = self.lock_queue()?;
        let now = Utc::now().naive_utc();
        let next = tables
            .jobs
            .iter_mut()
            .filter(|job| {
                job.status == STATUS_QUEUED
                    && job.run_after <= now
                    && job_types.contains(&job.job_type.as_str())
            })
            .min_by_key(|job| job.run_after);

        Ok(next.map(|job| {
            job.status = STATUS_PROCESSING.to_string();
            job.attempts += 1;
            job.updated_at = now;
            job.clone()
        }))
    }

    fn mark_succeeded(&self, job_id: Uuid) -> JobQueueResult<()> {
        self.settle_job(job_id, |job, now| {
            job.status = STATUS_SUCCEEDED.to_string();
            job.last_error = None;
            job.updated_at = now;
        })
    }

    fn retry_after(
        &self,
        job_id: Uuid,
        delay: Duration,
        error_message: &str,
    ) -> JobQueueResult<()> {
        let run_after = next_run_at(delay);
        self.settle_job(job_id, |job, now| {
            job.status = STATUS_QUEUED.to_string();
            job.run_after = run_after;
            job.last_error = Some(error_message.to_string());
            job.updated_at = now;
        })
    }

    fn mark_failed(&self, job_id: Uuid, error_message: &str) -> JobQueueResult<()> {
        self.settle_job(job_id, |job, now| {
            job.status = STATUS_FAILED.to_string();
            job.last_error = Some(error_message.to_string());
            job.updated_at = now;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Visibility;

    fn seed_resource(store: &MemoryStore, tenant_id: Uuid, owner_id: Uuid) -> Resource {
        store
            .insert_resource(NewResource {
                id: Uuid::new_v4(),
                tenant_id,
                owner_id,
                storage_key: "ab".repeat(32),
                display_name: "notes.txt".into(),
                mime_type: "text/plain".into(),
                size_bytes: 10,
                checksum: "00".repeat(32),
                status: ResourceStatus::Pending.as_str().into(),
            })
            .expect("insert resource")
    }

    #[test]
    fn duplicate_tenant_name_conflicts() {
        let store = MemoryStore::new();
        store
            .insert_tenant(NewTenant {
                id: Uuid::new_v4(),
                name: "acme".into(),
            })
            .unwrap();
        let err = store
            .insert_tenant(NewTenant {
                id: Uuid::new_v4(),
                name: "acme".into(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.tenant_count(), 1);
    }

    #[test]
    fn reads_never_cross_tenants() {
        let store = MemoryStore::new();
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let resource = seed_resource(&store, tenant_a, Uuid::new_v4());

        assert!(store
            .find_resource(TenantScope::live(tenant_b), resource.id)
            .unwrap()
            .is_none());
        assert!(store
            .list_resources(TenantScope::live(tenant_b))
            .unwrap()
            .is_empty());
        assert!(!store
            .soft_delete_resource(tenant_b, resource.id, Utc::now().naive_utc())
            .unwrap());
        assert!(store
            .transition_resource(
                tenant_b,
                resource.id,
                StatusChange::Processing,
                Utc::now().naive_utc()
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn visibility_controls_soft_deleted_rows() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let resource = seed_resource(&store, tenant, Uuid::new_v4());

        assert!(store
            .soft_delete_resource(tenant, resource.id, Utc::now().naive_utc())
            .unwrap());
        assert!(!store
            .soft_delete_resource(tenant, resource.id, Utc::now().naive_utc())
            .unwrap());

        assert!(store
            .find_resource(TenantScope::live(tenant), resource.id)
            .unwrap()
            .is_none());
        let hidden = store
            .find_resource(
                TenantScope::new(tenant, Visibility::IncludeDeleted),
                resource.id,
            )
            .unwrap()
            .expect("deleted row still readable when asked for");
        assert!(hidden.is_deleted());
        assert_eq!(hidden.status(), ResourceStatus::Pending);
    }

    #[test]
    fn transitions_are_compare_and_set() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let resource = seed_resource(&store, tenant, Uuid::new_v4());
        let now = Utc::now().naive_utc();

        let completed_early = store
            .transition_resource(
                tenant,
                resource.id,
                StatusChange::Completed {
                    metadata: Value::Null,
                },
                now,
            )
            .unwrap();
        assert!(completed_early.is_none());

        let processing = store
            .transition_resource(tenant, resource.id, StatusChange::Processing, now)
            .unwrap()
            .expect("pending -> processing");
        assert_eq!(processing.status(), ResourceStatus::Processing);

        let done = store
            .transition_resource(
                tenant,
                resource.id,
                StatusChange::Completed {
                    metadata: serde_json::json!({ "type": "generic" }),
                },
                now,
            )
            .unwrap()
            .expect("processing -> completed");
        assert_eq!(done.status(), ResourceStatus::Completed);
        assert_eq!(done.processed_at, Some(now));

        assert!(store
            .transition_resource(tenant, resource.id, StatusChange::Failed, now)
            .unwrap()
            .is_none());
    }

    #[test]
    fn reserve_skips_future_jobs_and_counts_attempts() {
        let store = MemoryStore::new();
        let later = Utc::now().naive_utc() + chrono::Duration::hours(1);
        store.enqueue("a", Value::Null, Some(later)).unwrap();
        let due = store.enqueue("a", Value::Null, None).unwrap();

        let reserved = store.reserve(&["a"]).unwrap().expect("due job");
        assert_eq!(reserved.id, due.id);
        assert_eq!(reserved.attempts, 1);
        assert!(store.reserve(&["a"]).unwrap().is_none());

        store
            .retry_after(due.id, Duration::from_secs(60), "disk busy")
            .unwrap();
        assert!(store.reserve(&["a"]).unwrap().is_none());

        store.expire_backoff();
        let again = store.reserve(&["a"]).unwrap().expect("retried job");
        assert_eq!(again.attempts, 2);
    }
}

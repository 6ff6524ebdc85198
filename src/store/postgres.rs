use std::time::Duration;

use chrono::NaiveDateTime;
use diesel::{
    dsl::sql,
    pg::PgConnection,
    prelude::*,
    r2d2::{ConnectionManager, PooledConnection},
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::BigInt,
};
use serde_json::Value;
use uuid::Uuid;

use super::{StatusChange, Store, StoreError, StoreResult, TenantScope, Visibility};
use crate::{
    db::PgPool,
    jobs::{
        enqueue_job, mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueue,
        JobQueueError, JobQueueResult,
    },
    models::{
        Job, NewResource, NewTenant, NewUser, Resource, ResourceStatus, Tenant, User,
    },
    schema::{resources, tenants, users},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn conn(&self) -> StoreResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| StoreError::Unavailable(format!("database pool error: {err}")))
    }
}

fn conflict_or(err: DieselError, what: &str) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        other => StoreError::Database(other),
    }
}

impl Store for PgStore {
    fn find_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        let mut conn = self.conn()?;
        Ok(tenants::table.find(id).first(&mut conn).optional()?)
    }

    fn find_tenant_by_name(&self, name: &str) -> StoreResult<Option<Tenant>> {
        let mut conn = self.conn()?;
        Ok(tenants::table
            .filter(tenants::name.eq(name))
            .first(&mut conn)
            .optional()?)
    }

    fn insert_tenant(&self, tenant: NewTenant) -> StoreResult<Tenant> {
        let mut conn = self.conn()?;
        diesel::insert_into(tenants::table)
            .values(&tenant)
            .get_result(&mut conn)
            .map_err(|err| conflict_or(err, "tenant"))
    }

    fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table.find(id).first(&mut conn).optional()?)
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::email.eq(email))
            .first(&mut conn)
            .optional()?)
    }

    fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut conn = self.conn()?;
        diesel::insert_into(users::table)
            .values(&user)
            .get_result(&mut conn)
            .map_err(|err| conflict_or(err, "user"))
    }

    fn set_user_active(&self, id: Uuid, active: bool) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(users::table.find(id))
            .set((
                users::active.eq(active),
                users::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .get_result(&mut conn)
            .optional()?)
    }

    fn insert_resource(&self, resource: NewResource) -> StoreResult<Resource> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(resources::table)
            .values(&resource)
            .get_result(&mut conn)?)
    }

    fn find_resource(&self, scope: TenantScope, id: Uuid) -> StoreResult<Option<Resource>> {
        let mut conn = self.conn()?;
        let mut query = resources::table
            .filter(resources::tenant_id.eq(scope.tenant_id()))
            .filter(resources::id.eq(id))
            .into_boxed();
        if scope.visibility() == Visibility::Live {
            query = query.filter(resources::deleted_at.is_null());
        }
        Ok(query.first(&mut conn).optional()?)
    }

    fn list_resources(&self, scope: TenantScope) -> StoreResult<Vec<Resource>> {
        let mut conn = self.conn()?;
        let mut query = resources::table
            .filter(resources::tenant_id.eq(scope.tenant_id()))
            .into_boxed();
        if scope.visibility() == Visibility::Live {
            query = query.filter(resources::deleted_at.is_null());
        }
        Ok(query
            .order((resources::created_at.desc(), resources::id.desc()))
            .load(&mut conn)?)
    }

    fn soft_delete_resource(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let updated = diesel::update(
            resources::table
                .filter(resources::tenant_id.eq(tenant_id))
                .filter(resources::id.eq(id))
                .filter(resources::deleted_at.is_null()),
        )
        .set((
            resources::deleted_at.eq(Some(at)),
            resources::updated_at.eq(at),
        ))
        .execute(&mut conn)?;
        Ok(updated > 0)
    }

    fn transition_resource(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        change: StatusChange,
        at: NaiveDateTime,
    ) -> StoreResult<Option<Resource>> {
        let mut conn = self.conn()?;
        let target = change.target();
        let from: Vec<&'static str> = target
            .allowed_predecessors()
            .iter()
            .map(ResourceStatus::as_str)
            .collect();

        let rows = resources::table
            .filter(resources::tenant_id.eq(tenant_id))
            .filter(resources::id.eq(id))
            .filter(resources::status.eq_any(from));

        let updated = match change {
            StatusChange::Processing | StatusChange::Failed => diesel::update(rows)
                .set((
                    resources::status.eq(target.as_str()),
                    resources::updated_at.eq(at),
                ))
                .get_result::<Resource>(&mut conn)
                .optional()?,
            StatusChange::Completed { metadata } => diesel::update(rows)
                .set((
                    resources::status.eq(target.as_str()),
                    resources::metadata.eq(Some::<Value>(metadata)),
                    resources::processed_at.eq(Some(at)),
                    resources::updated_at.eq(at),
                ))
                .get_result::<Resource>(&mut conn)
                .optional()?,
        };
        Ok(updated)
    }

    fn tenant_usage_bytes(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        let used = resources::table
            .filter(resources::tenant_id.eq(tenant_id))
            .filter(resources::deleted_at.is_null())
            .filter(resources::status.ne(ResourceStatus::Failed.as_str()))
            .select(sql::<BigInt>("COALESCE(SUM(size_bytes), 0)::BIGINT"))
            .get_result::<i64>(&mut conn)?;
        Ok(used)
    }
}

impl PgStore {
    fn queue_conn(&self) -> JobQueueResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| JobQueueError::Unavailable(format!("database pool error: {err}")))
    }
}

impl JobQueue for PgStore {
    fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        run_after: Option<NaiveDateTime>,
    ) -> JobQueueResult<Job> {
        let mut conn = self.queue_conn()?;
        enqueue_job(&mut conn, job_type, payload, run_after)
    }

    fn reserve(&self, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
        let mut conn = self.queue_conn()?;
        reserve_job(&mut conn, job_types)
    }

    fn mark_succeeded(&self, job_id: Uuid) -> JobQueueResult<()> {
        let mut conn = self.queue_conn()?;
        mark_job_succeeded(&mut conn, job_id)
    }

    fn retry_after(
        &self,
        job_id: Uuid,
        delay: Duration,
        error_message: &str,
    ) -> JobQueueResult<()> {
        let mut conn = self.queue_conn()?;
        retry_job_after(&mut conn, job_id, delay, error_message)
    }

    fn mark_failed(&self, job_id: Uuid, error_message: &str) -> JobQueueResult<()> {
        let mut conn = self.queue_conn()?;
        mark_job_failed(&mut conn, job_id, error_message)
    }
}

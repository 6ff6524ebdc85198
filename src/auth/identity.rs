//! Credential checks, registration, and re-validation of principals.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::password::{hash_password, verify_password};
use super::Principal;
use crate::{
    error::{ServiceError, ServiceResult},
    models::{NewTenant, NewUser, Tenant, User},
    store::{Store, StoreError},
};

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_TENANT_NAME_CHARS: usize = 255;

/// Attempts at find-or-create before giving up on a contended tenant name.
const TENANT_CREATE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn Store>,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates an active user in the named organization, creating the organization if needed.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        organization: &str,
    ) -> ServiceResult<(User, Tenant)> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(ServiceError::validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        if self.store.find_user_by_email(&email)?.is_some() {
            return Err(ServiceError::validation("email already registered"));
        }

        let tenant = self.ensure_tenant(organization)?;
        let password_hash = hash_password(password)
            .map_err(|err| ServiceError::FatalProcessing(err.to_string()))?;

        let user = self
            .store
            .insert_user(NewUser {
                id: Uuid::new_v4(),
                tenant_id: tenant.id,
                email,
                password_hash,
                active: true,
            })
            .map_err(|err| match err {
                StoreError::Conflict(_) => ServiceError::validation("email already registered"),
                other => other.into(),
            })?;

        info!(user_id = %user.id, tenant_id = %tenant.id, "registered user");
        Ok((user, tenant))
    }

    pub fn authenticate(&self, email: &str, password: &str) -> ServiceResult<Principal> {
        let invalid = || ServiceError::authentication("invalid credentials");
        let email = email.trim().to_ascii_lowercase();

        let user = self.store.find_user_by_email(&email)?.ok_or_else(invalid)?;
        let verified = verify_password(password, &user.password_hash).unwrap_or_else(|err| {
            warn!(user_id = %user.id, error = %err, "stored password hash is unreadable");
            false
        });
        if !verified {
            return Err(invalid());
        }
        if !user.active {
            return Err(ServiceError::authentication("account is inactive"));
        }

        Ok(Principal::from_user(&user))
    }

    /// Re-derives a principal from a token's claims, rejecting users that have since been
    /// removed, deactivated, or moved to another tenant.
    pub fn principal_for(&self, user_id: Uuid, tenant_id: Uuid) -> ServiceResult<Principal> {
        let user = self
            .store
            .find_user(user_id)?
            .ok_or_else(|| ServiceError::authentication("unknown principal"))?;
        if user.tenant_id != tenant_id {
            return Err(ServiceError::authentication("principal changed tenants"));
        }
        if !user.active {
            return Err(ServiceError::authentication("account is inactive"));
        }
        Ok(Principal::from_user(&user))
    }

    /// Find-or-create by name. A concurrent creator winning the unique constraint is resolved
    /// by re-reading its row.
    pub fn ensure_tenant(&self, name: &str) -> ServiceResult<Tenant> {
        let name = normalize_tenant_name(name)?;

        for _ in 0..TENANT_CREATE_ATTEMPTS {
            if let Some(tenant) = self.store.find_tenant_by_name(&name)? {
                return Ok(tenant);
            }
            match self.store.insert_tenant(NewTenant {
                id: Uuid::new_v4(),
                name: name.clone(),
            }) {
                Ok(tenant) => {
                    info!(tenant_id = %tenant.id, "created tenant");
                    return Ok(tenant);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(ServiceError::TransientIo(format!(
            "could not settle tenant '{name}' after {TENANT_CREATE_ATTEMPTS} attempts"
        )))
    }

    pub fn set_active(&self, user_id: Uuid, active: bool) -> ServiceResult<User> {
        let user = self
            .store
            .set_user_active(user_id, active)?
            .ok_or(ServiceError::NotFound)?;
        info!(user_id = %user.id, active, "changed user activation");
        Ok(user)
    }

    pub fn find_user(&self, user_id: Uuid) -> ServiceResult<Option<User>> {
        Ok(self.store.find_user(user_id)?)
    }

    pub fn find_tenant(&self, tenant_id: Uuid) -> ServiceResult<Option<Tenant>> {
        Ok(self.store.find_tenant(tenant_id)?)
    }
}

fn normalize_email(raw: &str) -> ServiceResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(ServiceError::validation("invalid email address"))
    }
}

fn normalize_tenant_name(raw: &str) -> ServiceResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServiceError::validation("organization name is required"));
    }
    if name.chars().count() > MAX_TENANT_NAME_CHARS {
        return Err(ServiceError::validation("organization name is too long"));
    }
    Ok(name.to_string())
}

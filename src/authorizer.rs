//! Re-verification of job claims before a worker touches anything.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::{IdentityService, Principal},
    claim::JobClaim,
    error::{AuthorizationFailure, ServiceError, ServiceResult},
    models::{Resource, User},
    repository::ResourceRepository,
    store::Visibility,
};

/// A claim that passed every check at execution time. Only [`BackgroundAuthorizer`] builds one.
#[derive(Debug, Clone)]
pub struct AuthorizedJob {
    claim: JobClaim,
    resource: Resource,
    principal: Principal,
}

impl AuthorizedJob {
    pub fn claim(&self) -> &JobClaim {
        &self.claim
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn tenant_id(&self) -> Uuid {
        self.claim.tenant_id
    }
}

#[derive(Clone)]
pub struct BackgroundAuthorizer {
    resources: ResourceRepository,
    identity: IdentityService,
}

/// State observed while checking a claim, recorded with every rejection.
#[derive(Default)]
struct Observed {
    resource_tenant_id: Option<Uuid>,
    resource_owner_id: Option<Uuid>,
    resource_deleted: Option<bool>,
    principal_tenant_id: Option<Uuid>,
    principal_active: Option<bool>,
}

impl Observed {
    fn resource(mut self, resource: &Resource) -> Self {
        self.resource_tenant_id = Some(resource.tenant_id);
        self.resource_owner_id = Some(resource.owner_id);
        self.resource_deleted = Some(resource.is_deleted());
        self
    }

    fn principal(mut self, user: &User) -> Self {
        self.principal_tenant_id = Some(user.tenant_id);
        self.principal_active = Some(user.active);
        self
    }
}

impl BackgroundAuthorizer {
    pub fn new(resources: ResourceRepository, identity: IdentityService) -> Self {
        Self {
            resources,
            identity,
        }
    }

    /// Checks run in a fixed order and stop at the first violation. Violations are
    /// [`ServiceError::Authorization`]; lookups that fail for I/O reasons pass through unchanged.
    pub fn authorize(&self, claim: &JobClaim) -> ServiceResult<AuthorizedJob> {
        let observed = Observed::default();

        let resource = match self.resources.scoped_get_explicit(
            claim.resource_id,
            claim.tenant_id,
            Visibility::IncludeDeleted,
        ) {
            Ok(resource) => resource,
            Err(ServiceError::NotFound) => {
                return Err(reject(claim, AuthorizationFailure::TenantMismatch, &observed))
            }
            Err(err) => return Err(err),
        };
        let observed = observed.resource(&resource);

        let Some(user) = self.identity.find_user(claim.principal_id)? else {
            return Err(reject(
                claim,
                AuthorizationFailure::PrincipalMissing,
                &observed,
            ));
        };
        let observed = observed.principal(&user);

        if user.tenant_id != claim.tenant_id {
            return Err(reject(
                claim,
                AuthorizationFailure::PrincipalMovedTenants,
                &observed,
            ));
        }
        if !user.active {
            return Err(reject(
                claim,
                AuthorizationFailure::PrincipalDeactivated,
                &observed,
            ));
        }
        if resource.is_deleted() {
            return Err(reject(
                claim,
                AuthorizationFailure::ResourceDeleted,
                &observed,
            ));
        }
        if resource.owner_id != claim.principal_id {
            return Err(reject(claim, AuthorizationFailure::OwnerMismatch, &observed));
        }

        debug!(
            resource_id = %claim.resource_id,
            tenant_id = %claim.tenant_id,
            "job claim authorized"
        );

        Ok(AuthorizedJob {
            claim: *claim,
            resource,
            principal: Principal::from_user(&user),
        })
    }
}

fn reject(claim: &JobClaim, failure: AuthorizationFailure, observed: &Observed) -> ServiceError {
    warn!(
        target: "security",
        event = "job_claim_rejected",
        reason = failure.code(),
        claim_resource_id = %claim.resource_id,
        claim_principal_id = %claim.principal_id,
        claim_tenant_id = %claim.tenant_id,
        resource_tenant_id = ?observed.resource_tenant_id,
        resource_owner_id = ?observed.resource_owner_id,
        resource_deleted = ?observed.resource_deleted,
        principal_tenant_id = ?observed.principal_tenant_id,
        principal_active = ?observed.principal_active,
        "background job claim rejected: {failure}"
    );
    ServiceError::Authorization(failure)
}

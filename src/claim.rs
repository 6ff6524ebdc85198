use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Resource;

/// What the request path hands to a worker: ids only, to be re-verified on arrival.
///
/// A claim is not a grant. Holding one says nothing about whether the work is still allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobClaim {
    pub resource_id: Uuid,
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
}

impl JobClaim {
    pub fn for_resource(resource: &Resource) -> Self {
        Self {
            resource_id: resource.id,
            principal_id: resource.owner_id,
            tenant_id: resource.tenant_id,
        }
    }

    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "resource_id": self.resource_id,
            "principal_id": self.principal_id,
            "tenant_id": self.tenant_id,
        })
    }

    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(payload)
    }
}

use std::sync::Arc;

use anyhow::Result;

use crate::{
    auth::{jwt::JwtService, IdentityService},
    authorizer::BackgroundAuthorizer,
    config::AppConfig,
    jobs::JobQueue,
    repository::ResourceRepository,
    storage::TenantStorage,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: IdentityService,
    pub resources: ResourceRepository,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<TenantStorage>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        storage: TenantStorage,
    ) -> Result<Self> {
        let jwt = JwtService::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            identity: IdentityService::new(store.clone()),
            resources: ResourceRepository::new(store),
            queue,
            storage: Arc::new(storage),
            jwt,
        })
    }

    pub fn authorizer(&self) -> BackgroundAuthorizer {
        BackgroundAuthorizer::new(self.resources.clone(), self.identity.clone())
    }
}

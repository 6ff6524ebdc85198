use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use orgfiles::config::{default_extensions, AppConfig};
use orgfiles::models::{Job, Resource};
use orgfiles::routes;
use orgfiles::state::AppState;
use orgfiles::storage::TenantStorage;
use orgfiles::store::{MemoryStore, Store, Visibility};
use orgfiles::{default_handlers, Worker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

#[allow(dead_code)]
pub struct TestUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct FileBody {
    pub id: Uuid,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    pub status: String,
    pub owner_id: Uuid,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub metadata: Option<Value>,
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    router: Router,
    _storage_dir: TempDir,
}

pub fn test_config(storage_root: &Path) -> AppConfig {
    AppConfig {
        database_url: "postgres://unused@localhost/orgfiles".to_string(),
        database_max_pool_size: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cors_allowed_origin: None,
        storage_root: storage_root.to_path_buf(),
        max_upload_bytes: 1024 * 1024,
        allowed_extensions: default_extensions(),
        tenant_quota_bytes: 10 * 1024 * 1024,
        job_max_attempts: 4,
        job_retry_base: Duration::from_secs(60),
        job_retry_max: Duration::from_secs(900),
        worker_poll_interval: Duration::from_millis(10),
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        Lazy::force(&TRACING);

        let storage_dir = tempfile::tempdir().context("failed to create storage dir")?;
        let mut config = test_config(storage_dir.path());
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let storage = TenantStorage::new(storage_dir.path())?;
        let state = AppState::new(config, store.clone(), store.clone(), storage)?;
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            store,
            router,
            _storage_dir: storage_dir,
        })
    }

    #[allow(dead_code)]
    pub fn worker(&self) -> Worker {
        Worker::new(
            Arc::new(self.state.clone()),
            default_handlers(),
            self.state.config.worker_poll_interval,
        )
    }

    #[allow(dead_code)]
    pub async fn run_jobs(&self) -> Result<usize> {
        Ok(self.worker().drain().await?)
    }

    #[allow(dead_code)]
    pub fn jobs(&self) -> Vec<Job> {
        self.store.jobs()
    }

    /// Reads a resource record regardless of deletion, bypassing the HTTP surface.
    #[allow(dead_code)]
    pub fn resource(&self, tenant_id: Uuid, id: Uuid) -> Result<Resource> {
        Ok(self
            .state
            .resources
            .scoped_get_explicit(id, tenant_id, Visibility::IncludeDeleted)?)
    }

    /// Registers, logs in, and returns the new user with their bearer token.
    pub async fn sign_up(&self, email: &str, organization: &str) -> Result<TestUser> {
        #[derive(Serialize)]
        struct RegisterPayload<'a> {
            email: &'a str,
            password: &'a str,
            organization: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/register",
                &RegisterPayload {
                    email,
                    password: PASSWORD,
                    organization,
                },
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "register failed with status {}",
            response.status()
        );

        #[derive(Deserialize)]
        struct Account {
            id: Uuid,
        }
        let account: Account = json_body(response).await?;
        let user = self
            .store
            .find_user(account.id)?
            .ok_or_else(|| anyhow!("registered user {} missing", account.id))?;
        let token = self.login_token(email, PASSWORD).await?;

        Ok(TestUser {
            id: user.id,
            tenant_id: user.tenant_id,
            token,
        })
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        #[derive(Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = json_body(response).await?;
        Ok(parsed.access_token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/files")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }

    /// Uploads and expects `202 Accepted`.
    #[allow(dead_code)]
    pub async fn upload_ok(&self, filename: &str, data: &[u8], token: &str) -> Result<FileBody> {
        let response = self.upload_file(filename, "text/plain", data, token).await?;
        ensure!(
            response.status() == StatusCode::ACCEPTED,
            "upload failed with status {}",
            response.status()
        );
        json_body(response).await
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body<T: for<'de> Deserialize<'de>>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not the expected JSON")
}

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    /// Access token naming the user and the tenant they belonged to at login.
    pub fn generate_token(&self, user_id: Uuid, tenant_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            tid: tenant_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub tid: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_extensions, AppConfig};
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;

    fn config(secret: &str, audience: &str) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/orgfiles".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            jwt_secret: secret.into(),
            jwt_issuer: "orgfiles".into(),
            jwt_audience: audience.into(),
            jwt_expiry_minutes: 5,
            cors_allowed_origin: None,
            storage_root: PathBuf::from("./storage"),
            max_upload_bytes: 1024,
            allowed_extensions: default_extensions(),
            tenant_quota_bytes: 4096,
            job_max_attempts: 4,
            job_retry_base: StdDuration::from_secs(60),
            job_retry_max: StdDuration::from_secs(900),
            worker_poll_interval: StdDuration::from_millis(100),
        }
    }

    #[test]
    fn token_carries_user_and_tenant() {
        let jwt = JwtService::from_config(&config("s3cret", "orgfiles-clients")).unwrap();
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());
        let token = jwt.generate_token(user, tenant).unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.tid, tenant);
    }

    #[test]
    fn tokens_for_another_audience_or_secret_are_rejected() {
        let issuer = JwtService::from_config(&config("s3cret", "orgfiles-clients")).unwrap();
        let token = issuer
            .generate_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        let other_audience = JwtService::from_config(&config("s3cret", "someone-else")).unwrap();
        assert!(other_audience.verify_token(&token).is_err());

        let other_secret = JwtService::from_config(&config("different", "orgfiles-clients")).unwrap();
        assert!(other_secret.verify_token(&token).is_err());
    }
}

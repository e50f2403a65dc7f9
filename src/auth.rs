//! Authentication middleware for API key validation.
//!
//! Every request except `/health` must carry `X-API-Key: <shared secret>`.

use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::env;

#[derive(Clone)]
pub struct AuthConfig {
    pub api_keys: HashSet<String>,
    pub require_auth: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        let mut api_keys = HashSet::new();

        if let Ok(keys_str) = env::var("KNOWBASE_API_KEYS") {
            for key in keys_str.split(',') {
                let key = key.trim();
                if !key.is_empty() {
                    api_keys.insert(key.to_string());
                }
            }
        }

        if let Ok(key) = env::var("KNOWBASE_API_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                api_keys.insert(key.to_string());
            }
        }

        let require_auth = !api_keys.is_empty() || env::var("KNOWBASE_REQUIRE_AUTH").is_ok();

        if require_auth {
            println!("🔐 Authentication enabled ({} API keys configured)", api_keys.len());
        } else {
            println!("⚠️  Authentication disabled (no API keys configured)");
        }

        Self {
            api_keys,
            require_auth,
        }
    }

    pub fn validate_key(&self, key: &str) -> bool {
        if !self.require_auth {
            return true;
        }

        self.api_keys.contains(key)
    }
}

fn extract_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("X-API-Key").and_then(|v| v.to_str().ok())
}

/// `axum::middleware::from_fn_with_state` layer enforcing the API key on every
/// route it is applied to. The router mounts `/health` outside this layer.
pub async fn auth_middleware(
    State(auth_config): State<std::sync::Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = extract_key(request.headers()).unwrap_or("");
    if !auth_config.validate_key(key) {
        return Err(AppError::Auth("missing or invalid X-API-Key".to_string()));
    }
    Ok(next.run(request).await)
}

//! HTTP Basic Authentication for the admin API

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Response, StatusCode},
    middleware::Next,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::identity::constant_time_eq;

/// Admin credentials. Both must be set to enable the middleware; with auth
/// disabled the admin routes are open (dev mode).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    /// Load ADMIN_USERNAME and ADMIN_PASSWORD from the environment
    pub fn from_env() -> Self {
        let username = std::env::var("ADMIN_USERNAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let password = std::env::var("ADMIN_PASSWORD")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if username.is_some() && password.is_some() {
            tracing::info!("Admin authentication enabled");
            Self { username, password }
        } else {
            if username.is_some() || password.is_some() {
                tracing::warn!(
                    "ADMIN_USERNAME and ADMIN_PASSWORD must both be set to enable authentication"
                );
            }
            tracing::warn!("Admin authentication DISABLED - anyone can reach the admin API!");
            Self {
                username: None,
                password: None,
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validate credentials in constant time
    pub fn validate(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => {
                constant_time_eq(u.as_bytes(), username.as_bytes())
                    && constant_time_eq(p.as_bytes(), password.as_bytes())
            }
            _ => true, // auth disabled
        }
    }
}

fn basic_credentials(request: &Request<Body>) -> Option<(String, String)> {
    let auth_str = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = auth_str.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Middleware guarding the admin routes
pub async fn admin_auth_middleware(
    State(auth_config): State<AuthConfig>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    if let Some((username, password)) = basic_credentials(&request) {
        if auth_config.validate(&username, &password) {
            return next.run(request).await;
        }
    }

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"Parlor Admin\"")
        .body(Body::from("Unauthorized"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_disabled_when_incomplete() {
        let config = AuthConfig {
            username: None,
            password: None,
        };
        assert!(!config.is_enabled());
        assert!(config.validate("any", "thing"));

        let config = AuthConfig {
            username: Some("admin".to_string()),
            password: None,
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_auth_config_enabled() {
        let config = AuthConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
        };
        assert!(config.is_enabled());
        assert!(config.validate("admin", "secret"));
        assert!(!config.validate("admin", "wrong"));
        assert!(!config.validate("wrong", "secret"));
        assert!(!config.validate("", ""));
    }

    #[test]
    fn test_basic_credentials_parsing() {
        // "admin:secret"
        let req = Request::builder()
            .uri("/api/export")
            .header(header::AUTHORIZATION, "Basic YWRtaW46c2VjcmV0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            basic_credentials(&req),
            Some(("admin".to_string(), "secret".to_string()))
        );

        let req = Request::builder()
            .uri("/api/export")
            .header(header::AUTHORIZATION, "Bearer whatever")
            .body(Body::empty())
            .unwrap();
        assert!(basic_credentials(&req).is_none());

        let req = Request::builder()
            .uri("/api/export")
            .body(Body::empty())
            .unwrap();
        assert!(basic_credentials(&req).is_none());
    }
}

//! # API-Key Authentication
//!
//! Call-control and forced-termination endpoints require an `x-api-key`
//! header matching one of the configured keys. Health and metrics stay open.

use crate::config::AppConfig;
use crate::error::AppError;
use actix_web::HttpRequest;

/// Verify the request's `x-api-key` header against the configured key list.
pub fn require_api_key(req: &HttpRequest, config: &AppConfig) -> Result<(), AppError> {
    let allowed = config.auth.allowed_api_keys();
    if allowed.is_empty() {
        return Err(AppError::Unauthorized(
            "no API keys configured".to_string(),
        ));
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided.is_empty() || !allowed.iter().any(|k| k == provided) {
        return Err(AppError::Unauthorized(
            "invalid or missing API key".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn config_with_keys(keys: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.api_keys = keys.to_string();
        config
    }

    #[test]
    fn test_valid_key_accepted() {
        let config = config_with_keys("secret-1,secret-2");
        let req = TestRequest::default()
            .insert_header(("x-api-key", "secret-2"))
            .to_http_request();
        assert!(require_api_key(&req, &config).is_ok());
    }

    #[test]
    fn test_missing_or_wrong_key_rejected() {
        let config = config_with_keys("secret-1");

        let req = TestRequest::default().to_http_request();
        assert!(require_api_key(&req, &config).is_err());

        let req = TestRequest::default()
            .insert_header(("x-api-key", "wrong"))
            .to_http_request();
        assert!(require_api_key(&req, &config).is_err());
    }

    #[test]
    fn test_no_configured_keys_rejects_everything() {
        let config = config_with_keys("");
        let req = TestRequest::default()
            .insert_header(("x-api-key", "anything"))
            .to_http_request();
        assert!(require_api_key(&req, &config).is_err());
    }
}

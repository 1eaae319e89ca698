//! Body and path extractors that reject with [`AppError`].
//!
//! axum's own `Json` and `Path` rejections render as plain text; these
//! wrappers route them through the standard error envelope instead.

use axum::extract::{FromRequest, FromRequestParts};

use crate::errors::AppError;

/// JSON request body. Malformed bodies and a missing JSON content type are
/// `VALIDATION_ERROR`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Path parameters. Undecodable segments are `VALIDATION_ERROR`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;

    async fn extract(req: Request<Body>) -> Result<AppJson<Value>, AppError> {
        AppJson::<Value>::from_request(req, &()).await
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_validation_error() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        assert!(matches!(extract(req).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_content_type_is_a_validation_error() {
        let req = Request::builder().body(Body::from("{}")).unwrap();
        assert!(matches!(extract(req).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_json_body_is_extracted() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from(r#"{"uri":"memory://dev"}"#))
            .unwrap();
        let AppJson(body) = extract(req).await.unwrap();
        assert_eq!(body["uri"], "memory://dev");
    }
}

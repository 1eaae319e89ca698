//! Caller identity extraction.
//!
//! The caller names its session with an opaque `X-User-Id` header. The value
//! is not authenticated; it only keys the per-user session state.

use axum::{
    extract::FromRequestParts,
    http::{header::HeaderName, request::Parts},
};

use super::request_id::RequestId;
use crate::errors::AppError;
use crate::models::session::UserId;

/// Header carrying the caller's user id.
pub static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Identity of the caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: UserId,
    pub request_id: Option<RequestId>,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::MissingUserId)?;
        let user = UserId::parse(raw).ok_or(AppError::MissingUserId)?;

        Ok(Caller {
            user,
            request_id: parts.extensions.get::<RequestId>().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<Caller, AppError> {
        let (mut parts, _) = req.into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_extracts_trimmed_user_id() {
        let req = Request::builder()
            .header("x-user-id", "  alice ")
            .body(())
            .unwrap();
        let caller = extract(req).await.unwrap();
        assert_eq!(caller.user.as_str(), "alice");
        assert!(caller.request_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_or_blank_header_is_rejected() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(AppError::MissingUserId)));

        let blank = Request::builder().header("x-user-id", "   ").body(()).unwrap();
        assert!(matches!(extract(blank).await, Err(AppError::MissingUserId)));
    }
}

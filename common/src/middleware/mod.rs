//! Middleware and request extractors shared by all services.

pub mod extract;
pub mod request_id;
pub mod user_id;

// Re-export commonly used types
pub use extract::{AppJson, AppPath};
pub use request_id::{current_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};
pub use user_id::{Caller, USER_ID_HEADER};

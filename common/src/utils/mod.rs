//! Utility functions and helpers.

pub mod name_validator;

// Re-export commonly used types
pub use name_validator::NameValidator;

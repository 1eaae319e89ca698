//! Namespace name validator.
//!
//! Rejects database and collection names the cluster would refuse, before a
//! round trip is spent on them.

use crate::errors::{AppError, AppResult};

/// Validates database and collection names.
pub struct NameValidator;

/// Characters a database name may not contain.
const FORBIDDEN_DATABASE_CHARS: [char; 7] = ['/', '\\', '.', ' ', '"', '$', '\0'];

/// Longest database name accepted by the cluster, in bytes.
const MAX_DATABASE_NAME_LEN: usize = 64;

/// Longest collection name accepted, in bytes.
const MAX_COLLECTION_NAME_LEN: usize = 255;

impl NameValidator {
    /// Validates a database name.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the name is empty, too long or
    /// contains a forbidden character.
    pub fn database(name: &str) -> AppResult<()> {
        if name.is_empty() {
            return Err(AppError::Validation("database name must not be empty".into()));
        }
        if name.len() > MAX_DATABASE_NAME_LEN {
            return Err(AppError::Validation(format!(
                "database name exceeds {MAX_DATABASE_NAME_LEN} bytes"
            )));
        }
        if let Some(c) = name.chars().find(|c| FORBIDDEN_DATABASE_CHARS.contains(c)) {
            return Err(AppError::Validation(format!(
                "database name contains forbidden character {c:?}"
            )));
        }
        Ok(())
    }

    /// Validates a collection name.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the name is empty, too long, contains
    /// `$` or NUL, or uses the reserved `system.` prefix.
    pub fn collection(name: &str) -> AppResult<()> {
        if name.is_empty() {
            return Err(AppError::Validation("collection name must not be empty".into()));
        }
        if name.len() > MAX_COLLECTION_NAME_LEN {
            return Err(AppError::Validation(format!(
                "collection name exceeds {MAX_COLLECTION_NAME_LEN} bytes"
            )));
        }
        if name.contains('$') || name.contains('\0') {
            return Err(AppError::Validation(
                "collection name must not contain '$' or NUL".into(),
            ));
        }
        if name.starts_with("system.") {
            return Err(AppError::Validation(
                "collection names starting with 'system.' are reserved".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_allowed() {
        assert!(NameValidator::database("inventory").is_ok());
        assert!(NameValidator::collection("orders.archive").is_ok());
    }

    #[test]
    fn test_database_forbidden_characters() {
        assert!(NameValidator::database("").is_err());
        assert!(NameValidator::database("a.b").is_err());
        assert!(NameValidator::database("my db").is_err());
        assert!(NameValidator::database(&"d".repeat(65)).is_err());
    }

    #[test]
    fn test_collection_reserved_names() {
        assert!(NameValidator::collection("system.users").is_err());
        assert!(NameValidator::collection("price$").is_err());
        assert!(NameValidator::collection("").is_err());
    }
}

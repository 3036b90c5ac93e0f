//! Identifier allow-list.
//!
//! Table and column names cannot be bound as parameters, so every name
//! that ends up in SQL text goes through [`check_identifier`] first.

/// An identifier that failed the allow-list check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsafe SQL identifier: {0:?}")]
pub struct IdentifierError(pub String);

/// Returns true when `name` is non-empty and made only of ASCII letters,
/// digits, `_` and `.`.
#[must_use]
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Checks `name` against the allow-list, returning it unchanged on success.
///
/// # Errors
///
/// Returns [`IdentifierError`] when the name contains anything else.
pub fn check_identifier(name: &str) -> Result<&str, IdentifierError> {
    if is_safe_identifier(name) {
        Ok(name)
    } else {
        Err(IdentifierError(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_and_qualified_names() {
        assert!(is_safe_identifier("users"));
        assert!(is_safe_identifier("author_id"));
        assert!(is_safe_identifier("posts.title"));
        assert!(is_safe_identifier("Table2"));
    }

    #[test]
    fn test_rejects_injection_attempts() {
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("name; DROP TABLE users"));
        assert!(!is_safe_identifier("a\"b"));
        assert!(!is_safe_identifier("a b"));
        assert!(!is_safe_identifier("id--"));
        assert!(!is_safe_identifier("naïve"));
    }

    #[test]
    fn test_check_identifier_error() {
        assert_eq!(check_identifier("ok_name"), Ok("ok_name"));
        let err = check_identifier("1=1 OR").unwrap_err();
        assert_eq!(err.to_string(), "unsafe SQL identifier: \"1=1 OR\"");
    }
}

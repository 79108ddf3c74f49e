//! Identifier validation and quoting for SQL injection prevention.
//!
//! Table and column names reach the generator from entity metadata, which may
//! be a manually-registered mapping rather than trusted introspection. SQL
//! identifiers cannot be parameterized in prepared statements, so every name
//! is validated against an allow-list and quoted before interpolation.

use crate::error::{BulkError, Result};

/// Maximum identifier length in bytes (PostgreSQL NAMEDATALEN - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier against the allow-list.
///
/// Accepts a leading ASCII letter or underscore followed by ASCII letters,
/// digits, underscores, and dollar signs. Rejects empty names and names
/// longer than 63 bytes.
///
/// # Errors
///
/// Returns `BulkError::Validation` with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BulkError::Validation(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(BulkError::Validation(format!(
            "identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(BulkError::Validation(format!(
            "identifier must start with an ASCII letter or underscore: {:?}",
            name
        )));
    }

    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$')) {
        return Err(BulkError::Validation(format!(
            "identifier contains disallowed character {:?}: {:?}",
            bad, name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier after validating it.
///
/// Wraps in double quotes, doubling any embedded quote.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

//! Field-presence validation helpers.
//!
//! Registration and update operations validate one named field at a time, in
//! a fixed order, short-circuiting on the first failure — the wire contract
//! pins both the `Invalid data: <field> missing` literal and which field is
//! reported first.

use omr_types::Identifier;

use crate::{OmrError, OmrResult};

/// Requires a field to be present and non-blank; returns the trimmed value.
pub(crate) fn require_field<'a>(value: &'a Option<String>, field: &str) -> OmrResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim()),
        _ => Err(OmrError::missing(field)),
    }
}

/// Requires a field holding an entity identifier; validates its shape.
pub(crate) fn require_identifier(value: &Option<String>, field: &str) -> OmrResult<String> {
    let raw = require_field(value, field)?;
    let id = Identifier::new(raw)
        .map_err(|_| OmrError::Validation(format!("Invalid data: invalid {field}")))?;
    Ok(id.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_field_rejects_absent_and_blank() {
        for value in [None, Some(String::new()), Some("   ".into())] {
            let err = require_field(&value, "name").expect_err("should reject");
            assert_eq!(err.to_string(), "Invalid data: name missing");
        }
    }

    #[test]
    fn test_require_field_trims() {
        let value = Some(" org1 ".to_string());
        assert_eq!(require_field(&value, "id").expect("should accept"), "org1");
    }

    #[test]
    fn test_require_identifier_rejects_embedded_whitespace() {
        let value = Some("org one".to_string());
        let err = require_identifier(&value, "id").expect_err("should reject");
        assert_eq!(err.to_string(), "Invalid data: invalid id");
    }
}

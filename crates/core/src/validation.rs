//! Input validation utilities.

use crate::constants::MAX_REFERENCE_CODE_LEN;
use crate::{LabError, LabResult};

/// Validates that an order reference code is safe to use as a storage file name.
///
/// - Rejects empty or whitespace-only strings
/// - Bounds the length
/// - Restricts characters to ASCII alphanumerics, `-` and `_`
pub fn validate_reference_code(code: &str) -> LabResult<()> {
    if code.trim().is_empty() {
        return Err(LabError::InvalidInput(
            "order reference cannot be empty".into(),
        ));
    }

    if code.len() > MAX_REFERENCE_CODE_LEN {
        return Err(LabError::InvalidInput(format!(
            "order reference exceeds maximum length of {} characters",
            MAX_REFERENCE_CODE_LEN
        )));
    }

    let ok = code
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'_'));

    if !ok {
        return Err(LabError::InvalidInput(
            "order reference contains invalid characters (only alphanumeric, '-', '_' allowed)"
                .into(),
        ));
    }

    Ok(())
}

/// Parses operator-entered numeric text. Only finite decimal numbers are accepted.
pub fn parse_number(text: &str) -> Option<f64> {
    let value: f64 = text.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

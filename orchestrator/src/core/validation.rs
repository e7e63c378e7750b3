//! Tolerant parsing of validator model output.
//!
//! Validator models are asked for strict JSON but frequently wrap it in
//! prose. The two-stage parse (strict, then brace-scan) is a deliberate
//! tolerance contract: a parse failure becomes a failed validation verdict,
//! never an error out of the run loop.

use crate::core::types::ValidationResult;

/// Parse raw validator text into a [`ValidationResult`].
///
/// 1. Strict parse of the whole text.
/// 2. Reparse the substring between the first `{` and the last `}`.
/// 3. Synthesize a failed verdict with `next_action = "retry"`.
pub fn parse_validation(raw: &str) -> ValidationResult {
    if let Ok(parsed) = serde_json::from_str::<ValidationResult>(raw) {
        return parsed;
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<ValidationResult>(&raw[start..=end]) {
                return parsed;
            }
        }
    }
    ValidationResult {
        passed: false,
        reason: "validation parsing failed".to_string(),
        next_action: "retry".to_string(),
    }
}

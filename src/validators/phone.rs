//! Russian phone number normalization.

use async_trait::async_trait;
use serde_json::Value;

use super::{PhoneValidator, ValidationOutcome};

/// Accepts `+7…`, `7…`, `8…` (11 digits) and bare 10-digit numbers, and
/// normalizes to `+7XXXXXXXXXX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuPhoneNormalizer;

impl RuPhoneNormalizer {
    pub fn normalize(raw: &str) -> Option<String> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let national = match digits.len() {
            11 if digits.starts_with('7') || digits.starts_with('8') => &digits[1..],
            10 => digits.as_str(),
            _ => return None,
        };
        // National significant numbers never start with 0 or 1.
        if national.starts_with('0') || national.starts_with('1') {
            return None;
        }
        Some(format!("+7{national}"))
    }
}

#[async_trait]
impl PhoneValidator for RuPhoneNormalizer {
    async fn validate(&self, raw: &str) -> ValidationOutcome {
        match Self::normalize(raw) {
            Some(normalized) => {
                tracing::info!(raw = %raw, normalized = %normalized, "Phone normalized");
                ValidationOutcome::Valid {
                    normalized: Value::String(normalized),
                }
            }
            None => {
                tracing::info!(raw = %raw, "Phone rejected");
                ValidationOutcome::invalid("invalid")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_spoken_forms() {
        for raw in ["+7 916 123-45-67", "8 (916) 123 45 67", "79161234567", "9161234567"] {
            assert_eq!(RuPhoneNormalizer::normalize(raw).as_deref(), Some("+79161234567"), "{raw}");
        }
    }

    #[test]
    fn rejects_wrong_length_and_foreign_numbers() {
        for raw in ["", "12345", "+1 212 555 0100", "+44 20 7946 0958", "891612345678", "0161234567"] {
            assert_eq!(RuPhoneNormalizer::normalize(raw), None, "{raw}");
        }
    }

    #[tokio::test]
    async fn validator_reports_reason() {
        let v = RuPhoneNormalizer;
        assert!(v.validate("8 916 123 45 67").await.is_valid());
        assert_eq!(v.validate("nope").await, ValidationOutcome::invalid("invalid"));
    }
}

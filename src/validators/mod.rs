//! External collaborators the dialogue depends on: phone normalization,
//! address geocoding, and committing the finished record.
//!
//! Every collaborator answers with a structured outcome. Transport failures,
//! timeouts and bad input all become [`ValidationOutcome::Invalid`] with a
//! reason; none of them is an error for the call.

pub mod geocoder;
pub mod phone;
pub mod sink;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub use geocoder::NominatimGeocoder;
pub use phone::RuPhoneNormalizer;
pub use sink::{CommandRecordSink, RecordSink};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid { normalized: Value },
    Invalid { reason: String },
}

impl ValidationOutcome {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// JSON returned to the model as the tool result.
    pub fn to_output(&self) -> Value {
        match self {
            Self::Valid { normalized } => json!({ "ok": true, "normalized": normalized }),
            Self::Invalid { reason } => json!({ "ok": false, "reason": reason }),
        }
    }
}

/// Arguments of `validate_address`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AddressQuery {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub house_number: String,
}

impl AddressQuery {
    pub fn is_blank(&self) -> bool {
        self.city.trim().is_empty() && self.street.trim().is_empty() && self.house_number.trim().is_empty()
    }

    pub fn free_text(&self) -> String {
        [&self.city, &self.street, &self.house_number]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
pub trait PhoneValidator: Send + Sync {
    async fn validate(&self, raw: &str) -> ValidationOutcome;
}

#[async_trait]
pub trait AddressValidator: Send + Sync {
    async fn validate(&self, query: &AddressQuery) -> ValidationOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_json_shapes() {
        let ok = ValidationOutcome::Valid {
            normalized: json!("+79161234567"),
        };
        assert_eq!(ok.to_output(), json!({"ok": true, "normalized": "+79161234567"}));
        assert_eq!(
            ValidationOutcome::invalid("not_found").to_output(),
            json!({"ok": false, "reason": "not_found"})
        );
    }

    #[test]
    fn address_query_free_text() {
        let q: AddressQuery =
            serde_json::from_str(r#"{"city": "Москва", "street": " Тверская ", "house_number": "7"}"#).unwrap();
        assert_eq!(q.free_text(), "Москва, Тверская, 7");
        assert!(!q.is_blank());
        assert!(AddressQuery::default().is_blank());
    }
}

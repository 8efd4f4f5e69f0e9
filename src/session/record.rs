//! The client record a finished call produces, and its spoken summary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub house_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apartment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Address {
    /// "city, street, house" with blanks skipped.
    pub fn core(&self) -> String {
        [&self.city, &self.street, &self.house_number]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn extras(&self) -> Vec<String> {
        [
            ("apt", &self.apartment),
            ("entrance", &self.entrance),
            ("floor", &self.floor),
            ("intercom", &self.intercom),
        ]
        .into_iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{label} {v}"))
        })
        .collect()
    }

    pub fn describe(&self) -> String {
        let core = self.core();
        let extras = self.extras();
        if extras.is_empty() {
            core
        } else {
            format!("{core} ({})", extras.join(", "))
        }
    }
}

/// Arguments of `save_client_info`, plus the caller's own number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circumstances: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default)]
    pub phone: String,
    /// Caller id of the inbound leg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone2: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ClientRecord {
    pub fn from_arguments(arguments: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(arguments)
    }

    /// Every known field as one line for the assistant to read back.
    pub fn summary(&self) -> String {
        let optional = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let fields: [(&str, Option<String>); 8] = [
            ("name", Some(self.name.trim().to_string())),
            ("reason", Some(self.direction.trim().to_string())),
            ("details", optional(&self.circumstances)),
            ("brand/model", optional(&self.brand)),
            ("phone", Some(self.phone.trim().to_string())),
            ("address", Some(self.address.describe())),
            ("visit date", optional(&self.date)),
            ("comment", optional(&self.comment)),
        ];
        fields
            .into_iter()
            .filter_map(|(label, value)| value.filter(|v| !v.is_empty()).map(|v| format!("{label}: {v}")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGS: &str = r#"{
        "name": "Ирина",
        "direction": "Холодильники",
        "circumstances": "не морозит",
        "brand": "Atlant XM-4021",
        "phone": "+79161234567",
        "address": {"city": "Москва", "street": "Тверская", "house_number": "7",
                    "apartment": "12", "floor": "3", "intercom": ""},
        "date": "2026-10-20"
    }"#;

    #[test]
    fn parses_model_arguments() {
        let record = ClientRecord::from_arguments(ARGS).unwrap();
        assert_eq!(record.name, "Ирина");
        assert_eq!(record.address.apartment.as_deref(), Some("12"));
        assert_eq!(record.comment, None);
    }

    #[test]
    fn summary_lists_known_fields_only() {
        let record = ClientRecord::from_arguments(ARGS).unwrap();
        let summary = record.summary();
        assert_eq!(
            summary,
            "name: Ирина; reason: Холодильники; details: не морозит; brand/model: Atlant XM-4021; \
             phone: +79161234567; address: Москва, Тверская, 7 (apt 12, floor 3); visit date: 2026-10-20"
        );
    }

    #[test]
    fn missing_fields_default() {
        let record = ClientRecord::from_arguments(r#"{"phone": "8 916"}"#).unwrap();
        assert_eq!(record.summary(), "phone: 8 916");
    }

    #[test]
    fn serialized_record_carries_caller_number() {
        let mut record = ClientRecord::from_arguments(ARGS).unwrap();
        record.phone2 = Some("+74950000000".into());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["phone2"], "+74950000000");
        assert!(json.get("comment").is_none());
    }
}

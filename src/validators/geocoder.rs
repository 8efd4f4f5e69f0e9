//! Address validation against a Nominatim-compatible search API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{AddressQuery, AddressValidator, ValidationOutcome};

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    address: Option<HitAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct HitAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    road: Option<String>,
    pedestrian: Option<String>,
    house_number: Option<String>,
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    url: String,
}

impl NominatimGeocoder {
    pub fn new(url: impl Into<String>, user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn search(&self, query: &AddressQuery) -> Result<ValidationOutcome, reqwest::Error> {
        let q = query.free_text();
        let resp = self
            .client
            .get(&self.url)
            .query(&[("q", q.as_str()), ("format", "json"), ("limit", "1"), ("addressdetails", "1")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(query = %q, status = status.as_u16(), "Geocoder returned an error status");
            return Ok(ValidationOutcome::invalid(format!("http_{}", status.as_u16())));
        }

        let hits: Vec<SearchHit> = resp.json().await?;
        Ok(match hits.into_iter().next() {
            Some(hit) => {
                let normalized = normalize_hit(query, hit);
                tracing::info!(query = %q, found = %normalized["display_name"], "Address resolved");
                ValidationOutcome::Valid { normalized }
            }
            None => {
                tracing::info!(query = %q, "Address not found");
                ValidationOutcome::invalid("not_found")
            }
        })
    }
}

/// Merge the geocoder's components over what the caller said.
fn normalize_hit(query: &AddressQuery, hit: SearchHit) -> Value {
    let addr = hit.address.unwrap_or_default();
    let city = addr
        .city
        .or(addr.town)
        .or(addr.village)
        .unwrap_or_else(|| query.city.trim().to_string());
    let street = addr
        .road
        .or(addr.pedestrian)
        .unwrap_or_else(|| query.street.trim().to_string());
    let house_number = addr
        .house_number
        .unwrap_or_else(|| query.house_number.trim().to_string());

    json!({
        "city": city,
        "street": street,
        "house_number": house_number,
        "latitude": hit.lat.parse::<f64>().ok(),
        "longitude": hit.lon.parse::<f64>().ok(),
        "display_name": hit.display_name,
    })
}

#[async_trait]
impl AddressValidator for NominatimGeocoder {
    async fn validate(&self, query: &AddressQuery) -> ValidationOutcome {
        if query.is_blank() {
            return ValidationOutcome::invalid("empty");
        }
        match self.search(query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(query = %query.free_text(), error = %e, "Geocoder request failed");
                ValidationOutcome::invalid("exception")
            }
        }
    }
}

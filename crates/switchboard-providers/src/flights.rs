//! Flight-search providers.

use std::time::Duration;

use async_trait::async_trait;

use crate::http::{classify_status, classify_transport};
use crate::types::{FailureKind, HealthReport, ProviderResponse, UsageUnits};

#[derive(Debug, Clone)]
pub struct FlightQuery {
    /// IATA codes.
    pub origin: String,
    pub destination: String,
    /// `YYYY-MM-DD`.
    pub departure_date: String,
    pub return_date: Option<String>,
    pub max_results: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FlightOption {
    pub carrier: String,
    pub flight_number: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub stops: u32,
}

#[async_trait]
pub trait FlightProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, query: &FlightQuery) -> ProviderResponse<Vec<FlightOption>>;

    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        let start = std::time::Instant::now();
        match self.ping().await {
            Ok(()) => HealthReport::healthy(start.elapsed().as_millis() as u64),
            Err(detail) => HealthReport::unavailable(detail),
        }
    }
}

// ---------------------------------------------------------------------------
// Amadeus
// ---------------------------------------------------------------------------

/// Amadeus self-service API. The stored credential is `client_id:client_secret`;
/// each call exchanges it for a short-lived bearer token.
pub struct AmadeusFlights {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
}

impl AmadeusFlights {
    pub fn from_credential(client: reqwest::Client, credential: &str) -> Self {
        let (id, secret) = credential.split_once(':').unwrap_or((credential, ""));
        Self {
            client,
            client_id: id.to_string(),
            client_secret: secret.to_string(),
        }
    }

    async fn fetch_token(&self) -> Result<String, ProviderResponse<Vec<FlightOption>>> {
        let response = self
            .client
            .post("https://api.amadeus.com/v1/security/oauth2/token")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .timeout(Duration::from_secs(15))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return Err(ProviderResponse::fail(
                    "amadeus",
                    classify_transport(&e),
                    e.to_string(),
                ))
            }
        };
        if !response.status().is_success() {
            return Err(ProviderResponse::fail(
                "amadeus",
                FailureKind::AuthFailed,
                format!("token exchange failed: {}", response.status()),
            ));
        }
        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return Err(ProviderResponse::fail(
                    "amadeus",
                    FailureKind::UpstreamError,
                    e.to_string(),
                ))
            }
        };
        value["access_token"]
            .as_str()
            .map(|t| t.to_string())
            .ok_or_else(|| {
                ProviderResponse::fail(
                    "amadeus",
                    FailureKind::AuthFailed,
                    "token response missing access_token",
                )
            })
    }
}

#[async_trait]
impl FlightProvider for AmadeusFlights {
    fn name(&self) -> &str {
        "amadeus"
    }

    async fn execute(&self, query: &FlightQuery) -> ProviderResponse<Vec<FlightOption>> {
        let token = match self.fetch_token().await {
            Ok(t) => t,
            Err(fail) => return fail,
        };

        let mut params = vec![
            ("originLocationCode", query.origin.clone()),
            ("destinationLocationCode", query.destination.clone()),
            ("departureDate", query.departure_date.clone()),
            ("adults", "1".to_string()),
            ("max", query.max_results.to_string()),
        ];
        if let Some(ret) = &query.return_date {
            params.push(("returnDate", ret.clone()));
        }

        let response = match self
            .client
            .get("https://api.amadeus.com/v2/shopping/flight-offers")
            .bearer_auth(&token)
            .query(&params)
            .timeout(query.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ProviderResponse::fail(self.name(), classify_transport(&e), e.to_string())
            }
        };
        if !response.status().is_success() {
            let kind = classify_status(response.status());
            let detail = response.text().await.unwrap_or_default();
            return ProviderResponse::fail(self.name(), kind, detail);
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ProviderResponse::fail(self.name(), FailureKind::UpstreamError, e.to_string())
            }
        };

        let options = value["data"]
            .as_array()
            .map(|offers| {
                offers
                    .iter()
                    .take(query.max_results)
                    .filter_map(parse_amadeus_offer)
                    .collect()
            })
            .unwrap_or_default();

        ProviderResponse::ok(
            self.name(),
            options,
            Some(UsageUnits {
                prompt_units: 1,
                completion_units: 0,
            }),
        )
    }
}

fn parse_amadeus_offer(offer: &serde_json::Value) -> Option<FlightOption> {
    let itinerary = offer["itineraries"].as_array()?.first()?;
    let segments = itinerary["segments"].as_array()?;
    let first = segments.first()?;
    let last = segments.last()?;

    Some(FlightOption {
        carrier: first["carrierCode"].as_str().unwrap_or_default().to_string(),
        flight_number: format!(
            "{}{}",
            first["carrierCode"].as_str().unwrap_or_default(),
            first["number"].as_str().unwrap_or_default()
        ),
        departure_time: first["departure"]["at"].as_str().unwrap_or_default().to_string(),
        arrival_time: last["arrival"]["at"].as_str().unwrap_or_default().to_string(),
        price: offer["price"]["total"]
            .as_str()
            .and_then(|p| p.parse().ok()),
        currency: offer["price"]["currency"].as_str().map(|c| c.to_string()),
        stops: segments.len().saturating_sub(1) as u32,
    })
}

// ---------------------------------------------------------------------------
// Google Flights (via SerpAPI engine)
// ---------------------------------------------------------------------------

pub struct GoogleFlights {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleFlights {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl FlightProvider for GoogleFlights {
    fn name(&self) -> &str {
        "google_flights"
    }

    async fn execute(&self, query: &FlightQuery) -> ProviderResponse<Vec<FlightOption>> {
        let mut params = vec![
            ("engine", "google_flights".to_string()),
            ("departure_id", query.origin.clone()),
            ("arrival_id", query.destination.clone()),
            ("outbound_date", query.departure_date.clone()),
            ("api_key", self.api_key.clone()),
        ];
        match &query.return_date {
            Some(ret) => params.push(("return_date", ret.clone())),
            None => params.push(("type", "2".to_string())),
        }

        let response = match self
            .client
            .get("https://serpapi.com/search")
            .query(&params)
            .timeout(query.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ProviderResponse::fail(self.name(), classify_transport(&e), e.to_string())
            }
        };
        if !response.status().is_success() {
            let kind = classify_status(response.status());
            let detail = response.text().await.unwrap_or_default();
            return ProviderResponse::fail(self.name(), kind, detail);
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ProviderResponse::fail(self.name(), FailureKind::UpstreamError, e.to_string())
            }
        };

        let mut options: Vec<FlightOption> = Vec::new();
        for key in ["best_flights", "other_flights"] {
            if let Some(groups) = value[key].as_array() {
                for group in groups {
                    if options.len() >= query.max_results {
                        break;
                    }
                    if let Some(option) = parse_google_group(group) {
                        options.push(option);
                    }
                }
            }
        }

        ProviderResponse::ok(
            self.name(),
            options,
            Some(UsageUnits {
                prompt_units: 1,
                completion_units: 0,
            }),
        )
    }
}

fn parse_google_group(group: &serde_json::Value) -> Option<FlightOption> {
    let flights = group["flights"].as_array()?;
    let first = flights.first()?;
    let last = flights.last()?;

    Some(FlightOption {
        carrier: first["airline"].as_str().unwrap_or_default().to_string(),
        flight_number: first["flight_number"].as_str().unwrap_or_default().to_string(),
        departure_time: first["departure_airport"]["time"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        arrival_time: last["arrival_airport"]["time"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        price: group["price"].as_f64(),
        currency: Some("USD".to_string()),
        stops: flights.len().saturating_sub(1) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amadeus_credential_splits_id_and_secret() {
        let p = AmadeusFlights::from_credential(crate::http::shared_client(), "id123:sec456");
        assert_eq!(p.client_id, "id123");
        assert_eq!(p.client_secret, "sec456");
    }

    #[test]
    fn parses_amadeus_offer_shape() {
        let offer = serde_json::json!({
            "itineraries": [{
                "segments": [
                    {"carrierCode": "LA", "number": "8084",
                     "departure": {"at": "2026-02-14T08:00"},
                     "arrival": {"at": "2026-02-14T12:00"}},
                    {"carrierCode": "LA", "number": "100",
                     "departure": {"at": "2026-02-14T14:00"},
                     "arrival": {"at": "2026-02-14T18:00"}}
                ]
            }],
            "price": {"total": "512.30", "currency": "USD"}
        });
        let parsed = parse_amadeus_offer(&offer).unwrap();
        assert_eq!(parsed.flight_number, "LA8084");
        assert_eq!(parsed.stops, 1);
        assert_eq!(parsed.price, Some(512.30));
    }
}

//! Flight-search skill backed by the flight provider registry.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use switchboard_providers::flights::FlightQuery;
use switchboard_providers::llm::ToolSchema;

use crate::error::{Result, SkillError};
use crate::skill::{Skill, SkillContext, SkillToolResult};

pub struct FlightSearchSkill {
    /// Registry name of the provider to use ("amadeus", "google_flights").
    pub provider: String,
}

impl FlightSearchSkill {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl Default for FlightSearchSkill {
    fn default() -> Self {
        Self::new("amadeus")
    }
}

#[async_trait]
impl Skill for FlightSearchSkill {
    fn skill_type(&self) -> &'static str {
        "flight_search"
    }

    fn tool_definitions(&self) -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: "search_flights".to_string(),
            description: "Search flight options between two airports".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "origin": { "type": "string", "description": "Origin IATA code" },
                    "destination": { "type": "string", "description": "Destination IATA code" },
                    "departure_date": { "type": "string", "description": "YYYY-MM-DD" },
                    "return_date": { "type": "string", "description": "YYYY-MM-DD, optional" }
                },
                "required": ["origin", "destination", "departure_date"]
            }),
        }]
    }

    async fn execute_tool(
        &self,
        ctx: &SkillContext,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<SkillToolResult> {
        if tool_name != "search_flights" {
            return Err(SkillError::NoToolSupport(tool_name.to_string()));
        }
        let origin = arguments["origin"].as_str().unwrap_or_default();
        let destination = arguments["destination"].as_str().unwrap_or_default();
        let departure_date = arguments["departure_date"].as_str().unwrap_or_default();
        if origin.is_empty() || destination.is_empty() || departure_date.is_empty() {
            return Err(SkillError::ToolFailed(
                tool_name.to_string(),
                "origin, destination, and departure_date are required".to_string(),
            ));
        }

        let provider = ctx
            .flights
            .get(&self.provider, &ctx.credentials, &ctx.tenant)
            .map_err(|e| SkillError::ToolFailed(tool_name.to_string(), e.to_string()))?;

        let query = FlightQuery {
            origin: origin.to_uppercase(),
            destination: destination.to_uppercase(),
            departure_date: departure_date.to_string(),
            return_date: arguments["return_date"].as_str().map(String::from),
            max_results: 5,
            timeout: std::time::Duration::from_secs(30),
        };
        let response = provider.execute(&query).await;
        if !response.success {
            let detail = response
                .error
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(SkillError::ToolFailed(tool_name.to_string(), detail));
        }

        let options = response.payload.unwrap_or_default();
        info!(provider = %self.provider, options = options.len(), "flight search complete");

        let mut output = format!(
            "Flights {} → {} on {}:\n",
            query.origin, query.destination, query.departure_date
        );
        if options.is_empty() {
            output.push_str("(no flights found)\n");
        }
        for option in &options {
            let price = match (&option.price, &option.currency) {
                (Some(p), Some(c)) => format!("{} {:.2}", c, p),
                (Some(p), None) => format!("{:.2}", p),
                _ => "price unavailable".to_string(),
            };
            output.push_str(&format!(
                "- {} {} — dep {} arr {} — {} stop(s) — {}\n",
                option.carrier,
                option.flight_number,
                option.departure_time,
                option.arrival_time,
                option.stops,
                price
            ));
        }

        Ok(SkillToolResult {
            output,
            media_paths: Vec::new(),
        })
    }
}

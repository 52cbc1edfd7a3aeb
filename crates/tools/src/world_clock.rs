//! Local time anywhere, using Open-Meteo to find the place's time zone.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::datetime::format_spoken;
use crate::weather::{FORECAST_URL, GEOCODING_URL};
use crate::{http_client, required_str};

pub struct WorldClockTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WorldClockTool {
    pub fn new() -> Self {
        Self::with_endpoints(GEOCODING_URL, FORECAST_URL)
    }

    pub fn with_endpoints(geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
        }
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "get_time_in_location".into(),
            reason: reason.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ToolError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.failed(format!("time zone lookup failed: {e}")))?;
        if !response.status().is_success() {
            return Err(self.failed(format!("time zone service returned {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| self.failed(format!("unexpected time zone response: {e}")))
    }
}

impl Default for WorldClockTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WorldClockTool {
    fn name(&self) -> &str {
        "get_time_in_location"
    }

    fn description(&self) -> &str {
        "Get the current local time at a location, e.g. 'New York, USA'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City and optionally country"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let location = required_str(&arguments, "location")?;

        let geo: GeocodingResponse = self
            .get_json(&self.geocoding_url, &[("name", location.to_string()), ("count", "1".into())])
            .await?;
        let place = geo
            .results
            .into_iter()
            .next()
            .ok_or_else(|| self.failed(format!("Timezone for '{location}' not found.")))?;

        // The forecast endpoint reports the zone's current UTC offset.
        let zone: ZoneResponse = self
            .get_json(
                &self.forecast_url,
                &[
                    ("latitude", place.latitude.to_string()),
                    ("longitude", place.longitude.to_string()),
                    ("timezone", "auto".into()),
                ],
            )
            .await?;
        debug!(location, timezone = %zone.timezone, offset = zone.utc_offset_seconds, "Resolved time zone");

        local_time(Utc::now(), &zone).ok_or_else(|| self.failed("Time zone offset out of range."))
    }
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeoPlace>,
}

#[derive(Debug, Deserialize)]
struct GeoPlace {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ZoneResponse {
    timezone: String,
    utc_offset_seconds: i32,
}

fn local_time(now: DateTime<Utc>, zone: &ZoneResponse) -> Option<String> {
    let offset = FixedOffset::east_opt(zone.utc_offset_seconds)?;
    Some(format!("{} ({})", format_spoken(&now.with_timezone(&offset)), zone.timezone))
}

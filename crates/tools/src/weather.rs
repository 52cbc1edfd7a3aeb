//! Weather tool backed by the free Open-Meteo APIs.
//!
//! Resolves a place name with the geocoding API, then reads either the
//! current conditions or the daily forecast for a given date.

use async_trait::async_trait;
use chrono::NaiveDate;
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{http_client, optional_str, required_str};

pub(crate) const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub(crate) const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

pub struct WeatherTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherTool {
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
            tool_name: "get_weather".into(),
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
            .map_err(|e| self.failed(format!("weather service unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(self.failed(format!("weather service returned {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| self.failed(format!("unexpected weather service response: {e}")))
    }

    async fn geocode(&self, location: &str) -> Result<Place, ToolError> {
        let resp: GeocodingResponse = self
            .get_json(&self.geocoding_url, &[("name", location.to_string()), ("count", "1".into())])
            .await?;
        resp.results
            .into_iter()
            .next()
            .ok_or_else(|| self.failed(format!("Location '{location}' not found.")))
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location, or the forecast for a specific date."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City and optionally country, e.g. 'Paris, France'"
                },
                "date": {
                    "type": "string",
                    "description": "Forecast date in YYYY-MM-DD format; omit for current conditions"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let location = required_str(&arguments, "location")?;
        let date = optional_str(&arguments, "date")
            .map(parse_date)
            .transpose()?;

        let place = self.geocode(location).await?;
        debug!(location, lat = place.latitude, lon = place.longitude, "Resolved weather location");

        let coords = [
            ("latitude", place.latitude.to_string()),
            ("longitude", place.longitude.to_string()),
        ];

        match date {
            None => {
                let mut query = coords.to_vec();
                query.push(("current_weather", "true".into()));
                let resp: CurrentResponse = self.get_json(&self.forecast_url, &query).await?;
                let current = resp
                    .current_weather
                    .ok_or_else(|| self.failed("No current weather in response."))?;
                Ok(format_current(&place, &current))
            }
            Some(date) => {
                let day = date.format("%Y-%m-%d").to_string();
                let mut query = coords.to_vec();
                query.extend([
                    (
                        "daily",
                        "temperature_2m_max,temperature_2m_min,precipitation_sum,weathercode".into(),
                    ),
                    ("start_date", day.clone()),
                    ("end_date", day.clone()),
                    ("timezone", "auto".into()),
                ]);
                let resp: ForecastResponse = self.get_json(&self.forecast_url, &query).await?;
                let daily = resp.daily.ok_or_else(|| self.failed("Forecast data missing."))?;
                format_forecast(&place, &day, &daily).ok_or_else(|| self.failed("Forecast data missing."))
            }
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ToolError::InvalidArguments("Date must be in YYYY-MM-DD format".into()))
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
}

impl Place {
    fn display_name(&self) -> String {
        match &self.country {
            Some(country) => format!("{}, {country}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current_weather: Option<CurrentWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    #[serde(default)]
    windspeed: Option<f64>,
    #[serde(default)]
    weathercode: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    daily: Option<DailyForecast>,
}

#[derive(Debug, Default, Deserialize)]
struct DailyForecast {
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    weathercode: Vec<Option<u16>>,
}

fn format_current(place: &Place, current: &CurrentWeather) -> String {
    let conditions = current.weathercode.map(describe_code).unwrap_or("Unknown conditions");
    let wind = current
        .windspeed
        .map(|w| format!(", wind {w} km/h"))
        .unwrap_or_default();
    format!(
        "Current weather in {}: {conditions}, {}°C{wind}",
        place.display_name(),
        current.temperature
    )
}

fn format_forecast(place: &Place, day: &str, daily: &DailyForecast) -> Option<String> {
    let first = |v: &[Option<f64>]| v.first().copied().flatten();
    let max = first(&daily.temperature_2m_max)?;
    let min = first(&daily.temperature_2m_min)?;
    let conditions = daily
        .weathercode
        .first()
        .copied()
        .flatten()
        .map(describe_code)
        .unwrap_or("Unknown conditions");
    let precipitation = first(&daily.precipitation_sum)
        .map(|p| format!(", {p}mm precipitation"))
        .unwrap_or_default();
    Some(format!(
        "Forecast for {} on {day}: {conditions}, max {max}°C, min {min}°C{precipitation}",
        place.display_name()
    ))
}

/// Describe a WMO weather interpretation code.
pub fn describe_code(code: u16) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown conditions",
    }
}

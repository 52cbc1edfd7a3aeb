//! Facts about the user that hold for one turn, such as where they are.
//!
//! They reach the model as an extra line of the system prompt and are never
//! stored in the transcript.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude")]
    pub lon: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnContext {
    /// Place name as reported by the client, e.g. "Berlin, Germany"
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
}

impl TurnContext {
    /// Record newly reported facts; anything not reported keeps its value.
    pub fn update(&mut self, location: Option<String>, coordinates: Option<Coordinates>) {
        if let Some(location) = location.filter(|l| !l.trim().is_empty()) {
            self.location = Some(location);
        }
        if coordinates.is_some() {
            self.coordinates = coordinates;
        }
    }

    /// The system prompt line for this context, if there is anything to say.
    pub fn prompt_line(&self) -> Option<String> {
        let location = self.location.as_deref().map(str::trim).filter(|l| !l.is_empty());
        match (location, self.coordinates) {
            (Some(place), Some(c)) => Some(format!(
                "The user is currently in {place} (latitude {}, longitude {}).",
                c.lat, c.lon
            )),
            (Some(place), None) => Some(format!("The user is currently in {place}.")),
            (None, Some(c)) => Some(format!(
                "The user is currently at latitude {}, longitude {}.",
                c.lat, c.lon
            )),
            (None, None) => None,
        }
    }
}

//! Clock tool: the server's local date and time.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde_json::{Map, Value};

pub struct CurrentDateTimeTool;

#[async_trait]
impl Tool for CurrentDateTimeTool {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current local date and time, e.g. 'Sunday, April 27, 2025 at 03:14 PM'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<String, ToolError> {
        Ok(format_spoken(&Local::now()))
    }
}

/// Format a timestamp the way it reads aloud.
pub fn format_spoken<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%A, %B %d, %Y at %I:%M %p").to_string()
}

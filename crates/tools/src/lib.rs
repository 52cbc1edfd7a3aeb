//! Built-in tool implementations for Jarvis.
//!
//! Tools give the assistant a way to act: do math, read clocks here and
//! abroad, check the weather, convert money and look things up on Wikipedia.

pub mod calculator;
pub mod currency;
pub mod datetime;
pub mod magic;
pub mod weather;
pub mod wikipedia;
pub mod world_clock;

use jarvis_config::ToolsConfig;
use jarvis_core::error::ToolError;
use jarvis_core::tool::ToolRegistry;
use serde_json::{Map, Value};

/// Create the tool registry enabled by `[tools]`.
///
/// Registration order is fixed so the advertised schema list is stable.
pub fn default_registry(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    if config.calculator {
        registry.register(Box::new(calculator::CalculatorTool))?;
    }
    if config.datetime {
        registry.register(Box::new(datetime::CurrentDateTimeTool))?;
    }
    if config.world_clock {
        registry.register(Box::new(world_clock::WorldClockTool::new()))?;
    }
    if config.weather {
        registry.register(Box::new(weather::WeatherTool::new()))?;
    }
    if config.wikipedia {
        registry.register(Box::new(wikipedia::WikipediaTool::new()))?;
    }
    if config.currency {
        registry.register(Box::new(currency::CurrencyTool::new()))?;
    }
    if config.magic_function {
        registry.register(Box::new(magic::MagicFunctionTool))?;
    }
    Ok(registry)
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// Read an optional string argument; empty strings count as absent.
pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Shared HTTP client for tools that call public APIs.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .user_agent(concat!("jarvis/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

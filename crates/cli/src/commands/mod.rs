pub mod chat;
pub mod config_cmd;
pub mod serve;
pub mod sessions;
pub mod tools;

use jarvis_config::AppConfig;
use std::path::Path;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_with_overrides(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

/// Shorten `text` to at most `max` characters for one-line display.
pub fn one_line(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut short: String = flat.chars().take(max.saturating_sub(1)).collect();
    short.push('…');
    short
}

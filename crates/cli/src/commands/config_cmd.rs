//! `jarvis config` — Configuration management.

use jarvis_config::AppConfig;
use std::path::{Path, PathBuf};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path)
}

/// Print the active configuration with secrets masked.
pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    redact_secrets(&mut config);
    println!("# {}", resolve(config_path).display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}

/// Write the starter config. Refuses to overwrite unless `force` is set.
pub fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = resolve(config_path);
    write_starter(&path, force)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn write_starter(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(())
}

fn redact_secrets(config: &mut AppConfig) {
    for key in [
        &mut config.llm.api_key,
        &mut config.voice.asr.api_key,
        &mut config.voice.tts.api_key,
    ] {
        if key.is_some() {
            *key = Some("[REDACTED]".into());
        }
    }
}

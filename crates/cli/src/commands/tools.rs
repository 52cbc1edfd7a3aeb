//! `jarvis tools` — List enabled tools.

use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let registry = jarvis_tools::default_registry(&config.tools)?;

    if registry.is_empty() {
        println!("No tools enabled. Turn some on under [tools] in the config.");
        return Ok(());
    }

    println!("{} tool(s) enabled:", registry.len());
    for def in registry.definitions() {
        println!();
        println!("  {}", def.name);
        println!("    {}", def.description);
        let schema = serde_json::to_string_pretty(&def.parameters)?;
        for line in schema.lines() {
            println!("    {line}");
        }
    }

    Ok(())
}

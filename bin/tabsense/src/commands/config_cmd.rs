use std::io::Write;

use tabsense_core::Config;

use super::config_path;
use crate::ConfigCommands;

pub fn run(command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => show(),
        ConfigCommands::Get { key } => get(&key),
        ConfigCommands::Set { key, value } => set(&key, &value),
        ConfigCommands::Reset { force } => reset(force),
    }
}

fn show() -> anyhow::Result<()> {
    let config = Config::load_or_default(&config_path())?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn get(key: &str) -> anyhow::Result<()> {
    let config = Config::load_or_default(&config_path())?;
    let value = serde_json::to_value(&config)?;
    let mut cursor = &value;
    for part in key.split('.') {
        cursor = cursor
            .get(part)
            .ok_or_else(|| anyhow::anyhow!("unknown config key: {}", key))?;
    }
    println!("{}", serde_json::to_string_pretty(cursor)?);
    Ok(())
}

fn set(key: &str, raw: &str) -> anyhow::Result<()> {
    let config = Config::load_or_default(&config_path())?;
    let mut value = serde_json::to_value(&config)?;

    // Auto-detect JSON types; fall back to a plain string.
    let new_value: serde_json::Value =
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

    let parts: Vec<&str> = key.split('.').collect();
    let mut cursor = &mut value;
    for part in &parts[..parts.len() - 1] {
        cursor = cursor
            .get_mut(*part)
            .ok_or_else(|| anyhow::anyhow!("unknown config key: {}", key))?;
    }
    let last = parts.last().expect("key is non-empty");
    match cursor.as_object_mut() {
        Some(obj) if obj.contains_key(*last) => {
            obj.insert(last.to_string(), new_value);
        }
        _ => anyhow::bail!("unknown config key: {}", key),
    }

    let config: Config = serde_json::from_value(value)
        .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e))?;
    config.save(&config_path())?;
    println!("Set {} in {}", key, config_path().display());
    Ok(())
}

fn reset(force: bool) -> anyhow::Result<()> {
    if !force {
        print!("Reset configuration to defaults? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }
    Config::default().save(&config_path())?;
    println!("Configuration reset to defaults.");
    Ok(())
}

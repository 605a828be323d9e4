//! `lorekeep config`: Configuration management commands.

use lorekeep_config::{AppConfig, DomainFile};
use std::path::{Path, PathBuf};

use super::load_config;

const REDACTED: &str = "[REDACTED]";

pub fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set LOREKEEP_API_KEY or OPENROUTER_API_KEY)".to_string());
    }
    if config.pipeline.enrichment && config.pipeline.search_model.trim().is_empty() {
        warnings.push("Enrichment is on but pipeline.search_model is empty".to_string());
    }
    match &config.domain_file {
        None => warnings.push("No domain_file set; `chat` will need --domain".to_string()),
        Some(file) => {
            if let Err(e) = DomainFile::load(Path::new(file)) {
                warnings.push(format!("Domain file: {e}"));
            }
        }
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Provider:    {}", config.default_provider);
    println!("   Model:       {}", config.default_model);
    println!(
        "   Embeddings:  {}",
        if config.embedding.enabled { config.embedding.model.as_str() } else { "off" }
    );
    println!("   Enrichment:  {}", if config.pipeline.enrichment { "on" } else { "off" });
    Ok(())
}

pub fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(path: Option<&Path>) {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_path);
    println!("{}", config_path.display());
}

fn default_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Replace every API key with a marker.
fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_config::ProviderConfig;

    #[test]
    fn config_path_is_valid() {
        assert!(default_path().to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn show_never_prints_keys() {
        let mut config = AppConfig {
            api_key: Some("sk-top".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-openai".into()),
                ..ProviderConfig::default()
            },
        );

        let printed = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!printed.contains("sk-top"));
        assert!(!printed.contains("sk-openai"));
        assert!(printed.contains(REDACTED));
    }
}

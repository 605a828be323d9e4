//! Configuration loading, validation, and management for lorekeep.
//!
//! Loads configuration from `~/.lorekeep/config.toml` with environment
//! variable overrides. Validates all settings at startup. The domain
//! (categories and persona voice) lives in a separate TOML file referenced by
//! `domain_file`.

use lorekeep_core::schema::{Category, DomainSchema, EvolutionMode, PersonaSchema, PersonaVoice, UNCATEGORIZED};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lorekeep/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Path to the domain file (categories + persona)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_file: Option<String>,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retry policy for transient backend failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Turn pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Schema evolution thresholds
    #[serde(default)]
    pub evolution: EvolutionConfig,

    /// Web search cache
    #[serde(default)]
    pub search_cache: SearchCacheConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2048
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("domain_file", &self.domain_file)
            .field("providers", &self.providers)
            .field("embedding", &self.embedding)
            .field("retry", &self.retry)
            .field("pipeline", &self.pipeline)
            .field("evolution", &self.evolution)
            .field("search_cache", &self.search_cache)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Disable to run without context retrieval or vector clustering
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Provider used for embeddings (defaults to `default_provider`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_true() -> bool {
    true
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimensions() -> usize {
    768
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum related entries pulled into the context summary
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Similarity below this is treated as unrelated
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,

    /// Whole-run timeout; 0 disables it
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Verify factual claims of saved entries against web search
    #[serde(default)]
    pub enrichment: bool,

    /// Search-grounded model used for claim verification
    #[serde(default = "default_search_model")]
    pub search_model: String,
}

fn default_context_limit() -> usize {
    5
}
fn default_min_relevance() -> f32 {
    0.5
}
fn default_turn_timeout_secs() -> u64 {
    120
}
fn default_search_model() -> String {
    "perplexity/sonar".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
            min_relevance: default_min_relevance(),
            turn_timeout_secs: default_turn_timeout_secs(),
            enrichment: false,
            search_model: default_search_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Smallest group of uncategorized entries that can become a category
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Pairwise similarity needed to join a cluster
    #[serde(default = "default_cluster_similarity")]
    pub cluster_similarity: f32,

    /// A field must have been asked this often before its priority is judged
    #[serde(default = "default_stats_min_asked")]
    pub stats_min_asked: u64,

    /// Required fields answered less often than this are proposed optional
    #[serde(default = "default_low_answer_rate")]
    pub low_answer_rate: f64,

    /// Confidence needed to auto-apply a new category
    #[serde(default = "default_auto_apply_threshold")]
    pub auto_apply_threshold: f64,

    /// Entries that must share an undeclared field before it is proposed
    #[serde(default = "default_new_field_min_support")]
    pub new_field_min_support: usize,
}

fn default_min_cluster_size() -> usize {
    3
}
fn default_cluster_similarity() -> f32 {
    0.75
}
fn default_stats_min_asked() -> u64 {
    10
}
fn default_low_answer_rate() -> f64 {
    0.1
}
fn default_auto_apply_threshold() -> f64 {
    0.7
}
fn default_new_field_min_support() -> usize {
    3
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            cluster_similarity: default_cluster_similarity(),
            stats_min_asked: default_stats_min_asked(),
            low_answer_rate: default_low_answer_rate(),
            auto_apply_threshold: default_auto_apply_threshold(),
            new_field_min_support: default_new_field_min_support(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCacheConfig {
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_ttl_days() -> i64 {
    7
}

impl Default for SearchCacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lorekeep/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `LOREKEEP_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("LOREKEEP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("LOREKEEP_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("LOREKEEP_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lorekeep")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimensions must be > 0".into(),
            ));
        }

        let unit_range = [
            ("pipeline.min_relevance", self.pipeline.min_relevance as f64),
            ("evolution.cluster_similarity", self.evolution.cluster_similarity as f64),
            ("evolution.low_answer_rate", self.evolution.low_answer_rate),
            ("evolution.auto_apply_threshold", self.evolution.auto_apply_threshold),
        ];
        for (name, value) in unit_range {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if self.evolution.min_cluster_size < 2 {
            return Err(ConfigError::ValidationError(
                "evolution.min_cluster_size must be at least 2".into(),
            ));
        }

        if self.search_cache.ttl_days <= 0 {
            return Err(ConfigError::ValidationError(
                "search_cache.ttl_days must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            domain_file: None,
            providers: HashMap::new(),
            embedding: EmbeddingConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            evolution: EvolutionConfig::default(),
            search_cache: SearchCacheConfig::default(),
        }
    }
}

/// The domain file: categories plus the persona voice.
///
/// ```toml
/// name = "village-chronicle"
/// evolution_mode = "suggest"
///
/// [persona]
/// name = "Chronicler"
/// tonality = "warm"
///
/// [[categories]]
/// id = "history"
/// label = "History"
/// requiredFields = ["period", "sources"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainFile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub evolution_mode: EvolutionMode,

    #[serde(default)]
    pub persona: PersonaVoice,

    #[serde(default)]
    pub categories: Vec<Category>,
}

impl DomainFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let domain: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        domain.validate()?;
        Ok(domain)
    }

    /// Category ids must be unique, non-empty and not the uncategorized
    /// sentinel; a field cannot be both required and optional.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::ValidationError(
                "domain must define at least one category".into(),
            ));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.id.trim().is_empty() {
                return Err(ConfigError::ValidationError("category id must not be empty".into()));
            }
            if category.id == UNCATEGORIZED {
                return Err(ConfigError::ValidationError(format!(
                    "'{UNCATEGORIZED}' is reserved"
                )));
            }
            if !seen.insert(category.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate category id '{}'",
                    category.id
                )));
            }
            if let Some(field) = category
                .required_fields
                .iter()
                .find(|f| category.optional_fields.contains(f))
            {
                return Err(ConfigError::ValidationError(format!(
                    "field '{field}' of '{}' is both required and optional",
                    category.id
                )));
            }
        }

        if self.persona.max_follow_up_questions == 0 {
            return Err(ConfigError::ValidationError(
                "persona.maxFollowUpQuestions must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Build the initial (version 1, active) domain and persona schemas.
    pub fn into_schemas(self) -> (DomainSchema, PersonaSchema) {
        let mut domain = DomainSchema::new(&self.name, self.categories)
            .with_evolution_mode(self.evolution_mode);
        domain.description = self.description;
        let persona = PersonaSchema::new(&self.name, self.persona);
        (domain, persona)
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for lorekeep_core::Error {
    fn from(e: ConfigError) -> Self {
        lorekeep_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOMAIN: &str = r#"
name = "village-chronicle"
evolution_mode = "auto"

[persona]
name = "Chronicler"
tonality = "warm"
maxFollowUpQuestions = 3

[[categories]]
id = "history"
label = "History"
requiredFields = ["period", "sources"]
optionalFields = ["architect"]

[[categories]]
id = "crafts"
label = "Crafts"
"#;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.search_cache.ttl_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.evolution.min_cluster_size, config.evolution.min_cluster_size);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = AppConfig::default();
        config.evolution.auto_apply_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auto_apply_threshold"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_provider, "openrouter");
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_model = \"gpt-4o\"\n[pipeline]\nmin_relevance = 0.6").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert!((config.pipeline.min_relevance - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.pipeline.context_limit, 5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn domain_file_parses_and_builds_schemas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOMAIN.as_bytes()).unwrap();
        let domain = DomainFile::load(file.path()).unwrap();
        assert_eq!(domain.categories.len(), 2);
        assert_eq!(domain.persona.max_follow_up_questions, 3);

        let (schema, persona) = domain.into_schemas();
        assert_eq!(schema.evolution_mode, EvolutionMode::Auto);
        assert!(schema.is_active);
        assert_eq!(
            schema.category("history").unwrap().required_fields,
            vec!["period".to_string(), "sources".to_string()]
        );
        assert_eq!(persona.voice.name, "Chronicler");
    }

    #[test]
    fn domain_rejects_reserved_and_duplicate_ids() {
        let reserved: DomainFile = toml::from_str(
            "name = \"d\"\n[[categories]]\nid = \"_uncategorized\"\nlabel = \"x\"",
        )
        .unwrap();
        assert!(reserved.validate().is_err());

        let dup: DomainFile = toml::from_str(
            "name = \"d\"\n[[categories]]\nid = \"a\"\nlabel = \"A\"\n[[categories]]\nid = \"a\"\nlabel = \"B\"",
        )
        .unwrap();
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn domain_rejects_field_in_both_lists() {
        let domain: DomainFile = toml::from_str(
            "name = \"d\"\n[[categories]]\nid = \"a\"\nlabel = \"A\"\nrequiredFields = [\"x\"]\noptionalFields = [\"x\"]",
        )
        .unwrap();
        assert!(domain.validate().is_err());
    }
}

//! Domain and persona schemas.
//!
//! A domain schema lists the categories knowledge is filed under, and for
//! each category which structured fields are required or optional. Schemas
//! are versioned: every change writes a new version and activates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel category id for input matching no known category.
pub const UNCATEGORIZED: &str = "_uncategorized";

/// True for the uncategorized sentinel.
pub fn is_uncategorized(category_id: &str) -> bool {
    category_id == UNCATEGORIZED
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// A named subdivision of the domain with its structured fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub optional_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcategories: Vec<Subcategory>,
}

impl Category {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            subcategories: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_optional(mut self, fields: &[&str]) -> Self {
        self.optional_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Whether `field` is declared, required or optional.
    pub fn declares(&self, field: &str) -> bool {
        self.required_fields.iter().any(|f| f == field)
            || self.optional_fields.iter().any(|f| f == field)
    }

    pub fn is_required(&self, field: &str) -> bool {
        self.required_fields.iter().any(|f| f == field)
    }
}

/// Whether a field must be filled for an entry to be complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRequirement {
    Required,
    Optional,
}

/// How the schema may change over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionMode {
    /// Never analyzed, never changed.
    Fixed,
    /// Proposals are created and wait for human review.
    #[default]
    Suggest,
    /// Eligible proposals are applied without review.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSchema {
    pub id: String,
    pub name: String,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub evolution_mode: EvolutionMode,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn first_version() -> u32 {
    1
}

impl DomainSchema {
    pub fn new(name: impl Into<String>, categories: Vec<Category>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            version: 1,
            description: String::new(),
            categories,
            evolution_mode: EvolutionMode::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_evolution_mode(mut self, mode: EvolutionMode) -> Self {
        self.evolution_mode = mode;
        self
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn category_mut(&mut self, id: &str) -> Option<&mut Category> {
        self.categories.iter_mut().find(|c| c.id == id)
    }

    /// A copy of this schema as the next version: fresh id, inactive.
    pub fn next_version(&self) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: self.version + 1,
            is_active: false,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// How formally the persona addresses the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formality {
    Formal,
    #[default]
    Neutral,
    Casual,
}

/// Voice parameters for the persona responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaVoice {
    #[serde(default = "default_persona_name")]
    pub name: String,
    #[serde(default = "default_tonality")]
    pub tonality: String,
    #[serde(default)]
    pub formality: Formality,
    #[serde(default = "default_language")]
    pub language: String,
    /// How the user is addressed (e.g. "du", "Sie", first name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_form: Option<String>,
    #[serde(default = "default_max_follow_up_questions")]
    pub max_follow_up_questions: usize,
    #[serde(default)]
    pub storytelling: bool,
}

fn default_persona_name() -> String {
    "Chronicler".into()
}
fn default_tonality() -> String {
    "warm and curious".into()
}
fn default_language() -> String {
    "en".into()
}
fn default_max_follow_up_questions() -> usize {
    2
}

impl Default for PersonaVoice {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            tonality: default_tonality(),
            formality: Formality::default(),
            language: default_language(),
            address_form: None,
            max_follow_up_questions: default_max_follow_up_questions(),
            storytelling: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSchema {
    pub id: String,
    pub name: String,
    #[serde(default = "first_version")]
    pub version: u32,
    pub voice: PersonaVoice,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PersonaSchema {
    pub fn new(name: impl Into<String>, voice: PersonaVoice) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            version: 1,
            voice,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

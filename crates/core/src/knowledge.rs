//! Knowledge entries: the structured unit distilled from conversation turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a knowledge entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Draft,
    Confirmed,
    Migrated,
}

/// Open questions still attached to an incomplete entry.
///
/// Its presence on an entry means "still incomplete".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    pub gaps: Vec<String>,
    pub suggested_questions: Vec<String>,
}

/// Outcome of checking a claim against web search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Verified,
    Contradicted,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedClaim {
    pub claim: String,
    pub status: ClaimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    pub claims: Vec<VerifiedClaim>,
    pub enriched_at: DateTime<Utc>,
}

impl Enrichment {
    pub fn contradicted(&self) -> impl Iterator<Item = &VerifiedClaim> {
        self.claims.iter().filter(|c| c.status == ClaimStatus::Contradicted)
    }

    pub fn verified_count(&self) -> usize {
        self.claims.iter().filter(|c| c.status == ClaimStatus::Verified).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub category_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<String>,
    pub title: String,
    pub content: String,
    /// Where the entry came from (e.g. "conversation").
    pub source: String,
    #[serde(default)]
    pub structured_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUp>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_category_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<String>,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_schema_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
}

impl KnowledgeEntry {
    /// A fresh draft with a new id and both timestamps set to now.
    pub fn draft(category_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category_id: category_id.into(),
            subcategory_id: None,
            title: title.into(),
            content: content.into(),
            source: "conversation".into(),
            structured_data: serde_json::Map::new(),
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            follow_up: None,
            created_at: now,
            updated_at: now,
            session_id: None,
            turn_id: None,
            confidence: None,
            suggested_category_label: None,
            topic_keywords: None,
            raw_input: None,
            status: EntryStatus::Draft,
            migrated_from: None,
            migrated_at: None,
            domain_schema_id: None,
            embedding: None,
            embedding_model: None,
            embedding_generated_at: None,
            enrichment: None,
        }
    }

    /// Whether a structured field holds a non-null, non-empty value.
    pub fn has_field(&self, field: &str) -> bool {
        match self.structured_data.get(field) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }

    /// Text used for embedding: title, content and tags.
    pub fn embedding_text(&self) -> String {
        if self.tags.is_empty() {
            format!("{}. {}", self.title, self.content)
        } else {
            format!("{}. {} ({})", self.title, self.content, self.tags.join(", "))
        }
    }
}

/// Partial update applied by `KnowledgeRepository::update`.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub category_id: Option<String>,
    pub domain_schema_id: Option<String>,
    pub status: Option<EntryStatus>,
    pub migrated_from: Option<String>,
    pub migrated_at: Option<DateTime<Utc>>,
    pub turn_id: Option<String>,
    pub embedding: Option<(Vec<f32>, String)>,
    pub enrichment: Option<Enrichment>,
}

impl EntryPatch {
    /// Apply the set fields to `entry`, bumping `updated_at`.
    pub fn apply_to(self, entry: &mut KnowledgeEntry) {
        if let Some(category_id) = self.category_id {
            entry.category_id = category_id;
        }
        if let Some(domain_schema_id) = self.domain_schema_id {
            entry.domain_schema_id = Some(domain_schema_id);
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(from) = self.migrated_from {
            entry.migrated_from = Some(from);
        }
        if let Some(at) = self.migrated_at {
            entry.migrated_at = Some(at);
        }
        if let Some(turn_id) = self.turn_id {
            entry.turn_id = Some(turn_id);
        }
        if let Some((vector, model)) = self.embedding {
            entry.embedding = Some(vector);
            entry.embedding_model = Some(model);
            entry.embedding_generated_at = Some(Utc::now());
        }
        if let Some(enrichment) = self.enrichment {
            entry.enrichment = Some(enrichment);
        }
        entry.updated_at = Utc::now();
    }
}

/// A similarity-search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn has_field_ignores_empty_values() {
        let mut entry = KnowledgeEntry::draft("history", "Church", "Built 1732");
        entry.structured_data.insert("period".into(), json!("18th century"));
        entry.structured_data.insert("sources".into(), json!(""));
        entry.structured_data.insert("architect".into(), serde_json::Value::Null);
        assert!(entry.has_field("period"));
        assert!(!entry.has_field("sources"));
        assert!(!entry.has_field("architect"));
        assert!(!entry.has_field("missing"));
    }

    #[test]
    fn follow_up_omitted_when_absent() {
        let entry = KnowledgeEntry::draft("history", "Church", "Built 1732");
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("followUp").is_none());
        assert_eq!(json["categoryId"], "history");
        assert_eq!(json["status"], "draft");
    }

    #[test]
    fn patch_sets_migration_fields() {
        let mut entry = KnowledgeEntry::draft("_uncategorized", "Mill", "Water mill");
        EntryPatch {
            category_id: Some("crafts".into()),
            status: Some(EntryStatus::Migrated),
            migrated_from: Some("_uncategorized".into()),
            migrated_at: Some(Utc::now()),
            ..EntryPatch::default()
        }
        .apply_to(&mut entry);
        assert_eq!(entry.category_id, "crafts");
        assert_eq!(entry.status, EntryStatus::Migrated);
        assert_eq!(entry.migrated_from.as_deref(), Some("_uncategorized"));
    }

    #[test]
    fn enrichment_counts() {
        let enrichment = Enrichment {
            claims: vec![
                VerifiedClaim { claim: "a".into(), status: ClaimStatus::Verified, evidence: None, source_urls: vec![] },
                VerifiedClaim { claim: "b".into(), status: ClaimStatus::Contradicted, evidence: Some("no".into()), source_urls: vec![] },
            ],
            enriched_at: Utc::now(),
        };
        assert_eq!(enrichment.verified_count(), 1);
        assert_eq!(enrichment.contradicted().count(), 1);
    }
}

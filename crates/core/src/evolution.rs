//! Schema evolution proposals and per-field answer statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::FieldRequirement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    NewCategory,
    NewField,
    ChangePriority,
}

/// `pending → approved | rejected` by review, `pending → auto_applied` by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    AutoApplied,
}

impl ProposalStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategorySpec {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub optional_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFieldSpec {
    pub category_id: String,
    pub field_name: String,
    pub field_type: FieldRequirement,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePrioritySpec {
    pub category_id: String,
    pub field_name: String,
    pub from: FieldRequirement,
    pub to: FieldRequirement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub entry_count: usize,
    pub average_similarity: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionProposal {
    pub id: String,
    pub domain_schema_id: String,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub description: String,
    /// Ids of the knowledge entries supporting the proposal.
    #[serde(default)]
    pub evidence: Vec<String>,
    pub confidence: f64,
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_category: Option<NewCategorySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_field: Option<NewFieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_priority: Option<ChangePrioritySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_metadata: Option<ClusterMetadata>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl EvolutionProposal {
    fn pending(
        domain_schema_id: &str,
        proposal_type: ProposalType,
        description: String,
        evidence: Vec<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain_schema_id: domain_schema_id.to_string(),
            proposal_type,
            description,
            evidence,
            confidence,
            status: ProposalStatus::Pending,
            new_category: None,
            new_field: None,
            change_priority: None,
            cluster_metadata: None,
            created_at: Utc::now(),
            reviewed_at: None,
            applied_at: None,
        }
    }

    pub fn new_category(
        domain_schema_id: &str,
        spec: NewCategorySpec,
        evidence: Vec<String>,
        confidence: f64,
        cluster: ClusterMetadata,
    ) -> Self {
        let description = format!(
            "New category '{}' from {} uncategorized entries",
            spec.label, cluster.entry_count
        );
        let mut proposal =
            Self::pending(domain_schema_id, ProposalType::NewCategory, description, evidence, confidence);
        proposal.new_category = Some(spec);
        proposal.cluster_metadata = Some(cluster);
        proposal
    }

    pub fn new_field(
        domain_schema_id: &str,
        spec: NewFieldSpec,
        evidence: Vec<String>,
        confidence: f64,
    ) -> Self {
        let description = format!(
            "New {:?} field '{}' on category '{}'",
            spec.field_type, spec.field_name, spec.category_id
        )
        .to_lowercase();
        let mut proposal =
            Self::pending(domain_schema_id, ProposalType::NewField, description, evidence, confidence);
        proposal.new_field = Some(spec);
        proposal
    }

    pub fn change_priority(
        domain_schema_id: &str,
        spec: ChangePrioritySpec,
        answer_rate: f64,
        times_asked: u64,
    ) -> Self {
        let description = format!(
            "Make '{}' on '{}' optional: answered {:.0}% of {} times asked",
            spec.field_name,
            spec.category_id,
            answer_rate * 100.0,
            times_asked
        );
        let mut proposal = Self::pending(
            domain_schema_id,
            ProposalType::ChangePriority,
            description,
            Vec::new(),
            1.0 - answer_rate,
        );
        proposal.change_priority = Some(spec);
        proposal
    }
}

/// How often a field was asked about and how often it got answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldStats {
    pub domain_schema_id: String,
    pub category_id: String,
    pub field_name: String,
    pub times_asked: u64,
    pub times_answered: u64,
    pub last_updated_at: DateTime<Utc>,
}

impl FieldStats {
    pub fn new(domain_schema_id: &str, category_id: &str, field_name: &str) -> Self {
        Self {
            domain_schema_id: domain_schema_id.into(),
            category_id: category_id.into(),
            field_name: field_name.into(),
            times_asked: 0,
            times_answered: 0,
            last_updated_at: Utc::now(),
        }
    }

    /// `times_answered / times_asked`, or exactly 0 when never asked.
    pub fn answer_rate(&self) -> f64 {
        if self.times_asked == 0 {
            0.0
        } else {
            self.times_answered as f64 / self.times_asked as f64
        }
    }
}

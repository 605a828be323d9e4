//! The schema evolution engine.
//!
//! [`EvolutionEngine::analyze`] looks at what the conversations have
//! produced so far and proposes schema changes:
//!
//! - **new categories** from clusters of uncategorized captures
//! - **new fields** from structured-data keys a category keeps collecting
//! - **lower priorities** for required fields that almost never get answered
//!
//! Every proposal is persisted as `pending`. In `auto` mode the eligible
//! ones are applied right away; otherwise they wait for [`approve`] or
//! [`reject`]. Applying a proposal always writes a new domain-schema
//! version and activates it in one step.
//!
//! [`approve`]: EvolutionEngine::approve
//! [`reject`]: EvolutionEngine::reject

use chrono::Utc;
use lorekeep_agent::{ModelOutput, StructuredLlm};
use lorekeep_core::error::Error;
use lorekeep_core::evolution::{
    ChangePrioritySpec, ClusterMetadata, EvolutionProposal, NewCategorySpec, NewFieldSpec, ProposalStatus,
    ProposalType,
};
use lorekeep_core::knowledge::{EntryPatch, EntryStatus};
use lorekeep_core::schema::{Category, DomainSchema, EvolutionMode, FieldRequirement, UNCATEGORIZED};
use lorekeep_core::store::{FieldStatsRepository, KnowledgeRepository, ProposalRepository, SchemaRepository};
use lorekeep_store::Repositories;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::patterns::{Cluster, ClusterSettings, detect_patterns, slugify, undeclared_fields};

/// Clustering is a heuristic; its proposals never claim more than this.
pub const CONFIDENCE_CAP: f64 = 0.95;

/// Share of a category's entries at which a new field is proposed required.
pub const REQUIRED_SHARE: f64 = 0.9;

/// Sample notes shown to the model when naming a cluster.
const NAMING_SAMPLES: usize = 5;

#[derive(Debug, Clone)]
pub struct EvolutionSettings {
    pub clusters: ClusterSettings,
    pub stats_min_asked: u64,
    pub low_answer_rate: f64,
    pub auto_apply_threshold: f64,
    pub new_field_min_support: usize,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            clusters: ClusterSettings::default(),
            stats_min_asked: 10,
            low_answer_rate: 0.1,
            auto_apply_threshold: 0.7,
            new_field_min_support: 3,
        }
    }
}

impl From<&lorekeep_config::EvolutionConfig> for EvolutionSettings {
    fn from(config: &lorekeep_config::EvolutionConfig) -> Self {
        Self {
            clusters: ClusterSettings::from(config),
            stats_min_asked: config.stats_min_asked,
            low_answer_rate: config.low_answer_rate,
            auto_apply_threshold: config.auto_apply_threshold,
            new_field_min_support: config.new_field_min_support,
        }
    }
}

/// The model's name for a cluster.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterNaming {
    label: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required_fields: Vec<String>,
    #[serde(default)]
    optional_fields: Vec<String>,
}

impl ModelOutput for ClusterNaming {
    const NAME: &'static str = "cluster_naming";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "label": {"type": "string"},
                "description": {"type": "string"},
                "requiredFields": {"type": "array", "items": {"type": "string"}},
                "optionalFields": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["label", "description"]
        })
    }

    fn issues(&self) -> Vec<String> {
        if slugify(&self.label).is_empty() {
            vec![format!("label: {:?} has no letters or digits", self.label)]
        } else {
            Vec::new()
        }
    }
}

pub struct EvolutionEngine {
    llm: StructuredLlm,
    schemas: Arc<dyn SchemaRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    field_stats: Arc<dyn FieldStatsRepository>,
    proposals: Arc<dyn ProposalRepository>,
    settings: EvolutionSettings,
}

impl EvolutionEngine {
    pub fn new(llm: StructuredLlm, repos: &Repositories, settings: EvolutionSettings) -> Self {
        Self {
            llm,
            schemas: repos.schemas.clone(),
            knowledge: repos.knowledge.clone(),
            field_stats: repos.field_stats.clone(),
            proposals: repos.proposals.clone(),
            settings,
        }
    }

    /// Analyze the active version of `domain_name` and persist the proposals.
    ///
    /// Returns the proposals created by this run, with their final status.
    /// A domain in `fixed` mode yields nothing and costs no model calls.
    pub async fn analyze(&self, domain_name: &str) -> Result<Vec<EvolutionProposal>, Error> {
        let domain = self.active_domain(domain_name).await?;
        if domain.evolution_mode == EvolutionMode::Fixed {
            debug!(domain = %domain.name, "Evolution mode is fixed, skipping analysis");
            return Ok(Vec::new());
        }

        let pending = self.pending(domain_name).await?;
        let mut found = self.category_proposals(&domain, &pending).await?;
        found.extend(self.field_proposals(&domain, &pending).await?);
        found.extend(self.priority_proposals(&domain, &pending).await?);

        let mut created = Vec::with_capacity(found.len());
        for proposal in found {
            created.push(self.proposals.create(proposal).await?);
        }
        info!(
            domain = %domain.name,
            schema_id = %domain.id,
            proposals = created.len(),
            mode = ?domain.evolution_mode,
            "Evolution analysis finished"
        );

        if domain.evolution_mode == EvolutionMode::Auto {
            for proposal in created.iter_mut().filter(|p| self.auto_applicable(p)) {
                self.auto_apply(proposal).await;
            }
        }
        Ok(created)
    }

    /// Apply a pending proposal and return the new active domain-schema id.
    pub async fn approve(&self, proposal_id: &str) -> Result<String, Error> {
        let mut proposal = self.reviewable(proposal_id).await?;
        let schema_id = self.apply(&proposal).await?;

        let now = Utc::now();
        proposal.status = ProposalStatus::Approved;
        proposal.reviewed_at = Some(now);
        proposal.applied_at = Some(now);
        self.proposals.update(proposal).await?;
        info!(proposal_id, schema_id = %schema_id, "Proposal approved");
        Ok(schema_id)
    }

    pub async fn reject(&self, proposal_id: &str) -> Result<EvolutionProposal, Error> {
        let mut proposal = self.reviewable(proposal_id).await?;
        proposal.status = ProposalStatus::Rejected;
        proposal.reviewed_at = Some(Utc::now());
        let proposal = self.proposals.update(proposal).await?;
        info!(proposal_id, "Proposal rejected");
        Ok(proposal)
    }

    /// Proposals against any version of `domain_name`, oldest first.
    pub async fn list_proposals(
        &self,
        domain_name: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<EvolutionProposal>, Error> {
        let mut all = Vec::new();
        for version in self.schemas.list_domain_versions(domain_name).await? {
            all.extend(self.proposals.list_by_domain(&version.id, status).await?);
        }
        all.sort_by_key(|p| p.created_at);
        Ok(all)
    }

    async fn active_domain(&self, name: &str) -> Result<DomainSchema, Error> {
        self.schemas
            .get_active_domain(name)
            .await?
            .ok_or_else(|| Error::not_found("domain", name))
    }

    async fn pending(&self, domain_name: &str) -> Result<Vec<EvolutionProposal>, Error> {
        self.list_proposals(domain_name, Some(ProposalStatus::Pending)).await
    }

    async fn reviewable(&self, proposal_id: &str) -> Result<EvolutionProposal, Error> {
        let proposal = self
            .proposals
            .get(proposal_id)
            .await?
            .ok_or_else(|| Error::not_found("proposal", proposal_id))?;
        if !proposal.status.is_pending() {
            return Err(Error::InvalidState(format!(
                "proposal {proposal_id} was already reviewed ({:?})",
                proposal.status
            )));
        }
        Ok(proposal)
    }

    // ── Analysis ─────────────────────────────────────────────────────────

    async fn category_proposals(
        &self,
        domain: &DomainSchema,
        pending: &[EvolutionProposal],
    ) -> Result<Vec<EvolutionProposal>, Error> {
        let claimed: HashSet<&str> = pending
            .iter()
            .filter(|p| p.proposal_type == ProposalType::NewCategory)
            .flat_map(|p| p.evidence.iter().map(String::as_str))
            .collect();
        let candidates: Vec<_> = self
            .knowledge
            .get_uncategorized_by_domain(&domain.id)
            .await?
            .into_iter()
            .filter(|e| !claimed.contains(e.id.as_str()))
            .collect();
        if candidates.len() < self.settings.clusters.min_size {
            debug!(uncategorized = candidates.len(), "Too few uncategorized entries to cluster");
            return Ok(Vec::new());
        }

        let clusters = detect_patterns(&candidates, &self.settings.clusters);
        debug!(uncategorized = candidates.len(), clusters = clusters.len(), "Clustered uncategorized entries");

        let mut proposals = Vec::new();
        for cluster in clusters {
            let naming: ClusterNaming = self
                .llm
                .invoke(&naming_prompt(domain), &describe_cluster(&cluster))
                .await?;
            let id = slugify(&naming.label);
            if domain.category(&id).is_some() {
                debug!(category = %id, "Cluster matches an existing category, skipping");
                continue;
            }

            let required_fields = field_names(&naming.required_fields, &[]);
            let optional_fields = field_names(&naming.optional_fields, &required_fields);
            let spec = NewCategorySpec {
                id,
                label: naming.label.trim().to_string(),
                description: naming.description.trim().to_string(),
                required_fields,
                optional_fields,
            };
            let metadata = ClusterMetadata {
                entry_count: cluster.entries.len(),
                average_similarity: cluster.average_similarity,
                keywords: cluster.keywords.clone(),
            };
            let confidence = cluster.average_similarity.clamp(0.0, CONFIDENCE_CAP);
            proposals.push(EvolutionProposal::new_category(
                &domain.id,
                spec,
                cluster.entry_ids(),
                confidence,
                metadata,
            ));
        }
        Ok(proposals)
    }

    async fn field_proposals(
        &self,
        domain: &DomainSchema,
        pending: &[EvolutionProposal],
    ) -> Result<Vec<EvolutionProposal>, Error> {
        let mut proposals = Vec::new();
        for category in &domain.categories {
            let entries = self.knowledge.get_by_category(&domain.id, &category.id).await?;
            for candidate in undeclared_fields(category, &entries, self.settings.new_field_min_support) {
                let already = pending.iter().filter_map(|p| p.new_field.as_ref()).any(|f| {
                    f.category_id == candidate.category_id && f.field_name == candidate.field_name
                });
                if already {
                    continue;
                }

                let field_type = if candidate.share >= REQUIRED_SHARE {
                    FieldRequirement::Required
                } else {
                    FieldRequirement::Optional
                };
                let spec = NewFieldSpec {
                    description: format!(
                        "Filled in {} of {} '{}' entries",
                        candidate.evidence.len(),
                        entries.len(),
                        category.label
                    ),
                    category_id: candidate.category_id,
                    field_name: candidate.field_name,
                    field_type,
                };
                proposals.push(EvolutionProposal::new_field(
                    &domain.id,
                    spec,
                    candidate.evidence,
                    candidate.share,
                ));
            }
        }
        Ok(proposals)
    }

    /// Stats are kept per schema version, so totals span every version.
    async fn priority_proposals(
        &self,
        domain: &DomainSchema,
        pending: &[EvolutionProposal],
    ) -> Result<Vec<EvolutionProposal>, Error> {
        let mut totals: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
        for version in self.schemas.list_domain_versions(&domain.name).await? {
            for stats in self.field_stats.list_by_domain(&version.id).await? {
                let slot = totals.entry((stats.category_id, stats.field_name)).or_default();
                slot.0 += stats.times_asked;
                slot.1 += stats.times_answered;
            }
        }

        let mut proposals = Vec::new();
        for ((category_id, field_name), (asked, answered)) in totals {
            let required = domain
                .category(&category_id)
                .is_some_and(|c| c.is_required(&field_name));
            if !required || asked < self.settings.stats_min_asked {
                continue;
            }
            let rate = answered as f64 / asked as f64;
            if rate >= self.settings.low_answer_rate {
                continue;
            }
            let already = pending
                .iter()
                .filter_map(|p| p.change_priority.as_ref())
                .any(|c| c.category_id == category_id && c.field_name == field_name);
            if already {
                continue;
            }

            debug!(category = %category_id, field = %field_name, asked, answered, "Rarely answered required field");
            let spec = ChangePrioritySpec {
                category_id,
                field_name,
                from: FieldRequirement::Required,
                to: FieldRequirement::Optional,
            };
            proposals.push(EvolutionProposal::change_priority(&domain.id, spec, rate, asked));
        }
        Ok(proposals)
    }

    // ── Applying ─────────────────────────────────────────────────────────

    fn auto_applicable(&self, proposal: &EvolutionProposal) -> bool {
        match proposal.proposal_type {
            ProposalType::NewCategory => proposal.confidence >= self.settings.auto_apply_threshold,
            ProposalType::NewField => proposal
                .new_field
                .as_ref()
                .is_some_and(|f| f.field_type == FieldRequirement::Optional),
            ProposalType::ChangePriority => true,
        }
    }

    /// Failures are logged and leave the proposal pending.
    async fn auto_apply(&self, proposal: &mut EvolutionProposal) {
        let schema_id = match self.apply(proposal).await {
            Ok(id) => id,
            Err(e) => {
                warn!(proposal_id = %proposal.id, error = %e, "Auto-apply failed, proposal stays pending");
                return;
            }
        };

        proposal.status = ProposalStatus::AutoApplied;
        proposal.applied_at = Some(Utc::now());
        if let Err(e) = self.proposals.update(proposal.clone()).await {
            warn!(proposal_id = %proposal.id, error = %e, "Applied proposal could not be marked");
            return;
        }
        info!(
            proposal_id = %proposal.id,
            kind = ?proposal.proposal_type,
            schema_id = %schema_id,
            "Proposal auto-applied"
        );
    }

    /// Write the proposal's change as a new active version of its domain.
    async fn apply(&self, proposal: &EvolutionProposal) -> Result<String, Error> {
        let origin = self
            .schemas
            .get_domain(&proposal.domain_schema_id)
            .await?
            .ok_or_else(|| Error::not_found("domain schema", &proposal.domain_schema_id))?;
        let current = self.active_domain(&origin.name).await?;
        let mut next = current.next_version();

        let mut new_category = None;
        match proposal.proposal_type {
            ProposalType::NewCategory => {
                let spec = proposal.new_category.as_ref().ok_or_else(|| incomplete(proposal))?;
                add_category(&mut next, spec)?;
                new_category = Some(spec.id.as_str());
            }
            ProposalType::NewField => {
                let spec = proposal.new_field.as_ref().ok_or_else(|| incomplete(proposal))?;
                add_field(&mut next, spec)?;
            }
            ProposalType::ChangePriority => {
                let spec = proposal.change_priority.as_ref().ok_or_else(|| incomplete(proposal))?;
                change_priority(&mut next, spec)?;
            }
        }

        let saved = self.schemas.save_and_activate_domain(next).await?;
        if let Some(category_id) = new_category {
            self.migrate_evidence(&proposal.evidence, category_id, &saved.id).await?;
        }
        self.rehome_entries(&current, &saved.id).await?;
        Ok(saved.id)
    }

    /// Move a new category's evidence out of the uncategorized pool.
    async fn migrate_evidence(&self, evidence: &[String], category_id: &str, schema_id: &str) -> Result<(), Error> {
        let now = Utc::now();
        let mut migrated = 0usize;
        for entry_id in evidence {
            let patch = EntryPatch {
                category_id: Some(category_id.to_string()),
                domain_schema_id: Some(schema_id.to_string()),
                status: Some(EntryStatus::Migrated),
                migrated_from: Some(UNCATEGORIZED.to_string()),
                migrated_at: Some(now),
                ..EntryPatch::default()
            };
            match self.knowledge.update(entry_id, patch).await? {
                Some(_) => migrated += 1,
                None => warn!(entry_id = %entry_id, "Evidence entry is gone, not migrated"),
            }
        }
        info!(category = %category_id, migrated, "Migrated uncategorized entries");
        Ok(())
    }

    /// Point the previous version's entries at the new one so retrieval,
    /// which is scoped to one schema id, still finds them.
    async fn rehome_entries(&self, previous: &DomainSchema, schema_id: &str) -> Result<(), Error> {
        let mut ids: Vec<String> = Vec::new();
        for category in &previous.categories {
            let entries = self.knowledge.get_by_category(&previous.id, &category.id).await?;
            ids.extend(entries.into_iter().map(|e| e.id));
        }
        let open = self.knowledge.get_uncategorized_by_domain(&previous.id).await?;
        ids.extend(open.into_iter().map(|e| e.id));

        for id in &ids {
            let patch = EntryPatch {
                domain_schema_id: Some(schema_id.to_string()),
                ..EntryPatch::default()
            };
            self.knowledge.update(id, patch).await?;
        }
        debug!(from = %previous.id, to = %schema_id, entries = ids.len(), "Re-homed entries");
        Ok(())
    }
}

fn incomplete(proposal: &EvolutionProposal) -> Error {
    Error::InvalidState(format!(
        "proposal {} has no {:?} payload",
        proposal.id, proposal.proposal_type
    ))
}

fn add_category(schema: &mut DomainSchema, spec: &NewCategorySpec) -> Result<(), Error> {
    if schema.category(&spec.id).is_some() {
        return Err(Error::InvalidState(format!("category '{}' already exists", spec.id)));
    }
    let mut category = Category::new(&spec.id, &spec.label).with_description(&spec.description);
    category.required_fields = spec.required_fields.clone();
    category.optional_fields = spec.optional_fields.clone();
    schema.categories.push(category);
    Ok(())
}

fn add_field(schema: &mut DomainSchema, spec: &NewFieldSpec) -> Result<(), Error> {
    let category = schema
        .category_mut(&spec.category_id)
        .ok_or_else(|| Error::not_found("category", &spec.category_id))?;
    if category.declares(&spec.field_name) {
        return Err(Error::InvalidState(format!(
            "field '{}' already declared on '{}'",
            spec.field_name, spec.category_id
        )));
    }
    match spec.field_type {
        FieldRequirement::Required => category.required_fields.push(spec.field_name.clone()),
        FieldRequirement::Optional => category.optional_fields.push(spec.field_name.clone()),
    }
    Ok(())
}

fn change_priority(schema: &mut DomainSchema, spec: &ChangePrioritySpec) -> Result<(), Error> {
    let category = schema
        .category_mut(&spec.category_id)
        .ok_or_else(|| Error::not_found("category", &spec.category_id))?;
    let current = if category.is_required(&spec.field_name) {
        FieldRequirement::Required
    } else if category.declares(&spec.field_name) {
        FieldRequirement::Optional
    } else {
        return Err(Error::not_found("field", &spec.field_name));
    };
    if current != spec.from {
        return Err(Error::InvalidState(format!(
            "field '{}' on '{}' is {current:?}, expected {:?}",
            spec.field_name, spec.category_id, spec.from
        )));
    }

    category.required_fields.retain(|f| f != &spec.field_name);
    category.optional_fields.retain(|f| f != &spec.field_name);
    match spec.to {
        FieldRequirement::Required => category.required_fields.push(spec.field_name.clone()),
        FieldRequirement::Optional => category.optional_fields.push(spec.field_name.clone()),
    }
    Ok(())
}

/// Snake-case, non-empty, unique and not already in `taken`.
fn field_names(raw: &[String], taken: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.iter().map(|n| slugify(n)) {
        if !name.is_empty() && !names.contains(&name) && !taken.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn naming_prompt(domain: &DomainSchema) -> String {
    let mut prompt = format!(
        "You look at notes collected about {} that fit none of the existing categories, \
         and name the category they would form.\n\nExisting categories:\n",
        domain.name
    );
    for category in &domain.categories {
        let _ = writeln!(prompt, "- {}: {}", category.id, category.label);
    }
    prompt.push_str(
        "\nGive a short label, a one-sentence description, and the fields worth asking about for \
         such notes as snake_case names: requiredFields for what every note should have, \
         optionalFields for the rest. Reply with JSON only.",
    );
    prompt
}

fn describe_cluster(cluster: &Cluster) -> String {
    let mut message = String::new();
    if !cluster.labels.is_empty() {
        let _ = writeln!(message, "Suggested labels: {}", cluster.labels.join(", "));
    }
    if !cluster.keywords.is_empty() {
        let _ = writeln!(message, "Common keywords: {}", cluster.keywords.join(", "));
    }
    let _ = writeln!(message, "Notes ({} in total):", cluster.entries.len());
    for entry in cluster.entries.iter().take(NAMING_SAMPLES) {
        let _ = writeln!(message, "- {}: {}", entry.title, entry.content);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn village() -> DomainSchema {
        DomainSchema::new(
            "village",
            vec![Category::new("history", "History").with_required(&["period", "sources"])],
        )
    }

    #[test]
    fn change_priority_moves_field_to_optional() {
        let mut schema = village();
        let spec = ChangePrioritySpec {
            category_id: "history".into(),
            field_name: "sources".into(),
            from: FieldRequirement::Required,
            to: FieldRequirement::Optional,
        };
        change_priority(&mut schema, &spec).unwrap();

        let history = schema.category("history").unwrap();
        assert_eq!(history.required_fields, vec!["period"]);
        assert_eq!(history.optional_fields, vec!["sources"]);
        assert!(matches!(change_priority(&mut schema, &spec), Err(Error::InvalidState(_))));
    }

    #[test]
    fn duplicate_category_and_field_are_rejected() {
        let mut schema = village();
        let category = NewCategorySpec {
            id: "history".into(),
            label: "History".into(),
            description: String::new(),
            required_fields: vec![],
            optional_fields: vec![],
        };
        assert!(matches!(add_category(&mut schema, &category), Err(Error::InvalidState(_))));

        let field = NewFieldSpec {
            category_id: "history".into(),
            field_name: "period".into(),
            field_type: FieldRequirement::Optional,
            description: String::new(),
        };
        assert!(matches!(add_field(&mut schema, &field), Err(Error::InvalidState(_))));

        let elsewhere = NewFieldSpec {
            category_id: "crafts".into(),
            ..field
        };
        assert!(matches!(add_field(&mut schema, &elsewhere), Err(Error::NotFound { .. })));
    }

    #[test]
    fn field_names_are_cleaned() {
        let raw = vec!["Owner Name".to_string(), "owner_name".into(), "".into(), "Period".into()];
        assert_eq!(field_names(&raw, &["period".to_string()]), vec!["owner_name"]);
    }

    #[test]
    fn naming_needs_a_usable_label() {
        let naming: ClusterNaming = serde_json::from_str(r#"{"label":"--","description":"x"}"#).unwrap();
        assert_eq!(naming.issues().len(), 1);
        let naming: ClusterNaming =
            serde_json::from_str(r#"{"label":"Mills","description":"x","requiredFields":["owner"]}"#).unwrap();
        assert!(naming.issues().is_empty());
        assert_eq!(naming.required_fields, vec!["owner"]);
    }
}

//! Claim enrichment: checks the facts in a saved entry against web search.
//!
//! Up to [`MAX_CLAIMS`] claims are pulled out of the entry, each is searched
//! (through the search cache when one is wired) and judged by the model.
//! A claim whose search or judgement fails is recorded as `unverified`
//! rather than failing the whole enrichment.

use chrono::Utc;
use futures::future::join_all;
use lorekeep_core::error::Error;
use lorekeep_core::knowledge::{ClaimStatus, Enrichment, EntryPatch, KnowledgeEntry, VerifiedClaim};
use lorekeep_core::search::{CachedSearch, WebSearch, WebSearchResult, normalize_query};
use lorekeep_core::store::{KnowledgeRepository, SearchCacheRepository};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::{ModelOutput, StructuredLlm};

pub const MAX_CLAIMS: usize = 5;

#[derive(Debug, Deserialize)]
struct ExtractedClaims {
    #[serde(default)]
    claims: Vec<String>,
}

impl ModelOutput for ExtractedClaims {
    const NAME: &'static str = "claim_extraction";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "claims": {"type": "array", "items": {"type": "string"}, "maxItems": MAX_CLAIMS}
            },
            "required": ["claims"]
        })
    }
}

#[derive(Debug, Deserialize)]
struct ClaimJudgement {
    status: ClaimStatus,
    #[serde(default)]
    evidence: Option<String>,
}

impl ModelOutput for ClaimJudgement {
    const NAME: &'static str = "claim_judgement";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": ["verified", "contradicted", "unverified"]},
                "evidence": {"type": ["string", "null"]}
            },
            "required": ["status"]
        })
    }
}

struct SearchCache {
    repository: Arc<dyn SearchCacheRepository>,
    ttl: chrono::Duration,
}

pub struct ClaimValidator {
    llm: StructuredLlm,
    search: Arc<dyn WebSearch>,
    knowledge: Arc<dyn KnowledgeRepository>,
    cache: Option<SearchCache>,
}

impl ClaimValidator {
    pub fn new(llm: StructuredLlm, search: Arc<dyn WebSearch>, knowledge: Arc<dyn KnowledgeRepository>) -> Self {
        Self {
            llm,
            search,
            knowledge,
            cache: None,
        }
    }

    /// Serve searches younger than `ttl` from `repository`.
    pub fn with_cache(mut self, repository: Arc<dyn SearchCacheRepository>, ttl: chrono::Duration) -> Self {
        self.cache = Some(SearchCache { repository, ttl });
        self
    }

    /// Check `entry`'s claims and store the result on it.
    ///
    /// Returns the updated entry, or `None` if it vanished meanwhile.
    pub async fn enrich(&self, entry: &KnowledgeEntry) -> Result<Option<KnowledgeEntry>, Error> {
        let enrichment = self.validate(entry).await?;
        info!(
            entry_id = %entry.id,
            claims = enrichment.claims.len(),
            verified = enrichment.verified_count(),
            contradicted = enrichment.contradicted().count(),
            "Entry enriched"
        );
        let patch = EntryPatch {
            enrichment: Some(enrichment),
            ..EntryPatch::default()
        };
        Ok(self.knowledge.update(&entry.id, patch).await?)
    }

    /// Extract and judge claims without touching storage.
    pub async fn validate(&self, entry: &KnowledgeEntry) -> Result<Enrichment, Error> {
        let claims = self.extract_claims(entry).await?;
        let context = entry.category_id.as_str();
        let verdicts = join_all(claims.iter().map(|claim| self.verify_claim(claim, context))).await;
        Ok(Enrichment {
            claims: verdicts,
            enriched_at: Utc::now(),
        })
    }

    async fn extract_claims(&self, entry: &KnowledgeEntry) -> Result<Vec<String>, Error> {
        let system = format!(
            "List the checkable factual claims (dates, names, places, numbers) in the text. \
             At most {MAX_CLAIMS}, each a short standalone sentence. Reply with JSON only."
        );
        let user = format!("{}\n\n{}", entry.title, entry.content);
        let extracted: ExtractedClaims = self.llm.invoke(&system, &user).await?;

        let mut claims: Vec<String> = extracted
            .claims
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        claims.truncate(MAX_CLAIMS);
        debug!(entry_id = %entry.id, claims = claims.len(), "Claims extracted");
        Ok(claims)
    }

    async fn verify_claim(&self, claim: &str, context: &str) -> VerifiedClaim {
        match self.judge(claim, context).await {
            Ok(verified) => verified,
            Err(e) => {
                warn!(claim, error = %e, "Claim check failed, marking unverified");
                VerifiedClaim {
                    claim: claim.to_string(),
                    status: ClaimStatus::Unverified,
                    evidence: None,
                    source_urls: Vec::new(),
                }
            }
        }
    }

    async fn judge(&self, claim: &str, context: &str) -> Result<VerifiedClaim, Error> {
        let found = self.cached_search(claim, context).await?;
        let system = "Decide whether the search result supports the claim. Use \"verified\" when it \
                      does, \"contradicted\" when it states otherwise and \"unverified\" when it says \
                      nothing either way. Quote the deciding evidence briefly. Reply with JSON only.";
        let user = format!("Claim: {claim}\n\nSearch result:\n{}", found.content);
        let judgement: ClaimJudgement = self.llm.invoke(system, &user).await?;

        Ok(VerifiedClaim {
            claim: claim.to_string(),
            status: judgement.status,
            evidence: judgement.evidence.filter(|e| !e.trim().is_empty()),
            source_urls: found.source_urls,
        })
    }

    async fn cached_search(&self, query: &str, context: &str) -> Result<WebSearchResult, Error> {
        let Some(cache) = &self.cache else {
            return Ok(self.search.search(query, Some(context)).await?);
        };

        let key = normalize_query(query);
        match cache.repository.get(&key).await {
            Ok(Some(hit)) if hit.is_fresh(cache.ttl, Utc::now()) => {
                debug!(query = %key, "Search cache hit");
                return Ok(hit.result);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Search cache read failed"),
        }

        let result = self.search.search(query, Some(context)).await?;
        let cached = CachedSearch {
            query_key: key,
            result: result.clone(),
            cached_at: Utc::now(),
        };
        if let Err(e) = cache.repository.put(cached).await {
            warn!(error = %e, "Search cache write failed");
        }
        Ok(result)
    }
}

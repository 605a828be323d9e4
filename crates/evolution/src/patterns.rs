//! Pattern detection over knowledge entries.
//!
//! - [`detect_patterns`] groups uncategorized captures into candidate
//!   categories. Entries with an embedding are clustered greedily by cosine
//!   similarity; the rest by suggested label and topic-keyword overlap.
//! - [`undeclared_fields`] finds structured-data keys that keep showing up
//!   in a category without being declared on it.

use lorekeep_core::knowledge::KnowledgeEntry;
use lorekeep_core::schema::Category;
use lorekeep_store::{average_pairwise_similarity, cosine_similarity};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Keyword overlap at which two embedding-less entries count as alike.
const KEYWORD_OVERLAP: f64 = 0.5;

/// Keywords kept per cluster.
const CLUSTER_KEYWORDS: usize = 5;

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub min_size: usize,
    pub similarity_threshold: f32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            min_size: 3,
            similarity_threshold: 0.75,
        }
    }
}

impl From<&lorekeep_config::EvolutionConfig> for ClusterSettings {
    fn from(config: &lorekeep_config::EvolutionConfig) -> Self {
        Self {
            min_size: config.min_cluster_size,
            similarity_threshold: config.cluster_similarity,
        }
    }
}

/// A group of entries that look like one topic.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub entries: Vec<KnowledgeEntry>,
    pub average_similarity: f64,
    /// Most frequent topic keywords, most common first.
    pub keywords: Vec<String>,
    /// Distinct suggested labels in the group.
    pub labels: Vec<String>,
}

impl Cluster {
    fn from_members(entries: Vec<KnowledgeEntry>, average_similarity: f64) -> Self {
        let keywords = common_keywords(&entries, CLUSTER_KEYWORDS);
        let mut labels: Vec<String> = Vec::new();
        for label in entries.iter().filter_map(|e| e.suggested_category_label.as_deref()) {
            let label = label.trim();
            if !label.is_empty() && !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
                labels.push(label.to_string());
            }
        }
        Self {
            entries,
            average_similarity,
            keywords,
            labels,
        }
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }
}

/// Cluster `entries`, embedding-based where vectors exist.
pub fn detect_patterns(entries: &[KnowledgeEntry], settings: &ClusterSettings) -> Vec<Cluster> {
    let (embedded, plain): (Vec<&KnowledgeEntry>, Vec<&KnowledgeEntry>) =
        entries.iter().partition(|e| e.embedding.is_some());

    let mut clusters = cluster_by_embedding(&embedded, settings);
    clusters.extend(cluster_by_keywords(&plain, settings.min_size));
    clusters
}

/// Greedy single pass: each unassigned entry seeds a cluster and pulls in
/// every later unassigned entry at least `similarity_threshold` close to it.
pub fn cluster_by_embedding(entries: &[&KnowledgeEntry], settings: &ClusterSettings) -> Vec<Cluster> {
    greedy(entries, settings.min_size, |a, b| match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) if cosine_similarity(x, y) >= settings.similarity_threshold => true,
        _ => false,
    })
    .into_iter()
    .map(|members| {
        let vectors: Vec<&[f32]> = members.iter().filter_map(|e| e.embedding.as_deref()).collect();
        let average = average_pairwise_similarity(&vectors);
        Cluster::from_members(members, average)
    })
    .collect()
}

/// Fallback without vectors: same normalized label, or enough keyword
/// overlap. Similarity is the mean pairwise keyword overlap.
pub fn cluster_by_keywords(entries: &[&KnowledgeEntry], min_size: usize) -> Vec<Cluster> {
    greedy(entries, min_size, |a, b| {
        let same_label = match (normalized_label(a), normalized_label(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
        same_label || keyword_overlap(a, b) >= KEYWORD_OVERLAP
    })
    .into_iter()
    .map(|members| {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                total += keyword_overlap(a, b);
                pairs += 1;
            }
        }
        let average = if pairs == 0 { 0.0 } else { total / pairs as f64 };
        Cluster::from_members(members, average)
    })
    .collect()
}

fn greedy(
    entries: &[&KnowledgeEntry],
    min_size: usize,
    alike: impl Fn(&KnowledgeEntry, &KnowledgeEntry) -> bool,
) -> Vec<Vec<KnowledgeEntry>> {
    let mut assigned = vec![false; entries.len()];
    let mut groups = Vec::new();

    for seed in 0..entries.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![entries[seed].clone()];
        for other in seed + 1..entries.len() {
            if !assigned[other] && alike(entries[seed], entries[other]) {
                assigned[other] = true;
                members.push(entries[other].clone());
            }
        }
        if members.len() >= min_size.max(1) {
            groups.push(members);
        }
    }
    groups
}

fn normalized_label(entry: &KnowledgeEntry) -> Option<String> {
    let label = entry.suggested_category_label.as_deref()?.trim().to_lowercase();
    (!label.is_empty()).then_some(label)
}

/// Jaccard overlap of two entries' topic keywords, case-insensitive.
pub fn keyword_overlap(a: &KnowledgeEntry, b: &KnowledgeEntry) -> f64 {
    let set = |e: &KnowledgeEntry| -> HashSet<String> {
        e.topic_keywords
            .iter()
            .flatten()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    };
    let (x, y) = (set(a), set(b));
    let union = x.union(&y).count();
    if union == 0 {
        return 0.0;
    }
    x.intersection(&y).count() as f64 / union as f64
}

/// The `limit` most frequent topic keywords; ties by first appearance.
pub fn common_keywords(entries: &[KnowledgeEntry], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for keyword in entries.iter().flat_map(|e| e.topic_keywords.iter().flatten()) {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            continue;
        }
        let slot = counts.entry(keyword).or_insert((0, order));
        slot.0 += 1;
        order += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked.into_iter().take(limit).map(|(k, _)| k).collect()
}

/// A structured-data key recurring in a category without being declared.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub category_id: String,
    pub field_name: String,
    /// Ids of the entries carrying a value for the field.
    pub evidence: Vec<String>,
    /// `evidence.len()` over the entries examined.
    pub share: f64,
}

/// Undeclared keys with a value in at least `min_support` of `entries`,
/// in field-name order.
pub fn undeclared_fields(category: &Category, entries: &[KnowledgeEntry], min_support: usize) -> Vec<FieldCandidate> {
    if entries.is_empty() {
        return Vec::new();
    }
    let mut support: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for entry in entries {
        for key in entry.structured_data.keys() {
            if !category.declares(key) && entry.has_field(key) {
                support.entry(key.as_str()).or_default().push(entry.id.clone());
            }
        }
    }
    support
        .into_iter()
        .filter(|(_, ids)| ids.len() >= min_support.max(1))
        .map(|(field, evidence)| FieldCandidate {
            category_id: category.id.clone(),
            field_name: field.to_string(),
            share: evidence.len() as f64 / entries.len() as f64,
            evidence,
        })
        .collect()
}

/// `"Water Mills!"` → `"water_mills"`.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture(label: Option<&str>, keywords: &[&str], embedding: Option<Vec<f32>>) -> KnowledgeEntry {
        let mut e = KnowledgeEntry::draft("_uncategorized", "t", "c");
        e.suggested_category_label = label.map(String::from);
        e.topic_keywords = Some(keywords.iter().map(|k| k.to_string()).collect());
        e.embedding = embedding;
        e
    }

    #[test]
    fn greedy_embedding_clusters_respect_min_size() {
        let entries = vec![
            capture(None, &[], Some(vec![1.0, 0.0])),
            capture(None, &[], Some(vec![0.0, 1.0])),
            capture(None, &[], Some(vec![0.99, 0.1])),
            capture(None, &[], Some(vec![0.98, 0.15])),
            capture(None, &[], Some(vec![0.1, 0.99])),
        ];
        let clusters = detect_patterns(&entries, &ClusterSettings::default());

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].entries.len(), 3);
        assert_eq!(clusters[0].entries[0].id, entries[0].id);
        assert!(clusters[0].average_similarity > 0.95);
    }

    #[test]
    fn keyword_fallback_groups_by_label_or_overlap() {
        let entries = vec![
            capture(Some("Mills"), &["mill", "river"], None),
            capture(Some(" mills "), &["grain"], None),
            capture(None, &["mill", "river", "wheel"], None),
            capture(Some("Songs"), &["choir"], None),
        ];
        let clusters = detect_patterns(&entries, &ClusterSettings::default());

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].entries.len(), 3);
        assert_eq!(clusters[0].labels, vec!["Mills"]);
        assert_eq!(clusters[0].keywords[..2], ["mill".to_string(), "river".to_string()]);
    }

    #[test]
    fn keyword_overlap_is_jaccard() {
        let a = capture(None, &["Mill", "river"], None);
        let b = capture(None, &["mill", "grain"], None);
        assert!((keyword_overlap(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(keyword_overlap(&capture(None, &[], None), &b), 0.0);
    }

    #[test]
    fn undeclared_fields_need_support() {
        let category = Category::new("history", "History").with_required(&["period"]);
        let entries: Vec<KnowledgeEntry> = (0..4)
            .map(|i| {
                let mut e = KnowledgeEntry::draft("history", "t", "c");
                e.structured_data.insert("period".into(), json!("1732"));
                if i < 3 {
                    e.structured_data.insert("bell_count".into(), json!(i + 1));
                }
                if i == 0 {
                    e.structured_data.insert("organist".into(), json!("Bach"));
                }
                e
            })
            .collect();

        let found = undeclared_fields(&category, &entries, 3);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field_name, "bell_count");
        assert_eq!(found[0].evidence.len(), 3);
        assert!((found[0].share - 0.75).abs() < 1e-12);
    }

    #[test]
    fn slugs_are_snake_case() {
        assert_eq!(slugify("Water Mills!"), "water_mills");
        assert_eq!(slugify("  Folk -- Songs "), "folk_songs");
        assert_eq!(slugify("???"), "");
    }
}

//! Batched Wikidata lookups, coerced into [`RelationFact`]s at the boundary.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{
    entity_id_from_uri, wikidata_evidence, ObjectRef, Predicate, Provenance, RelationFact,
    RelationScope, SourceSystem,
};
use crate::error::{Result, WikinetError};
use crate::remote::{decode_as, CachedClient, RemoteRequest, WIKIDATA_SPARQL};

const RELATIONS_TEMPLATE: &str = r#"
SELECT ?src ?p ?dst ?srcLabel ?dstLabel WHERE {
  VALUES ?src { %VALUES% }
  VALUES ?p { %PROPS% }
  OPTIONAL { ?src ?p ?dst . }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "%LANG%". }
}
ORDER BY ?src ?p ?dst
"#;

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

/// Facts and labels returned for one or more batches of subjects
#[derive(Debug, Default)]
pub struct StructuredBatch {
    pub facts: Vec<RelationFact>,
    /// Entity id → label in the requested language
    pub labels: HashMap<String, String>,
    /// Bindings dropped because they could not be coerced into a fact
    pub malformed: usize,
}

impl StructuredBatch {
    pub fn facts_for<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = &'a RelationFact> + 'a {
        self.facts.iter().filter(move |f| f.subject_id == subject)
    }
}

pub struct StructuredFetcher {
    client: Arc<CachedClient>,
    language: String,
    batch_size: usize,
}

impl StructuredFetcher {
    pub fn new(client: Arc<CachedClient>, language: impl Into<String>, batch_size: usize) -> Self {
        Self {
            client,
            language: language.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Fetch every in-scope relation for `ids`, one lookup per batch.
    ///
    /// Facts come back ordered by subject (in `ids` order), predicate, object.
    pub async fn fetch_structured(&self, ids: &[String], scope: RelationScope) -> Result<StructuredBatch> {
        let mut batch = StructuredBatch::default();
        let predicates = scope.predicates();

        for chunk in ids.chunks(self.batch_size) {
            let request = self.relations_request(chunk, &predicates);
            log::debug!("Structured lookup for {} subject(s)", chunk.len());
            let response = self.client.fetch(&request).await?;

            let parsed: SparqlResponse = decode_as(WIKIDATA_SPARQL, response.body)?;

            let requested: HashSet<&str> = chunk.iter().map(String::as_str).collect();
            for binding in &parsed.results.bindings {
                collect_labels(binding, &mut batch.labels);
                match coerce_binding(binding, &requested, scope, response.retrieved_at) {
                    Ok(Some(fact)) => batch.facts.push(fact),
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("Dropping structured binding: {}", e);
                        batch.malformed += 1;
                    }
                }
            }
        }

        let order: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        batch.facts.sort_by(|a, b| {
            order
                .get(a.subject_id.as_str())
                .cmp(&order.get(b.subject_id.as_str()))
                .then(a.predicate.cmp(&b.predicate))
                .then_with(|| object_sort_key(&a.object).cmp(&object_sort_key(&b.object)))
        });
        batch.facts.dedup_by(|a, b| {
            a.subject_id == b.subject_id && a.predicate == b.predicate && a.object == b.object
        });

        Ok(batch)
    }

    fn relations_request(&self, ids: &[String], predicates: &[Predicate]) -> RemoteRequest {
        let values = ids.iter().map(|id| format!("wd:{}", id)).collect::<Vec<_>>().join(" ");
        let props = predicates
            .iter()
            .map(|p| format!("wdt:{}", p.property()))
            .collect::<Vec<_>>()
            .join(" ");
        let query = RELATIONS_TEMPLATE
            .replace("%VALUES%", &values)
            .replace("%PROPS%", &props)
            .replace("%LANG%", &label_languages(&self.language));

        RemoteRequest::new(WIKIDATA_SPARQL, &self.language)
            .param("query", query)
            .param("format", "json")
            .accept("application/sparql-results+json")
    }
}

/// Requested language first, English as the label fallback
fn label_languages(language: &str) -> String {
    if language == "en" {
        "en".to_string()
    } else {
        format!("{},en", language)
    }
}

fn object_sort_key(object: &ObjectRef) -> (u8, u64, &str) {
    match object {
        ObjectRef::Entity(id) => (0, id[1..].parse().unwrap_or(u64::MAX), id.as_str()),
        ObjectRef::Literal(label) => (1, 0, label.as_str()),
    }
}

fn collect_labels(binding: &HashMap<String, SparqlTerm>, labels: &mut HashMap<String, String>) {
    for (node, label) in [("src", "srcLabel"), ("dst", "dstLabel")] {
        let id = binding.get(node).and_then(|t| entity_id_from_uri(&t.value));
        let label = binding.get(label).map(|t| t.value.trim());
        if let (Some(id), Some(label)) = (id, label) {
            // The label service echoes the id when no label exists
            if !label.is_empty() && label != id {
                labels.entry(id.to_string()).or_insert_with(|| label.to_string());
            }
        }
    }
}

fn coerce_binding(
    binding: &HashMap<String, SparqlTerm>,
    requested: &HashSet<&str>,
    scope: RelationScope,
    retrieved_at: DateTime<Utc>,
) -> Result<Option<RelationFact>> {
    let src = binding
        .get("src")
        .ok_or_else(|| WikinetError::MalformedFact("binding without subject".to_string()))?;
    let subject = entity_id_from_uri(&src.value)
        .ok_or_else(|| WikinetError::MalformedFact(format!("subject '{}' is not an entity", src.value)))?;
    if !requested.contains(subject) {
        return Err(WikinetError::MalformedFact(format!("unrequested subject {}", subject)));
    }

    let dst = match binding.get("dst") {
        Some(dst) => dst,
        None => return Ok(None),
    };

    let p = binding
        .get("p")
        .ok_or_else(|| WikinetError::MalformedFact(format!("binding for {} without predicate", subject)))?;
    let pid = p.value.rsplit('/').next().unwrap_or_default();
    let predicate = Predicate::from_property(pid)
        .ok_or_else(|| WikinetError::MalformedFact(format!("unknown property '{}'", p.value)))?;
    if !scope.contains(predicate) {
        return Err(WikinetError::MalformedFact(format!("{} is outside the requested scope", predicate)));
    }

    let object = match dst.kind.as_str() {
        "uri" => entity_id_from_uri(&dst.value)
            .map(|id| ObjectRef::Entity(id.to_string()))
            .ok_or_else(|| {
                WikinetError::MalformedFact(format!("{} {} has non-entity object '{}'", subject, predicate, dst.value))
            })?,
        "literal" if !dst.value.trim().is_empty() => ObjectRef::Literal(dst.value.trim().to_string()),
        other => {
            return Err(WikinetError::MalformedFact(format!(
                "{} {} has unusable object of type '{}'",
                subject, predicate, other
            )))
        }
    };

    let label_of = |key: &str, id: Option<&str>| {
        binding
            .get(key)
            .map(|t| t.value.trim().to_string())
            .filter(|l| !l.is_empty() && Some(l.as_str()) != id)
    };

    Ok(Some(RelationFact {
        subject_id: subject.to_string(),
        predicate,
        subject_label: label_of("srcLabel", Some(subject)),
        object_label: label_of("dstLabel", object.entity_id()),
        object,
        provenance: Provenance {
            source_system: SourceSystem::Structured,
            evidence_reference: wikidata_evidence(subject),
            retrieved_at,
        },
    }))
}

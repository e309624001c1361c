//! Text fallback: read the entity's Wikipedia infobox for predicates the
//! structured lookup left empty.

use serde::Deserialize;
use std::sync::Arc;

use super::infobox::{field_predicate, parse_infobox, split_value, InfoboxValue};
use super::{ObjectRef, Predicate, Provenance, RelationFact, SourceSystem};
use crate::error::{Result, WikinetError};
use crate::remote::{decode_as, wikipedia_api, CachedClient, RemoteRequest};
use crate::resolver::SeedResolver;

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParseBody>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ParseBody {
    wikitext: Wikitext,
}

/// `formatversion=2` returns a string; the legacy format wraps it in `{"*": ...}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Wikitext {
    Plain(String),
    Legacy {
        #[serde(rename = "*")]
        text: String,
    },
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

pub struct FallbackFetcher {
    client: Arc<CachedClient>,
    resolver: Arc<SeedResolver>,
    language: String,
}

impl FallbackFetcher {
    pub fn new(client: Arc<CachedClient>, resolver: Arc<SeedResolver>) -> Self {
        let language = resolver.language().to_string();
        Self {
            client,
            resolver,
            language,
        }
    }

    /// Facts for the `missing` predicates of `id`, read from its article infobox
    pub async fn fetch_fallback(&self, id: &str, missing: &[Predicate]) -> Result<Vec<RelationFact>> {
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let title = match self.resolver.sitelink_title(id).await? {
            Some(title) => title,
            None => {
                log::debug!("{} has no {}wiki article, skipping fallback", id, self.language);
                return Ok(Vec::new());
            }
        };

        let endpoint = wikipedia_api(&self.language);
        let request = RemoteRequest::new(&endpoint, &self.language)
            .param("action", "parse")
            .param("page", &title)
            .param("prop", "wikitext")
            .param("format", "json")
            .param("formatversion", "2");
        let response = self.client.fetch(&request).await?;
        let retrieved_at = response.retrieved_at;
        let parsed: ParseResponse = decode_as(&endpoint, response.body)?;

        let wikitext = match (parsed.parse, parsed.error) {
            (Some(body), _) => match body.wikitext {
                Wikitext::Plain(text) | Wikitext::Legacy { text } => text,
            },
            (None, Some(error)) if error.code == "missingtitle" => {
                log::debug!("Article '{}' for {} is missing", title, id);
                return Ok(Vec::new());
            }
            (None, Some(error)) => {
                return Err(WikinetError::MalformedResponse {
                    endpoint,
                    detail: format!("{}: {}", error.code, error.info),
                })
            }
            (None, None) => {
                return Err(WikinetError::MalformedResponse {
                    endpoint,
                    detail: "parse response without wikitext".to_string(),
                })
            }
        };

        let infobox = match parse_infobox(&wikitext) {
            Some(infobox) => infobox,
            None => {
                log::debug!("Article '{}' has no infobox", title);
                return Ok(Vec::new());
            }
        };

        let mut items: Vec<(Predicate, InfoboxValue)> = Vec::new();
        for (key, value) in &infobox.fields {
            if let Some(predicate) = field_predicate(key).filter(|p| missing.contains(p)) {
                items.extend(split_value(value).into_iter().map(|v| (predicate, v)));
            }
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let targets: Vec<String> = items
            .iter()
            .filter_map(|(_, v)| match v {
                InfoboxValue::Link { target, .. } => Some(target.clone()),
                InfoboxValue::Text(_) => None,
            })
            .collect();
        let resolved = self.resolver.resolve_titles(&targets).await?;

        let provenance = Provenance {
            source_system: SourceSystem::TextFallback,
            evidence_reference: wikipedia_evidence(&self.language, &title),
            retrieved_at,
        };

        let mut facts: Vec<RelationFact> = Vec::new();
        for (predicate, value) in items {
            let object = match &value {
                InfoboxValue::Link { target, label } => match resolved.get(target) {
                    Some(object_id) => ObjectRef::Entity(object_id.clone()),
                    None => ObjectRef::Literal(label.clone()),
                },
                InfoboxValue::Text(text) => ObjectRef::Literal(text.clone()),
            };
            if object.entity_id() == Some(id) {
                continue;
            }
            if facts.iter().any(|f| f.predicate == predicate && f.object == object) {
                continue;
            }
            facts.push(RelationFact {
                subject_id: id.to_string(),
                predicate,
                object,
                provenance: provenance.clone(),
                subject_label: None,
                object_label: Some(value.label().to_string()),
            });
        }

        log::debug!("Fallback for {} ('{}') produced {} fact(s)", id, title, facts.len());
        Ok(facts)
    }
}

/// Article URL with spaces as underscores
pub fn wikipedia_evidence(language: &str, title: &str) -> String {
    format!("https://{}.wikipedia.org/wiki/{}", language, title.replace(' ', "_"))
}

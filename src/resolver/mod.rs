//! Seed resolution: identifiers, page titles, free text and categories →
//! ranked entity candidates.

pub mod scoring;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::error::{Result, WikinetError};
use crate::relations::is_entity_id;
use crate::remote::{decode_as, wikipedia_api, CachedClient, RemoteRequest, WIKIDATA_API};

/// MediaWiki accepts at most this many titles per query
const TITLE_BATCH: usize = 50;

/// A user-supplied crawl starting point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Seed {
    Identifier(String),
    Title(String),
    Text(String),
    Category(String),
}

impl Seed {
    /// `Q42` → identifier, `Category:Foo` → category, anything else → text
    pub fn parse(raw: &str) -> Seed {
        let raw = raw.trim();
        if is_entity_id(raw) {
            Seed::Identifier(raw.to_string())
        } else if let Some(name) = raw.strip_prefix("Category:") {
            Seed::Category(name.trim().to_string())
        } else {
            Seed::Text(raw.to_string())
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Seed::Identifier(v) | Seed::Title(v) | Seed::Text(v) | Seed::Category(v) => v,
        }
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Identifier(v) => write!(f, "id:{}", v),
            Seed::Title(v) => write!(f, "title:{}", v),
            Seed::Text(v) => write!(f, "text:{}", v),
            Seed::Category(v) => write!(f, "category:{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub identifier: String,
    pub display_label: String,
    pub description: Option<String>,
    pub sitelink_count: usize,
    pub label_match_score: f64,
    pub context_overlap_score: f64,
    pub composite_rank: f64,
}

/// Top two candidates whose composite ranks were within the ambiguity margin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousChoice {
    pub seed: String,
    pub chosen: Candidate,
    pub runner_up: Candidate,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub chosen: Candidate,
    pub ambiguity: Option<AmbiguousChoice>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default, rename = "match")]
    matched: Option<SearchMatch>,
}

#[derive(Debug, Deserialize)]
struct SearchMatch {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EntitiesResponse {
    #[serde(default)]
    entities: HashMap<String, EntityDoc>,
}

#[derive(Debug, Deserialize)]
struct EntityDoc {
    #[serde(default)]
    sitelinks: HashMap<String, Sitelink>,
}

#[derive(Debug, Deserialize)]
struct Sitelink {
    title: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: QueryBody,
    #[serde(default, rename = "continue")]
    continuation: Option<Continuation>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBody {
    #[serde(default)]
    normalized: Vec<FromTo>,
    #[serde(default)]
    redirects: Vec<FromTo>,
    #[serde(default)]
    pages: Vec<Page>,
    #[serde(default)]
    categorymembers: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct FromTo {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    pageprops: Option<PageProps>,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    wikibase_item: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Member {
    title: String,
}

#[derive(Debug, Deserialize)]
struct Continuation {
    cmcontinue: Option<String>,
}

pub struct SeedResolver {
    client: Arc<CachedClient>,
    language: String,
    config: ResolverConfig,
}

impl SeedResolver {
    pub fn new(client: Arc<CachedClient>, language: impl Into<String>, config: ResolverConfig) -> Self {
        Self {
            client,
            language: language.into(),
            config,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Ranked candidates for a seed, best first
    pub async fn resolve(&self, seed: &Seed) -> Result<Vec<Candidate>> {
        match seed {
            Seed::Identifier(id) => {
                if !is_entity_id(id) {
                    return Err(WikinetError::InvalidInput(format!("'{}' is not an entity identifier", id)));
                }
                Ok(vec![self.exact(id, id)])
            }
            Seed::Title(title) => {
                let resolved = self.resolve_titles(std::slice::from_ref(title)).await?;
                match resolved.get(title) {
                    Some(id) => Ok(vec![self.exact(id, title)]),
                    None => {
                        log::debug!("Title '{}' has no linked entity, searching labels", title);
                        self.search(title).await
                    }
                }
            }
            Seed::Text(text) => self.search(text).await,
            Seed::Category(name) => Err(WikinetError::InvalidInput(format!(
                "Category '{}' expands to many identifiers; use resolve_category",
                name
            ))),
        }
    }

    /// The top candidate, flagging near-ties
    pub async fn resolve_best(&self, seed: &Seed) -> Result<Resolution> {
        let mut candidates = self.resolve(seed).await?.into_iter();
        let chosen = candidates
            .next()
            .ok_or_else(|| WikinetError::UnresolvedSeed(seed.to_string()))?;

        let ambiguity = candidates.next().and_then(|runner_up| {
            (chosen.composite_rank - runner_up.composite_rank <= self.config.ambiguity_margin).then(|| {
                AmbiguousChoice {
                    seed: seed.to_string(),
                    chosen: chosen.clone(),
                    runner_up,
                }
            })
        });
        if let Some(choice) = &ambiguity {
            log::warn!(
                "Ambiguous seed {}: chose {} ({}, {:.3}) over {} ({}, {:.3})",
                seed,
                choice.chosen.identifier,
                choice.chosen.display_label,
                choice.chosen.composite_rank,
                choice.runner_up.identifier,
                choice.runner_up.display_label,
                choice.runner_up.composite_rank
            );
        }

        Ok(Resolution { chosen, ambiguity })
    }

    /// Article members of a category, resolved to identifiers in member order
    pub async fn resolve_category(&self, name: &str) -> Result<Vec<String>> {
        let cmtitle = if name.starts_with("Category:") {
            name.to_string()
        } else {
            format!("Category:{}", name)
        };
        let endpoint = wikipedia_api(&self.language);
        let mut titles: Vec<String> = Vec::new();
        let mut continuation: Option<String> = None;

        while titles.len() < self.config.category_limit {
            let page_size = (self.config.category_limit - titles.len()).min(500);
            let mut request = RemoteRequest::new(&endpoint, &self.language)
                .param("action", "query")
                .param("list", "categorymembers")
                .param("cmtitle", &cmtitle)
                .param("cmnamespace", "0")
                .param("cmlimit", page_size.to_string())
                .param("format", "json")
                .param("formatversion", "2");
            if let Some(token) = &continuation {
                request = request.param("cmcontinue", token);
            }

            let response = self.client.fetch(&request).await?;
            let page: QueryResponse = decode_as(&endpoint, response.body)?;
            titles.extend(page.query.categorymembers.into_iter().map(|m| m.title));

            continuation = page.continuation.and_then(|c| c.cmcontinue);
            if continuation.is_none() {
                break;
            }
        }
        titles.truncate(self.config.category_limit);

        let resolved = self.resolve_titles(&titles).await?;
        let mut ids: Vec<String> = Vec::new();
        for title in &titles {
            match resolved.get(title) {
                Some(id) if !ids.contains(id) => ids.push(id.clone()),
                Some(_) => {}
                None => log::debug!("Category member '{}' has no linked entity", title),
            }
        }
        log::info!("Category {} → {} member(s), {} resolved", cmtitle, titles.len(), ids.len());
        Ok(ids)
    }

    /// Map article titles to entity identifiers, following normalization and redirects
    pub async fn resolve_titles(&self, titles: &[String]) -> Result<HashMap<String, String>> {
        let endpoint = wikipedia_api(&self.language);
        let mut resolved = HashMap::new();
        let usable: Vec<&String> = titles.iter().filter(|t| !t.trim().is_empty() && !t.contains('|')).collect();

        for chunk in usable.chunks(TITLE_BATCH) {
            let joined = chunk.iter().map(|t| t.as_str()).collect::<Vec<_>>().join("|");
            let request = RemoteRequest::new(&endpoint, &self.language)
                .param("action", "query")
                .param("prop", "pageprops")
                .param("ppprop", "wikibase_item")
                .param("redirects", "1")
                .param("titles", joined)
                .param("format", "json")
                .param("formatversion", "2");

            let response = self.client.fetch(&request).await?;
            let body: QueryResponse = decode_as(&endpoint, response.body)?;
            let query = body.query;

            let normalized: HashMap<&str, &str> =
                query.normalized.iter().map(|n| (n.from.as_str(), n.to.as_str())).collect();
            let redirects: HashMap<&str, &str> =
                query.redirects.iter().map(|r| (r.from.as_str(), r.to.as_str())).collect();
            let items: HashMap<&str, &str> = query
                .pages
                .iter()
                .filter_map(|p| {
                    let item = p.pageprops.as_ref()?.wikibase_item.as_deref()?;
                    Some((p.title.as_str(), item))
                })
                .collect();

            for title in chunk {
                let mut current = normalized.get(title.as_str()).copied().unwrap_or(title.as_str());
                if let Some(&target) = redirects.get(current) {
                    current = target;
                }
                if let Some(item) = items.get(current) {
                    resolved.insert(title.to_string(), item.to_string());
                }
            }
        }

        Ok(resolved)
    }

    /// Title of the entity's article in the configured language, if any
    pub async fn sitelink_title(&self, id: &str) -> Result<Option<String>> {
        let site = format!("{}wiki", self.language);
        let request = RemoteRequest::new(WIKIDATA_API, &self.language)
            .param("action", "wbgetentities")
            .param("ids", id)
            .param("props", "sitelinks")
            .param("sitefilter", &site)
            .param("format", "json");

        let response = self.client.fetch(&request).await?;
        let mut body: EntitiesResponse = decode_as(WIKIDATA_API, response.body)?;
        Ok(body
            .entities
            .remove(id)
            .and_then(|mut e| e.sitelinks.remove(&site))
            .map(|s| s.title))
    }

    async fn search(&self, text: &str) -> Result<Vec<Candidate>> {
        let request = RemoteRequest::new(WIKIDATA_API, &self.language)
            .param("action", "wbsearchentities")
            .param("search", text)
            .param("language", &self.language)
            .param("uselang", &self.language)
            .param("type", "item")
            .param("limit", self.config.search_limit.to_string())
            .param("format", "json");

        let response = self.client.fetch(&request).await?;
        let hits: SearchResponse = decode_as(WIKIDATA_API, response.body)?;
        let hits: Vec<SearchHit> = hits.search.into_iter().filter(|h| is_entity_id(&h.id)).collect();
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let sitelinks = self.sitelink_counts(&ids).await?;

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| {
                let matched = hit.matched.as_ref().map(|m| m.text.as_str());
                let labels = std::iter::once(hit.label.as_str())
                    .chain(matched)
                    .chain(hit.aliases.iter().map(String::as_str));
                let label_match_score = scoring::best_label_similarity(text, labels);
                let context_overlap_score =
                    scoring::context_overlap(&self.config.context_terms, &hit.label, hit.description.as_deref());
                Candidate {
                    sitelink_count: sitelinks.get(&hit.id).copied().unwrap_or(0),
                    display_label: if hit.label.is_empty() { hit.id.clone() } else { hit.label },
                    identifier: hit.id,
                    description: hit.description.filter(|d| !d.is_empty()),
                    label_match_score,
                    context_overlap_score,
                    composite_rank: 0.0,
                }
            })
            .collect();

        scoring::rank(&mut candidates, &self.config);
        Ok(candidates)
    }

    async fn sitelink_counts(&self, ids: &[String]) -> Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for chunk in ids.chunks(TITLE_BATCH) {
            let request = RemoteRequest::new(WIKIDATA_API, &self.language)
                .param("action", "wbgetentities")
                .param("ids", chunk.join("|"))
                .param("props", "sitelinks")
                .param("format", "json");

            let response = self.client.fetch(&request).await?;
            let body: EntitiesResponse = decode_as(WIKIDATA_API, response.body)?;
            counts.extend(body.entities.into_iter().map(|(id, e)| (id, e.sitelinks.len())));
        }
        Ok(counts)
    }

    /// A candidate known exactly, ranked above anything search could produce
    fn exact(&self, id: &str, label: &str) -> Candidate {
        Candidate {
            identifier: id.to_string(),
            display_label: label.to_string(),
            description: None,
            sitelink_count: 0,
            label_match_score: 1.0,
            context_overlap_score: 1.0,
            composite_rank: self.config.sitelink_weight + self.config.label_weight + self.config.context_weight,
        }
    }
}

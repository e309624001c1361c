//! In-process transports for tests: a scripted one for client behaviour and a
//! small fake of the Wikidata/Wikipedia endpoints for everything above it.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::cache::ResponseStore;
use crate::remote::{
    CachedClient, RemoteRequest, RetryPolicy, TokenBucket, Transport, TransportError, WIKIDATA_API,
    WIKIDATA_SPARQL,
};

type Scripted = Result<String, TransportError>;

/// Replays a fixed list of responses, then repeats the last one
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn always(response: Scripted) -> Self {
        Self::sequence(vec![response])
    }

    pub fn sequence(responses: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(None),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, _request: &RemoteRequest) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last.clone().unwrap_or_else(|| Err(TransportError::from_status(404, "empty script"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FakeEntity {
    label: String,
    description: String,
    aliases: Vec<String>,
    sitelinks: usize,
    title: Option<String>,
}

#[derive(Debug, Clone)]
enum FakeValue {
    Entity(String),
    Literal(String),
}

/// A tiny in-memory Wikidata + Wikipedia
#[derive(Default)]
pub struct FakeWiki {
    entities: BTreeMap<String, FakeEntity>,
    claims: Vec<(String, String, FakeValue)>,
    raw_bindings: Vec<Value>,
    articles: HashMap<String, String>,
    redirects: HashMap<String, String>,
    categories: HashMap<String, Vec<String>>,
    failing_subjects: HashSet<String>,
    failing_pages: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeWiki {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, id: &str, label: &str, sitelinks: usize) -> Self {
        let entity = self.entities.entry(id.to_string()).or_default();
        entity.label = label.to_string();
        entity.sitelinks = sitelinks;
        self
    }

    pub fn alias(mut self, id: &str, alias: &str) -> Self {
        self.entities
            .entry(id.to_string())
            .or_default()
            .aliases
            .push(alias.to_string());
        self
    }

    pub fn description(mut self, id: &str, description: &str) -> Self {
        self.entities.entry(id.to_string()).or_default().description = description.to_string();
        self
    }

    /// Link an entity to a Wikipedia article with the given wikitext
    pub fn article(mut self, id: &str, title: &str, wikitext: &str) -> Self {
        self.entities.entry(id.to_string()).or_default().title = Some(title.to_string());
        self.articles.insert(title.to_string(), wikitext.to_string());
        self
    }

    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub fn category(mut self, name: &str, titles: &[&str]) -> Self {
        self.categories
            .insert(name.to_string(), titles.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn claim(mut self, subject: &str, property: &str, object: &str) -> Self {
        self.claims
            .push((subject.to_string(), property.to_string(), FakeValue::Entity(object.to_string())));
        self
    }

    pub fn literal_claim(mut self, subject: &str, property: &str, value: &str) -> Self {
        self.claims
            .push((subject.to_string(), property.to_string(), FakeValue::Literal(value.to_string())));
        self
    }

    /// Extra SPARQL binding returned verbatim whenever its subject is queried
    pub fn raw_binding(mut self, binding: Value) -> Self {
        self.raw_bindings.push(binding);
        self
    }

    /// Structured lookups touching this subject answer 503
    pub fn failing_subject(mut self, id: &str) -> Self {
        self.failing_subjects.insert(id.to_string());
        self
    }

    /// Wikitext lookups for this title answer 503
    pub fn failing_page(mut self, title: &str) -> Self {
        self.failing_pages.insert(title.to_string());
        self
    }

    pub fn calls(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == kind).count()
    }

    pub fn sparql_calls(&self) -> usize {
        self.calls("sparql")
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, kind: &str) {
        self.calls.lock().unwrap().push(kind.to_string());
    }

    fn entity_uri(id: &str) -> String {
        format!("http://www.wikidata.org/entity/{}", id)
    }

    fn label_of(&self, id: &str) -> String {
        self.entities
            .get(id)
            .map(|e| e.label.clone())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| id.to_string())
    }

    fn sparql(&self, query: &str) -> Result<String, TransportError> {
        self.record("sparql");
        let subjects: Vec<String> = Regex::new(r"wd:(Q\d+)")
            .unwrap()
            .captures_iter(query)
            .map(|c| c[1].to_string())
            .collect();
        let properties: Vec<String> = Regex::new(r"wdt:(P\d+)")
            .unwrap()
            .captures_iter(query)
            .map(|c| c[1].to_string())
            .collect();

        if subjects.iter().any(|s| self.failing_subjects.contains(s)) {
            return Err(TransportError::from_status(503, "query service unavailable"));
        }

        let mut bindings = Vec::new();
        for subject in &subjects {
            for property in &properties {
                let base = json!({
                    "src": {"type": "uri", "value": Self::entity_uri(subject)},
                    "p": {"type": "uri", "value": format!("http://www.wikidata.org/prop/direct/{}", property)},
                    "srcLabel": {"type": "literal", "value": self.label_of(subject)},
                });
                let mut matched = false;
                for (s, p, value) in &self.claims {
                    if s != subject || p != property {
                        continue;
                    }
                    matched = true;
                    let mut binding = base.clone();
                    match value {
                        FakeValue::Entity(id) => {
                            binding["dst"] = json!({"type": "uri", "value": Self::entity_uri(id)});
                            binding["dstLabel"] = json!({"type": "literal", "value": self.label_of(id)});
                        }
                        FakeValue::Literal(text) => {
                            binding["dst"] = json!({"type": "literal", "value": text});
                        }
                    }
                    bindings.push(binding);
                }
                if !matched {
                    bindings.push(base);
                }
            }
        }
        for raw in &self.raw_bindings {
            let src = raw["src"]["value"].as_str().unwrap_or_default();
            if subjects.iter().any(|s| src.ends_with(&format!("/{}", s))) {
                bindings.push(raw.clone());
            }
        }

        Ok(json!({
            "head": {"vars": ["src", "p", "dst", "srcLabel", "dstLabel"]},
            "results": {"bindings": bindings}
        })
        .to_string())
    }

    fn search(&self, params: &BTreeMap<String, String>) -> Result<String, TransportError> {
        self.record("wbsearchentities");
        let needle = params.get("search").map(|s| s.to_lowercase()).unwrap_or_default();
        let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(7);

        let mut hits: Vec<(&String, &FakeEntity)> = self
            .entities
            .iter()
            .filter(|(_, e)| {
                e.label.to_lowercase().contains(&needle)
                    || e.aliases.iter().any(|a| a.to_lowercase().contains(&needle))
            })
            .collect();
        hits.sort_by_key(|(id, _)| id[1..].parse::<u64>().unwrap_or(u64::MAX));

        let search: Vec<Value> = hits
            .into_iter()
            .take(limit)
            .map(|(id, e)| {
                json!({
                    "id": id,
                    "label": e.label,
                    "description": e.description,
                    "aliases": e.aliases,
                    "match": {"type": "label", "text": e.label},
                })
            })
            .collect();
        Ok(json!({ "search": search }).to_string())
    }

    fn get_entities(&self, params: &BTreeMap<String, String>, language: &str) -> Result<String, TransportError> {
        self.record("wbgetentities");
        let filter = params.get("sitefilter").cloned();
        let home = format!("{}wiki", language);

        let mut entities = serde_json::Map::new();
        for id in params.get("ids").map(|s| s.split('|').collect::<Vec<_>>()).unwrap_or_default() {
            let entity = match self.entities.get(id) {
                Some(entity) => entity,
                None => {
                    entities.insert(id.to_string(), json!({"id": id, "missing": ""}));
                    continue;
                }
            };
            let mut sitelinks = serde_json::Map::new();
            if let Some(title) = &entity.title {
                sitelinks.insert(home.clone(), json!({"site": home, "title": title}));
            }
            let mut n = 0;
            while sitelinks.len() < entity.sitelinks {
                let site = format!("x{}wiki", n);
                sitelinks.insert(site.clone(), json!({"site": site, "title": entity.label}));
                n += 1;
            }
            if let Some(filter) = &filter {
                sitelinks.retain(|site, _| site == filter);
            }
            entities.insert(
                id.to_string(),
                json!({
                    "id": id,
                    "labels": {language: {"language": language, "value": entity.label}},
                    "aliases": {language: entity.aliases.iter().map(|a| json!({"language": language, "value": a})).collect::<Vec<_>>()},
                    "sitelinks": sitelinks,
                }),
            );
        }
        Ok(json!({ "entities": entities }).to_string())
    }

    fn pageprops(&self, params: &BTreeMap<String, String>) -> Result<String, TransportError> {
        self.record("pageprops");
        let mut normalized = Vec::new();
        let mut redirects = Vec::new();
        let mut pages = Vec::new();

        for raw in params.get("titles").map(|s| s.split('|').collect::<Vec<_>>()).unwrap_or_default() {
            let mut title = normalize_title(raw);
            if title != raw {
                normalized.push(json!({"from": raw, "to": title}));
            }
            if let Some(target) = self.redirects.get(&title) {
                redirects.push(json!({"from": title, "to": target}));
                title = target.clone();
            }
            let item = self
                .entities
                .iter()
                .find(|(_, e)| e.title.as_deref() == Some(title.as_str()))
                .map(|(id, _)| id.clone());
            match item {
                Some(id) => pages.push(json!({"title": title, "pageprops": {"wikibase_item": id}})),
                None if self.articles.contains_key(&title) => pages.push(json!({"title": title})),
                None => pages.push(json!({"title": title, "missing": true})),
            }
        }

        Ok(json!({
            "batchcomplete": true,
            "query": {"normalized": normalized, "redirects": redirects, "pages": pages}
        })
        .to_string())
    }

    fn category_members(&self, params: &BTreeMap<String, String>) -> Result<String, TransportError> {
        self.record("categorymembers");
        let name = params
            .get("cmtitle")
            .map(|t| t.trim_start_matches("Category:").to_string())
            .unwrap_or_default();
        let limit: usize = params.get("cmlimit").and_then(|l| l.parse().ok()).unwrap_or(10);
        let offset: usize = params.get("cmcontinue").and_then(|c| c.parse().ok()).unwrap_or(0);

        let titles = self.categories.get(&name).cloned().unwrap_or_default();
        let page: Vec<Value> = titles
            .iter()
            .skip(offset)
            .take(limit)
            .map(|t| json!({"ns": 0, "title": t}))
            .collect();

        let mut body = json!({"query": {"categorymembers": page}});
        if offset + limit < titles.len() {
            body["continue"] = json!({"cmcontinue": (offset + limit).to_string(), "continue": "-||"});
        }
        Ok(body.to_string())
    }

    fn parse(&self, params: &BTreeMap<String, String>) -> Result<String, TransportError> {
        self.record("parse");
        let title = params.get("page").cloned().unwrap_or_default();
        if self.failing_pages.contains(&title) {
            return Err(TransportError::from_status(503, "parser unavailable"));
        }
        match self.articles.get(&title) {
            Some(text) => Ok(json!({"parse": {"title": title, "wikitext": text}}).to_string()),
            None => Ok(json!({
                "error": {"code": "missingtitle", "info": "The page you specified doesn't exist."}
            })
            .to_string()),
        }
    }
}

fn normalize_title(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl Transport for FakeWiki {
    async fn execute(&self, request: &RemoteRequest) -> Result<String, TransportError> {
        let params = &request.params;
        if request.endpoint == WIKIDATA_SPARQL {
            return self.sparql(params.get("query").map(String::as_str).unwrap_or_default());
        }
        if request.endpoint == WIKIDATA_API {
            return match params.get("action").map(String::as_str) {
                Some("wbsearchentities") => self.search(params),
                Some("wbgetentities") => self.get_entities(params, &request.language),
                _ => Err(TransportError::from_status(400, "unsupported action")),
            };
        }
        if request.endpoint.ends_with(".wikipedia.org/w/api.php") {
            return match (params.get("action").map(String::as_str), params.get("list").map(String::as_str)) {
                (Some("parse"), _) => self.parse(params),
                (Some("query"), Some("categorymembers")) => self.category_members(params),
                (Some("query"), _) => self.pageprops(params),
                _ => Err(TransportError::from_status(400, "unsupported action")),
            };
        }
        Err(TransportError::from_status(404, format!("unknown endpoint {}", request.endpoint)))
    }
}

/// A fake wiki wired behind a real cache and client
pub struct TestHarness {
    pub wiki: Arc<FakeWiki>,
    pub client: Arc<CachedClient>,
    pub dir: TempDir,
}

impl TestHarness {
    pub async fn new(wiki: FakeWiki) -> Self {
        let dir = TempDir::new().unwrap();
        let wiki = Arc::new(wiki);
        let client = Self::client_for(wiki.clone(), &dir).await;
        Self { wiki, client, dir }
    }

    /// A fresh client (empty memo) over the same fake and cache file
    pub async fn client_for(wiki: Arc<FakeWiki>, dir: &TempDir) -> Arc<CachedClient> {
        Self::client_over(wiki, dir).await
    }

    /// A client over any transport, caching into `dir`
    pub async fn client_over(transport: Arc<dyn Transport>, dir: &TempDir) -> Arc<CachedClient> {
        let store = ResponseStore::open(Self::cache_path(dir)).await.unwrap();
        Arc::new(CachedClient::new(
            transport,
            store,
            Arc::new(TokenBucket::new(10_000.0, 1_000)),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
            256,
        ))
    }

    pub fn cache_path(dir: &TempDir) -> PathBuf {
        dir.path().join("http_cache.sqlite")
    }
}

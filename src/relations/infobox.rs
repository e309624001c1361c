//! Infobox extraction from raw wikitext (regex-based).

use regex::Regex;
use std::sync::OnceLock;

use super::Predicate;

/// The first infobox of an article, with normalized field keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Infobox {
    pub template: String,
    pub fields: Vec<(String, String)>,
}

impl Infobox {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// One item from an infobox value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoboxValue {
    /// `[[target|label]]` cross-reference to another article
    Link { target: String, label: String },
    Text(String),
}

impl InfoboxValue {
    pub fn label(&self) -> &str {
        match self {
            InfoboxValue::Link { label, .. } => label,
            InfoboxValue::Text(text) => text,
        }
    }
}

fn infobox_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\{\{\s*infobox").expect("Invalid regex pattern"))
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]*))?\]\]").expect("Invalid regex pattern"))
}

fn noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<!--.*?-->|<ref[^>]*/>|<ref[^>]*>.*?</ref>").expect("Invalid regex pattern")
    })
}

fn break_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>|\n").expect("Invalid regex pattern"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>|'{2,}|\([^)]*\)").expect("Invalid regex pattern"))
}

/// Map an infobox field key to the predicate it asserts.
///
/// Numbered keys (`office2`, `party3`) map like their base key.
pub fn field_predicate(key: &str) -> Option<Predicate> {
    let base = key.trim_end_matches(|c: char| c.is_ascii_digit());
    match base {
        "father" => Some(Predicate::Father),
        "mother" => Some(Predicate::Mother),
        "spouse" | "spouses" => Some(Predicate::Spouse),
        "child" | "children" | "issue" => Some(Predicate::Child),
        "sibling" | "siblings" => Some(Predicate::Sibling),
        "relations" | "relatives" => Some(Predicate::Relative),
        "partner" | "partners" => Some(Predicate::Partner),
        "party" => Some(Predicate::MemberOfParty),
        "alma_mater" => Some(Predicate::EducatedAt),
        "employer" => Some(Predicate::Employer),
        "office" => Some(Predicate::PositionHeld),
        _ => None,
    }
}

/// Find and parse the first `{{Infobox ...}}` template in `wikitext`
pub fn parse_infobox(wikitext: &str) -> Option<Infobox> {
    let start = infobox_regex().find(wikitext)?.start();
    let body = template_body(&wikitext[start + 2..])?;

    let mut parts = split_top_level(body).into_iter();
    let template = parts.next()?.trim().to_string();

    let fields = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = normalize_key(key);
            let value = value.trim();
            (!key.is_empty() && !value.is_empty()).then(|| (key, value.to_string()))
        })
        .collect();

    Some(Infobox { template, fields })
}

/// Split an infobox value into cross-references and plain labels
pub fn split_value(value: &str) -> Vec<InfoboxValue> {
    let cleaned = noise_regex().replace_all(value, "");
    let flattened = flatten_templates(&cleaned);

    let mut items = Vec::new();
    for segment in break_regex().split(&flattened) {
        let segment = segment.trim().trim_start_matches(|c: char| c == '*' || c == '#').trim();
        if segment.is_empty() {
            continue;
        }

        let mut linked = false;
        for cap in link_regex().captures_iter(segment) {
            let target = cap[1].split('#').next().unwrap_or_default().trim();
            if target.is_empty() || target.contains(':') {
                continue;
            }
            let label = cap
                .get(2)
                .map(|m| m.as_str().trim())
                .filter(|l| !l.is_empty())
                .unwrap_or(target);
            items.push(InfoboxValue::Link {
                target: target.to_string(),
                label: label.to_string(),
            });
            linked = true;
        }
        if !linked {
            items.extend(literal(segment).map(InfoboxValue::Text));
            continue;
        }

        // Plain names written beside links: `[[A]] and B`
        let rest = link_regex().replace_all(segment, ",");
        for fragment in rest.split([',', ';']) {
            let mut words = fragment.split_whitespace().peekable();
            while words.next_if(|w| matches!(w.to_lowercase().as_str(), "and" | "or" | "&")).is_some() {}
            let fragment = words.collect::<Vec<_>>().join(" ");
            items.extend(literal(&fragment).map(InfoboxValue::Text));
        }
    }
    items
}

/// Markup-free label, if any letters survive cleanup
fn literal(text: &str) -> Option<String> {
    let text = tag_regex().replace_all(text, "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = text.trim_matches(|c: char| c == ',' || c == ';' || c.is_whitespace());
    text.chars().any(char::is_alphabetic).then(|| text.to_string())
}

/// `alma mater` / `Alma_Mater` → `alma_mater`
fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Text between an opening `{{` (already consumed) and its matching `}}`
fn template_body(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"{{" => {
                depth += 1;
                i += 2;
            }
            b"}}" => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i]);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

/// Split on `|` that is not nested in a template or link
fn split_top_level(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let (mut braces, mut brackets) = (0usize, 0usize);
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes.get(i..i + 2) {
            Some(b"{{") => {
                braces += 1;
                i += 2;
            }
            Some(b"}}") => {
                braces = braces.saturating_sub(1);
                i += 2;
            }
            Some(b"[[") => {
                brackets += 1;
                i += 2;
            }
            Some(b"]]") => {
                brackets = brackets.saturating_sub(1);
                i += 2;
            }
            _ => {
                if bytes[i] == b'|' && braces == 0 && brackets == 0 {
                    parts.push(&text[last..i]);
                    last = i + 1;
                }
                i += 1;
            }
        }
    }
    parts.push(&text[last..]);
    parts
}

/// Replace nested templates (`{{plainlist|...}}`, `{{marriage|[[X]]|1990}}`)
/// with their positional parameters, one per line.
fn flatten_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match template_body(after) {
            Some(body) => {
                let inner = flatten_templates(body);
                for param in split_top_level(&inner).into_iter().skip(1) {
                    if is_named_param(param) {
                        continue;
                    }
                    out.push('\n');
                    out.push_str(param);
                }
                out.push('\n');
                rest = &after[body.len() + 2..];
            }
            None => {
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `key=value` outside any link
fn is_named_param(param: &str) -> bool {
    match param.find('=') {
        Some(eq) => !param[..eq].contains("[["),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"{{Short description|King of Bahrain}}
{{Infobox royalty
| name        = Hamad bin Isa Al Khalifa
| succession  = [[King of Bahrain]]
| spouse      = {{plainlist|
* [[Sabika bint Ibrahim Al Khalifa|Sabika bint Ibrahim]]
* Shaikha bint Hassan Al Khrayyesh
}}
| issue       = [[Salman bin Hamad Al Khalifa]]<br />[[Abdullah bin Hamad Al Khalifa]]
| father      = [[Isa bin Salman Al Khalifa]]<ref>{{cite web|url=https://example.org}}</ref>
| mother      = Hessa bint Salman Al Khalifa
| alma mater  = [[Mons Officer Cadet School]] (1968)
| religion    = [[Islam]]
}}
'''Hamad bin Isa Al Khalifa''' is the King of Bahrain."#;

    #[test]
    fn test_parse_infobox_fields() {
        let infobox = parse_infobox(ARTICLE).unwrap();
        assert_eq!(infobox.template, "Infobox royalty");
        assert_eq!(infobox.get("name"), Some("Hamad bin Isa Al Khalifa"));
        assert!(infobox.get("alma_mater").unwrap().contains("Mons Officer Cadet School"));
        assert!(infobox.get("spouse").unwrap().starts_with("{{plainlist"));
        assert!(infobox.get("birth_date").is_none());
    }

    #[test]
    fn test_parse_infobox_absent() {
        assert!(parse_infobox("Just prose, no templates.").is_none());
        assert!(parse_infobox("{{Infobox person | name = unterminated").is_none());
    }

    #[test]
    fn test_split_value_links_and_text() {
        let infobox = parse_infobox(ARTICLE).unwrap();

        let spouses = split_value(infobox.get("spouse").unwrap());
        assert_eq!(
            spouses,
            vec![
                InfoboxValue::Link {
                    target: "Sabika bint Ibrahim Al Khalifa".to_string(),
                    label: "Sabika bint Ibrahim".to_string()
                },
                InfoboxValue::Text("Shaikha bint Hassan Al Khrayyesh".to_string()),
            ]
        );

        let issue = split_value(infobox.get("issue").unwrap());
        assert_eq!(issue.len(), 2);
        assert_eq!(issue[1].label(), "Abdullah bin Hamad Al Khalifa");

        // References are stripped before linking
        let father = split_value(infobox.get("father").unwrap());
        assert_eq!(
            father,
            vec![InfoboxValue::Link {
                target: "Isa bin Salman Al Khalifa".to_string(),
                label: "Isa bin Salman Al Khalifa".to_string()
            }]
        );

        let mother = split_value(infobox.get("mother").unwrap());
        assert_eq!(mother, vec![InfoboxValue::Text("Hessa bint Salman Al Khalifa".to_string())]);
    }

    #[test]
    fn test_split_value_marriage_template_drops_dates() {
        let values = split_value("{{marriage|[[Jane Doe]]|1990|2001|reason=divorced}}");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].label(), "Jane Doe");
    }

    #[test]
    fn test_split_value_skips_namespaced_links() {
        let values = split_value("[[File:Crest.svg|20px]] [[House of Khalifa]]");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].label(), "House of Khalifa");
    }

    #[test]
    fn test_split_value_keeps_names_beside_links() {
        let values = split_value("[[Ali Rashid|Ali]] and Mariam Rashid, [[Noura Rashid]] (1971)");
        assert_eq!(
            values,
            vec![
                InfoboxValue::Link {
                    target: "Ali Rashid".to_string(),
                    label: "Ali".to_string()
                },
                InfoboxValue::Link {
                    target: "Noura Rashid".to_string(),
                    label: "Noura Rashid".to_string()
                },
                InfoboxValue::Text("Mariam Rashid".to_string()),
            ]
        );

        // Connectors and years alone are not names
        let values = split_value("[[A]] & [[B]] or 1990");
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| matches!(v, InfoboxValue::Link { .. })));
    }

    #[test]
    fn test_field_vocabulary() {
        assert_eq!(field_predicate("spouses"), Some(Predicate::Spouse));
        assert_eq!(field_predicate("issue"), Some(Predicate::Child));
        assert_eq!(field_predicate("alma_mater"), Some(Predicate::EducatedAt));
        assert_eq!(field_predicate("office2"), Some(Predicate::PositionHeld));
        assert_eq!(field_predicate("relations"), Some(Predicate::Relative));
        assert_eq!(field_predicate("religion"), None);
        assert_eq!(normalize_key(" Alma Mater "), "alma_mater");
    }
}

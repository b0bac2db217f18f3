//! Operator message catalog
//!
//! Embedded locale tables keyed by message id. Unknown languages and
//! missing keys fall back to English; a key missing everywhere comes back
//! verbatim so a broken catalog is visible instead of silent.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

static EN: &str = include_str!("../locales/en.json");
static UK: &str = include_str!("../locales/uk.json");

pub struct Catalog {
    messages: HashMap<String, String>,
    fallback: HashMap<String, String>,
}

fn parse_locale(raw: &str) -> HashMap<String, String> {
    let value: Value = serde_json::from_str(raw).expect("valid embedded locale");
    value
        .as_object()
        .expect("locale is an object")
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

impl Catalog {
    pub fn load(language: &str) -> Self {
        let fallback = parse_locale(EN);
        let messages = match language {
            "en" => fallback.clone(),
            "uk" => parse_locale(UK),
            other => {
                warn!("unknown language '{}', falling back to en", other);
                fallback.clone()
            }
        };
        Self { messages, fallback }
    }

    pub fn text(&self, key: &str) -> String {
        self.messages
            .get(key)
            .or_else(|| self.fallback.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Message with `{name}` placeholders substituted.
    pub fn format(&self, key: &str, args: &[(&str, String)]) -> String {
        let mut out = self.text(key);
        for (name, value) in args {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_substitution() {
        let catalog = Catalog::load("en");
        let text = catalog.format(
            "bioauth_first_warning",
            &[("server", "alpha".to_string()), ("minutes", "42".to_string())],
        );
        assert!(text.contains("alpha"));
        assert!(text.contains("42"));
        assert!(!text.contains('{'));
    }

    #[test]
    fn test_unknown_language_falls_back_to_english() {
        let en = Catalog::load("en");
        let other = Catalog::load("xx");
        assert_eq!(en.text("scrape_restored"), other.text("scrape_restored"));
    }

    #[test]
    fn test_missing_key_comes_back_verbatim() {
        let catalog = Catalog::load("uk");
        assert_eq!(catalog.text("no_such_key"), "no_such_key");
    }

    #[test]
    fn test_locales_cover_the_same_keys() {
        let en = parse_locale(EN);
        let uk = parse_locale(UK);
        let mut en_keys: Vec<_> = en.keys().collect();
        let mut uk_keys: Vec<_> = uk.keys().collect();
        en_keys.sort();
        uk_keys.sort();
        assert_eq!(en_keys, uk_keys);
    }
}

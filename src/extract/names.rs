//! Card name matching against a name dictionary
//!
//! The dictionary is bootstrapped once per matcher, in order of preference:
//! a bundled newline-delimited file, a cached copy of an earlier download,
//! a one-time remote fetch (cached for later runs), and finally a short
//! built-in list. Every step degrades to the next one on failure.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::NameConfig;
use crate::error::{Result, ScanError};

/// Set to skip the remote dictionary fetch
pub const OFFLINE_ENV: &str = "CARDSCAN_OFFLINE";

/// Cached copy of the downloaded dictionary, inside the data directory
pub const CACHE_FILE: &str = "names.txt";

const TOKEN_PATTERN: &str = r"[A-Za-zÀ-ÿ'\-]{3,}";

/// Tokens taken from the start of the OCR text
const MAX_TOKENS: usize = 3;

const BUILTIN_NAMES: &[&str] = &[
    "Bulbasaur", "Ivysaur", "Venusaur", "Charmander", "Charmeleon", "Charizard", "Squirtle", "Wartortle",
    "Blastoise", "Pikachu", "Raichu", "Jigglypuff", "Meowth", "Psyduck", "Growlithe", "Arcanine", "Abra",
    "Alakazam", "Machamp", "Gengar", "Onix", "Magikarp", "Gyarados", "Lapras", "Ditto", "Eevee", "Vaporeon",
    "Jolteon", "Flareon", "Snorlax", "Articuno", "Zapdos", "Moltres", "Dragonite", "Mewtwo", "Mew", "Umbreon",
    "Espeon", "Lugia", "Ho-Oh", "Tyranitar", "Gardevoir", "Rayquaza", "Lucario", "Garchomp", "Greninja",
];

/// Where the loaded names came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictionarySource {
    Bundled(PathBuf),
    Cache(PathBuf),
    Remote(String),
    BuiltIn,
}

/// Read-only list of known card names
#[derive(Debug, Clone)]
pub struct NameDictionary {
    names: Vec<String>,
    source: DictionarySource,
}

impl NameDictionary {
    pub fn new(names: Vec<String>, source: DictionarySource) -> Self {
        Self { names, source }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_NAMES.iter().map(|s| s.to_string()).collect(),
            DictionarySource::BuiltIn,
        )
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn source(&self) -> &DictionarySource {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Accept a species list response (`{"results": [{"name": ..}]}`) or
    /// newline-delimited text
    pub fn parse(text: &str) -> Vec<String> {
        #[derive(Deserialize)]
        struct Species {
            name: String,
        }
        #[derive(Deserialize)]
        struct SpeciesList {
            results: Vec<Species>,
        }

        if let Ok(list) = serde_json::from_str::<SpeciesList>(text) {
            return list.results.into_iter().map(|s| title_case(&s.name)).collect();
        }
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Load following the bootstrap order; never fails
    pub fn bootstrap(config: &NameConfig, cache_dir: Option<&Path>) -> Self {
        let start = Instant::now();
        let dictionary = Self::try_bundled(config)
            .or_else(|| cache_dir.and_then(Self::try_cache))
            .or_else(|| Self::try_remote(config, cache_dir))
            .unwrap_or_else(|| {
                warn!("Falling back to the built-in name list");
                Self::builtin()
            });
        info!(
            "Name dictionary: {} names from {:?} in {:?}",
            dictionary.len(),
            dictionary.source,
            start.elapsed()
        );
        dictionary
    }

    fn try_bundled(config: &NameConfig) -> Option<Self> {
        let path = config.dictionary_path.as_ref()?;
        Self::load_file(path, DictionarySource::Bundled(path.clone()))
    }

    fn try_cache(dir: &Path) -> Option<Self> {
        let path = dir.join(CACHE_FILE);
        if !path.exists() {
            return None;
        }
        Self::load_file(&path, DictionarySource::Cache(path.clone()))
    }

    fn load_file(path: &Path, source: DictionarySource) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let names = Self::parse(&text);
                if names.is_empty() {
                    warn!("Name dictionary {:?} is empty", path);
                    None
                } else {
                    Some(Self::new(names, source))
                }
            }
            Err(e) => {
                warn!("Cannot read name dictionary {:?}: {}", path, e);
                None
            }
        }
    }

    fn try_remote(config: &NameConfig, cache_dir: Option<&Path>) -> Option<Self> {
        let url = config.remote_url.as_deref()?;
        if std::env::var(OFFLINE_ENV).is_ok() {
            debug!("Offline mode: skipping name dictionary download");
            return None;
        }

        let text = match fetch_text(url, Duration::from_millis(config.fetch_timeout_ms)) {
            Ok(text) => text,
            Err(e) => {
                warn!("Name dictionary download failed: {}", e);
                return None;
            }
        };
        let names = Self::parse(&text);
        if names.is_empty() {
            warn!("Name dictionary download from {} had no names", url);
            return None;
        }

        if let Some(dir) = cache_dir {
            let path = dir.join(CACHE_FILE);
            let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, names.join("\n")));
            match written {
                Ok(()) => info!("Cached {} names at {:?}", names.len(), path),
                Err(e) => warn!("Failed to cache name dictionary: {}", e),
            }
        }
        Some(Self::new(names, DictionarySource::Remote(url.to_string())))
    }

    /// Highest-scoring name; ties keep dictionary order
    pub fn best_match(&self, query: &str) -> Option<(&str, f64)> {
        self.names
            .iter()
            .map(|name| (name.as_str(), token_set_ratio(query, name)))
            .fold(None, |best: Option<(&str, f64)>, cand| match best {
                Some(b) if b.1 >= cand.1 => Some(b),
                _ => Some(cand),
            })
    }
}

/// One blocking GET with a bounded timeout
fn fetch_text(url: &str, timeout: Duration) -> Result<String> {
    let rt = Runtime::new().map_err(|e| ScanError::external("name dictionary", e))?;
    rt.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::external("name dictionary", e))?;
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScanError::external("name dictionary", e))?;
        response.text().await.map_err(|e| ScanError::external("name dictionary", e))
    })
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Token-set similarity in [0, 100].
///
/// Shared tokens are compared against each side's remaining tokens, so
/// word order and extra words on one side do not hurt the score.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let join = |set: Vec<&String>| set.into_iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    let shared = join(ta.intersection(&tb).collect());
    let only_a = join(ta.difference(&tb).collect());
    let only_b = join(tb.difference(&ta).collect());

    if shared.is_empty() {
        return ratio(&only_a, &only_b);
    }
    let with_a = format!("{} {}", shared, only_a).trim().to_string();
    let with_b = format!("{} {}", shared, only_b).trim().to_string();

    ratio(&shared, &with_a)
        .max(ratio(&shared, &with_b))
        .max(ratio(&with_a, &with_b))
}

/// Capitalize each word, including parts after a hyphen
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut start_of_word = true;
    for c in text.chars() {
        if start_of_word {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        start_of_word = c.is_whitespace() || c == '-';
    }
    out
}

/// Name chosen for a card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    pub name: String,
    /// Similarity of the dictionary match, 0 when the raw text was used
    pub score: f64,
    pub from_dictionary: bool,
}

/// OCR text to card name
#[derive(Debug)]
pub struct NameMatcher {
    config: NameConfig,
    cache_dir: Option<PathBuf>,
    token_regex: Regex,
    dictionary: OnceLock<NameDictionary>,
}

impl NameMatcher {
    /// Matcher that bootstraps its dictionary on first use
    pub fn new(config: NameConfig, cache_dir: Option<PathBuf>) -> Result<Self> {
        let token_regex = Regex::new(TOKEN_PATTERN).map_err(|e| ScanError::Config(e.to_string()))?;
        Ok(Self {
            config,
            cache_dir,
            token_regex,
            dictionary: OnceLock::new(),
        })
    }

    /// Matcher over a fixed dictionary
    pub fn with_dictionary(config: NameConfig, dictionary: NameDictionary) -> Result<Self> {
        let matcher = Self::new(config, None)?;
        let _ = matcher.dictionary.set(dictionary);
        Ok(matcher)
    }

    pub fn dictionary(&self) -> &NameDictionary {
        self.dictionary
            .get_or_init(|| NameDictionary::bootstrap(&self.config, self.cache_dir.as_deref()))
    }

    /// Join the first alphabetic tokens of the text
    pub fn candidate(&self, text: &str) -> Option<String> {
        let tokens: Vec<&str> = self
            .token_regex
            .find_iter(text)
            .take(MAX_TOKENS)
            .map(|m| m.as_str())
            .collect();
        (!tokens.is_empty()).then(|| tokens.join(" "))
    }

    /// Dictionary match when similar enough, else the title-cased candidate
    pub fn match_name(&self, text: &str) -> Option<NameMatch> {
        let candidate = self.candidate(text)?;

        if let Some((name, score)) = self.dictionary().best_match(&candidate) {
            debug!(candidate = %candidate, name, score, "Name dictionary lookup");
            if score >= self.config.accept_score {
                return Some(NameMatch {
                    name: name.to_string(),
                    score,
                    from_dictionary: true,
                });
            }
        }

        Some(NameMatch {
            name: title_case(&candidate),
            score: 0.0,
            from_dictionary: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn offline_config(path: Option<PathBuf>) -> NameConfig {
        NameConfig {
            dictionary_path: path,
            remote_url: None,
            ..Default::default()
        }
    }

    fn matcher(names: &[&str]) -> NameMatcher {
        let dictionary = NameDictionary::new(names.iter().map(|s| s.to_string()).collect(), DictionarySource::BuiltIn);
        NameMatcher::with_dictionary(NameConfig::default(), dictionary).unwrap()
    }

    #[test]
    fn test_token_set_ratio() {
        assert!((token_set_ratio("Pikachu", "pikachu") - 100.0).abs() < 1e-9);
        assert!((token_set_ratio("Pikachu V", "Pikachu") - 100.0).abs() < 1e-9);
        assert!((token_set_ratio("Charizard ex", "ex Charizard") - 100.0).abs() < 1e-9);
        assert!(token_set_ratio("Pikachv", "Pikachu") > 80.0);
        assert!(token_set_ratio("Snorlax", "Pikachu") < 50.0);
        assert_eq!(token_set_ratio("", "Pikachu"), 0.0);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("mr-mime"), "Mr-Mime");
        assert_eq!(title_case("SHINY dRAGON"), "Shiny Dragon");
    }

    #[test]
    fn test_candidate_tokens() {
        let m = matcher(&["Pikachu"]);
        assert_eq!(m.candidate("PIKACHU 60 HP Basic Pokémon"), Some("PIKACHU Basic Pokémon".to_string()));
        assert_eq!(m.candidate("60 HP ex"), None);
    }

    #[test]
    fn test_dictionary_match_accepted() {
        let m = matcher(&["Charizard", "Pikachu", "Raichu"]);
        let found = m.match_name("Pikachv 60").unwrap();
        assert_eq!(found.name, "Pikachu");
        assert!(found.from_dictionary);
        assert!(found.score >= 80.0);
    }

    #[test]
    fn test_unknown_name_is_title_cased() {
        let m = matcher(&["Charizard", "Pikachu"]);
        let found = m.match_name("FLUFFY MONSTER 90").unwrap();
        assert_eq!(found.name, "Fluffy Monster");
        assert!(!found.from_dictionary);
        assert!(m.match_name("12 / 34").is_none());
    }

    #[test]
    fn test_parse_formats() {
        let json = r#"{"count": 2, "results": [{"name": "bulbasaur", "url": "x"}, {"name": "mr-mime", "url": "y"}]}"#;
        assert_eq!(NameDictionary::parse(json), vec!["Bulbasaur", "Mr-Mime"]);
        assert_eq!(NameDictionary::parse("Pikachu\n\n# comment\n Eevee \n"), vec!["Pikachu", "Eevee"]);
    }

    #[test]
    fn test_bootstrap_prefers_bundled_file() {
        let dir = TempDir::new().unwrap();
        let bundled = dir.path().join("bundled.txt");
        std::fs::write(&bundled, "Alpha\nBeta\n").unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "Gamma\n").unwrap();

        let dict = NameDictionary::bootstrap(&offline_config(Some(bundled.clone())), Some(dir.path()));
        assert_eq!(dict.names(), &["Alpha", "Beta"]);
        assert_eq!(dict.source(), &DictionarySource::Bundled(bundled));
    }

    #[test]
    fn test_bootstrap_uses_cache_then_builtin() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "Gamma\n").unwrap();
        let dict = NameDictionary::bootstrap(&offline_config(None), Some(dir.path()));
        assert_eq!(dict.names(), &["Gamma"]);

        let empty = TempDir::new().unwrap();
        let dict = NameDictionary::bootstrap(&offline_config(Some(empty.path().join("missing.txt"))), Some(empty.path()));
        assert_eq!(dict.source(), &DictionarySource::BuiltIn);
        assert!(dict.names().iter().any(|n| n == "Pikachu"));
    }

    #[test]
    fn test_unreachable_remote_falls_back() {
        let dir = TempDir::new().unwrap();
        let config = NameConfig {
            dictionary_path: None,
            remote_url: Some("http://127.0.0.1:9/species".to_string()),
            fetch_timeout_ms: 500,
            ..Default::default()
        };
        let dict = NameDictionary::bootstrap(&config, Some(dir.path()));
        assert_eq!(dict.source(), &DictionarySource::BuiltIn);
        assert!(!dir.path().join(CACHE_FILE).exists());
    }
}

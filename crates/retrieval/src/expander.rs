//! Synonym expansion.
//!
//! Holds an immutable canonical-term -> surface-forms mapping. Expansion is
//! strictly additive: the returned string is the original tokens plus every
//! matched synonym, never a replacement. Lookup only, no I/O, so this is
//! cheap enough to run on every `simple_dense`/`hybrid_reranked` query.

use std::collections::{HashMap, HashSet};

pub struct SynonymExpander {
    synonyms: HashMap<String, Vec<String>>,
}

impl SynonymExpander {
    /// Build from a canonical-term -> surface-forms map. The map is frozen
    /// at construction time; there is no mutation API.
    pub fn new(synonyms: HashMap<String, Vec<String>>) -> Self {
        Self { synonyms }
    }

    pub fn empty() -> Self {
        Self {
            synonyms: HashMap::new(),
        }
    }

    /// Expand a normalized query into the original tokens plus every
    /// synonym hit, joined into one search-only string.
    pub fn expand(&self, normalized_query: &str) -> String {
        self.expand_with_matches(normalized_query).0
    }

    /// Same as `expand`, but also returns the set of matched synonym forms
    /// actually appended (spec §3's `Explanation.synonyms_applied`), as
    /// opposed to the full configured synonym table.
    pub fn expand_with_matches(&self, normalized_query: &str) -> (String, HashSet<String>) {
        let tokens: Vec<&str> = normalized_query.split_whitespace().collect();
        let mut out: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let mut matched = HashSet::new();

        for token in &tokens {
            if let Some(forms) = self.synonyms.get(*token) {
                for form in forms {
                    if !out.iter().any(|existing| existing == form) {
                        out.push(form.clone());
                    }
                    matched.insert(form.clone());
                }
            }
        }

        (out.join(" "), matched)
    }
}

use std::{borrow::Cow, collections::HashMap, sync::LazyLock};

use common::retrieval::{RagChunk, UserContext};
use regex::Regex;
use tracing::{debug, warn};

// Terms implied by a named dietary style. Exclusion lists, not synonyms:
// a vegan profile must never see chicken even if the user only said "vegan".
static PREFERENCE_IMPLICATIONS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert(
            "vegan",
            &[
                "chicken", "beef", "pork", "bacon", "ham", "fish", "salmon", "tuna", "shrimp",
                "milk", "cream", "cheese", "butter", "yogurt", "egg", "honey", "gelatin",
            ][..],
        );
        map.insert(
            "vegetarian",
            &[
                "chicken", "beef", "pork", "bacon", "ham", "fish", "salmon", "tuna", "shrimp",
                "gelatin",
            ][..],
        );
        map.insert(
            "keto",
            &["sugar", "flour", "bread", "pasta", "rice", "potato", "corn"][..],
        );
        map.insert(
            "paleo",
            &["grain", "wheat", "rice", "bread", "pasta", "legume", "bean", "dairy"][..],
        );
        map.insert("pescatarian", &["chicken", "beef", "pork", "bacon", "ham"][..]);
        map.insert("halal", &["pork", "bacon", "ham", "lard", "alcohol", "wine"][..]);
        map.insert(
            "kosher",
            &["pork", "bacon", "ham", "shellfish", "shrimp", "lobster", "crab"][..],
        );
        map
    });

// Allergen categories expanded to their common named forms.
static ALLERGEN_EXPANSIONS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        let nuts: &'static [&'static str] = &[
            "almond",
            "walnut",
            "pecan",
            "cashew",
            "pistachio",
            "hazelnut",
            "macadamia",
            "brazil nut",
            "nut",
        ];
        map.insert("nut", nuts);
        map.insert("tree nut", nuts);
        map.insert(
            "dairy",
            &["milk", "cream", "cheese", "butter", "yogurt", "whey", "casein"][..],
        );
        map.insert(
            "gluten",
            &["gluten", "wheat", "barley", "rye", "flour", "bread", "pasta", "seitan"][..],
        );
        map.insert("egg", &["egg", "mayonnaise", "meringue", "aioli"][..]);
        map.insert("soy", &["soy", "soybean", "tofu", "edamame", "tempeh", "miso"][..]);
        map.insert(
            "shellfish",
            &["shrimp", "prawn", "crab", "lobster", "clam", "mussel", "oyster", "scallop"][..],
        );
        map.insert(
            "fish",
            &["fish", "salmon", "tuna", "cod", "anchovy", "sardine", "trout"][..],
        );
        map
    });

// Compound substitute phrases scrubbed before their head term is matched,
// so "almond milk" survives a dairy exclusion. The modifier word is NOT
// excepted: "almond milk" still trips a nut exclusion via the "almond"
// term, which matches the unscrubbed text.
static SUBSTITUTE_SCRUB: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    let patterns: &[(&str, &str)] = &[
        (
            "milk",
            r"(?i)\b(?:almond|oat|soy|coconut|rice|cashew|hemp|pea)[ -]milks?\b",
        ),
        (
            "cheese",
            r"(?i)\b(?:vegan|cashew|plant[ -]based|dairy[ -]free)[ -]cheeses?\b",
        ),
        (
            "butter",
            r"(?i)\b(?:peanut|almond|cashew|sunflower|cocoa|vegan|plant[ -]based)[ -]butters?\b",
        ),
        (
            "yogurt",
            r"(?i)\b(?:coconut|soy|almond|oat|plant[ -]based)[ -]yogurts?\b",
        ),
        ("cream", r"(?i)\b(?:coconut|cashew|oat)[ -]creams?\b"),
        ("egg", r"(?i)\b(?:flax|chia)[ -]eggs?\b"),
    ];
    for (head, pattern) in patterns {
        if let Ok(regex) = Regex::new(pattern) {
            map.insert(*head, regex);
        }
    }
    map
});

struct AvoidTerm {
    label: String,
    // Stem shared by singular and plural, used to pick a scrub list.
    stem: String,
    pattern: Regex,
}

/// Word-boundary matcher over the expanded avoid-term set for one request.
///
/// Matching is singular/plural tolerant and case-insensitive; bare
/// substring matching is explicitly wrong here ("carrot" must not match
/// inside an unrelated word).
pub struct AvoidMatcher {
    terms: Vec<AvoidTerm>,
}

impl AvoidMatcher {
    /// Builds the matcher from a user context: explicit `dietary.avoid`,
    /// terms implied by `dietary.preferences`, and allergen-category
    /// expansions of both.
    pub fn from_context(context: &UserContext) -> Self {
        let mut expanded: Vec<String> = Vec::new();

        for raw in &context.dietary.avoid {
            push_expanded(&mut expanded, raw);
        }
        for preference in &context.dietary.preferences {
            let normalized = normalize_term(preference);
            if let Some(implied) = PREFERENCE_IMPLICATIONS.get(normalized.as_str()) {
                for term in *implied {
                    push_expanded(&mut expanded, term);
                }
            }
        }

        let terms = expanded
            .into_iter()
            .filter_map(|label| {
                let stem = stem_term(&label);
                match Regex::new(&format!(r"(?i)\b{}s?\b", regex::escape(&stem))) {
                    Ok(pattern) => Some(AvoidTerm {
                        label,
                        stem,
                        pattern,
                    }),
                    Err(err) => {
                        // A term we cannot compile is a term we cannot
                        // guarantee to filter; surface it loudly.
                        warn!(term = %label, error = %err, "Skipping uncompilable avoid term");
                        None
                    }
                }
            })
            .collect();

        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Returns the first avoid term matching the chunk text or page title.
    pub fn first_violation(&self, chunk: &RagChunk) -> Option<&str> {
        for term in &self.terms {
            let scrub = SUBSTITUTE_SCRUB.get(term.stem.as_str());
            for haystack in [chunk.text.as_str(), chunk.metadata.page_title.as_str()] {
                let candidate: Cow<'_, str> = match scrub {
                    Some(regex) => regex.replace_all(haystack, " "),
                    None => Cow::Borrowed(haystack),
                };
                if term.pattern.is_match(&candidate) {
                    return Some(&term.label);
                }
            }
        }
        None
    }
}

/// Removes chunks containing any expanded avoid term. Exclusion-only and
/// unconditional: this is the one stage where safety trumps relevance, and
/// an emptied result set is a valid outcome; relaxing the filter is a
/// caller decision, never an implicit retry.
pub fn filter_avoided(candidates: Vec<crate::scoring::Scored>, context: Option<&UserContext>) -> Vec<crate::scoring::Scored> {
    let Some(ctx) = context else {
        return candidates;
    };
    let matcher = AvoidMatcher::from_context(ctx);
    if matcher.is_empty() {
        return candidates;
    }

    let before = candidates.len();
    let survivors: Vec<crate::scoring::Scored> = candidates
        .into_iter()
        .filter(|candidate| match matcher.first_violation(&candidate.chunk) {
            Some(term) => {
                debug!(
                    chunk_id = %candidate.chunk.id,
                    term,
                    "Dropping chunk matching avoid term"
                );
                false
            }
            None => true,
        })
        .collect();

    if survivors.len() < before {
        debug!(
            before,
            after = survivors.len(),
            "Safety filter removed chunks"
        );
    }
    survivors
}

fn push_expanded(expanded: &mut Vec<String>, raw: &str) {
    let normalized = normalize_term(raw);
    if normalized.is_empty() {
        return;
    }

    push_unique(expanded, &normalized);
    if let Some(category_terms) = ALLERGEN_EXPANSIONS.get(stem_term(&normalized).as_str()) {
        for term in *category_terms {
            push_unique(expanded, term);
        }
    }
}

fn push_unique(expanded: &mut Vec<String>, term: &str) {
    if !expanded.iter().any(|existing| existing == term) {
        expanded.push(term.to_owned());
    }
}

fn normalize_term(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// Shared singular/plural stem: one trailing 's' is dropped unless the word
// ends in a double 's'.
fn stem_term(term: &str) -> String {
    if term.len() > 2 && term.ends_with('s') && !term.ends_with("ss") {
        term[..term.len() - 1].to_owned()
    } else {
        term.to_owned()
    }
}

use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use common::retrieval::UserContext;
use tracing::debug;

// Lookup-table expansions from context signals to search-helpful tokens.
// This is deliberately not free-text generation: the tables are small,
// static, and the result is deterministic.

static HEALTH_CONDITION_TERMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("diabetes", &["low sugar", "diabetic friendly"][..]);
        map.insert("hypertension", &["low sodium", "heart healthy"][..]);
        map.insert("high-cholesterol", &["low fat", "heart healthy"][..]);
        map.insert("celiac", &["gluten free"][..]);
        map.insert("ibs", &["low fodmap"][..]);
        map
    });

static DIETARY_PREFERENCE_TERMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("vegan", &["vegan", "plant based"][..]);
        map.insert("vegetarian", &["vegetarian"][..]);
        map.insert("keto", &["keto", "low carb"][..]);
        map.insert("paleo", &["paleo"][..]);
        map.insert("mediterranean", &["mediterranean"][..]);
        map
    });

static CONSTRAINT_TERMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("quick", &["quick", "fast", "easy"][..]);
        map.insert("budget", &["budget", "affordable"][..]);
        map.insert("meal-prep", &["make ahead", "batch"][..]);
        map.insert("one-pot", &["one pot"][..]);
        map.insert("no-cook", &["no cook", "no bake"][..]);
        map
    });

static FITNESS_TERMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("cutting", &["low calorie", "high protein"][..]);
        map.insert("bulking", &["high calorie", "high protein"][..]);
        map.insert("endurance", &["energy", "carbohydrate"][..]);
        map
    });

static SEASON_TERMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("summer", &["refreshing", "cold"][..]);
        map.insert("winter", &["warming", "hearty"][..]);
        map.insert("spring", &["fresh", "light"][..]);
        map.insert("autumn", &["cozy", "roasted"][..]);
        map.insert("fall", &["cozy", "roasted"][..]);
        map
    });

/// Expands the plan's semantic query with context-derived search terms to
/// improve embedding recall. Appended terms are deduped token-wise against
/// the original query (and each other) and capped, so the expansion is
/// idempotent: augmenting an already-augmented query changes nothing.
pub fn augment_query(semantic_query: &str, context: Option<&UserContext>, cap: usize) -> String {
    let Some(ctx) = context else {
        return semantic_query.to_owned();
    };

    let mut expansion = QueryExpansion::new(semantic_query, cap);

    // Dimension order is fixed so the expansion is deterministic.
    for condition in &ctx.health.conditions {
        expansion.push_all(lookup(&HEALTH_CONDITION_TERMS, condition));
    }
    for preference in &ctx.dietary.preferences {
        expansion.push_all(lookup(&DIETARY_PREFERENCE_TERMS, preference));
    }
    for constraint in &ctx.constraints {
        expansion.push_all(lookup(&CONSTRAINT_TERMS, constraint));
    }
    for phase in &ctx.fitness_context {
        expansion.push_all(lookup(&FITNESS_TERMS, phase));
    }
    if let Some(season) = &ctx.season {
        expansion.push_all(lookup(&SEASON_TERMS, season));
    }

    expansion.finish()
}

struct QueryExpansion {
    augmented: String,
    // Whole tokens seen so far; dedupe is word-exact, not substring, so a
    // query mentioning "breakfast" does not suppress the term "fast".
    tokens: HashSet<String>,
    appended: usize,
    cap: usize,
    original_len: usize,
}

impl QueryExpansion {
    fn new(query: &str, cap: usize) -> Self {
        Self {
            augmented: query.to_owned(),
            tokens: tokenize(query),
            appended: 0,
            cap,
            original_len: query.len(),
        }
    }

    fn push_all(&mut self, terms: &[&str]) {
        for term in terms {
            self.push(term);
        }
    }

    fn push(&mut self, term: &str) {
        if self.appended >= self.cap {
            return;
        }
        let words: Vec<String> = tokenize(term).into_iter().collect();
        if words.iter().all(|word| self.tokens.contains(word)) {
            return;
        }

        self.augmented.push(' ');
        self.augmented.push_str(term);
        self.tokens.extend(words);
        self.appended += 1;
    }

    fn finish(self) -> String {
        if self.augmented.len() > self.original_len {
            debug!(
                appended = self.appended,
                query = %self.augmented,
                "Augmented semantic query with context terms"
            );
        }
        self.augmented
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn lookup<'a>(
    table: &'a HashMap<&'static str, &'static [&'static str]>,
    key: &str,
) -> &'a [&'static str] {
    let normalized = key.trim().to_lowercase().replace(' ', "-");
    table.get(normalized.as_str()).copied().unwrap_or(&[])
}

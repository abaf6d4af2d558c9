use std::{collections::HashMap, sync::LazyLock};

/// Constraint/goal keywords mapped to phrases that practically contradict
/// them. Loaded once, read-only; safe for concurrent access.
static CONFLICT_MAP: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert(
            "quick",
            &[
                "overnight",
                "slow-cooked",
                "slow cooker",
                "slow-cooker",
                "marinate for hours",
                "rest overnight",
                "rise for",
                "proof for",
            ][..],
        );
        map.insert(
            "easy",
            &["advanced technique", "sous vide", "tempering", "laminated dough"][..],
        );
        map.insert(
            "weight-loss",
            &["creamy", "rich", "buttery", "deep-fried", "indulgent", "decadent"][..],
        );
        map.insert(
            "low-sodium",
            &["brined", "cured", "soy sauce", "fish sauce", "salted"][..],
        );
        map.insert(
            "budget",
            &["premium", "luxury", "saffron", "truffle", "wagyu", "lobster"][..],
        );
        map.insert("no-cook", &["bake", "roast", "simmer", "saute", "fry"][..]);
        map.insert(
            "kid-friendly",
            &["spicy", "chili", "hot sauce", "fiery"][..],
        );
        map
    });

/// Collects the conflicting phrases for a set of user keywords, lowercased
/// and deduped. Keywords are normalized ("weight loss" and "weight-loss"
/// look up the same entry).
pub fn conflicting_phrases<'a, I>(keywords: I) -> Vec<&'static str>
where
    I: Iterator<Item = &'a str>,
{
    let mut phrases: Vec<&'static str> = Vec::new();
    for keyword in keywords {
        let normalized = keyword.trim().to_lowercase().replace(' ', "-");
        if let Some(entries) = CONFLICT_MAP.get(normalized.as_str()) {
            for phrase in entries.iter().copied() {
                if !phrases.contains(&phrase) {
                    phrases.push(phrase);
                }
            }
        }
    }
    phrases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_normalize_to_map_entries() {
        let from_spaced = conflicting_phrases(["Weight Loss"].into_iter());
        let from_hyphenated = conflicting_phrases(["weight-loss"].into_iter());
        assert_eq!(from_spaced, from_hyphenated);
        assert!(from_spaced.contains(&"creamy"));
    }

    #[test]
    fn unknown_keywords_contribute_nothing() {
        assert!(conflicting_phrases(["astronaut"].into_iter()).is_empty());
    }

    #[test]
    fn duplicate_phrases_collapse() {
        let phrases = conflicting_phrases(["quick", "quick"].into_iter());
        let overnight = phrases.iter().filter(|p| **p == "overnight").count();
        assert_eq!(overnight, 1);
    }
}

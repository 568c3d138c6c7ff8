//! Minimal English inflection for association names
//!
//! Association cardinality is inferred from whether its name is plural, and
//! has-many references render under a singular `<name>_ids` key.

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
];

/// Singular form of `word` (`tasks` → `task`, `categories` → `category`).
pub fn singularize(word: &str) -> String {
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == word) {
        return singular.to_string();
    }

    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }

    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }

    if word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") && word.len() > 1 {
        return word[..word.len() - 1].to_string();
    }

    word.to_string()
}

/// Plural form of `word` (`task` → `tasks`, `category` → `categories`).
pub fn pluralize(word: &str) -> String {
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == word) {
        return plural.to_string();
    }

    if let Some(stem) = word.strip_suffix('y') {
        let vowel_before = stem.chars().last().is_some_and(|c| "aeiou".contains(c));
        if !stem.is_empty() && !vowel_before {
            return format!("{}ies", stem);
        }
    }

    if ["s", "sh", "ch", "x", "z"].iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{}es", word);
    }

    format!("{}s", word)
}

/// Whether `word` reads as a plural noun.
pub fn is_plural(word: &str) -> bool {
    singularize(word) != word
}

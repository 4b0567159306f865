//! Builder-name lookup against the abbreviation dictionary.

use std::cmp::Ordering;
use std::collections::HashMap;

use fieldops_core::{Builder, BuilderAbbreviation, BuilderMatch, MatchMethod};
use strsim::normalized_levenshtein;
use uuid::Uuid;

use crate::config::MatcherConfig;

/// Trailing words that say nothing about which builder is meant.
const NOISE_WORDS: &[&str] = &[
    "homes", "home", "builders", "builder", "building", "construction", "custom", "communities",
    "group", "inc", "llc", "co", "company", "corp",
];

/// Case-folds, turns punctuation into spaces and collapses whitespace.
pub fn normalize_name(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drops trailing noise words from an already normalized name.
pub fn strip_noise(normalized: &str) -> String {
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    while words.len() > 1 && words.last().is_some_and(|w| NOISE_WORDS.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

fn contains_words(haystack: &str, needle: &str) -> bool {
    needle.len() >= 2 && format!(" {haystack} ").contains(&format!(" {needle} "))
}

#[derive(Debug, Clone)]
struct DictionaryEntry {
    builder_id: Uuid,
    abbreviation: String,
    is_primary: bool,
    total_jobs: u32,
    normalized: String,
    stripped: String,
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    entry: &'a DictionaryEntry,
    score: u8,
    method: MatchMethod,
}

impl Candidate<'_> {
    /// Best first: score, then primary, then busier builder, then abbreviation text.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| other.entry.is_primary.cmp(&self.entry.is_primary))
            .then_with(|| other.entry.total_jobs.cmp(&self.entry.total_jobs))
            .then_with(|| self.entry.abbreviation.cmp(&other.entry.abbreviation))
            .then_with(|| self.entry.builder_id.cmp(&other.entry.builder_id))
    }
}

/// Snapshot of the dictionary, built once per batch. Matching is pure.
#[derive(Debug, Clone)]
pub struct BuilderMatcher {
    config: MatcherConfig,
    entries: Vec<DictionaryEntry>,
}

impl BuilderMatcher {
    pub fn new(
        config: MatcherConfig,
        abbreviations: &[BuilderAbbreviation],
        builders: &[Builder],
    ) -> Self {
        let job_counts: HashMap<Uuid, u32> =
            builders.iter().map(|b| (b.id, b.total_jobs)).collect();
        let entries = abbreviations
            .iter()
            .filter_map(|abbr| {
                let normalized = normalize_name(&abbr.abbreviation);
                if normalized.is_empty() {
                    return None;
                }
                Some(DictionaryEntry {
                    builder_id: abbr.builder_id,
                    abbreviation: abbr.abbreviation.clone(),
                    is_primary: abbr.is_primary,
                    total_jobs: job_counts.get(&abbr.builder_id).copied().unwrap_or_default(),
                    stripped: strip_noise(&normalized),
                    normalized,
                })
            })
            .collect();
        Self { config, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn match_guess(&self, guess: Option<&str>) -> BuilderMatch {
        let normalized = normalize_name(guess.unwrap_or_default());
        if normalized.is_empty() {
            return BuilderMatch::none();
        }
        let stripped = strip_noise(&normalized);

        self.entries
            .iter()
            .filter_map(|entry| self.score_entry(entry, &normalized, &stripped))
            .min_by(|a, b| a.rank(b))
            .map(|best| BuilderMatch {
                builder_id: Some(best.entry.builder_id),
                score: best.score,
                abbreviation: Some(best.entry.abbreviation.clone()),
                method: best.method,
            })
            .unwrap_or_else(BuilderMatch::none)
    }

    fn score_entry<'a>(
        &self,
        entry: &'a DictionaryEntry,
        guess: &str,
        guess_stripped: &str,
    ) -> Option<Candidate<'a>> {
        let forms = [
            (guess, entry.normalized.as_str()),
            (guess_stripped, entry.stripped.as_str()),
            (guess, entry.stripped.as_str()),
            (guess_stripped, entry.normalized.as_str()),
        ];

        if forms.iter().any(|(g, e)| g == e) {
            let score = if entry.is_primary {
                self.config.exact_primary_score
            } else {
                self.config.exact_secondary_score
            };
            return Some(Candidate {
                entry,
                score,
                method: MatchMethod::Exact,
            });
        }

        if forms
            .iter()
            .any(|(g, e)| contains_words(g, e) || contains_words(e, g))
        {
            return Some(Candidate {
                entry,
                score: self.config.partial_score,
                method: MatchMethod::Partial,
            });
        }

        let similarity = normalized_levenshtein(guess, &entry.normalized)
            .max(normalized_levenshtein(guess_stripped, &entry.stripped));
        if similarity >= self.config.similarity_floor {
            let score = (similarity * self.config.fuzzy_scale).round().clamp(0.0, 100.0) as u8;
            return Some(Candidate {
                entry,
                score,
                method: MatchMethod::Fuzzy,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(id: u128, name: &str, total_jobs: u32) -> Builder {
        Builder {
            id: Uuid::from_u128(id),
            name: name.into(),
            territory: None,
            total_jobs,
        }
    }

    fn abbr(id: u128, text: &str, is_primary: bool) -> BuilderAbbreviation {
        BuilderAbbreviation {
            builder_id: Uuid::from_u128(id),
            abbreviation: text.into(),
            is_primary,
        }
    }

    fn matcher() -> BuilderMatcher {
        let builders = vec![
            builder(1, "M/I Homes", 420),
            builder(2, "Pulte Group", 300),
            builder(3, "Ryan Homes", 150),
            builder(4, "Mill Creek Homes", 12),
        ];
        let abbreviations = vec![
            abbr(1, "MI", true),
            abbr(1, "M/I Homes", false),
            abbr(2, "Pulte", true),
            abbr(3, "Ryan Homes", true),
            abbr(3, "RH", false),
            abbr(4, "Mill Creek", true),
        ];
        BuilderMatcher::new(MatcherConfig::default(), &abbreviations, &builders)
    }

    #[test]
    fn normalization_folds_case_punctuation_and_noise() {
        assert_eq!(normalize_name("  M/I   Homes, Inc. "), "m i homes inc");
        assert_eq!(strip_noise("m i homes inc"), "m i");
        assert_eq!(strip_noise("homes"), "homes");
    }

    #[test]
    fn primary_abbreviation_is_an_exact_hundred() {
        let m = matcher().match_guess(Some("MI Homes"));
        assert_eq!(m.builder_id, Some(Uuid::from_u128(1)));
        assert_eq!(m.score, 100);
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!(m.abbreviation.as_deref(), Some("MI"));
    }

    #[test]
    fn secondary_abbreviation_scores_ninety() {
        let m = matcher().match_guess(Some("rh"));
        assert_eq!(m.builder_id, Some(Uuid::from_u128(3)));
        assert_eq!(m.score, 90);
    }

    #[test]
    fn word_boundary_containment_is_partial() {
        let m = matcher().match_guess(Some("Pulte Raleigh Division"));
        assert_eq!(m.builder_id, Some(Uuid::from_u128(2)));
        assert_eq!(m.score, 70);
        assert_eq!(m.method, MatchMethod::Partial);
    }

    #[test]
    fn misspellings_fall_back_to_fuzzy() {
        let m = matcher().match_guess(Some("Mill Crek"));
        assert_eq!(m.builder_id, Some(Uuid::from_u128(4)));
        assert_eq!(m.method, MatchMethod::Fuzzy);
        assert!(m.score > 0 && m.score < 70, "score {}", m.score);
    }

    #[test]
    fn nothing_close_is_no_match() {
        assert_eq!(matcher().match_guess(Some("some inspection maybe?")), BuilderMatch::none());
        assert_eq!(matcher().match_guess(None), BuilderMatch::none());
        assert_eq!(matcher().match_guess(Some(" -- ")), BuilderMatch::none());
    }

    #[test]
    fn ties_prefer_primary_then_busier_builder() {
        let builders = vec![builder(10, "Alpha Homes", 5), builder(11, "Alpha Builders", 50)];
        let abbreviations = vec![abbr(10, "Alpha", false), abbr(11, "Alpha", false)];
        let m = BuilderMatcher::new(MatcherConfig::default(), &abbreviations, &builders)
            .match_guess(Some("alpha"));
        assert_eq!(m.builder_id, Some(Uuid::from_u128(11)));

        let abbreviations = vec![abbr(10, "Alpha", true), abbr(11, "Alpha", false)];
        let m = BuilderMatcher::new(MatcherConfig::default(), &abbreviations, &builders)
            .match_guess(Some("alpha"));
        assert_eq!(m.builder_id, Some(Uuid::from_u128(10)));
        assert_eq!(m.score, 100);
    }
}

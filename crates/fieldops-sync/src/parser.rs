//! Free-text extraction of builder, job type, address and urgency from a calendar event.

use fieldops_core::{
    GeoPoint, JobType, JobTypeGuess, JobTypeQuality, ParsedCandidate, RawCalendarEvent,
    UrgencyLevel,
};

/// Job-type phrases, longest first so the most specific phrase wins.
const JOB_TYPE_VOCABULARY: &[(&str, JobType, JobTypeQuality)] = &[
    ("final testing", JobType::Final, JobTypeQuality::Specific),
    ("duct leakage", JobType::DuctLeakage, JobTypeQuality::Specific),
    ("pre-drywall", JobType::PreDrywall, JobTypeQuality::Specific),
    ("pre drywall", JobType::PreDrywall, JobTypeQuality::Specific),
    ("blower door", JobType::BlowerDoor, JobTypeQuality::Specific),
    ("blower-door", JobType::BlowerDoor, JobTypeQuality::Specific),
    ("predrywall", JobType::PreDrywall, JobTypeQuality::Specific),
    ("insulation", JobType::Insulation, JobTypeQuality::Specific),
    ("rough duct", JobType::RoughDuct, JobTypeQuality::Specific),
    ("duct test", JobType::DuctLeakage, JobTypeQuality::Specific),
    ("rough", JobType::Rough, JobTypeQuality::Generic),
    ("final", JobType::Final, JobTypeQuality::Generic),
    ("duct", JobType::DuctLeakage, JobTypeQuality::Generic),
    ("bdt", JobType::BlowerDoor, JobTypeQuality::Specific),
    ("dlt", JobType::DuctLeakage, JobTypeQuality::Specific),
];

const STREET_SUFFIXES: &[&str] = &[
    "st", "street", "ave", "avenue", "rd", "road", "dr", "drive", "ln", "lane", "ct", "court",
    "blvd", "boulevard", "way", "cir", "circle", "trl", "trail", "pkwy", "parkway", "pl", "place",
    "ter", "terrace", "hwy", "highway", "loop", "xing",
];

const MAX_ADDRESS_WORDS: usize = 6;

const URGENT_WORDS: &[&str] = &["asap", "urgent", "emergency"];
const LOW_WORDS: &[&str] = &["low priority", "flexible"];
const HIGH_WORDS: &[&str] = &["rush", "priority"];

/// Never fails. Fields that cannot be recognized are left empty.
pub fn parse_event(event: &RawCalendarEvent) -> ParsedCandidate {
    let title = event.title.trim();
    let title_hit = find_job_type(title);
    let job_type_hit = title_hit
        .clone()
        .or_else(|| find_job_type(&event.description));

    ParsedCandidate {
        builder_guess: builder_guess(title, title_hit.as_ref().map(|h| h.first_keyword_at)),
        job_type: job_type_hit.map(|h| h.guess),
        address_guess: [event.location.as_str(), event.description.as_str(), title]
            .into_iter()
            .find_map(find_address),
        urgency: detect_urgency(&format!("{} {}", event.title, event.description)),
    }
}

#[derive(Debug, Clone)]
struct JobTypeHit {
    guess: JobTypeGuess,
    /// Byte offset of the earliest vocabulary hit in the text.
    first_keyword_at: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Byte offsets where `needle` occurs in `haystack` on word boundaries.
/// Both must already be ASCII-lowercased.
fn word_occurrences<'a>(haystack: &'a str, needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    haystack.match_indices(needle).filter_map(move |(at, _)| {
        let before_ok = haystack[..at].chars().next_back().is_none_or(|c| !is_word_char(c));
        let after_ok = haystack[at + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !is_word_char(c));
        (before_ok && after_ok).then_some(at)
    })
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    word_occurrences(haystack, needle).next().is_some()
}

fn find_job_type(text: &str) -> Option<JobTypeHit> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut best: Option<(usize, &(&str, JobType, JobTypeQuality))> = None;
    let mut first_keyword_at: Option<usize> = None;

    for entry in JOB_TYPE_VOCABULARY {
        let Some(at) = word_occurrences(&lower, entry.0).next() else {
            continue;
        };
        first_keyword_at = Some(first_keyword_at.map_or(at, |f| f.min(at)));
        let better = match best {
            None => true,
            Some((best_at, best_entry)) => {
                entry.0.len() > best_entry.0.len()
                    || (entry.0.len() == best_entry.0.len() && at < best_at)
            }
        };
        if better {
            best = Some((at, entry));
        }
    }

    let (at, &(phrase, job_type, quality)) = best?;
    Some(JobTypeHit {
        guess: JobTypeGuess {
            job_type,
            keyword: text[at..at + phrase.len()].to_string(),
            quality,
        },
        first_keyword_at: first_keyword_at.unwrap_or(at),
    })
}

/// Splits on pipes, colons, en/em dashes and spaced hyphens.
fn segments(text: &str) -> Vec<String> {
    text.replace(" - ", "|")
        .split(['|', ':', '\u{2013}', '\u{2014}'])
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ',' | '.')))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn builder_guess(title: &str, first_keyword_at: Option<usize>) -> Option<String> {
    match first_keyword_at {
        Some(at) => segments(&title[..at]).pop().or_else(|| {
            // Keyword leads the title ("Final - MI Homes"): take the first keyword-free segment.
            segments(title)
                .into_iter()
                .find(|s| find_job_type(s).is_none())
        }),
        None => segments(title).into_iter().next(),
    }
}

fn strip_token(token: &str) -> &str {
    token.trim_matches(|c: char| matches!(c, ',' | '.' | ';' | '(' | ')'))
}

fn is_house_number(token: &str) -> bool {
    let digits = strip_token(token);
    (1..=6).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_address_word(token: &str) -> bool {
    let word = strip_token(token);
    !word.is_empty()
        && word.chars().any(|c| c.is_alphabetic())
        && word.chars().all(|c| c.is_alphanumeric() || matches!(c, '\'' | '-' | '#'))
}

/// House number, then up to a few words, ending at a street suffix or a delimiter.
pub fn find_address(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for start in 0..tokens.len() {
        if !is_house_number(tokens[start]) {
            continue;
        }
        let mut words: Vec<&str> = Vec::new();
        let mut closed = false;
        for token in &tokens[start + 1..] {
            if words.len() == MAX_ADDRESS_WORDS || !is_address_word(token) {
                // A delimiter after two or more words still closes the address.
                closed = words.len() >= 2 && matches!(strip_token(token), "|" | "-" | "\u{2013}" | "\u{2014}");
                break;
            }
            let word = strip_token(token);
            words.push(word);
            if STREET_SUFFIXES.contains(&word.to_ascii_lowercase().as_str()) {
                closed = true;
                break;
            }
            if token.ends_with(',') && words.len() >= 2 {
                closed = true;
                break;
            }
        }
        if closed {
            let mut parts = vec![strip_token(tokens[start])];
            parts.extend(words);
            return Some(parts.join(" "));
        }
    }
    None
}

pub fn detect_urgency(text: &str) -> UrgencyLevel {
    let lower = text.to_ascii_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| contains_word(&lower, w));
    if any(URGENT_WORDS) {
        UrgencyLevel::Urgent
    } else if any(LOW_WORDS) {
        UrgencyLevel::Low
    } else if any(HIGH_WORDS) {
        UrgencyLevel::High
    } else {
        UrgencyLevel::Medium
    }
}

fn coordinate_run(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
        .unwrap_or(s.len());
    &s[..end]
}

fn parse_coordinate(s: &str) -> Option<f64> {
    if !s.contains('.') {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Finds a `lat,lon` decimal pair in a location string.
pub fn extract_coordinates(text: &str) -> Option<GeoPoint> {
    for (comma, _) in text.match_indices(',') {
        let left = text[..comma].trim_end();
        let left_start = left
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let right = coordinate_run(text[comma + 1..].trim_start());

        let (Some(lat), Some(lon)) = (parse_coordinate(&left[left_start..]), parse_coordinate(right))
        else {
            continue;
        };
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            return Some(GeoPoint { lat, lon });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(title: &str, description: &str, location: &str) -> RawCalendarEvent {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 13, 0, 0).single().unwrap();
        RawCalendarEvent {
            external_id: "evt".into(),
            calendar_id: "ops".into(),
            title: title.into(),
            description: description.into(),
            location: location.into(),
            start_at: start,
            end_at: start,
        }
    }

    #[test]
    fn builder_precedes_the_job_type_keyword() {
        let parsed = parse_event(&event("MI Homes - Rough Duct 3/15", "", ""));
        assert_eq!(parsed.builder_guess.as_deref(), Some("MI Homes"));
        let job = parsed.job_type.expect("job type");
        assert_eq!(job.job_type, JobType::RoughDuct);
        assert_eq!(job.keyword, "Rough Duct");
        assert_eq!(job.quality, JobTypeQuality::Specific);
        assert_eq!(parsed.urgency, UrgencyLevel::Medium);
    }

    #[test]
    fn longest_phrase_wins_and_generic_words_are_generic() {
        let blower = parse_event(&event("Ryan Homes: blower door test", "", ""));
        assert_eq!(blower.job_type.as_ref().map(|j| j.job_type), Some(JobType::BlowerDoor));
        assert_eq!(blower.builder_guess.as_deref(), Some("Ryan Homes"));

        let fin = parse_event(&event("Pulte | Final | ASAP", "", ""));
        let job = fin.job_type.expect("job type");
        assert_eq!(job.job_type, JobType::Final);
        assert_eq!(job.quality, JobTypeQuality::Generic);
        assert_eq!(fin.builder_guess.as_deref(), Some("Pulte"));
        assert_eq!(fin.urgency, UrgencyLevel::Urgent);
    }

    #[test]
    fn keywords_inside_other_words_do_not_count() {
        let parsed = parse_event(&event("Productive meeting with Roughrider Co", "", ""));
        assert!(parsed.job_type.is_none());
        assert_eq!(
            parsed.builder_guess.as_deref(),
            Some("Productive meeting with Roughrider Co")
        );
    }

    #[test]
    fn leading_keyword_takes_builder_from_later_segment() {
        let parsed = parse_event(&event("Final - Lennar", "", ""));
        assert_eq!(parsed.builder_guess.as_deref(), Some("Lennar"));
    }

    #[test]
    fn address_search_prefers_location_then_description() {
        let parsed = parse_event(&event(
            "Pulte | Final",
            "Final testing for 88 Oak Hollow Ln, gate code 12",
            "1423 Maple Ridge Dr, Raleigh NC",
        ));
        assert_eq!(parsed.address_guess.as_deref(), Some("1423 Maple Ridge Dr"));

        let parsed = parse_event(&event(
            "Pulte | Final",
            "Final testing for 88 Oak Hollow Ln, gate code 12",
            "",
        ));
        assert_eq!(parsed.address_guess.as_deref(), Some("88 Oak Hollow Ln"));
    }

    #[test]
    fn address_needs_a_suffix_or_delimiter() {
        assert_eq!(find_address("702 Cedar Ct"), Some("702 Cedar Ct".into()));
        assert_eq!(
            find_address("Lot at 55 Twin Oaks, Apex"),
            Some("55 Twin Oaks".into())
        );
        assert_eq!(find_address("Rough Duct 3/15"), None);
        assert_eq!(find_address("Lot 14 Gate code 4411"), None);
    }

    #[test]
    fn urgency_keywords() {
        assert_eq!(detect_urgency("EMERGENCY re-test"), UrgencyLevel::Urgent);
        assert_eq!(detect_urgency("low priority, whenever"), UrgencyLevel::Low);
        assert_eq!(detect_urgency("schedule is flexible"), UrgencyLevel::Low);
        assert_eq!(detect_urgency("Rush job"), UrgencyLevel::High);
        assert_eq!(detect_urgency("priority customer"), UrgencyLevel::High);
        assert_eq!(detect_urgency("crushed stone delivery"), UrgencyLevel::Medium);
    }

    #[test]
    fn unrecognizable_events_parse_to_empty_fields() {
        let parsed = parse_event(&event("", "", ""));
        assert_eq!(parsed, ParsedCandidate::default());

        let parsed = parse_event(&event("some inspection maybe?", "", ""));
        assert!(parsed.job_type.is_none());
        assert!(parsed.address_guess.is_none());
    }

    #[test]
    fn coordinates_are_read_from_location() {
        let point = extract_coordinates("1423 Maple Ridge Dr, Raleigh NC, 35.7796,-78.6382")
            .expect("coordinates");
        assert!((point.lat - 35.7796).abs() < 1e-9);
        assert!((point.lon + 78.6382).abs() < 1e-9);
        assert!(extract_coordinates("1423 Maple Ridge Dr, Raleigh NC").is_none());
        assert!(extract_coordinates("135.0, 20.5").is_none());
    }
}

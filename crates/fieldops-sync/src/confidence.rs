use chrono::{DateTime, Duration, Utc};
use fieldops_core::{BuilderMatch, JobTypeQuality, ParsedCandidate};

use crate::config::ScoringConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInputs {
    pub builder_score: u8,
    pub job_type: Option<JobTypeQuality>,
    pub has_address: bool,
    pub start_at: DateTime<Utc>,
}

impl ConfidenceInputs {
    pub fn from_signals(
        parsed: &ParsedCandidate,
        builder_match: &BuilderMatch,
        start_at: DateTime<Utc>,
    ) -> Self {
        Self {
            builder_score: builder_match.score,
            job_type: parsed.job_type.as_ref().map(|j| j.quality),
            has_address: parsed.address_guess.is_some(),
            start_at,
        }
    }
}

/// False when the event starts too far in the past or too far ahead.
pub fn date_is_plausible(start_at: DateTime<Utc>, now: DateTime<Utc>, config: &ScoringConfig) -> bool {
    start_at >= now - Duration::hours(config.grace_hours)
        && start_at <= now + Duration::days(config.horizon_days)
}

/// Weighted 0..=100 score. Monotonic non-decreasing in every input.
pub fn score_confidence(inputs: &ConfidenceInputs, now: DateTime<Utc>, config: &ScoringConfig) -> u8 {
    let builder = f64::from(inputs.builder_score.min(100)) * config.builder_weight;
    let job_type = match inputs.job_type {
        Some(JobTypeQuality::Specific) => config.specific_job_type_points,
        Some(JobTypeQuality::Generic) => config.generic_job_type_points,
        None => 0.0,
    };
    let address = if inputs.has_address {
        config.address_points
    } else {
        0.0
    };

    let plausible = date_is_plausible(inputs.start_at, now, config);
    let mut total = builder + job_type + address;
    if plausible {
        total += config.date_points;
    } else {
        total = total.min(f64::from(config.disqualified_cap));
    }
    total.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn inputs(builder_score: u8, job_type: Option<JobTypeQuality>, has_address: bool) -> ConfidenceInputs {
        ConfidenceInputs {
            builder_score,
            job_type,
            has_address,
            start_at: now() + Duration::days(5),
        }
    }

    #[test]
    fn exact_builder_with_specific_job_type_clears_auto_create() {
        let cfg = ScoringConfig::default();
        let score = score_confidence(&inputs(100, Some(JobTypeQuality::Specific), false), now(), &cfg);
        assert_eq!(score, 90);
        let score = score_confidence(&inputs(100, Some(JobTypeQuality::Specific), true), now(), &cfg);
        assert_eq!(score, 100);
    }

    #[test]
    fn unmatched_builder_stays_low() {
        let cfg = ScoringConfig::default();
        assert_eq!(score_confidence(&inputs(0, None, false), now(), &cfg), 10);
    }

    #[test]
    fn implausible_dates_cap_the_score() {
        let cfg = ScoringConfig::default();
        let mut stale = inputs(100, Some(JobTypeQuality::Specific), true);
        stale.start_at = now() - Duration::hours(25);
        assert_eq!(score_confidence(&stale, now(), &cfg), 20);

        let mut far = stale;
        far.start_at = now() + Duration::days(400);
        assert_eq!(score_confidence(&far, now(), &cfg), 20);

        let mut recent = stale;
        recent.start_at = now() - Duration::hours(23);
        assert_eq!(score_confidence(&recent, now(), &cfg), 100);
    }

    #[test]
    fn score_never_drops_when_a_signal_improves() {
        let cfg = ScoringConfig::default();
        let qualities = [None, Some(JobTypeQuality::Generic), Some(JobTypeQuality::Specific)];
        let starts = [now() - Duration::days(3), now() + Duration::days(2)];
        let builder_scores = [0u8, 36, 54, 70, 90, 100];

        for start_at in starts {
            for has_address in [false, true] {
                for quality in qualities {
                    let mut previous = 0;
                    for builder_score in builder_scores {
                        let score = score_confidence(
                            &ConfidenceInputs { builder_score, job_type: quality, has_address, start_at },
                            now(),
                            &cfg,
                        );
                        assert!(score >= previous);
                        previous = score;
                    }
                }
            }
        }

        for builder_score in builder_scores {
            let base = inputs(builder_score, None, false);
            let generic = inputs(builder_score, Some(JobTypeQuality::Generic), false);
            let specific = inputs(builder_score, Some(JobTypeQuality::Specific), false);
            let with_address = inputs(builder_score, Some(JobTypeQuality::Specific), true);
            let mut stale = with_address;
            stale.start_at = now() - Duration::days(3);

            let s = |i: &ConfidenceInputs| score_confidence(i, now(), &cfg);
            assert!(s(&base) <= s(&generic));
            assert!(s(&generic) <= s(&specific));
            assert!(s(&specific) <= s(&with_address));
            assert!(s(&stale) <= s(&with_address));
        }
    }
}

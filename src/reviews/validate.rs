//! Review submission validation
//!
//! Validates an incoming submission against structural and business rules,
//! collecting every violation instead of failing fast so the caller can fix
//! the whole payload in one round trip.
//!
//! Two historically contested rules are configuration rather than constants:
//! which ratings are mandatory (`RatingPolicy`) and whether the narrative is
//! mandatory (`narrative_required`).

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::db::schemas::Ratings;
use crate::flags::{self, FlagVocabulary, NEGATIVE_FLAGS, POSITIVE_FLAGS};

/// Which ratings a submission must supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingPolicy {
    /// Only the behavior rating is mandatory
    BehaviorOnly,
    /// All five ratings are mandatory
    AllFive,
}

/// Submission validation policy, resolved from configuration at startup
#[derive(Debug, Clone, Copy)]
pub struct ValidationPolicy {
    pub required_ratings: RatingPolicy,
    pub narrative_required: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            required_ratings: RatingPolicy::BehaviorOnly,
            narrative_required: true,
        }
    }
}

/// Raw review submission payload.
///
/// Ratings arrive as raw JSON values so that a non-numeric rating is a
/// collectable violation, not a deserialization failure. Legacy clients used
/// `avaliadoId`/`avaliado_id` for the subject reference and `confidence` for
/// the trust rating; those aliases are resolved here at the boundary and
/// nowhere else.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitReviewRequest {
    #[serde(alias = "avaliadoId", alias = "avaliado_id")]
    pub subject_id: Option<String>,

    pub subject_name: Option<String>,

    pub city: Option<String>,

    pub contact: Option<String>,

    pub behavior: Option<Value>,

    #[serde(alias = "emotional_safety")]
    pub emotional_safety: Option<Value>,

    pub respect: Option<Value>,

    pub character: Option<Value>,

    #[serde(alias = "confidence")]
    pub trust: Option<Value>,

    pub positive_flags: Option<Value>,

    pub negative_flags: Option<Value>,

    pub anonymous: Option<bool>,

    pub public: Option<bool>,

    pub narrative: Option<String>,
}

/// Fully normalized review-creation record, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReview {
    /// Existing subject reference, when the payload supplied one
    pub subject_id: Option<String>,
    /// Subject name for lazy creation, when supplied
    pub subject_name: Option<String>,
    pub city: Option<String>,
    pub contact: Option<String>,
    /// All five ratings as integers in [0,5]; 0 = not supplied
    pub ratings: Ratings,
    pub narrative: String,
    pub positive_flags: BTreeSet<String>,
    pub negative_flags: BTreeSet<String>,
    pub anonymous: bool,
    pub public: bool,
}

/// Validate a submission, returning either the normalized record or the
/// complete list of violations.
pub fn validate(
    payload: &SubmitReviewRequest,
    policy: &ValidationPolicy,
) -> Result<NormalizedReview, Vec<String>> {
    validate_inner(payload, policy, true)
}

/// Validate an edit payload. Edits never move a review to another subject,
/// so the subject fields are ignored rather than required.
pub fn validate_edit(
    payload: &SubmitReviewRequest,
    policy: &ValidationPolicy,
) -> Result<NormalizedReview, Vec<String>> {
    validate_inner(payload, policy, false)
}

fn validate_inner(
    payload: &SubmitReviewRequest,
    policy: &ValidationPolicy,
    require_subject: bool,
) -> Result<NormalizedReview, Vec<String>> {
    let mut violations = Vec::new();

    let subject_id = trim_to_none(payload.subject_id.as_deref());
    let subject_name = trim_to_none(payload.subject_name.as_deref());

    if require_subject {
        if payload.subject_id.is_some() && subject_id.is_none() {
            violations.push("subjectId must be a non-empty string".to_string());
        }
        // Without an explicit subject reference, the name is what the subject
        // is created or matched from
        if subject_id.is_none() && subject_name.is_none() && payload.subject_id.is_none() {
            violations.push("subjectName must not be empty".to_string());
        } else if payload.subject_name.is_some() && subject_name.is_none() {
            violations.push("subjectName must not be empty".to_string());
        }
    }

    let narrative = payload
        .narrative
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if policy.narrative_required && narrative.is_empty() {
        violations.push("narrative must not be empty".to_string());
    }

    let behavior = parse_rating("behavior", payload.behavior.as_ref(), &mut violations);
    let emotional_safety = parse_rating(
        "emotionalSafety",
        payload.emotional_safety.as_ref(),
        &mut violations,
    );
    let respect = parse_rating("respect", payload.respect.as_ref(), &mut violations);
    let character = parse_rating("character", payload.character.as_ref(), &mut violations);
    let trust = parse_rating("trust", payload.trust.as_ref(), &mut violations);

    // A field that already failed to parse is reported once, not also as
    // missing
    match policy.required_ratings {
        RatingPolicy::BehaviorOnly => {
            if behavior == Some(0) {
                violations.push("behavior rating is required".to_string());
            }
        }
        RatingPolicy::AllFive => {
            for (name, value) in [
                ("behavior", behavior),
                ("emotionalSafety", emotional_safety),
                ("respect", respect),
                ("character", character),
                ("trust", trust),
            ] {
                if value == Some(0) {
                    violations.push(format!("{} rating is required", name));
                }
            }
        }
    }

    let positive_flags = parse_flags(
        "positiveFlags",
        payload.positive_flags.as_ref(),
        &POSITIVE_FLAGS,
        &mut violations,
    );
    let negative_flags = parse_flags(
        "negativeFlags",
        payload.negative_flags.as_ref(),
        &NEGATIVE_FLAGS,
        &mut violations,
    );

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(NormalizedReview {
        subject_id,
        subject_name,
        city: trim_to_none(payload.city.as_deref()),
        contact: trim_to_none(payload.contact.as_deref()),
        ratings: Ratings {
            behavior: behavior.unwrap_or(0),
            emotional_safety: emotional_safety.unwrap_or(0),
            respect: respect.unwrap_or(0),
            character: character.unwrap_or(0),
            trust: trust.unwrap_or(0),
        },
        narrative,
        positive_flags,
        negative_flags,
        anonymous: payload.anonymous.unwrap_or(true),
        public: payload.public.unwrap_or(true),
    })
}

fn trim_to_none(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse one rating field: absent or null means 0 ("not supplied"),
/// anything non-integer or outside [0,5] is a violation.
///
/// Returns None when the value was present but invalid, so required-rating
/// checks don't double-report the same field.
fn parse_rating(name: &str, value: Option<&Value>, violations: &mut Vec<String>) -> Option<i32> {
    let value = match value {
        None | Some(Value::Null) => return Some(0),
        Some(v) => v,
    };

    let number = match value.as_i64() {
        Some(n) => n,
        None => {
            if value.is_number() {
                violations.push(format!("{} must be an integer between 1 and 5", name));
            } else {
                violations.push(format!("{} must be a number", name));
            }
            return None;
        }
    };

    if !(0..=5).contains(&number) {
        violations.push(format!("{} must be an integer between 1 and 5", name));
        return None;
    }

    Some(number as i32)
}

/// Parse one flag array: absent means empty, non-array shapes are a
/// violation, and elements go through the normalizer (unknown tags and
/// non-string elements are dropped silently).
fn parse_flags(
    name: &str,
    value: Option<&Value>,
    vocabulary: &FlagVocabulary,
    violations: &mut Vec<String>,
) -> BTreeSet<String> {
    let value = match value {
        None | Some(Value::Null) => return BTreeSet::new(),
        Some(v) => v,
    };

    let items = match value.as_array() {
        Some(items) => items,
        None => {
            violations.push(format!("{} must be an array", name));
            return BTreeSet::new();
        }
    };

    flags::normalize(items.iter().filter_map(Value::as_str), vocabulary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: serde_json::Value) -> SubmitReviewRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_valid_submission_behavior_only() {
        let req = request(json!({
            "subjectName": " Carlos Mendes ",
            "city": "São Paulo",
            "behavior": 5,
            "narrative": "Respectful the whole evening.",
            "positiveFlags": ["Respectful", "punctual"]
        }));

        let normalized = validate(&req, &ValidationPolicy::default()).unwrap();
        assert_eq!(normalized.subject_name.as_deref(), Some("Carlos Mendes"));
        assert_eq!(normalized.ratings.behavior, 5);
        assert_eq!(normalized.ratings.trust, 0);
        assert!(normalized.anonymous);
        assert!(normalized.public);
        assert!(normalized.positive_flags.contains("respectful"));
        assert!(normalized.positive_flags.contains("punctual"));
    }

    #[test]
    fn test_all_violations_collected() {
        let req = request(json!({
            "subjectName": "   ",
            "behavior": "five",
            "respect": 9,
            "positiveFlags": "respectful",
            "narrative": ""
        }));

        let violations = validate(&req, &ValidationPolicy::default()).unwrap_err();
        assert!(violations.contains(&"subjectName must not be empty".to_string()));
        assert!(violations.contains(&"narrative must not be empty".to_string()));
        assert!(violations.contains(&"behavior must be a number".to_string()));
        assert!(violations
            .contains(&"respect must be an integer between 1 and 5".to_string()));
        assert!(violations.contains(&"positiveFlags must be an array".to_string()));
    }

    #[test]
    fn test_legacy_aliases_resolve() {
        let req = request(json!({
            "avaliadoId": "64b2f0c8a1d2e3f4a5b6c7d8",
            "behavior": 4,
            "confidence": 5,
            "narrative": "ok"
        }));

        let normalized = validate(&req, &ValidationPolicy::default()).unwrap();
        assert_eq!(
            normalized.subject_id.as_deref(),
            Some("64b2f0c8a1d2e3f4a5b6c7d8")
        );
        assert_eq!(normalized.ratings.trust, 5);
    }

    #[test]
    fn test_subject_id_alone_is_enough() {
        let req = request(json!({
            "subjectId": "abc",
            "behavior": 3,
            "narrative": "fine"
        }));
        assert!(validate(&req, &ValidationPolicy::default()).is_ok());
    }

    #[test]
    fn test_blank_subject_id_rejected() {
        let req = request(json!({
            "subjectId": "   ",
            "subjectName": "Ana",
            "behavior": 3,
            "narrative": "fine"
        }));
        let violations = validate(&req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(
            violations,
            vec!["subjectId must be a non-empty string".to_string()]
        );
    }

    #[test]
    fn test_missing_behavior_rejected() {
        let req = request(json!({
            "subjectName": "Ana",
            "respect": 5,
            "narrative": "fine"
        }));
        let violations = validate(&req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(violations, vec!["behavior rating is required".to_string()]);
    }

    #[test]
    fn test_all_five_policy() {
        let policy = ValidationPolicy {
            required_ratings: RatingPolicy::AllFive,
            narrative_required: true,
        };
        let req = request(json!({
            "subjectName": "Ana",
            "behavior": 5,
            "respect": 4,
            "narrative": "fine"
        }));
        let violations = validate(&req, &policy).unwrap_err();
        assert!(violations.contains(&"emotionalSafety rating is required".to_string()));
        assert!(violations.contains(&"character rating is required".to_string()));
        assert!(violations.contains(&"trust rating is required".to_string()));
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_optional_narrative_policy() {
        let policy = ValidationPolicy {
            required_ratings: RatingPolicy::BehaviorOnly,
            narrative_required: false,
        };
        let req = request(json!({
            "subjectName": "Ana",
            "behavior": 2
        }));
        let normalized = validate(&req, &policy).unwrap();
        assert_eq!(normalized.narrative, "");
    }

    #[test]
    fn test_unknown_flags_dropped_silently() {
        let req = request(json!({
            "subjectName": "Ana",
            "behavior": 1,
            "narrative": "bad",
            "negativeFlags": ["Ghosting", "levitating", 42]
        }));
        let normalized = validate(&req, &ValidationPolicy::default()).unwrap();
        assert_eq!(
            normalized.negative_flags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["ghosting"]
        );
    }

    #[test]
    fn test_city_and_contact_trimmed_to_none() {
        let req = request(json!({
            "subjectName": "Ana",
            "behavior": 3,
            "narrative": "ok",
            "city": "   ",
            "contact": " @ana "
        }));
        let normalized = validate(&req, &ValidationPolicy::default()).unwrap();
        assert_eq!(normalized.city, None);
        assert_eq!(normalized.contact.as_deref(), Some("@ana"));
    }

    #[test]
    fn test_edit_payload_needs_no_subject() {
        let req = request(json!({
            "behavior": 4,
            "narrative": "updated after a second meeting"
        }));
        let normalized = validate_edit(&req, &ValidationPolicy::default()).unwrap();
        assert_eq!(normalized.subject_id, None);
        assert_eq!(normalized.ratings.behavior, 4);
    }

    #[test]
    fn test_edit_payload_still_checks_ratings() {
        let req = request(json!({
            "behavior": 7,
            "narrative": "x"
        }));
        let violations = validate_edit(&req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(
            violations,
            vec!["behavior must be an integer between 1 and 5".to_string()]
        );
    }

    #[test]
    fn test_explicit_anonymous_false_preserved() {
        let req = request(json!({
            "subjectName": "Ana",
            "behavior": 3,
            "narrative": "ok",
            "anonymous": false,
            "public": false
        }));
        let normalized = validate(&req, &ValidationPolicy::default()).unwrap();
        assert!(!normalized.anonymous);
        assert!(!normalized.public);
    }
}

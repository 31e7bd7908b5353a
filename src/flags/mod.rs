//! Flag normalization
//!
//! Reviews carry behavioral tags picked (or typed) by the author. Tags are
//! mapped to a fixed canonical vocabulary before storage; anything that
//! doesn't match is silently dropped. This is best-effort tagging, not
//! validation — a misspelled tag loses the tag, never the review.

use std::collections::BTreeSet;

/// A fixed vocabulary of canonical tags: (slug, display label) pairs.
///
/// The positive and negative vocabularies are disjoint.
pub struct FlagVocabulary {
    entries: &'static [(&'static str, &'static str)],
}

/// Positive behavioral tags
pub static POSITIVE_FLAGS: FlagVocabulary = FlagVocabulary {
    entries: &[
        ("respectful", "Respectful"),
        ("honest", "Honest"),
        ("attentive", "Attentive"),
        ("good_listener", "Good listener"),
        ("punctual", "Punctual"),
        ("generous", "Generous"),
        ("supportive", "Supportive"),
        ("consistent", "Consistent"),
        ("good_communicator", "Good communicator"),
    ],
};

/// Negative behavioral tags
pub static NEGATIVE_FLAGS: FlagVocabulary = FlagVocabulary {
    entries: &[
        ("disrespectful", "Disrespectful"),
        ("dishonest", "Dishonest"),
        ("aggressive", "Aggressive"),
        ("manipulative", "Manipulative"),
        ("controlling", "Controlling"),
        ("ghosting", "Ghosting"),
        ("unreliable", "Unreliable"),
        ("pressuring", "Pressuring"),
        ("disappeared_after_date", "Disappeared after date"),
    ],
};

impl FlagVocabulary {
    /// Resolve one raw tag to its canonical slug.
    ///
    /// Matches the canonical slug first, then the display label,
    /// case-insensitively after trimming. Returns None for anything
    /// outside the vocabulary.
    pub fn lookup(&self, raw: &str) -> Option<&'static str> {
        let needle = raw.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        if let Some((slug, _)) = self.entries.iter().find(|(slug, _)| *slug == needle) {
            return Some(slug);
        }

        self.entries
            .iter()
            .find(|(_, label)| label.eq_ignore_ascii_case(&needle))
            .map(|(slug, _)| *slug)
    }

    /// Whether a slug belongs to this vocabulary
    pub fn contains_slug(&self, slug: &str) -> bool {
        self.entries.iter().any(|(s, _)| *s == slug)
    }

    /// All canonical slugs
    pub fn slugs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(slug, _)| *slug)
    }
}

/// Map raw tags to canonical slugs against one vocabulary.
///
/// Unmatched input is dropped, output is deduplicated, and the returned set
/// iterates in a deterministic (lexicographic) order regardless of input
/// order.
pub fn normalize<I, S>(raw: I, vocabulary: &FlagVocabulary) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|flag| vocabulary.lookup(flag.as_ref()))
        .map(String::from)
        .collect()
}

//! Focus filtering and per-channel preferences.

use crate::sitmap_store::Observation;
use serde::{Deserialize, Serialize};

/// Per-channel render preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    /// Lower-cased, non-empty focus terms
    pub focus_terms: Vec<String>,
}

impl ChannelPreferences {
    /// Replace focus terms, lower-casing them and dropping empties.
    pub fn set_focus<I, S>(&mut self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.focus_terms = normalize_terms(terms);
    }

    pub fn clear_focus(&mut self) {
        self.focus_terms.clear();
    }

    pub fn has_focus(&self) -> bool {
        !self.focus_terms.is_empty()
    }
}

pub fn normalize_terms<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    terms
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse a priority selector "p1".."p4" (case-insensitive).
pub fn priority_selector(term: &str) -> Option<u8> {
    let mut chars = term.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('p' | 'P'), Some(d), None) => d.to_digit(10).map(|d| d as u8),
        _ => None,
    }
}

/// True if no focus is set, or any term selects the observation by
/// priority or appears in its description, unit, observer or tags.
pub fn matches(obs: &Observation, focus_terms: &[String]) -> bool {
    if focus_terms.is_empty() {
        return true;
    }

    let haystack = [
        Some(obs.text.as_str()),
        obs.what.as_deref(),
        obs.unit.as_deref(),
        obs.observer.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();

    focus_terms.iter().any(|term| {
        let term = term.to_lowercase();
        if priority_selector(&term) == Some(obs.priority) {
            return true;
        }
        haystack.contains(&term) || obs.tags.iter().any(|tag| tag.contains(&term))
    })
}

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::run_info::Entities;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Variable-name matching: two independent strategies
// ---------------------------------------------------------------------------

/// How a variable-name pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Regular expression, matched anywhere in the name.
    Regex,
    /// Shell-style wildcard matched against the whole name.
    #[default]
    Glob,
}

pub trait NameMatcher {
    fn is_match(&self, name: &str) -> bool;
}

/// Regex search: `'^.{1,2}a'` matches `gain` but not `PTval`.
pub struct RegexMatcher(Regex);

impl RegexMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(RegexMatcher(Regex::new(pattern)?))
    }
}

impl NameMatcher for RegexMatcher {
    fn is_match(&self, name: &str) -> bool {
        self.0.is_match(name)
    }
}

/// Wildcard match over the whole name.
///
/// `*` matches any run of characters (including none), `?` exactly one
/// character; every other character, regex metacharacters included, matches
/// itself.
pub struct GlobMatcher {
    pattern: Vec<char>,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Self {
        GlobMatcher {
            pattern: pattern.chars().collect(),
        }
    }
}

impl NameMatcher for GlobMatcher {
    fn is_match(&self, name: &str) -> bool {
        let text: Vec<char> = name.chars().collect();
        let pat = &self.pattern;
        let (mut p, mut t) = (0, 0);
        // Position of the last `*` and the text index it is currently
        // absorbing up to; lets us backtrack one star at a time.
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < pat.len() && (pat[p] == '?' || (pat[p] != '*' && pat[p] == text[t])) {
                p += 1;
                t += 1;
            } else if p < pat.len() && pat[p] == '*' {
                star = Some((p, t));
                p += 1;
            } else if let Some((sp, st)) = star {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            } else {
                return false;
            }
        }
        pat[p..].iter().all(|&c| c == '*')
    }
}

/// Build the matcher for `match_type`.
pub fn name_matcher(pattern: &str, match_type: MatchType) -> Result<Box<dyn NameMatcher>> {
    Ok(match match_type {
        MatchType::Regex => Box::new(RegexMatcher::new(pattern)?),
        MatchType::Glob => Box::new(GlobMatcher::new(pattern)),
    })
}

// ---------------------------------------------------------------------------
// Run selection by entity values
// ---------------------------------------------------------------------------

/// Per-entity selection: maps entity key → accepted values.
pub type EntityFilter = BTreeMap<String, BTreeSet<String>>;

/// Build a filter accepting one value per entity.
pub fn entity_filter<K, V, I>(pairs: I) -> EntityFilter
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut filter = EntityFilter::new();
    for (k, v) in pairs {
        filter.entry(k.into()).or_default().insert(v.into());
    }
    filter
}

/// Whether a run with `entities` passes every constraint in `filter`.
///
/// * An entity absent from `filter` → no constraint
/// * An empty accepted set → nothing selected → fails
/// * A run lacking a constrained entity → fails
pub fn run_passes(entities: &Entities, filter: &EntityFilter) -> bool {
    filter.iter().all(|(key, accepted)| {
        !accepted.is_empty()
            && entities
                .get(key)
                .map(|value| accepted.contains(value))
                .unwrap_or(false)
    })
}

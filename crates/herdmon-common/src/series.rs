//! Metric series identifiers.
//!
//! A [`Series`] names one metric stream, e.g. `"ns:web RequestCount"`. Names
//! are split into segments on `' '` and `':'`; a segment may contain the
//! wildcards `*` and `?`, which turns the series into a *pattern*. Patterns
//! are only ever used for querying — storage keys are always concrete.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Rejection reasons for series names that fail the name grammar.
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("series name must not be empty")]
    Empty,

    #[error("series name '{name}' contains an empty segment")]
    EmptySegment { name: String },

    #[error("series name '{name}' contains invalid character '{ch}'")]
    InvalidChar { name: String, ch: char },
}

/// Identifier of one metric stream, concrete or wildcard pattern.
///
/// Cheap to clone and usable as a map key; two series are equal when their
/// names are equal. Pattern series (containing `*` or `?`) match concrete
/// series segment-wise, see [`Series::matches`].
#[derive(Debug, Clone, Eq)]
pub struct Series {
    name: Arc<str>,
    pattern: bool,
}

impl Series {
    /// Parses and validates a series name.
    ///
    /// # Errors
    ///
    /// Returns a [`SeriesError`] when the name is empty, has an empty
    /// segment, or contains a character outside `[A-Za-z0-9._@/-]` and the
    /// wildcards.
    pub fn new(name: &str) -> Result<Self, SeriesError> {
        if name.is_empty() {
            return Err(SeriesError::Empty);
        }
        let mut pattern = false;
        for segment in name.split(DELIMITERS) {
            if segment.is_empty() {
                return Err(SeriesError::EmptySegment {
                    name: name.to_string(),
                });
            }
            for ch in segment.chars() {
                match ch {
                    '*' | '?' => pattern = true,
                    c if c.is_ascii_alphanumeric() => {}
                    '.' | '_' | '@' | '/' | '-' => {}
                    c => {
                        return Err(SeriesError::InvalidChar {
                            name: name.to_string(),
                            ch: c,
                        })
                    }
                }
            }
        }
        Ok(Self {
            name: Arc::from(name),
            pattern,
        })
    }

    /// The pattern matching every concrete series.
    pub fn any() -> Self {
        Self {
            name: Arc::from("*"),
            pattern: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// True when any segment contains a wildcard. Pattern series are never
    /// stored, only matched against stored concrete series.
    pub fn is_pattern(&self) -> bool {
        self.pattern
    }

    pub fn is_any(&self) -> bool {
        &*self.name == "*"
    }

    /// Segment-wise wildcard match of this series against a candidate.
    ///
    /// A concrete series matches only itself (by name equality); the
    /// [`Series::any`] pattern matches everything; any other pattern matches
    /// when segment counts agree and every pattern segment glob-matches the
    /// candidate segment.
    pub fn matches(&self, candidate: &Series) -> bool {
        if !self.pattern {
            return self == candidate;
        }
        if self.is_any() {
            return true;
        }
        let mine: Vec<&str> = self.name.split(DELIMITERS).collect();
        let theirs: Vec<&str> = candidate.name.split(DELIMITERS).collect();
        if mine.len() != theirs.len() {
            return false;
        }
        mine.iter()
            .zip(theirs.iter())
            .all(|(pat, seg)| *pat == "*" || glob_match::glob_match(pat, seg))
    }
}

const DELIMITERS: [char; 2] = [' ', ':'];

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for Series {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Series {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Series {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Series::new(&name).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_series_is_not_a_pattern() {
        let series = Series::new("ns:web RequestCount").unwrap();
        assert!(!series.is_pattern());
        assert_eq!(series.as_str(), "ns:web RequestCount");
    }

    #[test]
    fn wildcard_segment_makes_a_pattern() {
        assert!(Series::new("ns:web *").unwrap().is_pattern());
        assert!(Series::new("ns:we? RequestCount").unwrap().is_pattern());
        assert!(Series::any().is_pattern());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(Series::new("").is_err());
        assert!(Series::new("ns: RequestCount").is_err());
        assert!(Series::new("ns:web ").is_err());
        assert!(Series::new("ns:web Request Count!").is_err());
    }

    #[test]
    fn pattern_matches_segment_wise() {
        let pattern = Series::new("ns:foo *").unwrap();
        assert!(pattern.matches(&Series::new("ns:foo bar").unwrap()));
        assert!(pattern.matches(&Series::new("ns:foo baz").unwrap()));
        assert!(!pattern.matches(&Series::new("ns:qux bar").unwrap()));
        assert!(!pattern.matches(&Series::new("ns:foo bar baz").unwrap()));
    }

    #[test]
    fn concrete_series_only_matches_itself() {
        let series = Series::new("ns:foo bar").unwrap();
        assert!(series.matches(&series.clone()));
        assert!(!series.matches(&Series::new("ns:foo baz").unwrap()));
    }

    #[test]
    fn any_matches_everything() {
        let any = Series::any();
        assert!(any.matches(&Series::new("a").unwrap()));
        assert!(any.matches(&Series::new("ns:foo bar").unwrap()));
    }

    #[test]
    fn question_mark_matches_single_character() {
        let pattern = Series::new("ns:web-0? RequestCount").unwrap();
        assert!(pattern.matches(&Series::new("ns:web-01 RequestCount").unwrap()));
        assert!(!pattern.matches(&Series::new("ns:web-012 RequestCount").unwrap()));
    }
}

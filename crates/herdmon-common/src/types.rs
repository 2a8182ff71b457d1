//! Core value types shared across the console crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::series::Series;

/// Alert severity level, ordered from lowest to highest.
///
/// `Green` doubles as the "normal" state of a watch and as the level of an
/// alert that has been cleared.
///
/// # Examples
///
/// ```
/// use herdmon_common::types::Level;
///
/// let level: Level = "amber".parse().unwrap();
/// assert_eq!(level, Level::Amber);
/// assert_eq!(level.to_string(), "amber");
/// assert!(Level::Red > Level::Amber);
/// assert!(Level::Green.is_less_severe_than(Level::Amber));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Green,
    Amber,
    Red,
}

impl Level {
    pub fn is_less_severe_than(self, other: Level) -> bool {
        self < other
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Green => write!(f, "green"),
            Level::Amber => write!(f, "amber"),
            Level::Red => write!(f, "red"),
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "green" => Ok(Level::Green),
            "amber" => Ok(Level::Amber),
            "red" => Ok(Level::Red),
            _ => Err(format!("unknown level: {s}")),
        }
    }
}

/// Unit of measurement attached to a watched metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Count,
    #[serde(rename = "ms")]
    Millis,
    #[serde(rename = "ns")]
    Nanos,
    Percent,
    Bytes,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Count => write!(f, "count"),
            Unit::Millis => write!(f, "ms"),
            Unit::Nanos => write!(f, "ns"),
            Unit::Percent => write!(f, "percent"),
            Unit::Bytes => write!(f, "bytes"),
        }
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Unit::Count),
            "ms" => Ok(Unit::Millis),
            "ns" => Ok(Unit::Nanos),
            "percent" | "%" => Ok(Unit::Percent),
            "bytes" => Ok(Unit::Bytes),
            _ => Err(format!("unknown unit: {s}")),
        }
    }
}

/// A watched metric: the series it lives in plus its unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub series: Series,
    pub unit: Unit,
}

impl Metric {
    pub fn new(series: Series, unit: Unit) -> Self {
        Self { series, unit }
    }
}

/// Comparison operator used by watch threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<=")]
    LessEqual,
}

impl CompareOp {
    pub fn check(self, value: i64, threshold: i64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
        }
    }

    /// Check against a fractional value, used for average-based conditions.
    pub fn check_avg(self, value: f64, threshold: i64) -> bool {
        let threshold = threshold as f64;
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThan => write!(f, ">"),
            Self::LessThan => write!(f, "<"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LessEqual => write!(f, "<="),
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" | "gt" => Ok(Self::GreaterThan),
            "<" | "lt" => Ok(Self::LessThan),
            ">=" | "gte" => Ok(Self::GreaterEqual),
            "<=" | "lte" => Ok(Self::LessEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

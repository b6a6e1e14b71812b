//! Package version ordering (epoch plus Debian-like text comparison).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModError;

/// A package release version, `"[epoch:]text"`.
///
/// Equality follows the ordering rule rather than the raw string, so
/// `"1.01" == "1.1"` and `"1.0" != "1.0.0"`.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    epoch: u64,
    text: String,
}

impl PackageVersion {
    pub fn new(epoch: u64, text: impl Into<String>) -> Self {
        Self {
            epoch,
            text: text.into(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Token sequence that equal versions share; used for hashing.
    fn normalized_tokens(&self) -> Vec<(&str, &str)> {
        let mut tokens = Vec::new();
        let mut rest = self.text.as_str();
        while !rest.is_empty() {
            let (non_digits, after) = split_leading(rest, |c| !c.is_ascii_digit());
            let (digits, after) = split_leading(after, |c| c.is_ascii_digit());
            tokens.push((non_digits, strip_zeros(digits)));
            rest = after;
        }
        tokens
    }
}

impl FromStr for PackageVersion {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((epoch, text)) if !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit()) => {
                let epoch = epoch.parse::<u64>().map_err(|e| {
                    ModError::metadata(None, format!("Invalid epoch in version {:?}: {}", s, e))
                })?;
                Ok(Self::new(epoch, text))
            }
            _ => Ok(Self::new(0, s)),
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:{}", self.epoch, self.text)
        } else {
            write!(f, "{}", self.text)
        }
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_text(&self.text, &other.text))
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.normalized_tokens().hash(state);
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn split_leading(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    let end = s.find(|c: char| !pred(c)).unwrap_or(s.len());
    s.split_at(end)
}

fn strip_zeros(digits: &str) -> &str {
    digits.trim_start_matches('0')
}

/// Compares the text part of two versions by alternating non-digit and digit runs.
fn compare_text(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    while !a.is_empty() && !b.is_empty() {
        let (a_str, a_rest) = split_leading(a, |c| !c.is_ascii_digit());
        let (b_str, b_rest) = split_leading(b, |c| !c.is_ascii_digit());
        let ord = compare_non_digit_runs(a_str, b_str);
        if ord != Ordering::Equal {
            return ord;
        }

        let (a_num, a_rest) = split_leading(a_rest, |c| c.is_ascii_digit());
        let (b_num, b_rest) = split_leading(b_rest, |c| c.is_ascii_digit());
        let ord = compare_digit_runs(a_num, b_num);
        if ord != Ordering::Equal {
            return ord;
        }

        a = a_rest;
        b = b_rest;
    }

    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}

fn compare_non_digit_runs(a: &str, b: &str) -> Ordering {
    if a.is_empty() || b.is_empty() {
        return a.cmp(b);
    }
    match (a.starts_with('.'), b.starts_with('.')) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) if a.len() == 1 && b.len() > 1 => Ordering::Greater,
        (true, true) if b.len() == 1 && a.len() > 1 => Ordering::Less,
        _ => a.cmp(b),
    }
}

/// Integer comparison of digit runs of any length; an empty run is zero.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = strip_zeros(a);
    let b = strip_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_epoch() {
        let version = v("2:1.0");
        assert_eq!(version.epoch(), 2);
        assert_eq!(version.text(), "1.0");
        assert_eq!(version.to_string(), "2:1.0");

        let version = v("1.0");
        assert_eq!(version.epoch(), 0);
        assert_eq!(version.to_string(), "1.0");
    }

    #[test]
    fn test_colon_without_numeric_epoch_is_text() {
        let version = v("v1:beta");
        assert_eq!(version.epoch(), 0);
        assert_eq!(version.text(), "v1:beta");
    }

    #[test]
    fn test_prefix_is_lesser() {
        assert!(v("1.2") < v("1.2.3"));
        assert!(v("1.2.3") > v("1.2"));
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(v("2:1.0") > v("1.99.99"));
        assert!(v("1:0.1") > v("99.0"));
    }

    #[test]
    fn test_numeric_runs_compare_as_integers() {
        assert!(v("1.10") > v("1.9"));
        assert_eq!(v("1.01"), v("1.1"));
        assert!(v("1.99999999999999999999999") > v("1.99999999999999999999998"));
    }

    #[test]
    fn test_dot_sorts_higher() {
        assert!(v("1.0.1") > v("1.0-1"));
        assert!(v("1.0.") > v("1.0-"));
        // A lone '.' beats a longer '.'-prefixed run
        assert!(v("1.1") > v("1.-1"));
    }

    #[test]
    fn test_strings_compare_ordinally() {
        assert!(v("1.0b") > v("1.0a"));
        assert!(v("v1.0") > v("V1.0"));
        assert!(v("alpha") < v("beta"));
    }

    #[test]
    fn test_equal_versions_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("1.01"));
        assert!(set.contains(&v("1.1")));
        assert!(!set.contains(&v("1.1.0")));
    }

    #[test]
    fn test_total_order_properties() {
        let versions: Vec<PackageVersion> = [
            "0.9", "1", "1.0", "1.0.0", "1.0a", "1.0-beta", "1.0.1", "1.1", "1.10", "1:0.1",
            "v1.0", "1.0.", "1.-1", "2", "",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for a in &versions {
            for b in &versions {
                // Antisymmetry
                assert_eq!(a.cmp(b), b.cmp(a).reverse(), "{} vs {}", a, b);
                // Consistent with equality
                assert_eq!(a == b, a.cmp(b) == Ordering::Equal);
                for c in &versions {
                    // Transitivity
                    if a <= b && b <= c {
                        assert!(a <= c, "{} <= {} <= {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_serde_as_string() {
        let version: PackageVersion = serde_json::from_str("\"1:2.3\"").unwrap();
        assert_eq!(version, v("1:2.3"));
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"1:2.3\"");
    }
}

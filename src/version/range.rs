//! Ranges of game versions with inclusive, exclusive or open bounds.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use super::game_version::GameVersion;

/// A `[lower, upper]` span of fully defined game versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameVersionRange {
    lower: Bound<GameVersion>,
    upper: Bound<GameVersion>,
}

impl GameVersionRange {
    pub fn new(lower: Bound<GameVersion>, upper: Bound<GameVersion>) -> Self {
        Self { lower, upper }
    }

    pub fn unbounded() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Range spanning from the lower end of `min` to the upper end of `max`.
    pub fn between(min: Option<&GameVersion>, max: Option<&GameVersion>) -> Self {
        let lower = min.map_or(Bound::Unbounded, |v| v.to_range().lower);
        let upper = max.map_or(Bound::Unbounded, |v| v.to_range().upper);
        Self::new(lower, upper)
    }

    pub fn lower(&self) -> Bound<&GameVersion> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&GameVersion> {
        self.upper.as_ref()
    }

    /// Overlap of two ranges, or `None` when they do not meet.
    pub fn intersect(&self, other: &GameVersionRange) -> Option<GameVersionRange> {
        let lower = if compare_lower(&self.lower, &other.lower) == Ordering::Less {
            other.lower
        } else {
            self.lower
        };
        let upper = if compare_upper(&self.upper, &other.upper) == Ordering::Greater {
            other.upper
        } else {
            self.upper
        };
        let range = GameVersionRange::new(lower, upper);
        (!range.is_empty()).then_some(range)
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &GameVersionRange) -> GameVersionRange {
        let lower = if compare_lower(&self.lower, &other.lower) == Ordering::Greater {
            other.lower
        } else {
            self.lower
        };
        let upper = if compare_upper(&self.upper, &other.upper) == Ordering::Less {
            other.upper
        } else {
            self.upper
        };
        GameVersionRange::new(lower, upper)
    }

    pub fn is_superset_of(&self, other: &GameVersionRange) -> bool {
        compare_lower(&self.lower, &other.lower) != Ordering::Greater
            && compare_upper(&self.upper, &other.upper) != Ordering::Less
    }

    /// True if the expanded range of `version` overlaps this one.
    pub fn contains(&self, version: &GameVersion) -> bool {
        self.intersect(&version.to_range()).is_some()
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        }
    }
}

/// Orders lower bounds: unbounded first, and an exclusive bound after an inclusive one on the same value.
fn compare_lower(a: &Bound<GameVersion>, b: &Bound<GameVersion>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

/// Orders upper bounds: unbounded last, and an exclusive bound before an inclusive one on the same value.
fn compare_upper(a: &Bound<GameVersion>, b: &Bound<GameVersion>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
    }
}

impl fmt::Display for GameVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Bound::Unbounded => write!(f, "(any")?,
            Bound::Included(v) => write!(f, "[{}", v)?,
            Bound::Excluded(v) => write!(f, "({}", v)?,
        }
        write!(f, ", ")?;
        match &self.upper {
            Bound::Unbounded => write!(f, "any)"),
            Bound::Included(v) => write!(f, "{}]", v),
            Bound::Excluded(v) => write!(f, "{})", v),
        }
    }
}

//! Consistency checks over a set of packages that would be installed together.

use crate::error::ModError;
use crate::package::Package;
use crate::relationship::{Relationship, Unmanaged};

/// Result of checking a package set.
#[derive(Debug, Default)]
pub struct SanityReport<'p> {
    pub unmet: Vec<(&'p Package, &'p Relationship)>,
    pub conflicts: Vec<(&'p Package, &'p Package)>,
}

impl SanityReport<'_> {
    pub fn is_consistent(&self) -> bool {
        self.unmet.is_empty() && self.conflicts.is_empty()
    }

    pub fn to_error(&self) -> ModError {
        ModError::Inconsistent {
            unmet: self
                .unmet
                .iter()
                .map(|(p, rel)| format!("{} depends on {}, which is not satisfied", p, rel))
                .collect(),
            conflicts: self
                .conflicts
                .iter()
                .map(|(a, b)| format!("{} conflicts with {}", a, b))
                .collect(),
        }
    }
}

pub fn check_consistency<'p>(packages: &[&'p Package], unmanaged: Unmanaged<'_>) -> SanityReport<'p> {
    SanityReport {
        unmet: find_unsatisfied_depends(packages, unmanaged),
        conflicts: find_conflicts(packages),
    }
}

/// Every `depends` entry not satisfied by the set itself or by unmanaged content.
pub fn find_unsatisfied_depends<'p>(
    packages: &[&'p Package],
    unmanaged: Unmanaged<'_>,
) -> Vec<(&'p Package, &'p Relationship)> {
    packages
        .iter()
        .flat_map(|&package| package.depends.iter().map(move |rel| (package, rel)))
        .filter(|(_, rel)| !rel.satisfies(packages, unmanaged))
        .collect()
}

/// Each conflicting unordered pair, once.
pub fn find_conflicts<'p>(packages: &[&'p Package]) -> Vec<(&'p Package, &'p Package)> {
    let mut pairs = Vec::new();
    for (i, a) in packages.iter().enumerate() {
        for b in &packages[i + 1..] {
            if a.conflicts_with(b) {
                pairs.push((*a, *b));
            }
        }
    }
    pairs
}

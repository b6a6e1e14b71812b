//! Discovery of optional packages worth offering alongside an install.

use std::collections::BTreeSet;

use log::debug;

use super::{RelationshipResolver, ResolverOptions, SelectionReason};
use crate::error::ModError;
use crate::index::PackageIndex;
use crate::package::{Package, ReleaseStatus};
use crate::version::GameVersionCriteria;

/// An optional package and why it is offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub package: Package,
    /// Whether the package should be pre-selected.
    pub checked: bool,
    /// One `Recommended`, `Suggested` or `Supports` reason per source package.
    pub reasons: Vec<SelectionReason>,
}

impl Recommendation {
    /// The packages that led to this one.
    pub fn sources(&self) -> Vec<&Package> {
        self.reasons.iter().filter_map(SelectionReason::related).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Recommendations {
    pub recommended: Vec<Recommendation>,
    pub suggested: Vec<Recommendation>,
    pub supporters: Vec<Recommendation>,
}

impl Recommendations {
    pub fn is_empty(&self) -> bool {
        self.recommended.is_empty() && self.suggested.is_empty() && self.supporters.is_empty()
    }
}

/// Finds recommendations, suggestions and supporters for installing `sources`.
#[tracing::instrument(skip(index, criteria, sources))]
pub fn find_recommendations<I: PackageIndex + ?Sized>(
    index: &I,
    criteria: &GameVersionCriteria,
    sources: &[Package],
    tolerance: ReleaseStatus,
) -> Result<Recommendations, ModError> {
    let options = ResolverOptions::kitchen_sink().with_stability_tolerance(tolerance);
    let resolver = RelationshipResolver::new(index, criteria, options, sources, &[])?;

    let recommenders: Vec<Package> = resolver.dependencies().into_iter().cloned().collect();
    let recommender_ids: BTreeSet<&str> = recommenders
        .iter()
        .map(|p| p.identifier.as_str())
        .collect();
    let conflicting = resolver.conflicting_identifiers();

    let mut found = Recommendations::default();
    for package in resolver.mod_list() {
        if recommender_ids.contains(package.identifier.as_str()) {
            continue;
        }
        let reasons = resolver.reasons_for(&package.identifier);

        let mut recommended_by = Vec::new();
        let mut checked = false;
        let mut suggested_by = Vec::new();
        for reason in reasons {
            match reason {
                SelectionReason::Recommended {
                    parent,
                    provides_index,
                } if recommender_ids.contains(parent.identifier.as_str()) => {
                    recommended_by.push(reason.clone());
                    checked |= *provides_index == 0;
                }
                SelectionReason::Suggested { parent }
                    if recommender_ids.contains(parent.identifier.as_str()) =>
                {
                    suggested_by.push(reason.clone());
                }
                _ => {}
            }
        }

        if !recommended_by.is_empty() {
            found.recommended.push(Recommendation {
                package: package.clone(),
                checked: checked && !conflicting.contains(&package.identifier),
                reasons: recommended_by,
            });
        } else if !suggested_by.is_empty() && can_install_with(index, criteria, sources, package, tolerance) {
            found.suggested.push(Recommendation {
                package: package.clone(),
                checked: false,
                reasons: suggested_by,
            });
        }
    }

    let selected: BTreeSet<&str> = resolver
        .mod_list()
        .into_iter()
        .map(|p| p.identifier.as_str())
        .collect();
    let identifiers: BTreeSet<String> = index
        .all_available()
        .into_iter()
        .map(|p| p.identifier)
        .collect();
    for identifier in identifiers {
        if selected.contains(identifier.as_str()) || index.installed_record(&identifier).is_some() {
            continue;
        }
        let Some(candidate) = index.latest_available(&identifier, criteria) else {
            continue;
        };
        if candidate.is_dlc() || candidate.release_status > tolerance {
            continue;
        }
        let targets: Vec<SelectionReason> = recommenders
            .iter()
            .filter(|target| candidate.supports.iter().any(|rel| rel.matches_package(target)))
            .map(|target| SelectionReason::Supports {
                target: target.clone(),
            })
            .collect();
        if targets.is_empty() || !can_install_with(index, criteria, sources, &candidate, tolerance) {
            continue;
        }
        found.supporters.push(Recommendation {
            package: candidate,
            checked: false,
            reasons: targets,
        });
    }

    debug!(
        "Found {} recommendations, {} suggestions, {} supporters",
        found.recommended.len(),
        found.suggested.len(),
        found.supporters.len()
    );
    Ok(found)
}

fn can_install_with<I: PackageIndex + ?Sized>(
    index: &I,
    criteria: &GameVersionCriteria,
    sources: &[Package],
    extra: &Package,
    tolerance: ReleaseStatus,
) -> bool {
    let mut packages = sources.to_vec();
    packages.push(extra.clone());
    can_install(index, criteria, &packages, tolerance)
}

/// True if `packages` can be installed together with their dependencies.
///
/// When a dependency has several providers, each is tried in turn by
/// ascending identifier.
pub fn can_install<I: PackageIndex + ?Sized>(
    index: &I,
    criteria: &GameVersionCriteria,
    packages: &[Package],
    tolerance: ReleaseStatus,
) -> bool {
    let options = ResolverOptions::depends_only().with_stability_tolerance(tolerance);
    match RelationshipResolver::new(index, criteria, options, packages, &[]) {
        Ok(_) => true,
        Err(ModError::AmbiguousProvider { mut candidates, .. }) => {
            candidates.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            candidates
                .into_iter()
                .filter(|c| !packages.iter().any(|p| p.identifier == c.identifier))
                .any(|candidate| {
                    let mut forced = packages.to_vec();
                    forced.push(candidate);
                    can_install(index, criteria, &forced, tolerance)
                })
        }
        Err(err) => {
            debug!("Cannot install {:?}: {}", packages.iter().map(ToString::to_string).collect::<Vec<_>>(), err);
            false
        }
    }
}

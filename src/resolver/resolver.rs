//! Worklist dependency resolution.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use log::debug;

use super::options::ResolverOptions;
use super::reason::SelectionReason;
use super::sanity::{check_consistency, find_conflicts};
use crate::error::ModError;
use crate::index::{PackageIndex, manual_names};
use crate::package::{Package, ReleaseStatus};
use crate::relationship::{Relationship, Unmanaged};
use crate::version::{GameVersionCriteria, UnmanagedVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Depends,
    Recommends,
    Suggests,
}

impl EdgeKind {
    fn is_soft(self) -> bool {
        self != EdgeKind::Depends
    }

    fn reason(self, parent: &Package, provides_index: usize) -> SelectionReason {
        let parent = parent.clone();
        match self {
            EdgeKind::Depends => SelectionReason::Depends { parent },
            EdgeKind::Recommends => SelectionReason::Recommended {
                parent,
                provides_index,
            },
            EdgeKind::Suggests => SelectionReason::Suggested { parent },
        }
    }
}

struct WorkItem {
    package: Package,
    options: ResolverOptions,
}

/// One level of the installability check.
struct CheckFrame {
    package: Package,
    /// Candidates for each dependency not already satisfied.
    deps: Vec<Vec<Package>>,
    dep: usize,
    alt: usize,
}

/// Computes a consistent set of packages to install for a request.
///
/// Resolution happens in [`RelationshipResolver::new`]; the accessors then
/// expose the resulting mod list, the reasons behind each entry and any
/// conflicts recorded along the way.
pub struct RelationshipResolver<'a, I: PackageIndex + ?Sized> {
    index: &'a I,
    criteria: &'a GameVersionCriteria,
    options: ResolverOptions,
    installed: BTreeMap<String, Package>,
    manual: BTreeSet<String>,
    dlc: BTreeMap<String, UnmanagedVersion>,
    resolved: BTreeMap<String, Package>,
    order: Vec<String>,
    reasons: BTreeMap<String, Vec<SelectionReason>>,
    edges: BTreeMap<String, BTreeSet<String>>,
    conflicts: Vec<(Package, Package)>,
    installable: HashMap<Package, bool>,
}

impl<'a, I: PackageIndex + ?Sized> RelationshipResolver<'a, I> {
    /// Resolves `requested` on top of what is installed, treating the
    /// identifiers in `removing` as already gone.
    #[tracing::instrument(skip(index, criteria, requested, removing))]
    pub fn new(
        index: &'a I,
        criteria: &'a GameVersionCriteria,
        options: ResolverOptions,
        requested: &[Package],
        removing: &[String],
    ) -> Result<Self, ModError> {
        let installed = index
            .installed_packages()
            .into_iter()
            .map(|record| record.package)
            .filter(|p| !removing.contains(&p.identifier))
            .filter(|p| !requested.iter().any(|r| r.identifier == p.identifier))
            .map(|p| (p.identifier.clone(), p))
            .collect();

        let mut resolver = Self {
            index,
            criteria,
            options,
            installed,
            manual: manual_names(index),
            dlc: index.dlc(),
            resolved: BTreeMap::new(),
            order: Vec::new(),
            reasons: BTreeMap::new(),
            edges: BTreeMap::new(),
            conflicts: Vec::new(),
            installable: HashMap::new(),
        };
        resolver.resolve(requested)?;
        Ok(resolver)
    }

    /// Resolved packages in the order they were selected.
    pub fn mod_list(&self) -> Vec<&Package> {
        self.order
            .iter()
            .filter_map(|id| self.resolved.get(id))
            .collect()
    }

    pub fn reasons_for(&self, identifier: &str) -> &[SelectionReason] {
        self.reasons.get(identifier).map_or(&[], Vec::as_slice)
    }

    /// True unless the user asked for the package explicitly.
    pub fn is_auto_installed(&self, package: &Package) -> bool {
        !self
            .reasons_for(&package.identifier)
            .contains(&SelectionReason::UserRequested)
    }

    pub fn conflicting_identifiers(&self) -> BTreeSet<String> {
        self.conflicts
            .iter()
            .map(|(a, _)| a.identifier.clone())
            .collect()
    }

    /// Packages that are required: user requested or depended on.
    pub fn dependencies(&self) -> Vec<&Package> {
        self.mod_list()
            .into_iter()
            .filter(|p| {
                self.reasons_for(&p.identifier).iter().any(|r| {
                    matches!(
                        r,
                        SelectionReason::UserRequested | SelectionReason::Depends { .. }
                    )
                })
            })
            .collect()
    }

    /// Resolved packages `identifier` directly depends on.
    pub fn resolved_dependencies_of(&self, identifier: &str) -> BTreeSet<String> {
        self.edges
            .get(identifier)
            .map(|deps| {
                deps.iter()
                    .filter(|dep| self.resolved.contains_key(*dep) && *dep != identifier)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if every resolved package `package` depends on is in `done`.
    pub fn ready_to_install(&self, package: &Package, done: &BTreeSet<String>) -> bool {
        self.resolved_dependencies_of(&package.identifier).is_subset(done)
    }

    fn unmanaged(&self) -> Unmanaged<'_> {
        Unmanaged {
            manual: &self.manual,
            dlc: &self.dlc,
        }
    }

    fn pool(&self) -> Vec<&Package> {
        self.resolved
            .values()
            .chain(self.installed.values())
            .collect()
    }

    fn resolve(&mut self, requested: &[Package]) -> Result<(), ModError> {
        let mut queue = VecDeque::new();

        for package in requested {
            if let Some(existing) = self.resolved.get(&package.identifier) {
                if existing.version == package.version {
                    self.add(package.clone(), SelectionReason::UserRequested);
                    continue;
                }
                return Err(ModError::Inconsistent {
                    unmet: Vec::new(),
                    conflicts: vec![format!(
                        "{} and {} cannot both be installed",
                        existing, package
                    )],
                });
            }

            let clashes = self.conflicting_with(package);
            if !clashes.is_empty() {
                if !self.options.proceed_with_inconsistencies {
                    return Err(conflict_error(package, &clashes));
                }
                for other in &clashes {
                    self.record_conflict(package, other);
                }
            }
            self.add(package.clone(), SelectionReason::UserRequested);
            queue.push_back(WorkItem {
                package: package.clone(),
                options: self.options,
            });
        }

        while let Some(item) = queue.pop_front() {
            self.process(item, &mut queue)?;
        }

        self.finish()
    }

    fn process(&mut self, item: WorkItem, queue: &mut VecDeque<WorkItem>) -> Result<(), ModError> {
        let WorkItem { package, options } = item;
        debug!("Resolving relationships of {}", package);

        for rel in &package.depends {
            self.resolve_relationship(&package, rel, EdgeKind::Depends, &options, queue)?;
        }
        if options.with_recommends {
            for rel in &package.recommends {
                self.resolve_relationship(&package, rel, EdgeKind::Recommends, &options, queue)?;
            }
        }
        if options.with_suggests {
            for rel in &package.suggests {
                self.resolve_relationship(&package, rel, EdgeKind::Suggests, &options, queue)?;
            }
        }
        Ok(())
    }

    fn resolve_relationship(
        &mut self,
        parent: &Package,
        rel: &Relationship,
        kind: EdgeKind,
        options: &ResolverOptions,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<(), ModError> {
        // Already satisfied by something selected, installed or unmanaged
        let satisfied_by = {
            let pool = self.pool();
            rel.satisfier(&pool, self.unmanaged())
                .map(|s| s.package().map(|p| p.identifier.clone()))
        };
        if let Some(by) = satisfied_by {
            if let Some(id) = by
                && self.resolved.contains_key(&id)
            {
                self.add_reason(&id, kind.reason(parent, 0));
                // Edges stay acyclic so the install order always exists
                if kind == EdgeKind::Depends && !self.reaches(&id, &parent.identifier) {
                    self.edges
                        .entry(parent.identifier.clone())
                        .or_default()
                        .insert(id);
                }
            }
            return Ok(());
        }

        // Present, but at a version outside the bounds
        if let Relationship::Direct(direct) = rel {
            let present = self
                .resolved
                .get(&direct.name)
                .or_else(|| self.installed.get(&direct.name))
                .cloned();
            if let Some(present) = present {
                if kind.is_soft() {
                    debug!("Skipping {}: {} is already selected", rel, present);
                    return Ok(());
                }
                if self.options.proceed_with_inconsistencies {
                    self.record_conflict(parent, &present);
                    return Ok(());
                }
                return Err(ModError::Inconsistent {
                    unmet: vec![format!(
                        "{} depends on {}, but {} is selected",
                        parent, rel, present
                    )],
                    conflicts: Vec::new(),
                });
            }
        }

        let candidates = self.installable_candidates(rel, options.stability_tolerance);
        let (ok, clashing): (Vec<Package>, Vec<Package>) = candidates
            .into_iter()
            .partition(|c| self.conflicting_with(c).is_empty());

        let chosen = match ok.len() {
            1 => ok,
            0 => {
                if kind.is_soft() {
                    debug!("No installable candidate for {} of {}", rel, parent);
                    return Ok(());
                }
                let Some(first) = clashing.into_iter().next() else {
                    return Err(ModError::Unsatisfiable {
                        relationship: rel.to_string(),
                        parent: Some(parent.to_string()),
                    });
                };
                let others = self.conflicting_with(&first);
                if !self.options.proceed_with_inconsistencies {
                    return Err(conflict_error(&first, &others));
                }
                for other in &others {
                    self.record_conflict(&first, other);
                }
                vec![first]
            }
            _ => {
                if self.options.without_too_many_provides_error {
                    if kind.is_soft() && self.options.get_recommenders {
                        ok
                    } else {
                        debug!("Skipping ambiguous {} of {}", rel, parent);
                        return Ok(());
                    }
                } else if let Some(pick) = disambiguate(parent, rel, &ok) {
                    vec![pick]
                } else if kind.is_soft() {
                    debug!("Skipping ambiguous {} of {}", rel, parent);
                    return Ok(());
                } else {
                    let mut candidates = ok;
                    candidates.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                    return Err(ModError::AmbiguousProvider {
                        requested: rel.to_string(),
                        candidates,
                    });
                }
            }
        };

        let child_options = options.for_next_level().for_relationship(rel);
        for (provides_index, candidate) in chosen.into_iter().enumerate() {
            let id = candidate.identifier.clone();
            let is_new = !self.resolved.contains_key(&id);
            self.add(candidate.clone(), kind.reason(parent, provides_index));
            if kind == EdgeKind::Depends && !self.reaches(&id, &parent.identifier) {
                self.edges
                    .entry(parent.identifier.clone())
                    .or_default()
                    .insert(id);
            }
            if is_new {
                queue.push_back(WorkItem {
                    package: candidate,
                    options: child_options,
                });
            }
        }
        Ok(())
    }

    fn add(&mut self, package: Package, reason: SelectionReason) {
        let id = package.identifier.clone();
        if !self.resolved.contains_key(&id) {
            debug!("Selected {} ({})", package, reason);
            self.order.push(id.clone());
            self.resolved.insert(id.clone(), package);
        }
        self.add_reason(&id, reason);
    }

    fn add_reason(&mut self, identifier: &str, reason: SelectionReason) {
        let reasons = self.reasons.entry(identifier.to_string()).or_default();
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    /// True if `to` is reachable from `from` over dependency edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(current) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }

    fn record_conflict(&mut self, a: &Package, b: &Package) {
        for pair in [(a.clone(), b.clone()), (b.clone(), a.clone())] {
            if !self.conflicts.contains(&pair) {
                self.conflicts.push(pair);
            }
        }
    }

    fn conflicting_with(&self, package: &Package) -> Vec<Package> {
        self.pool()
            .into_iter()
            .filter(|p| p.conflicts_with(package))
            .cloned()
            .collect()
    }

    /// Newest compatible releases that could satisfy `rel`, one per identifier.
    fn candidates_for(&self, rel: &Relationship, tolerance: ReleaseStatus) -> Vec<Package> {
        let mut out: Vec<Package> = Vec::new();
        match rel {
            Relationship::Direct(direct) => {
                if let Some(named) = self
                    .index
                    .available_versions(&direct.name)
                    .into_iter()
                    .find(|p| {
                        p.is_compatible(self.criteria)
                            && direct.within_bounds(&p.version)
                            && p.release_status <= tolerance
                    })
                {
                    out.push(named);
                }
                for provider in self
                    .index
                    .latest_available_with_provides(&direct.name, self.criteria)
                {
                    if provider.identifier != direct.name
                        && provider.release_status <= tolerance
                        && !out.iter().any(|p| p.identifier == provider.identifier)
                    {
                        out.push(provider);
                    }
                }
            }
            Relationship::AnyOf { any_of, .. } => {
                for child in any_of {
                    for candidate in self.candidates_for(child, tolerance) {
                        if !out.iter().any(|p| p.identifier == candidate.identifier) {
                            out.push(candidate);
                        }
                    }
                }
            }
        }
        out.retain(|p| !p.is_dlc());
        out
    }

    fn installable_candidates(&mut self, rel: &Relationship, tolerance: ReleaseStatus) -> Vec<Package> {
        let candidates = self.candidates_for(rel, tolerance);
        candidates
            .into_iter()
            .filter(|c| self.might_be_installable(c, tolerance))
            .collect()
    }

    fn check_frame(&self, package: Package, tolerance: ReleaseStatus) -> CheckFrame {
        let deps = {
            let pool = self.pool();
            package
                .depends
                .iter()
                .filter(|rel| !rel.satisfies(&pool, self.unmanaged()))
                .map(|rel| self.candidates_for(rel, tolerance))
                .collect()
        };
        CheckFrame {
            package,
            deps,
            dep: 0,
            alt: 0,
        }
    }

    /// True if every dependency of `root` has some candidate that is itself
    /// installable. Packages already on the check stack count as installable.
    fn might_be_installable(&mut self, root: &Package, tolerance: ReleaseStatus) -> bool {
        if let Some(&known) = self.installable.get(root) {
            return known;
        }

        let mut on_stack: HashSet<Package> = HashSet::new();
        on_stack.insert(root.clone());
        let mut stack = vec![self.check_frame(root.clone(), tolerance)];

        while let Some(top) = stack.last_mut() {
            let finished = if top.dep >= top.deps.len() {
                true
            } else if top.alt >= top.deps[top.dep].len() {
                false
            } else {
                let candidate = top.deps[top.dep][top.alt].clone();
                match self.installable.get(&candidate) {
                    Some(true) => {
                        top.dep += 1;
                        top.alt = 0;
                    }
                    Some(false) => top.alt += 1,
                    None if on_stack.contains(&candidate) => {
                        top.dep += 1;
                        top.alt = 0;
                    }
                    None => {
                        let frame = self.check_frame(candidate.clone(), tolerance);
                        on_stack.insert(candidate);
                        stack.push(frame);
                    }
                }
                continue;
            };

            let Some(frame) = stack.pop() else { break };
            on_stack.remove(&frame.package);
            self.installable.insert(frame.package, finished);
            match stack.last_mut() {
                Some(parent) if finished => {
                    parent.dep += 1;
                    parent.alt = 0;
                }
                Some(parent) => parent.alt += 1,
                None => return finished,
            }
        }
        false
    }

    fn finish(&mut self) -> Result<(), ModError> {
        let found: Vec<(Package, Package)> = find_conflicts(&self.pool())
            .into_iter()
            .map(|(a, b)| (a.clone(), b.clone()))
            .collect();
        for (a, b) in &found {
            self.record_conflict(a, b);
        }

        if !self.options.without_enforce_consistency {
            let pool = self.pool();
            let report = check_consistency(&pool, self.unmanaged());
            if !report.unmet.is_empty()
                || (!report.conflicts.is_empty() && !self.options.proceed_with_inconsistencies)
            {
                return Err(report.to_error());
            }
        }
        Ok(())
    }
}

fn conflict_error(package: &Package, others: &[Package]) -> ModError {
    ModError::Inconsistent {
        unmet: Vec::new(),
        conflicts: others
            .iter()
            .map(|other| format!("{} conflicts with {}", package, other))
            .collect(),
    }
}

/// Picks one of several candidates: one the parent names directly, or for
/// any-of groups the first alternative with a single candidate.
fn disambiguate(parent: &Package, rel: &Relationship, candidates: &[Package]) -> Option<Package> {
    let named: Vec<&Package> = candidates
        .iter()
        .filter(|c| {
            parent
                .depends
                .iter()
                .chain(&parent.recommends)
                .chain(&parent.suggests)
                .any(|r| r.names().contains(&c.identifier.as_str()))
        })
        .collect();
    if let [only] = named.as_slice() {
        return Some((*only).clone());
    }

    if let Relationship::AnyOf { any_of, .. } = rel {
        for child in any_of {
            let matching: Vec<&Package> = candidates
                .iter()
                .filter(|c| child.matches_package(c))
                .collect();
            if let [only] = matching.as_slice() {
                return Some((*only).clone());
            }
        }
    }
    None
}

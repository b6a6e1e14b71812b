use std::collections::{BTreeMap, BTreeSet};

use super::RelationshipResolver;
use crate::error::ModError;
use crate::index::PackageIndex;
use crate::package::Package;

/// Orders `packages` so each comes after the resolved packages it depends on.
///
/// Each pass takes every package that is ready, in ascending identifier
/// order. Resolved packages outside `packages` count as already done.
pub fn dependency_order<'p, I: PackageIndex + ?Sized>(
    resolver: &RelationshipResolver<'_, I>,
    packages: &[&'p Package],
) -> Result<Vec<&'p Package>, ModError> {
    let mut pending: BTreeMap<&'p str, &'p Package> = packages
        .iter()
        .map(|p| (p.identifier.as_str(), *p))
        .collect();
    let mut done: BTreeSet<String> = resolver
        .mod_list()
        .into_iter()
        .filter(|p| !pending.contains_key(p.identifier.as_str()))
        .map(|p| p.identifier.clone())
        .collect();

    let mut ordered = Vec::with_capacity(pending.len());
    loop {
        let ready: Vec<&'p str> = pending
            .iter()
            .filter(|(_, p)| resolver.ready_to_install(p, &done))
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            if let Some(package) = pending.remove(id) {
                done.insert(id.to_string());
                ordered.push(package);
            }
        }
    }

    if !pending.is_empty() {
        return Err(ModError::Inconsistent {
            unmet: pending
                .keys()
                .map(|id| format!("{} cannot be ordered after its dependencies", id))
                .collect(),
            conflicts: Vec::new(),
        });
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Registry;
    use crate::relationship::Relationship;
    use crate::resolver::ResolverOptions;
    use crate::test_utils::package;
    use crate::version::GameVersionCriteria;

    #[test]
    fn test_dependencies_come_first() {
        let mut app = package("App", "1.0");
        app.depends = vec![Relationship::direct("Zlib"), Relationship::direct("Alpha")];
        let mut alpha = package("Alpha", "1.0");
        alpha.depends = vec![Relationship::direct("Zlib")];
        let registry =
            Registry::with_available(vec![app.clone(), alpha, package("Zlib", "1.0")]).unwrap();
        let criteria = GameVersionCriteria::any();
        let resolver = RelationshipResolver::new(
            &registry,
            &criteria,
            ResolverOptions::depends_only(),
            &[app],
            &[],
        )
        .unwrap();

        let list = resolver.mod_list();
        let ordered = dependency_order(&resolver, &list).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|p| p.identifier.as_str()).collect();
        assert_eq!(ids, vec!["Zlib", "Alpha", "App"]);
    }

    #[test]
    fn test_independent_packages_sorted_by_identifier() {
        let registry = Registry::with_available(vec![
            package("Beta", "1.0"),
            package("Alpha", "1.0"),
        ])
        .unwrap();
        let criteria = GameVersionCriteria::any();
        let requested = vec![package("Beta", "1.0"), package("Alpha", "1.0")];
        let resolver = RelationshipResolver::new(
            &registry,
            &criteria,
            ResolverOptions::depends_only(),
            &requested,
            &[],
        )
        .unwrap();

        let list = resolver.mod_list();
        let ordered = dependency_order(&resolver, &list).unwrap();
        assert_eq!(ordered[0].identifier, "Alpha");
        assert_eq!(ordered[1].identifier, "Beta");
    }

    #[test]
    fn test_cycle_still_orders() {
        let mut a = package("A", "1.0");
        a.depends = vec![Relationship::direct("B")];
        let mut b = package("B", "1.0");
        b.depends = vec![Relationship::direct("A")];
        let registry = Registry::with_available(vec![a.clone(), b]).unwrap();
        let criteria = GameVersionCriteria::any();
        let resolver = RelationshipResolver::new(
            &registry,
            &criteria,
            ResolverOptions::depends_only(),
            &[a],
            &[],
        )
        .unwrap();

        let list = resolver.mod_list();
        let ordered = dependency_order(&resolver, &list).unwrap();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].identifier, "B");
    }
}

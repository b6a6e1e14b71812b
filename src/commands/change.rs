use anyhow::{Result, bail};
use log::info;

use crate::index::{PackageIndex, Registry, find_requested};
use crate::installer::ChangeReport;
use crate::package::{Package, PackageRequest};
use crate::resolver::ResolverOptions;

use super::Session;

/// How far an install or upgrade reaches beyond the named packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeOptions {
    pub no_recommends: bool,
    pub with_suggests: bool,
}

impl ChangeOptions {
    fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            with_recommends: !self.no_recommends,
            with_suggests: self.with_suggests,
            ..ResolverOptions::default()
        }
    }
}

fn lookup(session: &Session, registry: &Registry, requests: &[PackageRequest]) -> Result<Vec<Package>> {
    let mut packages = Vec::with_capacity(requests.len());
    for request in requests {
        packages.push(find_requested(registry, request, &session.instance.criteria)?);
    }
    Ok(packages)
}

fn summarize(session: &Session, report: &ChangeReport) {
    if report.installed.is_empty() && report.removed.is_empty() {
        session.user.message("Nothing to do");
        return;
    }
    info!(
        "{} installed, {} removed",
        report.installed.len(),
        report.removed.len()
    );
}

#[tracing::instrument(skip(session))]
pub fn install(session: &Session, requests: &[PackageRequest], options: ChangeOptions) -> Result<ChangeReport> {
    let mut registry = session.load_registry()?;
    let packages = lookup(session, &registry, requests)?;
    let report = session.run_change(&mut registry, |installer, registry| {
        installer.install_list(registry, &packages, options.resolver_options())
    })?;
    summarize(session, &report);
    Ok(report)
}

#[tracing::instrument(skip(session))]
pub fn remove(session: &Session, identifiers: &[String]) -> Result<ChangeReport> {
    let mut registry = session.load_registry()?;
    let report = session.run_change(&mut registry, |installer, registry| {
        installer.uninstall_list(registry, identifiers)
    })?;
    summarize(session, &report);
    Ok(report)
}

/// Upgrades the requested packages, or with `all` every installed package
/// that has a newer compatible release.
#[tracing::instrument(skip(session))]
pub fn upgrade(
    session: &Session,
    requests: &[PackageRequest],
    all: bool,
    options: ChangeOptions,
) -> Result<ChangeReport> {
    let mut registry = session.load_registry()?;
    let targets = if all {
        upgradable(session, &registry)
    } else {
        if requests.is_empty() {
            bail!("Name the packages to upgrade, or pass --all");
        }
        lookup(session, &registry, requests)?
    };
    if targets.is_empty() {
        session.user.message("Everything is up to date");
        return Ok(ChangeReport::default());
    }

    let report = session.run_change(&mut registry, |installer, registry| {
        installer.upgrade(registry, &targets, options.resolver_options())
    })?;
    summarize(session, &report);
    Ok(report)
}

fn upgradable(session: &Session, registry: &Registry) -> Vec<Package> {
    registry
        .installed_packages()
        .into_iter()
        .filter_map(|record| {
            let latest = registry.latest_available(record.identifier(), &session.instance.criteria)?;
            (latest.version > record.package.version).then_some(latest)
        })
        .collect()
}

#[tracing::instrument(skip(session))]
pub fn replace(session: &Session, replaced: &str, replacement: &PackageRequest) -> Result<ChangeReport> {
    let mut registry = session.load_registry()?;
    let package = find_requested(&registry, replacement, &session.instance.criteria)?;
    let report = session.run_change(&mut registry, |installer, registry| {
        installer.replace(registry, replaced, &package, ResolverOptions::depends_only())
    })?;
    summarize(session, &report);
    Ok(report)
}

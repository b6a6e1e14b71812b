use anyhow::Result;

use crate::index::find_requested;
use crate::package::PackageRequest;
use crate::resolver::{Recommendation, Recommendations, find_recommendations};

use super::Session;

/// Shows what is worth installing alongside the requested packages.
#[tracing::instrument(skip(session))]
pub fn recommend(session: &Session, requests: &[PackageRequest]) -> Result<Recommendations> {
    let registry = session.load_registry()?;
    let mut sources = Vec::with_capacity(requests.len());
    for request in requests {
        sources.push(find_requested(&registry, request, &session.instance.criteria)?);
    }

    let found = find_recommendations(
        &registry,
        &session.instance.criteria,
        &sources,
        session.instance.stability_tolerance,
    )?;
    if found.is_empty() {
        println!("No recommendations.");
        return Ok(found);
    }
    for line in describe(&found) {
        println!("{}", line);
    }
    Ok(found)
}

fn describe(found: &Recommendations) -> Vec<String> {
    let mut lines = Vec::new();
    for (title, group) in [
        ("Recommended", &found.recommended),
        ("Suggested", &found.suggested),
        ("Supporters", &found.supporters),
    ] {
        if group.is_empty() {
            continue;
        }
        lines.push(format!("{}:", title));
        lines.extend(group.iter().map(describe_one));
    }
    lines
}

fn describe_one(recommendation: &Recommendation) -> String {
    let sources = recommendation
        .sources()
        .iter()
        .map(|p| p.identifier.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let check = if recommendation.checked { "x" } else { " " };
    format!("  [{}] {} (from {})", check, recommendation.package, sources)
}

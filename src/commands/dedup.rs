use anyhow::Result;

use crate::dedup::{DedupReport, Deduplicator};

use super::Session;

/// Hard-links identical package files across every configured instance.
#[tracing::instrument(skip(session))]
pub fn dedup(session: &Session) -> Result<DedupReport> {
    session.recover_interrupted()?;
    let deduplicator = Deduplicator::new(&*session.runtime, session.instance_files()?);
    deduplicator.deduplicate_all(session.user.as_ref(), session.cancel.clone())
}

use anyhow::Result;

use super::Session;

/// Rolls back an operation that was interrupted before it committed.
#[tracing::instrument(skip(session))]
pub fn recover(session: &Session) -> Result<bool> {
    let recovered = session.recover_interrupted()?;
    if !recovered {
        println!("Nothing to recover.");
    }
    Ok(recovered)
}

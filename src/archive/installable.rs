//! Mapping archive entries to destinations inside an instance.

use log::debug;

use super::ArchiveEntry;
use crate::error::ModError;
use crate::instance::GameProfile;
use crate::package::{InstallStanza, Package};

/// One archive entry and where it lands, relative to the instance root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallableFile {
    pub source: String,
    pub destination: String,
    pub make_dir: bool,
}

/// Lists every entry `package` installs from an archive with `entries`,
/// applying its stanzas (or the default stanza when it has none).
///
/// Fails with a metadata error if any stanza matches nothing.
pub fn find_installable_files(
    package: &Package,
    entries: &[ArchiveEntry],
    profile: &GameProfile,
) -> Result<Vec<InstallableFile>, ModError> {
    let id = package.identifier.as_str();
    let names: Vec<String> = entries
        .iter()
        .map(|e| {
            if e.is_dir {
                format!("{}/", e.name)
            } else {
                e.name.clone()
            }
        })
        .collect();

    let mut files = Vec::new();
    for stanza in package.effective_stanzas(&profile.primary_dir) {
        let root = profile.install_to(id, &stanza.install_to)?;
        let matched = stanza.resolve_file(id, names.iter().map(String::as_str))?;

        let mut count = 0;
        for entry in entries {
            if !stanza.is_wanted(&matched, &entry.name) {
                continue;
            }
            count += 1;
            let Some(relative) = output_name(&stanza, &matched, &entry.name) else {
                continue;
            };
            let destination = if root.is_empty() {
                relative
            } else {
                format!("{}/{}", root, relative)
            };
            files.push(InstallableFile {
                source: entry.name.clone(),
                destination,
                make_dir: entry.is_dir,
            });
        }

        if count == 0 {
            return Err(ModError::metadata(
                Some(id),
                format!("install stanza {} matched no files", stanza.describe()),
            ));
        }
        debug!("{}: {} matched {} entries", id, stanza.describe(), count);
    }

    Ok(files)
}

/// Path of `entry` below the stanza's destination root. `None` when nothing
/// is left, as for the matched directory itself when its name is stripped.
fn output_name(stanza: &InstallStanza, matched: &str, entry: &str) -> Option<String> {
    let relative = match matched.rsplit_once('/') {
        Some((parent, _)) => entry.strip_prefix(parent)?.trim_start_matches('/'),
        None => entry,
    };
    let (first, rest) = match relative.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (relative, None),
    };

    let target_leaf = stanza
        .install_to
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let first = match &stanza.as_name {
        Some(name) => name.as_str(),
        None if first.eq_ignore_ascii_case(target_leaf) => {
            return rest.filter(|r| !r.is_empty()).map(str::to_string);
        }
        None => first,
    };
    Some(match rest {
        Some(rest) => format!("{}/{}", first, rest),
        None => first.to_string(),
    })
}

/// Identifier a loose `.dll` under the primary mod directory is known by:
/// its file name up to the first dot.
pub fn dll_identifier(primary_dir: &str, relative_path: &str) -> Option<String> {
    let path = relative_path.replace('\\', "/");
    let (dir, file) = path.rsplit_once('/')?;
    let under_primary = dir.eq_ignore_ascii_case(primary_dir)
        || dir
            .get(..primary_dir.len() + 1)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(&format!("{}/", primary_dir)));
    if !under_primary || !file.to_lowercase().ends_with(".dll") {
        return None;
    }
    let stem = file.split('.').next()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

//! Install stanzas: which archive paths go where.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::one_or_many;
use crate::error::ModError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStanza {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_regexp: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub find_matches_files: bool,
    pub install_to: String,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_name: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub filter_regexp: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub include_only: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub include_only_regexp: Vec<String>,
}

impl InstallStanza {
    /// `{find: <identifier>, install_to: <primary dir>}`
    pub fn default_for(identifier: &str, primary_dir: &str) -> Self {
        Self {
            find: Some(identifier.to_string()),
            install_to: primary_dir.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let sources = [&self.file, &self.find, &self.find_regexp]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if sources != 1 {
            return Err(format!(
                "install stanza must have exactly one of file, find or find_regexp (found {})",
                sources
            ));
        }
        if self.install_to.trim().is_empty() {
            return Err("install stanza is missing install_to".to_string());
        }
        if let Some(name) = &self.as_name
            && (name.is_empty() || name.contains(['/', '\\']))
        {
            return Err(format!("invalid `as` value {:?}", name));
        }
        for pattern in self
            .find_regexp
            .iter()
            .chain(&self.filter_regexp)
            .chain(&self.include_only_regexp)
        {
            Regex::new(pattern).map_err(|e| format!("invalid pattern {:?}: {}", pattern, e))?;
        }
        Ok(())
    }

    /// Short text naming what this stanza looks for.
    pub fn describe(&self) -> String {
        if let Some(file) = &self.file {
            format!("file {}", file)
        } else if let Some(find) = &self.find {
            format!("find {}", find)
        } else if let Some(find) = &self.find_regexp {
            format!("find_regexp {}", find)
        } else {
            "empty stanza".to_string()
        }
    }

    /// Resolves `find`/`find_regexp` against archive entry names to the
    /// shortest matching path. A `file` stanza returns its own path.
    pub fn resolve_file<'a>(
        &self,
        package: &str,
        entries: impl IntoIterator<Item = &'a str>,
    ) -> Result<String, ModError> {
        if let Some(file) = &self.file {
            return Ok(file.trim_end_matches('/').to_string());
        }

        let pattern = match (&self.find, &self.find_regexp) {
            (Some(find), _) => format!("(?:^|/){}$", regex::escape(find.trim_end_matches('/'))),
            (None, Some(pattern)) => pattern.clone(),
            (None, None) => {
                return Err(ModError::metadata(Some(package), "install stanza has nothing to find"));
            }
        };
        let re = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ModError::metadata(Some(package), format!("bad pattern: {}", e)))?;

        let mut best: Option<String> = None;
        for entry in entries {
            for candidate in self.find_candidates(entry) {
                if re.is_match(candidate) {
                    let shorter = match &best {
                        None => true,
                        Some(b) => (candidate.len(), candidate) < (b.len(), b.as_str()),
                    };
                    if shorter {
                        best = Some(candidate.to_string());
                    }
                }
            }
        }

        best.ok_or_else(|| {
            ModError::metadata(
                Some(package),
                format!("could not find {} entry in archive", self.describe()),
            )
        })
    }

    /// Paths an entry contributes to `find` matching: its ancestor
    /// directories, plus the entry itself for directories or when matching files.
    fn find_candidates<'e>(&self, entry: &'e str) -> Vec<&'e str> {
        let is_dir = entry.ends_with('/');
        let entry = entry.trim_end_matches('/');
        let mut candidates = Vec::new();
        if is_dir || self.find_matches_files {
            candidates.push(entry);
        }
        let mut rest = entry;
        while let Some((parent, _)) = rest.rsplit_once('/') {
            candidates.push(parent);
            rest = parent;
        }
        candidates
    }

    /// True if `path` should be installed given the resolved `file` path.
    pub fn is_wanted(&self, file: &str, path: &str) -> bool {
        let path = path.replace('\\', "/");
        let path = path.trim_end_matches('/');

        let under_file = path == file
            || path
                .strip_prefix(file)
                .is_some_and(|rest| rest.starts_with('/'))
            || file.is_empty();
        if !under_file {
            return false;
        }
        if path.to_lowercase().ends_with(".ckan") {
            return false;
        }

        let segments: Vec<String> = path.split('/').map(str::to_lowercase).collect();
        if self
            .filter
            .iter()
            .any(|f| segments.contains(&f.to_lowercase()))
        {
            return false;
        }
        if self
            .filter_regexp
            .iter()
            .any(|pattern| Regex::new(pattern).is_ok_and(|re| re.is_match(path)))
        {
            return false;
        }

        if !self.include_only.is_empty() || !self.include_only_regexp.is_empty() {
            let by_segment = self
                .include_only
                .iter()
                .any(|f| segments.contains(&f.to_lowercase()));
            let by_pattern = self
                .include_only_regexp
                .iter()
                .any(|pattern| Regex::new(pattern).is_ok_and(|re| re.is_match(path)));
            // Directories leading to included files are still wanted
            let is_ancestor = path == file;
            return by_segment || by_pattern || is_ancestor;
        }
        true
    }
}

//! Why a package ended up in a change set.

use std::fmt;

use crate::package::Package;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReason {
    UserRequested,
    /// Already installed and kept.
    Installed,
    Depends {
        parent: Package,
    },
    /// `provides_index` is the position among alternative providers; 0 is the default pick.
    Recommended {
        parent: Package,
        provides_index: usize,
    },
    Suggested {
        parent: Package,
    },
    Supports {
        target: Package,
    },
    /// Removed because something it depends on is being removed.
    DependencyRemoved {
        dependency: String,
    },
    /// Auto-installed and nothing needs it any more.
    NoLongerUsed,
    /// Stands in for a package being replaced.
    Replacement {
        replaced: Package,
    },
}

impl SelectionReason {
    /// Package whose relationship caused this selection, if any.
    pub fn parent(&self) -> Option<&Package> {
        match self {
            SelectionReason::Depends { parent }
            | SelectionReason::Recommended { parent, .. }
            | SelectionReason::Suggested { parent } => Some(parent),
            _ => None,
        }
    }

    /// Package on the other end of the relationship: the parent, or the
    /// package a supporter supports.
    pub fn related(&self) -> Option<&Package> {
        match self {
            SelectionReason::Supports { target } => Some(target),
            other => other.parent(),
        }
    }

    /// Reasons that mean the package is required rather than optional.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            SelectionReason::UserRequested
                | SelectionReason::Installed
                | SelectionReason::Depends { .. }
                | SelectionReason::Replacement { .. }
        )
    }
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionReason::UserRequested => write!(f, "Requested by user"),
            SelectionReason::Installed => write!(f, "Currently installed"),
            SelectionReason::Depends { parent } => {
                write!(f, "Dependency of {}", parent.identifier)
            }
            SelectionReason::Recommended { parent, .. } => {
                write!(f, "Recommended by {}", parent.identifier)
            }
            SelectionReason::Suggested { parent } => {
                write!(f, "Suggested by {}", parent.identifier)
            }
            SelectionReason::Supports { target } => write!(f, "Supports {}", target.identifier),
            SelectionReason::DependencyRemoved { dependency } => {
                write!(f, "Depends on {}, which is being removed", dependency)
            }
            SelectionReason::NoLongerUsed => write!(f, "Auto-installed and no longer used"),
            SelectionReason::Replacement { replaced } => {
                write!(f, "Replacing {}", replaced.identifier)
            }
        }
    }
}

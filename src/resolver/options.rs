//! Switches that control how far resolution reaches.

use crate::package::ReleaseStatus;
use crate::relationship::Relationship;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    pub with_recommends: bool,
    pub with_suggests: bool,
    /// Follow suggestions below the first level too.
    pub with_all_suggests: bool,
    /// Skip ambiguous providers instead of failing.
    pub without_too_many_provides_error: bool,
    pub without_enforce_consistency: bool,
    /// Record conflicts instead of failing on them.
    pub proceed_with_inconsistencies: bool,
    /// Add every alternative of an ambiguous recommendation, tagged with its index.
    pub get_recommenders: bool,
    pub stability_tolerance: ReleaseStatus,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            with_recommends: true,
            ..Self::depends_only()
        }
    }
}

impl ResolverOptions {
    pub fn depends_only() -> Self {
        Self {
            with_recommends: false,
            with_suggests: false,
            with_all_suggests: false,
            without_too_many_provides_error: false,
            without_enforce_consistency: false,
            proceed_with_inconsistencies: false,
            get_recommenders: false,
            stability_tolerance: ReleaseStatus::Stable,
        }
    }

    /// Everything that could possibly be wanted, without failing on conflicts.
    pub fn kitchen_sink() -> Self {
        Self {
            with_recommends: true,
            with_suggests: true,
            with_all_suggests: false,
            without_too_many_provides_error: true,
            without_enforce_consistency: true,
            proceed_with_inconsistencies: true,
            get_recommenders: true,
            stability_tolerance: ReleaseStatus::Stable,
        }
    }

    pub fn with_stability_tolerance(mut self, tolerance: ReleaseStatus) -> Self {
        self.stability_tolerance = tolerance;
        self
    }

    /// Options for resolving beneath `relationship`.
    pub fn for_relationship(&self, relationship: &Relationship) -> Self {
        if relationship.suppresses_recommendations() {
            Self {
                with_recommends: false,
                with_suggests: false,
                with_all_suggests: false,
                ..*self
            }
        } else {
            *self
        }
    }

    /// Options for packages pulled in below the requested ones.
    pub fn for_next_level(&self) -> Self {
        Self {
            with_suggests: self.with_all_suggests,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::DirectRelationship;

    #[test]
    fn test_presets() {
        assert!(ResolverOptions::default().with_recommends);
        assert!(!ResolverOptions::depends_only().with_recommends);

        let sink = ResolverOptions::kitchen_sink();
        assert!(sink.with_suggests && sink.get_recommenders && sink.proceed_with_inconsistencies);
    }

    #[test]
    fn test_suppressed_relationship_turns_off_soft_edges() {
        let mut direct = DirectRelationship::new("Foo");
        direct.suppress_recommendations = true;
        let options = ResolverOptions::kitchen_sink().for_relationship(&Relationship::Direct(direct));
        assert!(!options.with_recommends);
        assert!(!options.with_suggests);
        assert!(options.proceed_with_inconsistencies);

        let plain = ResolverOptions::kitchen_sink().for_relationship(&Relationship::direct("Foo"));
        assert!(plain.with_recommends);
    }

    #[test]
    fn test_suggestions_stop_after_first_level() {
        let options = ResolverOptions::kitchen_sink().for_next_level();
        assert!(!options.with_suggests);

        let mut all = ResolverOptions::kitchen_sink();
        all.with_all_suggests = true;
        assert!(all.for_next_level().with_suggests);
    }
}

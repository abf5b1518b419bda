//! What the caller asks the solver to do: targets, hard constraints, soft
//! preferences and the option set.

use grist_version::VersionRange;

use crate::constraint::{ConstraintSource, Preferences};
use crate::package::{PackageName, Stanza};

/// How version branches are ordered between installed and latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Newest first everywhere.
    PreferAllLatest,
    /// Newest first for user targets, installed first elsewhere.
    PreferLatestForSelected,
    /// Installed first everywhere.
    PreferAllInstalled,
}

pub const DEFAULT_MAX_BACKJUMPS: u64 = 100_000;

/// Solver behaviour switches.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Place each target in its own namespace so targets never compete for
    /// a single instance of a shared dependency.
    pub independent_goals: bool,
    /// Prefer goals previously implicated with the latest failure.
    pub reorder_goals: bool,
    /// Use per-variable conflict counts as the primary goal-order key.
    pub count_conflicts: bool,
    /// Decide flags ahead of package versions to surface incompatibilities
    /// early.
    pub strong_flags: bool,
    pub avoid_reinstalls: bool,
    pub shadow_installed_packages: bool,
    /// When off, failures backtrack chronologically instead of jumping.
    pub enable_backjumping: bool,
    /// `None` is unbounded.
    pub max_backjumps: Option<u64>,
    /// A fixed goal order by package name; listed names win over every
    /// heuristic, unlisted names fall back to the heuristics.
    pub goal_order: Option<Vec<PackageName>>,
    pub version_policy: VersionPolicy,
    pub enable_all_tests: bool,
    pub enable_all_benchmarks: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            independent_goals: false,
            reorder_goals: false,
            count_conflicts: true,
            strong_flags: false,
            avoid_reinstalls: false,
            shadow_installed_packages: false,
            enable_backjumping: true,
            max_backjumps: Some(DEFAULT_MAX_BACKJUMPS),
            goal_order: None,
            version_policy: VersionPolicy::PreferLatestForSelected,
            enable_all_tests: false,
            enable_all_benchmarks: false,
        }
    }
}

/// One requested package, optionally version-constrained.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: PackageName,
    pub range: Option<VersionRange>,
}

/// A labeled hard constraint on every copy of a package.
#[derive(Debug, Clone)]
pub struct PackageConstraint {
    pub name: PackageName,
    pub range: VersionRange,
    pub source: ConstraintSource,
}

/// A labeled hard constraint on one of a package's flags.
#[derive(Debug, Clone)]
pub struct FlagConstraint {
    pub name: PackageName,
    pub flag: String,
    pub value: bool,
    pub source: ConstraintSource,
}

/// A full solve request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub targets: Vec<Target>,
    pub constraints: Vec<PackageConstraint>,
    pub flag_constraints: Vec<FlagConstraint>,
    pub preferences: Preferences,
    pub options: SolverOptions,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a package at any version.
    pub fn target(&mut self, name: impl Into<PackageName>) -> &mut Self {
        self.targets.push(Target {
            name: name.into(),
            range: None,
        });
        self
    }

    /// Ask for a package within a version range.
    pub fn target_constrained(
        &mut self,
        name: impl Into<PackageName>,
        range: VersionRange,
    ) -> &mut Self {
        self.targets.push(Target {
            name: name.into(),
            range: Some(range),
        });
        self
    }

    pub fn constrain(
        &mut self,
        name: impl Into<PackageName>,
        range: VersionRange,
        source: ConstraintSource,
    ) -> &mut Self {
        self.constraints.push(PackageConstraint {
            name: name.into(),
            range,
            source,
        });
        self
    }

    pub fn constrain_flag(
        &mut self,
        name: impl Into<PackageName>,
        flag: impl Into<String>,
        value: bool,
        source: ConstraintSource,
    ) -> &mut Self {
        self.flag_constraints.push(FlagConstraint {
            name: name.into(),
            flag: flag.into(),
            value,
            source,
        });
        self
    }

    pub fn prefer_version(
        &mut self,
        name: impl Into<PackageName>,
        range: VersionRange,
    ) -> &mut Self {
        self.preferences.prefer_version(name, range);
        self
    }

    pub fn prefer_stanza(&mut self, stanza: Stanza) -> &mut Self {
        self.preferences.prefer_stanza(stanza);
        self
    }

    pub fn is_target(&self, name: &PackageName) -> bool {
        self.targets.iter().any(|t| &t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_version::Version;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_request_builder() {
        let mut request = Request::new();
        request
            .target("app")
            .target_constrained("lib", VersionRange::WithinMajor(v("2")))
            .constrain("base", VersionRange::Earlier(v("5")), ConstraintSource::Project)
            .constrain_flag("app", "fast", true, ConstraintSource::UserConstraint);

        assert_eq!(request.targets.len(), 2);
        assert!(request.is_target(&PackageName::new("app")));
        assert!(!request.is_target(&PackageName::new("base")));
        assert_eq!(request.constraints.len(), 1);
        assert_eq!(request.flag_constraints.len(), 1);
    }

    #[test]
    fn test_default_options() {
        let options = SolverOptions::default();
        assert!(!options.independent_goals);
        assert!(options.enable_backjumping);
        assert!(options.count_conflicts);
        assert_eq!(options.max_backjumps, Some(DEFAULT_MAX_BACKJUMPS));
        assert_eq!(options.version_policy, VersionPolicy::PreferLatestForSelected);
    }
}

//! The constraint model: labeled version ranges and flag requirements per
//! qualified name, plus the soft preferences.
//!
//! Labels never change what the solver decides, only how failures are
//! explained. Constraint pushes are trailed so the walker can retract them
//! when it backtracks; the intersection of ranges is computed on demand.

use indexmap::IndexMap;

use grist_version::{Version, VersionRange};

use crate::package::{PackageId, PackageName, Stanza, UnitId};
use crate::vars::VarId;

/// Where a constraint came from; surfaced in error messages only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintSource {
    /// A user build target.
    Target,
    /// An explicit user constraint.
    UserConstraint,
    /// Declared by a package's dependency tree.
    Dependency(PackageId),
    /// Declared by a package's setup-driver dependencies.
    SetupDependency(PackageId),
    /// Imposed by an installed unit's concrete dependencies.
    Installed(UnitId),
    /// Imposed by the surrounding project or sandbox.
    Project,
}

impl std::fmt::Display for ConstraintSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintSource::Target => write!(f, "build target"),
            ConstraintSource::UserConstraint => write!(f, "user constraint"),
            ConstraintSource::Dependency(id) => write!(f, "dependency of {id}"),
            ConstraintSource::SetupDependency(id) => write!(f, "setup dependency of {id}"),
            ConstraintSource::Installed(unit) => write!(f, "installed package {unit}"),
            ConstraintSource::Project => write!(f, "project configuration"),
        }
    }
}

/// One version constraint on a qualified package.
#[derive(Debug, Clone)]
pub struct LabeledRange {
    pub range: VersionRange,
    /// When set, the chosen release must also provide this component.
    pub component: Option<String>,
    pub source: ConstraintSource,
    /// The decision that introduced the constraint; `None` for constraints
    /// present before the search started.
    pub introduced_by: Option<VarId>,
}

/// A required value for a flag variable.
#[derive(Debug, Clone)]
pub struct FlagRequirement {
    pub value: bool,
    pub source: ConstraintSource,
    pub introduced_by: Option<VarId>,
}

/// The effective value space of a flag after all requirements.
#[derive(Debug, Clone, Default)]
pub struct FlagValues {
    pub required: Option<bool>,
    /// Both values are required at once; no assignment can work.
    pub conflicting: bool,
    pub introducers: Vec<VarId>,
}

enum TrailOp {
    Range(VarId),
    Flag(VarId),
}

/// All constraints accumulated so far, keyed by solver variable, with
/// initial per-name constraints kept aside (they apply to every qualified
/// copy of the name).
#[derive(Default)]
pub struct ConstraintStore {
    ranges: IndexMap<VarId, Vec<LabeledRange>>,
    flags: IndexMap<VarId, Vec<FlagRequirement>>,
    global_ranges: IndexMap<PackageName, Vec<LabeledRange>>,
    global_flags: IndexMap<(PackageName, String), Vec<FlagRequirement>>,
    trail: Vec<TrailOp>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A constraint applying to every qualified copy of `name`; set during
    /// initialization, never retracted.
    pub fn add_global_range(&mut self, name: PackageName, range: LabeledRange) {
        self.global_ranges.entry(name).or_default().push(range);
    }

    pub fn add_global_flag(
        &mut self,
        name: PackageName,
        flag: String,
        requirement: FlagRequirement,
    ) {
        self.global_flags
            .entry((name, flag))
            .or_default()
            .push(requirement);
    }

    pub fn push_range(&mut self, var: VarId, range: LabeledRange) {
        self.ranges.entry(var).or_default().push(range);
        self.trail.push(TrailOp::Range(var));
    }

    pub fn push_flag(&mut self, var: VarId, requirement: FlagRequirement) {
        self.flags.entry(var).or_default().push(requirement);
        self.trail.push(TrailOp::Flag(var));
    }

    pub fn mark(&self) -> usize {
        self.trail.len()
    }

    pub fn revert_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            match self.trail.pop() {
                Some(TrailOp::Range(var)) => {
                    self.ranges.entry(var).or_default().pop();
                }
                Some(TrailOp::Flag(var)) => {
                    self.flags.entry(var).or_default().pop();
                }
                None => break,
            }
        }
    }

    pub fn ranges_on(&self, var: VarId) -> &[LabeledRange] {
        self.ranges.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    fn global_ranges_on(&self, name: &PackageName) -> &[LabeledRange] {
        self.global_ranges
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rendered labels of the per-name constraints on `name`.
    pub fn global_labels(&self, name: &PackageName) -> Vec<String> {
        self.global_ranges_on(name)
            .iter()
            .map(|labeled| format!("{} ({})", labeled.range, labeled.source))
            .collect()
    }

    /// The intersection of every range constraint on this variable.
    pub fn merged_range(&self, var: VarId, name: &PackageName) -> VersionRange {
        let mut merged = VersionRange::Any;
        for labeled in self.global_ranges_on(name).iter().chain(self.ranges_on(var)) {
            merged = merged.intersect(labeled.range.clone());
        }
        merged
    }

    pub fn version_allowed(&self, var: VarId, name: &PackageName, version: &Version) -> bool {
        self.global_ranges_on(name)
            .iter()
            .chain(self.ranges_on(var))
            .all(|labeled| labeled.range.contains(version))
    }

    /// The decisions whose constraints exclude this version.
    pub fn violating_introducers(
        &self,
        var: VarId,
        name: &PackageName,
        version: &Version,
    ) -> Vec<VarId> {
        let mut out = Vec::new();
        for labeled in self.global_ranges_on(name).iter().chain(self.ranges_on(var)) {
            if !labeled.range.contains(version) {
                if let Some(introducer) = labeled.introduced_by {
                    if !out.contains(&introducer) {
                        out.push(introducer);
                    }
                }
            }
        }
        out
    }

    /// Every decision that has constrained this variable so far.
    pub fn introducers(&self, var: VarId) -> Vec<VarId> {
        let mut out = Vec::new();
        for labeled in self.ranges_on(var) {
            if let Some(introducer) = labeled.introduced_by {
                if !out.contains(&introducer) {
                    out.push(introducer);
                }
            }
        }
        out
    }

    /// Components the chosen release of this variable must provide.
    pub fn required_components(&self, var: VarId) -> Vec<(&str, Option<VarId>)> {
        self.ranges_on(var)
            .iter()
            .filter_map(|labeled| {
                labeled
                    .component
                    .as_deref()
                    .map(|c| (c, labeled.introduced_by))
            })
            .collect()
    }

    /// The decisions that have imposed requirements on a flag variable.
    pub fn flag_introducers(&self, var: VarId) -> Vec<VarId> {
        let mut out = Vec::new();
        for requirement in self.flags.get(&var).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(introducer) = requirement.introduced_by {
                if !out.contains(&introducer) {
                    out.push(introducer);
                }
            }
        }
        out
    }

    /// Resolve the requirements on a flag into its allowed value space.
    pub fn flag_values(&self, var: VarId, name: &PackageName, flag: &str) -> FlagValues {
        let global = self
            .global_flags
            .get(&(name.clone(), flag.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let local = self.flags.get(&var).map(Vec::as_slice).unwrap_or(&[]);

        let mut values = FlagValues::default();
        for requirement in global.iter().chain(local) {
            match values.required {
                None => values.required = Some(requirement.value),
                Some(existing) if existing != requirement.value => values.conflicting = true,
                Some(_) => {}
            }
            if let Some(introducer) = requirement.introduced_by {
                if !values.introducers.contains(&introducer) {
                    values.introducers.push(introducer);
                }
            }
        }
        values
    }
}

/// Soft preferences: branch ordering hints that never prune the search.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    soft: IndexMap<PackageName, Vec<VersionRange>>,
    stanzas: Vec<Stanza>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefer_version(&mut self, name: impl Into<PackageName>, range: VersionRange) {
        self.soft.entry(name.into()).or_default().push(range);
    }

    pub fn prefer_stanza(&mut self, stanza: Stanza) {
        if !self.stanzas.contains(&stanza) {
            self.stanzas.push(stanza);
        }
    }

    pub fn soft_ranges(&self, name: &PackageName) -> &[VersionRange] {
        self.soft.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn prefers_stanza(&self, stanza: Stanza) -> bool {
        self.stanzas.contains(&stanza)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualify::QualifiedName;
    use crate::vars::{VarKind, VarTable};

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn pkg_var(table: &mut VarTable, name: &str) -> VarId {
        table.intern(VarKind::Package(QualifiedName::top(name)))
    }

    fn labeled(range: VersionRange, introduced_by: Option<VarId>) -> LabeledRange {
        LabeledRange {
            range,
            component: None,
            source: ConstraintSource::Target,
            introduced_by,
        }
    }

    #[test]
    fn test_merged_range_intersects() {
        let mut table = VarTable::new();
        let var = pkg_var(&mut table, "a");
        let name = PackageName::new("a");

        let mut store = ConstraintStore::new();
        store.push_range(var, labeled(VersionRange::OrLater(v("1")), None));
        store.push_range(var, labeled(VersionRange::Earlier(v("2")), None));

        assert!(store.version_allowed(var, &name, &v("1.5")));
        assert!(!store.version_allowed(var, &name, &v("2")));
        assert!(!store.merged_range(var, &name).is_empty());

        store.push_range(var, labeled(VersionRange::OrLater(v("3")), None));
        assert!(store.merged_range(var, &name).is_empty());
    }

    #[test]
    fn test_global_ranges_apply_by_name() {
        let mut table = VarTable::new();
        let var = pkg_var(&mut table, "a");
        let name = PackageName::new("a");

        let mut store = ConstraintStore::new();
        store.add_global_range(
            name.clone(),
            labeled(VersionRange::Earlier(v("2")), None),
        );
        assert!(store.version_allowed(var, &name, &v("1")));
        assert!(!store.version_allowed(var, &name, &v("2")));
    }

    #[test]
    fn test_revert_retracts_pushes() {
        let mut table = VarTable::new();
        let var = pkg_var(&mut table, "a");
        let name = PackageName::new("a");

        let mut store = ConstraintStore::new();
        store.push_range(var, labeled(VersionRange::OrLater(v("1")), None));
        let mark = store.mark();
        store.push_range(var, labeled(VersionRange::Earlier(v("1")), None));
        assert!(store.merged_range(var, &name).is_empty());

        store.revert_to(mark);
        assert!(!store.merged_range(var, &name).is_empty());
        assert_eq!(store.ranges_on(var).len(), 1);
    }

    #[test]
    fn test_violating_introducers() {
        let mut table = VarTable::new();
        let var = pkg_var(&mut table, "a");
        let culprit = pkg_var(&mut table, "b");
        let name = PackageName::new("a");

        let mut store = ConstraintStore::new();
        store.push_range(var, labeled(VersionRange::OrLater(v("1")), None));
        store.push_range(var, labeled(VersionRange::Earlier(v("2")), Some(culprit)));

        assert_eq!(store.violating_introducers(var, &name, &v("2.5")), vec![culprit]);
        assert!(store.violating_introducers(var, &name, &v("1.5")).is_empty());
    }

    #[test]
    fn test_flag_values_conflict() {
        let mut table = VarTable::new();
        let var = table.intern(VarKind::Flag(QualifiedName::top("a"), "fast".into()));
        let culprit = pkg_var(&mut table, "b");
        let name = PackageName::new("a");

        let mut store = ConstraintStore::new();
        store.push_flag(
            var,
            FlagRequirement {
                value: true,
                source: ConstraintSource::UserConstraint,
                introduced_by: None,
            },
        );
        let values = store.flag_values(var, &name, "fast");
        assert_eq!(values.required, Some(true));
        assert!(!values.conflicting);

        store.push_flag(
            var,
            FlagRequirement {
                value: false,
                source: ConstraintSource::Project,
                introduced_by: Some(culprit),
            },
        );
        let values = store.flag_values(var, &name, "fast");
        assert!(values.conflicting);
        assert_eq!(values.introducers, vec![culprit]);
    }

    #[test]
    fn test_preferences() {
        let mut prefs = Preferences::new();
        prefs.prefer_version("a", VersionRange::WithinMajor(v("1.2")));
        prefs.prefer_stanza(Stanza::Tests);

        assert_eq!(prefs.soft_ranges(&PackageName::new("a")).len(), 1);
        assert!(prefs.soft_ranges(&PackageName::new("b")).is_empty());
        assert!(prefs.prefers_stanza(Stanza::Tests));
        assert!(!prefs.prefers_stanza(Stanza::Benchmarks));
    }
}

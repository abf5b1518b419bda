//! Branch and goal ordering.
//!
//! Ordering is policy, not correctness: preferences reorder branches but
//! never remove them, and any goal order yields a sound plan. Everything
//! here is deterministic for a fixed input.

use std::cmp::Reverse;

use grist_version::VersionRange;

use crate::constraint::FlagValues;
use crate::package::{FlagDeclaration, PackageSource};
use crate::request::{SolverOptions, VersionPolicy};
use crate::tree::GoalPayload;

/// Order version candidates for one package goal.
///
/// Soft preferences come first, then the installed-versus-latest policy,
/// then version descending. An installed unit wins a version tie.
pub fn order_candidates(
    candidates: &[PackageSource],
    is_target: bool,
    soft: &[VersionRange],
    policy: VersionPolicy,
) -> Vec<PackageSource> {
    let prefer_installed = match policy {
        VersionPolicy::PreferAllInstalled => true,
        VersionPolicy::PreferLatestForSelected => !is_target,
        VersionPolicy::PreferAllLatest => false,
    };

    let mut ordered = candidates.to_vec();
    ordered.sort_by(|a, b| {
        let a_soft = soft.iter().filter(|r| r.contains(a.version())).count();
        let b_soft = soft.iter().filter(|r| r.contains(b.version())).count();
        b_soft
            .cmp(&a_soft)
            .then_with(|| {
                if prefer_installed {
                    b.is_installed().cmp(&a.is_installed())
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .then_with(|| b.version().cmp(a.version()))
            .then_with(|| b.is_installed().cmp(&a.is_installed()))
    });
    ordered
}

/// Flag branches in trial order: the default value first, unless
/// requirements pin the flag. Manual flags never leave their default on the
/// solver's own initiative. An empty result means no value is allowed.
pub fn order_flag_branches(declaration: &FlagDeclaration, values: &FlagValues) -> Vec<bool> {
    if values.conflicting {
        return Vec::new();
    }
    match values.required {
        Some(required) => vec![required],
        None if declaration.manual => vec![declaration.default],
        None => vec![declaration.default, !declaration.default],
    }
}

/// Stanza branches in trial order: forced stanzas must enable, preferred
/// stanzas try enabling but accept disabling, everything else stays off.
pub fn order_stanza_branches(forced: bool, preferred: bool) -> Vec<bool> {
    if forced {
        vec![true]
    } else if preferred {
        vec![true, false]
    } else {
        vec![false]
    }
}

/// Scheduling class of a goal; lower runs earlier.
///
/// Flags jump the queue under `strong_flags`; weak flags and optional
/// stanzas wait until the rest of the graph has taken shape.
pub fn goal_class(payload: &GoalPayload, strong_flags: bool) -> u8 {
    match payload {
        GoalPayload::Flag { weak: true, .. } => 3,
        GoalPayload::Flag { .. } if strong_flags => 0,
        GoalPayload::Flag { .. } => 1,
        GoalPayload::Package => 1,
        GoalPayload::Stanza { forced: true, .. } => 2,
        GoalPayload::Stanza { .. } => 3,
    }
}

/// The sort key of one open goal; the smallest key is decided next.
///
/// The field order is the priority order: an explicit user-supplied goal
/// order dominates everything, then the scheduling class, then conflict
/// counts, then recent-failure affinity, then the name as a lexicographic
/// tiebreak.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoalKey {
    pub explicit: usize,
    pub class: u8,
    pub conflicts: Reverse<u64>,
    pub recent: u8,
    pub name: String,
    pub var: u32,
}

/// Assemble the key for one goal under the active options.
#[allow(clippy::too_many_arguments)]
pub fn goal_key(
    options: &SolverOptions,
    payload: &GoalPayload,
    explicit_index: Option<usize>,
    conflict_count: u64,
    hits_recent_failure: bool,
    name: String,
    var_index: usize,
) -> GoalKey {
    GoalKey {
        explicit: explicit_index.unwrap_or(usize::MAX),
        class: goal_class(payload, options.strong_flags),
        conflicts: Reverse(if options.count_conflicts {
            conflict_count
        } else {
            0
        }),
        recent: if options.reorder_goals && hits_recent_failure {
            0
        } else {
            1
        },
        name,
        var: var_index as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{InstalledPackage, SourcePackage};
    use grist_version::Version;
    use std::sync::Arc;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn source(name: &str, version: &str) -> PackageSource {
        PackageSource::Source(Arc::new(SourcePackage::new(name, v(version))))
    }

    fn installed(name: &str, version: &str) -> PackageSource {
        PackageSource::Installed(Arc::new(InstalledPackage::new(
            format!("{name}-{version}"),
            name,
            v(version),
        )))
    }

    fn versions(ordered: &[PackageSource]) -> Vec<String> {
        ordered.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_latest_policy_orders_by_version() {
        let candidates = vec![source("a", "1"), source("a", "3"), source("a", "2")];
        let ordered = order_candidates(&candidates, true, &[], VersionPolicy::PreferAllLatest);
        assert_eq!(versions(&ordered), vec!["a-3", "a-2", "a-1"]);
    }

    #[test]
    fn test_installed_policy_puts_installed_first() {
        let candidates = vec![source("a", "2"), installed("a", "1")];
        let ordered = order_candidates(&candidates, false, &[], VersionPolicy::PreferAllInstalled);
        assert_eq!(versions(&ordered), vec!["a-1/installed", "a-2"]);
    }

    #[test]
    fn test_selected_policy_depends_on_target() {
        let candidates = vec![source("a", "2"), installed("a", "1")];

        let for_target =
            order_candidates(&candidates, true, &[], VersionPolicy::PreferLatestForSelected);
        assert_eq!(versions(&for_target), vec!["a-2", "a-1/installed"]);

        let for_dep =
            order_candidates(&candidates, false, &[], VersionPolicy::PreferLatestForSelected);
        assert_eq!(versions(&for_dep), vec!["a-1/installed", "a-2"]);
    }

    #[test]
    fn test_installed_wins_version_tie() {
        let candidates = vec![source("a", "1"), installed("a", "1")];
        let ordered = order_candidates(&candidates, true, &[], VersionPolicy::PreferAllLatest);
        assert_eq!(versions(&ordered), vec!["a-1/installed", "a-1"]);
    }

    #[test]
    fn test_soft_preference_beats_version_order() {
        let candidates = vec![source("a", "1.5"), source("a", "2")];
        let soft = vec![VersionRange::WithinMajor(v("1.5"))];
        let ordered = order_candidates(&candidates, true, &soft, VersionPolicy::PreferAllLatest);
        assert_eq!(versions(&ordered), vec!["a-1.5", "a-2"]);
    }

    #[test]
    fn test_flag_branch_order() {
        let decl = FlagDeclaration::new("fast", true);
        let free = FlagValues::default();
        assert_eq!(order_flag_branches(&decl, &free), vec![true, false]);

        let pinned = FlagValues {
            required: Some(false),
            ..FlagValues::default()
        };
        assert_eq!(order_flag_branches(&decl, &pinned), vec![false]);

        let manual = FlagDeclaration::manual("fast", true);
        assert_eq!(order_flag_branches(&manual, &free), vec![true]);

        let conflicting = FlagValues {
            conflicting: true,
            ..FlagValues::default()
        };
        assert!(order_flag_branches(&decl, &conflicting).is_empty());
    }

    #[test]
    fn test_stanza_branch_order() {
        assert_eq!(order_stanza_branches(true, false), vec![true]);
        assert_eq!(order_stanza_branches(false, true), vec![true, false]);
        assert_eq!(order_stanza_branches(false, false), vec![false]);
    }

    #[test]
    fn test_goal_key_explicit_order_dominates() {
        let options = SolverOptions {
            count_conflicts: true,
            ..SolverOptions::default()
        };
        let listed = goal_key(
            &options,
            &GoalPayload::Package,
            Some(0),
            0,
            false,
            "zzz".into(),
            7,
        );
        let heavy = goal_key(
            &options,
            &GoalPayload::Package,
            None,
            1_000,
            true,
            "aaa".into(),
            1,
        );
        assert!(listed < heavy);
    }
}

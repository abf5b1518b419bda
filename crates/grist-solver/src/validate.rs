//! Per-decision validation, run before a branch's subtree is expanded.
//!
//! Each check either passes or produces a [`Fail`] whose conflict set names
//! every decision that contributed to the refusal; the walker uses those
//! sets to jump straight back to a relevant choice.

use crate::error::{Fail, FailReason};
use crate::package::{Dependency, PackageSource};
use crate::qualify::QualifiedName;
use crate::tree::SearchState;
use crate::vars::{ConflictSet, VarId};

/// A candidate release must sit inside the accumulated range, provide every
/// requested component, and not outgrow the configured compiler.
pub fn check_candidate(
    state: &SearchState,
    var: VarId,
    qname: &QualifiedName,
    source: &PackageSource,
) -> Result<(), Fail> {
    let version = source.version();
    if !state.constraints.version_allowed(var, &qname.name, version) {
        let mut conflict = ConflictSet::singleton(var);
        for culprit in state
            .constraints
            .violating_introducers(var, &qname.name, version)
        {
            conflict.insert(culprit);
        }
        return Err(Fail::new(conflict, FailReason::VersionConflict(qname.clone())));
    }

    for (component, introducer) in state.constraints.required_components(var) {
        let provides = match source {
            PackageSource::Source(package) => package.provides_component(component),
            PackageSource::Installed(_) => component == "lib",
        };
        if !provides {
            let mut conflict = ConflictSet::singleton(var);
            if let Some(introducer) = introducer {
                conflict.insert(introducer);
            }
            return Err(Fail::new(
                conflict,
                FailReason::MissingComponent {
                    name: qname.clone(),
                    component: component.to_string(),
                },
            ));
        }
    }

    if let PackageSource::Source(package) = source {
        if let Some(needs) = &package.min_compiler {
            if &state.compiler.version < needs {
                return Err(Fail::new(
                    ConflictSet::singleton(var),
                    FailReason::CompilerTooOld {
                        name: qname.name.clone(),
                        needs: needs.clone(),
                    },
                ));
            }
        }
    }

    Ok(())
}

/// When a new constraint lands on an undecided goal, some release must
/// still be able to satisfy the accumulated range. Strict satisfaction is
/// enforced once the goal itself is reached.
pub fn check_preliminary(
    state: &SearchState,
    var: VarId,
    qname: &QualifiedName,
) -> Result<(), Fail> {
    let candidates = state.pool.lookup(&qname.name);
    if candidates.is_empty() {
        let mut conflict = ConflictSet::singleton(var);
        for introducer in state.constraints.introducers(var) {
            conflict.insert(introducer);
        }
        return Err(Fail::new(
            conflict,
            FailReason::UnknownPackage(qname.name.clone()),
        ));
    }

    let merged = state.constraints.merged_range(var, &qname.name);
    if !candidates.iter().any(|c| merged.contains(c.version())) {
        let mut conflict = ConflictSet::singleton(var);
        for introducer in state.constraints.introducers(var) {
            conflict.insert(introducer);
        }
        return Err(Fail::new(
            conflict,
            FailReason::VersionConflict(qname.clone()),
        ));
    }

    Ok(())
}

/// Extension, language and pkg-config leaves are settled against the fixed
/// environment the moment they are activated.
pub fn check_environment(
    state: &SearchState,
    package_var: VarId,
    cause: VarId,
    dep: &Dependency,
) -> Result<(), Fail> {
    let refused = match dep {
        Dependency::Extension { name } => {
            (!state.compiler.supports_extension(name)).then(|| FailReason::MissingExtension(name.clone()))
        }
        Dependency::Language { name } => {
            (!state.compiler.supports_language(name)).then(|| FailReason::MissingLanguage(name.clone()))
        }
        Dependency::PkgConfig { name, range } => {
            (!state.pkg_config.satisfies(name, range)).then(|| FailReason::MissingPkgConfig(name.clone()))
        }
        _ => None,
    };

    match refused {
        Some(reason) => {
            let mut conflict = ConflictSet::singleton(package_var);
            conflict.insert(cause);
            Err(Fail::new(conflict, reason))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ConstraintSource, LabeledRange};
    use crate::package::{InstalledPackage, PackageName, SourcePackage};
    use crate::platform::{CompilerInfo, PkgConfigDb};
    use crate::pool::Pool;
    use crate::request::Request;
    use crate::vars::VarKind;
    use grist_version::{Version, VersionRange};
    use std::sync::Arc;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn fixture() -> (Pool, CompilerInfo, PkgConfigDb, Request) {
        let mut pool = Pool::new();
        pool.add_source(SourcePackage::new("a", v("1")));
        pool.add_source(SourcePackage::new("a", v("2")));
        let compiler = CompilerInfo::new("ghc", v("9.2")).with_extension("TypeFamilies");
        (pool, compiler, PkgConfigDb::new(), Request::new())
    }

    #[test]
    fn test_candidate_outside_range_is_refused() {
        let (pool, compiler, pkg_config, request) = fixture();
        let mut state = SearchState::new(&pool, &compiler, &pkg_config, &request);
        let qname = QualifiedName::top("a");
        let var = state.vars.intern(VarKind::Package(qname.clone()));
        let culprit = state
            .vars
            .intern(VarKind::Package(QualifiedName::top("b")));
        state.constraints.push_range(
            var,
            LabeledRange {
                range: VersionRange::This(v("1")),
                component: None,
                source: ConstraintSource::Target,
                introduced_by: Some(culprit),
            },
        );

        let good = PackageSource::Source(Arc::new(SourcePackage::new("a", v("1"))));
        assert!(check_candidate(&state, var, &qname, &good).is_ok());

        let bad = PackageSource::Source(Arc::new(SourcePackage::new("a", v("2"))));
        let fail = check_candidate(&state, var, &qname, &bad).unwrap_err();
        assert!(fail.conflict.contains(var));
        assert!(fail.conflict.contains(culprit));
        assert!(matches!(fail.reason, FailReason::VersionConflict(_)));
    }

    #[test]
    fn test_component_requirement() {
        let (pool, compiler, pkg_config, request) = fixture();
        let mut state = SearchState::new(&pool, &compiler, &pkg_config, &request);
        let qname = QualifiedName::top("a");
        let var = state.vars.intern(VarKind::Package(qname.clone()));
        state.constraints.push_range(
            var,
            LabeledRange {
                range: VersionRange::Any,
                component: Some("cli".to_string()),
                source: ConstraintSource::Target,
                introduced_by: None,
            },
        );

        let plain = PackageSource::Source(Arc::new(SourcePackage::new("a", v("1"))));
        let fail = check_candidate(&state, var, &qname, &plain).unwrap_err();
        assert!(matches!(fail.reason, FailReason::MissingComponent { .. }));

        let with_cli =
            PackageSource::Source(Arc::new(SourcePackage::new("a", v("1")).with_component("cli")));
        assert!(check_candidate(&state, var, &qname, &with_cli).is_ok());

        // Installed units only ever provide their library.
        let installed =
            PackageSource::Installed(Arc::new(InstalledPackage::new("a-1", "a", v("1"))));
        assert!(check_candidate(&state, var, &qname, &installed).is_err());
    }

    #[test]
    fn test_compiler_floor() {
        let (pool, compiler, pkg_config, request) = fixture();
        let mut state = SearchState::new(&pool, &compiler, &pkg_config, &request);
        let qname = QualifiedName::top("a");
        let var = state.vars.intern(VarKind::Package(qname.clone()));

        let demanding = PackageSource::Source(Arc::new(
            SourcePackage::new("a", v("1")).with_min_compiler(v("9.4")),
        ));
        let fail = check_candidate(&state, var, &qname, &demanding).unwrap_err();
        assert!(matches!(fail.reason, FailReason::CompilerTooOld { .. }));

        let modest = PackageSource::Source(Arc::new(
            SourcePackage::new("a", v("1")).with_min_compiler(v("9.2")),
        ));
        assert!(check_candidate(&state, var, &qname, &modest).is_ok());
    }

    #[test]
    fn test_preliminary_unknown_package() {
        let (pool, compiler, pkg_config, request) = fixture();
        let mut state = SearchState::new(&pool, &compiler, &pkg_config, &request);
        let qname = QualifiedName::top("ghost");
        let var = state.vars.intern(VarKind::Package(qname.clone()));

        let fail = check_preliminary(&state, var, &qname).unwrap_err();
        assert_eq!(
            fail.reason,
            FailReason::UnknownPackage(PackageName::new("ghost"))
        );
    }

    #[test]
    fn test_preliminary_empty_intersection() {
        let (pool, compiler, pkg_config, request) = fixture();
        let mut state = SearchState::new(&pool, &compiler, &pkg_config, &request);
        let qname = QualifiedName::top("a");
        let var = state.vars.intern(VarKind::Package(qname.clone()));
        let culprit = state
            .vars
            .intern(VarKind::Package(QualifiedName::top("b")));
        state.constraints.push_range(
            var,
            LabeledRange {
                range: VersionRange::OrLater(v("3")),
                component: None,
                source: ConstraintSource::Target,
                introduced_by: Some(culprit),
            },
        );

        let fail = check_preliminary(&state, var, &qname).unwrap_err();
        assert!(matches!(fail.reason, FailReason::VersionConflict(_)));
        assert!(fail.conflict.contains(culprit));
    }

    #[test]
    fn test_environment_checks() {
        let (pool, compiler, pkg_config, request) = fixture();
        let mut state = SearchState::new(&pool, &compiler, &pkg_config, &request);
        let var = state
            .vars
            .intern(VarKind::Package(QualifiedName::top("a")));

        let ok = Dependency::extension("TypeFamilies");
        assert!(check_environment(&state, var, var, &ok).is_ok());

        let missing = Dependency::extension("MagicHash");
        let fail = check_environment(&state, var, var, &missing).unwrap_err();
        assert_eq!(
            fail.reason,
            FailReason::MissingExtension("MagicHash".to_string())
        );

        let lang = Dependency::language("Haskell2010");
        assert!(check_environment(&state, var, var, &lang).is_err());

        let lib = Dependency::pkg_config("zlib", VersionRange::Any);
        assert!(check_environment(&state, var, var, &lib).is_err());
    }
}

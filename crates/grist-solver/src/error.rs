//! Failure kinds raised at leaves of the search.
//!
//! Every failure carries the set of variables whose assignments mattered;
//! the walker recovers from all of them by trying other branches, and only a
//! failure at the exhausted root reaches the caller.

use thiserror::Error;

use grist_version::Version;

use crate::package::PackageName;
use crate::qualify::QualifiedName;
use crate::vars::ConflictSet;

/// A failed leaf: why, and which decisions were involved.
#[derive(Debug, Clone)]
pub struct Fail {
    pub conflict: ConflictSet,
    pub reason: FailReason,
}

impl Fail {
    pub fn new(conflict: ConflictSet, reason: FailReason) -> Self {
        Self { conflict, reason }
    }
}

/// The category of a failed leaf.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailReason {
    #[error("unknown package {0}")]
    UnknownPackage(PackageName),

    #[error("{0} cannot satisfy the version constraints")]
    VersionConflict(QualifiedName),

    #[error("{name} does not provide component {component}")]
    MissingComponent {
        name: QualifiedName,
        component: String,
    },

    #[error("{name} needs compiler {needs} or newer")]
    CompilerTooOld { name: PackageName, needs: Version },

    #[error("no allowed value for flag {name}:{flag}")]
    FlagConflict { name: QualifiedName, flag: String },

    #[error("{0} already resolved to a different version in its namespace")]
    SingleInstance(QualifiedName),

    #[error("compiler does not support extension {0}")]
    MissingExtension(String),

    #[error("compiler does not support language {0}")]
    MissingLanguage(String),

    #[error("no installed pkg-config library satisfies {0}")]
    MissingPkgConfig(String),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("setup cycle through {0} would link to the same build")]
    LinkingViolation(PackageName),

    #[error("{name}-{version} is already installed and may not be rebuilt")]
    Reinstall { name: PackageName, version: Version },

    #[error("{0} left out of the build")]
    Skipped(QualifiedName),

    #[error("no viable choice left for {0}")]
    ExhaustedChoices(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        let reason = FailReason::UnknownPackage(PackageName::new("ghost"));
        assert_eq!(reason.to_string(), "unknown package ghost");

        let reason = FailReason::CycleDetected(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(reason.to_string(), "dependency cycle: a -> b -> a");

        let reason = FailReason::MissingExtension("TypeFamilies".into());
        assert_eq!(
            reason.to_string(),
            "compiler does not support extension TypeFamilies"
        );
    }
}

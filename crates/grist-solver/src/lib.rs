//! The dependency resolution core of the grist source-package build tool.
//!
//! Given a catalogue of installed and source packages, the host
//! environment, and a set of build targets, the solver computes a
//! consistent install plan: one version, flag assignment and stanza choice
//! for every package that has to be built, with all transitive
//! dependencies satisfied. Failures come back as a conflict set plus a
//! deterministic narrative; a configurable backjump budget bounds the
//! search.
//!
//! The solver is single-threaded and pure: all inputs are frozen at
//! construction, nothing touches the filesystem or network, and identical
//! inputs produce byte-identical outputs including the event log.

pub mod constraint;
pub mod decisions;
pub mod error;
pub mod events;
pub mod package;
pub mod plan;
pub mod platform;
pub mod policy;
pub mod pool;
pub mod problem;
pub mod qualify;
pub mod request;
pub mod solver;
pub mod tree;
pub mod validate;
pub mod vars;

pub use constraint::{ConstraintSource, Preferences};
pub use error::{Fail, FailReason};
pub use events::{SolveEvent, SolveLog};
pub use grist_version::{Version, VersionRange};
pub use package::{
    Dependency, FlagAssignment, FlagDeclaration, InstalledPackage, PackageId, PackageName,
    PackageSource, SourcePackage, Stanza, UnitId,
};
pub use plan::{ConfiguredPackage, InstallPlan, ResolverPackage};
pub use platform::{CompilerInfo, PkgConfigDb, Platform};
pub use pool::Pool;
pub use problem::Problem;
pub use qualify::{QualifiedName, Qualifier};
pub use request::{Request, SolverOptions, VersionPolicy};
pub use solver::{SolveOutcome, SolveResult, Solver};
pub use vars::{ConflictSet, VarId};

//! The package data model: names, identities, flags, stanzas and the
//! dependency expression tree.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use grist_version::{Version, VersionRange};

/// An opaque package name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The key of one concrete build or installed unit.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A specific available release of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub name: PackageName,
    pub version: Version,
}

impl PackageId {
    pub fn new(name: impl Into<PackageName>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// A configuration flag declared by one package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDeclaration {
    pub name: String,
    pub default: bool,
    /// Manual flags are only moved off their default by an explicit
    /// constraint, never by the solver searching.
    pub manual: bool,
}

impl FlagDeclaration {
    pub fn new(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default,
            manual: false,
        }
    }

    pub fn manual(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default,
            manual: true,
        }
    }
}

/// A total assignment over a package version's declared flags.
pub type FlagAssignment = IndexMap<String, bool>;

/// An optional, conditionally built block of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stanza {
    Tests,
    Benchmarks,
}

impl Stanza {
    pub fn all() -> [Stanza; 2] {
        [Stanza::Tests, Stanza::Benchmarks]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stanza::Tests => "tests",
            Stanza::Benchmarks => "benchmarks",
        }
    }
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One declared dependency of a package version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dependency {
    /// A library dependency on another package.
    Package {
        name: PackageName,
        range: VersionRange,
        /// When set, the target must provide this named component.
        component: Option<String>,
    },
    /// A dependency on an executable built from the named package,
    /// resolved in its own namespace so it may differ from a library
    /// dependency on the same name.
    BuildTool {
        name: PackageName,
        exe: String,
        range: VersionRange,
    },
    /// The configured compiler must support this language extension.
    Extension { name: String },
    /// The configured compiler must support this base language.
    Language { name: String },
    /// An external system library known to the pkg-config database.
    PkgConfig { name: String, range: VersionRange },
    /// Dependencies guarded by a flag of the declaring package.
    Conditional {
        flag: String,
        if_true: Vec<Dependency>,
        if_false: Vec<Dependency>,
    },
}

impl Dependency {
    pub fn on(name: impl Into<PackageName>, range: VersionRange) -> Self {
        Dependency::Package {
            name: name.into(),
            range,
            component: None,
        }
    }

    pub fn on_component(
        name: impl Into<PackageName>,
        range: VersionRange,
        component: impl Into<String>,
    ) -> Self {
        Dependency::Package {
            name: name.into(),
            range,
            component: Some(component.into()),
        }
    }

    pub fn build_tool(
        name: impl Into<PackageName>,
        exe: impl Into<String>,
        range: VersionRange,
    ) -> Self {
        Dependency::BuildTool {
            name: name.into(),
            exe: exe.into(),
            range,
        }
    }

    pub fn extension(name: impl Into<String>) -> Self {
        Dependency::Extension { name: name.into() }
    }

    pub fn language(name: impl Into<String>) -> Self {
        Dependency::Language { name: name.into() }
    }

    pub fn pkg_config(name: impl Into<String>, range: VersionRange) -> Self {
        Dependency::PkgConfig {
            name: name.into(),
            range,
        }
    }

    pub fn conditional(
        flag: impl Into<String>,
        if_true: Vec<Dependency>,
        if_false: Vec<Dependency>,
    ) -> Self {
        Dependency::Conditional {
            flag: flag.into(),
            if_true,
            if_false,
        }
    }
}

/// An available source release: the dependency tree plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePackage {
    pub id: PackageId,
    pub flags: Vec<FlagDeclaration>,
    pub dependencies: Vec<Dependency>,
    /// `Some` when the version declares the stanza, even with no extra deps.
    pub test_dependencies: Option<Vec<Dependency>>,
    pub benchmark_dependencies: Option<Vec<Dependency>>,
    /// Dependencies of the package's own build driver, resolved in a
    /// separate namespace.
    pub setup_dependencies: Vec<Dependency>,
    /// Named components this release provides; empty means just "lib".
    pub components: Vec<String>,
    pub min_compiler: Option<Version>,
}

impl SourcePackage {
    pub fn new(name: impl Into<PackageName>, version: Version) -> Self {
        Self {
            id: PackageId::new(name, version),
            flags: Vec::new(),
            dependencies: Vec::new(),
            test_dependencies: None,
            benchmark_dependencies: None,
            setup_dependencies: Vec::new(),
            components: Vec::new(),
            min_compiler: None,
        }
    }

    pub fn name(&self) -> &PackageName {
        &self.id.name
    }

    pub fn version(&self) -> &Version {
        &self.id.version
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_flag(mut self, flag: FlagDeclaration) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn with_test_stanza(mut self, dependencies: Vec<Dependency>) -> Self {
        self.test_dependencies = Some(dependencies);
        self
    }

    pub fn with_benchmark_stanza(mut self, dependencies: Vec<Dependency>) -> Self {
        self.benchmark_dependencies = Some(dependencies);
        self
    }

    pub fn with_setup_dependency(mut self, dependency: Dependency) -> Self {
        self.setup_dependencies.push(dependency);
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn with_min_compiler(mut self, version: Version) -> Self {
        self.min_compiler = Some(version);
        self
    }

    pub fn declares_stanza(&self, stanza: Stanza) -> bool {
        self.stanza_dependencies(stanza).is_some()
    }

    pub fn stanza_dependencies(&self, stanza: Stanza) -> Option<&[Dependency]> {
        match stanza {
            Stanza::Tests => self.test_dependencies.as_deref(),
            Stanza::Benchmarks => self.benchmark_dependencies.as_deref(),
        }
    }

    pub fn flag_declaration(&self, name: &str) -> Option<&FlagDeclaration> {
        self.flags.iter().find(|f| f.name == name)
    }

    /// The assignment taking every declared flag at its default.
    pub fn default_flags(&self) -> FlagAssignment {
        self.flags
            .iter()
            .map(|f| (f.name.clone(), f.default))
            .collect()
    }

    pub fn provides_component(&self, component: &str) -> bool {
        if self.components.is_empty() {
            component == "lib"
        } else {
            self.components.iter().any(|c| c == component)
        }
    }
}

/// A package already present in the installed store. Immutable,
/// pre-validated, with concrete dependencies on other installed units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub unit: UnitId,
    pub id: PackageId,
    pub depends: Vec<UnitId>,
    pub exposed: bool,
}

impl InstalledPackage {
    pub fn new(unit: impl Into<UnitId>, name: impl Into<PackageName>, version: Version) -> Self {
        Self {
            unit: unit.into(),
            id: PackageId::new(name, version),
            depends: Vec::new(),
            exposed: true,
        }
    }

    pub fn with_depends(mut self, depends: Vec<UnitId>) -> Self {
        self.depends = depends;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.exposed = false;
        self
    }

    pub fn name(&self) -> &PackageName {
        &self.id.name
    }

    pub fn version(&self) -> &Version {
        &self.id.version
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        UnitId::new(s)
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        UnitId(s)
    }
}

/// One catalogue entry: an installed unit or an available source release.
#[derive(Debug, Clone)]
pub enum PackageSource {
    Installed(Arc<InstalledPackage>),
    Source(Arc<SourcePackage>),
}

impl PackageSource {
    pub fn name(&self) -> &PackageName {
        match self {
            PackageSource::Installed(p) => p.name(),
            PackageSource::Source(p) => p.name(),
        }
    }

    pub fn version(&self) -> &Version {
        match self {
            PackageSource::Installed(p) => p.version(),
            PackageSource::Source(p) => p.version(),
        }
    }

    pub fn id(&self) -> &PackageId {
        match self {
            PackageSource::Installed(p) => &p.id,
            PackageSource::Source(p) => &p.id,
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, PackageSource::Installed(_))
    }

    pub fn as_installed(&self) -> Option<&Arc<InstalledPackage>> {
        match self {
            PackageSource::Installed(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<&Arc<SourcePackage>> {
        match self {
            PackageSource::Source(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Installed(p) => write!(f, "{}/installed", p.id),
            PackageSource::Source(p) => write!(f, "{}", p.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_version::VersionRange;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_package_id_display() {
        let id = PackageId::new("acme", v("1.2.3"));
        assert_eq!(id.to_string(), "acme-1.2.3");
    }

    #[test]
    fn test_default_flags() {
        let pkg = SourcePackage::new("acme", v("1"))
            .with_flag(FlagDeclaration::new("fast", true))
            .with_flag(FlagDeclaration::new("debug", false));
        let defaults = pkg.default_flags();
        assert_eq!(defaults.get("fast"), Some(&true));
        assert_eq!(defaults.get("debug"), Some(&false));
    }

    #[test]
    fn test_components() {
        let plain = SourcePackage::new("acme", v("1"));
        assert!(plain.provides_component("lib"));
        assert!(!plain.provides_component("cli"));

        let multi = SourcePackage::new("acme", v("1")).with_component("cli");
        assert!(multi.provides_component("cli"));
        assert!(!multi.provides_component("lib"));
    }

    #[test]
    fn test_stanza_declaration() {
        let pkg = SourcePackage::new("acme", v("1")).with_test_stanza(vec![Dependency::on(
            "test-kit",
            VersionRange::Any,
        )]);
        assert!(pkg.declares_stanza(Stanza::Tests));
        assert!(!pkg.declares_stanza(Stanza::Benchmarks));
        assert_eq!(pkg.stanza_dependencies(Stanza::Tests).unwrap().len(), 1);
    }

    #[test]
    fn test_installed_package() {
        let installed = InstalledPackage::new("base-4.1", "base", v("4.1"))
            .with_depends(vec![UnitId::new("rts-1.0")]);
        assert!(installed.exposed);
        assert_eq!(installed.depends.len(), 1);
        assert!(!installed.clone().hidden().exposed);
    }
}

//! The fixed environment a solve runs against: host platform, compiler
//! capabilities and the pkg-config database. All of it is read-only input;
//! validation consults it, nothing mutates it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use grist_version::{Version, VersionRange};

/// The host platform, carried through to the rendered log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub wordsize: u32,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>, wordsize: u32) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            wordsize,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} ({}bit)", self.os, self.arch, self.wordsize)
    }
}

/// What the configured compiler can do.
///
/// Extension and language support is exactly the enumerated sets: an
/// extension not listed here is unsupported, full stop.
#[derive(Debug, Clone)]
pub struct CompilerInfo {
    pub flavor: String,
    pub version: Version,
    extensions: HashSet<String>,
    languages: HashSet<String>,
    pub abi: String,
}

impl CompilerInfo {
    pub fn new(flavor: impl Into<String>, version: Version) -> Self {
        Self {
            flavor: flavor.into(),
            version,
            extensions: HashSet::new(),
            languages: HashSet::new(),
            abi: String::new(),
        }
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    pub fn with_language(mut self, name: impl Into<String>) -> Self {
        self.languages.insert(name.into());
        self
    }

    pub fn with_abi(mut self, abi: impl Into<String>) -> Self {
        self.abi = abi.into();
        self
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn supports_language(&self, name: &str) -> bool {
        self.languages.contains(name)
    }
}

impl fmt::Display for CompilerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.flavor, self.version)
    }
}

/// Installed system libraries as reported by pkg-config.
#[derive(Debug, Clone, Default)]
pub struct PkgConfigDb {
    libs: HashMap<String, Vec<Version>>,
}

impl PkgConfigDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lib(mut self, name: impl Into<String>, versions: Vec<Version>) -> Self {
        self.libs.insert(name.into(), versions);
        self
    }

    pub fn knows(&self, name: &str) -> bool {
        self.libs.contains_key(name)
    }

    pub fn satisfies(&self, name: &str, range: &VersionRange) -> bool {
        self.libs
            .get(name)
            .map(|versions| versions.iter().any(|v| range.contains(v)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_compiler_support() {
        let compiler = CompilerInfo::new("ghc", v("9.2"))
            .with_extension("TypeFamilies")
            .with_language("Haskell2010");
        assert!(compiler.supports_extension("TypeFamilies"));
        assert!(!compiler.supports_extension("MagicHash"));
        assert!(compiler.supports_language("Haskell2010"));
        assert!(!compiler.supports_language("Haskell98"));
    }

    #[test]
    fn test_pkg_config_lookup() {
        let db = PkgConfigDb::new().with_lib("zlib", vec![v("1.2.11")]);
        assert!(db.knows("zlib"));
        assert!(!db.knows("openssl"));
        assert!(db.satisfies("zlib", &VersionRange::OrLater(v("1.2"))));
        assert!(!db.satisfies("zlib", &VersionRange::OrLater(v("1.3"))));
        assert!(!db.satisfies("openssl", &VersionRange::Any));
    }

    #[test]
    fn test_platform_display() {
        let platform = Platform::new("linux", "x86_64", 64);
        assert_eq!(platform.to_string(), "linux-x86_64 (64bit)");
    }
}

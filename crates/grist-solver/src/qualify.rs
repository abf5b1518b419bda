//! Namespaces for package goals.
//!
//! Copies of a package built for different roles live under different
//! qualifiers and may resolve to different versions; within one qualifier a
//! name resolves at most once.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::package::PackageName;

/// The namespace a package goal is resolved in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Qualifier {
    /// The default namespace of user targets and their closure.
    Top,
    /// Per-target namespace used when targets are solved independently.
    Indep(u32),
    /// Dependencies of a package's own build driver.
    Setup(PackageName),
    /// Dependencies of a build tool executable required by a package.
    Exe(PackageName, String),
}

impl Qualifier {
    pub fn is_setup(&self) -> bool {
        matches!(self, Qualifier::Setup(_))
    }

    /// Whether goals in this namespace stem from a user target directly.
    pub fn is_toplevel(&self) -> bool {
        matches!(self, Qualifier::Top | Qualifier::Indep(_))
    }
}

/// A package name inside a namespace; the unit of the single-instance rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub qualifier: Qualifier,
    pub name: PackageName,
}

impl QualifiedName {
    pub fn new(qualifier: Qualifier, name: impl Into<PackageName>) -> Self {
        Self {
            qualifier,
            name: name.into(),
        }
    }

    pub fn top(name: impl Into<PackageName>) -> Self {
        Self::new(Qualifier::Top, name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Qualifier::Top => write!(f, "{}", self.name),
            Qualifier::Indep(n) => write!(f, "{}.{}", n, self.name),
            Qualifier::Setup(p) => write!(f, "{}:setup.{}", p, self.name),
            Qualifier::Exe(p, exe) => write!(f, "{}:{}:exe.{}", p, exe, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(QualifiedName::top("acme").to_string(), "acme");
        assert_eq!(
            QualifiedName::new(Qualifier::Indep(1), "acme").to_string(),
            "1.acme"
        );
        assert_eq!(
            QualifiedName::new(Qualifier::Setup(PackageName::new("acme")), "dep").to_string(),
            "acme:setup.dep"
        );
        assert_eq!(
            QualifiedName::new(
                Qualifier::Exe(PackageName::new("acme"), "gen".to_string()),
                "dep"
            )
            .to_string(),
            "acme:gen:exe.dep"
        );
    }

    #[test]
    fn test_qualifier_predicates() {
        assert!(Qualifier::Top.is_toplevel());
        assert!(Qualifier::Indep(3).is_toplevel());
        assert!(Qualifier::Setup(PackageName::new("a")).is_setup());
        assert!(!Qualifier::Exe(PackageName::new("a"), "x".into()).is_toplevel());
    }
}

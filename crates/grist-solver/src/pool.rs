//! The read-only catalogue of installed and source packages.
//!
//! Built once per solve; results are stable across queries, and version
//! lists come back highest first. Installed units keep their own unit-id
//! index because installed dependencies point at units, not names.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::package::{InstalledPackage, PackageName, PackageSource, SourcePackage, UnitId};

/// The package catalogue a solve runs against.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    by_name: IndexMap<PackageName, Vec<PackageSource>>,
    installed_by_unit: HashMap<UnitId, Arc<InstalledPackage>>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, package: SourcePackage) {
        let name = package.name().clone();
        let entry = PackageSource::Source(Arc::new(package));
        let versions = self.by_name.entry(name).or_default();
        versions.push(entry);
        Self::sort_entries(versions);
    }

    pub fn add_installed(&mut self, package: InstalledPackage) {
        let arc = Arc::new(package);
        self.installed_by_unit.insert(arc.unit.clone(), arc.clone());
        let versions = self.by_name.entry(arc.name().clone()).or_default();
        versions.push(PackageSource::Installed(arc));
        Self::sort_entries(versions);
    }

    /// Highest version first; an installed unit sorts before a source
    /// release of the same version.
    fn sort_entries(entries: &mut [PackageSource]) {
        entries.sort_by(|a, b| {
            b.version()
                .cmp(a.version())
                .then_with(|| b.is_installed().cmp(&a.is_installed()))
        });
    }

    /// Every known release of the named package, highest version first.
    /// Unknown names yield an empty slice.
    pub fn lookup(&self, name: &PackageName) -> &[PackageSource] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        !self.lookup(name).is_empty()
    }

    pub fn installed_by_unit(&self, unit: &UnitId) -> Option<&Arc<InstalledPackage>> {
        self.installed_by_unit.get(unit)
    }

    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.by_name.keys()
    }

    /// A copy of this pool with the configured pre-search filters applied.
    ///
    /// `shadow_installed` drops installed units whose exact version is also
    /// available as source, so the source release wins. `avoid_reinstalls`
    /// drops source releases whose exact version is already installed, so
    /// the installed unit is reused instead. When both are on, shadowing is
    /// applied first and reinstall avoidance only consults what remains.
    pub fn with_filters(&self, shadow_installed: bool, avoid_reinstalls: bool) -> Pool {
        let mut filtered = self.clone();
        for versions in filtered.by_name.values_mut() {
            if shadow_installed {
                let source_versions: Vec<_> = versions
                    .iter()
                    .filter(|e| !e.is_installed())
                    .map(|e| e.version().clone())
                    .collect();
                versions.retain(|e| {
                    !(e.is_installed() && source_versions.contains(e.version()))
                });
            }
            if avoid_reinstalls {
                let installed_versions: Vec<_> = versions
                    .iter()
                    .filter(|e| e.is_installed())
                    .map(|e| e.version().clone())
                    .collect();
                versions.retain(|e| {
                    e.is_installed() || !installed_versions.contains(e.version())
                });
            }
        }
        // Unit lookups stay complete: filters affect which versions may be
        // chosen by name, not which installed units exist.
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_version::Version;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn name(s: &str) -> PackageName {
        PackageName::new(s)
    }

    #[test]
    fn test_lookup_orders_versions_high_to_low() {
        let mut pool = Pool::new();
        pool.add_source(SourcePackage::new("a", v("1")));
        pool.add_source(SourcePackage::new("a", v("3")));
        pool.add_source(SourcePackage::new("a", v("2")));

        let versions: Vec<String> = pool
            .lookup(&name("a"))
            .iter()
            .map(|e| e.version().to_string())
            .collect();
        assert_eq!(versions, vec!["3", "2", "1"]);
    }

    #[test]
    fn test_installed_sorts_before_source_on_tie() {
        let mut pool = Pool::new();
        pool.add_source(SourcePackage::new("a", v("1")));
        pool.add_installed(InstalledPackage::new("a-1", "a", v("1")));

        let entries = pool.lookup(&name("a"));
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_installed());
        assert!(!entries[1].is_installed());
    }

    #[test]
    fn test_unknown_name_is_empty() {
        let pool = Pool::new();
        assert!(pool.lookup(&name("ghost")).is_empty());
        assert!(!pool.contains(&name("ghost")));
    }

    #[test]
    fn test_unit_lookup() {
        let mut pool = Pool::new();
        pool.add_installed(
            InstalledPackage::new("a-1", "a", v("1")).with_depends(vec![UnitId::new("b-2")]),
        );
        let unit = pool.installed_by_unit(&UnitId::new("a-1")).unwrap();
        assert_eq!(unit.version(), &v("1"));
        assert!(pool.installed_by_unit(&UnitId::new("b-2")).is_none());
    }

    #[test]
    fn test_shadow_filter_hides_installed_duplicates() {
        let mut pool = Pool::new();
        pool.add_source(SourcePackage::new("a", v("1")));
        pool.add_installed(InstalledPackage::new("a-1", "a", v("1")));

        let filtered = pool.with_filters(true, false);
        let entries = filtered.lookup(&name("a"));
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_installed());
        // The unit index still knows the shadowed unit.
        assert!(filtered.installed_by_unit(&UnitId::new("a-1")).is_some());
    }

    #[test]
    fn test_avoid_reinstalls_hides_source_duplicates() {
        let mut pool = Pool::new();
        pool.add_source(SourcePackage::new("a", v("1")));
        pool.add_source(SourcePackage::new("a", v("2")));
        pool.add_installed(InstalledPackage::new("a-1", "a", v("1")));

        let filtered = pool.with_filters(false, true);
        let entries = filtered.lookup(&name("a"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version(), &v("2"));
        assert!(entries[1].is_installed());
    }
}

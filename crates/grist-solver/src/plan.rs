//! Install-plan assembly from a complete assignment.
//!
//! Copies of a package chosen in different namespaces are linked into one
//! build unit when they are structurally identical (same version, flags,
//! stanzas and dependency units). The finished graph must be acyclic except
//! where a setup namespace demonstrably breaks a cycle by holding a
//! different version; anything else turns the would-be plan back into a
//! failure and the walk resumes.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::decisions::Decision;
use crate::error::{Fail, FailReason};
use crate::events::{SolveEvent, SolveLog};
use crate::package::{
    Dependency, FlagAssignment, InstalledPackage, PackageName, PackageSource, SourcePackage,
    Stanza, UnitId,
};
use crate::qualify::{QualifiedName, Qualifier};
use crate::tree::SearchState;
use crate::vars::{ConflictSet, VarId, VarKind};

/// One entry of the finished plan, in build order.
#[derive(Debug, Clone)]
pub enum ResolverPackage {
    /// Already present in the installed store; nothing to do.
    PreExisting(Arc<InstalledPackage>),
    /// A source release to configure and build.
    Configured(ConfiguredPackage),
}

impl ResolverPackage {
    pub fn name(&self) -> &PackageName {
        match self {
            ResolverPackage::PreExisting(p) => p.name(),
            ResolverPackage::Configured(c) => c.package.name(),
        }
    }

    pub fn version(&self) -> &grist_version::Version {
        match self {
            ResolverPackage::PreExisting(p) => p.version(),
            ResolverPackage::Configured(c) => c.package.version(),
        }
    }

    pub fn unit(&self) -> &UnitId {
        match self {
            ResolverPackage::PreExisting(p) => &p.unit,
            ResolverPackage::Configured(c) => &c.unit,
        }
    }
}

/// A source release with everything bound: flags, stanzas and the concrete
/// units it builds against.
#[derive(Debug, Clone)]
pub struct ConfiguredPackage {
    pub package: Arc<SourcePackage>,
    pub flags: FlagAssignment,
    pub stanzas: Vec<Stanza>,
    pub depends: Vec<UnitId>,
    pub setup_depends: Vec<UnitId>,
    pub unit: UnitId,
}

/// The solver's successful output: units in dependency order.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    pub packages: Vec<ResolverPackage>,
}

impl InstallPlan {
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains_version(&self, name: &str, version: &str) -> bool {
        self.packages.iter().any(|p| {
            p.name().as_str() == name && p.version().to_string() == version
        })
    }

    /// Versions of the named package in plan order.
    pub fn versions_of(&self, name: &str) -> Vec<String> {
        self.packages
            .iter()
            .filter(|p| p.name().as_str() == name)
            .map(|p| p.version().to_string())
            .collect()
    }

    pub fn unit_ids(&self) -> Vec<&UnitId> {
        self.packages.iter().map(|p| p.unit()).collect()
    }

    pub fn configured(&self) -> impl Iterator<Item = &ConfiguredPackage> {
        self.packages.iter().filter_map(|p| match p {
            ResolverPackage::Configured(c) => Some(c),
            _ => None,
        })
    }

    pub fn preexisting(&self) -> impl Iterator<Item = &Arc<InstalledPackage>> {
        self.packages.iter().filter_map(|p| match p {
            ResolverPackage::PreExisting(i) => Some(i),
            _ => None,
        })
    }

    pub fn find_configured(&self, name: &str) -> Option<&ConfiguredPackage> {
        self.configured().find(|c| c.package.name().as_str() == name)
    }
}

/// One decided package copy before linking.
struct PlanCopy {
    var: VarId,
    qname: QualifiedName,
    source: PackageSource,
    flags: FlagAssignment,
    stanzas: Vec<Stanza>,
    lib_deps: Vec<usize>,
    setup_deps: Vec<usize>,
}

/// Assemble the plan for a complete assignment, or explain why the
/// assignment does not hold together after all.
pub fn build_plan(state: &SearchState, log: &mut SolveLog) -> Result<InstallPlan, Fail> {
    let (mut copies, index_of) = collect_copies(state)?;
    resolve_dep_indices(state, &mut copies, &index_of)?;

    let class = link_copies(&copies);
    let units = assign_units(&copies, &class);

    for (i, copy) in copies.iter().enumerate() {
        if class[i] != i {
            log.push(SolveEvent::Linking {
                kept: units[&class[i]].to_string(),
                merged: copy.qname.to_string(),
            });
        }
    }

    if state.request.options.avoid_reinstalls {
        check_reinstalls(state, &copies, &class)?;
    }

    let broken = check_cycles(&copies, &class, &index_of)?;
    let order = topological_order(&copies, &class, &units, &broken);

    let mut plan = InstallPlan::default();
    for rep in order {
        let copy = &copies[rep];
        match &copy.source {
            PackageSource::Installed(installed) => {
                plan.packages
                    .push(ResolverPackage::PreExisting(installed.clone()));
            }
            PackageSource::Source(package) => {
                plan.packages.push(ResolverPackage::Configured(ConfiguredPackage {
                    package: package.clone(),
                    flags: copy.flags.clone(),
                    stanzas: copy.stanzas.clone(),
                    depends: dep_units(&copy.lib_deps, &class, &units),
                    setup_depends: dep_units(&copy.setup_deps, &class, &units),
                    unit: units[&rep].clone(),
                }));
            }
        }
    }
    Ok(plan)
}

fn dep_units(deps: &[usize], class: &[usize], units: &IndexMap<usize, UnitId>) -> Vec<UnitId> {
    let mut out = Vec::new();
    for &dep in deps {
        let unit = units[&class[dep]].clone();
        if !out.contains(&unit) {
            out.push(unit);
        }
    }
    out
}

/// Gather every decided package copy in decision order, with its bound
/// flags and stanzas.
fn collect_copies(
    state: &SearchState,
) -> Result<(Vec<PlanCopy>, IndexMap<QualifiedName, usize>), Fail> {
    let mut copies = Vec::new();
    let mut index_of = IndexMap::new();

    for (var, decision) in state.decisions.iter_trail() {
        let Decision::Version(source) = decision else {
            continue;
        };
        let qname = state.vars.kind(var).qualified_name().clone();

        let (flags, stanzas) = match source {
            PackageSource::Source(package) => {
                let mut flags = FlagAssignment::new();
                for declaration in &package.flags {
                    let flag_var = state
                        .vars
                        .get(&VarKind::Flag(qname.clone(), declaration.name.clone()));
                    let value = flag_var
                        .and_then(|fv| state.decisions.flag_value(fv))
                        .unwrap_or(declaration.default);
                    flags.insert(declaration.name.clone(), value);
                }
                let mut stanzas = Vec::new();
                for stanza in Stanza::all() {
                    if package.declares_stanza(stanza) {
                        let stanza_var =
                            state.vars.get(&VarKind::Stanza(qname.clone(), stanza));
                        if stanza_var
                            .and_then(|sv| state.decisions.stanza_enabled(sv))
                            .unwrap_or(false)
                        {
                            stanzas.push(stanza);
                        }
                    }
                }
                (flags, stanzas)
            }
            PackageSource::Installed(_) => (FlagAssignment::new(), Vec::new()),
        };

        index_of.insert(qname.clone(), copies.len());
        copies.push(PlanCopy {
            var,
            qname,
            source: source.clone(),
            flags,
            stanzas,
            lib_deps: Vec::new(),
            setup_deps: Vec::new(),
        });
    }

    Ok((copies, index_of))
}

/// Re-walk each copy's dependency tree under its final flag assignment and
/// point every edge at a concrete copy.
fn resolve_dep_indices(
    state: &SearchState,
    copies: &mut [PlanCopy],
    index_of: &IndexMap<QualifiedName, usize>,
) -> Result<(), Fail> {
    for i in 0..copies.len() {
        let (lib_targets, setup_targets) = match &copies[i].source {
            PackageSource::Installed(installed) => {
                let mut targets = Vec::new();
                for unit in &installed.depends {
                    let Some(dep) = state.pool.installed_by_unit(unit) else {
                        return Err(Fail::new(
                            ConflictSet::singleton(copies[i].var),
                            FailReason::UnknownPackage(PackageName::new(unit.as_str())),
                        ));
                    };
                    targets.push(QualifiedName::new(
                        copies[i].qname.qualifier.clone(),
                        dep.name().clone(),
                    ));
                }
                (targets, Vec::new())
            }
            PackageSource::Source(package) => {
                let mut lib = Vec::new();
                collect_targets(
                    &copies[i].qname,
                    &package.dependencies,
                    &copies[i].flags,
                    &mut lib,
                );
                for stanza in &copies[i].stanzas {
                    if let Some(deps) = package.stanza_dependencies(*stanza) {
                        collect_targets(&copies[i].qname, deps, &copies[i].flags, &mut lib);
                    }
                }
                let mut setup = Vec::new();
                collect_setup_targets(
                    &copies[i].qname,
                    &package.setup_dependencies,
                    &copies[i].flags,
                    &mut setup,
                );
                (lib, setup)
            }
        };

        let var = copies[i].var;
        let to_indices = |targets: Vec<QualifiedName>| -> Result<Vec<usize>, Fail> {
            let mut out = Vec::new();
            for target in targets {
                let Some(&idx) = index_of.get(&target) else {
                    return Err(Fail::new(
                        ConflictSet::singleton(var),
                        FailReason::UnknownPackage(target.name.clone()),
                    ));
                };
                if !out.contains(&idx) {
                    out.push(idx);
                }
            }
            Ok(out)
        };

        copies[i].lib_deps = to_indices(lib_targets)?;
        copies[i].setup_deps = to_indices(setup_targets)?;
    }
    Ok(())
}

fn collect_targets(
    owner: &QualifiedName,
    deps: &[Dependency],
    flags: &FlagAssignment,
    out: &mut Vec<QualifiedName>,
) {
    for dep in deps {
        match dep {
            Dependency::Package { name, .. } => {
                out.push(QualifiedName::new(owner.qualifier.clone(), name.clone()));
            }
            Dependency::BuildTool { name, exe, .. } => {
                out.push(QualifiedName::new(
                    Qualifier::Exe(owner.name.clone(), exe.clone()),
                    name.clone(),
                ));
            }
            Dependency::Conditional {
                flag,
                if_true,
                if_false,
            } => {
                if let Some(&value) = flags.get(flag) {
                    let arm = if value { if_true } else { if_false };
                    collect_targets(owner, arm, flags, out);
                }
            }
            _ => {}
        }
    }
}

fn collect_setup_targets(
    owner: &QualifiedName,
    deps: &[Dependency],
    flags: &FlagAssignment,
    out: &mut Vec<QualifiedName>,
) {
    for dep in deps {
        match dep {
            Dependency::Package { name, .. } => {
                out.push(QualifiedName::new(
                    Qualifier::Setup(owner.name.clone()),
                    name.clone(),
                ));
            }
            Dependency::Conditional {
                flag,
                if_true,
                if_false,
            } => {
                if let Some(&value) = flags.get(flag) {
                    let arm = if value { if_true } else { if_false };
                    collect_setup_targets(owner, arm, flags, out);
                }
            }
            _ => {}
        }
    }
}

/// Partition copies into link classes: equal version, flags, stanzas and
/// (recursively) equal dependency units collapse into one build.
fn link_copies(copies: &[PlanCopy]) -> Vec<usize> {
    let base_key: Vec<String> = copies
        .iter()
        .map(|copy| match &copy.source {
            PackageSource::Installed(installed) => format!("installed:{}", installed.unit),
            PackageSource::Source(package) => {
                let flags: Vec<String> = copy
                    .flags
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                let stanzas: Vec<&str> = copy.stanzas.iter().map(Stanza::as_str).collect();
                format!(
                    "{}:{}:{}:{}",
                    package.name(),
                    package.version(),
                    flags.join(","),
                    stanzas.join(",")
                )
            }
        })
        .collect();

    let mut class: Vec<usize> = {
        let mut seen: IndexMap<&str, usize> = IndexMap::new();
        base_key
            .iter()
            .enumerate()
            .map(|(i, key)| *seen.entry(key.as_str()).or_insert(i))
            .collect()
    };

    loop {
        let mut seen: IndexMap<String, usize> = IndexMap::new();
        let mut next = Vec::with_capacity(copies.len());
        for (i, copy) in copies.iter().enumerate() {
            let lib: Vec<usize> = copy.lib_deps.iter().map(|&d| class[d]).collect();
            let setup: Vec<usize> = copy.setup_deps.iter().map(|&d| class[d]).collect();
            let signature = format!("{}|{lib:?}|{setup:?}", base_key[i]);
            next.push(*seen.entry(signature).or_insert(i));
        }
        if next == class {
            return class;
        }
        class = next;
    }
}

/// Deterministic unit ids: installed units keep theirs; configured builds
/// get name-version, suffixed when divergent configurations coexist.
fn assign_units(copies: &[PlanCopy], class: &[usize]) -> IndexMap<usize, UnitId> {
    // Installed units keep their ids and must never be shadowed by a
    // configured build of the same name and version.
    let taken: Vec<&UnitId> = copies
        .iter()
        .enumerate()
        .filter(|&(i, _)| class[i] == i)
        .filter_map(|(_, copy)| copy.source.as_installed().map(|p| &p.unit))
        .collect();

    let mut units: IndexMap<usize, UnitId> = IndexMap::new();
    for (i, copy) in copies.iter().enumerate() {
        if class[i] != i {
            continue;
        }
        let unit = match &copy.source {
            PackageSource::Installed(installed) => installed.unit.clone(),
            PackageSource::Source(package) => {
                let base = format!("{}-{}", package.name(), package.version());
                let mut candidate = UnitId::new(base.clone());
                let mut bump = 0usize;
                while taken.contains(&&candidate) || units.values().any(|u| u == &candidate) {
                    bump += 1;
                    candidate = UnitId::new(format!("{base}+{bump}"));
                }
                candidate
            }
        };
        units.insert(i, unit);
    }
    units
}

fn check_reinstalls(
    state: &SearchState,
    copies: &[PlanCopy],
    class: &[usize],
) -> Result<(), Fail> {
    for (i, copy) in copies.iter().enumerate() {
        if class[i] != i {
            continue;
        }
        let PackageSource::Source(package) = &copy.source else {
            continue;
        };
        let already_installed = state
            .pool
            .lookup(package.name())
            .iter()
            .any(|e| e.is_installed() && e.version() == package.version());
        if already_installed {
            let conflict: ConflictSet = copies
                .iter()
                .enumerate()
                .filter(|&(j, _)| class[j] == i)
                .map(|(_, c)| c.var)
                .collect();
            return Err(Fail::new(
                conflict,
                FailReason::Reinstall {
                    name: package.name().clone(),
                    version: package.version().clone(),
                },
            ));
        }
    }
    Ok(())
}

type ClassEdge = (usize, usize, bool);

/// Reject cycles, allowing a library cycle to stand only when one of its
/// edges is doubled by a setup dependency whose namespace holds a different
/// version of the dependent. Returns the library edges broken that way;
/// they are ignored for ordering.
fn check_cycles(
    copies: &[PlanCopy],
    class: &[usize],
    index_of: &IndexMap<QualifiedName, usize>,
) -> Result<Vec<(usize, usize)>, Fail> {
    let mut edges: Vec<ClassEdge> = Vec::new();
    for (i, copy) in copies.iter().enumerate() {
        for &dep in &copy.lib_deps {
            let edge = (class[i], class[dep], false);
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }
        for &dep in &copy.setup_deps {
            let edge = (class[i], class[dep], true);
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }
    }

    let mut broken: Vec<(usize, usize)> = Vec::new();
    loop {
        let Some(cycle) = find_cycle(copies.len(), &edges, &broken) else {
            return Ok(broken);
        };

        let members: Vec<usize> = cycle.iter().map(|&(u, _, _)| u).collect();
        let conflict: ConflictSet = copies
            .iter()
            .enumerate()
            .filter(|&(j, _)| members.contains(&class[j]))
            .map(|(_, c)| c.var)
            .collect();

        if cycle.iter().any(|&(_, _, setup)| setup) {
            // The cycle only closed because a setup namespace linked back
            // to the very same build.
            let name = copies[cycle[0].0].qname.name.clone();
            return Err(Fail::new(conflict, FailReason::LinkingViolation(name)));
        }

        let escape = cycle.iter().find(|&&(u, v, _)| {
            setup_escape(&copies[u], &copies[v].qname.name, copies, index_of)
        });
        match escape {
            Some(&(u, v, _)) => broken.push((u, v)),
            None => {
                let mut names: Vec<String> =
                    cycle.iter().map(|&(u, _, _)| copies[u].qname.to_string()).collect();
                names.push(copies[cycle[0].0].qname.to_string());
                return Err(Fail::new(conflict, FailReason::CycleDetected(names)));
            }
        }
    }
}

/// Whether `dependent`'s setup namespace holds a different version of
/// `dependent` itself, breaking its library cycle through `dep_name`.
fn setup_escape(
    dependent: &PlanCopy,
    dep_name: &PackageName,
    copies: &[PlanCopy],
    index_of: &IndexMap<QualifiedName, usize>,
) -> bool {
    let PackageSource::Source(package) = &dependent.source else {
        return false;
    };
    if !mentions_package(&package.setup_dependencies, dep_name) {
        return false;
    }
    let setup_self = QualifiedName::new(
        Qualifier::Setup(package.name().clone()),
        package.name().clone(),
    );
    match index_of.get(&setup_self) {
        Some(&idx) => copies[idx].source.version() != package.version(),
        None => false,
    }
}

fn mentions_package(deps: &[Dependency], name: &PackageName) -> bool {
    deps.iter().any(|dep| match dep {
        Dependency::Package { name: dep_name, .. } => dep_name == name,
        Dependency::Conditional {
            if_true, if_false, ..
        } => mentions_package(if_true, name) || mentions_package(if_false, name),
        _ => false,
    })
}

/// Depth-first search for any cycle among class nodes; returns the edge
/// sequence forming it.
fn find_cycle(
    n: usize,
    edges: &[ClassEdge],
    broken: &[(usize, usize)],
) -> Option<Vec<ClassEdge>> {
    let mut color = vec![0u8; n];

    fn visit(
        node: usize,
        edges: &[ClassEdge],
        broken: &[(usize, usize)],
        color: &mut [u8],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<ClassEdge>> {
        color[node] = 1;
        stack.push(node);
        for &(u, v, setup) in edges {
            if u != node || broken.contains(&(u, v)) {
                continue;
            }
            if color[v] == 1 {
                // Close the loop along the stack from v to node.
                let start = stack.iter().position(|&s| s == v).unwrap_or(0);
                let mut cycle = Vec::new();
                for w in start..stack.len() - 1 {
                    let (a, b) = (stack[w], stack[w + 1]);
                    let kind = edge_kind(edges, broken, a, b);
                    cycle.push((a, b, kind));
                }
                cycle.push((node, v, setup));
                return Some(cycle);
            }
            if color[v] == 0 {
                if let Some(cycle) = visit(v, edges, broken, color, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        color[node] = 2;
        None
    }

    for start in 0..n {
        if color[start] == 0 {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(start, edges, broken, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kind of the edge between the pair: a live library edge counts as
/// library, anything else as setup.
fn edge_kind(edges: &[ClassEdge], broken: &[(usize, usize)], a: usize, b: usize) -> bool {
    !(edges.contains(&(a, b, false)) && !broken.contains(&(a, b)))
}

/// Kahn's algorithm over link classes; ties resolve by unit id so the
/// output order is stable.
fn topological_order(
    copies: &[PlanCopy],
    class: &[usize],
    units: &IndexMap<usize, UnitId>,
    broken: &[(usize, usize)],
) -> Vec<usize> {
    let reps: Vec<usize> = (0..copies.len()).filter(|&i| class[i] == i).collect();

    let mut deps_of: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for &rep in &reps {
        deps_of.insert(rep, Vec::new());
    }
    for (i, copy) in copies.iter().enumerate() {
        let from = class[i];
        for &dep in &copy.lib_deps {
            let to = class[dep];
            if from != to && !broken.contains(&(from, to)) {
                let entry = deps_of.entry(from).or_default();
                if !entry.contains(&to) {
                    entry.push(to);
                }
            }
        }
        for &dep in &copy.setup_deps {
            let to = class[dep];
            if from != to {
                let entry = deps_of.entry(from).or_default();
                if !entry.contains(&to) {
                    entry.push(to);
                }
            }
        }
    }

    let mut emitted: Vec<usize> = Vec::new();
    let mut done: Vec<bool> = vec![false; copies.len()];
    while emitted.len() < reps.len() {
        let mut ready: Vec<usize> = reps
            .iter()
            .copied()
            .filter(|&rep| {
                !done[rep]
                    && deps_of
                        .get(&rep)
                        .map(|deps| deps.iter().all(|&d| done[d]))
                        .unwrap_or(true)
            })
            .collect();
        if ready.is_empty() {
            // Unreachable once cycles are rejected; emit the rest in unit
            // order rather than spin.
            ready = reps.iter().copied().filter(|&rep| !done[rep]).collect();
        }
        ready.sort_by(|&a, &b| units[&a].cmp(&units[&b]));
        let next = ready[0];
        done[next] = true;
        emitted.push(next);
    }
    emitted
}

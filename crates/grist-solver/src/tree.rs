//! The lazy search tree.
//!
//! The tree is never materialized: its frontier lives in the agenda of open
//! goals, and committing to a branch unfolds exactly one level — new
//! constraints, new goals, new dependency edges. Every mutation is trailed
//! so the walker can rewind to any earlier frame.

use indexmap::IndexMap;

use grist_version::VersionRange;

use crate::constraint::{ConstraintSource, ConstraintStore, LabeledRange};
use crate::decisions::{Decision, Decisions};
use crate::error::{Fail, FailReason};
use crate::package::{
    Dependency, FlagDeclaration, PackageSource, SourcePackage, Stanza,
};
use crate::platform::{CompilerInfo, PkgConfigDb};
use crate::pool::Pool;
use crate::qualify::{QualifiedName, Qualifier};
use crate::request::Request;
use crate::validate;
use crate::vars::{ConflictSet, VarId, VarKind, VarTable};

/// Why a goal was introduced. The introducing decisions join the conflict
/// set when the goal runs out of branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalReason {
    /// A user build target.
    Target,
    /// A library dependency of a chosen release.
    DependencyOf(VarId),
    /// A setup-driver dependency of a chosen release.
    SetupDependencyOf(VarId),
    /// A build-tool dependency of a chosen release.
    BuildToolOf(VarId),
    /// A flag or stanza declared by a chosen release.
    DeclaredBy(VarId),
    /// A dependency activated by deciding a flag.
    GuardOf(VarId),
    /// A dependency activated by enabling a stanza.
    StanzaOf(VarId),
}

impl GoalReason {
    pub fn var(&self) -> Option<VarId> {
        match self {
            GoalReason::Target => None,
            GoalReason::DependencyOf(v)
            | GoalReason::SetupDependencyOf(v)
            | GoalReason::BuildToolOf(v)
            | GoalReason::DeclaredBy(v)
            | GoalReason::GuardOf(v)
            | GoalReason::StanzaOf(v) => Some(*v),
        }
    }

    pub fn describe(&self, vars: &VarTable) -> String {
        match self {
            GoalReason::Target => "build target".to_string(),
            GoalReason::DependencyOf(v) => format!("dependency of {}", vars.describe(*v)),
            GoalReason::SetupDependencyOf(v) => {
                format!("setup dependency of {}", vars.describe(*v))
            }
            GoalReason::BuildToolOf(v) => format!("build tool for {}", vars.describe(*v)),
            GoalReason::DeclaredBy(v) => format!("declared by {}", vars.describe(*v)),
            GoalReason::GuardOf(v) => format!("guarded by {}", vars.describe(*v)),
            GoalReason::StanzaOf(v) => format!("needed by {}", vars.describe(*v)),
        }
    }
}

/// Per-goal data the driver needs to build branches.
#[derive(Debug, Clone)]
pub enum GoalPayload {
    Package,
    Flag {
        package_var: VarId,
        declaration: FlagDeclaration,
        /// No package dependency sits behind the default value; weak flags
        /// are decided late.
        weak: bool,
    },
    Stanza {
        package_var: VarId,
        stanza: Stanza,
        forced: bool,
        preferred: bool,
    },
}

/// An undecided goal on the frontier.
#[derive(Debug, Clone)]
pub struct OpenGoal {
    pub reasons: Vec<GoalReason>,
    pub payload: GoalPayload,
}

impl OpenGoal {
    pub fn reason_vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        for reason in &self.reasons {
            if let Some(var) = reason.var() {
                if !out.contains(&var) {
                    out.push(var);
                }
            }
        }
        out
    }

    /// Whether every reason for this goal is an optional stanza dependency,
    /// making a synthetic skip branch meaningful.
    pub fn is_optional(&self) -> bool {
        !self.reasons.is_empty()
            && self
                .reasons
                .iter()
                .all(|r| matches!(r, GoalReason::StanzaOf(_)))
    }
}

/// One branch of a choice point.
#[derive(Debug, Clone)]
pub enum Branch {
    Version(PackageSource),
    /// Leave the (optional) package out; always fails, steering the walk
    /// back to the stanza that wanted it.
    Skip,
    Flag(bool),
    Stanza(bool),
}

impl Branch {
    pub fn describe(&self, goal: &str) -> String {
        match self {
            Branch::Version(source) => source.to_string(),
            Branch::Skip => format!("{goal} skipped"),
            Branch::Flag(value) => format!("{goal} := {value}"),
            Branch::Stanza(true) => format!("{goal} enabled"),
            Branch::Stanza(false) => format!("{goal} disabled"),
        }
    }
}

enum AgendaOp {
    Inserted(VarId),
    ReasonPushed(VarId),
    Removed(VarId, OpenGoal),
}

/// The frontier of open goals, insertion-ordered and fully undoable.
#[derive(Default)]
pub struct Agenda {
    open: IndexMap<VarId, OpenGoal>,
    trail: Vec<AgendaOp>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &OpenGoal)> {
        self.open.iter().map(|(&var, goal)| (var, goal))
    }

    pub fn get(&self, var: VarId) -> Option<&OpenGoal> {
        self.open.get(&var)
    }

    /// Add a reason to an already-open goal, or open it.
    pub fn insert(&mut self, var: VarId, reason: GoalReason, payload: GoalPayload) {
        if let Some(goal) = self.open.get_mut(&var) {
            goal.reasons.push(reason);
            self.trail.push(AgendaOp::ReasonPushed(var));
        } else {
            self.open.insert(
                var,
                OpenGoal {
                    reasons: vec![reason],
                    payload,
                },
            );
            self.trail.push(AgendaOp::Inserted(var));
        }
    }

    /// Remove a goal the driver is about to decide.
    pub fn take(&mut self, var: VarId) -> Option<OpenGoal> {
        let goal = self.open.shift_remove(&var)?;
        self.trail.push(AgendaOp::Removed(var, goal.clone()));
        Some(goal)
    }

    pub fn mark(&self) -> usize {
        self.trail.len()
    }

    pub fn revert_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            match self.trail.pop() {
                Some(AgendaOp::Inserted(var)) => {
                    self.open.shift_remove(&var);
                }
                Some(AgendaOp::ReasonPushed(var)) => {
                    if let Some(goal) = self.open.get_mut(&var) {
                        goal.reasons.pop();
                    }
                }
                Some(AgendaOp::Removed(var, goal)) => {
                    self.open.insert(var, goal);
                }
                None => break,
            }
        }
    }
}

/// Library dependency edges between decided packages of one namespace,
/// for eager cycle detection.
#[derive(Default)]
pub struct DepEdges {
    edges: Vec<(VarId, VarId)>,
}

impl DepEdges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> usize {
        self.edges.len()
    }

    pub fn revert_to(&mut self, mark: usize) {
        self.edges.truncate(mark);
    }

    pub fn add(&mut self, from: VarId, to: VarId) {
        self.edges.push((from, to));
    }

    /// A path `from -> .. -> to` along recorded edges, if one exists.
    pub fn path(&self, from: VarId, to: VarId) -> Option<Vec<VarId>> {
        let mut stack = vec![vec![from]];
        let mut visited = vec![from];
        while let Some(path) = stack.pop() {
            let here = *path.last().unwrap_or(&from);
            if here == to {
                return Some(path);
            }
            for &(u, v) in &self.edges {
                if u == here && !visited.contains(&v) {
                    visited.push(v);
                    let mut next = path.clone();
                    next.push(v);
                    stack.push(next);
                }
            }
        }
        None
    }
}

/// Conditional dependency arms waiting on a flag decision.
pub struct PendingDeps {
    pub package_var: VarId,
    pub kind: DepKind,
    pub if_true: Vec<Dependency>,
    pub if_false: Vec<Dependency>,
}

#[derive(Default)]
pub struct PendingConditionals {
    by_flag: IndexMap<VarId, Vec<PendingDeps>>,
    trail: Vec<VarId>,
}

impl PendingConditionals {
    pub fn push(&mut self, flag_var: VarId, pending: PendingDeps) {
        self.by_flag.entry(flag_var).or_default().push(pending);
        self.trail.push(flag_var);
    }

    pub fn on_flag(&self, flag_var: VarId) -> &[PendingDeps] {
        self.by_flag.get(&flag_var).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn mark(&self) -> usize {
        self.trail.len()
    }

    pub fn revert_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(var) = self.trail.pop() {
                self.by_flag.entry(var).or_default().pop();
            }
        }
    }
}

/// Append-only record feeding the explainer; deliberately never rewound so
/// a terminal failure can still name constraints seen deep in the search.
#[derive(Default)]
pub struct History {
    labels: IndexMap<VarId, Vec<String>>,
    tried: IndexMap<VarId, Vec<String>>,
}

impl History {
    pub fn record_label(&mut self, var: VarId, label: String) {
        let labels = self.labels.entry(var).or_default();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    pub fn record_tried(&mut self, var: VarId, description: String) {
        let tried = self.tried.entry(var).or_default();
        if !tried.contains(&description) {
            tried.push(description);
        }
    }

    pub fn labels_for(&self, var: VarId) -> &[String] {
        self.labels.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tried_for(&self, var: VarId) -> &[String] {
        self.tried.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Which role a dependency list is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    Library,
    Setup,
}

/// A snapshot of every trailed structure, taken at frame entry.
#[derive(Debug, Clone, Copy)]
pub struct Marks {
    constraints: usize,
    decisions: usize,
    agenda: usize,
    edges: usize,
    pending: usize,
}

/// The whole mutable search state plus the frozen inputs it reads.
pub struct SearchState<'a> {
    pub pool: &'a Pool,
    pub compiler: &'a CompilerInfo,
    pub pkg_config: &'a PkgConfigDb,
    pub request: &'a Request,
    pub vars: VarTable,
    pub constraints: ConstraintStore,
    pub decisions: Decisions,
    pub agenda: Agenda,
    pub edges: DepEdges,
    pub pending: PendingConditionals,
    pub history: History,
}

impl<'a> SearchState<'a> {
    pub fn new(
        pool: &'a Pool,
        compiler: &'a CompilerInfo,
        pkg_config: &'a PkgConfigDb,
        request: &'a Request,
    ) -> Self {
        Self {
            pool,
            compiler,
            pkg_config,
            request,
            vars: VarTable::new(),
            constraints: ConstraintStore::new(),
            decisions: Decisions::new(),
            agenda: Agenda::new(),
            edges: DepEdges::new(),
            pending: PendingConditionals::default(),
            history: History::default(),
        }
    }

    pub fn marks(&self) -> Marks {
        Marks {
            constraints: self.constraints.mark(),
            decisions: self.decisions.mark(),
            agenda: self.agenda.mark(),
            edges: self.edges.mark(),
            pending: self.pending.mark(),
        }
    }

    pub fn revert_to(&mut self, marks: &Marks) {
        self.constraints.revert_to(marks.constraints);
        self.decisions.revert_to(marks.decisions);
        self.agenda.revert_to(marks.agenda);
        self.edges.revert_to(marks.edges);
        self.pending.revert_to(marks.pending);
    }

    /// Seed the search: global constraints, then one package goal per
    /// target in its namespace.
    pub fn init(&mut self) {
        for constraint in &self.request.constraints {
            self.constraints.add_global_range(
                constraint.name.clone(),
                LabeledRange {
                    range: constraint.range.clone(),
                    component: None,
                    source: constraint.source.clone(),
                    introduced_by: None,
                },
            );
        }
        for constraint in &self.request.flag_constraints {
            self.constraints.add_global_flag(
                constraint.name.clone(),
                constraint.flag.clone(),
                crate::constraint::FlagRequirement {
                    value: constraint.value,
                    source: constraint.source.clone(),
                    introduced_by: None,
                },
            );
        }

        let targets = self.request.targets.clone();
        let independent = self.request.options.independent_goals;
        for (i, target) in targets.iter().enumerate() {
            let qualifier = if independent {
                Qualifier::Indep(i as u32)
            } else {
                Qualifier::Top
            };
            let qname = QualifiedName::new(qualifier, target.name.clone());
            let var = self.intern_package(&qname);
            if let Some(range) = &target.range {
                self.constraints.push_range(
                    var,
                    LabeledRange {
                        range: range.clone(),
                        component: None,
                        source: ConstraintSource::Target,
                        introduced_by: None,
                    },
                );
                self.history
                    .record_label(var, format!("{range} (build target)"));
            }
            self.agenda
                .insert(var, GoalReason::Target, GoalPayload::Package);
        }
    }

    /// Intern a package variable, remembering global constraint labels the
    /// first time the name shows up.
    fn intern_package(&mut self, qname: &QualifiedName) -> VarId {
        let kind = VarKind::Package(qname.clone());
        if let Some(var) = self.vars.get(&kind) {
            return var;
        }
        let var = self.vars.intern(kind);
        for labeled in self.constraints.global_labels(&qname.name) {
            self.history.record_label(var, labeled);
        }
        var
    }

    pub fn is_target(&self, qname: &QualifiedName) -> bool {
        qname.qualifier.is_toplevel() && self.request.is_target(&qname.name)
    }

    /// Commit to one branch: validate it, record the decision and unfold
    /// its consequences. On `Err` the caller rewinds to the frame marks.
    pub fn apply_branch(&mut self, var: VarId, branch: &Branch) -> Result<(), Fail> {
        match branch {
            Branch::Version(source) => self.choose_version(var, source.clone()),
            Branch::Skip => {
                let qname = self.vars.kind(var).qualified_name().clone();
                Err(Fail::new(
                    ConflictSet::singleton(var),
                    FailReason::Skipped(qname),
                ))
            }
            Branch::Flag(value) => self.choose_flag(var, *value),
            Branch::Stanza(enabled) => self.choose_stanza(var, *enabled),
        }
    }

    fn choose_version(&mut self, var: VarId, source: PackageSource) -> Result<(), Fail> {
        let qname = self.vars.kind(var).qualified_name().clone();
        validate::check_candidate(self, var, &qname, &source)?;
        self.decisions.decide(var, Decision::Version(source.clone()));

        match source {
            PackageSource::Installed(installed) => {
                // Pre-chosen closure: every dependency is pinned to the
                // exact installed unit it was built against.
                for unit in installed.depends.clone() {
                    let Some(dep) = self.pool.installed_by_unit(&unit) else {
                        return Err(Fail::new(
                            ConflictSet::singleton(var),
                            FailReason::UnknownPackage(crate::package::PackageName::new(
                                unit.as_str(),
                            )),
                        ));
                    };
                    let dep = dep.clone();
                    self.add_package_constraint(
                        var,
                        var,
                        qname.qualifier.clone(),
                        dep.name().clone(),
                        VersionRange::This(dep.version().clone()),
                        None,
                        ConstraintSource::Installed(installed.unit.clone()),
                        GoalReason::DependencyOf(var),
                        true,
                    )?;
                }
            }
            PackageSource::Source(package) => {
                for declaration in package.flags.clone() {
                    self.declare_flag(var, &qname, &package, &declaration)?;
                }
                for stanza in Stanza::all() {
                    if package.declares_stanza(stanza) {
                        self.declare_stanza(var, &qname, stanza);
                    }
                }
                let deps = package.dependencies.clone();
                self.activate_list(var, var, &qname, &package, &deps, DepKind::Library)?;
                let setup = package.setup_dependencies.clone();
                self.activate_list(var, var, &qname, &package, &setup, DepKind::Setup)?;
            }
        }
        Ok(())
    }

    fn declare_flag(
        &mut self,
        package_var: VarId,
        qname: &QualifiedName,
        package: &SourcePackage,
        declaration: &FlagDeclaration,
    ) -> Result<(), Fail> {
        let flag_var = self
            .vars
            .intern(VarKind::Flag(qname.clone(), declaration.name.clone()));
        let values = self
            .constraints
            .flag_values(flag_var, &qname.name, &declaration.name);

        if !Self::flag_guards_anything(package, &declaration.name) {
            // Both branches would be identical; settle it on the spot.
            if values.conflicting {
                let mut conflict = ConflictSet::singleton(flag_var);
                conflict.insert(package_var);
                for introducer in values.introducers {
                    conflict.insert(introducer);
                }
                return Err(Fail::new(
                    conflict,
                    FailReason::FlagConflict {
                        name: qname.clone(),
                        flag: declaration.name.clone(),
                    },
                ));
            }
            let value = values.required.unwrap_or(declaration.default);
            self.decisions.decide(flag_var, Decision::Flag(value));
            return Ok(());
        }

        let weak = !Self::default_arm_has_package_deps(package, declaration);
        self.agenda.insert(
            flag_var,
            GoalReason::DeclaredBy(package_var),
            GoalPayload::Flag {
                package_var,
                declaration: declaration.clone(),
                weak,
            },
        );
        Ok(())
    }

    fn declare_stanza(&mut self, package_var: VarId, qname: &QualifiedName, stanza: Stanza) {
        let stanza_var = self.vars.intern(VarKind::Stanza(qname.clone(), stanza));
        let forced = match stanza {
            Stanza::Tests => self.request.options.enable_all_tests,
            Stanza::Benchmarks => self.request.options.enable_all_benchmarks,
        } && self.is_target(qname);
        let preferred = self.request.preferences.prefers_stanza(stanza);
        self.agenda.insert(
            stanza_var,
            GoalReason::DeclaredBy(package_var),
            GoalPayload::Stanza {
                package_var,
                stanza,
                forced,
                preferred,
            },
        );
    }

    fn choose_flag(&mut self, var: VarId, value: bool) -> Result<(), Fail> {
        let (qname, flag) = match self.vars.kind(var) {
            VarKind::Flag(qname, flag) => (qname.clone(), flag.clone()),
            _ => {
                return Err(Fail::new(
                    ConflictSet::singleton(var),
                    FailReason::ExhaustedChoices(self.vars.describe(var)),
                ))
            }
        };
        let values = self.constraints.flag_values(var, &qname.name, &flag);
        if values.conflicting || values.required.is_some_and(|r| r != value) {
            let mut conflict = ConflictSet::singleton(var);
            for introducer in values.introducers {
                conflict.insert(introducer);
            }
            return Err(Fail::new(
                conflict,
                FailReason::FlagConflict { name: qname, flag },
            ));
        }
        self.decisions.decide(var, Decision::Flag(value));

        // Wake the conditionals guarded by this flag.
        let woken: Vec<(VarId, Vec<Dependency>, DepKind)> = self
            .pending
            .on_flag(var)
            .iter()
            .map(|p| {
                let arm = if value { &p.if_true } else { &p.if_false };
                (p.package_var, arm.clone(), p.kind)
            })
            .collect();
        for (package_var, deps, kind) in woken {
            let owner_qname = self.vars.kind(package_var).qualified_name().clone();
            let Some(package) = self
                .decisions
                .chosen_source(package_var)
                .and_then(|s| s.as_source())
                .cloned()
            else {
                continue;
            };
            self.activate_list(package_var, var, &owner_qname, &package, &deps, kind)?;
        }
        Ok(())
    }

    fn choose_stanza(&mut self, var: VarId, enabled: bool) -> Result<(), Fail> {
        let (qname, stanza) = match self.vars.kind(var) {
            VarKind::Stanza(qname, stanza) => (qname.clone(), *stanza),
            _ => {
                return Err(Fail::new(
                    ConflictSet::singleton(var),
                    FailReason::ExhaustedChoices(self.vars.describe(var)),
                ))
            }
        };
        self.decisions.decide(var, Decision::Stanza(enabled));
        if !enabled {
            return Ok(());
        }
        let Some(package_var) = self.vars.get(&VarKind::Package(qname.clone())) else {
            return Ok(());
        };
        let Some(package) = self
            .decisions
            .chosen_source(package_var)
            .and_then(|s| s.as_source())
            .cloned()
        else {
            return Ok(());
        };
        let deps = package
            .stanza_dependencies(stanza)
            .map(<[Dependency]>::to_vec)
            .unwrap_or_default();
        self.activate_list(package_var, var, &qname, &package, &deps, DepKind::Library)
    }

    fn activate_list(
        &mut self,
        package_var: VarId,
        cause: VarId,
        owner: &QualifiedName,
        package: &SourcePackage,
        deps: &[Dependency],
        kind: DepKind,
    ) -> Result<(), Fail> {
        for dep in deps {
            self.activate_dep(package_var, cause, owner, package, dep, kind)?;
        }
        Ok(())
    }

    fn activate_dep(
        &mut self,
        package_var: VarId,
        cause: VarId,
        owner: &QualifiedName,
        package: &SourcePackage,
        dep: &Dependency,
        kind: DepKind,
    ) -> Result<(), Fail> {
        match dep {
            Dependency::Package {
                name,
                range,
                component,
            } => {
                let (qualifier, source, reason, lib_edge) = match kind {
                    DepKind::Library => (
                        owner.qualifier.clone(),
                        ConstraintSource::Dependency(package.id.clone()),
                        self.dependency_reason(cause),
                        true,
                    ),
                    DepKind::Setup => (
                        Qualifier::Setup(owner.name.clone()),
                        ConstraintSource::SetupDependency(package.id.clone()),
                        GoalReason::SetupDependencyOf(cause),
                        false,
                    ),
                };
                self.add_package_constraint(
                    package_var,
                    cause,
                    qualifier,
                    name.clone(),
                    range.clone(),
                    component.clone(),
                    source,
                    reason,
                    lib_edge,
                )
            }
            Dependency::BuildTool { name, exe, range } => self.add_package_constraint(
                package_var,
                cause,
                Qualifier::Exe(owner.name.clone(), exe.clone()),
                name.clone(),
                range.clone(),
                None,
                ConstraintSource::Dependency(package.id.clone()),
                GoalReason::BuildToolOf(cause),
                false,
            ),
            Dependency::Extension { .. }
            | Dependency::Language { .. }
            | Dependency::PkgConfig { .. } => {
                validate::check_environment(self, package_var, cause, dep)
            }
            Dependency::Conditional {
                flag,
                if_true,
                if_false,
            } => {
                let Some(flag_var) = self
                    .vars
                    .get(&VarKind::Flag(owner.clone(), flag.clone()))
                else {
                    // A guard on an undeclared flag can never be satisfied
                    // either way.
                    let mut conflict = ConflictSet::singleton(package_var);
                    conflict.insert(cause);
                    return Err(Fail::new(
                        conflict,
                        FailReason::FlagConflict {
                            name: owner.clone(),
                            flag: flag.clone(),
                        },
                    ));
                };
                if let Some(value) = self.decisions.flag_value(flag_var) {
                    let arm = if value { if_true } else { if_false };
                    self.activate_list(package_var, cause, owner, package, arm, kind)
                } else {
                    self.pending.push(
                        flag_var,
                        PendingDeps {
                            package_var,
                            kind,
                            if_true: if_true.clone(),
                            if_false: if_false.clone(),
                        },
                    );
                    Ok(())
                }
            }
        }
    }

    /// The goal reason for a plain library dependency, keyed on what kind
    /// of decision activated it.
    fn dependency_reason(&self, cause: VarId) -> GoalReason {
        match self.vars.kind(cause) {
            VarKind::Package(_) => GoalReason::DependencyOf(cause),
            VarKind::Flag(_, _) => GoalReason::GuardOf(cause),
            VarKind::Stanza(_, _) => GoalReason::StanzaOf(cause),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_package_constraint(
        &mut self,
        owner_var: VarId,
        cause: VarId,
        qualifier: Qualifier,
        name: crate::package::PackageName,
        range: VersionRange,
        component: Option<String>,
        source: ConstraintSource,
        reason: GoalReason,
        lib_edge: bool,
    ) -> Result<(), Fail> {
        let dep_qname = QualifiedName::new(qualifier, name);
        let dep_var = self.intern_package(&dep_qname);

        self.history
            .record_label(dep_var, format!("{range} ({source})"));
        self.constraints.push_range(
            dep_var,
            LabeledRange {
                range: range.clone(),
                component: component.clone(),
                source,
                introduced_by: Some(cause),
            },
        );

        if let Some(chosen) = self.decisions.chosen_source(dep_var).cloned() {
            // Already decided: the new constraint must agree with it.
            if !range.contains(chosen.version()) {
                let mut conflict = ConflictSet::singleton(dep_var);
                conflict.insert(cause);
                return Err(Fail::new(
                    conflict,
                    FailReason::SingleInstance(dep_qname),
                ));
            }
            if let Some(component) = &component {
                let provides = match &chosen {
                    PackageSource::Source(sp) => sp.provides_component(component),
                    PackageSource::Installed(_) => component == "lib",
                };
                if !provides {
                    let mut conflict = ConflictSet::singleton(dep_var);
                    conflict.insert(cause);
                    return Err(Fail::new(
                        conflict,
                        FailReason::MissingComponent {
                            name: dep_qname,
                            component: component.clone(),
                        },
                    ));
                }
            }
            if lib_edge {
                self.add_edge_checked(owner_var, dep_var)?;
            }
        } else {
            validate::check_preliminary(self, dep_var, &dep_qname)?;
            self.agenda.insert(dep_var, reason, GoalPayload::Package);
            if lib_edge {
                self.add_edge_checked(owner_var, dep_var)?;
            }
        }
        Ok(())
    }

    /// Record a library edge and refuse it if it closes a cycle with no
    /// setup escape hatch.
    fn add_edge_checked(&mut self, from: VarId, to: VarId) -> Result<(), Fail> {
        self.edges.add(from, to);
        if let Some(path) = self.edges.path(to, from) {
            // `path` runs to -> .. -> from; the new edge closes it.
            if !self.cycle_has_setup_escape(&path) {
                let conflict: ConflictSet = path.iter().copied().collect();
                let mut names: Vec<String> =
                    path.iter().map(|&v| self.vars.describe(v)).collect();
                names.push(self.vars.describe(to));
                return Err(Fail::new(conflict, FailReason::CycleDetected(names)));
            }
        }
        Ok(())
    }

    /// A cycle may stand for now if some participant also reaches its
    /// successor through a setup dependency; whether the setup namespace
    /// really breaks the cycle is settled on the finished assignment.
    fn cycle_has_setup_escape(&self, cycle: &[VarId]) -> bool {
        for (i, &var) in cycle.iter().enumerate() {
            let next = cycle[(i + 1) % cycle.len()];
            let next_name = &self.vars.kind(next).qualified_name().name;
            if let Some(package) = self
                .decisions
                .chosen_source(var)
                .and_then(|s| s.as_source())
            {
                if Self::deps_mention(&package.setup_dependencies, next_name) {
                    return true;
                }
            }
        }
        false
    }

    fn deps_mention(deps: &[Dependency], name: &crate::package::PackageName) -> bool {
        deps.iter().any(|dep| match dep {
            Dependency::Package { name: dep_name, .. } => dep_name == name,
            Dependency::Conditional {
                if_true, if_false, ..
            } => Self::deps_mention(if_true, name) || Self::deps_mention(if_false, name),
            _ => false,
        })
    }

    /// Whether any conditional anywhere in the package mentions this flag.
    fn flag_guards_anything(package: &SourcePackage, flag: &str) -> bool {
        let mut trees: Vec<&[Dependency]> = vec![
            &package.dependencies,
            &package.setup_dependencies,
        ];
        if let Some(deps) = package.stanza_dependencies(Stanza::Tests) {
            trees.push(deps);
        }
        if let Some(deps) = package.stanza_dependencies(Stanza::Benchmarks) {
            trees.push(deps);
        }
        trees.into_iter().any(|deps| Self::guards_in(deps, flag))
    }

    fn guards_in(deps: &[Dependency], flag: &str) -> bool {
        deps.iter().any(|dep| match dep {
            Dependency::Conditional {
                flag: guard,
                if_true,
                if_false,
            } => guard == flag || Self::guards_in(if_true, flag) || Self::guards_in(if_false, flag),
            _ => false,
        })
    }

    /// Whether the default value of the flag pulls in any package or
    /// build-tool dependency; flags that don't are weak and decided late.
    fn default_arm_has_package_deps(
        package: &SourcePackage,
        declaration: &FlagDeclaration,
    ) -> bool {
        let mut trees: Vec<&[Dependency]> = vec![
            &package.dependencies,
            &package.setup_dependencies,
        ];
        if let Some(deps) = package.stanza_dependencies(Stanza::Tests) {
            trees.push(deps);
        }
        if let Some(deps) = package.stanza_dependencies(Stanza::Benchmarks) {
            trees.push(deps);
        }
        trees
            .into_iter()
            .any(|deps| Self::default_arm_pulls(deps, declaration))
    }

    fn default_arm_pulls(deps: &[Dependency], declaration: &FlagDeclaration) -> bool {
        deps.iter().any(|dep| match dep {
            Dependency::Conditional {
                flag,
                if_true,
                if_false,
            } => {
                if flag == &declaration.name {
                    let arm = if declaration.default { if_true } else { if_false };
                    Self::has_package_dep(arm)
                } else {
                    Self::default_arm_pulls(if_true, declaration)
                        || Self::default_arm_pulls(if_false, declaration)
                }
            }
            _ => false,
        })
    }

    fn has_package_dep(deps: &[Dependency]) -> bool {
        deps.iter().any(|dep| match dep {
            Dependency::Package { .. } | Dependency::BuildTool { .. } => true,
            Dependency::Conditional {
                if_true, if_false, ..
            } => Self::has_package_dep(if_true) || Self::has_package_dep(if_false),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_version::Version;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_agenda_insert_and_revert() {
        let mut table = VarTable::new();
        let a = table.intern(VarKind::Package(QualifiedName::top("a")));
        let b = table.intern(VarKind::Package(QualifiedName::top("b")));

        let mut agenda = Agenda::new();
        agenda.insert(a, GoalReason::Target, GoalPayload::Package);
        let mark = agenda.mark();
        agenda.insert(b, GoalReason::DependencyOf(a), GoalPayload::Package);
        agenda.insert(b, GoalReason::Target, GoalPayload::Package);
        assert_eq!(agenda.len(), 2);
        assert_eq!(agenda.get(b).unwrap().reasons.len(), 2);

        agenda.revert_to(mark);
        assert_eq!(agenda.len(), 1);
        assert!(agenda.get(b).is_none());
    }

    #[test]
    fn test_agenda_take_is_undoable() {
        let mut table = VarTable::new();
        let a = table.intern(VarKind::Package(QualifiedName::top("a")));

        let mut agenda = Agenda::new();
        agenda.insert(a, GoalReason::Target, GoalPayload::Package);
        let mark = agenda.mark();
        assert!(agenda.take(a).is_some());
        assert!(agenda.is_empty());

        agenda.revert_to(mark);
        assert_eq!(agenda.len(), 1);
    }

    #[test]
    fn test_dep_edges_path() {
        let mut table = VarTable::new();
        let a = table.intern(VarKind::Package(QualifiedName::top("a")));
        let b = table.intern(VarKind::Package(QualifiedName::top("b")));
        let c = table.intern(VarKind::Package(QualifiedName::top("c")));

        let mut edges = DepEdges::new();
        edges.add(a, b);
        edges.add(b, c);
        assert_eq!(edges.path(a, c), Some(vec![a, b, c]));
        assert!(edges.path(c, a).is_none());

        let mark = edges.mark();
        edges.add(c, a);
        assert!(edges.path(c, a).is_some());
        edges.revert_to(mark);
        assert!(edges.path(c, a).is_none());
    }

    #[test]
    fn test_optional_goal_detection() {
        let mut table = VarTable::new();
        let pkg = table.intern(VarKind::Package(QualifiedName::top("a")));
        let stanza = table.intern(VarKind::Stanza(QualifiedName::top("a"), Stanza::Tests));

        let optional = OpenGoal {
            reasons: vec![GoalReason::StanzaOf(stanza)],
            payload: GoalPayload::Package,
        };
        assert!(optional.is_optional());

        let required = OpenGoal {
            reasons: vec![GoalReason::StanzaOf(stanza), GoalReason::DependencyOf(pkg)],
            payload: GoalPayload::Package,
        };
        assert!(!required.is_optional());
    }

    #[test]
    fn test_flag_guard_scan() {
        let package = SourcePackage::new("a", v("1"))
            .with_flag(FlagDeclaration::new("fast", true))
            .with_flag(FlagDeclaration::new("unused", true))
            .with_dependency(Dependency::conditional(
                "fast",
                vec![Dependency::on("speedup", VersionRange::Any)],
                vec![],
            ));
        assert!(SearchState::flag_guards_anything(&package, "fast"));
        assert!(!SearchState::flag_guards_anything(&package, "unused"));

        let fast = package.flag_declaration("fast").unwrap();
        assert!(SearchState::default_arm_has_package_deps(&package, fast));

        let off = SourcePackage::new("a", v("1"))
            .with_flag(FlagDeclaration::new("fast", false))
            .with_dependency(Dependency::conditional(
                "fast",
                vec![Dependency::on("speedup", VersionRange::Any)],
                vec![],
            ));
        let decl = off.flag_declaration("fast").unwrap();
        // Default is off, and the off arm pulls nothing: weak.
        assert!(!SearchState::default_arm_has_package_deps(&off, decl));
    }
}

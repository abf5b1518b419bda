//! The backjumping driver.
//!
//! A depth-first walk over the lazy tree: one frame per open choice point,
//! branches ordered by policy, and failure propagation that jumps straight
//! past frames whose variables played no part in the conflict. The walk is
//! single-threaded and pure; its only outputs are the outcome and the event
//! log.

use std::time::Instant;

use indexmap::IndexMap;
use log::{debug, info};

use crate::error::{Fail, FailReason};
use crate::events::{SolveEvent, SolveLog};
use crate::plan::{self, InstallPlan};
use crate::platform::{CompilerInfo, PkgConfigDb, Platform};
use crate::policy;
use crate::pool::Pool;
use crate::problem::Problem;
use crate::request::Request;
use crate::tree::{Branch, GoalPayload, Marks, OpenGoal, SearchState};
use crate::vars::{ConflictSet, VarId};

/// What a solve produced.
#[derive(Debug)]
pub enum SolveOutcome {
    Success(InstallPlan),
    Failure(Problem),
    /// The backjump budget ran out before the search finished. Same shape
    /// as a failure, but never caused by the dependencies themselves.
    BudgetExhausted(Problem),
}

impl SolveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SolveOutcome::Success(_))
    }

    pub fn plan(&self) -> Option<&InstallPlan> {
        match self {
            SolveOutcome::Success(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn problem(&self) -> Option<&Problem> {
        match self {
            SolveOutcome::Failure(problem) | SolveOutcome::BudgetExhausted(problem) => {
                Some(problem)
            }
            SolveOutcome::Success(_) => None,
        }
    }
}

/// Outcome plus the event log of the walk that produced it.
#[derive(Debug)]
pub struct SolveResult {
    pub outcome: SolveOutcome,
    pub log: SolveLog,
}

impl SolveResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn plan(&self) -> Option<&InstallPlan> {
        self.outcome.plan()
    }

    pub fn problem(&self) -> Option<&Problem> {
        self.outcome.problem()
    }
}

/// The solver: frozen inputs in, one of three outcomes out.
///
/// All inputs are immutable once constructed, so a single solver value can
/// serve any number of parallel `solve` calls.
pub struct Solver {
    pool: Pool,
    platform: Platform,
    compiler: CompilerInfo,
    pkg_config: PkgConfigDb,
}

impl Solver {
    pub fn new(
        pool: Pool,
        platform: Platform,
        compiler: CompilerInfo,
        pkg_config: PkgConfigDb,
    ) -> Self {
        Self {
            pool,
            platform,
            compiler,
            pkg_config,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run the search for one request.
    pub fn solve(&self, request: &Request) -> SolveResult {
        let started = Instant::now();
        let pool = self.pool.with_filters(
            request.options.shadow_installed_packages,
            request.options.avoid_reinstalls,
        );

        let mut walk = Walk::new(&pool, &self.compiler, &self.pkg_config, request);
        walk.log.push(SolveEvent::Context {
            platform: self.platform.to_string(),
            compiler: self.compiler.to_string(),
        });
        let outcome = walk.run();

        info!(
            "dependency resolution finished in {:.3} seconds after {} backjumps",
            started.elapsed().as_secs_f64(),
            walk.backjumps
        );
        SolveResult {
            outcome,
            log: walk.log,
        }
    }
}

/// One open choice point on the walk's stack.
struct Frame {
    var: VarId,
    goal: OpenGoal,
    branches: Vec<Branch>,
    next: usize,
    /// Union of the conflict sets of every failed branch below this frame.
    conflicts: ConflictSet,
    /// Reason reported if every branch fails.
    exhaust_reason: FailReason,
    /// State snapshot from frame entry; reverting to it undoes any branch.
    marks: Marks,
}

struct Walk<'a> {
    state: SearchState<'a>,
    frames: Vec<Frame>,
    log: SolveLog,
    backjumps: u64,
    conflict_counts: Vec<u64>,
    past_conflicts: IndexMap<VarId, ConflictSet>,
    last_failure: Option<VarId>,
}

impl<'a> Walk<'a> {
    fn new(
        pool: &'a Pool,
        compiler: &'a CompilerInfo,
        pkg_config: &'a PkgConfigDb,
        request: &'a Request,
    ) -> Self {
        Self {
            state: SearchState::new(pool, compiler, pkg_config, request),
            frames: Vec::new(),
            log: SolveLog::new(),
            backjumps: 0,
            conflict_counts: Vec::new(),
            past_conflicts: IndexMap::new(),
            last_failure: None,
        }
    }

    fn run(&mut self) -> SolveOutcome {
        self.state.init();
        loop {
            if self.state.agenda.is_empty() {
                match plan::build_plan(&self.state, &mut self.log) {
                    Ok(plan) => {
                        self.log.push(SolveEvent::Done);
                        debug!("assignment complete: {} units", plan.len());
                        return SolveOutcome::Success(plan);
                    }
                    Err(fail) => {
                        self.log_conflict(&fail);
                        self.note_conflict(&fail.conflict);
                        if let Some(outcome) = self.backjump_with(
                            fail.conflict,
                            fail.reason,
                            "install plan".to_string(),
                        ) {
                            return outcome;
                        }
                    }
                }
            } else {
                let Some(var) = self.select_goal() else {
                    continue;
                };
                let Some(goal) = self.state.agenda.take(var) else {
                    continue;
                };
                let marks = self.state.marks();
                let (branches, exhaust_reason) = self.build_branches(var, &goal);
                debug!(
                    "open goal {} with {} branches",
                    self.state.vars.describe(var),
                    branches.len()
                );
                self.frames.push(Frame {
                    var,
                    goal,
                    branches,
                    next: 0,
                    conflicts: ConflictSet::new(),
                    exhaust_reason,
                    marks,
                });
            }
            if let Some(outcome) = self.advance() {
                return outcome;
            }
        }
    }

    /// Pick the next goal per the goal-order heuristic.
    fn select_goal(&self) -> Option<VarId> {
        let options = &self.state.request.options;
        let mut best: Option<(policy::GoalKey, VarId)> = None;
        for (var, goal) in self.state.agenda.iter() {
            let qname = self.state.vars.kind(var).qualified_name();
            let explicit = options
                .goal_order
                .as_ref()
                .and_then(|order| order.iter().position(|n| n == &qname.name));
            let count = self.conflict_counts.get(var.index()).copied().unwrap_or(0);
            let hits_recent = match self.last_failure {
                Some(failed) => self
                    .past_conflicts
                    .get(&var)
                    .map(|set| set.contains(failed))
                    .unwrap_or(false),
                None => false,
            };
            let key = policy::goal_key(
                options,
                &goal.payload,
                explicit,
                count,
                hits_recent,
                self.state.vars.describe(var),
                var.index(),
            );
            match &best {
                Some((current, _)) if *current <= key => {}
                _ => best = Some((key, var)),
            }
        }
        best.map(|(_, var)| var)
    }

    /// Branches for a goal, ordered by policy, plus the failure category to
    /// report if all of them fail.
    fn build_branches(&self, var: VarId, goal: &OpenGoal) -> (Vec<Branch>, FailReason) {
        match &goal.payload {
            GoalPayload::Package => {
                let qname = self.state.vars.kind(var).qualified_name().clone();
                let candidates = self.state.pool.lookup(&qname.name);
                let exhaust_reason = if candidates.is_empty() {
                    FailReason::UnknownPackage(qname.name.clone())
                } else {
                    FailReason::VersionConflict(qname.clone())
                };
                let ordered = policy::order_candidates(
                    candidates,
                    self.state.is_target(&qname),
                    self.state.request.preferences.soft_ranges(&qname.name),
                    self.state.request.options.version_policy,
                );
                let mut branches: Vec<Branch> =
                    ordered.into_iter().map(Branch::Version).collect();
                if goal.is_optional() {
                    branches.push(Branch::Skip);
                }
                (branches, exhaust_reason)
            }
            GoalPayload::Flag { declaration, .. } => {
                let qname = self.state.vars.kind(var).qualified_name().clone();
                let values =
                    self.state
                        .constraints
                        .flag_values(var, &qname.name, &declaration.name);
                let branches = policy::order_flag_branches(declaration, &values)
                    .into_iter()
                    .map(Branch::Flag)
                    .collect();
                (
                    branches,
                    FailReason::FlagConflict {
                        name: qname,
                        flag: declaration.name.clone(),
                    },
                )
            }
            GoalPayload::Stanza {
                forced, preferred, ..
            } => {
                let branches = policy::order_stanza_branches(*forced, *preferred)
                    .into_iter()
                    .map(Branch::Stanza)
                    .collect();
                (
                    branches,
                    FailReason::ExhaustedChoices(self.state.vars.describe(var)),
                )
            }
        }
    }

    /// Drive the top frame until a branch commits, propagating exhausted
    /// frames upward. `Some` is a terminal outcome.
    fn advance(&mut self) -> Option<SolveOutcome> {
        loop {
            if self.frames.is_empty() {
                return Some(SolveOutcome::Failure(self.problem(
                    &ConflictSet::new(),
                    "search".to_string(),
                    "no choices left".to_string(),
                )));
            }
            let idx = self.frames.len() - 1;
            let var = self.frames[idx].var;
            let marks = self.frames[idx].marks;
            self.state.revert_to(&marks);

            let next = self.frames[idx].next;
            if next < self.frames[idx].branches.len() {
                self.frames[idx].next += 1;
                let branch = self.frames[idx].branches[next].clone();
                let what = branch.describe(&self.state.vars.describe(var));
                self.state.history.record_tried(var, what.clone());

                match self.state.apply_branch(var, &branch) {
                    Ok(()) => {
                        let reason = self.frames[idx]
                            .goal
                            .reasons
                            .first()
                            .map(|r| r.describe(&self.state.vars))
                            .unwrap_or_default();
                        debug!("trying {what}");
                        self.log.push(SolveEvent::Trying { what, reason });
                        return None;
                    }
                    Err(mut fail) => {
                        // The decision under trial is always relevant to
                        // its own refusal.
                        fail.conflict.insert(var);
                        if matches!(branch, Branch::Skip) {
                            self.log.push(SolveEvent::Skipping { what });
                        } else {
                            debug!("rejecting {what}: {}", fail.reason);
                            self.log.push(SolveEvent::Rejecting {
                                what,
                                why: fail.reason.to_string(),
                            });
                        }
                        self.note_conflict(&fail.conflict);
                        self.frames[idx].conflicts.union_with(&fail.conflict);
                        self.record_past(var, &fail.conflict);
                        self.last_failure = Some(var);
                    }
                }
            } else {
                let Some(frame) = self.frames.pop() else {
                    continue;
                };
                // The goal is spent: the failure no longer depends on its
                // own variable, but it does depend on whatever introduced
                // and constrained the goal.
                let mut out = frame.conflicts.clone();
                out.remove(frame.var);
                for reason_var in frame.goal.reason_vars() {
                    out.insert(reason_var);
                }
                for introducer in self.state.constraints.introducers(frame.var) {
                    out.insert(introducer);
                }
                for introducer in self.state.constraints.flag_introducers(frame.var) {
                    out.insert(introducer);
                }

                let origin = self.state.vars.describe(frame.var);
                let why = frame.exhaust_reason.clone();
                let vars: Vec<String> =
                    out.iter().map(|v| self.state.vars.describe(v)).collect();
                self.log.push(SolveEvent::Conflict {
                    vars,
                    why: why.to_string(),
                });
                if let Some(outcome) = self.backjump_with(out, why, origin) {
                    return Some(outcome);
                }
            }
        }
    }

    /// Land the failure on the nearest frame whose variable is in the
    /// conflict set, discarding everything popped on the way. `Some` is a
    /// terminal outcome.
    fn backjump_with(
        &mut self,
        conflict: ConflictSet,
        reason: FailReason,
        origin: String,
    ) -> Option<SolveOutcome> {
        if self.state.request.options.enable_backjumping {
            while let Some(top) = self.frames.last() {
                if conflict.contains(top.var) {
                    break;
                }
                let skipped = self.frames.pop();
                if let Some(skipped) = skipped {
                    self.log.push(SolveEvent::Backjumping {
                        over: self.state.vars.describe(skipped.var),
                    });
                }
                self.backjumps += 1;
                if let Some(limit) = self.state.request.options.max_backjumps {
                    if self.backjumps > limit {
                        return Some(SolveOutcome::BudgetExhausted(self.problem(
                            &conflict,
                            origin,
                            "backjump budget exhausted".to_string(),
                        )));
                    }
                }
            }
        }
        match self.frames.last_mut() {
            Some(top) => {
                top.conflicts.union_with(&conflict);
                let var = top.var;
                self.record_past(var, &conflict);
                self.last_failure = Some(var);
                None
            }
            None => Some(SolveOutcome::Failure(self.problem(
                &conflict,
                origin,
                reason.to_string(),
            ))),
        }
    }

    fn log_conflict(&mut self, fail: &Fail) {
        let vars: Vec<String> = fail
            .conflict
            .iter()
            .map(|v| self.state.vars.describe(v))
            .collect();
        self.log.push(SolveEvent::Conflict {
            vars,
            why: fail.reason.to_string(),
        });
    }

    fn note_conflict(&mut self, conflict: &ConflictSet) {
        for var in conflict.iter() {
            if var.index() >= self.conflict_counts.len() {
                self.conflict_counts.resize(var.index() + 1, 0);
            }
            self.conflict_counts[var.index()] += 1;
        }
    }

    fn record_past(&mut self, var: VarId, conflict: &ConflictSet) {
        self.past_conflicts
            .entry(var)
            .or_default()
            .union_with(conflict);
    }

    fn problem(&self, conflict: &ConflictSet, exhausted: String, reason: String) -> Problem {
        Problem::from_search(&self.state, conflict, exhausted, reason)
    }
}

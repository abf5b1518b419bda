//! The partial assignment: decided variables and their chosen values.
//!
//! A flat vector indexed by variable id holds the decisions; a trail records
//! the order they were made in so the walker can revert to any earlier mark.

use grist_version::Version;

use crate::package::PackageSource;
use crate::vars::VarId;

/// The value chosen for one decided variable.
#[derive(Debug, Clone)]
pub enum Decision {
    /// A concrete release for a package variable.
    Version(PackageSource),
    Flag(bool),
    Stanza(bool),
}

/// All decisions made so far, in order.
#[derive(Debug, Default)]
pub struct Decisions {
    by_var: Vec<Option<Decision>>,
    trail: Vec<VarId>,
}

impl Decisions {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&mut self, var: VarId) {
        if var.index() >= self.by_var.len() {
            self.by_var.resize(var.index() + 1, None);
        }
    }

    pub fn decide(&mut self, var: VarId, decision: Decision) {
        self.ensure(var);
        debug_assert!(self.by_var[var.index()].is_none(), "{var} decided twice");
        self.by_var[var.index()] = Some(decision);
        self.trail.push(var);
    }

    pub fn get(&self, var: VarId) -> Option<&Decision> {
        self.by_var.get(var.index()).and_then(|d| d.as_ref())
    }

    pub fn is_decided(&self, var: VarId) -> bool {
        self.get(var).is_some()
    }

    pub fn chosen_source(&self, var: VarId) -> Option<&PackageSource> {
        match self.get(var) {
            Some(Decision::Version(source)) => Some(source),
            _ => None,
        }
    }

    pub fn chosen_version(&self, var: VarId) -> Option<&Version> {
        self.chosen_source(var).map(|source| source.version())
    }

    pub fn flag_value(&self, var: VarId) -> Option<bool> {
        match self.get(var) {
            Some(Decision::Flag(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn stanza_enabled(&self, var: VarId) -> Option<bool> {
        match self.get(var) {
            Some(Decision::Stanza(enabled)) => Some(*enabled),
            _ => None,
        }
    }

    pub fn mark(&self) -> usize {
        self.trail.len()
    }

    /// Undo every decision made after the mark.
    pub fn revert_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(var) = self.trail.pop() {
                self.by_var[var.index()] = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.trail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trail.is_empty()
    }

    /// Decisions in the order they were made.
    pub fn iter_trail(&self) -> impl Iterator<Item = (VarId, &Decision)> {
        self.trail.iter().filter_map(move |&var| {
            self.by_var[var.index()].as_ref().map(|d| (var, d))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualify::QualifiedName;
    use crate::vars::{VarKind, VarTable};

    fn vars(n: usize) -> Vec<VarId> {
        let mut table = VarTable::new();
        (0..n)
            .map(|i| table.intern(VarKind::Package(QualifiedName::top(format!("p{i}")))))
            .collect()
    }

    #[test]
    fn test_decide_and_get() {
        let vars = vars(3);
        let mut decisions = Decisions::new();
        decisions.decide(vars[0], Decision::Flag(true));
        decisions.decide(vars[2], Decision::Stanza(false));

        assert_eq!(decisions.flag_value(vars[0]), Some(true));
        assert_eq!(decisions.stanza_enabled(vars[2]), Some(false));
        assert!(!decisions.is_decided(vars[1]));
        assert_eq!(decisions.len(), 2);
    }

    #[test]
    fn test_revert_to_mark() {
        let vars = vars(3);
        let mut decisions = Decisions::new();
        decisions.decide(vars[0], Decision::Flag(true));
        let mark = decisions.mark();
        decisions.decide(vars[1], Decision::Flag(false));
        decisions.decide(vars[2], Decision::Stanza(true));

        decisions.revert_to(mark);
        assert!(decisions.is_decided(vars[0]));
        assert!(!decisions.is_decided(vars[1]));
        assert!(!decisions.is_decided(vars[2]));
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn test_trail_order() {
        let vars = vars(3);
        let mut decisions = Decisions::new();
        decisions.decide(vars[1], Decision::Flag(true));
        decisions.decide(vars[0], Decision::Flag(false));

        let order: Vec<VarId> = decisions.iter_trail().map(|(v, _)| v).collect();
        assert_eq!(order, vec![vars[1], vars[0]]);
    }
}

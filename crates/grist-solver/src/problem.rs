//! Terminal failure narratives.
//!
//! When the root of the search is exhausted, the conflict set alone is not
//! an explanation. The problem names the goal whose exhaustion ended the
//! search and, for every variable involved, the source labels of the
//! constraints that put it there and the alternatives that were tried.

use std::fmt;

use crate::tree::SearchState;
use crate::vars::ConflictSet;

/// How many rejected alternatives to show per variable.
pub const MAX_SHOWN_ALTERNATIVES: usize = 4;

/// One conflict-set member with its explanation material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemEntry {
    pub variable: String,
    /// Rendered constraint labels, in the order they were first seen.
    pub labels: Vec<String>,
    /// Alternatives tried for this variable, capped at
    /// [`MAX_SHOWN_ALTERNATIVES`].
    pub tried: Vec<String>,
}

/// Why the search failed, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// The goal whose exhaustion surfaced the failure.
    pub exhausted_goal: String,
    pub reason: String,
    /// The raw variable set behind `entries`.
    pub conflict: ConflictSet,
    pub entries: Vec<ProblemEntry>,
}

impl Problem {
    pub(crate) fn from_search(
        state: &SearchState,
        conflict: &ConflictSet,
        exhausted_goal: String,
        reason: String,
    ) -> Self {
        let entries = conflict
            .iter()
            .map(|var| {
                let mut tried: Vec<String> = state.history.tried_for(var).to_vec();
                tried.truncate(MAX_SHOWN_ALTERNATIVES);
                ProblemEntry {
                    variable: state.vars.describe(var),
                    labels: state.history.labels_for(var).to_vec(),
                    tried,
                }
            })
            .collect();
        Self {
            exhausted_goal,
            reason,
            conflict: conflict.clone(),
            entries,
        }
    }

    /// The rendered, deterministic explanation.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str("could not resolve dependencies\n");
        out.push_str(&format!(
            "failed goal: {} ({})\n",
            self.exhausted_goal, self.reason
        ));
        for entry in &self.entries {
            out.push_str(&format!("  - {}\n", entry.variable));
            if !entry.labels.is_empty() {
                out.push_str(&format!(
                    "      constrained by: {}\n",
                    entry.labels.join("; ")
                ));
            }
            if !entry.tried.is_empty() {
                out.push_str(&format!("      tried: {}\n", entry.tried.join(", ")));
            }
        }
        out
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_layout() {
        let problem = Problem {
            exhausted_goal: "app".to_string(),
            reason: "no version of app satisfies the constraints".to_string(),
            conflict: ConflictSet::new(),
            entries: vec![ProblemEntry {
                variable: "lib".to_string(),
                labels: vec!["==1 (dependency of app-1)".to_string()],
                tried: vec!["lib-2".to_string(), "lib-1".to_string()],
            }],
        };
        let text = problem.describe();
        assert!(text.starts_with("could not resolve dependencies\n"));
        assert!(text.contains("failed goal: app"));
        assert!(text.contains("  - lib"));
        assert!(text.contains("constrained by: ==1 (dependency of app-1)"));
        assert!(text.contains("tried: lib-2, lib-1"));
    }
}

//! The raw record of a walk: a stream of tagged events.
//!
//! Tests consume the stream directly; users see the rendered text. The
//! rendering is a pure function of the events, so it is byte-identical
//! across runs with the same input.

use std::fmt;

/// One step of the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveEvent {
    /// Context header: platform and compiler.
    Context { platform: String, compiler: String },
    /// A branch is being committed to.
    Trying { what: String, reason: String },
    /// A branch was refused by validation.
    Rejecting { what: String, why: String },
    /// The synthetic skip branch of an optional goal was taken.
    Skipping { what: String },
    /// A subtree failed.
    Conflict { vars: Vec<String>, why: String },
    /// Failure propagation jumped over an irrelevant choice.
    Backjumping { over: String },
    /// Two copies resolved to the same build and were merged.
    Linking { kept: String, merged: String },
    /// A complete assignment was reached.
    Done,
}

/// The append-only event log of one walk.
#[derive(Debug, Default)]
pub struct SolveLog {
    events: Vec<SolveEvent>,
}

impl SolveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SolveEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SolveEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The human-readable transcript of the walk.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_string());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for SolveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveEvent::Context { platform, compiler } => {
                write!(f, "solving for {compiler} on {platform}")
            }
            SolveEvent::Trying { what, reason } => {
                if reason.is_empty() {
                    write!(f, "trying: {what}")
                } else {
                    write!(f, "trying: {what} ({reason})")
                }
            }
            SolveEvent::Rejecting { what, why } => write!(f, "rejecting: {what} ({why})"),
            SolveEvent::Skipping { what } => write!(f, "skipping: {what}"),
            SolveEvent::Conflict { vars, why } => {
                write!(f, "conflict: {} ({why})", vars.join(", "))
            }
            SolveEvent::Backjumping { over } => write!(f, "backjumping over: {over}"),
            SolveEvent::Linking { kept, merged } => write!(f, "linking: {merged} -> {kept}"),
            SolveEvent::Done => write!(f, "done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_line_per_event() {
        let mut log = SolveLog::new();
        log.push(SolveEvent::Trying {
            what: "a-1".into(),
            reason: "build target".into(),
        });
        log.push(SolveEvent::Rejecting {
            what: "b-2".into(),
            why: "no version of b satisfies the constraints".into(),
        });
        log.push(SolveEvent::Done);

        let rendered = log.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "trying: a-1 (build target)");
        assert_eq!(
            lines[1],
            "rejecting: b-2 (no version of b satisfies the constraints)"
        );
        assert_eq!(lines[2], "done");
    }

    #[test]
    fn test_render_is_deterministic() {
        let build = || {
            let mut log = SolveLog::new();
            log.push(SolveEvent::Backjumping { over: "c".into() });
            log.push(SolveEvent::Conflict {
                vars: vec!["a".into(), "b".into()],
                why: "unknown package z".into(),
            });
            log.render()
        };
        assert_eq!(build(), build());
    }
}

//! Version ranges as a boolean algebra over primitive constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Version;

/// A version range: a boolean combination of primitive constraints.
///
/// Evaluation is total over all versions. The empty range is representable
/// (`VersionRange::none()`), and emptiness, intersection, union and
/// complement are exact: every range normalizes to a sorted, disjoint list
/// of half-open [`Interval`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionRange {
    /// Matches every version.
    Any,
    /// Exactly the given version.
    This(Version),
    /// The given version or anything later.
    OrLater(Version),
    /// Anything strictly earlier than the given version.
    Earlier(Version),
    /// The given version or later, within the same major series.
    WithinMajor(Version),
    /// Matches when any member matches. `Union(vec![])` matches nothing.
    Union(Vec<VersionRange>),
    /// Matches when all members match. `Intersect(vec![])` matches everything.
    Intersect(Vec<VersionRange>),
    /// Matches when the inner range does not.
    Complement(Box<VersionRange>),
}

impl VersionRange {
    /// The range that matches no version at all.
    pub fn none() -> VersionRange {
        VersionRange::Union(Vec::new())
    }

    /// Exact-version range.
    pub fn this(version: Version) -> VersionRange {
        VersionRange::This(version)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, VersionRange::Any)
    }

    /// Whether the given version satisfies this range.
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            VersionRange::Any => true,
            VersionRange::This(v) => version == v,
            VersionRange::OrLater(v) => version >= v,
            VersionRange::Earlier(v) => version < v,
            VersionRange::WithinMajor(v) => {
                version >= v && *version < v.major_upper_bound()
            }
            VersionRange::Union(members) => members.iter().any(|r| r.contains(version)),
            VersionRange::Intersect(members) => members.iter().all(|r| r.contains(version)),
            VersionRange::Complement(inner) => !inner.contains(version),
        }
    }

    /// Whether no version can satisfy this range.
    pub fn is_empty(&self) -> bool {
        self.canonical().is_empty()
    }

    /// The intersection of two ranges, flattening nested intersections.
    pub fn intersect(self, other: VersionRange) -> VersionRange {
        match (self, other) {
            (VersionRange::Any, r) | (r, VersionRange::Any) => r,
            (VersionRange::Intersect(mut a), VersionRange::Intersect(b)) => {
                a.extend(b);
                VersionRange::Intersect(a)
            }
            (VersionRange::Intersect(mut a), r) => {
                a.push(r);
                VersionRange::Intersect(a)
            }
            (r, VersionRange::Intersect(mut a)) => {
                a.insert(0, r);
                VersionRange::Intersect(a)
            }
            (a, b) => VersionRange::Intersect(vec![a, b]),
        }
    }

    /// The union of two ranges, flattening nested unions.
    pub fn union(self, other: VersionRange) -> VersionRange {
        match (self, other) {
            (VersionRange::Union(mut a), VersionRange::Union(b)) => {
                a.extend(b);
                VersionRange::Union(a)
            }
            (VersionRange::Union(mut a), r) => {
                a.push(r);
                VersionRange::Union(a)
            }
            (r, VersionRange::Union(mut a)) => {
                a.insert(0, r);
                VersionRange::Union(a)
            }
            (a, b) => VersionRange::Union(vec![a, b]),
        }
    }

    pub fn complement(self) -> VersionRange {
        VersionRange::Complement(Box::new(self))
    }

    /// Normal form: sorted, disjoint, non-empty half-open intervals.
    pub fn canonical(&self) -> Vec<Interval> {
        let raw = match self {
            VersionRange::Any => vec![Interval::full()],
            VersionRange::This(v) => {
                vec![Interval::new(Some(v.clone()), Some(v.successor()))]
            }
            VersionRange::OrLater(v) => vec![Interval::new(Some(v.clone()), None)],
            VersionRange::Earlier(v) => vec![Interval::new(None, Some(v.clone()))],
            VersionRange::WithinMajor(v) => {
                vec![Interval::new(Some(v.clone()), Some(v.major_upper_bound()))]
            }
            VersionRange::Union(members) => {
                let mut all = Vec::new();
                for member in members {
                    all.extend(member.canonical());
                }
                coalesce(all)
            }
            VersionRange::Intersect(members) => {
                let mut acc = vec![Interval::full()];
                for member in members {
                    acc = intersect_lists(&acc, &member.canonical());
                    if acc.is_empty() {
                        break;
                    }
                }
                acc
            }
            VersionRange::Complement(inner) => complement_list(&inner.canonical()),
        };
        raw.into_iter().filter(|i| !i.is_void()).collect()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Any => write!(f, "*"),
            VersionRange::This(v) => write!(f, "=={v}"),
            VersionRange::OrLater(v) => write!(f, ">={v}"),
            VersionRange::Earlier(v) => write!(f, "<{v}"),
            VersionRange::WithinMajor(v) => write!(f, "^{v}"),
            VersionRange::Union(members) if members.is_empty() => write!(f, "none"),
            VersionRange::Union(members) => {
                write!(f, "(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
            VersionRange::Intersect(members) if members.is_empty() => write!(f, "*"),
            VersionRange::Intersect(members) => {
                write!(f, "(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
            VersionRange::Complement(inner) => write!(f, "!({inner})"),
        }
    }
}

/// A half-open interval `[lower, upper)`; `None` means unbounded on that
/// side. Exclusive lower bounds and inclusive upper bounds are rewritten via
/// [`Version::successor`], so this form loses nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    lower: Option<Version>,
    upper: Option<Version>,
}

impl Interval {
    fn new(lower: Option<Version>, upper: Option<Version>) -> Self {
        Self { lower, upper }
    }

    fn full() -> Self {
        Self::new(None, None)
    }

    pub fn lower(&self) -> Option<&Version> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Version> {
        self.upper.as_ref()
    }

    fn is_void(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => lo >= hi,
            _ => false,
        }
    }

    pub fn contains(&self, version: &Version) -> bool {
        let above = match &self.lower {
            Some(lo) => version >= lo,
            None => true,
        };
        let below = match &self.upper {
            Some(hi) => version < hi,
            None => true,
        };
        above && below
    }
}

/// Order two lower bounds; `None` is negative infinity.
fn cmp_lower(a: &Option<Version>, b: &Option<Version>) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(y),
    }
}

/// Order two upper bounds; `None` is positive infinity.
fn cmp_upper(a: &Option<Version>, b: &Option<Version>) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y),
    }
}

/// Sort intervals and merge overlapping or touching neighbours.
fn coalesce(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.retain(|i| !i.is_void());
    intervals.sort_by(|a, b| cmp_lower(&a.lower, &b.lower));

    let mut merged: Vec<Interval> = Vec::new();
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            let touches = match (&last.upper, &interval.lower) {
                (None, _) | (_, None) => true,
                (Some(hi), Some(lo)) => lo <= hi,
            };
            if touches {
                if cmp_upper(&interval.upper, &last.upper) == std::cmp::Ordering::Greater {
                    last.upper = interval.upper;
                }
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

fn intersect_lists(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let lo = match cmp_lower(&a[i].lower, &b[j].lower) {
            std::cmp::Ordering::Less => b[j].lower.clone(),
            _ => a[i].lower.clone(),
        };
        let (hi, advance_a) = match cmp_upper(&a[i].upper, &b[j].upper) {
            std::cmp::Ordering::Less => (a[i].upper.clone(), true),
            std::cmp::Ordering::Greater => (b[j].upper.clone(), false),
            std::cmp::Ordering::Equal => (a[i].upper.clone(), true),
        };
        let candidate = Interval::new(lo, hi);
        if !candidate.is_void() {
            out.push(candidate);
        }
        if advance_a {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

fn complement_list(intervals: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    // Lower bound of the next gap; `None` is negative infinity.
    let mut cursor: Option<Version> = None;
    for interval in intervals {
        if let Some(start) = &interval.lower {
            let gap = Interval::new(cursor.clone(), Some(start.clone()));
            if !gap.is_void() {
                out.push(gap);
            }
        }
        match &interval.upper {
            Some(hi) => cursor = Some(hi.clone()),
            None => return out, // covered up to positive infinity
        }
    }
    out.push(Interval::new(cursor, None));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_primitive_containment() {
        assert!(VersionRange::Any.contains(&v("0")));
        assert!(VersionRange::This(v("1.2")).contains(&v("1.2")));
        assert!(!VersionRange::This(v("1.2")).contains(&v("1.2.0")));
        assert!(VersionRange::OrLater(v("1.2")).contains(&v("1.2")));
        assert!(VersionRange::OrLater(v("1.2")).contains(&v("2")));
        assert!(!VersionRange::OrLater(v("1.2")).contains(&v("1.1")));
        assert!(VersionRange::Earlier(v("1.2.0")).contains(&v("1.2")));
        assert!(!VersionRange::Earlier(v("1.2")).contains(&v("1.2")));
        assert!(VersionRange::WithinMajor(v("1.2.3")).contains(&v("1.2.9")));
        assert!(!VersionRange::WithinMajor(v("1.2.3")).contains(&v("1.3")));
        assert!(!VersionRange::WithinMajor(v("1.2.3")).contains(&v("1.2.2")));
    }

    #[test]
    fn test_none_matches_nothing() {
        let none = VersionRange::none();
        assert!(!none.contains(&v("1")));
        assert!(none.is_empty());
    }

    #[test]
    fn test_compound_containment() {
        let range = VersionRange::This(v("1")).union(VersionRange::OrLater(v("3")));
        assert!(range.contains(&v("1")));
        assert!(!range.contains(&v("2")));
        assert!(range.contains(&v("3.1")));

        let band = VersionRange::OrLater(v("1")).intersect(VersionRange::Earlier(v("2")));
        assert!(band.contains(&v("1.5")));
        assert!(!band.contains(&v("2")));

        let hole = band.clone().intersect(VersionRange::This(v("1.5")).complement());
        assert!(!hole.contains(&v("1.5")));
        assert!(hole.contains(&v("1.6")));
    }

    #[test]
    fn test_exact_emptiness() {
        // >=1.2 && <1.2.0 && !(==1.2) leaves nothing: 1.2.0 is the
        // immediate successor of 1.2.
        let range = VersionRange::OrLater(v("1.2"))
            .intersect(VersionRange::Earlier(v("1.2.0")))
            .intersect(VersionRange::This(v("1.2")).complement());
        assert!(range.is_empty());

        let nonempty = VersionRange::OrLater(v("1.2"))
            .intersect(VersionRange::Earlier(v("1.2.0.0")))
            .intersect(VersionRange::This(v("1.2")).complement());
        assert!(!nonempty.is_empty());
        assert!(nonempty.contains(&v("1.2.0")));
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let a = VersionRange::WithinMajor(v("1.2"));
        let b = VersionRange::OrLater(v("2"));
        assert!(a.intersect(b).is_empty());
    }

    #[test]
    fn test_union_coalesces() {
        let range = VersionRange::WithinMajor(v("1.2"))
            .union(VersionRange::WithinMajor(v("1.3")))
            .union(VersionRange::WithinMajor(v("1.4")));
        let canonical = range.canonical();
        assert_eq!(canonical.len(), 1);
        assert!(range.contains(&v("1.3.7")));
        assert!(!range.contains(&v("1.5")));
    }

    #[test]
    fn test_complement_roundtrip() {
        let range = VersionRange::OrLater(v("1")).intersect(VersionRange::Earlier(v("2")));
        let complement = range.clone().complement();
        assert!(complement.contains(&v("0.9")));
        assert!(complement.contains(&v("2")));
        assert!(!complement.contains(&v("1.5")));

        let double = complement.complement();
        assert!(double.contains(&v("1.5")));
        assert!(!double.contains(&v("2")));
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionRange::Any.to_string(), "*");
        assert_eq!(VersionRange::This(v("1.2")).to_string(), "==1.2");
        assert_eq!(VersionRange::none().to_string(), "none");
        let range = VersionRange::OrLater(v("1")).intersect(VersionRange::Earlier(v("2")));
        assert_eq!(range.to_string(), "(>=1 && <2)");
    }
}

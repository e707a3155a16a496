//! Ensemble combination of detector verdicts
//!
//! Two row-aligned flag vectors are merged by a fixed boolean policy.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How two detectors' anomaly flags are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnsemblePolicy {
    /// Flag if either detector flags
    #[default]
    Union,
    /// Flag only if both detectors flag
    Intersection,
}

impl EnsemblePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsemblePolicy::Union => "union",
            EnsemblePolicy::Intersection => "intersection",
        }
    }

    /// Parse a policy name; unknown names fall back to union
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "union" | "majority_vote" | "or" => EnsemblePolicy::Union,
            "intersection" | "and" => EnsemblePolicy::Intersection,
            other => {
                warn!("Unknown ensemble policy {:?}, using union", other);
                EnsemblePolicy::Union
            }
        }
    }
}

impl From<String> for EnsemblePolicy {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<EnsemblePolicy> for String {
    fn from(policy: EnsemblePolicy) -> Self {
        policy.as_str().to_string()
    }
}

impl fmt::Display for EnsemblePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine two row-aligned flag vectors
///
/// # Panics
///
/// Panics if the vectors differ in length; callers always pass the outputs
/// of two detectors run over the same matrix.
pub fn combine(a: &[bool], b: &[bool], policy: EnsemblePolicy) -> Vec<bool> {
    assert_eq!(
        a.len(),
        b.len(),
        "ensemble inputs must be row-aligned ({} vs {})",
        a.len(),
        b.len()
    );

    match policy {
        EnsemblePolicy::Union => a.iter().zip(b).map(|(&x, &y)| x || y).collect(),
        EnsemblePolicy::Intersection => a.iter().zip(b).map(|(&x, &y)| x && y).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: [bool; 4] = [true, false, true, false];
    const B: [bool; 4] = [true, true, false, false];

    #[test]
    fn test_union() {
        assert_eq!(combine(&A, &B, EnsemblePolicy::Union), vec![true, true, true, false]);
    }

    #[test]
    fn test_intersection() {
        assert_eq!(
            combine(&A, &B, EnsemblePolicy::Intersection),
            vec![true, false, false, false]
        );
    }

    #[test]
    fn test_empty() {
        assert!(combine(&[], &[], EnsemblePolicy::Union).is_empty());
    }

    #[test]
    #[should_panic(expected = "row-aligned")]
    fn test_length_mismatch_panics() {
        combine(&[true], &[true, false], EnsemblePolicy::Union);
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(EnsemblePolicy::parse("intersection"), EnsemblePolicy::Intersection);
        assert_eq!(EnsemblePolicy::parse("majority_vote"), EnsemblePolicy::Union);
        assert_eq!(EnsemblePolicy::parse("something_else"), EnsemblePolicy::Union);
        assert_eq!(String::from(EnsemblePolicy::Intersection), "intersection");
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&EnsemblePolicy::Intersection).unwrap();
        assert_eq!(json, "\"intersection\"");

        let policy: EnsemblePolicy = serde_json::from_str("\"majority_vote\"").unwrap();
        assert_eq!(policy, EnsemblePolicy::Union);
    }
}

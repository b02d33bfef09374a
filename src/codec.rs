//! Sequence codec for candidacy node names.
//!
//! Ranks are always compared as parsed integers. Lexical order of raw node
//! names only agrees with rank order while every suffix has the same digit
//! width, so nothing in the crate sorts names as strings.

use std::cmp::Ordering;

use crate::types::{ElectionError, Rank};

/// Separator between the node prefix and the sequence suffix.
pub const SEQUENCE_SEPARATOR: char = '_';

/// Parses the rank of a candidacy node from its name or full path.
///
/// The rank is the numeric suffix after the last [`SEQUENCE_SEPARATOR`] of
/// the final path segment.
///
/// # Errors
///
/// Returns [`ElectionError::ProtocolViolation`] if the suffix is missing or
/// not a number, which means something outside the election wrote into the
/// election root.
pub fn rank(path: &str) -> Result<Rank, ElectionError> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let violation = || ElectionError::ProtocolViolation { name: name.to_string() };

    let (_, suffix) = name.rsplit_once(SEQUENCE_SEPARATOR).ok_or_else(violation)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(violation());
    }
    suffix.parse().map_err(|_| violation())
}

/// A sibling candidacy node: its name under the election root and its rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Node name relative to the election root.
    pub name: String,
    /// Parsed rank.
    pub rank: Rank,
}

impl Candidate {
    /// Parses a candidate from a child name.
    pub fn parse(name: impl Into<String>) -> Result<Self, ElectionError> {
        let name = name.into();
        let rank = rank(&name)?;
        Ok(Self { name, rank })
    }

    /// Returns the full path of this candidate under `root`.
    pub fn path(&self, root: &str) -> String {
        format!("{}/{}", root.trim_end_matches('/'), self.name)
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank).then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parses every child name and sorts the result by rank.
///
/// # Errors
///
/// Fails on the first name without a numeric suffix.
pub fn ranked<I, S>(names: I) -> Result<Vec<Candidate>, ElectionError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut candidates = names.into_iter().map(Candidate::parse).collect::<Result<Vec<_>, _>>()?;
    candidates.sort();
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::zookeeper_padding("guid-n_0000000007", 7)]
    #[case::full_path("/election/guid-n_0000000012", 12)]
    #[case::unpadded("guid-n_3", 3)]
    #[case::underscore_in_prefix("my_service_n_42", 42)]
    #[case::wide("guid-n_12345678901", 12_345_678_901)]
    fn parses_rank(#[case] path: &str, #[case] expected: Rank) {
        assert_eq!(rank(path).unwrap(), expected);
    }

    #[rstest]
    #[case::no_separator("lock")]
    #[case::empty_suffix("guid-n_")]
    #[case::alpha_suffix("guid-n_abc")]
    #[case::signed_suffix("guid-n_-2147483648")]
    #[case::separator_only_in_parent("/election_1/lock")]
    fn rejects_non_numeric_suffix(#[case] path: &str) {
        assert!(matches!(rank(path), Err(ElectionError::ProtocolViolation { .. })));
    }

    #[test]
    fn ranked_uses_numeric_order() {
        // Lexical order would put "n_10" before "n_9".
        let candidates = ranked(["n_10", "n_9", "n_100"]).unwrap();
        let ranks: Vec<_> = candidates.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![9, 10, 100]);
    }

    #[test]
    fn ranked_fails_on_foreign_node() {
        let err = ranked(["n_1", "config"]).unwrap_err();
        assert_eq!(err, ElectionError::ProtocolViolation { name: "config".to_string() });
    }

    #[test]
    fn candidate_path_joins_root() {
        let candidate = Candidate::parse("guid-n_0000000001").unwrap();
        assert_eq!(candidate.path("/election"), "/election/guid-n_0000000001");
        assert_eq!(candidate.path("/election/"), "/election/guid-n_0000000001");
    }
}

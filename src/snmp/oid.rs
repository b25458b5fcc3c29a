//! Numeric object identifiers

use crate::error::SnmpError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A numeric OID such as `1.3.6.1.2.1.1.1.0`
///
/// Ordering is lexicographic over the arcs, which is the order GETNEXT
/// walks a MIB in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` lies inside the subtree rooted at `root`
    pub fn starts_with(&self, root: &Oid) -> bool {
        self.0.starts_with(&root.0)
    }

    /// Last arc, which for table columns is the row index
    pub fn last_arc(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Append one arc
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }

    /// Append several arcs (an instance index)
    pub fn extend(&self, suffix: &[u32]) -> Oid {
        let mut arcs = self.0.clone();
        arcs.extend_from_slice(suffix);
        Oid(arcs)
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(SnmpError::Decode(format!("empty OID '{}'", s)));
        }

        let arcs = trimmed
            .split('.')
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| SnmpError::Decode(format!("invalid OID arc '{}' in '{}'", arc, s)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Oid(arcs))
    }
}

impl TryFrom<String> for Oid {
    type Error = SnmpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.to_string()
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Oid(arcs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_display() {
        let oid: Oid = "1.3.6.1.2.1.1.1.0".parse().unwrap();
        assert_eq!(oid.arcs(), &[1, 3, 6, 1, 2, 1, 1, 1, 0]);
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.1.0");

        let leading_dot: Oid = ".1.3.6".parse().unwrap();
        assert_eq!(leading_dot.arcs(), &[1, 3, 6]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Oid>().is_err());
        assert!("1.3.x".parse::<Oid>().is_err());
        assert!("1..3".parse::<Oid>().is_err());
    }

    #[test]
    fn test_subtree_and_ordering() {
        let root: Oid = "1.3.6.1.2.1.31.1.1.1.18".parse().unwrap();
        let row: Oid = "1.3.6.1.2.1.31.1.1.1.18.10101".parse().unwrap();
        let next_column: Oid = "1.3.6.1.2.1.31.1.1.1.19.1".parse().unwrap();

        assert!(row.starts_with(&root));
        assert!(!next_column.starts_with(&root));
        assert!(root < row && row < next_column);
        assert_eq!(row.last_arc(), Some(10101));
        assert_eq!(root.child(5).last_arc(), Some(5));
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(arcs in proptest::collection::vec(any::<u32>(), 1..24)) {
            let oid = Oid::new(arcs);
            let parsed: Oid = oid.to_string().parse().unwrap();
            prop_assert_eq!(parsed, oid);
        }
    }
}

//! Declared tensor shapes, including dynamic dimensions and the legacy
//! unknown-output sentinel.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire value for a dynamic dimension in a serialized graph
const DYNAMIC_DIM: i64 = -1;

/// Wire value for the legacy unknown-output-shape sentinel
const UNKNOWN_DIM: i64 = -99;

/// One dimension of a declared shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Concrete extent
    Static(u64),
    /// Symbolic extent, resolved by an optimization profile
    Dynamic,
    /// Legacy unknown-shape sentinel; only valid as the sole dimension of
    /// an output shape
    Unknown,
}

impl Serialize for Dim {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = match self {
            Dim::Static(n) => *n as i64,
            Dim::Dynamic => DYNAMIC_DIM,
            Dim::Unknown => UNKNOWN_DIM,
        };
        serializer.serialize_i64(v)
    }
}

impl<'de> Deserialize<'de> for Dim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i64::deserialize(deserializer)?;
        match v {
            DYNAMIC_DIM => Ok(Dim::Dynamic),
            UNKNOWN_DIM => Ok(Dim::Unknown),
            n if n >= 0 => Ok(Dim::Static(n as u64)),
            n => Err(D::Error::custom(format!("invalid dimension value {}", n))),
        }
    }
}

/// A declared tensor shape.
///
/// `()` (rank zero) is a scalar. A shape equal to `[-99]` on the wire is
/// the unknown-output sentinel inherited from older graph exporters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Shape(pub Vec<Dim>);

impl Shape {
    /// Scalar shape `()`
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    /// Fully static shape from concrete extents
    pub fn from_static(dims: &[u64]) -> Self {
        Shape(dims.iter().map(|&d| Dim::Static(d)).collect())
    }

    /// Concrete shape from runtime extents
    pub fn from_concrete(dims: &[usize]) -> Self {
        Shape(dims.iter().map(|&d| Dim::Static(d as u64)).collect())
    }

    /// The unknown-output sentinel shape
    pub fn unknown() -> Self {
        Shape(vec![Dim::Unknown])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    /// True when every dimension is concrete
    pub fn is_static(&self) -> bool {
        self.0.iter().all(|d| matches!(d, Dim::Static(_)))
    }

    /// True when any dimension is symbolic
    pub fn is_dynamic(&self) -> bool {
        self.0.iter().any(|d| matches!(d, Dim::Dynamic))
    }

    /// True for the legacy unknown-output sentinel
    pub fn is_unknown_sentinel(&self) -> bool {
        self.0 == [Dim::Unknown]
    }

    /// Concrete extents, if the shape is fully static
    pub fn to_concrete(&self) -> Option<Vec<usize>> {
        self.0
            .iter()
            .map(|d| match d {
                Dim::Static(n) => Some(*n as usize),
                _ => None,
            })
            .collect()
    }

    /// Whether a concrete runtime shape satisfies this declaration
    /// (dynamic dimensions match any extent)
    pub fn matches_concrete(&self, concrete: &[usize]) -> bool {
        if self.0.len() != concrete.len() {
            return false;
        }
        self.0.iter().zip(concrete).all(|(d, &c)| match d {
            Dim::Static(n) => *n as usize == c,
            Dim::Dynamic => true,
            Dim::Unknown => false,
        })
    }

    /// Element count of a fully static shape (scalar counts as 1)
    pub fn element_count(&self) -> Option<usize> {
        self.to_concrete().map(|dims| dims.iter().product())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match d {
                Dim::Static(n) => write!(f, "{}", n)?,
                Dim::Dynamic => write!(f, "-1")?,
                Dim::Unknown => write!(f, "-99")?,
            }
        }
        write!(f, ")")
    }
}

/// Count trailing dimensions equal to 1.
///
/// Used by the result normalizer to strip padding the engine adds to
/// satisfy its minimum binding rank.
pub fn count_trailing_ones(dims: &[usize]) -> usize {
    dims.iter().rev().take_while(|&&d| d == 1).count()
}

//! Optimization profile negotiation for dynamic graphs.
//!
//! The engine compiler needs concrete extents for every dynamic dimension
//! and literal values for every shape tensor before it can build. Profiles
//! here are always pinned: min, opt and max all equal the observed value,
//! so the engine is specialized for exactly the shapes the first call saw.

use std::collections::HashMap;

/// Allowed extent range for one dynamic-shaped input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeRange {
    pub min: Vec<usize>,
    pub opt: Vec<usize>,
    pub max: Vec<usize>,
}

impl ShapeRange {
    /// Range collapsed to a single concrete shape
    pub fn pinned(dims: &[usize]) -> Self {
        ShapeRange {
            min: dims.to_vec(),
            opt: dims.to_vec(),
            max: dims.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
enum ProfileEntry {
    Dims(ShapeRange),
    ShapeValues(Vec<i64>),
}

/// Per-input resolution used to specialize a dynamic graph
#[derive(Debug, Clone, Default)]
pub struct OptimizationProfile {
    entries: HashMap<String, ProfileEntry>,
}

impl OptimizationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the concrete dimensions observed for a dynamic input
    pub fn pin_dims(&mut self, name: impl Into<String>, dims: &[usize]) {
        self.entries
            .insert(name.into(), ProfileEntry::Dims(ShapeRange::pinned(dims)));
    }

    /// Register the literal values observed for a shape-valued input
    pub fn pin_shape_values(&mut self, name: impl Into<String>, values: &[i64]) {
        self.entries
            .insert(name.into(), ProfileEntry::ShapeValues(values.to_vec()));
    }

    /// Resolved dimensions for a dynamic input (the opt point)
    pub fn dims(&self, name: &str) -> Option<&[usize]> {
        match self.entries.get(name) {
            Some(ProfileEntry::Dims(range)) => Some(&range.opt),
            _ => None,
        }
    }

    /// Resolved literal values for a shape-valued input
    pub fn shape_values(&self, name: &str) -> Option<&[i64]> {
        match self.entries.get(name) {
            Some(ProfileEntry::ShapeValues(values)) => Some(values),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_range_collapses() {
        let r = ShapeRange::pinned(&[1, 3, 224, 224]);
        assert_eq!(r.min, r.opt);
        assert_eq!(r.opt, r.max);
    }

    #[test]
    fn test_entry_kinds_do_not_alias() {
        let mut p = OptimizationProfile::new();
        p.pin_dims("x", &[1, 77]);
        p.pin_shape_values("target", &[2, 3]);

        assert_eq!(p.dims("x"), Some(&[1usize, 77][..]));
        assert_eq!(p.shape_values("x"), None);
        assert_eq!(p.shape_values("target"), Some(&[2i64, 3][..]));
        assert_eq!(p.dims("target"), None);
    }
}

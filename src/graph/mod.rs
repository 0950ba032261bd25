//! Computation-graph model: element types, shapes, and the serialized
//! graph definition consumed at build time.

pub mod dtype;
pub mod model;
pub mod shape;

pub use dtype::DType;
pub use model::{ComputationGraph, GraphNode, OpKind, TensorSpec};
pub use shape::{count_trailing_ones, Dim, Shape};

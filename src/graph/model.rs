//! The serialized computation-graph definition.
//!
//! A graph is loaded once from a JSON file at build time and is read-only
//! afterwards. It declares named inputs and outputs with element types and
//! (possibly dynamic) shapes, plus a flat list of operator nodes wired by
//! tensor name.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::{DType, Shape};

/// Declared metadata for one named tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
    /// True for inputs whose *values* are shapes consumed by
    /// shape-inference-only operators (e.g. the target of a Reshape).
    /// Shape tensors are bound by value, not by device address.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_shape_tensor: bool,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, dtype: DType, shape: Shape) -> Self {
        TensorSpec {
            name: name.into(),
            dtype,
            shape,
            is_shape_tensor: false,
        }
    }

    pub fn shape_tensor(name: impl Into<String>, dtype: DType, shape: Shape) -> Self {
        TensorSpec {
            name: name.into(),
            dtype,
            shape,
            is_shape_tensor: true,
        }
    }
}

/// Operator kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OpKind {
    Identity,
    Add,
    Mul,
    MatMul,
    Relu,
    Cast { to: DType },
    /// Emits the shape of its input as an i32 vector
    Shape,
    /// Second input is a shape tensor supplying the target extents
    Reshape,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Identity => "Identity",
            OpKind::Add => "Add",
            OpKind::Mul => "Mul",
            OpKind::MatMul => "MatMul",
            OpKind::Relu => "Relu",
            OpKind::Cast { .. } => "Cast",
            OpKind::Shape => "Shape",
            OpKind::Reshape => "Reshape",
        }
    }
}

/// One node of the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(flatten)]
    pub op: OpKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Immutable model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationGraph {
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub nodes: Vec<GraphNode>,
}

impl ComputationGraph {
    pub fn new(name: impl Into<String>) -> Self {
        ComputationGraph {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn add_input(&mut self, spec: TensorSpec) -> &mut Self {
        self.inputs.push(spec);
        self
    }

    pub fn add_output(&mut self, spec: TensorSpec) -> &mut Self {
        self.outputs.push(spec);
        self
    }

    pub fn add_node(
        &mut self,
        op: OpKind,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> &mut Self {
        self.nodes.push(GraphNode {
            op,
            inputs,
            outputs,
        });
        self
    }

    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|t| t.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|t| t.name == name)
    }

    /// True when any input needs an optimization profile before the engine
    /// can execute: dynamic-shaped tensors and shape-valued tensors both do.
    pub fn needs_profile(&self) -> bool {
        self.inputs
            .iter()
            .any(|t| t.shape.is_dynamic() || t.is_shape_tensor)
    }

    /// Load a graph definition from a JSON file
    pub fn load_file(path: impl AsRef<Path>) -> ForgeResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            GraphForgeError::InvalidConfiguration(format!(
                "malformed graph file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Serialize the graph definition to a JSON file
    pub fn save_file(&self, path: impl AsRef<Path>) -> ForgeResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| GraphForgeError::Internal(format!("graph serialization: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }
}

//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use graphforge::{
    BuildConfig, ComputationGraph, DType, EngineBuilder, ExecutionRuntime, KernelCompiler,
    ReferenceCompiler, Shape,
};
use graphforge::graph::{OpKind, TensorSpec};

pub fn compiler() -> Arc<dyn KernelCompiler> {
    Arc::new(ReferenceCompiler::new())
}

pub fn accel() -> graphforge::Device {
    graphforge::Device::parse("accel:0").unwrap()
}

pub fn build_runtime(graph: &ComputationGraph, config: BuildConfig) -> ExecutionRuntime {
    EngineBuilder::new(compiler(), &accel(), config)
        .unwrap()
        .build(graph)
        .unwrap()
}

/// y = relu(x), x: f32 (2, 3)
pub fn relu_graph() -> ComputationGraph {
    let mut g = ComputationGraph::new("relu");
    g.add_input(TensorSpec::new("x", DType::F32, Shape::from_static(&[2, 3])));
    g.add_output(TensorSpec::new("y", DType::F32, Shape::from_static(&[2, 3])));
    g.add_node(OpKind::Relu, vec!["x".into()], vec!["y".into()]);
    g
}

/// y = x * scale, x: f32 (1, 3, 224, 224), scale: f32 (1,)
pub fn image_scale_graph() -> ComputationGraph {
    let mut g = ComputationGraph::new("image_scale");
    g.add_input(TensorSpec::new(
        "image",
        DType::F32,
        Shape::from_static(&[1, 3, 224, 224]),
    ));
    g.add_input(TensorSpec::new("scale", DType::F32, Shape::from_static(&[1])));
    g.add_output(TensorSpec::new("scaled", DType::F32, Shape::unknown()));
    g.add_node(
        OpKind::Mul,
        vec!["image".into(), "scale".into()],
        vec!["scaled".into()],
    );
    g
}

/// y = x (identity), x: i64 (4,); binding lowers to i32
pub fn i64_identity_graph() -> ComputationGraph {
    let mut g = ComputationGraph::new("i64_identity");
    g.add_input(TensorSpec::new("x", DType::I64, Shape::from_static(&[4])));
    g.add_output(TensorSpec::new("y", DType::I64, Shape::from_static(&[4])));
    g.add_node(OpKind::Identity, vec!["x".into()], vec!["y".into()]);
    g
}

//! Build pipeline and artifact cache behavior.

mod common;

use std::path::PathBuf;

use anyhow::Result;
use graphforge::{
    BuildConfig, Device, EngineBuilder, GraphForgeError, InMemoryCalibrator, PrecisionMode,
    Tensor, TensorArg, TransferMode,
};

use common::{accel, build_runtime, compiler, i64_identity_graph, relu_graph};

#[test]
fn test_cpu_device_rejected() {
    let err = EngineBuilder::new(
        compiler(),
        &Device::parse("cpu:0").unwrap(),
        BuildConfig::default(),
    )
    .unwrap_err();
    match err {
        GraphForgeError::DeviceMismatch { requested } => assert_eq!(requested, "cpu:0"),
        other => panic!("expected DeviceMismatch, got {:?}", other),
    }
}

#[test]
fn test_serialized_engine_runs_identically() -> Result<()> {
    let graph = relu_graph();
    let mut first = build_runtime(&graph, BuildConfig::default());

    let x = Tensor::from_f32(&[2, 3], &[-1.5, 2.0, -0.25, 4.0, -8.0, 0.0])?;
    let before = first.run(&[TensorArg::Host(&x)], TransferMode::Staged)?;

    // Round-trip the engine through its serialized form
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relu.engine");
    std::fs::write(&path, first.serialize_engine()?)?;
    let mut reloaded = EngineBuilder::load_cached(compiler(), &path, &accel())?;
    let after = reloaded.run(&[TensorArg::Host(&x)], TransferMode::Staged)?;

    assert_eq!(
        before.get("y").unwrap().to_host()?.bytes(),
        after.get("y").unwrap().to_host()?.bytes()
    );
    Ok(())
}

#[test]
fn test_cache_written_with_precision_suffix_and_reused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("model.engine");
    let graph = relu_graph();

    // Reduced precision is on by default and the reference device is
    // f16-capable, so the artifact lands at the _fp16 path
    let config = BuildConfig::default().with_cache_path(&base);
    let rt = build_runtime(&graph, config.clone());
    assert_eq!(rt.precision(), PrecisionMode::Reduced);

    let expected = dir.path().join("model_fp16.engine");
    assert!(expected.exists());
    assert!(!base.exists());

    // A second build resolves the same path and loads without compiling
    let mut cached = build_runtime(&graph, config);
    assert_eq!(cached.precision(), PrecisionMode::Reduced);
    let x = Tensor::from_f32(&[2, 3], &[1.0, -2.0, 3.0, -4.0, 5.0, -6.0])?;
    let out = cached.run(&[TensorArg::Host(&x)], TransferMode::Staged)?;
    assert_eq!(
        out.get("y").unwrap().to_host()?.as_f32()?,
        vec![1.0, 0.0, 3.0, 0.0, 5.0, 0.0]
    );
    Ok(())
}

#[test]
fn test_full_precision_uses_unsuffixed_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("model.engine");
    let config = BuildConfig::default()
        .with_reduced_precision(false)
        .with_cache_path(&base);
    let rt = build_runtime(&relu_graph(), config);
    assert_eq!(rt.precision(), PrecisionMode::Full);
    assert!(base.exists());
    Ok(())
}

#[test]
fn test_undersized_workspace_fails_build() {
    let config = BuildConfig::default().with_max_workspace_bytes(4);
    let err = EngineBuilder::new(compiler(), &accel(), config)
        .unwrap()
        .build(&relu_graph())
        .unwrap_err();
    assert!(matches!(err, GraphForgeError::BuildFailure(_)));

    // The same graph builds fine with a real budget
    build_runtime(&relu_graph(), BuildConfig::default());
}

#[test]
fn test_lowest_precision_requires_calibrator() {
    let config = BuildConfig::default().with_lowest_precision(true);
    let err = EngineBuilder::new(compiler(), &accel(), config)
        .unwrap()
        .build(&relu_graph())
        .unwrap_err();
    assert!(matches!(err, GraphForgeError::InvalidConfiguration(_)));
}

#[test]
fn test_lowest_precision_with_calibrator() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base: PathBuf = dir.path().join("model.engine");
    let batches = vec![
        vec![Tensor::from_f32(&[2, 3], &[1.0, -2.0, 3.0, -4.0, 5.0, -6.0])?],
        vec![Tensor::from_f32(&[2, 3], &[0.5; 6])?],
    ];
    let calibrator = InMemoryCalibrator::new(batches)?;

    let config = BuildConfig::default()
        .with_lowest_precision(true)
        .with_cache_path(&base);
    let rt = EngineBuilder::new(compiler(), &accel(), config)?
        .with_calibrator(Box::new(calibrator))
        .build(&relu_graph())?;

    assert_eq!(rt.precision(), PrecisionMode::Lowest);
    assert!(dir.path().join("model_int8.engine").exists());
    Ok(())
}

#[test]
fn test_corrupt_cache_artifact_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.engine");
    std::fs::write(&path, b"garbage")?;
    let err = EngineBuilder::load_cached(compiler(), &path, &accel()).unwrap_err();
    assert!(matches!(err, GraphForgeError::EngineCache(_)));
    Ok(())
}

#[test]
fn test_parse_error_names_offending_node() {
    use graphforge::graph::{OpKind, TensorSpec};
    use graphforge::{ComputationGraph, DType, Shape};

    let mut g = ComputationGraph::new("bad");
    g.add_input(TensorSpec::new("a", DType::F32, Shape::from_static(&[2, 3])));
    g.add_input(TensorSpec::new("b", DType::F32, Shape::from_static(&[3, 5])));
    g.add_output(TensorSpec::new("y", DType::F32, Shape::from_static(&[2, 5])));
    g.add_node(OpKind::MatMul, vec!["a".into(), "b".into()], vec!["m".into()]);
    // Node 1 consumes a tensor that nothing produces
    g.add_node(OpKind::Relu, vec!["ghost".into()], vec!["y".into()]);

    let err = EngineBuilder::new(compiler(), &accel(), BuildConfig::default())
        .unwrap()
        .build(&g)
        .unwrap_err();
    match err {
        GraphForgeError::GraphParse { node, diagnostic } => {
            assert_eq!(node, 1);
            assert!(!diagnostic.code.is_empty());
            assert!(!diagnostic.function.is_empty());
            assert!(diagnostic.line > 0);
            assert!(diagnostic.description.contains("ghost"));
        }
        other => panic!("expected GraphParse, got {:?}", other),
    }
}

#[test]
fn test_i64_graph_lowers_bindings() {
    let rt = build_runtime(&i64_identity_graph(), BuildConfig::default());
    let bindings = rt.bindings().unwrap();
    assert_eq!(bindings[0].dtype, graphforge::DType::I32);
    assert_eq!(bindings[0].declared_dtype, graphforge::DType::I64);
}

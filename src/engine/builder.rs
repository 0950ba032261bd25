//! Engine builder: precision selection, artifact cache, build dispatch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::calibration::CalibrationProvider;
use crate::compiler::{BuildRequest, KernelCompiler, PrecisionMode};
use crate::device::Device;
use crate::engine::runtime::ExecutionRuntime;
use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::ComputationGraph;

/// Default scratch-memory budget handed to the compiler (256 MiB)
pub const DEFAULT_MAX_WORKSPACE_BYTES: usize = 1 << 28;

/// Build-time options
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Upper bound on compiler scratch memory during optimization
    pub max_workspace_bytes: usize,
    /// Build with f16 when the device has a fast half-precision path.
    /// On by default; disable for exact-f32 builds.
    pub enable_reduced_precision: bool,
    /// Build with int8; requires fast int8 support and a calibrator
    pub enable_lowest_precision: bool,
    /// Base path of the engine artifact cache; the actual filename gets a
    /// precision suffix (see [`resolve_artifact_path`])
    pub cache_path: Option<PathBuf>,
    /// Log build progress at info level instead of debug
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            max_workspace_bytes: DEFAULT_MAX_WORKSPACE_BYTES,
            enable_reduced_precision: true,
            enable_lowest_precision: false,
            cache_path: None,
            verbose: false,
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_workspace_bytes(mut self, bytes: usize) -> Self {
        self.max_workspace_bytes = bytes;
        self
    }

    pub fn with_reduced_precision(mut self, enable: bool) -> Self {
        self.enable_reduced_precision = enable;
        self
    }

    pub fn with_lowest_precision(mut self, enable: bool) -> Self {
        self.enable_lowest_precision = enable;
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Where the engine artifact for a given precision lives.
///
/// The precision suffix is inserted before the extension, so
/// `model.engine` resolves to `model_fp16.engine` for a reduced-precision
/// build. Resolved once, before the cache existence check, so the path
/// used for lookup and the path written after a build always agree.
pub fn resolve_artifact_path(base: &Path, precision: PrecisionMode) -> PathBuf {
    let suffix = precision.suffix();
    if suffix.is_empty() {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let mut name = format!("{}{}", stem, suffix);
    if let Some(ext) = base.extension().and_then(|e| e.to_str()) {
        name.push('.');
        name.push_str(ext);
    }
    base.with_file_name(name)
}

/// Write an artifact through a temp file and atomic rename, so a crashed
/// build never leaves a truncated blob at the cache path.
pub(crate) fn write_artifact(path: &Path, blob: &[u8]) -> ForgeResult<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new()?,
    };
    use std::io::Write as _;
    tmp.write_all(blob)?;
    tmp.persist(path).map_err(|e| {
        GraphForgeError::EngineCache(format!(
            "could not place engine artifact at {}: {}",
            path.display(),
            e
        ))
    })?;
    tracing::debug!("write_artifact: {} bytes at {}", blob.len(), path.display());
    Ok(())
}

/// Builds (or cache-loads) a compiled engine and wraps it in a runtime
pub struct EngineBuilder {
    compiler: Arc<dyn KernelCompiler>,
    config: BuildConfig,
    calibration: Option<Box<dyn CalibrationProvider>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("compiler", &self.compiler.name())
            .field("config", &self.config)
            .field("has_calibrator", &self.calibration.is_some())
            .finish()
    }
}

impl EngineBuilder {
    /// Only accelerator devices can host compiled engines; anything else is
    /// rejected up front.
    pub fn new(
        compiler: Arc<dyn KernelCompiler>,
        device: &Device,
        config: BuildConfig,
    ) -> ForgeResult<Self> {
        if !device.is_accelerator() {
            return Err(GraphForgeError::DeviceMismatch {
                requested: device.selector().to_string(),
            });
        }
        Ok(EngineBuilder {
            compiler,
            config,
            calibration: None,
        })
    }

    /// Attach the calibration data feed required for int8 builds
    pub fn with_calibrator(mut self, provider: Box<dyn CalibrationProvider>) -> Self {
        self.calibration = Some(provider);
        self
    }

    fn select_precision(&self) -> ForgeResult<PrecisionMode> {
        let caps = self.compiler.device_caps();
        if self.config.enable_lowest_precision {
            if !caps.fast_i8 {
                return Err(GraphForgeError::InvalidConfiguration(
                    "lowest precision requested but the device has no fast int8 path"
                        .to_string(),
                ));
            }
            if self.calibration.is_none() {
                return Err(GraphForgeError::InvalidConfiguration(
                    "lowest precision requested without a calibration provider".to_string(),
                ));
            }
            return Ok(PrecisionMode::Lowest);
        }
        if self.config.enable_reduced_precision && caps.fast_f16 {
            return Ok(PrecisionMode::Reduced);
        }
        Ok(PrecisionMode::Full)
    }

    /// Build an engine for the graph, or load it from the cache if the
    /// resolved artifact already exists. Dynamic graphs defer compilation
    /// to the runtime's first `run()` call, which supplies the profile.
    pub fn build(mut self, graph: &ComputationGraph) -> ForgeResult<ExecutionRuntime> {
        let precision = self.select_precision()?;
        let artifact = self
            .config
            .cache_path
            .as_deref()
            .map(|base| resolve_artifact_path(base, precision));

        if let Some(path) = artifact.as_deref() {
            if path.exists() {
                if self.config.verbose {
                    tracing::info!("engine cache hit: {}", path.display());
                } else {
                    tracing::debug!("engine cache hit: {}", path.display());
                }
                let blob = fs::read(path)?;
                let engine = self.compiler.deserialize(&blob)?;
                return ExecutionRuntime::from_engine(self.compiler, engine);
            }
        }

        if graph.needs_profile() {
            tracing::debug!(
                "EngineBuilder::build: graph '{}' is dynamic, deferring build to first run",
                graph.name
            );
            return Ok(ExecutionRuntime::deferred(
                self.compiler,
                graph.clone(),
                precision,
                self.config.max_workspace_bytes,
                self.calibration,
                artifact,
            ));
        }

        if self.config.verbose {
            tracing::info!(
                "EngineBuilder::build: compiling '{}' at {} precision",
                graph.name,
                precision
            );
        }
        let blob = self.compiler.build(
            graph,
            BuildRequest {
                precision,
                max_workspace_bytes: self.config.max_workspace_bytes,
                profile: None,
                calibration: self.calibration.as_deref_mut().map(|c| c as _),
            },
        )?;
        if let Some(path) = artifact.as_deref() {
            write_artifact(path, &blob)?;
        }
        let engine = self.compiler.deserialize(&blob)?;
        ExecutionRuntime::from_engine(self.compiler, engine)
    }

    /// Load a previously serialized engine artifact directly
    pub fn load_cached(
        compiler: Arc<dyn KernelCompiler>,
        path: &Path,
        device: &Device,
    ) -> ForgeResult<ExecutionRuntime> {
        if !device.is_accelerator() {
            return Err(GraphForgeError::DeviceMismatch {
                requested: device.selector().to_string(),
            });
        }
        let blob = fs::read(path).map_err(|e| {
            GraphForgeError::EngineCache(format!(
                "cannot read engine artifact {}: {}",
                path.display(),
                e
            ))
        })?;
        let engine = compiler.deserialize(&blob)?;
        ExecutionRuntime::from_engine(compiler, engine)
    }
}

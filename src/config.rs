//! Configuration for RegionStore
//!
//! Two layers:
//! - [`ProviderConfig`]: the resolved `{ target, transfer_manager }`
//!   dictionary, parsed from and dumped back to JSON
//! - [`ServerConfig`]: process-level settings (network, workers) wrapping
//!   a `ProviderConfig`

use std::path::PathBuf;

use serde_json::{json, Map, Value};

use crate::error::{Result, StoreError};

// =============================================================================
// Backend (target) configuration
// =============================================================================

/// Storage substrate a provider allocates regions on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Volatile process memory
    Memory,
    /// File-backed store with an internal asynchronous I/O engine
    AbtIo,
    /// Byte-addressable persistent memory (memory-mapped store file)
    Pmdk,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::AbtIo => "abtio",
            BackendKind::Pmdk => "pmdk",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "memory" => Ok(BackendKind::Memory),
            "abtio" => Ok(BackendKind::AbtIo),
            "pmdk" => Ok(BackendKind::Pmdk),
            other => Err(StoreError::Config(format!("Unknown target type {:?}", other))),
        }
    }

    /// Whether regions on this backend survive a process restart
    pub fn is_persistent(&self) -> bool {
        !matches!(self, BackendKind::Memory)
    }
}

/// Backend descriptor: which backend, and its key/value settings
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub kind: BackendKind,

    /// Store file (required for abtio and pmdk)
    pub path: Option<PathBuf>,

    /// abtio: create the store file when it does not exist
    pub create_if_missing: bool,

    /// pmdk: capacity of a newly created store file
    pub create_if_missing_with_size: Option<u64>,

    /// Remove any existing store file before opening
    pub override_if_exists: bool,

    /// abtio: region alignment in bytes (multiple of 8)
    pub alignment: u64,

    /// abtio: number of I/O engine threads
    pub io_threads: usize,
}

impl TargetConfig {
    pub const DEFAULT_ALIGNMENT: u64 = 8;
    pub const DEFAULT_IO_THREADS: usize = 1;

    /// A volatile in-memory target
    pub fn memory() -> Self {
        Self {
            kind: BackendKind::Memory,
            path: None,
            create_if_missing: false,
            create_if_missing_with_size: None,
            override_if_exists: false,
            alignment: Self::DEFAULT_ALIGNMENT,
            io_threads: Self::DEFAULT_IO_THREADS,
        }
    }

    /// A file-backed target, created (or replaced) at `path`
    pub fn abtio(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: BackendKind::AbtIo,
            path: Some(path.into()),
            create_if_missing: true,
            override_if_exists: true,
            ..Self::memory()
        }
    }

    /// A persistent-memory target of `size` bytes, created (or replaced) at `path`
    pub fn pmdk(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            kind: BackendKind::Pmdk,
            path: Some(path.into()),
            create_if_missing_with_size: Some(size),
            override_if_exists: true,
            ..Self::memory()
        }
    }

    /// Store file path, failing for backends that need one but lack it
    pub fn require_path(&self) -> Result<&PathBuf> {
        self.path.as_ref().ok_or_else(|| {
            StoreError::Config(format!("\"path\" is required for {} targets", self.kind.name()))
        })
    }

    fn from_json(value: &Value) -> Result<Self> {
        let obj = as_object(value, "target")?;
        let kind_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Config("target.type must be a string".to_string()))?;
        let kind = BackendKind::from_name(kind_name)?;

        let empty = Map::new();
        let cfg = match obj.get("config") {
            Some(v) => as_object(v, "target.config")?,
            None => &empty,
        };

        let mut target = TargetConfig {
            kind,
            path: opt_str(cfg, "path")?.map(PathBuf::from),
            create_if_missing: opt_bool(cfg, "create_if_missing")?.unwrap_or(false),
            create_if_missing_with_size: opt_u64(cfg, "create_if_missing_with_size")?,
            override_if_exists: opt_bool(cfg, "override_if_exists")?.unwrap_or(false),
            alignment: opt_u64(cfg, "alignment")?.unwrap_or(Self::DEFAULT_ALIGNMENT),
            io_threads: opt_u64(cfg, "io_threads")?
                .map(|n| n as usize)
                .unwrap_or(Self::DEFAULT_IO_THREADS),
        };
        if kind == BackendKind::Memory {
            target.path = None;
        }
        target.validate()?;
        Ok(target)
    }

    /// Check the descriptor against the current filesystem state
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            BackendKind::Memory => Ok(()),
            BackendKind::AbtIo => {
                let path = self.require_path()?;
                if self.alignment < 8 || self.alignment % 8 != 0 {
                    return Err(StoreError::Config(format!(
                        "\"alignment\" must be a multiple of 8, got {}",
                        self.alignment
                    )));
                }
                if self.io_threads == 0 {
                    return Err(StoreError::Config("\"io_threads\" must be at least 1".to_string()));
                }
                if self.override_if_exists && !self.create_if_missing {
                    return Err(StoreError::Config(
                        "\"override_if_exists\" set but \"create_if_missing\" is not".to_string(),
                    ));
                }
                if !path.exists() && !self.create_if_missing {
                    return Err(StoreError::Config(format!(
                        "File {} does not exist and \"create_if_missing\" is not set",
                        path.display()
                    )));
                }
                Ok(())
            }
            BackendKind::Pmdk => {
                let path = self.require_path()?;
                if self.override_if_exists && self.create_if_missing_with_size.is_none() {
                    return Err(StoreError::Config(
                        "\"override_if_exists\" set but \"create_if_missing_with_size\" not specified"
                            .to_string(),
                    ));
                }
                if !path.exists() && self.create_if_missing_with_size.is_none() {
                    return Err(StoreError::Config(format!(
                        "File {} does not exist but \"create_if_missing_with_size\" was not specified",
                        path.display()
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let mut cfg = Map::new();
        if let Some(path) = &self.path {
            cfg.insert("path".into(), json!(path.to_string_lossy()));
        }
        match self.kind {
            BackendKind::Memory => {}
            BackendKind::AbtIo => {
                cfg.insert("create_if_missing".into(), json!(self.create_if_missing));
                cfg.insert("override_if_exists".into(), json!(self.override_if_exists));
                cfg.insert("alignment".into(), json!(self.alignment));
                cfg.insert("io_threads".into(), json!(self.io_threads));
            }
            BackendKind::Pmdk => {
                if let Some(size) = self.create_if_missing_with_size {
                    cfg.insert("create_if_missing_with_size".into(), json!(size));
                }
                cfg.insert("override_if_exists".into(), json!(self.override_if_exists));
            }
        }
        json!({ "type": self.kind.name(), "config": Value::Object(cfg) })
    }
}

// =============================================================================
// Transfer manager configuration
// =============================================================================

/// How the pipeline transfer manager picks a pool for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAssignment {
    /// Pool derived from the RegionID digest
    ByRegion,
    /// Every operation uses this pool
    Fixed(usize),
}

/// Geometry of the pipeline buffer pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub num_pools: usize,
    pub num_buffers_per_pool: usize,
    pub first_buffer_size: usize,
    pub buffer_size_multiplier: usize,
    pub pool_assignment: PoolAssignment,
}

impl PipelineConfig {
    pub fn new(
        num_pools: usize,
        num_buffers_per_pool: usize,
        first_buffer_size: usize,
        buffer_size_multiplier: usize,
    ) -> Self {
        Self {
            num_pools,
            num_buffers_per_pool,
            first_buffer_size,
            buffer_size_multiplier,
            pool_assignment: PoolAssignment::ByRegion,
        }
    }

    /// Capacity of buffer `k` within a pool
    pub fn buffer_size(&self, k: usize) -> Option<usize> {
        let factor = self.buffer_size_multiplier.checked_pow(u32::try_from(k).ok()?)?;
        self.first_buffer_size.checked_mul(factor)
    }

    pub fn largest_buffer_size(&self) -> Option<usize> {
        self.buffer_size(self.num_buffers_per_pool.saturating_sub(1))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("num_pools", self.num_pools),
            ("num_buffers_per_pool", self.num_buffers_per_pool),
            ("first_buffer_size", self.first_buffer_size),
            ("buffer_size_multiplier", self.buffer_size_multiplier),
        ] {
            if value == 0 {
                return Err(StoreError::Config(format!("pipeline \"{}\" must be at least 1", name)));
            }
        }
        if self.largest_buffer_size().is_none() {
            return Err(StoreError::Config(
                "pipeline buffer sizes overflow the address space".to_string(),
            ));
        }
        if let PoolAssignment::Fixed(pool) = self.pool_assignment {
            if pool >= self.num_pools {
                return Err(StoreError::Config(format!(
                    "pipeline \"pool_assignment\" {} is out of range (num_pools = {})",
                    pool, self.num_pools
                )));
            }
        }
        Ok(())
    }
}

/// Transfer manager descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferManagerConfig {
    /// One buffer per request
    #[default]
    Default,
    /// Chunked transfers staged through pools of geometric buffers
    Pipeline(PipelineConfig),
}

impl TransferManagerConfig {
    pub const DEFAULT_NAME: &'static str = "__default__";
    pub const PIPELINE_NAME: &'static str = "pipeline";

    pub fn name(&self) -> &'static str {
        match self {
            TransferManagerConfig::Default => Self::DEFAULT_NAME,
            TransferManagerConfig::Pipeline(_) => Self::PIPELINE_NAME,
        }
    }

    fn from_json(value: &Value) -> Result<Self> {
        let obj = as_object(value, "transfer_manager")?;
        let name = obj.get("type").and_then(Value::as_str).unwrap_or(Self::DEFAULT_NAME);
        let empty = Map::new();
        let cfg = match obj.get("config") {
            Some(v) => as_object(v, "transfer_manager.config")?,
            None => &empty,
        };

        match name {
            Self::DEFAULT_NAME => Ok(TransferManagerConfig::Default),
            Self::PIPELINE_NAME => {
                let multiplier = match opt_u64(cfg, "buffer_size_multiplier")? {
                    Some(m) => Some(m),
                    None => opt_u64(cfg, "buffer_size_multiple")?,
                };
                let pool_assignment = match cfg.get("pool_assignment") {
                    None => PoolAssignment::ByRegion,
                    Some(Value::String(s)) if s == "region" => PoolAssignment::ByRegion,
                    Some(v) => match v.as_u64() {
                        Some(n) => PoolAssignment::Fixed(n as usize),
                        None => {
                            return Err(StoreError::Config(format!(
                                "pipeline \"pool_assignment\" must be \"region\" or an integer, got {}",
                                v
                            )))
                        }
                    },
                };
                let pipeline = PipelineConfig {
                    num_pools: req_u64(cfg, "num_pools")? as usize,
                    num_buffers_per_pool: req_u64(cfg, "num_buffers_per_pool")? as usize,
                    first_buffer_size: req_u64(cfg, "first_buffer_size")? as usize,
                    buffer_size_multiplier: multiplier.ok_or_else(|| {
                        StoreError::Config(
                            "pipeline transfer manager requires \"buffer_size_multiplier\"".to_string(),
                        )
                    })? as usize,
                    pool_assignment,
                };
                pipeline.validate()?;
                Ok(TransferManagerConfig::Pipeline(pipeline))
            }
            other => Err(StoreError::Config(format!("Unknown transfer manager type {:?}", other))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TransferManagerConfig::Default => json!({ "type": Self::DEFAULT_NAME, "config": {} }),
            TransferManagerConfig::Pipeline(p) => {
                let assignment = match p.pool_assignment {
                    PoolAssignment::ByRegion => json!("region"),
                    PoolAssignment::Fixed(n) => json!(n),
                };
                json!({
                    "type": Self::PIPELINE_NAME,
                    "config": {
                        "num_pools": p.num_pools,
                        "num_buffers_per_pool": p.num_buffers_per_pool,
                        "first_buffer_size": p.first_buffer_size,
                        "buffer_size_multiplier": p.buffer_size_multiplier,
                        "pool_assignment": assignment,
                    }
                })
            }
        }
    }
}

// =============================================================================
// Provider configuration
// =============================================================================

/// Fully-resolved provider configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub target: TargetConfig,
    pub transfer_manager: TransferManagerConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::memory(),
            transfer_manager: TransferManagerConfig::Default,
        }
    }
}

impl ProviderConfig {
    /// Create a new config builder
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration string
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = as_object(value, "provider configuration")?;
        let target = obj
            .get("target")
            .ok_or_else(|| StoreError::Config("\"target\" is required".to_string()))?;
        let target = TargetConfig::from_json(target)?;
        let transfer_manager = match obj.get("transfer_manager") {
            Some(tm) => TransferManagerConfig::from_json(tm)?,
            None => TransferManagerConfig::Default,
        };
        Ok(Self { target, transfer_manager })
    }

    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if let TransferManagerConfig::Pipeline(p) = &self.transfer_manager {
            p.validate()?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "target": self.target.to_json(),
            "transfer_manager": self.transfer_manager.to_json(),
        })
    }
}

/// Builder for ProviderConfig
#[derive(Default)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Set the backend descriptor
    pub fn target(mut self, target: TargetConfig) -> Self {
        self.config.target = target;
        self
    }

    /// Use the single-buffer transfer manager
    pub fn default_transfer_manager(mut self) -> Self {
        self.config.transfer_manager = TransferManagerConfig::Default;
        self
    }

    /// Use the pipelined transfer manager
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.config.transfer_manager = TransferManagerConfig::Pipeline(pipeline);
        self
    }

    pub fn build(self) -> Result<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// Server configuration
// =============================================================================

/// Main configuration for a RegionStore server process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Provider Configuration
    // -------------------------------------------------------------------------
    pub provider: ProviderConfig,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            listen_addr: "127.0.0.1:7070".to_string(),
            max_connections: 256,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

// =============================================================================
// JSON helpers
// =============================================================================

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| StoreError::Config(format!("{} must be a JSON object", what)))
}

fn opt_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(StoreError::Config(format!("\"{}\" must be a string, got {}", key, other))),
    }
}

fn opt_bool(obj: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(StoreError::Config(format!("\"{}\" must be a boolean, got {}", key, other))),
    }
}

fn opt_u64(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            StoreError::Config(format!("\"{}\" must be a non-negative integer, got {}", key, v))
        }),
    }
}

fn req_u64(obj: &Map<String, Value>, key: &str) -> Result<u64> {
    opt_u64(obj, key)?.ok_or_else(|| {
        StoreError::Config(format!("pipeline transfer manager requires \"{}\"", key))
    })
}

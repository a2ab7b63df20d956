use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Path or URL of a video resource decodable by ffmpeg.
    pub stream: Option<String>,
    /// Directory of static images scored in batch mode.
    pub frames_dir: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// `threshold` has no default and must be set in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_stride")]
    pub stride: u64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_diameter")]
    pub diameter: u32,
    #[serde(default = "default_sigma")]
    pub sigma_color: f64,
    #[serde(default = "default_sigma")]
    pub sigma_space: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: OutputFormat,
    /// Destination for stream-mode records.
    #[serde(default = "default_records_path")]
    pub records: PathBuf,
    /// Destination for batch-mode records. Logged only when unset.
    pub batch_records: Option<PathBuf>,
    /// Optional JSON run summary.
    pub summary: Option<PathBuf>,
    /// Log every Nth emitted record as a sample (0 disables).
    #[serde(default)]
    pub sample_every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Scoring tasks in flight. 0 means one per available core.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            stream: None,
            frames_dir: None,
            extensions: default_extensions(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            diameter: default_diameter(),
            sigma_color: default_sigma(),
            sigma_space: default_sigma(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            records: default_records_path(),
            batch_records: None,
            summary: None,
            sample_every: 0,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.stream.is_none() && self.input.frames_dir.is_none() {
            return Err(ConfigError::Invalid(
                "at least one of input.stream or input.frames_dir must be set".into(),
            ));
        }
        if self.sampling.stride == 0 {
            return Err(ConfigError::Invalid("sampling.stride must be at least 1".into()));
        }
        if !self.sampling.threshold.is_finite() {
            return Err(ConfigError::Invalid("sampling.threshold must be finite".into()));
        }
        if self.filter.diameter == 0 {
            return Err(ConfigError::Invalid("filter.diameter must be at least 1".into()));
        }
        for (name, sigma) in [
            ("filter.sigma_color", self.filter.sigma_color),
            ("filter.sigma_space", self.filter.sigma_space),
        ] {
            // The filter weights divide by sigma squared.
            if !(sigma > 0.0 && (sigma * sigma).is_normal()) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive with a representable square, got {sigma}"
                )));
            }
        }
        Ok(())
    }

    /// Resolved worker count for the scoring pool.
    pub fn workers(&self) -> usize {
        if self.runtime.workers > 0 {
            return self.runtime.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "bmp"].map(String::from).to_vec()
}
fn default_stride() -> u64 {
    1
}
fn default_diameter() -> u32 {
    9
}
fn default_sigma() -> f64 {
    75.0
}
fn default_format() -> OutputFormat {
    OutputFormat::Csv
}
fn default_records_path() -> PathBuf {
    PathBuf::from("clarity_results.csv")
}
fn default_progress_interval() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".into()
}

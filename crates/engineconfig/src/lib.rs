use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Largest canonical grading surface we are willing to allocate per side.
pub const MAX_CANONICAL_DIMENSION: u32 = 4096;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub version: u32,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            grading: GradingConfig::default(),
            preview: PreviewConfig::default(),
            compiler: CompilerConfig::default(),
        }
    }
}

/// Policy knobs for the visual equivalence grader.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GradingConfig {
    pub canonical_width: u32,
    pub canonical_height: u32,
    /// Compare every n-th pixel along each axis.
    pub sample_stride: u32,
    /// Euclidean RGB distance (0-255 scale) above which a sample counts as different.
    pub pixel_threshold: f32,
    /// Similarity a submission must exceed to pass.
    pub acceptance: f32,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub settle: Duration,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            canonical_width: 256,
            canonical_height: 256,
            sample_stride: 4,
            pixel_threshold: 10.0,
            acceptance: 0.90,
            settle: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PreviewConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub debounce: Duration,
    pub locale: String,
    pub preserve_drawing_buffer: bool,
    pub show_fps: bool,
    pub size: (u32, u32),
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            locale: "en".to_string(),
            preserve_drawing_buffer: true,
            show_fps: false,
            size: (800, 600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerBackend {
    #[default]
    Naga,
    Shaderc,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub backend: CompilerBackend,
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer)?
        .ok_or_else(|| de::Error::custom("a duration value is required"))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: EngineConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }
        self.grading.validate()?;
        self.preview.validate()?;
        Ok(())
    }
}

impl GradingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("canonical_width", self.canonical_width),
            ("canonical_height", self.canonical_height),
        ] {
            if value == 0 || value > MAX_CANONICAL_DIMENSION {
                return Err(ConfigError::Invalid(format!(
                    "grading.{name} must be between 1 and {MAX_CANONICAL_DIMENSION}, got {value}"
                )));
            }
        }

        let smallest_side = self.canonical_width.min(self.canonical_height);
        if self.sample_stride == 0 || self.sample_stride > smallest_side {
            return Err(ConfigError::Invalid(format!(
                "grading.sample_stride must be between 1 and {smallest_side}, got {}",
                self.sample_stride
            )));
        }

        if !self.pixel_threshold.is_finite() || self.pixel_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "grading.pixel_threshold must be a non-negative number".into(),
            ));
        }

        if !self.acceptance.is_finite() {
            return Err(ConfigError::Invalid(
                "grading.acceptance must be a finite number".into(),
            ));
        }

        if self.settle > Duration::from_secs(10) {
            return Err(ConfigError::Invalid(
                "grading.settle must not exceed 10s".into(),
            ));
        }
        Ok(())
    }
}

impl PreviewConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce > Duration::from_secs(60) {
            return Err(ConfigError::Invalid(
                "preview.debounce must not exceed 60s".into(),
            ));
        }
        if self.locale.trim().is_empty() {
            return Err(ConfigError::Invalid("preview.locale may not be empty".into()));
        }
        let (width, height) = self.size;
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "preview.size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[grading]
canonical_width = 128
canonical_height = 128
sample_stride = 2
pixel_threshold = 12.5
acceptance = 0.95
settle = "50ms"

[preview]
debounce = "750ms"
locale = "es-MX"
preserve_drawing_buffer = false
show_fps = true
size = [1280, 720]

[compiler]
backend = "shaderc"
"#;

    #[test]
    fn parses_sample_config() {
        let config = EngineConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.version, 1);
        assert_eq!(config.grading.canonical_width, 128);
        assert_eq!(config.grading.sample_stride, 2);
        assert_eq!(config.grading.settle, Duration::from_millis(50));
        assert_eq!(config.preview.debounce, Duration::from_millis(750));
        assert_eq!(config.preview.locale, "es-MX");
        assert_eq!(config.preview.size, (1280, 720));
        assert!(!config.preview.preserve_drawing_buffer);
        assert_eq!(config.compiler.backend, CompilerBackend::Shaderc);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = EngineConfig::from_toml_str("version = 1\n").unwrap();
        assert_eq!(config.grading, GradingConfig::default());
        assert_eq!(config.preview, PreviewConfig::default());
        assert_eq!(config.grading.acceptance, 0.90);
        assert_eq!(config.grading.pixel_threshold, 10.0);
        assert_eq!(config.grading.sample_stride, 4);
        assert_eq!(config.preview.debounce, Duration::from_secs(1));
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let config = EngineConfig::from_toml_str(
            r#"
version = 1
[preview]
debounce = 2
[grading]
settle = 0.25
"#,
        )
        .unwrap();
        assert_eq!(config.preview.debounce, Duration::from_secs(2));
        assert_eq!(config.grading.settle, Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = EngineConfig::from_toml_str("version = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_stride_larger_than_surface() {
        let err = EngineConfig::from_toml_str(
            r#"
version = 1
[grading]
canonical_width = 16
canonical_height = 8
sample_stride = 9
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn acceptance_above_one_is_allowed() {
        let config = EngineConfig::from_toml_str(
            r#"
version = 1
[grading]
acceptance = 1.5
"#,
        )
        .unwrap();
        assert_eq!(config.grading.acceptance, 1.5);
    }

    #[test]
    fn rejects_negative_duration() {
        let err = EngineConfig::from_toml_str(
            r#"
version = 1
[preview]
debounce = -1
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = EngineConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let parsed = EngineConfig::from_toml_str(&text).expect("reparse");
        assert_eq!(parsed.grading, config.grading);
        assert_eq!(parsed.preview, config.preview);
    }
}

//! Assessment file loader.
//!
//! Pipeline:
//! 1. Size check and raw read (UTF-8 BOM stripped)
//! 2. Environment variable substitution on the raw text
//! 3. YAML parsing into [`AssessmentFile`]
//! 4. Validation (all issues collected)
//! 5. Freeze into an `Arc<Assessment>` plus resolved [`RuntimeSettings`]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::assessment::{Assessment, Item, Phase};
use crate::config::schema::{AssessmentFile, RuntimeConfig, RuntimeSettings};
use crate::config::validation::Validator;
use crate::error::{ConfigError, ValidationIssue};

/// Limits for configuration size to prevent resource exhaustion.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of phases.
    pub max_phases: usize,

    /// Maximum number of items.
    pub max_items: usize,

    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_phases: env_or("EXAMWARDEN_MAX_PHASES", 64),
            max_items: env_or("EXAMWARDEN_MAX_ITEMS", 10_000),
            max_config_size: env_or("EXAMWARDEN_MAX_CONFIG_SIZE", 10 * 1024 * 1024),
        }
    }
}

/// A loaded, validated assessment ready to run.
#[derive(Debug)]
pub struct LoadResult {
    /// Frozen phase/item layout.
    pub assessment: Arc<Assessment>,

    /// Runtime tuning with defaults and overrides applied.
    pub settings: RuntimeSettings,

    /// Non-fatal issues found while loading.
    pub warnings: Vec<ValidationIssue>,
}

/// Assessment file loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    limits: ConfigLimits,
}

impl ConfigLoader {
    /// Creates a loader with explicit limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Loads, validates and freezes an assessment file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, if YAML parsing
    /// or environment substitution fails, or if validation reports errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.limits.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.limits.max_config_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            line: None,
            message: format!("file is not readable as UTF-8 text: {e}"),
        })?;

        self.load_str(&raw, path)
    }

    /// Loads an assessment from YAML text; `path` is used for diagnostics.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let substituted = substitute_env(raw, path)?;

        let file: AssessmentFile =
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&file, &self.limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: result.errors,
            });
        }

        Ok(LoadResult {
            assessment: Arc::new(freeze(&file)?),
            settings: resolve_settings(&file.runtime)?,
            warnings: result.warnings,
        })
    }
}

/// Parses a human-readable duration such as `"90s"`, `"32m"` or `"1h 5m"`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` when the string is not a duration.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s.trim()).map_err(|e| ConfigError::InvalidValue {
        field: "duration".to_string(),
        value: s.to_string(),
        expected: format!("a duration like '90s' or '32m' ({e})"),
    })
}

fn freeze(file: &AssessmentFile) -> Result<Assessment, ConfigError> {
    let config = &file.assessment;

    let phases = config
        .phases
        .iter()
        .map(|p| {
            Ok(Phase {
                id: p.id.clone(),
                title: p.title.clone(),
                kind: p.kind,
                duration_seconds: parse_duration(&p.duration)?.as_secs(),
                item_ids: p.items.clone(),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let items = config
        .items
        .iter()
        .map(|i| Item {
            id: i.id.clone(),
            kind: i.kind,
            correct_answer: i.correct_answer.clone(),
        })
        .collect();

    Ok(Assessment::new(
        config.id.clone(),
        config.title.clone(),
        config.policy,
        config.escalate_after,
        phases,
        items,
    ))
}

/// Applies file values over defaults, then `EXAMWARDEN_*` overrides.
fn resolve_settings(runtime: &RuntimeConfig) -> Result<RuntimeSettings, ConfigError> {
    let defaults = RuntimeSettings::default();
    let retry = runtime.retry.clone().unwrap_or_default();

    let duration_or = |value: Option<&str>, env: &str, default: Duration| {
        std::env::var(env)
            .ok()
            .or_else(|| value.map(str::to_string))
            .map_or(Ok(default), |v| parse_duration(&v))
    };

    Ok(RuntimeSettings {
        tick_interval: duration_or(
            runtime.tick_interval.as_deref(),
            "EXAMWARDEN_TICK_INTERVAL",
            defaults.tick_interval,
        )?,
        heartbeat_interval: duration_or(
            runtime.heartbeat_interval.as_deref(),
            "EXAMWARDEN_HEARTBEAT_INTERVAL",
            defaults.heartbeat_interval,
        )?,
        max_answer_len: env_or(
            "EXAMWARDEN_MAX_ANSWER_LEN",
            runtime.max_answer_len.unwrap_or(defaults.max_answer_len),
        ),
        retry_max_attempts: env_or(
            "EXAMWARDEN_RETRY_MAX_ATTEMPTS",
            retry.max_attempts.unwrap_or(defaults.retry_max_attempts),
        ),
        retry_initial_backoff: duration_or(
            retry.initial_backoff.as_deref(),
            "EXAMWARDEN_RETRY_INITIAL_BACKOFF",
            defaults.retry_initial_backoff,
        )?,
        retry_max_backoff: duration_or(
            retry.max_backoff.as_deref(),
            "EXAMWARDEN_RETRY_MAX_BACKOFF",
            defaults.retry_max_backoff,
        )?,
    })
}

/// Expands `${VAR}` and `${VAR:-default}` references; `$$` is a literal `$`.
///
/// An unset variable without a default is an error.
fn substitute_env(raw: &str, source: &Path) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let end = body.find('}').ok_or_else(|| ConfigError::ParseError {
                path: PathBuf::from(source),
                line: Some(raw[..raw.len() - rest.len() + pos].lines().count().max(1)),
                message: "unclosed environment variable reference".to_string(),
            })?;
            let reference = &body[..end];
            let (name, default) = reference
                .split_once(":-")
                .map_or((reference, None), |(n, d)| (n, Some(d)));

            match (std::env::var(name), default) {
                (Ok(value), _) => out.push_str(&value),
                (Err(_), Some(default)) => out.push_str(default),
                (Err(_), None) => {
                    return Err(ConfigError::EnvVarNotSet {
                        var: name.to_string(),
                        location: source.display().to_string(),
                    });
                }
            }
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r"
assessment:
  id: practice-1
  title: Practice Test 1
  policy: log
  escalate_after: 3
  phases:
    - id: rw1
      duration: 32m
      items: [q1, q2]
    - id: rest
      kind: break
      duration: 10m
    - id: math
      duration: 35m
      items: [q3]
  items:
    - id: q1
      correct_answer: B
    - id: q2
      correct_answer: D
    - id: q3
      kind: free_response
      correct_answer: 3.5|7/2
runtime:
  tick_interval: 1s
  max_answer_len: 64
";

    #[test]
    fn loads_and_freezes() {
        let result = ConfigLoader::default()
            .load_str(VALID, Path::new("test.yaml"))
            .unwrap();
        let a = &result.assessment;
        assert_eq!(a.id(), "practice-1");
        assert_eq!(a.title(), Some("Practice Test 1"));
        assert_eq!(a.escalate_after(), Some(3));
        assert_eq!(a.phases().len(), 3);
        assert_eq!(a.phases()[0].duration_seconds, 32 * 60);
        assert_eq!(a.phase_of_item("q3"), Some(2));
        assert_eq!(result.settings.max_answer_len, 64);
        assert_eq!(result.settings.tick_interval, Duration::from_secs(1));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn loads_from_disk_with_bom() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "\u{feff}{VALID}").unwrap();
        let result = ConfigLoader::default().load(file.path()).unwrap();
        assert_eq!(result.assessment.items().len(), 3);
    }

    #[test]
    fn missing_file() {
        let err = ConfigLoader::default()
            .load(Path::new("/definitely/not/here.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn oversized_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{VALID}").unwrap();
        let loader = ConfigLoader::new(ConfigLimits {
            max_config_size: 16,
            ..ConfigLimits::default()
        });
        let err = loader.load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn parse_error_names_file() {
        let err = ConfigLoader::default()
            .load_str("assessment:\n  id: [unclosed\n", Path::new("bad.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn validation_errors_surface() {
        let yaml = "assessment:\n  id: a\n  phases: []\n";
        let err = ConfigLoader::default()
            .load_str(yaml, Path::new("empty.yaml"))
            .unwrap_err();
        let ConfigError::ValidationError { errors, .. } = err else {
            panic!("expected validation error");
        };
        assert!(!errors.is_empty());
    }

    #[test]
    fn env_default_and_escape() {
        let out = substitute_env(
            "id: ${EXAMWARDEN_TEST_SURELY_UNSET:-fallback} cost: $$5",
            Path::new("t.yaml"),
        )
        .unwrap();
        assert_eq!(out, "id: fallback cost: $5");
    }

    #[test]
    fn env_unset_without_default_fails() {
        let err = substitute_env("${EXAMWARDEN_TEST_SURELY_UNSET}", Path::new("t.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotSet { .. }));
    }

    #[test]
    fn env_unclosed_reference_fails() {
        let err = substitute_env("id: ${OOPS", Path::new("t.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn humantime_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h 5m").unwrap(), Duration::from_secs(3900));
        assert!(parse_duration("soon").is_err());
    }
}

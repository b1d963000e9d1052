//! `examwarden validate`: check assessment files without running them.

use std::path::Path;

use serde_json::{Value, json};

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, LoadResult};
use crate::error::{ConfigError, ExamwardenError, ValidationIssue};

/// Validates every file and reports all of them before failing.
///
/// # Errors
///
/// Returns the first file's error if any file is invalid, or a validation
/// error naming the first file with warnings under `--strict`.
pub fn run(args: &ValidateArgs) -> Result<(), ExamwardenError> {
    let loader = ConfigLoader::default();
    let mut reports = Vec::with_capacity(args.files.len());
    let mut first_error: Option<ConfigError> = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating assessment");
        let outcome = loader.load(path);
        reports.push(report(path, &outcome));

        let failure = match outcome {
            Ok(loaded) if args.strict && !loaded.warnings.is_empty() => {
                Some(ConfigError::ValidationError {
                    path: path.display().to_string(),
                    errors: loaded.warnings,
                })
            }
            Ok(_) => None,
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            first_error.get_or_insert(e);
        }
    }

    match args.format {
        OutputFormat::Human => {
            for r in &reports {
                print_human(r);
            }
        }
        OutputFormat::Json => {
            println!("{}", Value::Array(reports));
        }
    }

    first_error.map_or(Ok(()), |e| Err(e.into()))
}

fn report(path: &Path, outcome: &Result<LoadResult, ConfigError>) -> Value {
    let issues = |list: &[ValidationIssue]| -> Vec<Value> {
        list.iter()
            .map(|i| json!({ "path": i.path, "message": i.message }))
            .collect()
    };
    match outcome {
        Ok(loaded) => json!({
            "file": path.display().to_string(),
            "valid": true,
            "assessment": loaded.assessment.id(),
            "phases": loaded.assessment.phases().len(),
            "items": loaded.assessment.items().len(),
            "errors": [],
            "warnings": issues(&loaded.warnings),
        }),
        Err(ConfigError::ValidationError { errors, .. }) => json!({
            "file": path.display().to_string(),
            "valid": false,
            "errors": issues(errors),
            "warnings": [],
        }),
        Err(e) => json!({
            "file": path.display().to_string(),
            "valid": false,
            "errors": [{ "path": "", "message": e.to_string() }],
            "warnings": [],
        }),
    }
}

fn print_human(report: &Value) {
    let file = report["file"].as_str().unwrap_or("<unknown>");
    if report["valid"].as_bool().unwrap_or(false) {
        println!(
            "ok    {file}: {} phase(s), {} item(s)",
            report["phases"], report["items"]
        );
    } else {
        println!("FAIL  {file}");
    }
    for (label, key) in [("error", "errors"), ("warning", "warnings")] {
        for issue in report[key].as_array().into_iter().flatten() {
            let at = issue["path"].as_str().unwrap_or_default();
            let message = issue["message"].as_str().unwrap_or_default();
            if at.is_empty() {
                println!("      {label}: {message}");
            } else {
                println!("      {label}: {at}: {message}");
            }
        }
    }
}

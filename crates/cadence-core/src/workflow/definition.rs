//! Workflow descriptor parsing and structural validation.
//!
//! Converts YAML into the `WorkflowDefinition` IR and checks the constraints
//! the scheduler relies on (well-formed routine names, a positive
//! concurrency cap). Dependency checks happen when the dependency graph is
//! built.

use std::path::Path;

use cadence_types::definition::WorkflowDefinition;
use thiserror::Error;

use super::strategy::StrategyError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised before any routine runs.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A routine depends on a routine that is not declared.
    #[error("{0}")]
    UnknownDependency(String),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    CycleDetected(String),

    /// A literal strategy could not be expanded.
    #[error("Routine \"{routine}\": {source}")]
    Strategy {
        routine: String,
        #[source]
        source: StrategyError,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load and validate a workflow descriptor file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Routine names are non-empty and contain no `[` or `]` (reserved for
///   strategy member names)
/// - `maxConcurrentRoutines` >= 1 if set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    for name in def.routines.keys() {
        if name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "routine name must not be empty".to_string(),
            ));
        }
        if name.contains(['[', ']']) {
            return Err(WorkflowError::ValidationError(format!(
                "routine name '{name}' must not contain '[' or ']'"
            )));
        }
    }

    if def.max_concurrent_routines == Some(0) {
        return Err(WorkflowError::ValidationError(
            "maxConcurrentRoutines must be >= 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::definition::{Condition, MatrixSource, OnFailure};
    use std::io::Write;

    const SAMPLE: &str = r#"
variables:
  greeting: hello
environment:
  CI: true
targets:
  box:
    engine: local
    engineOptions:
      image: alpine
routines:
  build:
    steps:
      - name: compile
        run: echo ${{ variables.greeting }}
  test:
    dependsOn: build
    onFailure: continue
    strategy:
      matrix:
        os: [linux, macos]
    steps:
      - run: echo ${{ strategy.os }}
        if: ${{ strategy.os == 'linux' }}
  deploy:
    dependsOn: [build, test]
    unless: true
    steps:
      - use: sleep
        with:
          seconds: 1
"#;

    #[test]
    fn parses_full_descriptor() {
        let def = parse_workflow_yaml(SAMPLE).unwrap();
        assert_eq!(
            def.routines.keys().collect::<Vec<_>>(),
            vec!["build", "test", "deploy"]
        );
        assert_eq!(def.environment["CI"], "true");
        assert_eq!(def.targets["box"].engine, "local");

        let test = &def.routines["test"];
        assert_eq!(test.depends_on, vec!["build"]);
        assert_eq!(test.on_failure, Some(OnFailure::Continue));
        assert!(matches!(
            test.strategy.as_ref().unwrap().matrix,
            Some(MatrixSource::Static(_))
        ));
        assert!(matches!(test.steps[0].if_, Some(Condition::Expression(_))));

        let deploy = &def.routines["deploy"];
        assert_eq!(deploy.depends_on, vec!["build", "test"]);
        assert_eq!(deploy.unless, Some(Condition::Literal(true)));
        assert_eq!(deploy.steps[0].use_.as_deref(), Some("sleep"));
    }

    #[test]
    fn rejects_bracketed_routine_names() {
        let err = parse_workflow_yaml("routines:\n  \"a [0]\":\n    steps: []\n").unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = parse_workflow_yaml("maxConcurrentRoutines: 0\nroutines: {}\n").unwrap_err();
        assert!(err.to_string().contains("maxConcurrentRoutines"));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = parse_workflow_yaml("routines: [unclosed").unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let def = load_workflow_file(file.path()).unwrap();
        assert_eq!(def.routines.len(), 3);

        let missing = load_workflow_file(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(missing, WorkflowError::IoError(_)));
    }
}

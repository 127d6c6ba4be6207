use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("invalid analysis context: {0}")]
    InvalidContext(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("path construction failed: {0}")]
    PathConstruction(String),

    #[error("annotation column missing: {0}")]
    MissingAnnotation(String),

    #[error("artifact schema violation for {artifact}: {message}")]
    Schema { artifact: String, message: String },

    #[error("stage {stage} requires missing artifact: {artifact}")]
    UnmetDependency {
        stage: String,
        artifact: Utf8PathBuf,
    },

    #[error("external tool failed during {operation} (command: {command}): {stderr}")]
    ExternalTool {
        operation: String,
        command: String,
        stderr: String,
    },

    #[error("{operation} exited 0 but produced no output at {path}")]
    MissingOutput {
        operation: String,
        path: Utf8PathBuf,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

use std::process::Command;

use camino::Utf8PathBuf;
use tracing::info;

use crate::config::RunConfiguration;
use crate::domain::PruningMode;
use crate::error::PipelineError;
use crate::paths::AnalysisPaths;

pub const TOOL_PROGRAM: &str = "pyscenic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolOperation {
    GrnInference,
    ContextInference,
    Scoring,
}

impl ToolOperation {
    pub fn subcommand(&self) -> &'static str {
        match self {
            ToolOperation::GrnInference => "grn",
            ToolOperation::ContextInference => "ctx",
            ToolOperation::Scoring => "aucell",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolOperation::GrnInference => "GRN inference",
            ToolOperation::ContextInference => "context inference",
            ToolOperation::Scoring => "AUCell scoring",
        }
    }
}

/// Scalar options threaded into every invocation.
#[derive(Debug, Clone, Copy)]
pub struct ToolOptions {
    pub num_workers: u32,
    pub pruning: PruningMode,
    pub mask_dropouts: bool,
}

impl ToolOptions {
    pub fn from_config(config: &RunConfiguration, pruning: PruningMode) -> Self {
        Self {
            num_workers: config.num_workers,
            pruning,
            mask_dropouts: true,
        }
    }
}

/// A fully built external command. Construction is pure so the argument
/// list can be asserted on without spawning anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub output_path: Utf8PathBuf,
}

impl ToolCommand {
    pub fn build(
        operation: ToolOperation,
        paths: &AnalysisPaths,
        options: &ToolOptions,
    ) -> Self {
        let mut args = vec![operation.subcommand().to_string()];
        let output_path = match operation {
            ToolOperation::GrnInference => {
                args.push(paths.filtered_export.to_string());
                args.push(paths.tf_list.to_string());
                args.push("-o".to_string());
                args.push(paths.adjacencies.to_string());
                paths.adjacencies.clone()
            }
            ToolOperation::ContextInference => {
                args.push(paths.adjacencies.to_string());
                for db in &paths.ranking_dbs {
                    args.push(db.to_string());
                }
                args.push("--annotations_fname".to_string());
                args.push(paths.motif_annotations.to_string());
                args.push("--expression_mtx_fname".to_string());
                args.push(paths.filtered_export.to_string());
                args.push("--output".to_string());
                args.push(paths.regulons.to_string());
                if options.mask_dropouts {
                    args.push("--mask_dropouts".to_string());
                }
                // ForceOn and UseDefault both leave the tool pruned.
                if options.pruning == PruningMode::ForceOff {
                    args.push("--no_pruning".to_string());
                }
                paths.regulons.clone()
            }
            ToolOperation::Scoring => {
                args.push(paths.filtered_export.to_string());
                args.push(paths.regulons.to_string());
                args.push("--output".to_string());
                args.push(paths.activity_matrix.to_string());
                paths.activity_matrix.clone()
            }
        };
        args.push("--num_workers".to_string());
        args.push(options.num_workers.to_string());

        Self {
            program: TOOL_PROGRAM.to_string(),
            args,
            output_path,
        }
    }

    pub fn rendered(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub operation: ToolOperation,
    pub output_path: Utf8PathBuf,
}

pub trait ToolInvoker {
    fn invoke(
        &self,
        operation: ToolOperation,
        paths: &AnalysisPaths,
        options: &ToolOptions,
    ) -> Result<Invocation, PipelineError>;
}

/// Runs the real executable. Blocks until the process exits; a non-zero
/// exit surfaces the full command and captured stderr, and exit 0 with no
/// output file is reported separately as a contract mismatch.
#[derive(Debug, Clone, Default)]
pub struct SystemToolInvoker;

impl ToolInvoker for SystemToolInvoker {
    fn invoke(
        &self,
        operation: ToolOperation,
        paths: &AnalysisPaths,
        options: &ToolOptions,
    ) -> Result<Invocation, PipelineError> {
        let command = ToolCommand::build(operation, paths, options);
        info!(operation = operation.name(), command = %command.rendered(), "invoking external tool");

        let output = Command::new(&command.program)
            .args(&command.args)
            .output()
            .map_err(|err| PipelineError::ExternalTool {
                operation: operation.name().to_string(),
                command: command.rendered(),
                stderr: err.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PipelineError::ExternalTool {
                operation: operation.name().to_string(),
                command: command.rendered(),
                stderr: if stderr.is_empty() {
                    format!("exit status {}", output.status)
                } else {
                    stderr
                },
            });
        }

        if !command.output_path.as_std_path().exists() {
            return Err(PipelineError::MissingOutput {
                operation: operation.name().to_string(),
                path: command.output_path,
            });
        }

        Ok(Invocation {
            operation,
            output_path: command.output_path,
        })
    }
}

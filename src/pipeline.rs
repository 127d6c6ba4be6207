use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::Utf8PathBuf;
use flate2::read::GzDecoder;
use tracing::{error, info};

use crate::artifact::ArtifactStore;
use crate::cluster::ClusterBackend;
use crate::config::RunConfiguration;
use crate::domain::AnalysisContext;
use crate::error::PipelineError;
use crate::invoker::{ToolInvoker, ToolOperation, ToolOptions};
use crate::matrix::{self, ExpressionMatrix};
use crate::paths::AnalysisPaths;
use crate::report::Reporter;
use crate::subset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageId {
    Preprocess,
    Annotate,
    Cluster,
    Export,
    GrnInference,
    ContextInference,
    Scoring,
    Report,
}

impl StageId {
    pub const FULL_ORDER: [StageId; 8] = [
        StageId::Preprocess,
        StageId::Annotate,
        StageId::Cluster,
        StageId::Export,
        StageId::GrnInference,
        StageId::ContextInference,
        StageId::Scoring,
        StageId::Report,
    ];

    /// Re-entry order for repeated GRN runs over an already clustered
    /// matrix, e.g. one run per cell-type subset.
    pub const FROM_EXPORT: [StageId; 5] = [
        StageId::Export,
        StageId::GrnInference,
        StageId::ContextInference,
        StageId::Scoring,
        StageId::Report,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageId::Preprocess => "preprocess",
            StageId::Annotate => "annotate",
            StageId::Cluster => "cluster",
            StageId::Export => "export",
            StageId::GrnInference => "grn-inference",
            StageId::ContextInference => "context-inference",
            StageId::Scoring => "scoring",
            StageId::Report => "report",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One run's stage ledger. Held in memory only; durability of progress
/// lives in the artifacts each stage leaves on disk.
#[derive(Debug)]
pub struct PipelineRun {
    statuses: BTreeMap<StageId, StageStatus>,
    order: Vec<StageId>,
    failure: Option<(StageId, PipelineError)>,
}

impl PipelineRun {
    fn new(order: &[StageId]) -> Self {
        Self {
            statuses: order
                .iter()
                .map(|stage| (*stage, StageStatus::Pending))
                .collect(),
            order: order.to_vec(),
            failure: None,
        }
    }

    fn set(&mut self, stage: StageId, status: StageStatus) {
        self.statuses.insert(stage, status);
    }

    fn fail(&mut self, stage: StageId, err: PipelineError) {
        error!(stage = %stage, error = %err, "stage failed; aborting run");
        self.set(stage, StageStatus::Failed);
        self.failure = Some((stage, err));
    }

    pub fn status(&self, stage: StageId) -> StageStatus {
        self.statuses
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    pub fn failed_stage(&self) -> Option<StageId> {
        self.failure.as_ref().map(|(stage, _)| *stage)
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<(), PipelineError> {
        match self.failure {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }
}

/// Declared filesystem contract of one stage.
struct StageSpec {
    inputs: Vec<Utf8PathBuf>,
    outputs: Vec<Utf8PathBuf>,
}

/// Sequences the stage chain against one resolved context: verifies each
/// stage's declared inputs before entry, runs it, verifies its declared
/// outputs, and aborts the whole run on the first failure.
pub struct Orchestrator<'a, I: ToolInvoker, C: ClusterBackend> {
    context: &'a AnalysisContext,
    config: &'a RunConfiguration,
    paths: &'a AnalysisPaths,
    invoker: &'a I,
    cluster_backend: &'a C,
    matrix: Option<ExpressionMatrix>,
}

impl<'a, I: ToolInvoker, C: ClusterBackend> Orchestrator<'a, I, C> {
    pub fn new(
        context: &'a AnalysisContext,
        config: &'a RunConfiguration,
        paths: &'a AnalysisPaths,
        invoker: &'a I,
        cluster_backend: &'a C,
    ) -> Self {
        Self {
            context,
            config,
            paths,
            invoker,
            cluster_backend,
            matrix: None,
        }
    }

    /// Full eight-stage run from the raw matrix.
    pub fn run_full(&mut self) -> PipelineRun {
        self.run_stages(&StageId::FULL_ORDER)
    }

    /// Re-enters at export, reusing the persisted clustered matrix. The
    /// matrix filename carries the cell-type prefix, so a prior full run
    /// with the same `--cell_type` must exist or the export stage fails
    /// with an unmet dependency.
    pub fn run_from_export(&mut self) -> PipelineRun {
        self.run_stages(&StageId::FROM_EXPORT)
    }

    /// Runs an explicit stage sequence. Dependency gating still applies:
    /// a stage whose declared inputs are absent fails without running.
    pub fn run_stages(&mut self, order: &[StageId]) -> PipelineRun {
        let mut run = PipelineRun::new(order);
        info!(
            dataset = %self.context.dataset_id,
            sample = %self.context.sample_id,
            cell_type = self.context.cell_type.map(|tag| tag.as_str()).unwrap_or("whole sample"),
            stages = order.len(),
            "pipeline run starting"
        );

        for stage in order {
            let spec = self.stage_spec(*stage);
            if let Some(missing) = spec
                .inputs
                .iter()
                .find(|input| !input.as_std_path().exists())
            {
                run.fail(
                    *stage,
                    PipelineError::UnmetDependency {
                        stage: stage.name().to_string(),
                        artifact: missing.clone(),
                    },
                );
                return run;
            }

            run.set(*stage, StageStatus::Running);
            info!(stage = %stage, "stage running");
            if let Err(err) = self.run_stage(*stage) {
                run.fail(*stage, err);
                return run;
            }

            if let Some(missing) = spec
                .outputs
                .iter()
                .find(|output| !output.as_std_path().exists())
            {
                run.fail(
                    *stage,
                    PipelineError::MissingOutput {
                        operation: stage.name().to_string(),
                        path: missing.clone(),
                    },
                );
                return run;
            }
            run.set(*stage, StageStatus::Succeeded);
            info!(stage = %stage, "stage succeeded");
        }

        info!("pipeline run completed");
        run
    }

    fn stage_spec(&self, stage: StageId) -> StageSpec {
        let paths = self.paths;
        match stage {
            StageId::Preprocess => StageSpec {
                inputs: vec![paths.raw_matrix.clone()],
                outputs: vec![],
            },
            StageId::Annotate => StageSpec {
                inputs: vec![paths.metadata.clone()],
                outputs: vec![],
            },
            StageId::Cluster => StageSpec {
                inputs: vec![],
                outputs: vec![paths.anndata.clone()],
            },
            StageId::Export => StageSpec {
                inputs: vec![paths.anndata.clone()],
                outputs: vec![paths.filtered_export.clone()],
            },
            StageId::GrnInference => StageSpec {
                inputs: vec![paths.filtered_export.clone(), paths.tf_list.clone()],
                outputs: vec![paths.adjacencies.clone()],
            },
            StageId::ContextInference => {
                let mut inputs = vec![
                    paths.adjacencies.clone(),
                    paths.motif_annotations.clone(),
                    paths.filtered_export.clone(),
                ];
                inputs.extend(paths.ranking_dbs.iter().cloned());
                StageSpec {
                    inputs,
                    outputs: vec![paths.regulons.clone()],
                }
            }
            StageId::Scoring => StageSpec {
                inputs: vec![paths.filtered_export.clone(), paths.regulons.clone()],
                outputs: vec![paths.activity_matrix.clone()],
            },
            StageId::Report => StageSpec {
                inputs: vec![
                    paths.filtered_export.clone(),
                    paths.activity_matrix.clone(),
                ],
                outputs: vec![],
            },
        }
    }

    fn run_stage(&mut self, stage: StageId) -> Result<(), PipelineError> {
        match stage {
            StageId::Preprocess => self.preprocess(),
            StageId::Annotate => self.annotate(),
            StageId::Cluster => self.cluster(),
            StageId::Export => self.export(),
            StageId::GrnInference => self.invoke_tool(ToolOperation::GrnInference),
            StageId::ContextInference => {
                if self.paths.ranking_dbs.is_empty() {
                    return Err(PipelineError::UnmetDependency {
                        stage: stage.name().to_string(),
                        artifact: self
                            .paths
                            .databases
                            .join(format!("*.{}", self.config.ranking_db_extension)),
                    });
                }
                self.invoke_tool(ToolOperation::ContextInference)
            }
            StageId::Scoring => self.invoke_tool(ToolOperation::Scoring),
            StageId::Report => self.report(),
        }
    }

    fn preprocess(&mut self) -> Result<(), PipelineError> {
        let mut matrix = matrix::read_10x_dir(&self.paths.raw_matrix)?;
        matrix.qc_filter(
            self.config.min_genes,
            self.config.min_cells,
            self.config.max_percent_mito,
        );
        matrix.normalize_log1p(self.config.target_sum);
        self.matrix = Some(matrix);
        Ok(())
    }

    fn annotate(&mut self) -> Result<(), PipelineError> {
        let metadata_path = self.paths.metadata.clone();
        let Some(matrix) = self.matrix.as_mut() else {
            return Err(PipelineError::UnmetDependency {
                stage: StageId::Annotate.name().to_string(),
                artifact: metadata_path,
            });
        };
        let file = fs::File::open(metadata_path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("open {metadata_path}: {err}")))?;
        matrix.annotate_from_metadata(GzDecoder::new(file))?;

        // Cells absent from the harmonized metadata carry no label and are
        // dropped here, so every exported cell has one.
        let keep: Vec<bool> = matrix
            .obs
            .iter()
            .map(|record| record.cell_type.is_some())
            .collect();
        if !keep.iter().any(|keep| *keep) {
            return Err(PipelineError::MissingAnnotation(
                "no cell matched the harmonized metadata".to_string(),
            ));
        }
        let mut index = 0;
        matrix.obs.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        let mut index = 0;
        matrix.values.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        Ok(())
    }

    fn cluster(&mut self) -> Result<(), PipelineError> {
        let anndata_path = self.paths.anndata.clone();
        let resolution = self.config.resolution;
        let backend = self.cluster_backend;
        let Some(matrix) = self.matrix.as_mut() else {
            return Err(PipelineError::UnmetDependency {
                stage: StageId::Cluster.name().to_string(),
                artifact: anndata_path,
            });
        };
        let labels = backend.cluster(matrix, resolution)?;
        for (record, label) in matrix.obs.iter_mut().zip(labels) {
            record.cluster = Some(label);
        }
        ArtifactStore::write_expression(&anndata_path, matrix)
    }

    fn export(&mut self) -> Result<(), PipelineError> {
        // Always re-read the persisted matrix so the export entry point
        // behaves the same whether or not upstream stages ran in-process.
        let clustered = ArtifactStore::read_expression(&self.paths.anndata)?;
        let selected = subset::select(&clustered, self.context.cell_type)?;
        ArtifactStore::write_expression(&self.paths.filtered_export, &selected)?;
        self.matrix = Some(selected);
        Ok(())
    }

    fn invoke_tool(&self, operation: ToolOperation) -> Result<(), PipelineError> {
        let options = ToolOptions::from_config(self.config, self.context.pruning);
        self.invoker.invoke(operation, self.paths, &options)?;
        Ok(())
    }

    fn report(&self) -> Result<(), PipelineError> {
        let exported = ArtifactStore::read_expression(&self.paths.filtered_export)?;
        let activity = ArtifactStore::read_activity(&self.paths.activity_matrix)?;
        let reporter = Reporter::new(&self.paths.figures);
        let prefix = self.context.file_prefix();

        reporter.gene_distribution(&exported, &prefix)?;
        if self.context.cell_type.is_some() {
            reporter.top_regulons(&activity, self.config.top_regulons, &prefix)?;
        } else {
            let cell_types: BTreeMap<String, String> = exported
                .obs
                .iter()
                .filter_map(|record| {
                    record
                        .cell_type
                        .clone()
                        .map(|label| (record.cell_id.clone(), label))
                })
                .collect();
            reporter.activity_by_cell_type(&activity, &cell_types)?;
        }
        Ok(())
    }
}

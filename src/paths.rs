use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::config::RunConfiguration;
use crate::domain::AnalysisContext;
use crate::error::PipelineError;

/// Closed set of locations for one analysis run. Derived solely from the
/// context, so equal contexts always resolve to identical paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPaths {
    pub base: Utf8PathBuf,
    pub databases: Utf8PathBuf,
    pub raw_data: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub figures: Utf8PathBuf,

    pub tf_list: Utf8PathBuf,
    pub ranking_dbs: Vec<Utf8PathBuf>,
    pub motif_annotations: Utf8PathBuf,
    pub raw_matrix: Utf8PathBuf,
    pub metadata: Utf8PathBuf,

    pub anndata: Utf8PathBuf,
    pub filtered_export: Utf8PathBuf,
    pub adjacencies: Utf8PathBuf,
    pub regulons: Utf8PathBuf,
    pub activity_matrix: Utf8PathBuf,
}

impl AnalysisPaths {
    /// Resolves every artifact location for `context` and creates the
    /// directory-valued entries. Create-if-missing, never deletes.
    pub fn resolve(
        context: &AnalysisContext,
        config: &RunConfiguration,
    ) -> Result<Self, PipelineError> {
        let base = context.base_folder.clone();
        let databases = base.join("databases");
        let raw_data = base.join(context.dataset_id.as_str()).join("raw_data");
        let sample_root = base
            .join(context.dataset_id.as_str())
            .join(context.sample_id.as_str());
        let output = match context.pruning.path_segment() {
            Some(segment) => sample_root.join(segment),
            None => sample_root.clone(),
        };
        let figures = sample_root.join("figures");

        for dir in [&base, &databases, &raw_data, &output, &figures] {
            check_under_base(&base, dir)?;
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| PipelineError::Filesystem(format!("create {dir}: {err}")))?;
        }

        let prefix = context.file_prefix();
        let paths = Self {
            tf_list: databases.join(&config.tf_list_filename),
            ranking_dbs: glob_ranking_dbs(&databases, &config.ranking_db_extension)?,
            motif_annotations: databases.join(&config.motif_annotations_filename),
            raw_matrix: raw_data.join("raw_feature_bc_matrix"),
            metadata: raw_data.join("metadata.tsv.gz"),
            anndata: output.join(format!("{prefix}anndata.tsv")),
            filtered_export: output.join(format!("{prefix}filtered_export.tsv")),
            adjacencies: output.join(format!("{prefix}adjacencies.csv")),
            regulons: output.join(format!("{prefix}reg.csv")),
            activity_matrix: output.join(format!("{prefix}auc.csv")),
            base,
            databases,
            raw_data,
            output,
            figures,
        };
        debug!(output = %paths.output, "resolved analysis paths");
        Ok(paths)
    }
}

fn check_under_base(base: &Utf8Path, candidate: &Utf8Path) -> Result<(), PipelineError> {
    // Ids are already validated as plain segments; this guards the composed
    // result against traversal all the same.
    if candidate
        .components()
        .any(|component| component.as_str() == "..")
        || !candidate.starts_with(base)
    {
        return Err(PipelineError::PathConstruction(format!(
            "{candidate} escapes base folder {base}"
        )));
    }
    Ok(())
}

/// Collects ranking databases by extension, sorted so path resolution is
/// deterministic across runs.
fn glob_ranking_dbs(
    databases: &Utf8Path,
    extension: &str,
) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    let mut found = Vec::new();
    let entries = fs::read_dir(databases.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {databases}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|path| PipelineError::Filesystem(format!("non-utf8 path {path:?}")))?;
        if path.is_file()
            && path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

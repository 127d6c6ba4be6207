use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Explicit run-wide settings. Every component takes this by reference at
/// construction instead of reading process-global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfiguration {
    pub num_workers: u32,
    pub seed: u64,
    pub resolution: f64,
    pub min_genes: usize,
    pub min_cells: usize,
    pub max_percent_mito: f64,
    pub target_sum: f64,
    pub top_regulons: usize,
    pub tf_list_filename: String,
    pub motif_annotations_filename: String,
    pub ranking_db_extension: String,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            num_workers: 20,
            seed: 42,
            resolution: 0.4,
            min_genes: 200,
            min_cells: 3,
            max_percent_mito: 0.15,
            target_sum: 1.0e4,
            top_regulons: 30,
            tf_list_filename: "allTFs_hg38.txt".to_string(),
            motif_annotations_filename: "motifs-v10nr_clust-nr.hgnc-m0.001-o0.0.tbl".to_string(),
            ranking_db_extension: "feather".to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads a JSON config when a path is given, otherwise defaults.
    pub fn resolve(path: Option<&str>) -> Result<RunConfiguration, PipelineError> {
        let Some(path) = path else {
            return Ok(RunConfiguration::default());
        };
        let config_path = Utf8PathBuf::from(path);
        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| PipelineError::ConfigRead(config_path.clone()))?;
        let config: RunConfiguration = serde_json::from_str(&content)
            .map_err(|err| PipelineError::ConfigParse(err.to_string()))?;
        if config.num_workers == 0 {
            return Err(PipelineError::ConfigParse(
                "num_workers must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_path() {
        let config = ConfigLoader::resolve(None).unwrap();
        assert_eq!(config.num_workers, 20);
        assert_eq!(config.seed, 42);
        assert_eq!(config.ranking_db_extension, "feather");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RunConfiguration = serde_json::from_str(r#"{"num_workers": 4}"#).unwrap();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.min_genes, 200);
    }
}

use tracing::info;

use crate::error::PipelineError;
use crate::matrix::ExpressionMatrix;

/// Seam for the clustering collaborator. The pipeline only needs a label
/// per cell; the algorithm behind it is interchangeable.
pub trait ClusterBackend {
    fn cluster(
        &self,
        matrix: &ExpressionMatrix,
        resolution: f64,
    ) -> Result<Vec<String>, PipelineError>;
}

/// Deterministic stand-in for graph-based clustering: bins cells by
/// total-count quantile. Resolution scales the bin count the same way it
/// scales community granularity in the real methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantileClusterBackend;

impl ClusterBackend for QuantileClusterBackend {
    fn cluster(
        &self,
        matrix: &ExpressionMatrix,
        resolution: f64,
    ) -> Result<Vec<String>, PipelineError> {
        if matrix.n_cells() == 0 {
            return Ok(Vec::new());
        }
        let bins = ((resolution * 10.0).round() as usize).max(1);

        let mut order: Vec<usize> = (0..matrix.n_cells()).collect();
        order.sort_by(|a, b| {
            matrix.obs[*a]
                .n_counts
                .total_cmp(&matrix.obs[*b].n_counts)
                .then_with(|| matrix.obs[*a].cell_id.cmp(&matrix.obs[*b].cell_id))
        });

        let mut labels = vec![String::new(); matrix.n_cells()];
        for (rank, cell_index) in order.iter().enumerate() {
            let bin = rank * bins / matrix.n_cells();
            labels[*cell_index] = bin.to_string();
        }
        info!(cells = matrix.n_cells(), clusters = bins, "clustering complete");
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CellRecord;

    fn counts_matrix(counts: &[f64]) -> ExpressionMatrix {
        let obs = counts
            .iter()
            .enumerate()
            .map(|(index, total)| CellRecord {
                cell_id: format!("cell{index}"),
                n_genes: 1,
                n_counts: *total,
                percent_mito: 0.0,
                cluster: None,
                cell_type: None,
            })
            .collect::<Vec<_>>();
        let values = counts.iter().map(|total| vec![*total]).collect();
        ExpressionMatrix {
            genes: vec!["G1".to_string()],
            obs,
            values,
        }
    }

    #[test]
    fn deterministic_labels() {
        let matrix = counts_matrix(&[10.0, 200.0, 5.0, 120.0]);
        let backend = QuantileClusterBackend;
        let first = backend.cluster(&matrix, 0.4).unwrap();
        let second = backend.cluster(&matrix, 0.4).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn lower_resolution_fewer_clusters() {
        let matrix = counts_matrix(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let backend = QuantileClusterBackend;
        let coarse = backend.cluster(&matrix, 0.1).unwrap();
        let distinct: std::collections::HashSet<_> = coarse.iter().collect();
        assert_eq!(distinct.len(), 1);
    }
}

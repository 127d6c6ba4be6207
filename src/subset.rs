use tracing::info;

use crate::domain::CellTypeTag;
use crate::error::PipelineError;
use crate::matrix::{ExpressionMatrix, HARMONIZED_LABEL_COLUMN};

const TUMOR_LABEL: &str = "Tumor";

/// Narrows a matrix to the requested cell-type subset.
///
/// `Tumor` keeps cells whose harmonized label is literally `Tumor`;
/// `Non-Tumor` keeps everything else, including any unknown or ambiguous
/// labels. The two subsets therefore always partition the input. With no
/// tag the input passes through untouched.
pub fn select(
    matrix: &ExpressionMatrix,
    cell_type: Option<CellTypeTag>,
) -> Result<ExpressionMatrix, PipelineError> {
    let Some(tag) = cell_type else {
        return Ok(matrix.clone());
    };

    if matrix.obs.iter().any(|record| record.cell_type.is_none()) {
        return Err(PipelineError::MissingAnnotation(format!(
            "{HARMONIZED_LABEL_COLUMN} is not set for every cell; \
             run the annotate stage before subsetting"
        )));
    }

    let keep: Vec<bool> = matrix
        .obs
        .iter()
        .map(|record| {
            let is_tumor = record.cell_type.as_deref() == Some(TUMOR_LABEL);
            match tag {
                CellTypeTag::Tumor => is_tumor,
                CellTypeTag::NonTumor => !is_tumor,
            }
        })
        .collect();

    let obs = matrix
        .obs
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|(record, _)| record.clone())
        .collect::<Vec<_>>();
    let values = matrix
        .values
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|(row, _)| row.clone())
        .collect::<Vec<_>>();

    info!(
        subset = %tag,
        kept = obs.len(),
        total = matrix.n_cells(),
        "cell-type subset selected"
    );
    Ok(ExpressionMatrix {
        genes: matrix.genes.clone(),
        obs,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CellRecord;

    fn labeled_matrix(labels: &[Option<&str>]) -> ExpressionMatrix {
        let obs = labels
            .iter()
            .enumerate()
            .map(|(index, label)| CellRecord {
                cell_id: format!("cell{index}"),
                n_genes: 1,
                n_counts: 1.0,
                percent_mito: 0.0,
                cluster: Some("0".to_string()),
                cell_type: label.map(str::to_string),
            })
            .collect::<Vec<_>>();
        let values = obs.iter().map(|_| vec![1.0]).collect();
        ExpressionMatrix {
            genes: vec!["G1".to_string()],
            obs,
            values,
        }
    }

    #[test]
    fn no_tag_is_identity() {
        let matrix = labeled_matrix(&[Some("Tumor"), None]);
        let subset = select(&matrix, None).unwrap();
        assert_eq!(subset, matrix);
    }

    #[test]
    fn non_tumor_includes_other_categories() {
        let matrix = labeled_matrix(&[Some("Tumor"), Some("Fibroblast"), Some("Unknown")]);
        let subset = select(&matrix, Some(CellTypeTag::NonTumor)).unwrap();
        let ids: Vec<_> = subset.obs.iter().map(|r| r.cell_id.as_str()).collect();
        assert_eq!(ids, vec!["cell1", "cell2"]);
    }

    #[test]
    fn missing_labels_are_fatal() {
        let matrix = labeled_matrix(&[Some("Tumor"), None]);
        let err = select(&matrix, Some(CellTypeTag::Tumor)).unwrap_err();
        assert!(matches!(err, PipelineError::MissingAnnotation(_)));
    }
}

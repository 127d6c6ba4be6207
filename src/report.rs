use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use tracing::info;

use crate::artifact::ActivityMatrix;
use crate::error::PipelineError;
use crate::matrix::ExpressionMatrix;

const PERCENTILES: [f64; 5] = [0.01, 0.05, 0.10, 0.50, 1.0];

/// Text reporting over finished artifacts. Stands where plot rendering
/// sits in the full toolchain; consumes ArtifactStore outputs only.
pub struct Reporter<'a> {
    figures_dir: &'a Utf8Path,
}

impl<'a> Reporter<'a> {
    pub fn new(figures_dir: &'a Utf8Path) -> Self {
        Self { figures_dir }
    }

    /// Detected-genes-per-cell percentile table, optionally scoped to a
    /// cell-type subset via the filename prefix.
    pub fn gene_distribution(
        &self,
        matrix: &ExpressionMatrix,
        prefix: &str,
    ) -> Result<(), PipelineError> {
        let mut counts: Vec<u64> = matrix.obs.iter().map(|record| record.n_genes).collect();
        counts.sort_unstable();

        let mut out = String::from("percentile\tgenes_detected\n");
        for percentile in PERCENTILES {
            let value = quantile(&counts, percentile);
            out.push_str(&format!("{}\t{value}\n", (percentile * 100.0) as u32));
        }
        self.write(&format!("{prefix}gene_distribution.tsv"), &out)
    }

    /// Mean regulon activity per harmonized cell type, the whole-sample
    /// summary view.
    pub fn activity_by_cell_type(
        &self,
        activity: &ActivityMatrix,
        cell_types: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let mut sums: BTreeMap<&str, (Vec<f64>, usize)> = BTreeMap::new();
        for (cell, row) in activity.cells.iter().zip(&activity.values) {
            let Some(cell_type) = cell_types.get(cell) else {
                continue;
            };
            let entry = sums
                .entry(cell_type)
                .or_insert_with(|| (vec![0.0; activity.regulons.len()], 0));
            for (sum, value) in entry.0.iter_mut().zip(row) {
                *sum += value;
            }
            entry.1 += 1;
        }

        let mut out = String::from("cell_type");
        for regulon in &activity.regulons {
            out.push('\t');
            out.push_str(regulon);
        }
        out.push('\n');
        for (cell_type, (sums, count)) in &sums {
            out.push_str(cell_type);
            for sum in sums {
                out.push('\t');
                out.push_str(&format!("{}", sum / *count as f64));
            }
            out.push('\n');
        }
        self.write("regulon_activity_by_cell_type.tsv", &out)
    }

    /// Top regulons ranked by mean activity across cells; the subset view.
    pub fn top_regulons(
        &self,
        activity: &ActivityMatrix,
        top_n: usize,
        prefix: &str,
    ) -> Result<(), PipelineError> {
        let n_cells = activity.cells.len().max(1);
        let mut means: Vec<(String, f64)> = activity
            .regulons
            .iter()
            .enumerate()
            .map(|(column, regulon)| {
                let sum: f64 = activity.values.iter().map(|row| row[column]).sum();
                (regulon.clone(), sum / n_cells as f64)
            })
            .collect();
        means.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        means.truncate(top_n);

        let mut out = String::from("regulon\tmean_activity\n");
        for (regulon, mean) in &means {
            out.push_str(&format!("{regulon}\t{mean}\n"));
        }
        self.write(&format!("{prefix}top_regulons.tsv"), &out)
    }

    fn write(&self, name: &str, content: &str) -> Result<(), PipelineError> {
        fs::create_dir_all(self.figures_dir.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = self.figures_dir.join(name);
        fs::write(path.as_std_path(), content)
            .map_err(|err| PipelineError::Filesystem(format!("write {path}: {err}")))?;
        info!(%path, "report written");
        Ok(())
    }
}

fn quantile(sorted: &[u64], fraction: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64 - 1.0) * fraction).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn top_regulons_ranked_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let figures = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let activity = ActivityMatrix {
            cells: vec!["a".to_string(), "b".to_string()],
            regulons: vec!["R1".to_string(), "R2".to_string(), "R3".to_string()],
            values: vec![vec![0.1, 0.9, 0.5], vec![0.3, 0.7, 0.5]],
        };
        Reporter::new(&figures)
            .top_regulons(&activity, 2, "Tumor_")
            .unwrap();

        let content =
            fs::read_to_string(figures.join("Tumor_top_regulons.tsv").as_std_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("R2\t"));
        assert!(lines[2].starts_with("R3\t"));
    }
}

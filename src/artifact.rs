use std::fs;
use std::io::Write;

use camino::Utf8Path;
use tracing::info;

use crate::error::PipelineError;
use crate::matrix::{CellRecord, ExpressionMatrix};

const EXPRESSION_COLUMNS: [&str; 5] = ["CellID", "nGene", "nUMI", "cluster", "cell_type"];
const ADJACENCY_HEADER: &str = "TF,target,importance";
const REGULON_HEADER: &str = "regulon,targets,score,motif";
const REGULON_PREAMBLE: &str = "# motif-enriched regulons";

/// Regulator -> target edge with an importance-like weight.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyRecord {
    pub tf: String,
    pub target: String,
    pub importance: f64,
}

/// A transcription factor with its inferred target-gene set and the
/// supporting motif-enrichment statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Regulon {
    pub name: String,
    pub targets: Vec<String>,
    pub score: f64,
    pub motif: String,
}

/// Cell-by-regulon activity scores keyed by cell identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityMatrix {
    pub cells: Vec<String>,
    pub regulons: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl ActivityMatrix {
    pub fn row(&self, cell_id: &str) -> Option<&[f64]> {
        self.cells
            .iter()
            .position(|cell| cell == cell_id)
            .map(|index| self.values[index].as_slice())
    }
}

/// Typed on-disk hand-off between pipeline stages. Writers produce the
/// exact schema readers expect; both sides fail loudly on mismatch instead
/// of letting a malformed table flow downstream.
pub struct ArtifactStore;

impl ArtifactStore {
    /// Writes the expression export consumed by the external GRN tool.
    /// Every cell must carry a cluster label and a harmonized cell-type
    /// label; missing either is a schema violation at write time.
    pub fn write_expression(
        path: &Utf8Path,
        matrix: &ExpressionMatrix,
    ) -> Result<(), PipelineError> {
        for record in &matrix.obs {
            if record.cluster.is_none() || record.cell_type.is_none() {
                return Err(PipelineError::Schema {
                    artifact: "expression export".to_string(),
                    message: format!(
                        "cell {} lacks {}",
                        record.cell_id,
                        if record.cluster.is_none() {
                            "a cluster label"
                        } else {
                            "a harmonized cell-type label"
                        }
                    ),
                });
            }
        }

        let mut out = String::new();
        out.push_str(&EXPRESSION_COLUMNS.join("\t"));
        for gene in &matrix.genes {
            out.push('\t');
            out.push_str(gene);
        }
        out.push('\n');
        for (record, row) in matrix.obs.iter().zip(&matrix.values) {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}",
                record.cell_id,
                record.n_genes,
                format_float(record.n_counts),
                record.cluster.as_deref().unwrap_or_default(),
                record.cell_type.as_deref().unwrap_or_default(),
            ));
            for value in row {
                out.push('\t');
                out.push_str(&format_float(*value));
            }
            out.push('\n');
        }
        write_atomic(path, out.as_bytes())?;
        info!(%path, cells = matrix.n_cells(), genes = matrix.n_genes(), "expression export written");
        Ok(())
    }

    pub fn read_expression(path: &Utf8Path) -> Result<ExpressionMatrix, PipelineError> {
        let content = read_file(path)?;
        let mut lines = content.lines();
        let header = lines.next().ok_or_else(|| schema("expression export", "empty file"))?;
        let columns: Vec<&str> = header.split('\t').collect();
        if columns.len() < EXPRESSION_COLUMNS.len()
            || columns[..EXPRESSION_COLUMNS.len()] != EXPRESSION_COLUMNS
        {
            return Err(schema(
                "expression export",
                &format!("unexpected header {header:?}"),
            ));
        }
        let genes: Vec<String> = columns[EXPRESSION_COLUMNS.len()..]
            .iter()
            .map(|gene| gene.to_string())
            .collect();

        let mut obs = Vec::new();
        let mut values = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != EXPRESSION_COLUMNS.len() + genes.len() {
                return Err(schema(
                    "expression export",
                    &format!("row for {:?} has {} fields", fields.first(), fields.len()),
                ));
            }
            let row = fields[EXPRESSION_COLUMNS.len()..]
                .iter()
                .map(|field| parse_float(field, "expression export"))
                .collect::<Result<Vec<_>, _>>()?;
            let mut record = CellRecord {
                cell_id: fields[0].to_string(),
                n_genes: fields[1]
                    .parse()
                    .map_err(|_| schema("expression export", "bad nGene value"))?,
                n_counts: parse_float(fields[2], "expression export")?,
                percent_mito: 0.0,
                cluster: Some(fields[3].to_string()),
                cell_type: Some(fields[4].to_string()),
            };
            // percent_mito is not persisted; recover it from the values.
            record.percent_mito = mito_fraction(&genes, &row);
            obs.push(record);
            values.push(row);
        }
        Ok(ExpressionMatrix { genes, obs, values })
    }

    pub fn write_adjacencies(
        path: &Utf8Path,
        records: &[AdjacencyRecord],
    ) -> Result<(), PipelineError> {
        let mut out = String::from(ADJACENCY_HEADER);
        out.push('\n');
        for record in records {
            out.push_str(&format!(
                "{},{},{}\n",
                record.tf,
                record.target,
                format_float(record.importance)
            ));
        }
        write_atomic(path, out.as_bytes())
    }

    pub fn read_adjacencies(path: &Utf8Path) -> Result<Vec<AdjacencyRecord>, PipelineError> {
        let content = read_file(path)?;
        let mut lines = content.lines();
        let header = lines.next().ok_or_else(|| schema("adjacencies", "empty file"))?;
        if header != ADJACENCY_HEADER {
            return Err(schema("adjacencies", &format!("unexpected header {header:?}")));
        }
        lines
            .filter(|line| !line.is_empty())
            .map(|line| {
                let fields: Vec<&str> = line.split(',').collect();
                if fields.len() != 3 {
                    return Err(schema("adjacencies", &format!("bad row {line:?}")));
                }
                Ok(AdjacencyRecord {
                    tf: fields[0].to_string(),
                    target: fields[1].to_string(),
                    importance: parse_float(fields[2], "adjacencies")?,
                })
            })
            .collect()
    }

    /// Regulon tables carry one preamble line before the header; readers
    /// skip exactly that one line.
    pub fn write_regulons(path: &Utf8Path, regulons: &[Regulon]) -> Result<(), PipelineError> {
        let mut out = format!("{REGULON_PREAMBLE}\n{REGULON_HEADER}\n");
        for regulon in regulons {
            out.push_str(&format!(
                "{},{},{},{}\n",
                regulon.name,
                regulon.targets.join(";"),
                format_float(regulon.score),
                regulon.motif
            ));
        }
        write_atomic(path, out.as_bytes())
    }

    pub fn read_regulons(path: &Utf8Path) -> Result<Vec<Regulon>, PipelineError> {
        let content = read_file(path)?;
        let mut lines = content.lines();
        lines.next().ok_or_else(|| schema("regulons", "empty file"))?;
        let header = lines
            .next()
            .ok_or_else(|| schema("regulons", "missing header after preamble"))?;
        if header != REGULON_HEADER {
            return Err(schema("regulons", &format!("unexpected header {header:?}")));
        }
        lines
            .filter(|line| !line.is_empty())
            .map(|line| {
                let fields: Vec<&str> = line.split(',').collect();
                if fields.len() != 4 {
                    return Err(schema("regulons", &format!("bad row {line:?}")));
                }
                Ok(Regulon {
                    name: fields[0].to_string(),
                    targets: fields[1]
                        .split(';')
                        .filter(|target| !target.is_empty())
                        .map(str::to_string)
                        .collect(),
                    score: parse_float(fields[2], "regulons")?,
                    motif: fields[3].to_string(),
                })
            })
            .collect()
    }

    pub fn write_activity(path: &Utf8Path, matrix: &ActivityMatrix) -> Result<(), PipelineError> {
        let mut out = String::from("Cell");
        for regulon in &matrix.regulons {
            out.push(',');
            out.push_str(regulon);
        }
        out.push('\n');
        for (cell, row) in matrix.cells.iter().zip(&matrix.values) {
            out.push_str(cell);
            for value in row {
                out.push(',');
                out.push_str(&format_float(*value));
            }
            out.push('\n');
        }
        write_atomic(path, out.as_bytes())
    }

    pub fn read_activity(path: &Utf8Path) -> Result<ActivityMatrix, PipelineError> {
        let content = read_file(path)?;
        let mut lines = content.lines();
        let header = lines.next().ok_or_else(|| schema("activity matrix", "empty file"))?;
        let mut columns = header.split(',');
        if columns.next() != Some("Cell") {
            return Err(schema(
                "activity matrix",
                &format!("unexpected header {header:?}"),
            ));
        }
        let regulons: Vec<String> = columns.map(str::to_string).collect();

        let mut cells = Vec::new();
        let mut values = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split(',');
            let cell = fields
                .next()
                .ok_or_else(|| schema("activity matrix", "missing cell id"))?;
            let row = fields
                .map(|field| parse_float(field, "activity matrix"))
                .collect::<Result<Vec<_>, _>>()?;
            if row.len() != regulons.len() {
                return Err(schema(
                    "activity matrix",
                    &format!("row for {cell} has {} scores, expected {}", row.len(), regulons.len()),
                ));
            }
            cells.push(cell.to_string());
            values.push(row);
        }
        Ok(ActivityMatrix {
            cells,
            regulons,
            values,
        })
    }
}

fn mito_fraction(genes: &[String], row: &[f64]) -> f64 {
    let total: f64 = row.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mito: f64 = genes
        .iter()
        .zip(row)
        .filter(|(gene, _)| gene.starts_with("MT-"))
        .map(|(_, value)| value)
        .sum();
    mito / total
}

fn schema(artifact: &str, message: &str) -> PipelineError {
    PipelineError::Schema {
        artifact: artifact.to_string(),
        message: message.to_string(),
    }
}

fn parse_float(field: &str, artifact: &str) -> Result<f64, PipelineError> {
    field
        .parse()
        .map_err(|_| schema(artifact, &format!("bad numeric value {field:?}")))
}

fn format_float(value: f64) -> String {
    // Keeps integers readable while preserving round-trip precision.
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::Filesystem(format!("no parent for {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".artifact")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| PipelineError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}

fn read_file(path: &Utf8Path) -> Result<String, PipelineError> {
    fs::read_to_string(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::matrix::CellRecord;

    fn tmp(name: &str) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        (dir, path)
    }

    fn export_matrix() -> ExpressionMatrix {
        ExpressionMatrix {
            genes: vec!["TF1".to_string(), "MT-CO1".to_string()],
            obs: vec![CellRecord {
                cell_id: "AAAC".to_string(),
                n_genes: 2,
                n_counts: 3.0,
                percent_mito: 1.0 / 3.0,
                cluster: Some("1".to_string()),
                cell_type: Some("Tumor".to_string()),
            }],
            values: vec![vec![2.0, 1.0]],
        }
    }

    #[test]
    fn expression_round_trip() {
        let (_dir, path) = tmp("export.tsv");
        let matrix = export_matrix();
        ArtifactStore::write_expression(&path, &matrix).unwrap();
        let loaded = ArtifactStore::read_expression(&path).unwrap();
        assert_eq!(loaded.genes, matrix.genes);
        assert_eq!(loaded.obs[0].cell_id, "AAAC");
        assert_eq!(loaded.obs[0].cluster.as_deref(), Some("1"));
        assert!((loaded.obs[0].percent_mito - matrix.obs[0].percent_mito).abs() < 1e-12);
        assert_eq!(loaded.values, matrix.values);
    }

    #[test]
    fn expression_write_requires_labels() {
        let (_dir, path) = tmp("export.tsv");
        let mut matrix = export_matrix();
        matrix.obs[0].cell_type = None;
        let err = ArtifactStore::write_expression(&path, &matrix).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
        assert!(!path.as_std_path().exists());
    }

    #[test]
    fn regulon_preamble_skipped_once() {
        let (_dir, path) = tmp("reg.csv");
        let regulons = vec![Regulon {
            name: "TF1(+)".to_string(),
            targets: vec!["G1".to_string(), "G2".to_string()],
            score: 3.5,
            motif: "M00001".to_string(),
        }];
        ArtifactStore::write_regulons(&path, &regulons).unwrap();

        let raw = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert!(raw.lines().next().unwrap().starts_with('#'));
        assert_eq!(raw.lines().nth(1).unwrap(), REGULON_HEADER);

        let loaded = ArtifactStore::read_regulons(&path).unwrap();
        assert_eq!(loaded, regulons);
    }

    #[test]
    fn activity_keyed_by_cell() {
        let (_dir, path) = tmp("auc.csv");
        let matrix = ActivityMatrix {
            cells: vec!["AAAC".to_string(), "AAAG".to_string()],
            regulons: vec!["TF1(+)".to_string()],
            values: vec![vec![0.25], vec![0.75]],
        };
        ArtifactStore::write_activity(&path, &matrix).unwrap();
        let loaded = ArtifactStore::read_activity(&path).unwrap();
        assert_eq!(loaded.row("AAAG").unwrap(), &[0.75]);
        assert_eq!(loaded, matrix);
    }
}

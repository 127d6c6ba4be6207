use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use tracing::info;

use crate::error::PipelineError;

pub const HARMONIZED_LABEL_COLUMN: &str = "cell_type.harmonized.cancer";

/// Per-cell metadata carried alongside the raw counts. `cluster` and
/// `cell_type` are filled by the cluster and annotate stages respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub cell_id: String,
    pub n_genes: u64,
    pub n_counts: f64,
    pub percent_mito: f64,
    pub cluster: Option<String>,
    pub cell_type: Option<String>,
}

/// Dense cell-by-gene expression matrix with row metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionMatrix {
    pub genes: Vec<String>,
    pub obs: Vec<CellRecord>,
    pub values: Vec<Vec<f64>>,
}

impl ExpressionMatrix {
    pub fn n_cells(&self) -> usize {
        self.obs.len()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Recomputes the detected-gene and total-count QC fields from the
    /// current values. Mitochondrial fraction follows the `MT-` gene prefix
    /// convention.
    pub fn recompute_qc(&mut self) {
        let mito: Vec<bool> = self.genes.iter().map(|g| g.starts_with("MT-")).collect();
        for (record, row) in self.obs.iter_mut().zip(&self.values) {
            let mut n_genes = 0u64;
            let mut total = 0.0;
            let mut mito_total = 0.0;
            for (value, is_mito) in row.iter().zip(&mito) {
                if *value > 0.0 {
                    n_genes += 1;
                }
                total += value;
                if *is_mito {
                    mito_total += value;
                }
            }
            record.n_genes = n_genes;
            record.n_counts = total;
            record.percent_mito = if total > 0.0 { mito_total / total } else { 0.0 };
        }
    }

    /// Drops cells under the detected-gene floor or over the mitochondrial
    /// ceiling, then genes seen in fewer than `min_cells` cells.
    pub fn qc_filter(
        &mut self,
        min_genes: usize,
        min_cells: usize,
        max_percent_mito: f64,
    ) {
        let before_cells = self.n_cells();
        let keep_cell: Vec<bool> = self
            .obs
            .iter()
            .map(|record| {
                record.n_genes >= min_genes as u64 && record.percent_mito < max_percent_mito
            })
            .collect();
        retain_by_mask(&mut self.obs, &keep_cell);
        retain_by_mask(&mut self.values, &keep_cell);

        let mut cells_per_gene = vec![0usize; self.n_genes()];
        for row in &self.values {
            for (count, value) in cells_per_gene.iter_mut().zip(row) {
                if *value > 0.0 {
                    *count += 1;
                }
            }
        }
        let keep_gene: Vec<bool> = cells_per_gene
            .iter()
            .map(|count| *count >= min_cells)
            .collect();
        retain_by_mask(&mut self.genes, &keep_gene);
        for row in &mut self.values {
            retain_by_mask(row, &keep_gene);
        }
        self.recompute_qc();
        info!(
            cells_before = before_cells,
            cells_after = self.n_cells(),
            genes_after = self.n_genes(),
            "qc filter applied"
        );
    }

    /// Joins harmonized cell-type labels onto cells by barcode. Cells
    /// absent from the metadata keep no label; the annotate stage decides
    /// later whether that is fatal.
    pub fn annotate_from_metadata<R: Read>(&mut self, reader: R) -> Result<usize, PipelineError> {
        let labels = read_harmonized_labels(reader)?;
        let mut matched = 0;
        for record in &mut self.obs {
            if let Some(label) = labels.get(&record.cell_id) {
                record.cell_type = Some(label.clone());
                matched += 1;
            }
        }
        info!(matched, total = self.n_cells(), "metadata labels joined");
        Ok(matched)
    }

    /// Per-cell total-count normalization to `target_sum` followed by ln(1+x).
    pub fn normalize_log1p(&mut self, target_sum: f64) {
        for row in &mut self.values {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                let scale = target_sum / total;
                for value in row.iter_mut() {
                    *value = (*value * scale).ln_1p();
                }
            }
        }
    }
}

fn retain_by_mask<T>(items: &mut Vec<T>, mask: &[bool]) {
    let mut index = 0;
    items.retain(|_| {
        let keep = mask[index];
        index += 1;
        keep
    });
}

/// Parses the gzipped harmonized metadata TSV into barcode -> label.
fn read_harmonized_labels<R: Read>(reader: R) -> Result<HashMap<String, String>, PipelineError> {
    let buffered = BufReader::new(reader);
    let mut lines = buffered.lines();
    let header = lines
        .next()
        .transpose()
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?
        .ok_or_else(|| PipelineError::Parse {
            what: "metadata".to_string(),
            message: "empty file".to_string(),
        })?;
    let columns: Vec<&str> = header.split('\t').collect();
    let barcode_idx = column_index(&columns, "Barcode")?;
    let label_idx = column_index(&columns, HARMONIZED_LABEL_COLUMN)?;

    let mut labels = HashMap::new();
    for line in lines {
        let line = line.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let barcode = fields.get(barcode_idx).copied().unwrap_or_default();
        let label = fields.get(label_idx).copied().unwrap_or_default();
        if !barcode.is_empty() && !label.is_empty() {
            labels.insert(barcode.to_string(), label.to_string());
        }
    }
    Ok(labels)
}

fn column_index(columns: &[&str], name: &str) -> Result<usize, PipelineError> {
    columns
        .iter()
        .position(|column| *column == name)
        .ok_or_else(|| PipelineError::Parse {
            what: "metadata".to_string(),
            message: format!("missing column {name:?}"),
        })
}

/// Loads a 10x-style matrix directory: `matrix.mtx`, `barcodes.tsv`,
/// `features.tsv`, each optionally gzip-compressed.
pub fn read_10x_dir(dir: &Utf8Path) -> Result<ExpressionMatrix, PipelineError> {
    info!(%dir, "reading raw expression matrix");
    let barcodes = read_lines_maybe_gz(dir, "barcodes.tsv")?;
    let genes = read_lines_maybe_gz(dir, "features.tsv")?
        .into_iter()
        .map(|line| {
            // features.tsv carries id<TAB>symbol<TAB>kind; keep the symbol.
            let mut fields = line.split('\t');
            let first = fields.next().unwrap_or_default().to_string();
            fields.next().map(str::to_string).unwrap_or(first)
        })
        .collect::<Vec<_>>();

    let mtx_lines = read_lines_maybe_gz(dir, "matrix.mtx")?;
    let mut entries = mtx_lines
        .iter()
        .map(String::as_str)
        .filter(|line| !line.starts_with('%') && !line.is_empty());
    let dims = entries.next().ok_or_else(|| PipelineError::Parse {
        what: "matrix.mtx".to_string(),
        message: "missing dimensions line".to_string(),
    })?;
    let (n_genes, n_cells) = parse_mtx_dims(dims)?;
    if n_genes != genes.len() || n_cells != barcodes.len() {
        return Err(PipelineError::Parse {
            what: "matrix.mtx".to_string(),
            message: format!(
                "dimensions {n_genes}x{n_cells} do not match features ({}) / barcodes ({})",
                genes.len(),
                barcodes.len()
            ),
        });
    }

    // MatrixMarket triplets are gene-major; the in-memory layout is
    // cell-major like every downstream consumer expects.
    let mut values = vec![vec![0.0; n_genes]; n_cells];
    for line in entries {
        let mut fields = line.split_whitespace();
        let gene = parse_mtx_index(fields.next(), n_genes, "gene")?;
        let cell = parse_mtx_index(fields.next(), n_cells, "cell")?;
        let value: f64 = fields
            .next()
            .unwrap_or("0")
            .parse()
            .map_err(|_| PipelineError::Parse {
                what: "matrix.mtx".to_string(),
                message: format!("bad value in line {line:?}"),
            })?;
        values[cell][gene] = value;
    }

    let obs = barcodes
        .into_iter()
        .map(|cell_id| CellRecord {
            cell_id,
            n_genes: 0,
            n_counts: 0.0,
            percent_mito: 0.0,
            cluster: None,
            cell_type: None,
        })
        .collect();
    let mut matrix = ExpressionMatrix { genes, obs, values };
    matrix.recompute_qc();
    Ok(matrix)
}

fn parse_mtx_dims(line: &str) -> Result<(usize, usize), PipelineError> {
    let mut fields = line.split_whitespace();
    let rows = fields.next().and_then(|v| v.parse().ok());
    let cols = fields.next().and_then(|v| v.parse().ok());
    match (rows, cols) {
        (Some(rows), Some(cols)) => Ok((rows, cols)),
        _ => Err(PipelineError::Parse {
            what: "matrix.mtx".to_string(),
            message: format!("bad dimensions line {line:?}"),
        }),
    }
}

fn parse_mtx_index(
    field: Option<&str>,
    bound: usize,
    axis: &str,
) -> Result<usize, PipelineError> {
    let index: usize = field
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PipelineError::Parse {
            what: "matrix.mtx".to_string(),
            message: format!("bad {axis} index"),
        })?;
    if index == 0 || index > bound {
        return Err(PipelineError::Parse {
            what: "matrix.mtx".to_string(),
            message: format!("{axis} index {index} out of range 1..={bound}"),
        });
    }
    Ok(index - 1)
}

fn read_lines_maybe_gz(dir: &Utf8Path, name: &str) -> Result<Vec<String>, PipelineError> {
    let plain = dir.join(name);
    let gz = dir.join(format!("{name}.gz"));
    let content = if plain.as_std_path().exists() {
        fs::read_to_string(plain.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("read {plain}: {err}")))?
    } else if gz.as_std_path().exists() {
        let file = fs::File::open(gz.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("open {gz}: {err}")))?;
        let mut decoder = GzDecoder::new(file);
        let mut content = String::new();
        decoder
            .read_to_string(&mut content)
            .map_err(|err| PipelineError::Filesystem(format!("decompress {gz}: {err}")))?;
        content
    } else {
        return Err(PipelineError::Filesystem(format!(
            "missing {name} (or {name}.gz) under {dir}"
        )));
    };
    Ok(content.lines().map(str::to_string).collect())
}

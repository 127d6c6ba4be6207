use camino::Utf8PathBuf;

use regulon_pipeline::artifact::{
    ActivityMatrix, AdjacencyRecord, ArtifactStore, Regulon,
};
use regulon_pipeline::error::PipelineError;
use regulon_pipeline::matrix::{CellRecord, ExpressionMatrix};

fn tmp(name: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
    (dir, path)
}

fn labeled_cell(cell_id: &str, cluster: &str, cell_type: &str) -> CellRecord {
    CellRecord {
        cell_id: cell_id.to_string(),
        n_genes: 2,
        n_counts: 4.5,
        percent_mito: 0.0,
        cluster: Some(cluster.to_string()),
        cell_type: Some(cell_type.to_string()),
    }
}

#[test]
fn expression_round_trip_preserves_metadata() {
    let (_dir, path) = tmp("export.tsv");
    let matrix = ExpressionMatrix {
        genes: vec!["TF1".to_string(), "G2".to_string()],
        obs: vec![
            labeled_cell("AAAC", "0", "Tumor"),
            labeled_cell("AAAG", "1", "Fibroblast"),
        ],
        values: vec![vec![1.5, 3.0], vec![0.0, 4.5]],
    };
    ArtifactStore::write_expression(&path, &matrix).unwrap();
    let loaded = ArtifactStore::read_expression(&path).unwrap();

    assert_eq!(loaded.genes, matrix.genes);
    assert_eq!(loaded.values, matrix.values);
    for (loaded, original) in loaded.obs.iter().zip(&matrix.obs) {
        assert_eq!(loaded.cell_id, original.cell_id);
        assert_eq!(loaded.n_genes, original.n_genes);
        assert_eq!(loaded.cluster, original.cluster);
        assert_eq!(loaded.cell_type, original.cell_type);
    }
}

#[test]
fn expression_missing_cluster_is_schema_error_at_write() {
    let (_dir, path) = tmp("export.tsv");
    let matrix = ExpressionMatrix {
        genes: vec!["TF1".to_string()],
        obs: vec![CellRecord {
            cluster: None,
            ..labeled_cell("AAAC", "0", "Tumor")
        }],
        values: vec![vec![1.0]],
    };
    let err = ArtifactStore::write_expression(&path, &matrix).unwrap_err();
    assert!(matches!(err, PipelineError::Schema { .. }));
}

#[test]
fn expression_read_rejects_foreign_header() {
    let (_dir, path) = tmp("export.tsv");
    std::fs::write(path.as_std_path(), "barcode\tcount\nAAAC\t3\n").unwrap();
    let err = ArtifactStore::read_expression(&path).unwrap_err();
    assert!(matches!(err, PipelineError::Schema { .. }));
}

#[test]
fn adjacency_round_trip() {
    let (_dir, path) = tmp("adjacencies.csv");
    let records = vec![
        AdjacencyRecord {
            tf: "STAT1".to_string(),
            target: "IRF1".to_string(),
            importance: 12.75,
        },
        AdjacencyRecord {
            tf: "STAT1".to_string(),
            target: "GBP1".to_string(),
            importance: 3.0,
        },
    ];
    ArtifactStore::write_adjacencies(&path, &records).unwrap();
    assert_eq!(ArtifactStore::read_adjacencies(&path).unwrap(), records);
}

#[test]
fn regulon_round_trip_ignores_target_order() {
    let (_dir, path) = tmp("reg.csv");
    let regulons = vec![Regulon {
        name: "STAT1(+)".to_string(),
        targets: vec!["IRF1".to_string(), "GBP1".to_string()],
        score: 4.25,
        motif: "M00001".to_string(),
    }];
    ArtifactStore::write_regulons(&path, &regulons).unwrap();
    let loaded = ArtifactStore::read_regulons(&path).unwrap();

    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, regulons[0].name);
    assert_eq!(loaded[0].score, regulons[0].score);
    let mut loaded_targets = loaded[0].targets.clone();
    let mut expected_targets = regulons[0].targets.clone();
    loaded_targets.sort();
    expected_targets.sort();
    assert_eq!(loaded_targets, expected_targets);
}

#[test]
fn regulon_reader_skips_exactly_one_preamble_line() {
    let (_dir, path) = tmp("reg.csv");
    // Hand-written file in the external tool's shape: one preamble line,
    // then the header, then rows.
    std::fs::write(
        path.as_std_path(),
        "# motif-enriched regulons\nregulon,targets,score,motif\nTF1(+),G1;G2,1.5,M1\n",
    )
    .unwrap();
    let loaded = ArtifactStore::read_regulons(&path).unwrap();
    assert_eq!(loaded[0].targets, vec!["G1".to_string(), "G2".to_string()]);

    // A second preamble line must break the parse, not be skipped.
    std::fs::write(
        path.as_std_path(),
        "# preamble\n# another preamble\nregulon,targets,score,motif\n",
    )
    .unwrap();
    assert!(ArtifactStore::read_regulons(&path).is_err());
}

#[test]
fn activity_round_trip_within_tolerance() {
    let (_dir, path) = tmp("auc.csv");
    let matrix = ActivityMatrix {
        cells: vec!["AAAC".to_string(), "AAAG".to_string()],
        regulons: vec!["STAT1(+)".to_string(), "MYC(+)".to_string()],
        values: vec![vec![0.123456789, 0.5], vec![0.25, 0.0000001]],
    };
    ArtifactStore::write_activity(&path, &matrix).unwrap();
    let loaded = ArtifactStore::read_activity(&path).unwrap();

    assert_eq!(loaded.cells, matrix.cells);
    assert_eq!(loaded.regulons, matrix.regulons);
    for (loaded_row, row) in loaded.values.iter().zip(&matrix.values) {
        for (loaded_value, value) in loaded_row.iter().zip(row) {
            assert!((loaded_value - value).abs() < 1e-9);
        }
    }
    assert_eq!(loaded.row("AAAG").unwrap()[0], 0.25);
}

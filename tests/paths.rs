use std::fs;

use camino::Utf8PathBuf;

use regulon_pipeline::config::RunConfiguration;
use regulon_pipeline::domain::{AnalysisContext, CellTypeTag, PruningMode};
use regulon_pipeline::paths::AnalysisPaths;

fn tmp_base() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, base)
}

#[test]
fn resolution_is_deterministic() {
    let (_dir, base) = tmp_base();
    let config = RunConfiguration::default();
    let ctx = AnalysisContext::new(
        base.clone(),
        "GSE240822",
        "C3L-00004-T1",
        Some(CellTypeTag::Tumor),
        PruningMode::ForceOff,
    )
    .unwrap();
    let ctx_again = ctx.clone();

    let first = AnalysisPaths::resolve(&ctx, &config).unwrap();
    let second = AnalysisPaths::resolve(&ctx_again, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn resolution_never_deletes_existing_files() {
    let (_dir, base) = tmp_base();
    let config = RunConfiguration::default();
    let ctx = AnalysisContext::new(base.clone(), "ds", "s1", None, PruningMode::UseDefault).unwrap();

    let first = AnalysisPaths::resolve(&ctx, &config).unwrap();
    fs::write(first.adjacencies.as_std_path(), "TF,target,importance\n").unwrap();

    let second = AnalysisPaths::resolve(&ctx, &config).unwrap();
    assert!(second.adjacencies.as_std_path().exists());
    assert_eq!(
        fs::read_to_string(second.adjacencies.as_std_path()).unwrap(),
        "TF,target,importance\n"
    );
}

#[test]
fn tumor_unpruned_layout() {
    // Tumor subset with pruning forced off: everything under unpruned/
    // with a Tumor_ filename prefix.
    let (_dir, base) = tmp_base();
    let config = RunConfiguration::default();
    let ctx = AnalysisContext::new(
        base.clone(),
        "GSE240822",
        "C3L-00004-T1",
        Some(CellTypeTag::Tumor),
        PruningMode::ForceOff,
    )
    .unwrap();
    let paths = AnalysisPaths::resolve(&ctx, &config).unwrap();

    for artifact in [
        &paths.anndata,
        &paths.filtered_export,
        &paths.adjacencies,
        &paths.regulons,
        &paths.activity_matrix,
    ] {
        assert!(
            artifact.as_str().contains("/C3L-00004-T1/unpruned/Tumor_"),
            "unexpected layout: {artifact}"
        );
    }
    assert!(paths.tf_list.ends_with("databases/allTFs_hg38.txt"));
    assert!(paths.raw_matrix.ends_with("GSE240822/raw_data/raw_feature_bc_matrix"));
}

#[test]
fn directories_exist_after_resolution() {
    let (_dir, base) = tmp_base();
    let config = RunConfiguration::default();
    let ctx =
        AnalysisContext::new(base.clone(), "ds", "s1", None, PruningMode::ForceOn).unwrap();
    let paths = AnalysisPaths::resolve(&ctx, &config).unwrap();

    for dir in [
        &paths.databases,
        &paths.raw_data,
        &paths.output,
        &paths.figures,
    ] {
        assert!(dir.as_std_path().is_dir(), "missing directory {dir}");
    }
    assert!(paths.output.ends_with("ds/s1/pruned"));
}

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap())
}

fn validate_segment(value: &str, what: &str) -> Result<String, PipelineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || !segment_regex().is_match(trimmed)
    {
        return Err(PipelineError::InvalidContext(format!(
            "{what} must be a plain path segment, got {value:?}"
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_segment(value, "dataset id").map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleId {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_segment(value, "sample id").map(Self)
    }
}

/// Cell-type subset selector. `NonTumor` is the complement of the literal
/// `Tumor` label, not a second positive category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellTypeTag {
    Tumor,
    NonTumor,
}

impl CellTypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellTypeTag::Tumor => "Tumor",
            CellTypeTag::NonTumor => "Non-Tumor",
        }
    }

    /// Parses the CLI value, treating "none" (any case) as absent.
    pub fn parse_optional(value: Option<&str>) -> Result<Option<Self>, PipelineError> {
        match value {
            None => Ok(None),
            Some(raw) if raw.eq_ignore_ascii_case("none") => Ok(None),
            Some(raw) => raw.parse().map(Some),
        }
    }
}

impl fmt::Display for CellTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CellTypeTag {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "tumor" => Ok(CellTypeTag::Tumor),
            "non-tumor" => Ok(CellTypeTag::NonTumor),
            _ => Err(PipelineError::InvalidContext(format!(
                "cell type must be 'Tumor', 'Non-Tumor', or 'None', got {value:?}"
            ))),
        }
    }
}

/// Tri-state pruning control for the context-inference operation. Only
/// `ForceOff` changes the external tool's behavior (adds `--no_pruning`);
/// `ForceOn` and `UseDefault` both leave the tool in its pruned default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PruningMode {
    #[default]
    UseDefault,
    ForceOn,
    ForceOff,
}

impl PruningMode {
    pub fn parse_optional(value: Option<&str>) -> Result<Self, PipelineError> {
        match value {
            None => Ok(PruningMode::UseDefault),
            Some(raw) => {
                let normalized = raw.trim().to_lowercase();
                match normalized.as_str() {
                    "true" => Ok(PruningMode::ForceOn),
                    "false" => Ok(PruningMode::ForceOff),
                    "none" => Ok(PruningMode::UseDefault),
                    _ => Err(PipelineError::InvalidArgument(format!(
                        "--prune must be 'true', 'false', or 'None', got {raw:?}"
                    ))),
                }
            }
        }
    }

    /// Path segment separating pruned and unpruned artifact trees, when
    /// the flag is explicit.
    pub fn path_segment(&self) -> Option<&'static str> {
        match self {
            PruningMode::UseDefault => None,
            PruningMode::ForceOn => Some("pruned"),
            PruningMode::ForceOff => Some("unpruned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisContext {
    pub base_folder: Utf8PathBuf,
    pub dataset_id: DatasetId,
    pub sample_id: SampleId,
    pub cell_type: Option<CellTypeTag>,
    pub pruning: PruningMode,
}

impl AnalysisContext {
    pub fn new(
        base_folder: impl Into<Utf8PathBuf>,
        dataset_id: &str,
        sample_id: &str,
        cell_type: Option<CellTypeTag>,
        pruning: PruningMode,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            base_folder: base_folder.into(),
            dataset_id: dataset_id.parse()?,
            sample_id: sample_id.parse()?,
            cell_type,
            pruning,
        })
    }

    /// Filename prefix for subset-scoped artifacts, e.g. `Tumor_adjacencies.csv`.
    pub fn file_prefix(&self) -> String {
        match self.cell_type {
            Some(tag) => format!("{}_", tag.as_str()),
            None => String::new(),
        }
    }
}

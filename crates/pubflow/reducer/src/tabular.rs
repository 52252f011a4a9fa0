//! Built-in reducer for tabular JSON content packages
//!
//! A package is a list of field descriptors and a list of rows:
//!
//! ```json
//! {
//!   "fields": [{"name": "Region", "display_name": "Region", "structure": "flat"}],
//!   "rows": [{"Region": "East", "Amount": 10}]
//! }
//! ```
//!
//! Values of a `tree` field are `/`-separated paths. Every ancestor of a path
//! is a node of the hierarchy, and selecting a node selects its descendants.

use crate::error::{ReducerError, ReducerResult};
use crate::traits::{ReducedArtifact, Reducer};
use async_trait::async_trait;
use pubflow_types::{
    checksum_bytes, ContentHierarchy, FieldStructure, ReductionField, SelectionCriteria,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const TREE_SEPARATOR: char = '/';

/// Rows processed between cancellation checks
const CANCEL_CHECK_ROWS: usize = 1024;

/// Field descriptor inside a content package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageField {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub structure: FieldStructure,
}

impl PackageField {
    fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// A tabular content package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPackage {
    pub fields: Vec<PackageField>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

fn cell(row: &Map<String, Value>, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Hierarchy nodes a single cell contributes
fn nodes(structure: FieldStructure, value: &str) -> Vec<String> {
    match structure {
        FieldStructure::Flat => vec![value.to_string()],
        FieldStructure::Tree => {
            let mut out = Vec::new();
            let mut path = String::new();
            for part in value.split(TREE_SEPARATOR).map(str::trim).filter(|p| !p.is_empty()) {
                if !path.is_empty() {
                    path.push(TREE_SEPARATOR);
                }
                path.push_str(part);
                out.push(path.clone());
            }
            out
        }
    }
}

fn selects(structure: FieldStructure, value: &str, selected: &[String]) -> bool {
    match structure {
        FieldStructure::Flat => selected.iter().any(|s| s == value),
        FieldStructure::Tree => selected.iter().any(|s| {
            value == s
                || (value.starts_with(s.as_str())
                    && value[s.len()..].starts_with(TREE_SEPARATOR))
        }),
    }
}

struct FieldFilter {
    name: String,
    structure: FieldStructure,
    values: Vec<String>,
}

impl ContentPackage {
    pub fn from_slice(bytes: &[u8]) -> ReducerResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ReducerError::Format(e.to_string()))
    }

    /// Read a package from disk
    pub fn load(path: &Path) -> ReducerResult<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_slice(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReducerError::MasterMissing {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Distinct values of every field in first-appearance order
    pub fn hierarchy(&self, cancel: &CancellationToken) -> ReducerResult<ContentHierarchy> {
        let mut fields: Vec<ReductionField> = self
            .fields
            .iter()
            .map(|f| ReductionField {
                name: f.name.clone(),
                display_name: f.label().to_string(),
                structure: f.structure,
                values: Vec::new(),
            })
            .collect();
        let mut seen: Vec<HashSet<String>> = vec![HashSet::new(); fields.len()];

        for (i, row) in self.rows.iter().enumerate() {
            if i % CANCEL_CHECK_ROWS == 0 && cancel.is_cancelled() {
                return Err(ReducerError::Canceled);
            }
            for (field, seen) in fields.iter_mut().zip(seen.iter_mut()) {
                let Some(value) = cell(row, &field.name) else {
                    continue;
                };
                for node in nodes(field.structure, &value) {
                    if seen.insert(node.clone()) {
                        field.values.push(node);
                    }
                }
            }
        }

        Ok(ContentHierarchy { fields })
    }

    /// Keep only the rows matching every selected field
    ///
    /// Fails with `FieldNotFound` if a selection names an unknown field.
    /// Values unknown to an existing field are dropped; a field left with no
    /// valid values matches nothing, and so does an empty selection.
    pub fn reduce(
        &self,
        selection: &SelectionCriteria,
        cancel: &CancellationToken,
    ) -> ReducerResult<ContentPackage> {
        let master = self.hierarchy(cancel)?;

        let mut filters = Vec::with_capacity(selection.fields.len());
        for wanted in &selection.fields {
            let field = master
                .field(&wanted.field_name)
                .ok_or_else(|| ReducerError::FieldNotFound {
                    field: wanted.field_name.clone(),
                })?;
            let values: Vec<String> = wanted
                .values
                .iter()
                .filter(|v| field.contains(v))
                .cloned()
                .collect();
            if values.len() < wanted.values.len() {
                debug!(
                    field = %field.name,
                    dropped = wanted.values.len() - values.len(),
                    "Ignoring selected values missing from the master hierarchy"
                );
            }
            filters.push(FieldFilter {
                name: field.name.clone(),
                structure: field.structure,
                values,
            });
        }

        let mut rows = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            if i % CANCEL_CHECK_ROWS == 0 && cancel.is_cancelled() {
                return Err(ReducerError::Canceled);
            }
            let keep = !filters.is_empty() && filters.iter().all(|f| {
                cell(row, &f.name)
                    .map(|v| selects(f.structure, &v, &f.values))
                    .unwrap_or(false)
            });
            if keep {
                rows.push(row.clone());
            }
        }

        Ok(ContentPackage {
            fields: self.fields.clone(),
            rows,
        })
    }
}

/// Reducer for [`ContentPackage`] files
///
/// Parsing and filtering run on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct TabularReducer;

impl TabularReducer {
    pub fn new() -> Self {
        Self
    }
}

async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> ReducerResult<T>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> ReducerResult<T> + Send + 'static,
{
    let token = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || work(token));

    tokio::select! {
        _ = cancel.cancelled() => Err(ReducerError::Canceled),
        joined = handle => joined.map_err(|e| ReducerError::Io(io::Error::other(e.to_string())))?,
    }
}

#[async_trait]
impl Reducer for TabularReducer {
    #[instrument(skip(self, cancel))]
    async fn extract_hierarchy(
        &self,
        master: &Path,
        cancel: &CancellationToken,
    ) -> ReducerResult<ContentHierarchy> {
        let master = master.to_path_buf();
        run_blocking(cancel, move |cancel| {
            ContentPackage::load(&master)?.hierarchy(&cancel)
        })
        .await
    }

    #[instrument(skip(self, selection, cancel))]
    async fn reduce(
        &self,
        master: &Path,
        selection: &SelectionCriteria,
        output: &Path,
        cancel: &CancellationToken,
    ) -> ReducerResult<ReducedArtifact> {
        let master = master.to_path_buf();
        let output = output.to_path_buf();
        let selection = selection.clone();

        run_blocking(cancel, move |cancel| {
            let reduced = ContentPackage::load(&master)?.reduce(&selection, &cancel)?;
            let hierarchy = reduced.hierarchy(&cancel)?;
            let bytes = serde_json::to_vec_pretty(&reduced)
                .map_err(|e| ReducerError::Format(e.to_string()))?;

            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, &bytes)?;

            debug!(rows = reduced.rows.len(), output = %output.display(), "Wrote reduced content");
            Ok(ReducedArtifact {
                path: output,
                checksum: checksum_bytes(&bytes),
                hierarchy,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::reduced_output_path;
    use pubflow_types::checksum_file;
    use serde_json::json;
    use tempfile::TempDir;

    /// 1 company, 7 regions, and an account tree with 54 nodes. Region `r`
    /// owns the subtree `G{r}`, so selecting `G0` and `G1` keeps 2 regions and
    /// 15 account nodes.
    fn sample_package() -> ContentPackage {
        let leaves = [6, 7, 7, 7, 7, 7, 6];
        let mut rows = Vec::new();
        for (r, count) in leaves.iter().enumerate() {
            for k in 0..*count {
                let row = json!({
                    "Company": "Acme",
                    "Region": format!("R{}", r),
                    "Account": format!("G{}/L{}", r, k),
                    "Amount": r * 100 + k,
                });
                if let Value::Object(map) = row {
                    rows.push(map);
                }
            }
        }
        ContentPackage {
            fields: vec![
                PackageField {
                    name: "Company".into(),
                    display_name: String::new(),
                    structure: FieldStructure::Flat,
                },
                PackageField {
                    name: "Region".into(),
                    display_name: "Sales region".into(),
                    structure: FieldStructure::Flat,
                },
                PackageField {
                    name: "Account".into(),
                    display_name: "Account".into(),
                    structure: FieldStructure::Tree,
                },
            ],
            rows,
        }
    }

    fn write_master(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("master.json");
        std::fs::write(&path, serde_json::to_vec(&sample_package()).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_hierarchy_first_appearance_order() {
        let hierarchy = sample_package()
            .hierarchy(&CancellationToken::new())
            .unwrap();

        assert_eq!(hierarchy.value_counts(), vec![1, 7, 54]);
        let account = hierarchy.field("Account").unwrap();
        assert_eq!(&account.values[..3], &["G0", "G0/L0", "G0/L1"]);
        assert_eq!(hierarchy.field("Company").unwrap().display_name, "Company");
    }

    #[test]
    fn test_tree_selection_narrows_associated_fields() {
        let selection = SelectionCriteria::new().with_values("Account", ["G0", "G1"]);
        let reduced = sample_package()
            .reduce(&selection, &CancellationToken::new())
            .unwrap();
        let hierarchy = reduced.hierarchy(&CancellationToken::new()).unwrap();

        assert_eq!(hierarchy.value_counts(), vec![1, 2, 15]);
    }

    #[test]
    fn test_invalid_values_are_dropped() {
        let selection = SelectionCriteria::new().with_values("Account", ["G3", "G99"]);
        let reduced = sample_package()
            .reduce(&selection, &CancellationToken::new())
            .unwrap();
        let hierarchy = reduced.hierarchy(&CancellationToken::new()).unwrap();

        let account = hierarchy.field("Account").unwrap();
        assert!(account.values.iter().all(|v| v.starts_with("G3")));
        assert_eq!(account.values.len(), 8);
    }

    #[test]
    fn test_all_invalid_values_select_nothing() {
        let selection = SelectionCriteria::new().with_values("Region", ["Atlantis"]);
        let reduced = sample_package()
            .reduce(&selection, &CancellationToken::new())
            .unwrap();
        assert!(reduced.rows.is_empty());
    }

    #[test]
    fn test_empty_selection_selects_nothing() {
        let reduced = sample_package()
            .reduce(&SelectionCriteria::new(), &CancellationToken::new())
            .unwrap();
        assert!(reduced.rows.is_empty());
        assert_eq!(reduced.fields.len(), sample_package().fields.len());

        let hierarchy = reduced.hierarchy(&CancellationToken::new()).unwrap();
        assert_eq!(hierarchy.value_counts(), vec![0, 0, 0]);
    }

    #[test]
    fn test_unknown_field_fails() {
        let selection = SelectionCriteria::new().with_values("Planet", ["Mars"]);
        let err = sample_package()
            .reduce(&selection, &CancellationToken::new())
            .unwrap_err();

        assert!(err.is_field_not_found());
        assert_eq!(
            err.to_string(),
            "The requested reduction field Planet is not found in the reduction hierarchy"
        );
    }

    #[test]
    fn test_tree_prefix_is_not_a_parent() {
        assert!(selects(FieldStructure::Tree, "G1/L0", &["G1".into()]));
        assert!(!selects(FieldStructure::Tree, "G10/L0", &["G1".into()]));
    }

    #[tokio::test]
    async fn test_reduce_writes_output_with_checksum() {
        let dir = TempDir::new().unwrap();
        let master = write_master(&dir);
        let output = reduced_output_path(&master);
        let selection = SelectionCriteria::new().with_values("Region", ["R2"]);

        let artifact = TabularReducer::new()
            .reduce(&master, &selection, &output, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.path, output);
        assert_eq!(artifact.checksum, checksum_file(&output).unwrap());
        assert_eq!(artifact.hierarchy.value_counts(), vec![1, 1, 8]);
    }

    #[tokio::test]
    async fn test_missing_master() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("gone.json");

        let err = TabularReducer::new()
            .extract_hierarchy(&master, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReducerError::MasterMissing { .. }));
        assert!(err.to_string().starts_with("Master file"));
        assert!(err.to_string().ends_with("does not exist"));
    }

    #[tokio::test]
    async fn test_canceled_before_start() {
        let dir = TempDir::new().unwrap();
        let master = write_master(&dir);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = TabularReducer::new()
            .extract_hierarchy(&master, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ReducerError::Canceled));
    }

    #[test]
    fn test_malformed_package() {
        let err = ContentPackage::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, ReducerError::Format(_)));
    }
}

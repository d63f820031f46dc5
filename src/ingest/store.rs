//! Histogram sources.
//!
//! A source is anything that can hand out the snapshots recorded for a plot.
//! The monitoring archive itself is external; [`FileHistogramStore`] reads the
//! JSON export of one archive file.

use crate::error::SourceError;
use crate::histogram::RawHistogram;
use crate::models::{PlotKey, RunNumber, Validity};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A snapshot as stored in a source, before reduction to 1D.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub run: RunNumber,
    pub validity: Validity,
    pub histogram: RawHistogram,
}

/// Anything that can list the snapshots recorded for a plot.
pub trait HistogramStore {
    /// Human readable name of the source, for logs.
    fn name(&self) -> &str;

    /// All snapshots of `key`. An absent plot yields an empty list.
    fn fetch(&self, key: &PlotKey) -> Vec<RawSample>;
}

#[derive(Debug, Deserialize)]
struct StoredObject {
    detector: String,
    task: String,
    name: String,
    run: RunNumber,
    validity: Validity,
    histogram: RawHistogram,
}

#[derive(Debug, Deserialize)]
struct StoreFile {
    #[serde(default)]
    objects: Vec<StoredObject>,
}

/// One JSON source file, parsed once and indexed by plot.
#[derive(Debug, Clone)]
pub struct FileHistogramStore {
    path: PathBuf,
    display_name: String,
    objects: HashMap<PlotKey, Vec<RawSample>>,
}

impl FileHistogramStore {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: StoreFile =
            serde_json::from_str(&content).map_err(|source| SourceError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let mut objects: HashMap<PlotKey, Vec<RawSample>> = HashMap::new();
        for object in file.objects {
            if object.validity.min > object.validity.max {
                return Err(SourceError::BadHistogram {
                    path: path.to_path_buf(),
                    reason: format!(
                        "run {} of {}/{}/{} has validity ending before it starts",
                        object.run, object.detector, object.task, object.name
                    ),
                });
            }
            let key = PlotKey {
                detector: object.detector,
                task: object.task,
                name: object.name,
            };
            objects.entry(key).or_default().push(RawSample {
                run: object.run,
                validity: object.validity,
                histogram: object.histogram,
            });
        }

        debug!(
            "Opened source {} with {} plots",
            path.display(),
            objects.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            display_name: path.display().to_string(),
            objects,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plot_count(&self) -> usize {
        self.objects.len()
    }
}

impl HistogramStore for FileHistogramStore {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn fetch(&self, key: &PlotKey) -> Vec<RawSample> {
        self.objects.get(key).cloned().unwrap_or_default()
    }
}

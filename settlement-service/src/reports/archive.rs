//! On-disk CSV archive of generated reports, keyed by logical file name.

use super::ReportError;
use crate::models::FacTransaction;
use csv::{ReaderBuilder, WriterBuilder};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", file_name))
    }

    /// Stored rows for `file_name`, or `None` if nothing was archived yet.
    pub async fn load(&self, file_name: &str) -> Result<Option<Vec<FacTransaction>>, ReportError> {
        let path = self.path_for(file_name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ReportError::Archive(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut reader = ReaderBuilder::new().from_reader(bytes.as_slice());
        let rows = reader
            .deserialize::<FacTransaction>()
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(rows))
    }

    /// Write rows as `Date Time, Order ID, Amount, Ccy`.
    ///
    /// The file is written beside its final name and renamed into place, so
    /// a reader never observes a partial archive entry.
    pub async fn store(&self, file_name: &str, rows: &[FacTransaction]) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            ReportError::Archive(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;

        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        if rows.is_empty() {
            writer.write_record(["Date Time", "Order ID", "Amount", "Ccy"])?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| ReportError::Archive(format!("Failed to flush CSV: {}", e)))?;

        let path = self.path_for(file_name);
        let partial = self.dir.join(format!("{}.csv.part", file_name));
        fs::write(&partial, data)
            .await
            .map_err(|e| ReportError::Archive(format!("Failed to write {}: {}", partial.display(), e)))?;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| ReportError::Archive(format!("Failed to move {}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), rows = rows.len(), "Report archived");
        Ok(path)
    }
}

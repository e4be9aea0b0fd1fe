//! Treatment type catalog.
//!
//! A keyed collection of treatment types and their unit prices. Costing
//! reads it; catalog management upserts and deletes entries.

use crate::rows::{self, TreatmentTypeRow};
use crate::{snapshot, Error, Result, TreatmentType};
use std::path::{Path, PathBuf};

pub const DEFAULT_TYPES_FILE: &str = "treatment_types.csv";

/// Keyed store of treatment types
pub trait TreatmentTypeCatalog {
    fn find_by_id(&self, id: &str) -> Result<Option<TreatmentType>>;

    fn find_all(&self) -> Result<Vec<TreatmentType>>;

    /// Insert or replace a type by id
    fn save(&mut self, treatment_type: &TreatmentType) -> Result<()>;

    /// Returns whether a type was removed.
    fn delete(&mut self, id: &str) -> Result<bool>;
}

fn validate(treatment_type: &TreatmentType) -> Result<()> {
    rows::check_key("treatment type id", &treatment_type.id)?;
    if !treatment_type.base_price.is_finite() || treatment_type.base_price < 0.0 {
        return Err(Error::Validation(format!(
            "base price for {} must be a non-negative number, got {}",
            treatment_type.id, treatment_type.base_price
        )));
    }
    Ok(())
}

/// Catalog held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    types: Vec<TreatmentType>,
}

impl MemoryCatalog {
    pub fn new(types: Vec<TreatmentType>) -> Self {
        Self { types }
    }
}

impl TreatmentTypeCatalog for MemoryCatalog {
    fn find_by_id(&self, id: &str) -> Result<Option<TreatmentType>> {
        Ok(self.types.iter().find(|t| t.id == id).cloned())
    }

    fn find_all(&self) -> Result<Vec<TreatmentType>> {
        Ok(self.types.clone())
    }

    fn save(&mut self, treatment_type: &TreatmentType) -> Result<()> {
        validate(treatment_type)?;
        self.types.retain(|t| t.id != treatment_type.id);
        self.types.push(treatment_type.clone());
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let before = self.types.len();
        self.types.retain(|t| t.id != id);
        Ok(self.types.len() != before)
    }
}

/// Catalog persisted as a single CSV file, rewritten atomically on change
#[derive(Debug, Clone)]
pub struct CsvTreatmentTypeCatalog {
    path: PathBuf,
}

impl CsvTreatmentTypeCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, types: &[TreatmentType]) -> Result<()> {
        let rows: Vec<TreatmentTypeRow> = types.iter().map(TreatmentTypeRow::from).collect();
        snapshot::write_atomic(&self.path, &rows::encode(&rows)?)
    }
}

impl TreatmentTypeCatalog for CsvTreatmentTypeCatalog {
    fn find_by_id(&self, id: &str) -> Result<Option<TreatmentType>> {
        Ok(self.find_all()?.into_iter().find(|t| t.id == id))
    }

    fn find_all(&self) -> Result<Vec<TreatmentType>> {
        let Some(bytes) = snapshot::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };

        rows::decode::<TreatmentTypeRow>(&bytes)?
            .into_iter()
            .map(|(line, row)| row.parse(line))
            .collect()
    }

    fn save(&mut self, treatment_type: &TreatmentType) -> Result<()> {
        validate(treatment_type)?;

        let mut types = self.find_all()?;
        types.retain(|t| t.id != treatment_type.id);
        types.push(treatment_type.clone());
        self.write(&types)?;

        tracing::debug!("Saved treatment type {} ({} total)", treatment_type.id, types.len());
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let mut types = self.find_all()?;
        let before = types.len();
        types.retain(|t| t.id != id);

        if types.len() == before {
            return Ok(false);
        }

        self.write(&types)?;
        tracing::debug!("Deleted treatment type {}", id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_catalog_upsert_and_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = CsvTreatmentTypeCatalog::new(temp_dir.path().join(DEFAULT_TYPES_FILE));

        catalog.save(&TreatmentType::new("tt-1", "Physiotherapy", 100.0)).unwrap();
        catalog.save(&TreatmentType::new("tt-2", "Massage", 40.0)).unwrap();
        catalog.save(&TreatmentType::new("tt-1", "Physiotherapy", 150.0)).unwrap();

        let all = catalog.find_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(catalog.find_by_id("tt-1").unwrap().unwrap().base_price, 150.0);

        assert!(catalog.delete("tt-2").unwrap());
        assert!(!catalog.delete("tt-2").unwrap());
        assert!(catalog.find_by_id("tt-2").unwrap().is_none());
    }

    #[test]
    fn test_inactive_flag_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = CsvTreatmentTypeCatalog::new(temp_dir.path().join(DEFAULT_TYPES_FILE));

        let mut retired = TreatmentType::new("tt-1", "Old therapy", 20.0);
        retired.active = false;
        catalog.save(&retired).unwrap();

        assert_eq!(catalog.find_by_id("tt-1").unwrap(), Some(retired));
    }

    #[test]
    fn test_rejects_negative_price() {
        let mut catalog = MemoryCatalog::default();
        let err = catalog.save(&TreatmentType::new("tt-1", "Refund", -5.0)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rejects_id_with_delimiter() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = CsvTreatmentTypeCatalog::new(temp_dir.path().join(DEFAULT_TYPES_FILE));
        catalog.save(&TreatmentType::new("tt-1", "Physiotherapy", 100.0)).unwrap();

        let err = catalog.save(&TreatmentType::new("tt,2", "Massage", 40.0)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(catalog.find_all().unwrap().len(), 1);
        assert!(catalog.find_by_id("tt,2").unwrap().is_none());
    }

    #[test]
    fn test_malformed_catalog_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(DEFAULT_TYPES_FILE);
        std::fs::write(&path, "tt-1,Physiotherapy,cheap,true\n").unwrap();

        let catalog = CsvTreatmentTypeCatalog::new(&path);
        assert!(matches!(catalog.find_all(), Err(Error::Malformed { .. })));
    }
}

//! Treatment persistence.
//!
//! Treatments are stored as two collections: one header record per
//! treatment and one record per entry. [`CsvTreatmentStore`] rewrites both
//! collections in full on every change and commits them together, so a
//! reader never joins headers from one `save` with entries from another.

use crate::rows::{self, EntryRow, TreatmentRow};
use crate::snapshot::{self, PendingFile};
use crate::{Error, Result, Treatment, TreatmentEntry};
use fs2::FileExt;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const DEFAULT_TREATMENTS_FILE: &str = "treatments.csv";
pub const DEFAULT_ENTRIES_FILE: &str = "treatment_entries.csv";

/// Repository contract for treatments and their entries
pub trait TreatmentStore {
    /// Treatment with its full entry list, if the id exists.
    fn find_by_id(&self, id: &str) -> Result<Option<Treatment>>;

    fn find_by_patient(&self, patient_id: &str) -> Result<Vec<Treatment>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|t| t.patient_id() == patient_id)
            .collect())
    }

    fn find_by_clinician(&self, clinician_id: &str) -> Result<Vec<Treatment>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|t| t.clinician_id() == clinician_id)
            .collect())
    }

    fn find_all(&self) -> Result<Vec<Treatment>>;

    /// Insert, or replace the treatment and all of its prior entries.
    fn save(&mut self, treatment: &Treatment) -> Result<()>;

    /// Remove the treatment and every entry it owns. Returns whether
    /// anything was removed.
    fn delete(&mut self, id: &str) -> Result<bool>;
}

/// Reject treatments that could not be read back.
fn validate(treatment: &Treatment) -> Result<()> {
    rows::check_key("treatment id", treatment.id())?;
    rows::check_key("patient id", treatment.patient_id())?;
    rows::check_key("clinician id", treatment.clinician_id())?;

    for entry in treatment.entries() {
        rows::check_key("treatment type id", &entry.treatment_type_id)?;
        if entry.quantity == 0 {
            return Err(Error::Validation(format!(
                "entry for type {} in treatment {} has quantity 0",
                entry.treatment_type_id,
                treatment.id()
            )));
        }
    }
    Ok(())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store.
///
/// Applies the same key checks as the CSV store and flattens delimiters in
/// notes the same way, so a treatment reads back identically from either.
#[derive(Debug, Default)]
pub struct MemoryTreatmentStore {
    treatments: Vec<Treatment>,
}

impl MemoryTreatmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TreatmentStore for MemoryTreatmentStore {
    fn find_by_id(&self, id: &str) -> Result<Option<Treatment>> {
        Ok(self.treatments.iter().find(|t| t.id() == id).cloned())
    }

    fn find_all(&self) -> Result<Vec<Treatment>> {
        Ok(self.treatments.clone())
    }

    fn save(&mut self, treatment: &Treatment) -> Result<()> {
        validate(treatment)?;

        let mut stored = treatment.clone();
        stored.update_entries(|entries| {
            for entry in entries.iter_mut() {
                entry.notes = rows::escape_field(&entry.notes);
            }
        });

        self.treatments.retain(|t| t.id() != treatment.id());
        self.treatments.push(stored);
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let before = self.treatments.len();
        self.treatments.retain(|t| t.id() != id);
        Ok(self.treatments.len() != before)
    }
}

// ============================================================================
// CSV store
// ============================================================================

/// Advisory lock held for the duration of one store operation
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn open(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?)
    }

    fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Durable treatment store backed by a header file and an entry file
#[derive(Debug, Clone)]
pub struct CsvTreatmentStore {
    treatments_path: PathBuf,
    entries_path: PathBuf,
    journal_path: PathBuf,
    lock_path: PathBuf,
}

impl CsvTreatmentStore {
    /// Open a store using the default file names inside `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::open(dir.join(DEFAULT_TREATMENTS_FILE), dir.join(DEFAULT_ENTRIES_FILE))
    }

    /// Open a store over explicit header and entry files.
    ///
    /// The commit record and lock file live next to the header file. Any
    /// commit interrupted by a crash is finished before this returns.
    pub fn open(treatments_path: impl Into<PathBuf>, entries_path: impl Into<PathBuf>) -> Result<Self> {
        let treatments_path = treatments_path.into();
        let entries_path = entries_path.into();

        let journal_path = treatments_path.with_extension("commit");
        let lock_path = treatments_path.with_extension("lock");

        if let Some(parent) = treatments_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            treatments_path,
            entries_path,
            journal_path,
            lock_path,
        };

        let _lock = StoreLock::exclusive(&store.lock_path)?;
        store.recover()?;
        Ok(store)
    }

    pub fn treatments_path(&self) -> &Path {
        &self.treatments_path
    }

    pub fn entries_path(&self) -> &Path {
        &self.entries_path
    }

    /// Caller must hold the exclusive lock.
    fn recover(&self) -> Result<bool> {
        snapshot::recover(
            &self.journal_path,
            &[&self.treatments_path, &self.entries_path],
        )
    }

    /// Take a shared lock for reading, finishing any interrupted commit first.
    fn lock_for_read(&self) -> Result<StoreLock> {
        if self.journal_path.exists() {
            let _lock = StoreLock::exclusive(&self.lock_path)?;
            self.recover()?;
        }
        StoreLock::shared(&self.lock_path)
    }

    fn lock_for_write(&self) -> Result<StoreLock> {
        let lock = StoreLock::exclusive(&self.lock_path)?;
        self.recover()?;
        Ok(lock)
    }

    /// Read both collections and join entries onto their headers.
    fn load(&self) -> Result<Vec<Treatment>> {
        let headers = match snapshot::read_optional(&self.treatments_path)? {
            Some(bytes) => rows::decode::<TreatmentRow>(&bytes)?,
            None => Vec::new(),
        };
        let entry_rows = match snapshot::read_optional(&self.entries_path)? {
            Some(bytes) => rows::decode::<EntryRow>(&bytes)?,
            None => Vec::new(),
        };

        let mut entries_by_treatment: HashMap<String, Vec<TreatmentEntry>> = HashMap::new();
        let mut entry_count = 0;
        for (line, row) in entry_rows {
            let entry = row.parse(line)?;
            entries_by_treatment
                .entry(entry.treatment_id.clone())
                .or_default()
                .push(entry);
            entry_count += 1;
        }

        let mut seen = HashSet::new();
        let mut treatments = Vec::with_capacity(headers.len());
        for (line, row) in headers {
            let header = row.parse(line)?;
            if !seen.insert(header.id.clone()) {
                return Err(Error::Malformed {
                    collection: rows::TREATMENTS,
                    line,
                    reason: format!("duplicate treatment id {}", header.id),
                });
            }

            let entries = entries_by_treatment.remove(&header.id).unwrap_or_default();
            let recorded_total = header.total_cost;
            let treatment = Treatment::restore(
                header.id,
                header.patient_id,
                header.clinician_id,
                header.status,
                header.created_at,
                header.paid,
                entries,
            );

            if !totals_match(recorded_total, treatment.total_cost()) {
                return Err(Error::Inconsistent {
                    collection: rows::TREATMENTS,
                    reason: format!(
                        "treatment {} records total {} but its entries sum to {}",
                        treatment.id(),
                        recorded_total,
                        treatment.total_cost()
                    ),
                });
            }
            treatments.push(treatment);
        }

        if let Some(orphan) = entries_by_treatment.keys().next() {
            return Err(Error::Inconsistent {
                collection: rows::ENTRIES,
                reason: format!("entries reference missing treatment {}", orphan),
            });
        }

        tracing::debug!(
            "Loaded {} treatments with {} entries",
            treatments.len(),
            entry_count
        );
        Ok(treatments)
    }

    /// Encode the complete contents of both collections.
    fn encode(&self, treatments: &[Treatment]) -> Result<Vec<PendingFile>> {
        let headers: Vec<TreatmentRow> = treatments
            .iter()
            .map(|t| TreatmentRow {
                id: t.id().to_string(),
                patient_id: t.patient_id().to_string(),
                clinician_id: t.clinician_id().to_string(),
                status: t.status().as_str().to_string(),
                created_at: t.created_at().to_rfc3339(),
                total_cost: t.total_cost(),
                paid: t.is_paid(),
            })
            .collect();

        let entries: Vec<EntryRow> = treatments
            .iter()
            .flat_map(|t| t.entries().iter().map(move |e| EntryRow::for_entry(t.id(), e)))
            .collect();

        Ok(vec![
            PendingFile {
                target: self.treatments_path.clone(),
                contents: rows::encode(&headers)?,
            },
            PendingFile {
                target: self.entries_path.clone(),
                contents: rows::encode(&entries)?,
            },
        ])
    }

    /// Caller must hold the exclusive lock.
    fn write_all(&self, treatments: &[Treatment]) -> Result<()> {
        let files = self.encode(treatments)?;
        snapshot::commit(&self.journal_path, &files)
    }
}

fn totals_match(recorded: f64, derived: f64) -> bool {
    (recorded - derived).abs() <= 1e-9 * recorded.abs().max(derived.abs()).max(1.0)
}

impl TreatmentStore for CsvTreatmentStore {
    fn find_by_id(&self, id: &str) -> Result<Option<Treatment>> {
        let _lock = self.lock_for_read()?;
        Ok(self.load()?.into_iter().find(|t| t.id() == id))
    }

    fn find_all(&self) -> Result<Vec<Treatment>> {
        let _lock = self.lock_for_read()?;
        self.load()
    }

    fn save(&mut self, treatment: &Treatment) -> Result<()> {
        validate(treatment)?;

        let _lock = self.lock_for_write()?;
        let mut treatments = self.load()?;
        treatments.retain(|t| t.id() != treatment.id());
        treatments.push(treatment.clone());
        self.write_all(&treatments)?;

        tracing::debug!(
            "Saved treatment {} with {} entries",
            treatment.id(),
            treatment.entries().len()
        );
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let _lock = self.lock_for_write()?;
        let mut treatments = self.load()?;
        let before = treatments.len();
        treatments.retain(|t| t.id() != id);

        if treatments.len() == before {
            return Ok(false);
        }

        self.write_all(&treatments)?;
        tracing::debug!("Deleted treatment {} and its entries", id);
        Ok(true)
    }
}

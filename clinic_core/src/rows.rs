//! Flat CSV record formats for every persisted collection.
//!
//! Files carry no header row and no quoting. Delimiters and line breaks in
//! free-text fields are replaced by a space before writing, so every record
//! is exactly one line with a fixed field count. Key fields are written
//! verbatim and must pass [`check_key`] first. Reading is strict: the first
//! record that does not parse fails the whole collection.

use crate::users::{Role, User};
use crate::{Error, Result, TreatmentEntry, TreatmentStatus, TreatmentType};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub(crate) const TREATMENTS: &str = "treatments";
pub(crate) const ENTRIES: &str = "treatment entries";
pub(crate) const TREATMENT_TYPES: &str = "treatment types";
pub(crate) const USERS: &str = "users";

fn is_delimiter(c: char) -> bool {
    matches!(c, ',' | '\n' | '\r')
}

/// Replace characters that would break the record layout.
///
/// Only for free text; keys are rejected by [`check_key`] instead.
pub(crate) fn escape_field(value: &str) -> String {
    value
        .chars()
        .map(|c| if is_delimiter(c) { ' ' } else { c })
        .collect()
}

/// Reject a key that could not be written and read back unchanged.
pub(crate) fn check_key(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    if value.contains(is_delimiter) {
        return Err(Error::Validation(format!(
            "{} {:?} must not contain a comma or line break",
            field, value
        )));
    }
    Ok(())
}

/// A persisted record with a fixed number of fields
pub(crate) trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;
    const WIDTH: usize;
}

/// Encode records into the on-disk representation.
pub(crate) fn encode<R: Record>(rows: &[R]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());

    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

/// Decode every record, pairing each with its line number.
pub(crate) fn decode<R: Record>(bytes: &[u8]) -> Result<Vec<(u64, R)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.len() != R::WIDTH {
            return Err(Error::Malformed {
                collection: R::COLLECTION,
                line,
                reason: format!("expected {} fields, found {}", R::WIDTH, record.len()),
            });
        }

        let row = record.deserialize::<R>(None).map_err(|e| Error::Malformed {
            collection: R::COLLECTION,
            line,
            reason: e.to_string(),
        })?;
        rows.push((line, row));
    }

    tracing::debug!("Decoded {} {} records", rows.len(), R::COLLECTION);
    Ok(rows)
}

fn malformed(collection: &'static str, line: u64, reason: impl Into<String>) -> Error {
    Error::Malformed {
        collection,
        line,
        reason: reason.into(),
    }
}

// ============================================================================
// Treatment headers
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TreatmentRow {
    pub id: String,
    pub patient_id: String,
    pub clinician_id: String,
    pub status: String,
    pub created_at: String,
    pub total_cost: f64,
    pub paid: bool,
}

impl Record for TreatmentRow {
    const COLLECTION: &'static str = TREATMENTS;
    const WIDTH: usize = 7;
}

/// Header fields after parsing, waiting to be joined with entries
#[derive(Debug)]
pub(crate) struct TreatmentHeader {
    pub id: String,
    pub patient_id: String,
    pub clinician_id: String,
    pub status: TreatmentStatus,
    pub created_at: DateTime<Utc>,
    pub total_cost: f64,
    pub paid: bool,
}

impl TreatmentRow {
    pub fn parse(self, line: u64) -> Result<TreatmentHeader> {
        let status = self
            .status
            .parse::<TreatmentStatus>()
            .map_err(|e| malformed(TREATMENTS, line, e))?;

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| malformed(TREATMENTS, line, format!("invalid created_at: {}", e)))?
            .with_timezone(&Utc);

        if self.id.is_empty() {
            return Err(malformed(TREATMENTS, line, "empty treatment id"));
        }
        if !self.total_cost.is_finite() || self.total_cost < 0.0 {
            return Err(malformed(
                TREATMENTS,
                line,
                format!("invalid total_cost {}", self.total_cost),
            ));
        }

        Ok(TreatmentHeader {
            id: self.id,
            patient_id: self.patient_id,
            clinician_id: self.clinician_id,
            status,
            created_at,
            total_cost: self.total_cost,
            paid: self.paid,
        })
    }
}

// ============================================================================
// Treatment entries
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EntryRow {
    pub treatment_id: String,
    pub treatment_type_id: String,
    pub quantity: u32,
    pub notes: String,
    pub line_cost: f64,
}

impl Record for EntryRow {
    const COLLECTION: &'static str = ENTRIES;
    const WIDTH: usize = 5;
}

impl EntryRow {
    /// Build the row for an entry owned by `treatment_id`.
    pub fn for_entry(treatment_id: &str, entry: &TreatmentEntry) -> Self {
        Self {
            treatment_id: treatment_id.to_string(),
            treatment_type_id: entry.treatment_type_id.clone(),
            quantity: entry.quantity,
            notes: escape_field(&entry.notes),
            line_cost: entry.line_cost,
        }
    }

    pub fn parse(self, line: u64) -> Result<TreatmentEntry> {
        if self.quantity == 0 {
            return Err(malformed(ENTRIES, line, "quantity must be at least 1"));
        }
        if !self.line_cost.is_finite() || self.line_cost < 0.0 {
            return Err(malformed(
                ENTRIES,
                line,
                format!("invalid line_cost {}", self.line_cost),
            ));
        }

        Ok(TreatmentEntry {
            treatment_id: self.treatment_id,
            treatment_type_id: self.treatment_type_id,
            quantity: self.quantity,
            notes: self.notes,
            line_cost: self.line_cost,
        })
    }
}

// ============================================================================
// Treatment types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TreatmentTypeRow {
    pub id: String,
    pub name: String,
    pub base_price: f64,
    pub active: bool,
}

impl Record for TreatmentTypeRow {
    const COLLECTION: &'static str = TREATMENT_TYPES;
    const WIDTH: usize = 4;
}

impl From<&TreatmentType> for TreatmentTypeRow {
    fn from(t: &TreatmentType) -> Self {
        Self {
            id: t.id.clone(),
            name: escape_field(&t.name),
            base_price: t.base_price,
            active: t.active,
        }
    }
}

impl TreatmentTypeRow {
    pub fn parse(self, line: u64) -> Result<TreatmentType> {
        if !self.base_price.is_finite() || self.base_price < 0.0 {
            return Err(malformed(
                TREATMENT_TYPES,
                line,
                format!("invalid base_price {}", self.base_price),
            ));
        }

        Ok(TreatmentType {
            id: self.id,
            name: self.name,
            base_price: self.base_price,
            active: self.active,
        })
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct UserRow {
    pub id: String,
    pub role: String,
    pub name: String,
    pub email: String,
    pub speciality: String,
    pub marketing_opt_in: bool,
}

impl Record for UserRow {
    const COLLECTION: &'static str = USERS;
    const WIDTH: usize = 6;
}

impl From<&User> for UserRow {
    fn from(user: &User) -> Self {
        let (role, speciality, marketing_opt_in) = match &user.role {
            Role::Patient { marketing_opt_in } => ("PATIENT", "", *marketing_opt_in),
            Role::Clinician { speciality } => ("CLINICIAN", speciality.as_str(), false),
            Role::Administrator => ("ADMIN", "", false),
        };

        Self {
            id: user.id.clone(),
            role: role.to_string(),
            name: escape_field(&user.name),
            email: escape_field(&user.email),
            speciality: escape_field(speciality),
            marketing_opt_in,
        }
    }
}

impl UserRow {
    pub fn parse(self, line: u64) -> Result<User> {
        let role = match self.role.as_str() {
            "PATIENT" => Role::Patient {
                marketing_opt_in: self.marketing_opt_in,
            },
            "CLINICIAN" => Role::Clinician {
                speciality: self.speciality,
            },
            "ADMIN" => Role::Administrator,
            other => return Err(malformed(USERS, line, format!("unknown role '{}'", other))),
        };

        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            role,
        })
    }
}

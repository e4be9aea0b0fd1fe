//! Core domain types for the treatment lifecycle.
//!
//! This module defines:
//! - Treatments and their line items (entries)
//! - The treatment status machine and the derived billing stage
//! - Catalog treatment types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type id used for the placeholder entry created when a treatment with no
/// entries is assessed.
pub const ASSESSMENT_TYPE_ID: &str = "ASSESSMENT";

// ============================================================================
// Status
// ============================================================================

/// Persisted status of a treatment. Only ever moves `New -> Assessed`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreatmentStatus {
    New,
    Assessed,
}

impl TreatmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentStatus::New => "NEW",
            TreatmentStatus::Assessed => "ASSESSED",
        }
    }
}

impl fmt::Display for TreatmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreatmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(TreatmentStatus::New),
            "ASSESSED" => Ok(TreatmentStatus::Assessed),
            other => Err(format!("unknown treatment status '{}'", other)),
        }
    }
}

/// Billing view of a treatment, derived from status, total and paid flag.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    Assessed,
    Costed,
    Paid,
}

// ============================================================================
// Entries
// ============================================================================

/// One billable line within a treatment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TreatmentEntry {
    /// Back-reference to the owning treatment, stamped by the owner.
    pub treatment_id: String,
    pub treatment_type_id: String,
    pub quantity: u32,
    pub notes: String,
    /// `quantity * base_price` as of the last costing; 0 until costed.
    pub line_cost: f64,
}

impl TreatmentEntry {
    pub fn new(treatment_type_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            treatment_id: String::new(),
            treatment_type_id: treatment_type_id.into(),
            quantity,
            notes: String::new(),
            line_cost: 0.0,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

// ============================================================================
// Treatment
// ============================================================================

/// A booked course of care and its line items.
///
/// Identity, participants and creation time are fixed at construction.
/// `total_cost` is never set directly: every path that touches the entries
/// recomputes it, so it always equals the sum of the entries' line costs.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Treatment {
    id: String,
    patient_id: String,
    clinician_id: String,
    status: TreatmentStatus,
    created_at: DateTime<Utc>,
    total_cost: f64,
    paid: bool,
    entries: Vec<TreatmentEntry>,
}

impl Treatment {
    /// Create a fresh, uncosted, unpaid treatment in status `New`.
    pub fn new(
        id: impl Into<String>,
        patient_id: impl Into<String>,
        clinician_id: impl Into<String>,
        entries: Vec<TreatmentEntry>,
    ) -> Self {
        let mut treatment = Self {
            id: id.into(),
            patient_id: patient_id.into(),
            clinician_id: clinician_id.into(),
            status: TreatmentStatus::New,
            created_at: Utc::now(),
            total_cost: 0.0,
            paid: false,
            entries,
        };
        treatment.normalize();
        treatment
    }

    /// Rebuild a treatment from persisted parts.
    pub(crate) fn restore(
        id: String,
        patient_id: String,
        clinician_id: String,
        status: TreatmentStatus,
        created_at: DateTime<Utc>,
        paid: bool,
        entries: Vec<TreatmentEntry>,
    ) -> Self {
        let mut treatment = Self {
            id,
            patient_id,
            clinician_id,
            status,
            created_at,
            total_cost: 0.0,
            paid,
            entries,
        };
        treatment.normalize();
        treatment
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn clinician_id(&self) -> &str {
        &self.clinician_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TreatmentStatus {
        self.status
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn is_paid(&self) -> bool {
        self.paid
    }

    pub fn entries(&self) -> &[TreatmentEntry] {
        &self.entries
    }

    pub fn stage(&self) -> Stage {
        match self.status {
            TreatmentStatus::New => Stage::New,
            TreatmentStatus::Assessed if self.paid => Stage::Paid,
            TreatmentStatus::Assessed if self.total_cost > 0.0 => Stage::Costed,
            TreatmentStatus::Assessed => Stage::Assessed,
        }
    }

    /// Mutate the entry list; back-references and the total are refreshed
    /// afterwards.
    pub(crate) fn update_entries<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Vec<TreatmentEntry>),
    {
        f(&mut self.entries);
        self.normalize();
    }

    pub(crate) fn mark_assessed(&mut self) {
        self.status = TreatmentStatus::Assessed;
    }

    pub(crate) fn mark_paid(&mut self) {
        self.paid = true;
    }

    fn normalize(&mut self) {
        for entry in &mut self.entries {
            if entry.treatment_id != self.id {
                entry.treatment_id = self.id.clone();
            }
        }
        self.total_cost = self.entries.iter().map(|e| e.line_cost).sum();
    }
}

// ============================================================================
// Catalog Type
// ============================================================================

/// Catalog item defining the per-unit price of a kind of treatment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TreatmentType {
    pub id: String,
    pub name: String,
    pub base_price: f64,
    pub active: bool,
}

impl TreatmentType {
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_price,
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_treatment_stamps_entries_and_zero_total() {
        let t = Treatment::new("t-1", "p-1", "c-1", vec![TreatmentEntry::new("tt-1", 2)]);

        assert_eq!(t.status(), TreatmentStatus::New);
        assert_eq!(t.entries()[0].treatment_id, "t-1");
        assert_eq!(t.total_cost(), 0.0);
        assert!(!t.is_paid());
        assert_eq!(t.stage(), Stage::New);
    }

    #[test]
    fn test_identity_survives_entry_rewrites() {
        let mut t = Treatment::new("t-1", "p-1", "c-1", vec![TreatmentEntry::new("tt-1", 1)]);
        let created_at = t.created_at();

        t.update_entries(|entries| {
            let mut foreign = TreatmentEntry::new("tt-2", 1);
            foreign.treatment_id = "t-9".into();
            *entries = vec![foreign];
        });
        t.mark_assessed();
        t.mark_paid();

        assert_eq!(t.id(), "t-1");
        assert_eq!(t.patient_id(), "p-1");
        assert_eq!(t.clinician_id(), "c-1");
        assert_eq!(t.created_at(), created_at);
        assert_eq!(t.entries()[0].treatment_id, "t-1");
    }

    #[test]
    fn test_update_entries_recomputes_total() {
        let mut t = Treatment::new("t-1", "p-1", "c-1", vec![]);
        t.update_entries(|entries| {
            let mut a = TreatmentEntry::new("tt-1", 1);
            a.line_cost = 40.0;
            let mut b = TreatmentEntry::new("tt-2", 3);
            b.line_cost = 60.5;
            entries.push(a);
            entries.push(b);
        });

        assert_eq!(t.total_cost(), 100.5);
        assert!(t.entries().iter().all(|e| e.treatment_id == "t-1"));
    }

    #[test]
    fn test_stage_progression() {
        let mut t = Treatment::new("t-1", "p-1", "c-1", vec![TreatmentEntry::new("tt-1", 1)]);
        t.mark_assessed();
        assert_eq!(t.stage(), Stage::Assessed);

        t.update_entries(|entries| entries[0].line_cost = 10.0);
        assert_eq!(t.stage(), Stage::Costed);

        t.mark_paid();
        assert_eq!(t.stage(), Stage::Paid);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("NEW".parse::<TreatmentStatus>(), Ok(TreatmentStatus::New));
        assert_eq!("ASSESSED".parse::<TreatmentStatus>(), Ok(TreatmentStatus::Assessed));
        assert!("assessed".parse::<TreatmentStatus>().is_err());
        assert!("COSTED".parse::<TreatmentStatus>().is_err());
    }
}

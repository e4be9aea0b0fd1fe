//! Treatment lifecycle engine.
//!
//! Enforces the status machine on top of a [`TreatmentStore`]:
//!
//! | operation           | requires                | effect                         |
//! |---------------------|-------------------------|--------------------------------|
//! | `create`/`allocate` | patient, clinician known | new treatment in `NEW`        |
//! | `assess`            | status `NEW`            | annotate entries, `ASSESSED`   |
//! | `record_assessment` | status `NEW`            | replace entries, `ASSESSED`    |
//! | `cost`              | status `ASSESSED`       | recompute line costs and total |
//! | `mark_paid`         | total cost > 0          | paid = true                    |
//!
//! Every mutation loads the current treatment, applies the change and saves
//! the whole treatment back through the store.

use crate::catalog::TreatmentTypeCatalog;
use crate::error::EntityKind;
use crate::store::TreatmentStore;
use crate::users::{ClinicianLookup, PatientLookup, User};
use crate::{
    Error, Result, Treatment, TreatmentEntry, TreatmentStatus, TreatmentType, ASSESSMENT_TYPE_ID,
};
use uuid::Uuid;

/// Lifecycle operations over a treatment store, a type catalog and a user
/// directory
pub struct TreatmentEngine<S, C, D> {
    store: S,
    catalog: C,
    directory: D,
}

impl<S, C, D> TreatmentEngine<S, C, D>
where
    S: TreatmentStore,
    C: TreatmentTypeCatalog,
    D: PatientLookup + ClinicianLookup,
{
    pub fn new(store: S, catalog: C, directory: D) -> Self {
        Self {
            store,
            catalog,
            directory,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Book a new treatment with a single uncosted entry.
    pub fn create(
        &mut self,
        patient_id: &str,
        clinician_id: &str,
        treatment_type_id: &str,
        quantity: u32,
    ) -> Result<Treatment> {
        self.require_participants(patient_id, clinician_id, "create treatment")?;
        require_quantity(quantity)?;

        let treatment = Treatment::new(
            Uuid::new_v4().to_string(),
            patient_id,
            clinician_id,
            vec![TreatmentEntry::new(treatment_type_id, quantity)],
        );
        self.store.save(&treatment)?;

        tracing::info!(
            "Created treatment {} for patient {} with clinician {}",
            treatment.id(),
            patient_id,
            clinician_id
        );
        Ok(treatment)
    }

    /// Book a new treatment with one single-unit entry per known type id.
    ///
    /// Unknown type ids are skipped.
    pub fn allocate(
        &mut self,
        patient_id: &str,
        clinician_id: &str,
        treatment_type_ids: &[String],
    ) -> Result<Treatment> {
        self.require_participants(patient_id, clinician_id, "allocate treatment")?;

        let mut entries = Vec::with_capacity(treatment_type_ids.len());
        for type_id in treatment_type_ids {
            match self.catalog.find_by_id(type_id)? {
                Some(t) => entries.push(TreatmentEntry::new(t.id, 1)),
                None => tracing::warn!("Skipping unknown treatment type {} during allocation", type_id),
            }
        }

        let treatment = Treatment::new(Uuid::new_v4().to_string(), patient_id, clinician_id, entries);
        self.store.save(&treatment)?;

        tracing::info!(
            "Allocated treatment {} with {} entries",
            treatment.id(),
            treatment.entries().len()
        );
        Ok(treatment)
    }

    fn require_participants(&self, patient_id: &str, clinician_id: &str, operation: &'static str) -> Result<()> {
        if self.directory.find_patient(patient_id)?.is_none() {
            return Err(Error::not_found(EntityKind::Patient, patient_id, operation));
        }
        if self.directory.find_clinician(clinician_id)?.is_none() {
            return Err(Error::not_found(EntityKind::Clinician, clinician_id, operation));
        }
        Ok(())
    }

    // ========================================================================
    // Assessment
    // ========================================================================

    /// Attach clinical notes and advance the treatment to `ASSESSED`.
    ///
    /// With no entries, a single placeholder assessment entry carries the
    /// notes; otherwise the notes go on the first entry.
    pub fn assess(&mut self, treatment_id: &str, notes: &str) -> Result<Treatment> {
        let mut treatment = self.load(treatment_id, "assess")?;
        require_status(&treatment, TreatmentStatus::New, "assess")?;

        treatment.update_entries(|entries| match entries.first_mut() {
            Some(first) => first.notes = notes.to_string(),
            None => entries.push(TreatmentEntry::new(ASSESSMENT_TYPE_ID, 1).with_notes(notes)),
        });
        treatment.mark_assessed();
        self.store.save(&treatment)?;

        tracing::info!("Assessed treatment {}", treatment.id());
        Ok(treatment)
    }

    /// Replace the entry list wholesale and advance to `ASSESSED`.
    ///
    /// Supplied line costs are discarded; costing computes them.
    pub fn record_assessment(
        &mut self,
        treatment_id: &str,
        entries: Vec<TreatmentEntry>,
    ) -> Result<Treatment> {
        let mut treatment = self.load(treatment_id, "record assessment for")?;
        require_status(&treatment, TreatmentStatus::New, "record assessment for")?;
        for entry in &entries {
            require_quantity(entry.quantity)?;
        }

        treatment.update_entries(|current| {
            *current = entries;
            for entry in current.iter_mut() {
                entry.line_cost = 0.0;
            }
        });
        treatment.mark_assessed();
        self.store.save(&treatment)?;

        tracing::info!(
            "Recorded assessment for treatment {} ({} entries)",
            treatment.id(),
            treatment.entries().len()
        );
        Ok(treatment)
    }

    // ========================================================================
    // Billing
    // ========================================================================

    /// Recompute every line cost from current catalog prices and return the
    /// new total.
    ///
    /// Entries whose type is no longer in the catalog keep their previous
    /// line cost. Re-costing overwrites the previous total.
    pub fn cost(&mut self, treatment_id: &str) -> Result<f64> {
        let mut treatment = self.load(treatment_id, "cost")?;
        require_status(&treatment, TreatmentStatus::Assessed, "cost")?;

        let mut prices = Vec::with_capacity(treatment.entries().len());
        for entry in treatment.entries() {
            let price = self
                .catalog
                .find_by_id(&entry.treatment_type_id)?
                .map(|t| t.base_price);
            if price.is_none() {
                tracing::warn!(
                    "Treatment type {} not in catalog; keeping line cost for treatment {}",
                    entry.treatment_type_id,
                    treatment.id()
                );
            }
            prices.push(price);
        }

        treatment.update_entries(|entries| {
            for (entry, price) in entries.iter_mut().zip(prices) {
                if let Some(price) = price {
                    entry.line_cost = price * f64::from(entry.quantity);
                }
            }
        });
        self.store.save(&treatment)?;

        tracing::info!("Costed treatment {} at {:.2}", treatment.id(), treatment.total_cost());
        Ok(treatment.total_cost())
    }

    /// Record payment of a costed treatment.
    pub fn mark_paid(&mut self, treatment_id: &str) -> Result<Treatment> {
        let mut treatment = self.load(treatment_id, "mark paid")?;
        if treatment.total_cost() <= 0.0 {
            return Err(Error::invalid_state(
                treatment_id,
                "mark paid",
                "total cost is zero or has not been calculated",
            ));
        }

        treatment.mark_paid();
        self.store.save(&treatment)?;

        tracing::info!("Marked treatment {} as paid", treatment.id());
        Ok(treatment)
    }

    // ========================================================================
    // Administration and queries
    // ========================================================================

    pub fn get(&self, treatment_id: &str) -> Result<Treatment> {
        self.load(treatment_id, "view")
    }

    /// Remove a treatment and its entries (administrative correction).
    pub fn delete(&mut self, treatment_id: &str) -> Result<()> {
        if !self.store.delete(treatment_id)? {
            return Err(Error::not_found(EntityKind::Treatment, treatment_id, "delete"));
        }
        tracing::info!("Deleted treatment {}", treatment_id);
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<Treatment>> {
        self.store.find_all()
    }

    pub fn by_status(&self, status: TreatmentStatus) -> Result<Vec<Treatment>> {
        Ok(self
            .store
            .find_all()?
            .into_iter()
            .filter(|t| t.status() == status)
            .collect())
    }

    pub fn for_clinician(
        &self,
        clinician_id: &str,
        status: Option<TreatmentStatus>,
    ) -> Result<Vec<Treatment>> {
        Ok(self
            .store
            .find_by_clinician(clinician_id)?
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status() == s))
            .collect())
    }

    pub fn for_patient(&self, patient_id: &str) -> Result<Vec<Treatment>> {
        self.store.find_by_patient(patient_id)
    }

    /// Assessed treatments that have not been costed yet
    pub fn pending_costing(&self) -> Result<Vec<Treatment>> {
        Ok(self
            .by_status(TreatmentStatus::Assessed)?
            .into_iter()
            .filter(|t| t.total_cost() == 0.0)
            .collect())
    }

    pub fn clinicians_for_speciality(&self, speciality: &str) -> Result<Vec<User>> {
        self.directory.find_by_speciality(speciality)
    }

    /// Catalog types whose name equals `speciality`, ignoring case
    pub fn types_for_speciality(&self, speciality: &str) -> Result<Vec<TreatmentType>> {
        let wanted = speciality.to_lowercase();
        Ok(self
            .catalog
            .find_all()?
            .into_iter()
            .filter(|t| t.name.to_lowercase() == wanted)
            .collect())
    }

    // ========================================================================
    // Catalog management
    // ========================================================================

    pub fn treatment_types(&self) -> Result<Vec<TreatmentType>> {
        self.catalog.find_all()
    }

    pub fn add_treatment_type(&mut self, name: &str, base_price: f64) -> Result<TreatmentType> {
        let treatment_type = TreatmentType::new(Uuid::new_v4().to_string(), name, base_price);
        self.save_treatment_type(&treatment_type)?;
        Ok(treatment_type)
    }

    pub fn save_treatment_type(&mut self, treatment_type: &TreatmentType) -> Result<()> {
        self.catalog.save(treatment_type)?;
        tracing::info!(
            "Saved treatment type {} ({}) at {:.2}",
            treatment_type.id,
            treatment_type.name,
            treatment_type.base_price
        );
        Ok(())
    }

    pub fn remove_treatment_type(&mut self, id: &str) -> Result<()> {
        if !self.catalog.delete(id)? {
            return Err(Error::not_found(EntityKind::TreatmentType, id, "remove treatment type"));
        }
        tracing::info!("Removed treatment type {}", id);
        Ok(())
    }

    fn load(&self, treatment_id: &str, operation: &'static str) -> Result<Treatment> {
        self.store
            .find_by_id(treatment_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Treatment, treatment_id, operation))
    }
}

fn require_status(treatment: &Treatment, expected: TreatmentStatus, operation: &'static str) -> Result<()> {
    if treatment.status() != expected {
        return Err(Error::invalid_state(
            treatment.id(),
            operation,
            format!("status is {}, expected {}", treatment.status(), expected),
        ));
    }
    Ok(())
}

fn require_quantity(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(Error::Validation("quantity must be at least 1".into()));
    }
    Ok(())
}

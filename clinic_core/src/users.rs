//! People known to the clinic and the lookups the lifecycle engine needs.
//!
//! Every user shares one identity shape; role-specific data lives only on
//! its [`Role`] variant.

use crate::rows::{self, UserRow};
use crate::{snapshot, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_USERS_FILE: &str = "users.csv";

/// Role of a system user and the fields only that role carries
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    Patient { marketing_opt_in: bool },
    Clinician { speciality: String },
    Administrator,
}

/// A patient, clinician or administrator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl User {
    pub fn patient(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role: Role::Patient {
                marketing_opt_in: false,
            },
        }
    }

    pub fn clinician(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        speciality: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role: Role::Clinician {
                speciality: speciality.into(),
            },
        }
    }

    pub fn is_patient(&self) -> bool {
        matches!(self.role, Role::Patient { .. })
    }

    pub fn is_clinician(&self) -> bool {
        matches!(self.role, Role::Clinician { .. })
    }

    pub fn speciality(&self) -> Option<&str> {
        match &self.role {
            Role::Clinician { speciality } => Some(speciality),
            _ => None,
        }
    }

    /// Case-insensitive exact match against the clinician's speciality.
    pub fn has_speciality(&self, speciality: &str) -> bool {
        self.speciality()
            .map(|s| s.to_lowercase() == speciality.to_lowercase())
            .unwrap_or(false)
    }
}

/// Resolve patients by id
pub trait PatientLookup {
    fn find_patient(&self, id: &str) -> Result<Option<User>>;
}

/// Resolve clinicians by id or speciality
pub trait ClinicianLookup {
    fn find_clinician(&self, id: &str) -> Result<Option<User>>;
    fn find_by_speciality(&self, speciality: &str) -> Result<Vec<User>>;
}

impl PatientLookup for Vec<User> {
    fn find_patient(&self, id: &str) -> Result<Option<User>> {
        Ok(self.iter().find(|u| u.id == id && u.is_patient()).cloned())
    }
}

impl ClinicianLookup for Vec<User> {
    fn find_clinician(&self, id: &str) -> Result<Option<User>> {
        Ok(self.iter().find(|u| u.id == id && u.is_clinician()).cloned())
    }

    fn find_by_speciality(&self, speciality: &str) -> Result<Vec<User>> {
        Ok(self
            .iter()
            .filter(|u| u.has_speciality(speciality))
            .cloned()
            .collect())
    }
}

/// CSV-backed directory of users
pub struct UserDirectory {
    path: PathBuf,
}

impl UserDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn find_all(&self) -> Result<Vec<User>> {
        let Some(bytes) = snapshot::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };

        rows::decode::<UserRow>(&bytes)?
            .into_iter()
            .map(|(line, row)| row.parse(line))
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.find_all()?.into_iter().find(|u| u.id == id))
    }

    /// Insert or replace a user by id
    pub fn save(&mut self, user: &User) -> Result<()> {
        rows::check_key("user id", &user.id)?;

        let mut users = self.find_all()?;
        users.retain(|u| u.id != user.id);
        users.push(user.clone());

        let rows: Vec<UserRow> = users.iter().map(UserRow::from).collect();
        snapshot::write_atomic(&self.path, &rows::encode(&rows)?)?;

        tracing::info!("Saved user {} ({} total)", user.id, users.len());
        Ok(())
    }
}

impl PatientLookup for UserDirectory {
    fn find_patient(&self, id: &str) -> Result<Option<User>> {
        Ok(self.find_by_id(id)?.filter(User::is_patient))
    }
}

impl ClinicianLookup for UserDirectory {
    fn find_clinician(&self, id: &str) -> Result<Option<User>> {
        Ok(self.find_by_id(id)?.filter(User::is_clinician))
    }

    fn find_by_speciality(&self, speciality: &str) -> Result<Vec<User>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|u| u.has_speciality(speciality))
            .collect())
    }
}

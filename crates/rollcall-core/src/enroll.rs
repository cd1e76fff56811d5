//! Enrollment: validate a new student and write them with a fresh UID.

use crate::gallery::established_dim;
use crate::store::{StoreError, StudentStore};
use crate::types::{Descriptor, NewStudent, Uid};
use thiserror::Error;
use uuid::Uuid;

/// UID length in hex characters. Code space is 16^8 (~4.3 billion).
pub const UID_LEN: usize = 8;

/// Candidate UIDs tried before enrollment gives up.
pub const MAX_UID_ATTEMPTS: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("student name must not be empty")]
    EmptyName,
    #[error("descriptor is empty")]
    EmptyDescriptor,
    #[error("descriptor contains non-finite values")]
    NonFiniteDescriptor,
    #[error("descriptor has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid enrollment: {0}")]
    Validation(#[from] ValidationError),
    #[error("no unused uid found after {0} attempts")]
    UidSpaceExhausted(usize),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// A freshly enrolled student.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrolled {
    pub id: i64,
    pub uid: Uid,
    pub name: String,
}

/// Random UID candidate: the first [`UID_LEN`] hex digits of a v4 UUID, upper-cased.
pub fn random_uid() -> Uid {
    let hex = Uuid::new_v4().simple().to_string();
    Uid::new(hex[..UID_LEN].to_uppercase())
}

/// Enroll a student with randomly generated UIDs.
///
/// `default_dim` applies only while the store is empty; afterwards the
/// dimensionality of the first enrolled student is authoritative.
pub fn enroll<S: StudentStore + ?Sized>(
    store: &S,
    name: &str,
    descriptor: &Descriptor,
    default_dim: usize,
) -> Result<Enrolled, EnrollError> {
    enroll_with(store, name, descriptor, default_dim, random_uid)
}

/// Enroll using a caller-supplied UID generator.
pub fn enroll_with<S, G>(
    store: &S,
    name: &str,
    descriptor: &Descriptor,
    default_dim: usize,
    mut next_uid: G,
) -> Result<Enrolled, EnrollError>
where
    S: StudentStore + ?Sized,
    G: FnMut() -> Uid,
{
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    if descriptor.is_empty() {
        return Err(ValidationError::EmptyDescriptor.into());
    }
    if !descriptor.is_finite() {
        return Err(ValidationError::NonFiniteDescriptor.into());
    }

    let expected = established_dim(&store.list_students()?).unwrap_or(default_dim);
    if descriptor.len() != expected {
        return Err(ValidationError::DimensionMismatch {
            expected,
            actual: descriptor.len(),
        }
        .into());
    }

    for attempt in 1..=MAX_UID_ATTEMPTS {
        let uid = next_uid();
        if store.student_exists(&uid)? {
            tracing::debug!(%uid, attempt, "uid collision; retrying");
            continue;
        }

        let student = NewStudent {
            uid: uid.clone(),
            name: name.to_string(),
            descriptor: descriptor.clone(),
        };
        match store.insert_student(&student) {
            Ok(id) => {
                tracing::info!(%uid, name, id, "student enrolled");
                return Ok(Enrolled {
                    id,
                    uid,
                    name: name.to_string(),
                });
            }
            // Lost a race with another writer between the check and the insert.
            Err(StoreError::DuplicateUid(_)) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(EnrollError::UidSpaceExhausted(MAX_UID_ATTEMPTS))
}

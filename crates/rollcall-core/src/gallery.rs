//! Descriptor gallery: the enrolled students loaded for one session.

use crate::store::{StoreError, StudentStore};
use crate::types::{Descriptor, StudentRecord, Uid, DESCRIPTOR_COMPONENT_BYTES};
use thiserror::Error;

/// Default descriptor dimensionality of the external encoder.
pub const DEFAULT_DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("no students enrolled; enroll at least one student before starting a session")]
    EmptyGallery,
    #[error("corrupt descriptor for student {uid}: expected {expected} bytes, got {actual}")]
    CorruptRecord {
        uid: Uid,
        expected: usize,
        actual: usize,
    },
    #[error("none of the {} enrolled students has a usable descriptor", .skipped.len())]
    NoUsableRecords { skipped: Vec<GalleryError> },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// One enrolled student with a decoded reference descriptor.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub uid: Uid,
    pub name: String,
    pub descriptor: Descriptor,
}

/// Read-only set of reference descriptors, in enrollment order.
///
/// Every entry has the same dimensionality. Shared with `Arc` when matching
/// runs off the session thread.
#[derive(Debug, Clone)]
pub struct Gallery {
    dim: usize,
    entries: Vec<GalleryEntry>,
}

/// A loaded gallery plus the records that were skipped as corrupt.
#[derive(Debug)]
pub struct GalleryLoad {
    pub gallery: Gallery,
    pub skipped: Vec<GalleryError>,
}

impl Gallery {
    /// Build a gallery from already-decoded entries. Rejects the first entry
    /// whose dimensionality differs from `dim`.
    pub fn from_entries(dim: usize, entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        if let Some(bad) = entries.iter().find(|e| e.descriptor.len() != dim) {
            return Err(GalleryError::CorruptRecord {
                uid: bad.uid.clone(),
                expected: dim * DESCRIPTOR_COMPONENT_BYTES,
                actual: bad.descriptor.len() * DESCRIPTOR_COMPONENT_BYTES,
            });
        }
        Ok(Self { dim, entries })
    }

    /// Load every enrolled student, decoding at the dimensionality the
    /// stored students already use. `fallback_dim` applies only when no
    /// stored blob has a whole number of components.
    pub fn load_established<S: StudentStore + ?Sized>(
        store: &S,
        fallback_dim: usize,
    ) -> Result<GalleryLoad, GalleryError> {
        let records = store.list_students()?;
        let dim = established_dim(&records).unwrap_or(fallback_dim);
        Self::from_records(&records, dim)
    }

    /// Load every enrolled student from the store at a fixed `dim`.
    ///
    /// Corrupt records are skipped with a warning and returned in
    /// [`GalleryLoad::skipped`]. Fails with [`GalleryError::EmptyGallery`]
    /// when nobody is enrolled and [`GalleryError::NoUsableRecords`] when
    /// every record was skipped.
    pub fn load<S: StudentStore + ?Sized>(store: &S, dim: usize) -> Result<GalleryLoad, GalleryError> {
        Self::from_records(&store.list_students()?, dim)
    }

    fn from_records(records: &[StudentRecord], dim: usize) -> Result<GalleryLoad, GalleryError> {
        if records.is_empty() {
            return Err(GalleryError::EmptyGallery);
        }

        let mut entries = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();
        for record in records {
            match Self::decode(record, dim) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(uid = %record.uid, error = %err, "skipping student record");
                    skipped.push(err);
                }
            }
        }

        if entries.is_empty() {
            return Err(GalleryError::NoUsableRecords { skipped });
        }

        tracing::info!(
            students = entries.len(),
            skipped = skipped.len(),
            dim,
            "gallery loaded"
        );

        Ok(GalleryLoad {
            gallery: Self { dim, entries },
            skipped,
        })
    }

    /// Decode a stored record, checking the blob against `dim`.
    pub fn decode(record: &StudentRecord, dim: usize) -> Result<GalleryEntry, GalleryError> {
        let descriptor = Descriptor::from_le_bytes(&record.descriptor, dim)
            .filter(Descriptor::is_finite)
            .ok_or_else(|| GalleryError::CorruptRecord {
                uid: record.uid.clone(),
                expected: dim * DESCRIPTOR_COMPONENT_BYTES,
                actual: record.descriptor.len(),
            })?;
        Ok(GalleryEntry {
            uid: record.uid.clone(),
            name: record.name.clone(),
            descriptor,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn get(&self, uid: &Uid) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| &e.uid == uid)
    }
}

/// Dimensionality of the first stored student whose blob holds a whole
/// number of components. Once set, it is authoritative for enrollment and
/// for loading.
pub fn established_dim(records: &[StudentRecord]) -> Option<usize> {
    records.iter().find_map(StudentRecord::descriptor_dim)
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one descriptor component in the stored blob (little-endian f64).
pub const DESCRIPTOR_COMPONENT_BYTES: usize = std::mem::size_of::<f64>();

/// Short opaque student identifier assigned at enrollment (e.g. `"3FA85F64"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Normalise user input before lookup: trim and upper-case.
    pub fn normalize(input: &str) -> Self {
        Self(input.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face descriptor produced by the external encoder (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f64>,
}

impl Descriptor {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Callers must check dimensionality first; extra components of the
    /// longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Encode as a blob of little-endian f64 values.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * DESCRIPTOR_COMPONENT_BYTES);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode a stored blob. Returns `None` unless the blob is exactly `dim` components long.
    pub fn from_le_bytes(bytes: &[u8], dim: usize) -> Option<Self> {
        if bytes.len() != dim * DESCRIPTOR_COMPONENT_BYTES {
            return None;
        }
        let values = bytes
            .chunks_exact(DESCRIPTOR_COMPONENT_BYTES)
            .map(|chunk| {
                let mut raw = [0u8; DESCRIPTOR_COMPONENT_BYTES];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Some(Self { values })
    }
}

/// A student row as it comes out of the store. The descriptor is left as the
/// raw blob; [`crate::Gallery`] decodes and validates it.
#[derive(Debug, Clone)]
pub struct StudentRecord {
    /// Store-assigned row id.
    pub id: i64,
    pub uid: Uid,
    pub name: String,
    pub descriptor: Vec<u8>,
}

impl StudentRecord {
    /// Dimensionality implied by the blob length, if it is whole.
    pub fn descriptor_dim(&self) -> Option<usize> {
        let len = self.descriptor.len();
        (len > 0 && len % DESCRIPTOR_COMPONENT_BYTES == 0).then(|| len / DESCRIPTOR_COMPONENT_BYTES)
    }
}

/// A student about to be written by enrollment.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub uid: Uid,
    pub name: String,
    pub descriptor: Descriptor,
}

/// One presence mark: a student seen in a class at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub uid: Uid,
    pub class_name: String,
    pub at: DateTime<Utc>,
}

/// Attendance joined with the student's name, as read back for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRow {
    pub uid: Uid,
    pub name: String,
    pub class_name: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_blob_decode_rejects_wrong_length() {
        let d = Descriptor::new(vec![1.0, 2.0, 3.0]);
        let bytes = d.to_le_bytes();
        assert_eq!(bytes.len(), 24);
        assert!(Descriptor::from_le_bytes(&bytes, 4).is_none());
        assert!(Descriptor::from_le_bytes(&bytes[..20], 3).is_none());
        assert_eq!(Descriptor::from_le_bytes(&bytes, 3), Some(d));
    }

    #[test]
    fn test_uid_normalize() {
        assert_eq!(Uid::normalize("  ab12cd34 \n").as_str(), "AB12CD34");
    }

    #[test]
    fn test_record_descriptor_dim() {
        let mut record = StudentRecord {
            id: 1,
            uid: Uid::new("A"),
            name: "Alice".into(),
            descriptor: vec![0u8; 128 * 8],
        };
        assert_eq!(record.descriptor_dim(), Some(128));
        record.descriptor.pop();
        assert_eq!(record.descriptor_dim(), None);
        record.descriptor.clear();
        assert_eq!(record.descriptor_dim(), None);
    }
}

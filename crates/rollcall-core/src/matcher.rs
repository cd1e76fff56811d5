//! Match resolver: nearest gallery entry under a distance threshold.

use crate::gallery::Gallery;
use crate::types::{Descriptor, Uid};

/// Default acceptance threshold, the encoder's calibrated tolerance.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Who a detected face resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Known { uid: Uid, name: String },
    Unknown,
}

/// Result of resolving one observed descriptor against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: Identity,
    /// Distance to the nearest reference, when any comparison was made.
    pub distance: Option<f64>,
}

impl Resolution {
    pub fn unknown(distance: Option<f64>) -> Self {
        Self {
            identity: Identity::Unknown,
            distance,
        }
    }

    pub fn uid(&self) -> Option<&Uid> {
        match &self.identity {
            Identity::Known { uid, .. } => Some(uid),
            Identity::Unknown => None,
        }
    }
}

/// Strategy for resolving an observed descriptor against the gallery.
///
/// Implementations must be pure: no side effects and safe to call
/// concurrently on a shared gallery.
pub trait Matcher {
    fn resolve(&self, probe: &Descriptor, gallery: &Gallery, threshold: f64) -> Resolution;

    /// Resolve every face seen in one frame.
    fn resolve_all(&self, probes: &[Descriptor], gallery: &Gallery, threshold: f64) -> Vec<Resolution> {
        probes
            .iter()
            .map(|probe| self.resolve(probe, gallery, threshold))
            .collect()
    }
}

/// Euclidean nearest-neighbour matcher.
///
/// Compares against every gallery entry. Ties go to the earliest entry.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn resolve(&self, probe: &Descriptor, gallery: &Gallery, threshold: f64) -> Resolution {
        if probe.len() != gallery.dim() || !probe.is_finite() {
            tracing::debug!(
                probe_dim = probe.len(),
                gallery_dim = gallery.dim(),
                "unusable descriptor; treating as unknown"
            );
            return Resolution::unknown(None);
        }

        let mut best: Option<(usize, f64)> = None;
        for (i, entry) in gallery.entries().iter().enumerate() {
            let dist = probe.euclidean_distance(&entry.descriptor);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((i, dist)),
            }
        }

        match best {
            Some((idx, dist)) if dist < threshold => {
                let entry = &gallery.entries()[idx];
                Resolution {
                    identity: Identity::Known {
                        uid: entry.uid.clone(),
                        name: entry.name.clone(),
                    },
                    distance: Some(dist),
                }
            }
            _ => Resolution::unknown(best.map(|(_, dist)| dist)),
        }
    }
}

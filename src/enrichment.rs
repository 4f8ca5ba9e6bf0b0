//! Enrichment collaborators: attack classification and IP geolocation.

pub mod classifier;
pub mod geolocation;

pub use classifier::{AttackClassifier, Classifier, UNKNOWN_CATEGORY};
pub use geolocation::{GeoLocator, GeoRecord};

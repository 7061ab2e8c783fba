// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Source-Signature Tracking
//!
//! A pipeline's capturable sources are fingerprinted as a set of canonical
//! strings. A capture stays valid while the pipeline's current signature is
//! a subset of the recorded one: sources disappearing is harmless, sources
//! appearing or mutating invalidates the capture because every tag of a
//! deterministic replay must start from the same origin instant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Failed to canonicalize source payload: {0}")]
    Canonicalize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SignatureError>;

/// Opaque description of one capturable source: its kind identifier plus its
/// configuration payload, as produced by the pipeline's source inspector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub urn: String,
    pub payload: serde_json::Value,
}

impl SourceDescriptor {
    pub fn new(urn: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            urn: urn.into(),
            payload,
        }
    }

    /// Canonical string form: `urn` plus the payload's JSON rendering.
    /// `serde_json` keeps object keys sorted, so equal payloads always
    /// canonicalize identically.
    pub fn canonical(&self) -> Result<String> {
        Ok(format!("{}:{}", self.urn, serde_json::to_string(&self.payload)?))
    }
}

/// Structural fingerprint of a pipeline's capturable sources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceSignature(BTreeSet<String>);

impl SourceSignature {
    /// Deterministic, order-insensitive extraction. Failure here is fatal to
    /// the needed-capture decision: a wrong signature would allow a
    /// non-deterministic replay.
    pub fn extract(sources: &[SourceDescriptor]) -> Result<Self> {
        let mut set = BTreeSet::new();
        for source in sources {
            set.insert(source.canonical()?);
        }
        Ok(Self(set))
    }

    /// The change test: a signature that is a subset of the recorded one is
    /// unchanged. Note the asymmetry — shrinkage is not a change.
    pub fn is_subset_of(&self, recorded: &SourceSignature) -> bool {
        self.0.is_subset(&recorded.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

//! Recoverable problems and job cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::util::{Error, Result};

/// A recoverable condition; the job continues with a degraded result.
#[derive(Clone, Debug, PartialEq)]
pub enum Warning {
    EmptyExport { scope: String },
    MissingCollection(String),
    MissingTexture { material: String, source: String },
    UnsupportedNode { material: String, kind: String },
    InvalidMesh { node: String, detail: String },
    SkinWithoutArmature { node: String },
    OptionClamped { name: &'static str, from: String, to: String },
    BakeFailed { material: String, slot: String, detail: String },
    SkippedAsset { name: String, detail: String },
    DeflatedEntry { name: String },
    MisalignedEntry { name: String, offset: u64 },
    SkippedPrim { path: String, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyExport { scope } => write!(f, "nothing to export in {scope}"),
            Self::MissingCollection(name) => write!(f, "collection '{name}' does not exist"),
            Self::MissingTexture { material, source } => {
                write!(f, "material '{material}': texture '{source}' not found, using constant")
            }
            Self::UnsupportedNode { material, kind } => {
                write!(f, "material '{material}': unsupported node {kind}")
            }
            Self::InvalidMesh { node, detail } => write!(f, "mesh '{node}' skipped: {detail}"),
            Self::SkinWithoutArmature { node } => {
                write!(f, "mesh '{node}' has skin weights but no exported armature")
            }
            Self::OptionClamped { name, from, to } => write!(f, "option {name} clamped from {from} to {to}"),
            Self::BakeFailed { material, slot, detail } => {
                write!(f, "material '{material}': bake of {slot} failed ({detail}), using constant")
            }
            Self::SkippedAsset { name, detail } => write!(f, "asset '{name}' skipped: {detail}"),
            Self::DeflatedEntry { name } => write!(f, "archive entry '{name}' is compressed"),
            Self::MisalignedEntry { name, offset } => {
                write!(f, "archive entry '{name}' data at offset {offset} is not 64-byte aligned")
            }
            Self::SkippedPrim { path, reason } => write!(f, "prim {path} skipped: {reason}"),
        }
    }
}

/// Warnings collected over one job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::debug!("{warning}");
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for w in warnings {
            self.warn(w);
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// Log one summary line for the job.
    pub fn log_summary(&self, job: &str) {
        if self.warnings.is_empty() {
            tracing::info!("{job} finished without warnings");
            return;
        }
        let listed: Vec<String> = self.warnings.iter().map(ToString::to_string).collect();
        tracing::warn!("{job} finished with {} warning(s): {}", listed.len(), listed.join("; "));
    }
}

/// Shared cancellation flag, checked between pipeline stages.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_diagnostics_collect() {
        let mut d = Diagnostics::new();
        d.warn(Warning::MissingCollection("Props".into()));
        d.warn(Warning::EmptyExport { scope: "collection 'Props'".into() });
        assert_eq!(d.len(), 2);
        assert_eq!(d.warnings()[0].to_string(), "collection 'Props' does not exist");
    }
}

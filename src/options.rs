//! Export and import configuration.
//!
//! Field names follow the host's option names (`exportMaterials`,
//! `bakeAOSamples`, ...) so option documents can be shared with it.
//! Ranges are enforced once, by [`ExportOptions::validate`], before a job
//! starts.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Warning;
use crate::util::{Error, Result};

pub const TEXTURE_SIZE_RANGE: (i32, i32) = (16, 4096);
pub const AO_SAMPLES_RANGE: (i32, i32) = (1, 1000);
pub const GLOBAL_SCALE_RANGE: (f64, f64) = (0.01, 1000.0);

/// Encoding of the default layer inside the archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerFormat {
    #[default]
    Crate,
    Text,
}

impl LayerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Crate => "usdc",
            Self::Text => "usda",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    pub export_materials: bool,
    pub export_animations: bool,
    pub bake_textures: bool,
    #[serde(rename = "bakeAO")]
    pub bake_ao: bool,
    #[serde(rename = "bakeAOSamples")]
    pub bake_ao_samples: i32,
    pub bake_texture_size: i32,
    pub global_scale: f64,
    pub collection: Option<String>,
    pub layer_format: LayerFormat,
    pub use_converter: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            export_materials: true,
            export_animations: false,
            bake_textures: false,
            bake_ao: false,
            bake_ao_samples: 64,
            bake_texture_size: 1024,
            global_scale: 1.0,
            collection: None,
            layer_format: LayerFormat::Crate,
            use_converter: false,
        }
    }
}

impl ExportOptions {
    /// Clamp out-of-range values, returning one warning per clamped option.
    ///
    /// A non-finite scale and the external converter are rejected.
    pub fn validate(&mut self) -> Result<Vec<Warning>> {
        if self.use_converter {
            return Err(Error::Unsupported(
                "external converter export is not available; disable useConverter".into(),
            ));
        }
        if !self.global_scale.is_finite() {
            return Err(Error::InvalidOption {
                name: "globalScale",
                detail: format!("{} is not a finite number", self.global_scale),
            });
        }
        let mut warnings = Vec::new();
        clamp_int(&mut self.bake_texture_size, TEXTURE_SIZE_RANGE, "bakeTextureSize", &mut warnings);
        clamp_int(&mut self.bake_ao_samples, AO_SAMPLES_RANGE, "bakeAOSamples", &mut warnings);

        let (lo, hi) = GLOBAL_SCALE_RANGE;
        let scale = self.global_scale.clamp(lo, hi);
        if scale != self.global_scale {
            warnings.push(Warning::OptionClamped {
                name: "globalScale",
                from: self.global_scale.to_string(),
                to: scale.to_string(),
            });
            self.global_scale = scale;
        }

        if self.collection.as_deref().is_some_and(|c| c.trim().is_empty()) {
            self.collection = None;
        }
        Ok(warnings)
    }
}

fn clamp_int(value: &mut i32, (lo, hi): (i32, i32), name: &'static str, warnings: &mut Vec<Warning>) {
    let clamped = (*value).clamp(lo, hi);
    if clamped != *value {
        warnings.push(Warning::OptionClamped {
            name,
            from: value.to_string(),
            to: clamped.to_string(),
        });
        *value = clamped;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub materials: bool,
    pub animations: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { materials: true, animations: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = ExportOptions::default();
        assert!(o.export_materials);
        assert!(!o.export_animations);
        assert_eq!(o.bake_ao_samples, 64);
        assert_eq!(o.bake_texture_size, 1024);
        let i = ImportOptions::default();
        assert!(i.materials && i.animations);
    }

    #[test]
    fn test_json_names() {
        let o: ExportOptions =
            serde_json::from_str(r#"{"bakeAO": true, "bakeAOSamples": 8, "globalScale": 2.0}"#).unwrap();
        assert!(o.bake_ao);
        assert_eq!(o.bake_ao_samples, 8);
        assert_eq!(o.global_scale, 2.0);
        assert!(o.export_materials);
    }

    #[test]
    fn test_validate_clamps() {
        let mut o = ExportOptions {
            bake_texture_size: 8192,
            bake_ao_samples: 0,
            global_scale: 0.0001,
            collection: Some("  ".into()),
            ..Default::default()
        };
        let warnings = o.validate().unwrap();
        assert_eq!(warnings.len(), 3);
        assert_eq!(o.bake_texture_size, 4096);
        assert_eq!(o.bake_ao_samples, 1);
        assert_eq!(o.global_scale, 0.01);
        assert!(o.collection.is_none());
    }

    #[test]
    fn test_validate_rejects() {
        let mut o = ExportOptions { global_scale: f64::NAN, ..Default::default() };
        assert!(matches!(o.validate(), Err(Error::InvalidOption { .. })));
        let mut o = ExportOptions { use_converter: true, ..Default::default() };
        assert!(matches!(o.validate(), Err(Error::Unsupported(_))));
    }
}

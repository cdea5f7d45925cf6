//! Crate file layout constants.

/// File magic.
pub const MAGIC: &[u8; 8] = b"PXR-USDC";

/// Version written by this crate.
pub const VERSION: [u8; 3] = [0, 8, 0];

/// Oldest and newest readable versions.
pub const MIN_VERSION: [u8; 3] = [0, 8, 0];
pub const MAX_VERSION: [u8; 3] = [0, 12, 0];

/// magic + version + TOC offset + 8 reserved words.
pub const BOOTSTRAP_SIZE: usize = 8 + 8 + 8 + 8 * 8;

/// Section name field width in the TOC.
pub const SECTION_NAME_SIZE: usize = 16;

pub const TOKENS: &str = "TOKENS";
pub const STRINGS: &str = "STRINGS";
pub const FIELDS: &str = "FIELDS";
pub const FIELDSETS: &str = "FIELDSETS";
pub const PATHS: &str = "PATHS";
pub const SPECS: &str = "SPECS";

/// Required sections, in file order.
pub const SECTIONS: [&str; 6] = [TOKENS, STRINGS, FIELDS, FIELDSETS, PATHS, SPECS];

/// Arrays at least this long are stored compressed.
pub const MIN_COMPRESSED_ARRAY_SIZE: usize = 16;

/// Largest lookup table used for float array compression.
pub const MAX_LUT_SIZE: usize = 1024;

/// Field set terminator.
pub const FIELD_SET_END: u32 = u32::MAX;

/// Scene description field names.
pub mod field {
    pub const SPECIFIER: &str = "specifier";
    pub const TYPE_NAME: &str = "typeName";
    pub const KIND: &str = "kind";
    pub const API_SCHEMAS: &str = "apiSchemas";
    pub const REFERENCES: &str = "references";
    pub const INSTANCEABLE: &str = "instanceable";
    pub const ACTIVE: &str = "active";
    pub const PRIM_CHILDREN: &str = "primChildren";
    pub const PROPERTIES: &str = "properties";
    pub const VARIABILITY: &str = "variability";
    pub const CUSTOM: &str = "custom";
    pub const DEFAULT: &str = "default";
    pub const TIME_SAMPLES: &str = "timeSamples";
    pub const CONNECTION_PATHS: &str = "connectionPaths";
    pub const TARGET_PATHS: &str = "targetPaths";
    pub const INTERPOLATION: &str = "interpolation";
    pub const ELEMENT_SIZE: &str = "elementSize";

    pub const DEFAULT_PRIM: &str = "defaultPrim";
    pub const UP_AXIS: &str = "upAxis";
    pub const METERS_PER_UNIT: &str = "metersPerUnit";
    pub const START_TIME_CODE: &str = "startTimeCode";
    pub const END_TIME_CODE: &str = "endTimeCode";
    pub const TIME_CODES_PER_SECOND: &str = "timeCodesPerSecond";
    pub const FRAMES_PER_SECOND: &str = "framesPerSecond";
    pub const DOCUMENTATION: &str = "documentation";
}

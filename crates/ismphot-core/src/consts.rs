/// CCDs that make up a field on the camera mount.
pub const FIELD_CCDS: [u8; 4] = [5, 6, 7, 8];

/// Number of frames kept from each ranking during astrometric reference selection.
pub const ASTROMREF_TOP_K: usize = 200;

/// Number of leading bytes of a photometry file searched for the binary marker.
pub const PHOT_HEADER_SNIFF_BYTES: usize = 600;

/// Marker present in the header of binary photometry files.
pub const BINARY_PHOT_MARKER: &str = "--binary-output";

/// Line terminating the text header of a binary photometry file.
pub const BINARY_PHOT_END_OF_HEADER: &str = "# end-of-header";

/// Subdirectory (beside the frame) receiving warp-quarantined frames.
pub const BADFRAMES_DIR: &str = "badframes";

/// Name of the selection blob inside each photref selection cache directory.
pub const SELECTION_INFO_FILE: &str = "selection-info.json.gz";

/// Default magnitude zero points for 30 s exposures, keyed by CCD.
pub const DEFAULT_ZEROPOINTS: [(u8, f64); 4] = [(5, 17.11), (6, 17.11), (7, 17.11), (8, 16.63)];

/// Prefix used for provisional new-source identifiers.
pub const NEW_SOURCE_PREFIX: &str = "HAT-999";

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

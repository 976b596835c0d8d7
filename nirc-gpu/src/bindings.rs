//! Names under which resources are exposed to kernels.
//!
//! Kernels declare their globals under exactly these names; backends resolve
//! them to whatever slots the kernel actually uses.

pub const HASH_GRID_ENTRIES: &str = "hash_grid_entries";
pub const VOXEL_DATA: &str = "voxel_data";
pub const VOXEL_DATA_PREV: &str = "voxel_data_prev";

pub const PRIMAL: &str = "primal";
pub const FILTERED_PRIMAL: &str = "filtered_primal";
pub const GRADIENT: &str = "gradient";
pub const GRADIENT_COUNT: &str = "gradient_count";
pub const GRADIENT_AUX: &str = "gradient_aux";
pub const FEATURE_HASH_GRID_ENTRIES: &str = "feature_hash_grid_entries";

pub const VBUFFER: &str = "vbuffer";
pub const VIEW_DIR: &str = "view_dir";
pub const REF_IMAGE: &str = "ref_image";
pub const OUTPUT_COLOR: &str = "output_color";
pub const DEBUG_OUTPUT_COLOR: &str = "debug_output_color";
pub const DEBUG_OUTPUT_COLOR_REF: &str = "debug_output_color_ref";

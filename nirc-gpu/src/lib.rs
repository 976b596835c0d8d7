//! Common structs, constants and kernel bodies shared between the radiance
//! cache orchestrator and its compute kernels.
//!
//! Every built-in kernel is written here as a per-invocation function taking
//! the invocation's global id; the WGSL kernels shipped with `nirc` mirror
//! these bodies line by line, while the host reference backend simply calls
//! them for each thread.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::manual_range_contains)]

mod bindings;
mod hash_cache;
mod hash_grid;
mod neural;
mod passes;
mod russian_roulette;
mod utils;
mod voxel;

pub use self::bindings::*;
pub use self::hash_cache::*;
pub use self::hash_grid::*;
pub use self::neural::*;
pub use self::passes::*;
pub use self::russian_roulette::*;
pub use self::utils::*;
pub use self::voxel::*;

/// Number of training sub-steps executed per rendered frame.
pub const TRAINING_SUB_STEPS: u32 = 4;

/// Training dispatches cover `1 / TRAINING_DOWNSCALE` of the frame along each
/// axis (i.e. roughly every hundredth pixel).
pub const TRAINING_DOWNSCALE: u32 = 10;

/// Fixed resolution of the debug-visualization outputs.
pub const DEBUG_OUTPUT_WIDTH: u32 = 1000;

/// See: [`DEBUG_OUTPUT_WIDTH`].
pub const DEBUG_OUTPUT_HEIGHT: u32 = 1000;

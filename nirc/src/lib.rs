//! Orchestration of a real-time path tracer that learns its radiance caches
//! online.
//!
//! [`PathTracer`] owns two caches:
//!
//! - a spatial hash cache ([`HashCache`]), filled by a shared training
//!   dispatch and resolved into double-buffered voxel data each frame,
//! - a neural cache ([`NeuralCache`]), a small network trained with a few
//!   gradient-descent sub-steps per frame.
//!
//! Either can feed the Russian roulette ([`RussianRoulette`]) that decides
//! when paths get terminated. Caches nobody consumes are never allocated.
//!
//! Work is recorded through a [`Backend`]; [`WgpuBackend`] runs it on the
//! GPU, [`ReferenceBackend`] runs it on the host.

mod activation;
mod backend;
mod backends;
mod config;
mod error;
mod hash_cache;
mod neural_cache;
mod pass;
mod passes;
mod path_tracer;
mod properties;
mod render_pass;
mod resources;
mod russian_roulette;
mod scene;
mod utils;

pub use nirc_gpu as gpu;

pub use self::activation::*;
pub use self::backend::*;
pub use self::backends::*;
pub use self::config::*;
pub use self::error::*;
pub use self::hash_cache::*;
pub use self::neural_cache::*;
pub use self::pass::*;
pub use self::passes::*;
pub use self::path_tracer::*;
pub use self::properties::*;
pub use self::render_pass::*;
pub use self::resources::*;
pub use self::russian_roulette::*;
pub use self::scene::*;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec4};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TrainingPassParams {
    /// xyz = camera position, w = unused
    pub camera_pos: Vec4,
    pub frame_dim: UVec2,
    pub frame: u32,
    pub iteration: u32,
    pub seed: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PathTracingPassParams {
    /// xyz = camera position, w = unused
    pub camera_pos: Vec4,
    pub frame_dim: UVec2,
    pub frame: u32,
    pub seed: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashCacheResetPassParams {
    pub map_size: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashCacheResolvePassParams {
    pub map_size: u32,
    pub frame: u32,
    pub max_history: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GradientClearPassParams {
    pub param_count: u32,
    pub _pad: [u32; 3],
}

pub const OPTIMIZER_SGD: u32 = 0;
pub const OPTIMIZER_ADAM: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GradientDescentPassParams {
    pub param_count: u32,
    /// Optimizer step index (`t`); used for Adam's bias correction
    pub step: u32,
    /// [`OPTIMIZER_SGD`] or [`OPTIMIZER_ADAM`]
    pub optimizer: u32,
    pub _pad0: u32,
    pub learning_rate: f32,
    /// SGD: momentum, Adam: beta1
    pub param_0: f32,
    /// SGD: dampening, Adam: beta2
    pub param_1: f32,
    /// SGD: unused, Adam: epsilon
    pub param_2: f32,
    pub filter_alpha: f32,
    pub _pad1: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct NnResetPassParams {
    pub param_count: u32,
    pub aux_count: u32,
    pub feature_entry_count: u32,
    pub seed: u32,
    pub lower_bound: f32,
    pub upper_bound: f32,
    pub _pad: [u32; 2],
}

impl NnResetPassParams {
    /// Number of threads the reset dispatch has to cover.
    pub fn thread_count(&self) -> u32 {
        self.param_count
            .max(self.aux_count)
            .max(self.feature_entry_count)
    }
}

pub const DEBUG_SOURCE_NEURAL_CACHE: u32 = 0;
pub const DEBUG_SOURCE_HASH_CACHE: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DebugVisPassParams {
    pub frame: u32,
    pub mlp_index: u32,
    pub show_transmission: u32,
    pub apply_bsdf: u32,
    /// [`DEBUG_SOURCE_NEURAL_CACHE`] or [`DEBUG_SOURCE_HASH_CACHE`]
    pub source: u32,
    pub _pad: [u32; 3],
}

//! Interfaces of the collaborators the path tracer renders with.

use std::fmt;
use std::ops::{Deref, DerefMut};

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{Backend, Defines, ShaderVars};

bitflags! {
    /// What changed in the scene since the previous frame.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SceneUpdates: u32 {
        const CAMERA_MOVED      = 1 << 0;
        const LIGHTS_CHANGED    = 1 << 1;
        const MATERIALS_CHANGED = 1 << 2;
        const ENV_MAP_CHANGED   = 1 << 3;
        const GEOMETRY_CHANGED  = 1 << 4;
        const RECOMPILE_NEEDED  = 1 << 5;
    }
}

impl SceneUpdates {
    /// Changes the path tracer can't follow without recompiling its kernels.
    pub const UNSUPPORTED: Self =
        Self::GEOMETRY_CHANGED.union(Self::RECOMPILE_NEEDED);

    pub fn is_supported(self) -> bool {
        !self.intersects(Self::UNSUPPORTED)
    }
}

/// Tuning of the emissive light BVH sampler; opaque to the path tracer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LightBvhOptions(pub serde_json::Map<String, serde_json::Value>);

impl Deref for LightBvhOptions {
    type Target = serde_json::Map<String, serde_json::Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for LightBvhOptions {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub trait Scene<B>: fmt::Debug
where
    B: Backend,
{
    fn uses_analytic_lights(&self) -> bool;
    fn uses_emissive_lights(&self) -> bool;
    fn uses_env_light(&self) -> bool;
    fn uses_env_background(&self) -> bool;

    /// Changes accumulated since the last call.
    fn updates(&self) -> SceneUpdates;

    fn camera_position(&self) -> Vec3;

    fn defines(&self) -> Defines {
        Defines::default()
    }

    fn bind_shader_data(&self, vars: &mut ShaderVars<B>);

    fn create_env_map_sampler(
        &self,
        backend: &mut B,
    ) -> Box<dyn EnvMapSampler<B>>;

    fn create_emissive_sampler(
        &self,
        backend: &mut B,
        options: &LightBvhOptions,
    ) -> Box<dyn EmissiveSampler<B>>;
}

pub trait SampleGenerator<B>: fmt::Debug
where
    B: Backend,
{
    fn defines(&self) -> Defines {
        Defines::default()
    }

    fn bind_shader_data(&self, vars: &mut ShaderVars<B>);
}

pub trait EnvMapSampler<B>: fmt::Debug
where
    B: Backend,
{
    fn defines(&self) -> Defines {
        Defines::default()
    }

    fn bind_shader_data(&self, vars: &mut ShaderVars<B>);
}

pub trait EmissiveSampler<B>: fmt::Debug
where
    B: Backend,
{
    fn defines(&self) -> Defines {
        Defines::default()
    }

    fn bind_shader_data(&self, vars: &mut ShaderVars<B>);

    /// Refreshes the sampler for this frame; returns whether lighting
    /// changed.
    fn update(&mut self, backend: &mut B) -> bool;

    /// Current tuning; carried over when the sampler gets rebuilt.
    fn options(&self) -> LightBvhOptions;
}

/// Sample generator whose whole state is the per-frame seed passed along
/// with each dispatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformSampleGenerator;

impl UniformSampleGenerator {
    pub const KIND: u32 = 1;
}

impl<B> SampleGenerator<B> for UniformSampleGenerator
where
    B: Backend,
{
    fn defines(&self) -> Defines {
        let mut defines = Defines::default();

        defines.set("SAMPLE_GENERATOR_TYPE", Self::KIND);
        defines
    }

    fn bind_shader_data(&self, _: &mut ShaderVars<B>) {
        //
    }
}

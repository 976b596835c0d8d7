//! Renders a handful of frames on the host and logs how the caches evolve.
//!
//! The "scene" is a unit square whose radiance varies with position; the
//! training kernel samples it at random, the path-tracing kernel looks every
//! pixel up in the hash cache.
//!
//! Run with `RUST_LOG=info cargo run --example headless`.

use glam::{uvec2, vec3, Vec3, Vec4};
use log::info;
use nirc::{
    gpu, BufferTag, Config, DefineValue, EmissiveSampler, EnvMapSampler,
    HostInvocation, LightBvhOptions, PathContribEstimate, PathTracer,
    PathTracerKernels, ReferenceBackend, RenderData, Result, Scene,
    SceneUpdates, ShaderVars, SurvivalProbOption, INPUT_VBUFFER,
    OUTPUT_COLOR,
};

const FRAMES: u32 = 8;
const FRAME_SIZE: (u32, u32) = (160, 90);

/// Value every network parameter gets pulled towards.
const PARAM_TARGET: f32 = 0.25;

fn main() -> Result<()> {
    env_logger::init();

    let mut config = Config::default();

    config.russian_roulette.survival_prob_option =
        SurvivalProbOption::ExpectedContribution;

    config.russian_roulette.path_contrib_estimate =
        Some(PathContribEstimate::NeuralCache);

    config.hash_cache.map_size_exponent = 12;
    config.hash_cache.inject_radiance_rr = true;
    config.neural_cache.layer_width = 16;
    config.neural_cache.layer_counts = vec![2];

    let mut backend = ReferenceBackend::new();

    backend.register_kernel("train_fill_cache", train);
    backend.register_kernel("path_tracing", trace);
    backend.register_kernel("debug_vis", |_| Ok(()));

    let size = uvec2(FRAME_SIZE.0, FRAME_SIZE.1);
    let color = backend.create_image("color", size);
    let vbuffer = backend.create_image("vbuffer", size);

    let mut render_data = RenderData::new()
        .with(OUTPUT_COLOR.name, color.clone())
        .with(INPUT_VBUFFER.name, vbuffer);

    let mut tracer = PathTracer::new(config, PathTracerKernels::host());

    tracer.set_scene(Some(Box::new(DemoScene)));

    for frame in 0..FRAMES {
        tracer.execute(&mut backend, &mut render_data)?;

        let resources = tracer.resources();

        let occupied = backend
            .read::<gpu::HashGridEntry>(
                resources.get(BufferTag::HashGridEntries)?,
            )
            .iter()
            .filter(|entry| !entry.is_empty())
            .count();

        let primal = backend.read::<f32>(resources.get(BufferTag::NnPrimal)?);

        let filtered =
            backend.read::<f32>(resources.get(BufferTag::NnFilteredPrimal)?);

        let covered = backend
            .image_data(&color)
            .iter()
            .filter(|texel| texel.w > 0.0)
            .count();

        info!(
            "Frame {frame}: {occupied} voxels, {covered} pixels covered, \
             param mean {:.4} (filtered {:.4}), {} dispatches",
            mean(&primal),
            mean(&filtered),
            backend.take_dispatches().len(),
        );
    }

    info!(
        "Refresh flags of the last frame: {:?}",
        render_data.take_refresh_flags()
    );

    Ok(())
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len().max(1) as f32
}

fn radiance_at(position: Vec3) -> Vec3 {
    vec3(position.x, position.y, 1.0 - position.x)
}

fn probing_size(inv: &HostInvocation<'_>) -> u32 {
    inv.defines()
        .get("R_HC_PROBING_SIZE")
        .map_or(1, |value| value.as_f64() as u32)
}

fn is_set(inv: &HostInvocation<'_>, name: &str) -> bool {
    inv.defines().get(name) == Some(DefineValue::Bool(true))
}

/// Inserts random samples of the square into the hash cache and pulls every
/// network parameter towards [`PARAM_TARGET`].
fn train(inv: &HostInvocation<'_>) -> Result<()> {
    let params = inv.params::<gpu::TrainingPassParams>()?;
    let camera_pos = params.camera_pos.truncate();
    let seed = params.seed ^ params.iteration;

    if is_set(inv, "R_HC_UPDATE") {
        let probing_size = probing_size(inv);

        inv.with_buffers_mut2::<gpu::HashGridEntry, gpu::VoxelRecord, _>(
            gpu::HASH_GRID_ENTRIES,
            gpu::VOXEL_DATA,
            |entries, voxels| {
                for id in 0..inv.thread_count() {
                    let position = vec3(
                        gpu::random_unit(seed, 2 * id),
                        gpu::random_unit(seed, 2 * id + 1),
                        0.0,
                    );

                    let key =
                        gpu::VoxelKey::new(position, Vec3::NEG_Z, camera_pos);

                    gpu::hash_cache_insert(
                        entries,
                        voxels,
                        key,
                        radiance_at(position),
                        params.frame,
                        probing_size,
                    );
                }
            },
        )?;
    }

    if is_set(inv, "NN_TRAIN") {
        let primal = inv.buffer(gpu::PRIMAL)?;
        let primal = inv.cast::<f32>(&primal)?;

        inv.with_buffers_mut2::<i32, u32, _>(
            gpu::GRADIENT,
            gpu::GRADIENT_COUNT,
            |gradient, count| {
                for id in 0..inv.thread_count() as usize {
                    let param = id % primal.len();

                    gpu::gradient_accumulate(
                        gradient,
                        count,
                        param,
                        primal[param] - PARAM_TARGET,
                    );
                }
            },
        )?;
    }

    Ok(())
}

/// Looks every pixel up in the resolved hash cache; misses stay black with
/// zero alpha.
fn trace(inv: &HostInvocation<'_>) -> Result<()> {
    let params = inv.params::<gpu::PathTracingPassParams>()?;
    let camera_pos = params.camera_pos.truncate();
    let probing_size = probing_size(inv);

    let entries = inv.buffer(gpu::HASH_GRID_ENTRIES)?;
    let entries = inv.cast::<gpu::HashGridEntry>(&entries)?;
    let voxels = inv.buffer(gpu::VOXEL_DATA)?;
    let voxels = inv.cast::<gpu::VoxelRecord>(&voxels)?;

    inv.with_image_mut(gpu::OUTPUT_COLOR, |size, texels| {
        for (idx, texel) in texels.iter_mut().enumerate() {
            let x = idx as u32 % size.x;
            let y = idx as u32 / size.x;

            let position = vec3(
                (x as f32 + 0.5) / size.x as f32,
                (y as f32 + 0.5) / size.y as f32,
                0.0,
            );

            let key = gpu::VoxelKey::new(position, Vec3::NEG_Z, camera_pos);

            *texel =
                gpu::hash_cache_query(entries, voxels, key, probing_size)
                    .map_or(Vec4::ZERO, |radiance| radiance.extend(1.0));
        }
    })
}

#[derive(Debug)]
struct DemoScene;

impl Scene<ReferenceBackend> for DemoScene {
    fn uses_analytic_lights(&self) -> bool {
        false
    }

    fn uses_emissive_lights(&self) -> bool {
        true
    }

    fn uses_env_light(&self) -> bool {
        false
    }

    fn uses_env_background(&self) -> bool {
        false
    }

    fn updates(&self) -> SceneUpdates {
        SceneUpdates::empty()
    }

    fn camera_position(&self) -> Vec3 {
        vec3(0.5, 0.5, -1.0)
    }

    fn bind_shader_data(&self, _: &mut ShaderVars<ReferenceBackend>) {
        //
    }

    fn create_env_map_sampler(
        &self,
        _: &mut ReferenceBackend,
    ) -> Box<dyn EnvMapSampler<ReferenceBackend>> {
        Box::new(DemoLights::default())
    }

    fn create_emissive_sampler(
        &self,
        _: &mut ReferenceBackend,
        options: &LightBvhOptions,
    ) -> Box<dyn EmissiveSampler<ReferenceBackend>> {
        Box::new(DemoLights {
            options: options.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct DemoLights {
    options: LightBvhOptions,
}

impl EnvMapSampler<ReferenceBackend> for DemoLights {
    fn bind_shader_data(&self, _: &mut ShaderVars<ReferenceBackend>) {
        //
    }
}

impl EmissiveSampler<ReferenceBackend> for DemoLights {
    fn bind_shader_data(&self, _: &mut ShaderVars<ReferenceBackend>) {
        //
    }

    fn update(&mut self, _: &mut ReferenceBackend) -> bool {
        false
    }

    fn options(&self) -> LightBvhOptions {
        self.options.clone()
    }
}

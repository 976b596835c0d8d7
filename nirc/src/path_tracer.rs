use derivative::Derivative;
use glam::{uvec2, UVec2, Vec4};
use log::{debug, info, trace, warn};
use rand::Rng;
use serde_json::Value;

use crate::{
    gpu, utils, ActivationState, Backend, ComputePass, Config, Configuration,
    Defines, EmissiveSampler, EnvMapSampler, ExternalKernel, HashCache,
    LightBvhOptions, NeuralCache, PassRole, Passes, ProgramSource,
    Properties, Reflection, RefreshFlags, RenderData, ResourceSet, Result,
    RussianRoulette, SampleGenerator, Scene, ShaderVars,
    UniformSampleGenerator, VoxelRoles, INPUT_CHANNELS, INPUT_REF_IMAGE,
    INPUT_VBUFFER, INPUT_VIEW_DIR, OUTPUT_CHANNELS, OUTPUT_COLOR,
    OUTPUT_DEBUG_COLOR, OUTPUT_DEBUG_COLOR_REF,
};

/// Kernels provided by the embedder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTracerKernels {
    /// Shared dispatch inserting into the hash cache and accumulating the
    /// network's gradients.
    pub training: ExternalKernel,

    pub path_tracing: ExternalKernel,
    pub debug_vis: ExternalKernel,
}

impl PathTracerKernels {
    /// Host kernels named after their passes (`train_fill_cache`,
    /// `path_tracing`, `debug_vis`).
    pub fn host() -> Self {
        Self {
            training: ExternalKernel::host(PassRole::TrainFillCache.label()),
            path_tracing: ExternalKernel::host(PassRole::PathTracing.label()),
            debug_vis: ExternalKernel::host(PassRole::DebugVis.label()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathTracerState {
    /// Passes and buffers are up to date; frames just get dispatched.
    Idle,

    /// Passes and buffers will be torn down and recreated before the next
    /// frame.
    Rebuilding,
}

/// Per-frame values shared by every dispatch of that frame.
#[derive(Clone, Copy, Debug)]
struct Frame {
    index: u32,
    dim: UVec2,
    roles: VoxelRoles,
    camera_pos: Vec4,
    seed: u32,
}

/// Render pass tracing paths with the help of the hash and neural radiance
/// caches.
///
/// Owns both caches, every buffer and pass they need, and decides frame by
/// frame which of them get dispatched.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct PathTracer<B>
where
    B: Backend,
{
    kernels: PathTracerKernels,
    config: Configuration,
    activation: ActivationState,
    russian_roulette: RussianRoulette,
    hash_cache: HashCache,
    neural_cache: NeuralCache,
    resources: ResourceSet<B>,
    passes: Passes<B>,
    scene: Option<Box<dyn Scene<B>>>,
    sample_generator: Box<dyn SampleGenerator<B>>,
    env_map_sampler: Option<Box<dyn EnvMapSampler<B>>>,
    emissive_sampler: Option<Box<dyn EmissiveSampler<B>>>,

    /// Tuning of the emissive sampler, carried over when it gets rebuilt.
    light_bvh_options: LightBvhOptions,

    state: PathTracerState,
    frame: u32,
}

impl<B> PathTracer<B>
where
    B: Backend,
{
    pub fn new(config: Config, kernels: PathTracerKernels) -> Self {
        let light_bvh_options = config.light_bvh_options.clone();
        let russian_roulette = config.russian_roulette();

        Self {
            kernels,
            config: Configuration::new(config),
            activation: Default::default(),
            russian_roulette,
            hash_cache: Default::default(),
            neural_cache: Default::default(),
            resources: Default::default(),
            passes: Default::default(),
            scene: None,
            sample_generator: Box::new(UniformSampleGenerator),
            env_map_sampler: None,
            emissive_sampler: None,
            light_bvh_options,
            state: PathTracerState::Rebuilding,
            frame: 0,
        }
    }

    pub fn with_sample_generator(
        mut self,
        sample_generator: Box<dyn SampleGenerator<B>>,
    ) -> Self {
        self.sample_generator = sample_generator;
        self.state = PathTracerState::Rebuilding;
        self
    }

    /// Binds (or unbinds) the scene; everything gets rebuilt before the next
    /// frame.
    pub fn set_scene(&mut self, scene: Option<Box<dyn Scene<B>>>) {
        debug!("Scene changed; scheduling rebuild");

        self.scene = scene;
        self.state = PathTracerState::Rebuilding;
    }

    pub fn scene(&self) -> Option<&dyn Scene<B>> {
        self.scene.as_deref()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Edits made through the returned handle get applied before the next
    /// frame.
    pub fn config_mut(&mut self) -> &mut Configuration {
        &mut self.config
    }

    pub fn properties(&self) -> Properties {
        let mut props = self.config.to_properties();

        // Pending user edits win over whatever the sampler tuned itself to
        if self.config.light_bvh_options
            == self.config.applied().light_bvh_options
        {
            props.insert(
                "lightBVHOptions".into(),
                Value::Object(self.light_bvh_options().0),
            );
        }

        props
    }

    pub fn set_properties(&mut self, props: &Properties) {
        self.config.set_properties(props);
    }

    pub fn reflect(&self) -> Reflection {
        Reflection {
            inputs: INPUT_CHANNELS.to_vec(),
            outputs: OUTPUT_CHANNELS.to_vec(),
        }
    }

    pub fn request_hash_cache_reset(&mut self) {
        self.hash_cache.request_reset();
    }

    pub fn request_neural_cache_reset(&mut self) {
        self.neural_cache.request_reset();
    }

    /// Recreates every pass (e.g. after kernels have been edited).
    pub fn request_rebuild(&mut self) {
        self.state = PathTracerState::Rebuilding;
    }

    pub fn state(&self) -> PathTracerState {
        self.state
    }

    /// Number of frames rendered since the last rebuild.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn activation(&self) -> ActivationState {
        self.activation
    }

    pub fn russian_roulette(&self) -> RussianRoulette {
        self.russian_roulette
    }

    pub fn hash_cache(&self) -> &HashCache {
        &self.hash_cache
    }

    pub fn neural_cache(&self) -> &NeuralCache {
        &self.neural_cache
    }

    pub fn resources(&self) -> &ResourceSet<B> {
        &self.resources
    }

    pub fn passes(&self) -> &Passes<B> {
        &self.passes
    }

    /// Current tuning of the emissive sampler.
    pub fn light_bvh_options(&self) -> LightBvhOptions {
        match &self.emissive_sampler {
            Some(sampler) => sampler.options(),
            None => self.light_bvh_options.clone(),
        }
    }

    /// Renders a single frame into `render_data`.
    ///
    /// Without a scene, the outputs are cleared and nothing gets
    /// dispatched.
    pub fn execute(
        &mut self,
        backend: &mut B,
        render_data: &mut RenderData<B>,
    ) -> Result<()> {
        let Some(scene) = self.scene.take() else {
            trace!("No scene bound; clearing outputs");

            for channel in OUTPUT_CHANNELS {
                if let Some(image) = render_data.get(channel.name) {
                    backend.clear_image(image);
                }
            }

            return Ok(());
        };

        let result = self.render(backend, render_data, scene.as_ref());

        self.scene = Some(scene);

        result
    }

    fn render(
        &mut self,
        backend: &mut B,
        render_data: &mut RenderData<B>,
        scene: &dyn Scene<B>,
    ) -> Result<()> {
        let dim = backend.image_size(render_data.require(&OUTPUT_COLOR)?);
        let updates = scene.updates();

        if !updates.is_supported() {
            return Err(crate::Error::UnsupportedSceneChange(updates));
        }

        if let Some(sampler) = &mut self.emissive_sampler {
            if sampler.update(backend) {
                render_data.raise(RefreshFlags::LIGHTING_CHANGED);
            }
        }

        if self.config.is_dirty() {
            self.state = PathTracerState::Rebuilding;
        }

        if self.state == PathTracerState::Rebuilding {
            self.rebuild(backend, render_data, scene)?;
        }

        let frame = Frame {
            index: self.frame,
            dim,
            roles: VoxelRoles::for_frame(self.frame),
            camera_pos: scene.camera_position().extend(0.0),
            seed: rand::thread_rng().gen(),
        };

        let inputs = self.bind_inputs(render_data, scene)?;

        self.hash_cache
            .reset(backend, &self.passes, &self.resources)?;

        self.neural_cache
            .reset(backend, &self.passes, &self.resources)?;

        utils::measure("training", || self.train(backend, &inputs, &frame))?;

        utils::measure("path_tracing", || {
            self.trace(backend, render_data, &inputs, &frame)
        })?;

        utils::measure("debug_vis", || {
            self.visualize(backend, render_data, &inputs, &frame)
        })?;

        self.frame = self.frame.wrapping_add(1);
        self.neural_cache.advance_step();

        backend.flush();

        Ok(())
    }

    fn rebuild(
        &mut self,
        backend: &mut B,
        render_data: &mut RenderData<B>,
        scene: &dyn Scene<B>,
    ) -> Result<()> {
        let prev_light_bvh_options =
            self.config.applied().light_bvh_options.clone();

        if let Some(sampler) = self.emissive_sampler.take() {
            self.light_bvh_options = sampler.options();
        }

        self.env_map_sampler = None;
        self.passes.clear();
        self.resources.clear();
        self.frame = 0;

        if self.config.apply() {
            render_data.raise(RefreshFlags::RENDER_OPTIONS_CHANGED);
        }

        let config = self.config.applied().clone();

        if config.light_bvh_options != prev_light_bvh_options {
            self.light_bvh_options = config.light_bvh_options.clone();
        }

        self.russian_roulette = config.russian_roulette();
        self.activation = ActivationState::new(&config);

        info!(
            "Rebuilding path tracer; hash-cache={}, neural-cache={}",
            self.activation.hash_cache, self.activation.neural_cache,
        );

        self.hash_cache
            .configure(&config.hash_cache, self.activation.hash_cache);

        self.neural_cache
            .configure(&config.neural_cache, self.activation.neural_cache);

        if scene.uses_env_light() {
            debug!("Creating environment map sampler");

            self.env_map_sampler = Some(scene.create_env_map_sampler(backend));
        }

        if scene.uses_emissive_lights() {
            debug!("Creating emissive sampler");

            self.emissive_sampler = Some(
                scene.create_emissive_sampler(backend, &self.light_bvh_options),
            );
        }

        self.hash_cache.allocate(backend, &mut self.resources);
        self.neural_cache.allocate(backend, &mut self.resources);
        self.create_passes(backend, render_data, scene, &config)?;

        if self.russian_roulette.requires_reference_image()
            && render_data.get(INPUT_REF_IMAGE.name).is_none()
        {
            warn!(
                "Russian roulette measures pixels against a reference image, \
                 but `{}` is not bound",
                INPUT_REF_IMAGE.name,
            );
        }

        self.state = PathTracerState::Idle;

        Ok(())
    }

    fn create_passes(
        &mut self,
        backend: &mut B,
        render_data: &RenderData<B>,
        scene: &dyn Scene<B>,
        config: &Config,
    ) -> Result<()> {
        let defines = self.defines(render_data, scene, config);
        let hc = &config.hash_cache;

        self.hash_cache.create_passes(backend, &mut self.passes)?;
        self.neural_cache.create_passes(backend, &mut self.passes)?;

        if self.activation.any() {
            let pass = ComputePass::builder(PassRole::TrainFillCache.label())
                .defines(&defines)
                .define("R_HC_UPDATE", self.hash_cache.is_active())
                .define("R_HC_QUERY", false)
                .define("NN_TRAIN", self.neural_cache.is_training())
                .define("NN_QUERY", false)
                .define("RR_OPTION_BITS", 0u32)
                .define("R_HC_INJECT_RADIANCE_RR", false)
                .define("R_HC_INJECT_RADIANCE_SPREAD", false)
                .build(
                    backend,
                    ProgramSource::External(self.kernels.training.clone()),
                )?;

            self.passes.insert(PassRole::TrainFillCache, pass);
        }

        let pass = ComputePass::builder(PassRole::PathTracing.label())
            .defines(&defines)
            .define("R_HC_UPDATE", false)
            .define("R_HC_QUERY", self.hash_cache.is_active())
            .define("NN_TRAIN", false)
            .define("NN_QUERY", self.neural_cache.is_active())
            .define("RR_OPTION_BITS", self.russian_roulette.option_bits())
            .define("KEEP_THREADS", self.neural_cache.is_active())
            .define("R_HC_INJECT_RADIANCE_RR", hc.inject_radiance_rr)
            .define("R_HC_INJECT_RADIANCE_SPREAD", hc.inject_radiance_spread)
            .build(
                backend,
                ProgramSource::External(self.kernels.path_tracing.clone()),
            )?;

        self.passes.insert(PassRole::PathTracing, pass);

        if config.debug.debug_vis() {
            let pass = ComputePass::builder(PassRole::DebugVis.label())
                .defines(&defines)
                .define("R_HC_QUERY", self.hash_cache.is_active())
                .define("NN_QUERY", self.neural_cache.is_active())
                .build(
                    backend,
                    ProgramSource::External(self.kernels.debug_vis.clone()),
                )?;

            self.passes.insert(PassRole::DebugVis, pass);
        }

        Ok(())
    }

    /// Defines shared by every embedder-provided kernel.
    fn defines(
        &self,
        render_data: &RenderData<B>,
        scene: &dyn Scene<B>,
        config: &Config,
    ) -> Defines {
        let rr = &config.russian_roulette;
        let dbg = &config.debug;
        let mut defines = scene.defines();

        defines.extend(&self.sample_generator.defines());

        if let Some(sampler) = &self.env_map_sampler {
            defines.extend(&sampler.defines());
        }

        if let Some(sampler) = &self.emissive_sampler {
            defines.extend(&sampler.defines());
        }

        defines
            .set("LOWER_BOUNCE_COUNT", config.lower_bounce_count)
            .set("UPPER_BOUNCE_COUNT", config.upper_bounce_count)
            .set("USE_IMPORTANCE_SAMPLING", config.use_importance_sampling)
            .set("USE_NEE", config.use_nee)
            .set("USE_MIS", config.use_mis)
            .set("MIS_USE_POWER_HEURISTIC", config.mis_use_power_heuristic)
            .set("USE_RR", rr.enabled)
            .set("RR_PROB_START_VALUE", rr.prob_start_value)
            .set("RR_PROB_REDUCTION_FACTOR", rr.prob_reduction_factor)
            .set("DEBUG_PATH_LENGTH", dbg.debug_path_length)
            .set("R_HC_DEBUG_COLOR", dbg.debug_color)
            .set("R_HC_DEBUG_VOXELS", dbg.debug_voxels)
            .set("R_HC_DEBUG_LEVELS", dbg.debug_levels)
            .set("NN_DEBUG", dbg.nn_debug_output)
            .set("NIRC_DEBUG_OUTPUT_WIDTH", gpu::DEBUG_OUTPUT_WIDTH)
            .set("NIRC_DEBUG_OUTPUT_HEIGHT", gpu::DEBUG_OUTPUT_HEIGHT)
            .set("USE_ANALYTIC_LIGHTS", scene.uses_analytic_lights())
            .set("USE_EMISSIVE_LIGHTS", scene.uses_emissive_lights())
            .set("USE_ENV_LIGHT", scene.uses_env_light())
            .set("USE_ENV_BACKGROUND", scene.uses_env_background());

        for channel in INPUT_CHANNELS.iter().chain(&OUTPUT_CHANNELS) {
            if channel.optional {
                defines.set(
                    format!("IS_VALID_{}", channel.binding.to_uppercase()),
                    render_data.get(channel.name).is_some(),
                );
            }
        }

        if self.hash_cache.is_active() {
            defines.extend(&self.hash_cache.defines());
        }

        if self.neural_cache.is_active() {
            defines.extend(&self.neural_cache.defines());
        }

        defines
    }

    /// Binds the scene, its samplers and the frame's input images.
    fn bind_inputs(
        &self,
        render_data: &RenderData<B>,
        scene: &dyn Scene<B>,
    ) -> Result<ShaderVars<B>> {
        let mut vars = ShaderVars::new();

        scene.bind_shader_data(&mut vars);
        self.sample_generator.bind_shader_data(&mut vars);

        if let Some(sampler) = &self.env_map_sampler {
            sampler.bind_shader_data(&mut vars);
        }

        if let Some(sampler) = &self.emissive_sampler {
            sampler.bind_shader_data(&mut vars);
        }

        vars.set_image(
            INPUT_VBUFFER.binding,
            render_data.require(&INPUT_VBUFFER)?,
        );

        for channel in [INPUT_VIEW_DIR, INPUT_REF_IMAGE] {
            if let Some(image) = render_data.get(channel.name) {
                vars.set_image(channel.binding, image);
            }
        }

        Ok(vars)
    }

    /// Runs the training sub-steps and resolves the hash cache.
    fn train(
        &self,
        backend: &mut B,
        inputs: &ShaderVars<B>,
        frame: &Frame,
    ) -> Result<()> {
        let fills =
            self.hash_cache.is_active() || self.neural_cache.is_training();

        let mut vars = inputs.clone();

        if self.hash_cache.is_active() {
            self.hash_cache.bind(&self.resources, frame.roles, &mut vars)?;
        }

        if self.neural_cache.is_active() {
            self.neural_cache.bind_training(&self.resources, &mut vars)?;
        }

        let size = (frame.dim / gpu::TRAINING_DOWNSCALE).max(UVec2::ONE);

        if self.neural_cache.is_training()
            && size.x * size.y > gpu::MAX_TRAINING_THREADS
        {
            warn!(
                "Training dispatch of {}x{} threads exceeds gradient \
                 headroom; gradients may saturate",
                size.x, size.y
            );
        }

        for iteration in 0..gpu::TRAINING_SUB_STEPS {
            self.neural_cache.clear_gradients(
                backend,
                &self.passes,
                &self.resources,
            )?;

            if fills {
                self.passes.get(PassRole::TrainFillCache)?.run(
                    backend,
                    &vars,
                    size,
                    &gpu::TrainingPassParams {
                        camera_pos: frame.camera_pos,
                        frame_dim: frame.dim,
                        frame: frame.index,
                        iteration,
                        seed: frame.seed,
                        ..Default::default()
                    },
                )?;
            }

            self.neural_cache
                .descend(backend, &self.passes, &self.resources)?;
        }

        self.hash_cache.resolve(
            backend,
            &self.passes,
            &self.resources,
            frame.roles,
            frame.index,
        )
    }

    fn trace(
        &self,
        backend: &mut B,
        render_data: &RenderData<B>,
        inputs: &ShaderVars<B>,
        frame: &Frame,
    ) -> Result<()> {
        let mut vars = inputs.clone();

        vars.set_image(
            OUTPUT_COLOR.binding,
            render_data.require(&OUTPUT_COLOR)?,
        );

        self.bind_queries(frame, &mut vars)?;

        self.passes.get(PassRole::PathTracing)?.run(
            backend,
            &vars,
            frame.dim,
            &gpu::PathTracingPassParams {
                camera_pos: frame.camera_pos,
                frame_dim: frame.dim,
                frame: frame.index,
                seed: frame.seed,
            },
        )
    }

    fn visualize(
        &self,
        backend: &mut B,
        render_data: &RenderData<B>,
        inputs: &ShaderVars<B>,
        frame: &Frame,
    ) -> Result<()> {
        if !self.passes.contains(PassRole::DebugVis) {
            return Ok(());
        }

        let mut vars = inputs.clone();
        let mut has_outputs = false;

        for channel in [OUTPUT_DEBUG_COLOR, OUTPUT_DEBUG_COLOR_REF] {
            if let Some(image) = render_data.get(channel.name) {
                vars.set_image(channel.binding, image);
                has_outputs = true;
            }
        }

        if !has_outputs {
            trace!("No debug outputs bound; skipping debug visualization");
            return Ok(());
        }

        self.bind_queries(frame, &mut vars)?;

        let dbg = &self.config.applied().debug;

        self.passes.get(PassRole::DebugVis)?.run(
            backend,
            &vars,
            uvec2(gpu::DEBUG_OUTPUT_WIDTH, gpu::DEBUG_OUTPUT_HEIGHT),
            &gpu::DebugVisPassParams {
                frame: frame.index,
                mlp_index: dbg.nirc_debug_mlp_index,
                show_transmission: dbg.nirc_debug_show_transmission as u32,
                apply_bsdf: dbg.nirc_debug_apply_bsdf as u32,
                source: dbg.debug_vis_source(),
                ..Default::default()
            },
        )
    }

    /// Binds whatever the caches expose to kernels that only read them.
    fn bind_queries(
        &self,
        frame: &Frame,
        vars: &mut ShaderVars<B>,
    ) -> Result<()> {
        if self.hash_cache.is_active() {
            self.hash_cache.bind(&self.resources, frame.roles, vars)?;
        }

        if self.neural_cache.is_active() {
            self.neural_cache.bind_query(&self.resources, vars)?;
        }

        Ok(())
    }
}

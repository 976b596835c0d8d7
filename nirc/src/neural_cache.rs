use glam::uvec2;
use log::debug;

use crate::{
    gpu, Backend, BufferDesc, BufferTag, BuiltinKernel, ComputePass, Defines,
    NeuralCacheOptions, PassRole, Passes, ProgramSource, ResourceSet, Result,
    ShaderVars,
};

/// Number of network parameters: weights and biases of every layer of every
/// sub-network, followed by the feature grid's storage (when enabled).
///
/// Saturates at `u32::MAX`; normalized options never get there.
pub fn param_count(options: &NeuralCacheOptions) -> u32 {
    let width = u64::from(options.layer_width);

    let layers: u64 =
        options.layer_counts.iter().copied().map(u64::from).sum();

    let features = if options.feature_grid.is_enabled() {
        u64::from(options.feature_grid.size)
    } else {
        0
    };

    let count = width
        .checked_mul(width + 1)
        .and_then(|per_layer| per_layer.checked_mul(layers))
        .and_then(|weights| weights.checked_add(features))
        .unwrap_or(u64::MAX);

    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Online-trained network estimating radiance.
///
/// Training updates the primal parameters, while queries read the filtered
/// copy, so that a frame is never rendered with half-updated weights.
#[derive(Clone, Debug, Default)]
pub struct NeuralCache {
    active: bool,
    options: NeuralCacheOptions,
    param_count: u32,
    step: u32,
    reset_pending: bool,
}

impl NeuralCache {
    /// Adopts freshly applied options, re-deriving every size from the
    /// topology; a cache that becomes active starts with a pending reset.
    pub fn configure(&mut self, options: &NeuralCacheOptions, active: bool) {
        self.active = active;
        self.options = options.clone();
        self.param_count = param_count(options);
        self.step = 0;
        self.reset_pending = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the primal parameters get updated; an active cache that
    /// doesn't train is still queryable.
    pub fn is_training(&self) -> bool {
        self.active && self.options.train
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn aux_count(&self) -> u32 {
        self.param_count * self.options.optimizer.aux_elements_per_param()
    }

    pub fn feature_entry_count(&self) -> u32 {
        if self.options.feature_grid.is_enabled() {
            self.options.feature_grid.entry_count()
        } else {
            0
        }
    }

    /// Optimizer step index; restarts from zero on every reset.
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn advance_step(&mut self) {
        self.step = self.step.wrapping_add(1);
    }

    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn is_reset_pending(&self) -> bool {
        self.reset_pending
    }

    pub fn allocate<B>(&self, backend: &mut B, resources: &mut ResourceSet<B>)
    where
        B: Backend,
    {
        if !self.active {
            return;
        }

        let params = self.param_count as u64;

        for tag in [BufferTag::NnPrimal, BufferTag::NnFilteredPrimal] {
            resources.allocate(
                backend,
                tag,
                BufferDesc::structured::<f32>(tag.label(), params),
            );
        }

        resources.allocate(
            backend,
            BufferTag::NnGradient,
            BufferDesc::structured::<i32>(
                BufferTag::NnGradient.label(),
                params,
            ),
        );

        resources.allocate(
            backend,
            BufferTag::NnGradientCount,
            BufferDesc::structured::<u32>(
                BufferTag::NnGradientCount.label(),
                params,
            ),
        );

        resources.allocate(
            backend,
            BufferTag::NnGradientAux,
            BufferDesc::structured::<f32>(
                BufferTag::NnGradientAux.label(),
                self.aux_count() as u64,
            ),
        );

        if self.options.feature_grid.is_enabled() {
            resources.allocate(
                backend,
                BufferTag::FeatureHashGridEntries,
                BufferDesc::structured::<gpu::HashGridEntry>(
                    BufferTag::FeatureHashGridEntries.label(),
                    self.feature_entry_count() as u64,
                ),
            );
        }
    }

    pub fn create_passes<B>(
        &self,
        backend: &mut B,
        passes: &mut Passes<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        if !self.active {
            return Ok(());
        }

        for (role, kernel) in [
            (PassRole::NnReset, BuiltinKernel::NnReset),
            (PassRole::NnGradientClear, BuiltinKernel::GradientClear),
            (PassRole::NnGradientDescent, BuiltinKernel::GradientDescent),
        ] {
            let pass = ComputePass::builder(role.label())
                .build(backend, ProgramSource::Builtin(kernel))?;

            passes.insert(role, pass);
        }

        Ok(())
    }

    /// Defines describing the network to kernels that train or query it.
    pub fn defines(&self) -> Defines {
        let options = &self.options;
        let optimizer = &options.optimizer;
        let [param_0, param_1, param_2] = optimizer.hyperparameters();
        let [lower_bound, upper_bound] = options.weight_init_bound;
        let mut defines = Defines::default();

        defines
            .set("NN_PARAM_COUNT", self.param_count)
            .set("NN_LAYER_WIDTH", options.layer_width)
            .set("MLP_COUNT", options.mlp_count() as u32)
            .set("NN_TRAINING_BOUNCES", options.training_bounces)
            .set("NN_WEIGHT_INIT_LOWER_BOUND", lower_bound)
            .set("NN_WEIGHT_INIT_UPPER_BOUND", upper_bound)
            .set("NN_GRADIENT_AUX_ELEMENTS", self.aux_count())
            .set("NN_OPTIMIZER_TYPE", optimizer.kind())
            .set("NN_LEARNING_RATE", optimizer.learning_rate())
            .set("NN_PARAM_0", param_0)
            .set("NN_PARAM_1", param_1)
            .set("NN_PARAM_2", param_2)
            .set("NN_FILTER_ALPHA", options.filter_alpha)
            .set("FEATURE_HASH_GRID_SIZE", options.feature_grid.size)
            .set(
                "FEATURE_HASH_GRID_PLACES_PER_ELEMENT",
                options.feature_grid.places_per_element,
            )
            .set(
                "FEATURE_HASH_GRID_PROBING_SIZE",
                options.feature_grid.probing_size,
            );

        for (idx, layer_count) in options.layer_counts.iter().enumerate() {
            defines.set(format!("NN_LAYER_COUNT{idx}"), *layer_count);
        }

        defines
    }

    /// Binds what the training dispatch needs: the primal parameters and the
    /// gradient accumulators.
    pub fn bind_training<B>(
        &self,
        resources: &ResourceSet<B>,
        vars: &mut ShaderVars<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        vars.set_buffer(gpu::PRIMAL, resources.get(BufferTag::NnPrimal)?)
            .set_buffer(gpu::GRADIENT, resources.get(BufferTag::NnGradient)?)
            .set_buffer(
                gpu::GRADIENT_COUNT,
                resources.get(BufferTag::NnGradientCount)?,
            );

        self.bind_feature_grid(resources, vars)
    }

    /// Binds what querying dispatches need: the filtered parameters, exposed
    /// under the name kernels use for the parameters they evaluate.
    pub fn bind_query<B>(
        &self,
        resources: &ResourceSet<B>,
        vars: &mut ShaderVars<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        vars.set_buffer(
            gpu::PRIMAL,
            resources.get(BufferTag::NnFilteredPrimal)?,
        );

        self.bind_feature_grid(resources, vars)
    }

    fn bind_feature_grid<B>(
        &self,
        resources: &ResourceSet<B>,
        vars: &mut ShaderVars<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        if self.options.feature_grid.is_enabled() {
            vars.set_buffer(
                gpu::FEATURE_HASH_GRID_ENTRIES,
                resources.get(BufferTag::FeatureHashGridEntries)?,
            );
        }

        Ok(())
    }

    /// Re-initializes the parameters (and clears everything derived from
    /// them), if a reset is pending; returns whether anything was
    /// dispatched.
    pub fn reset<B>(
        &mut self,
        backend: &mut B,
        passes: &Passes<B>,
        resources: &ResourceSet<B>,
    ) -> Result<bool>
    where
        B: Backend,
    {
        if !self.active || !self.reset_pending {
            return Ok(false);
        }

        let [lower_bound, upper_bound] = self.options.weight_init_bound;

        let params = gpu::NnResetPassParams {
            param_count: self.param_count,
            aux_count: self.aux_count(),
            feature_entry_count: self.feature_entry_count(),
            seed: self.options.reset_seed,
            lower_bound,
            upper_bound,
            ..Default::default()
        };

        debug!(
            "Resetting neural cache; params={}, aux={}, feature-entries={}",
            params.param_count, params.aux_count, params.feature_entry_count,
        );

        let mut vars = ShaderVars::new();

        vars.set_buffer(gpu::PRIMAL, resources.get(BufferTag::NnPrimal)?)
            .set_buffer(
                gpu::FILTERED_PRIMAL,
                resources.get(BufferTag::NnFilteredPrimal)?,
            )
            .set_buffer(gpu::GRADIENT, resources.get(BufferTag::NnGradient)?)
            .set_buffer(
                gpu::GRADIENT_COUNT,
                resources.get(BufferTag::NnGradientCount)?,
            )
            .set_buffer(
                gpu::GRADIENT_AUX,
                resources.get(BufferTag::NnGradientAux)?,
            );

        self.bind_feature_grid(resources, &mut vars)?;

        passes.get(PassRole::NnReset)?.run(
            backend,
            &vars,
            uvec2(params.thread_count(), 1),
            &params,
        )?;

        self.step = 0;
        self.reset_pending = false;

        Ok(true)
    }

    /// Zeroes the gradient accumulators; must precede every accumulation.
    pub fn clear_gradients<B>(
        &self,
        backend: &mut B,
        passes: &Passes<B>,
        resources: &ResourceSet<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        if !self.is_training() {
            return Ok(());
        }

        let mut vars = ShaderVars::new();

        vars.set_buffer(gpu::GRADIENT, resources.get(BufferTag::NnGradient)?)
            .set_buffer(
                gpu::GRADIENT_COUNT,
                resources.get(BufferTag::NnGradientCount)?,
            );

        passes.get(PassRole::NnGradientClear)?.run(
            backend,
            &vars,
            uvec2(self.param_count, 1),
            &gpu::GradientClearPassParams {
                param_count: self.param_count,
                ..Default::default()
            },
        )
    }

    /// Applies one optimizer step using the accumulated gradients and
    /// refreshes the filtered parameters.
    pub fn descend<B>(
        &self,
        backend: &mut B,
        passes: &Passes<B>,
        resources: &ResourceSet<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        if !self.is_training() {
            return Ok(());
        }

        let optimizer = &self.options.optimizer;
        let [param_0, param_1, param_2] = optimizer.hyperparameters();
        let mut vars = ShaderVars::new();

        vars.set_buffer(gpu::PRIMAL, resources.get(BufferTag::NnPrimal)?)
            .set_buffer(
                gpu::FILTERED_PRIMAL,
                resources.get(BufferTag::NnFilteredPrimal)?,
            )
            .set_buffer(gpu::GRADIENT, resources.get(BufferTag::NnGradient)?)
            .set_buffer(
                gpu::GRADIENT_COUNT,
                resources.get(BufferTag::NnGradientCount)?,
            )
            .set_buffer(
                gpu::GRADIENT_AUX,
                resources.get(BufferTag::NnGradientAux)?,
            );

        passes.get(PassRole::NnGradientDescent)?.run(
            backend,
            &vars,
            uvec2(self.param_count, 1),
            &gpu::GradientDescentPassParams {
                param_count: self.param_count,
                step: self.step,
                optimizer: optimizer.kind(),
                learning_rate: optimizer.learning_rate(),
                param_0,
                param_1,
                param_2,
                filter_alpha: self.options.filter_alpha,
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        ExternalKernel, FeatureGridOptions, Optimizer, ReferenceBackend,
    };

    fn options(width: u32, layer_counts: Vec<u32>) -> NeuralCacheOptions {
        NeuralCacheOptions {
            layer_width: width,
            layer_counts,
            ..Default::default()
        }
    }

    struct Fixture {
        backend: ReferenceBackend,
        resources: ResourceSet<ReferenceBackend>,
        passes: Passes<ReferenceBackend>,
        target: NeuralCache,
    }

    impl Fixture {
        fn new(options: NeuralCacheOptions) -> Self {
            let mut backend = ReferenceBackend::new();
            let mut resources = ResourceSet::new();
            let mut passes = Passes::new();
            let mut target = NeuralCache::default();

            target.configure(&options, true);
            target.allocate(&mut backend, &mut resources);
            target.create_passes(&mut backend, &mut passes).unwrap();

            Self {
                backend,
                resources,
                passes,
                target,
            }
        }

        fn read<T>(&self, tag: BufferTag) -> Vec<T>
        where
            T: bytemuck::Pod,
        {
            self.backend.read(self.resources.get(tag).unwrap())
        }

        fn reset(&mut self) -> bool {
            self.target
                .reset(&mut self.backend, &self.passes, &self.resources)
                .unwrap()
        }

        fn clear_gradients(&mut self) {
            self.target
                .clear_gradients(
                    &mut self.backend,
                    &self.passes,
                    &self.resources,
                )
                .unwrap();
        }

        fn descend(&mut self) {
            self.target
                .descend(&mut self.backend, &self.passes, &self.resources)
                .unwrap();
        }
    }

    #[test]
    fn param_count_saturates() {
        assert_eq!(u32::MAX, param_count(&options(128, vec![300_000])));
    }

    #[test]
    fn param_count_formula() {
        assert_eq!((16 * 16 + 16) * 2, param_count(&options(16, vec![2])));

        assert_eq!(
            (32 * 32 + 32) * (4 + 2 + 1),
            param_count(&options(32, vec![4, 2, 1]))
        );

        let mut with_features = options(16, vec![2]);

        with_features.feature_grid = FeatureGridOptions {
            size: 4096,
            places_per_element: 4,
            probing_size: 2,
        };

        assert_eq!((16 * 16 + 16) * 2 + 4096, param_count(&with_features));

        // Size of a disabled grid doesn't count
        with_features.feature_grid.probing_size = 0;

        assert_eq!((16 * 16 + 16) * 2, param_count(&with_features));
    }

    #[test]
    fn param_count_depends_only_on_topology() {
        let base = options(32, vec![4]);

        assert_eq!(param_count(&base), param_count(&base.clone()));

        let non_topology: [fn(&mut NeuralCacheOptions); 5] = [
            |o| o.filter_alpha = 0.5,
            |o| o.optimizer = Optimizer::default_sgd(),
            |o| o.train = false,
            |o| o.reset_seed = 1234,
            |o| o.weight_init_bound = [-1.0, 1.0],
        ];

        for change in non_topology {
            let mut changed = base.clone();

            change(&mut changed);

            assert_eq!(param_count(&base), param_count(&changed));
        }

        let topology: [fn(&mut NeuralCacheOptions); 4] = [
            |o| o.layer_width = 64,
            |o| o.layer_counts = vec![5],
            |o| o.layer_counts = vec![4, 1],
            |o| {
                o.feature_grid.probing_size = 1;
            },
        ];

        for change in topology {
            let mut changed = base.clone();

            change(&mut changed);

            assert_ne!(param_count(&base), param_count(&changed));
        }
    }

    #[test]
    fn allocate() {
        let mut opts = options(16, vec![2]);

        opts.optimizer = Optimizer::default_adam();
        opts.feature_grid = FeatureGridOptions {
            size: 4096,
            places_per_element: 4,
            probing_size: 2,
        };

        let target = Fixture::new(opts);
        let n = (16 * 16 + 16) * 2 + 4096;

        assert_eq!(n, target.target.param_count());
        assert_eq!(2 * n, target.target.aux_count());

        for (tag, len) in [
            (BufferTag::NnPrimal, n),
            (BufferTag::NnFilteredPrimal, n),
            (BufferTag::NnGradient, n),
            (BufferTag::NnGradientCount, n),
            (BufferTag::NnGradientAux, 2 * n),
            (BufferTag::FeatureHashGridEntries, 1024),
        ] {
            assert_eq!(
                len as u64,
                target.resources.desc(tag).unwrap().element_count,
                "{tag:?}"
            );
        }
    }

    #[test]
    fn reset_is_reproducible() {
        let mut opts = options(16, vec![1]);

        opts.weight_init_bound = [-0.25, 0.75];

        let mut target = Fixture::new(opts);

        assert!(target.reset());
        assert!(!target.reset());

        let primal = target.read::<f32>(BufferTag::NnPrimal);

        assert!(primal.iter().all(|w| (-0.25..=0.75).contains(w)));
        assert!(primal.iter().any(|w| *w != primal[0]));
        assert_eq!(primal, target.read::<f32>(BufferTag::NnFilteredPrimal));

        // Scribble over the state, then reset again
        target.target.advance_step();
        target.backend.write(
            target.resources.get(BufferTag::NnGradientAux).unwrap(),
            &vec![1.0f32; target.target.aux_count() as usize],
        );
        target.target.request_reset();

        assert!(target.reset());

        assert_eq!(0, target.target.step());
        assert_eq!(primal, target.read::<f32>(BufferTag::NnPrimal));
        assert_eq!(primal, target.read::<f32>(BufferTag::NnFilteredPrimal));

        assert!(target
            .read::<f32>(BufferTag::NnGradientAux)
            .iter()
            .all(|v| *v == 0.0));

        assert!(target
            .read::<i32>(BufferTag::NnGradient)
            .iter()
            .all(|v| *v == 0));
    }

    #[test]
    fn gradient_clear_precedes_accumulation() {
        const SAMPLES: u32 = 37;
        const PARAM: usize = 5;

        let mut target = Fixture::new(options(16, vec![1]));

        target.backend.register_kernel("accumulate", |inv| {
            inv.with_buffers_mut2::<i32, u32, _>(
                gpu::GRADIENT,
                gpu::GRADIENT_COUNT,
                |gradient, count| {
                    for _ in 0..SAMPLES {
                        gpu::gradient_accumulate(gradient, count, PARAM, 0.5);
                    }
                },
            )
        });

        let accumulate = ComputePass::builder("accumulate")
            .build(
                &mut target.backend,
                ProgramSource::External(ExternalKernel::host("accumulate")),
            )
            .unwrap();

        for _ in 0..2 {
            target.clear_gradients();

            assert!(target
                .read::<i32>(BufferTag::NnGradient)
                .iter()
                .all(|v| *v == 0));

            assert!(target
                .read::<u32>(BufferTag::NnGradientCount)
                .iter()
                .all(|v| *v == 0));

            let mut vars = ShaderVars::new();

            target
                .target
                .bind_training(&target.resources, &mut vars)
                .unwrap();

            accumulate
                .run(&mut target.backend, &vars, uvec2(1, 1), &0u32)
                .unwrap();

            let count = target.read::<u32>(BufferTag::NnGradientCount);

            assert_eq!(SAMPLES, count[PARAM]);
            assert_eq!(SAMPLES, count.iter().sum::<u32>());
        }
    }

    #[test]
    fn descend_filters_parameters() {
        let mut opts = options(16, vec![1]);

        opts.optimizer = Optimizer::Sgd {
            learning_rate: 0.5,
            momentum: 0.0,
            dampening: 0.0,
        };
        opts.filter_alpha = 0.75;

        let mut target = Fixture::new(opts);

        target.reset();
        target.clear_gradients();

        let initial = target.read::<f32>(BufferTag::NnPrimal);
        let mut gradient = target.read::<i32>(BufferTag::NnGradient);
        let mut count = target.read::<u32>(BufferTag::NnGradientCount);

        gpu::gradient_accumulate(&mut gradient, &mut count, 0, 1.0);

        target.backend.write(
            target.resources.get(BufferTag::NnGradient).unwrap(),
            &gradient,
        );

        target.backend.write(
            target.resources.get(BufferTag::NnGradientCount).unwrap(),
            &count,
        );

        target.descend();

        let primal = target.read::<f32>(BufferTag::NnPrimal);
        let filtered = target.read::<f32>(BufferTag::NnFilteredPrimal);

        assert_relative_eq!(initial[0] - 0.5, primal[0], epsilon = 1e-6);

        assert_relative_eq!(
            0.75 * initial[0] + 0.25 * primal[0],
            filtered[0],
            epsilon = 1e-6
        );

        // Parameters without samples keep their weights
        assert_eq!(initial[1..], primal[1..]);

        for (initial, filtered) in initial.iter().zip(&filtered).skip(1) {
            assert_relative_eq!(*initial, *filtered, epsilon = 1e-6);
        }
    }

    #[test]
    fn frozen_network_skips_training_dispatches() {
        let mut opts = options(16, vec![1]);

        opts.train = false;

        let mut target = Fixture::new(opts);

        assert!(target.target.is_active());
        assert!(!target.target.is_training());

        target.clear_gradients();
        target.descend();

        assert!(target.backend.dispatches().is_empty());

        let mut vars = ShaderVars::new();

        target.target.bind_query(&target.resources, &mut vars).unwrap();

        assert!(vars.contains(gpu::PRIMAL));
    }
}

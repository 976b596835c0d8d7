use std::mem;
use std::ops::{Deref, DerefMut};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    gpu, LightBvhOptions, RussianRoulette, RussianRouletteOptions,
    SurvivalProbOption,
};

/// Largest accepted `hashMapSizeExponent`.
pub const MAX_HASH_MAP_SIZE_EXPONENT: u32 = 28;

/// Largest number of parallel sub-networks.
pub const MAX_MLP_COUNT: usize = 3;

/// Largest layer count of a single sub-network.
pub const MAX_MLP_LAYERS: u32 = 16;

/// Layer widths the network kernels are compiled for.
pub const NN_LAYER_WIDTHS: [u32; 4] = [16, 32, 64, 128];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// First bounce (inclusive) that contributes to the output color.
    pub lower_bounce_count: u32,

    /// Last bounce (inclusive) that contributes to the output color.
    pub upper_bounce_count: u32,

    pub use_importance_sampling: bool,
    pub use_nee: bool,
    pub use_mis: bool,
    pub mis_use_power_heuristic: bool,
    pub russian_roulette: RussianRouletteOptions,
    pub hash_cache: HashCacheOptions,
    pub neural_cache: NeuralCacheOptions,
    pub debug: DebugOptions,

    /// Forwarded verbatim to the emissive light sampler.
    pub light_bvh_options: LightBvhOptions,
}

impl Config {
    pub fn russian_roulette(&self) -> RussianRoulette {
        RussianRoulette::new(&self.russian_roulette)
    }

    /// Brings every field into its accepted range, logging each correction.
    pub fn normalize(&mut self) {
        if self.lower_bounce_count > self.upper_bounce_count {
            warn!(
                "lowerBounceCount ({}) exceeds upperBounceCount ({}); clamping",
                self.lower_bounce_count, self.upper_bounce_count,
            );

            self.lower_bounce_count = self.upper_bounce_count;
        }

        self.normalize_russian_roulette();
        self.hash_cache.normalize();
        self.neural_cache.normalize();
    }

    fn normalize_russian_roulette(&mut self) {
        let rr = &mut self.russian_roulette;

        if rr.survival_prob_option == SurvivalProbOption::Default {
            return;
        }

        if rr.path_contrib_estimate.is_none() {
            warn!(
                "rrSurvivalProbOption {:?} needs a path contribution \
                 estimate; using {:?}",
                rr.survival_prob_option,
                RussianRoulette::DEFAULT_PATH_CONTRIB,
            );

            rr.path_contrib_estimate =
                Some(RussianRoulette::DEFAULT_PATH_CONTRIB);
        }

        if rr.survival_prob_option == SurvivalProbOption::Adrrs
            && rr.pixel_measurement_estimate.is_none()
        {
            warn!(
                "ADRRS needs a pixel measurement estimate; using {:?}",
                RussianRoulette::DEFAULT_PIXEL_MEASUREMENT,
            );

            rr.pixel_measurement_estimate =
                Some(RussianRoulette::DEFAULT_PIXEL_MEASUREMENT);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lower_bounce_count: 0,
            upper_bounce_count: 3,
            use_importance_sampling: true,
            use_nee: true,
            use_mis: true,
            mis_use_power_heuristic: false,
            russian_roulette: Default::default(),
            hash_cache: Default::default(),
            neural_cache: Default::default(),
            debug: Default::default(),
            light_bvh_options: Default::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashCacheOptions {
    /// Entry table holds `2^map_size_exponent` slots; `0` is legal and
    /// degrades the cache to a single global bucket.
    pub map_size_exponent: u32,

    /// Number of slots tested before a key is dropped.
    pub probing_size: u32,

    pub inject_radiance_rr: bool,
    pub inject_radiance_spread: bool,
}

impl HashCacheOptions {
    pub fn map_size(&self) -> u32 {
        1 << self.map_size_exponent.min(MAX_HASH_MAP_SIZE_EXPONENT)
    }

    fn normalize(&mut self) {
        if self.map_size_exponent > MAX_HASH_MAP_SIZE_EXPONENT {
            warn!(
                "hashMapSizeExponent ({}) is too large; clamping to {}",
                self.map_size_exponent, MAX_HASH_MAP_SIZE_EXPONENT,
            );

            self.map_size_exponent = MAX_HASH_MAP_SIZE_EXPONENT;
        }

        if self.probing_size == 0 {
            warn!("hashMapProbingSize must be positive; using 1");

            self.probing_size = 1;
        }
    }
}

impl Default for HashCacheOptions {
    fn default() -> Self {
        Self {
            map_size_exponent: 20,
            probing_size: 8,
            inject_radiance_rr: false,
            inject_radiance_spread: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Optimizer {
    Sgd {
        learning_rate: f32,
        momentum: f32,
        dampening: f32,
    },

    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

impl Optimizer {
    pub fn default_sgd() -> Self {
        Self::Sgd {
            learning_rate: 0.01,
            momentum: 0.9,
            dampening: 0.0,
        }
    }

    pub fn default_adam() -> Self {
        Self::Adam {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// [`gpu::OPTIMIZER_SGD`] or [`gpu::OPTIMIZER_ADAM`].
    pub fn kind(&self) -> u32 {
        match self {
            Optimizer::Sgd { .. } => gpu::OPTIMIZER_SGD,
            Optimizer::Adam { .. } => gpu::OPTIMIZER_ADAM,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            Optimizer::Sgd { learning_rate, .. } => learning_rate,
            Optimizer::Adam { learning_rate, .. } => learning_rate,
        }
    }

    /// Hyperparameters in the order the gradient-descent kernel expects
    /// them.
    pub fn hyperparameters(&self) -> [f32; 3] {
        match *self {
            Optimizer::Sgd {
                momentum,
                dampening,
                ..
            } => [momentum, dampening, 0.0],

            Optimizer::Adam {
                beta1,
                beta2,
                epsilon,
                ..
            } => [beta1, beta2, epsilon],
        }
    }

    pub fn aux_elements_per_param(&self) -> u32 {
        gpu::aux_elements_per_param(self.kind())
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::default_adam()
    }
}

/// Multi-resolution hash encoding used as the network's input features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureGridOptions {
    /// Total number of feature values stored by the grid.
    pub size: u32,
    pub places_per_element: u32,

    /// Slots tested on collision; `0` disables the grid altogether.
    pub probing_size: u32,
}

impl FeatureGridOptions {
    pub fn is_enabled(&self) -> bool {
        self.probing_size > 0
    }

    /// Number of 64-bit entries in the grid's hash table.
    pub fn entry_count(&self) -> u32 {
        self.size / self.places_per_element.max(1)
    }

    fn normalize(&mut self) {
        if self.is_enabled() && self.entry_count() == 0 {
            warn!(
                "feature hash grid has no entries (size={}, \
                 placesPerElement={}); disabling it",
                self.size, self.places_per_element,
            );

            self.probing_size = 0;
        }
    }
}

impl Default for FeatureGridOptions {
    fn default() -> Self {
        Self {
            size: 1 << 16,
            places_per_element: 4,
            probing_size: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralCacheOptions {
    /// When `false`, the network stays queryable but is never updated.
    pub train: bool,

    pub layer_width: u32,

    /// Layer count of each sub-network; its length is the number of
    /// sub-networks.
    pub layer_counts: Vec<u32>,

    pub filter_alpha: f32,
    pub weight_init_bound: [f32; 2],
    pub training_bounces: u32,
    pub optimizer: Optimizer,
    pub feature_grid: FeatureGridOptions,

    /// Seed of the parameter initialization; the same seed always yields
    /// the same initial weights.
    pub reset_seed: u32,
}

impl NeuralCacheOptions {
    pub fn mlp_count(&self) -> usize {
        self.layer_counts.len()
    }

    fn normalize(&mut self) {
        if !NN_LAYER_WIDTHS.contains(&self.layer_width) {
            let width = NN_LAYER_WIDTHS
                .iter()
                .copied()
                .min_by_key(|width| width.abs_diff(self.layer_width))
                .unwrap_or(NN_LAYER_WIDTHS[0]);

            warn!(
                "nnLayerWidth ({}) is not supported; using {}",
                self.layer_width, width,
            );

            self.layer_width = width;
        }

        if self.layer_counts.is_empty() {
            warn!("nnLayerCounts is empty; using a single sub-network");

            self.layer_counts = Self::default().layer_counts;
        }

        if self.layer_counts.len() > MAX_MLP_COUNT {
            warn!(
                "nnLayerCounts describes {} sub-networks; keeping the first {}",
                self.layer_counts.len(),
                MAX_MLP_COUNT,
            );

            self.layer_counts.truncate(MAX_MLP_COUNT);
        }

        for count in &mut self.layer_counts {
            if !(1..=MAX_MLP_LAYERS).contains(count) {
                let clamped = (*count).clamp(1, MAX_MLP_LAYERS);

                warn!(
                    "nnLayerCounts contains {count} layers; using {clamped}"
                );

                *count = clamped;
            }
        }

        if !(0.0..=1.0).contains(&self.filter_alpha) {
            let alpha = if self.filter_alpha.is_nan() {
                Self::default().filter_alpha
            } else {
                self.filter_alpha.clamp(0.0, 1.0)
            };

            warn!(
                "nnFilterAlpha ({}) is out of range; using {}",
                self.filter_alpha, alpha,
            );

            self.filter_alpha = alpha;
        }

        let [lower, upper] = self.weight_init_bound;

        if lower > upper {
            warn!(
                "nnWeightInitBound is reversed ({lower} > {upper}); swapping"
            );

            self.weight_init_bound = [upper, lower];
        }

        self.feature_grid.normalize();
    }
}

impl Default for NeuralCacheOptions {
    fn default() -> Self {
        Self {
            train: true,
            layer_width: 32,
            layer_counts: vec![4],
            filter_alpha: 0.99,
            weight_init_bound: [-0.05, 0.05],
            training_bounces: 3,
            optimizer: Default::default(),
            feature_grid: Default::default(),
            reset_seed: 0x5eed,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    pub debug_color: bool,
    pub debug_voxels: bool,
    pub debug_levels: bool,
    pub debug_path_length: bool,
    pub nn_debug_output: bool,
    pub nirc_debug: bool,
    pub nirc_debug_mlp_index: u32,
    pub nirc_debug_show_transmission: bool,
    pub nirc_debug_apply_bsdf: bool,
    pub hash_cache_debug_vis: bool,
}

impl DebugOptions {
    pub fn hash_cache_debug_flags(&self) -> bool {
        self.debug_color || self.debug_voxels || self.debug_levels
    }

    pub fn neural_cache_debug_vis(&self) -> bool {
        self.nn_debug_output || self.nirc_debug
    }

    pub fn debug_vis(&self) -> bool {
        self.neural_cache_debug_vis() || self.hash_cache_debug_vis
    }

    /// Cache visualized by the debug pass; the neural cache wins when both
    /// are requested.
    pub fn debug_vis_source(&self) -> u32 {
        if self.neural_cache_debug_vis() {
            gpu::DEBUG_SOURCE_NEURAL_CACHE
        } else {
            gpu::DEBUG_SOURCE_HASH_CACHE
        }
    }
}

/// Configuration pending application.
///
/// Mutable access marks the configuration dirty; edits become visible
/// through [`Self::applied()`] only after [`Self::apply()`].
#[derive(Clone, Debug)]
pub struct Configuration {
    applied: Config,
    pending: Config,
    dirty: bool,
}

impl Configuration {
    pub fn new(config: Config) -> Self {
        Self {
            applied: config.clone(),
            pending: config,
            dirty: true,
        }
    }

    pub fn applied(&self) -> &Config {
        &self.applied
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Normalizes and applies pending edits; returns whether there were
    /// any.
    pub fn apply(&mut self) -> bool {
        if !mem::take(&mut self.dirty) {
            return false;
        }

        self.pending.normalize();
        self.applied = self.pending.clone();

        true
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl Deref for Configuration {
    type Target = Config;

    fn deref(&self) -> &Self::Target {
        &self.pending
    }
}

impl DerefMut for Configuration {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty = true;

        &mut self.pending
    }
}

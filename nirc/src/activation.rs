use crate::Config;

/// Which caches exist for the current configuration.
///
/// A cache is active iff at least one consumer needs it; inactive caches own
/// no buffers and no passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActivationState {
    pub hash_cache: bool,
    pub neural_cache: bool,
}

impl ActivationState {
    pub fn new(config: &Config) -> Self {
        let rr = config.russian_roulette();
        let hc = &config.hash_cache;
        let dbg = &config.debug;

        let hash_cache = rr.requires_hash_cache()
            || hc.inject_radiance_rr
            || hc.inject_radiance_spread
            || dbg.hash_cache_debug_flags()
            || dbg.hash_cache_debug_vis;

        let neural_cache =
            rr.requires_neural_cache() || dbg.neural_cache_debug_vis();

        Self {
            hash_cache,
            neural_cache,
        }
    }

    pub fn any(&self) -> bool {
        self.hash_cache || self.neural_cache
    }
}

use std::collections::BTreeMap;

use derivative::Derivative;

use crate::{Backend, ComputePass, Error, Result};

/// Closed set of passes the orchestrator may own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassRole {
    /// Shared dispatch filling the hash cache and accumulating gradients.
    TrainFillCache,
    HashCacheResolve,
    HashCacheReset,
    NnReset,
    PathTracing,
    NnGradientClear,
    NnGradientDescent,
    DebugVis,
}

impl PassRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::TrainFillCache => "train_fill_cache",
            Self::HashCacheResolve => "hash_cache_resolve",
            Self::HashCacheReset => "hash_cache_reset",
            Self::NnReset => "nn_reset",
            Self::PathTracing => "path_tracing",
            Self::NnGradientClear => "nn_gradient_clear",
            Self::NnGradientDescent => "nn_gradient_descent",
            Self::DebugVis => "debug_vis",
        }
    }
}

/// Compiled passes keyed by their role.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Default(bound = ""))]
pub struct Passes<B>
where
    B: Backend,
{
    passes: BTreeMap<PassRole, ComputePass<B>>,
}

impl<B> Passes<B>
where
    B: Backend,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: PassRole, pass: ComputePass<B>) {
        self.passes.insert(role, pass);
    }

    pub fn get(&self, role: PassRole) -> Result<&ComputePass<B>> {
        self.passes.get(&role).ok_or(Error::MissingPass(role))
    }

    pub fn contains(&self, role: PassRole) -> bool {
        self.passes.contains_key(&role)
    }

    pub fn roles(&self) -> impl Iterator<Item = PassRole> + '_ {
        self.passes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }
}

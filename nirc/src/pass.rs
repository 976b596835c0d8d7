use std::marker::PhantomData;

use bytemuck::Pod;
use derivative::Derivative;
use glam::UVec2;
use log::{debug, trace};

use crate::{
    Backend, DefineValue, Defines, ProgramDesc, ProgramSource, Result,
    ShaderVars,
};

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ComputePass<B>
where
    B: Backend,
{
    label: String,
    program: B::Program,
}

impl<B> ComputePass<B>
where
    B: Backend,
{
    pub fn builder(label: impl ToString) -> ComputePassBuilder<B> {
        ComputePassBuilder {
            label: label.to_string(),
            defines: Default::default(),
            _backend: PhantomData,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Dispatches `size.x * size.y` threads.
    pub fn run<P>(
        &self,
        backend: &mut B,
        vars: &ShaderVars<B>,
        size: UVec2,
        params: &P,
    ) -> Result<()>
    where
        P: Pod,
    {
        trace!(
            "Dispatching pass `{}`; size={}x{}",
            self.label,
            size.x,
            size.y
        );

        backend.dispatch(
            &self.program,
            vars,
            bytemuck::bytes_of(params),
            size.extend(1),
        )
    }
}

pub struct ComputePassBuilder<B>
where
    B: Backend,
{
    label: String,
    defines: Defines,
    _backend: PhantomData<fn() -> B>,
}

impl<B> ComputePassBuilder<B>
where
    B: Backend,
{
    pub fn define(
        mut self,
        name: &'static str,
        value: impl Into<DefineValue>,
    ) -> Self {
        self.defines.set(name, value);
        self
    }

    pub fn defines(mut self, defines: &Defines) -> Self {
        self.defines.extend(defines);
        self
    }

    pub fn build(
        self,
        backend: &mut B,
        source: ProgramSource,
    ) -> Result<ComputePass<B>> {
        debug!(
            "Initializing pass: {} ({} defines)",
            self.label,
            self.defines.len()
        );

        let program = backend.create_program(&ProgramDesc {
            label: format!("nirc_{}_pass", self.label),
            source,
            defines: self.defines,
        })?;

        Ok(ComputePass {
            label: self.label,
            program,
        })
    }
}

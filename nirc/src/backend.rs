//! Seam between the orchestrator and whatever executes its kernels.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::{fmt, mem};

use derivative::Derivative;
use glam::{UVec2, UVec3};

use crate::Result;

/// Executes compute kernels.
///
/// Dispatches are executed in program order: a dispatch observes all writes
/// of every dispatch issued before it.
pub trait Backend: Sized {
    type Buffer: Clone + fmt::Debug;
    type Image: Clone + fmt::Debug;
    type Program: fmt::Debug;

    /// Allocates a zero-initialized buffer.
    fn create_buffer(&mut self, desc: &BufferDesc) -> Self::Buffer;

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program>;

    /// Runs `program` over `threads` invocations (threads, not workgroups).
    fn dispatch(
        &mut self,
        program: &Self::Program,
        vars: &ShaderVars<Self>,
        params: &[u8],
        threads: UVec3,
    ) -> Result<()>;

    fn clear_image(&mut self, image: &Self::Image);

    fn image_size(&self, image: &Self::Image) -> UVec2;

    /// Submits whatever has been recorded so far.
    fn flush(&mut self) {
        //
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: Cow<'static, str>,
    pub element_size: u64,
    pub element_count: u64,
}

impl BufferDesc {
    /// Describes a buffer of `count` elements of type `T`.
    pub fn structured<T>(
        label: impl Into<Cow<'static, str>>,
        count: u64,
    ) -> Self {
        Self {
            label: label.into(),
            element_size: mem::size_of::<T>() as u64,
            element_count: count,
        }
    }

    pub fn size(&self) -> u64 {
        self.element_size * self.element_count
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgramDesc {
    pub label: String,
    pub source: ProgramSource,
    pub defines: Defines,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramSource {
    Builtin(BuiltinKernel),
    External(ExternalKernel),
}

/// Kernels shipped with this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinKernel {
    HashCacheReset,
    HashCacheResolve,
    GradientClear,
    GradientDescent,
    NnReset,
}

/// Kernel provided by the embedder (training, path tracing, debug
/// visualization).
///
/// `wgsl` is what GPU backends compile; host backends look the kernel up by
/// `name` instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalKernel {
    pub name: Cow<'static, str>,
    pub wgsl: Cow<'static, str>,
    pub entry_point: Cow<'static, str>,
}

impl ExternalKernel {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        wgsl: impl Into<Cow<'static, str>>,
        entry_point: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            wgsl: wgsl.into(),
            entry_point: entry_point.into(),
        }
    }

    /// Creates a kernel that exists only on the host (see:
    /// [`crate::ReferenceBackend::register_kernel()`]).
    pub fn host(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, "", "main")
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DefineValue {
    Bool(bool),
    U32(u32),
    I32(i32),
    F32(f32),
}

impl DefineValue {
    pub fn as_f64(self) -> f64 {
        match self {
            DefineValue::Bool(value) => value as u8 as f64,
            DefineValue::U32(value) => value as f64,
            DefineValue::I32(value) => value as f64,
            DefineValue::F32(value) => value as f64,
        }
    }
}

impl From<bool> for DefineValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for DefineValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<i32> for DefineValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<f32> for DefineValue {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

/// Compile-time constants of a program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Defines {
    values: BTreeMap<Cow<'static, str>, DefineValue>,
}

impl Defines {
    pub fn set(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<DefineValue>,
    ) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<DefineValue> {
        self.values.get(name).copied()
    }

    pub fn extend(&mut self, other: &Defines) -> &mut Self {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), *value);
        }

        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DefineValue)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_ref(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub enum ShaderVar<B>
where
    B: Backend,
{
    Buffer(B::Buffer),
    Image(B::Image),
}

/// Resources bound to a single dispatch, keyed by the name the kernel uses.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""), Default(bound = ""))]
pub struct ShaderVars<B>
where
    B: Backend,
{
    vars: Vec<(Cow<'static, str>, ShaderVar<B>)>,
}

impl<B> ShaderVars<B>
where
    B: Backend,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buffer(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        buffer: &B::Buffer,
    ) -> &mut Self {
        self.set(name.into(), ShaderVar::Buffer(buffer.clone()))
    }

    pub fn set_image(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        image: &B::Image,
    ) -> &mut Self {
        self.set(name.into(), ShaderVar::Image(image.clone()))
    }

    fn set(&mut self, name: Cow<'static, str>, var: ShaderVar<B>) -> &mut Self {
        if let Some(slot) = self.vars.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = var;
        } else {
            self.vars.push((name, var));
        }

        self
    }

    pub fn get(&self, name: &str) -> Option<&ShaderVar<B>> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, var)| var)
    }

    pub fn buffer(&self, name: &str) -> Option<&B::Buffer> {
        match self.get(name)? {
            ShaderVar::Buffer(buffer) => Some(buffer),
            ShaderVar::Image(_) => None,
        }
    }

    pub fn image(&self, name: &str) -> Option<&B::Image> {
        match self.get(name)? {
            ShaderVar::Image(image) => Some(image),
            ShaderVar::Buffer(_) => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ShaderVar<B>)> + '_ {
        self.vars.iter().map(|(name, var)| (name.as_ref(), var))
    }
}

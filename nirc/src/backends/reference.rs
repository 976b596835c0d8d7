use std::cell::{Ref, RefCell, RefMut};
use std::mem;
use std::rc::Rc;

use bytemuck::Pod;
use derivative::Derivative;
use fxhash::FxHashMap;
use glam::{UVec2, UVec3, Vec4};
use log::{debug, info};

use crate::{
    gpu, Backend, BufferDesc, BuiltinKernel, Defines, Error, ProgramDesc,
    ProgramSource, Result, ShaderVar, ShaderVars,
};

type HostKernelFn = dyn FnMut(&HostInvocation<'_>) -> Result<()>;

/// Backend that executes every kernel on the calling thread, one invocation
/// after another.
///
/// Built-in kernels run the bodies from [`gpu`]; external kernels have to be
/// registered up front through [`Self::register_kernel()`]. Every dispatch
/// is recorded, which makes this backend the natural choice for tests.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct ReferenceBackend {
    #[derivative(Debug = "ignore")]
    kernels: FxHashMap<String, Rc<RefCell<HostKernelFn>>>,
    dispatches: Vec<DispatchRecord>,
    image_clears: Vec<String>,
    flushes: usize,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `kernel` available to programs created from
    /// [`crate::ExternalKernel`]s named `name`.
    pub fn register_kernel<F>(&mut self, name: impl Into<String>, kernel: F)
    where
        F: FnMut(&HostInvocation<'_>) -> Result<()> + 'static,
    {
        let name = name.into();

        debug!("Registering host kernel `{name}`");

        self.kernels.insert(name, Rc::new(RefCell::new(kernel)));
    }

    pub fn create_image(
        &mut self,
        label: impl ToString,
        size: UVec2,
    ) -> HostImage {
        HostImage {
            label: label.to_string(),
            size,
            data: Rc::new(RefCell::new(vec![
                Vec4::ZERO;
                (size.x * size.y) as usize
            ])),
        }
    }

    /// Copies the buffer's contents out.
    ///
    /// # Panics
    ///
    /// Panics if the buffer's size is not a multiple of `T`'s size.
    pub fn read<T>(&self, buffer: &HostBuffer) -> Vec<T>
    where
        T: Pod,
    {
        bytemuck::cast_slice(&buffer.data.borrow()).to_vec()
    }

    /// Overwrites the beginning of the buffer with `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data` doesn't fit the buffer.
    pub fn write<T>(&self, buffer: &HostBuffer, data: &[T])
    where
        T: Pod,
    {
        let bytes = bytemuck::cast_slice::<T, u8>(data);
        let mut words = buffer.data.borrow_mut();

        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..bytes.len()]
            .copy_from_slice(bytes);
    }

    pub fn image_data(&self, image: &HostImage) -> Vec<Vec4> {
        image.data.borrow().clone()
    }

    /// Every dispatch issued so far, in order.
    pub fn dispatches(&self) -> &[DispatchRecord] {
        &self.dispatches
    }

    /// Labels of the images cleared so far, in order.
    pub fn image_clears(&self) -> &[String] {
        &self.image_clears
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Returns and forgets the dispatches recorded so far.
    pub fn take_dispatches(&mut self) -> Vec<DispatchRecord> {
        mem::take(&mut self.dispatches)
    }
}

impl Backend for ReferenceBackend {
    type Buffer = HostBuffer;
    type Image = HostImage;
    type Program = HostProgram;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Self::Buffer {
        let words = desc.size().div_ceil(4) as usize;

        HostBuffer {
            label: desc.label.to_string(),
            data: Rc::new(RefCell::new(vec![0; words])),
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program> {
        let kernel = match &desc.source {
            ProgramSource::Builtin(kernel) => HostKernel::Builtin(*kernel),

            ProgramSource::External(kernel) => {
                let body = self
                    .kernels
                    .get(kernel.name.as_ref())
                    .ok_or_else(|| {
                        Error::UnknownKernel(kernel.name.to_string())
                    })?;

                HostKernel::External(Rc::clone(body))
            }
        };

        info!("Creating host program `{}`", desc.label);

        Ok(HostProgram {
            label: desc.label.clone(),
            kernel,
            defines: desc.defines.clone(),
        })
    }

    fn dispatch(
        &mut self,
        program: &Self::Program,
        vars: &ShaderVars<Self>,
        params: &[u8],
        threads: UVec3,
    ) -> Result<()> {
        self.dispatches.push(DispatchRecord {
            label: program.label.clone(),
            threads,
            bindings: vars
                .iter()
                .map(|(name, var)| {
                    let resource = match var {
                        ShaderVar::Buffer(buffer) => buffer.label.clone(),
                        ShaderVar::Image(image) => image.label.clone(),
                    };

                    (name.to_string(), resource)
                })
                .collect(),
        });

        let inv = HostInvocation {
            program: &program.label,
            vars,
            params,
            threads,
            defines: &program.defines,
        };

        match &program.kernel {
            HostKernel::Builtin(kernel) => run_builtin(*kernel, &inv),

            HostKernel::External(body) => {
                let mut body = body.try_borrow_mut().map_err(|_| {
                    inv.error("kernel is already being executed")
                })?;

                (*body)(&inv)
            }
        }
    }

    fn clear_image(&mut self, image: &Self::Image) {
        image.data.borrow_mut().fill(Vec4::ZERO);
        self.image_clears.push(image.label.clone());
    }

    fn image_size(&self, image: &Self::Image) -> UVec2 {
        image.size
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// Host-side buffer; clones share the same storage.
#[derive(Clone, Debug)]
pub struct HostBuffer {
    label: String,
    data: Rc<RefCell<Vec<u32>>>,
}

impl HostBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.borrow().len() * 4
    }
}

/// Host-side RGBA image; clones share the same storage.
#[derive(Clone, Debug)]
pub struct HostImage {
    label: String,
    size: UVec2,
    data: Rc<RefCell<Vec<Vec4>>>,
}

impl HostImage {
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct HostProgram {
    label: String,
    kernel: HostKernel,
    defines: Defines,
}

#[derive(Derivative)]
#[derivative(Debug)]
enum HostKernel {
    Builtin(BuiltinKernel),
    External(#[derivative(Debug = "ignore")] Rc<RefCell<HostKernelFn>>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Label of the dispatched program (e.g. `nirc_path_tracing_pass`)
    pub label: String,
    pub threads: UVec3,

    /// Bound variables as `(variable name, resource label)`
    pub bindings: Vec<(String, String)>,
}

impl DispatchRecord {
    /// Label of the resource bound under `name`.
    pub fn binding(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, resource)| resource.as_str())
    }
}

/// What a host kernel sees of its dispatch.
pub struct HostInvocation<'a> {
    program: &'a str,
    vars: &'a ShaderVars<ReferenceBackend>,
    params: &'a [u8],
    threads: UVec3,
    defines: &'a Defines,
}

impl<'a> HostInvocation<'a> {
    pub fn program(&self) -> &str {
        self.program
    }

    pub fn threads(&self) -> UVec3 {
        self.threads
    }

    pub fn thread_count(&self) -> u32 {
        self.threads.x * self.threads.y * self.threads.z
    }

    pub fn defines(&self) -> &Defines {
        self.defines
    }

    pub fn vars(&self) -> &ShaderVars<ReferenceBackend> {
        self.vars
    }

    pub fn params<P>(&self) -> Result<P>
    where
        P: Pod,
    {
        let size = mem::size_of::<P>();

        if self.params.len() < size {
            return Err(self.error(format!(
                "expected {size} bytes of parameters, got {}",
                self.params.len()
            )));
        }

        Ok(bytemuck::pod_read_unaligned(&self.params[..size]))
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.vars.contains(name)
    }

    fn host_buffer(&self, name: &str) -> Result<&'a HostBuffer> {
        self.vars
            .buffer(name)
            .ok_or_else(|| Error::MissingBinding {
                program: self.program.to_string(),
                name: name.to_string(),
            })
    }

    fn host_image(&self, name: &str) -> Result<&'a HostImage> {
        self.vars
            .image(name)
            .ok_or_else(|| Error::MissingBinding {
                program: self.program.to_string(),
                name: name.to_string(),
            })
    }

    pub fn buffer(&self, name: &str) -> Result<Ref<'a, Vec<u32>>> {
        self.host_buffer(name)?
            .data
            .try_borrow()
            .map_err(|_| self.aliased(name))
    }

    pub fn buffer_mut(&self, name: &str) -> Result<RefMut<'a, Vec<u32>>> {
        self.host_buffer(name)?
            .data
            .try_borrow_mut()
            .map_err(|_| self.aliased(name))
    }

    /// Reinterprets a buffer's words as `T`s.
    pub fn cast<'b, T>(&self, words: &'b [u32]) -> Result<&'b [T]>
    where
        T: Pod,
    {
        bytemuck::try_cast_slice(words)
            .map_err(|err| self.error(format!("bad buffer layout: {err}")))
    }

    /// See: [`Self::cast()`].
    pub fn cast_mut<'b, T>(&self, words: &'b mut [u32]) -> Result<&'b mut [T]>
    where
        T: Pod,
    {
        bytemuck::try_cast_slice_mut(words)
            .map_err(|err| self.error(format!("bad buffer layout: {err}")))
    }

    pub fn with_buffer_mut<T, F>(&self, name: &str, f: F) -> Result<()>
    where
        T: Pod,
        F: FnOnce(&mut [T]),
    {
        let mut words = self.buffer_mut(name)?;

        f(self.cast_mut(&mut words)?);

        Ok(())
    }

    pub fn with_buffers_mut2<T, U, F>(
        &self,
        name_a: &str,
        name_b: &str,
        f: F,
    ) -> Result<()>
    where
        T: Pod,
        U: Pod,
        F: FnOnce(&mut [T], &mut [U]),
    {
        let mut a = self.buffer_mut(name_a)?;
        let mut b = self.buffer_mut(name_b)?;

        f(self.cast_mut(&mut a)?, self.cast_mut(&mut b)?);

        Ok(())
    }

    /// Runs `f` over the image bound under `name`, passing its size along.
    pub fn with_image_mut<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(UVec2, &mut [Vec4]),
    {
        let image = self.host_image(name)?;

        let mut data = image
            .data
            .try_borrow_mut()
            .map_err(|_| self.aliased(name))?;

        f(image.size, &mut data);

        Ok(())
    }

    fn aliased(&self, name: &str) -> Error {
        self.error(format!("`{name}` is bound more than once"))
    }

    fn error(&self, reason: impl ToString) -> Error {
        Error::Dispatch {
            program: self.program.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn run_builtin(kernel: BuiltinKernel, inv: &HostInvocation<'_>) -> Result<()> {
    let threads = 0..inv.thread_count();

    match kernel {
        BuiltinKernel::HashCacheReset => {
            let params = inv.params::<gpu::HashCacheResetPassParams>()?;
            let mut entries = inv.buffer_mut(gpu::HASH_GRID_ENTRIES)?;
            let mut voxels = inv.buffer_mut(gpu::VOXEL_DATA)?;
            let mut voxels_prev = inv.buffer_mut(gpu::VOXEL_DATA_PREV)?;
            let entries = inv.cast_mut(&mut entries)?;
            let voxels = inv.cast_mut(&mut voxels)?;
            let voxels_prev = inv.cast_mut(&mut voxels_prev)?;

            for id in threads {
                gpu::hash_cache_reset(
                    id,
                    &params,
                    entries,
                    voxels,
                    voxels_prev,
                );
            }
        }

        BuiltinKernel::HashCacheResolve => {
            let params = inv.params::<gpu::HashCacheResolvePassParams>()?;
            let entries = inv.buffer(gpu::HASH_GRID_ENTRIES)?;
            let mut voxels = inv.buffer_mut(gpu::VOXEL_DATA)?;
            let voxels_prev = inv.buffer(gpu::VOXEL_DATA_PREV)?;
            let entries = inv.cast(&entries)?;
            let voxels = inv.cast_mut(&mut voxels)?;
            let voxels_prev = inv.cast(&voxels_prev)?;

            for id in threads {
                gpu::hash_cache_resolve(
                    id,
                    &params,
                    entries,
                    voxels,
                    voxels_prev,
                );
            }
        }

        BuiltinKernel::GradientClear => {
            let params = inv.params::<gpu::GradientClearPassParams>()?;

            inv.with_buffers_mut2::<i32, u32, _>(
                gpu::GRADIENT,
                gpu::GRADIENT_COUNT,
                |gradient, gradient_count| {
                    for id in threads {
                        gpu::gradient_clear(
                            id,
                            &params,
                            gradient,
                            gradient_count,
                        );
                    }
                },
            )?;
        }

        BuiltinKernel::GradientDescent => {
            let params = inv.params::<gpu::GradientDescentPassParams>()?;
            let mut primal = inv.buffer_mut(gpu::PRIMAL)?;
            let mut filtered = inv.buffer_mut(gpu::FILTERED_PRIMAL)?;
            let gradient = inv.buffer(gpu::GRADIENT)?;
            let gradient_count = inv.buffer(gpu::GRADIENT_COUNT)?;
            let mut aux = inv.buffer_mut(gpu::GRADIENT_AUX)?;
            let primal = inv.cast_mut(&mut primal)?;
            let filtered = inv.cast_mut(&mut filtered)?;
            let gradient = inv.cast(&gradient)?;
            let gradient_count = inv.cast(&gradient_count)?;
            let aux = inv.cast_mut(&mut aux)?;

            for id in threads {
                gpu::gradient_descent(
                    id,
                    &params,
                    primal,
                    filtered,
                    gradient,
                    gradient_count,
                    aux,
                );
            }
        }

        BuiltinKernel::NnReset => {
            let params = inv.params::<gpu::NnResetPassParams>()?;
            let mut primal = inv.buffer_mut(gpu::PRIMAL)?;
            let mut filtered = inv.buffer_mut(gpu::FILTERED_PRIMAL)?;
            let mut gradient = inv.buffer_mut(gpu::GRADIENT)?;
            let mut gradient_count = inv.buffer_mut(gpu::GRADIENT_COUNT)?;
            let mut aux = inv.buffer_mut(gpu::GRADIENT_AUX)?;

            // The feature grid is bound only when it's enabled
            let mut feature_entries =
                if inv.is_bound(gpu::FEATURE_HASH_GRID_ENTRIES) {
                    Some(inv.buffer_mut(gpu::FEATURE_HASH_GRID_ENTRIES)?)
                } else {
                    None
                };

            let primal = inv.cast_mut(&mut primal)?;
            let filtered = inv.cast_mut(&mut filtered)?;
            let gradient = inv.cast_mut(&mut gradient)?;
            let gradient_count = inv.cast_mut(&mut gradient_count)?;
            let aux = inv.cast_mut(&mut aux)?;

            let feature_entries: &mut [gpu::HashGridEntry] =
                match &mut feature_entries {
                    Some(words) => inv.cast_mut(words)?,
                    None => &mut [],
                };

            for id in threads {
                gpu::parameter_reset(
                    id,
                    &params,
                    primal,
                    filtered,
                    gradient,
                    gradient_count,
                    aux,
                    feature_entries,
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::{uvec2, uvec3};

    use super::*;
    use crate::{ComputePass, ExternalKernel};

    #[test]
    fn buffers_start_zeroed_and_share_storage() {
        let mut target = ReferenceBackend::new();

        let buffer = target
            .create_buffer(&BufferDesc::structured::<gpu::VoxelRecord>("v", 4));

        assert_eq!(64, buffer.size());

        assert!(target
            .read::<gpu::VoxelRecord>(&buffer)
            .iter()
            .all(|record| *record == gpu::VoxelRecord::EMPTY));

        let alias = buffer.clone();

        target.write(&alias, &[7u32, 8]);

        assert_eq!(vec![7, 8, 0, 0], target.read::<u32>(&buffer)[..4].to_vec());
    }

    #[test]
    fn unknown_kernels_are_rejected() {
        let mut target = ReferenceBackend::new();

        let result = ComputePass::builder("missing").build(
            &mut target,
            ProgramSource::External(ExternalKernel::host("missing")),
        );

        assert!(matches!(
            result,
            Err(Error::UnknownKernel(name)) if name == "missing"
        ));
    }

    #[test]
    fn dispatches_are_recorded() {
        let mut target = ReferenceBackend::new();
        let buffer =
            target.create_buffer(&BufferDesc::structured::<u32>("b", 4));

        target.register_kernel("fill", |inv| {
            let value = inv.params::<u32>()?;
            let count = inv.thread_count() as usize;

            inv.with_buffer_mut::<u32, _>("out", |out| {
                out[..count].fill(value);
            })
        });

        let pass = ComputePass::builder("fill")
            .define("FOO", 1u32)
            .build(
                &mut target,
                ProgramSource::External(ExternalKernel::host("fill")),
            )
            .unwrap();

        let mut vars = ShaderVars::new();

        vars.set_buffer("out", &buffer);

        pass.run(&mut target, &vars, uvec2(3, 1), &5u32).unwrap();

        assert_eq!(vec![5, 5, 5, 0], target.read::<u32>(&buffer));

        let dispatch = &target.dispatches()[0];

        assert_eq!("nirc_fill_pass", dispatch.label);
        assert_eq!(uvec3(3, 1, 1), dispatch.threads);
        assert_eq!(Some("b"), dispatch.binding("out"));
    }

    #[test]
    fn missing_and_aliased_bindings_fail() {
        let mut target = ReferenceBackend::new();

        let buffer = target
            .create_buffer(&BufferDesc::structured::<gpu::VoxelRecord>("v", 4));

        let entries = target.create_buffer(&BufferDesc::structured::<
            gpu::HashGridEntry,
        >("e", 4));

        let pass = ComputePass::builder("reset")
            .build(
                &mut target,
                ProgramSource::Builtin(BuiltinKernel::HashCacheReset),
            )
            .unwrap();

        let params = gpu::HashCacheResetPassParams {
            map_size: 4,
            ..Default::default()
        };

        let mut vars = ShaderVars::new();

        vars.set_buffer(gpu::HASH_GRID_ENTRIES, &entries);

        assert!(matches!(
            pass.run(&mut target, &vars, uvec2(4, 1), &params),
            Err(Error::MissingBinding { .. })
        ));

        vars.set_buffer(gpu::VOXEL_DATA, &buffer)
            .set_buffer(gpu::VOXEL_DATA_PREV, &buffer);

        assert!(matches!(
            pass.run(&mut target, &vars, uvec2(4, 1), &params),
            Err(Error::Dispatch { .. })
        ));
    }

    #[test]
    fn clears_images() {
        let mut target = ReferenceBackend::new();
        let image = target.create_image("color", uvec2(2, 2));

        image.data.borrow_mut()[3] = Vec4::ONE;

        target.clear_image(&image);

        assert_eq!(vec![Vec4::ZERO; 4], target.image_data(&image));
        assert_eq!(["color".to_string()], target.image_clears());
        assert_eq!(uvec2(2, 2), target.image_size(&image));
    }
}

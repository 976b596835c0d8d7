use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{mpsc, Arc};

use bytemuck::Pod;
use glam::{uvec3, UVec2, UVec3};
use log::{debug, info};

use crate::{
    Backend, BufferDesc, BuiltinKernel, Error, ImageFormat, ProgramDesc,
    ProgramSource, Result, ShaderVar, ShaderVars,
};

const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

/// Backend that records dispatches into a command encoder and submits them
/// on [`Backend::flush()`].
///
/// Kernels are WGSL; bindings are matched by global variable name, the
/// push-constant block receives the pass parameters and defines are
/// forwarded as pipeline-overridable constants (those the module doesn't
/// declare get skipped).
#[derive(Debug)]
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    /// Features the device has to be created with.
    pub fn required_features() -> wgpu::Features {
        wgpu::Features::PUSH_CONSTANTS
    }

    /// Limits the device has to be created with.
    pub fn required_limits() -> wgpu::Limits {
        wgpu::Limits {
            max_push_constant_size: 128,
            ..Default::default()
        }
    }

    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            encoder: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn create_image(
        &mut self,
        label: impl AsRef<str>,
        size: UVec2,
        format: ImageFormat,
    ) -> GpuImage {
        let label = label.as_ref();

        info!(
            "Allocating image `{label}`; size={}x{}, format={format:?}",
            size.x, size.y
        );

        create_texture(&self.device, label, size, texture_format(format))
    }

    /// Submits everything recorded so far and copies the buffer's contents
    /// out, blocking until the GPU is done.
    pub fn read<T>(&mut self, buffer: &GpuBuffer) -> Result<Vec<T>>
    where
        T: Pod,
    {
        let size = buffer.buffer.size();

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("nirc_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.encoder()
            .copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);

        self.flush();

        let (tx, rx) = mpsc::channel();
        let slice = staging.slice(..);

        slice.map_async(wgpu::MapMode::Read, move |result| {
            _ = tx.send(result);
        });

        _ = self.device.poll(wgpu::Maintain::Wait);

        let readback_error = |reason: String| Error::Readback {
            label: buffer.label.clone(),
            reason,
        };

        rx.recv()
            .map_err(|err| readback_error(err.to_string()))?
            .map_err(|err| readback_error(err.to_string()))?;

        let data = bytemuck::cast_slice(&slice.get_mapped_range()).to_vec();

        staging.unmap();

        Ok(data)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;

        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nirc_commands"),
            })
        })
    }

    fn bind_group(
        &self,
        program: &GpuProgram,
        group: u32,
        slots: &BindGroupSlots,
        vars: &ShaderVars<Self>,
    ) -> Result<wgpu::BindGroup> {
        let mut resources = Vec::new();

        for slot in &slots.slots {
            let resource = match (slot.kind, vars.get(&slot.name)) {
                (SlotKind::Buffer, Some(ShaderVar::Buffer(buffer))) => {
                    ShaderVar::Buffer(buffer.clone())
                }

                (SlotKind::Image(_), Some(ShaderVar::Image(image))) => {
                    ShaderVar::Image(image.clone())
                }

                (_, Some(_)) => {
                    return Err(Error::Dispatch {
                        program: program.label.clone(),
                        reason: format!(
                            "`{}` is bound to a resource of the wrong kind",
                            slot.name
                        ),
                    });
                }

                // Optional inputs get a placeholder, so that kernels can
                // declare them unconditionally
                (kind, None) => {
                    debug!(
                        "Binding placeholder for `{}` in `{}`",
                        slot.name, program.label
                    );

                    self.placeholder(&slot.name, kind)
                }
            };

            resources.push(resource);
        }

        let entries: Vec<_> = slots
            .slots
            .iter()
            .zip(&resources)
            .map(|(slot, resource)| wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: match resource {
                    ShaderVar::Buffer(buffer) => {
                        buffer.buffer.as_entire_binding()
                    }
                    ShaderVar::Image(image) => {
                        wgpu::BindingResource::TextureView(&image.view)
                    }
                },
            })
            .collect();

        let label = format!("{}_bg{group}", program.label);

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&label),
            layout: &slots.layout,
            entries: &entries,
        }))
    }

    fn placeholder(&self, name: &str, kind: SlotKind) -> ShaderVar<Self> {
        let label = format!("nirc_placeholder_{name}");

        match kind {
            SlotKind::Buffer => ShaderVar::Buffer(create_buffer(
                &self.device,
                &label,
                PLACEHOLDER_BUFFER_SIZE,
            )),

            SlotKind::Image(format) => ShaderVar::Image(create_texture(
                &self.device,
                &label,
                UVec2::ONE,
                format,
            )),
        }
    }
}

const PLACEHOLDER_BUFFER_SIZE: u64 = 256;

impl Backend for WgpuBackend {
    type Buffer = GpuBuffer;
    type Image = GpuImage;
    type Program = GpuProgram;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Self::Buffer {
        // Zero-sized bindings are invalid; sizes have to be 4-aligned
        let size = desc.size().max(4).next_multiple_of(4);

        create_buffer(&self.device, &desc.label, size)
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program> {
        let (source, entry_point) = match &desc.source {
            ProgramSource::Builtin(kernel) => {
                (Cow::Borrowed(builtin_source(*kernel)), "main")
            }
            ProgramSource::External(kernel) => {
                (kernel.wgsl.clone(), kernel.entry_point.as_ref())
            }
        };

        let program_error = |reason: String| Error::ProgramCreation {
            label: desc.label.clone(),
            reason,
        };

        let module = naga::front::wgsl::parse_str(&source)
            .map_err(|err| program_error(err.emit_to_string(&source)))?;

        let workgroup_size = module
            .entry_points
            .iter()
            .find(|ep| {
                ep.name == entry_point && ep.stage == naga::ShaderStage::Compute
            })
            .map(|ep| UVec3::from_array(ep.workgroup_size))
            .ok_or_else(|| {
                program_error(format!(
                    "no compute entry point named `{entry_point}`"
                ))
            })?;

        let groups = reflect_bind_groups(&module).map_err(program_error)?;
        let push_constant_size = reflect_push_constant_size(&module);
        let constants = override_constants(&module, desc);

        debug!(
            "Compiling program `{}`; entry-point={entry_point}, \
             workgroup-size={workgroup_size}, groups={}, overrides={}",
            desc.label,
            groups.len(),
            constants.len()
        );

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(source.clone()),
            });

        let groups: Vec<_> = groups
            .into_iter()
            .enumerate()
            .map(|(group, slots)| {
                let label = format!("{}_bg{group}_layout", desc.label);

                let entries: Vec<_> = slots
                    .iter()
                    .map(|slot| wgpu::BindGroupLayoutEntry {
                        binding: slot.binding,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: slot.ty,
                        count: None,
                    })
                    .collect();

                let layout = self.device.create_bind_group_layout(
                    &wgpu::BindGroupLayoutDescriptor {
                        label: Some(&label),
                        entries: &entries,
                    },
                );

                BindGroupSlots {
                    layout,
                    slots: slots
                        .into_iter()
                        .map(|slot| BindingSlot {
                            name: slot.name,
                            binding: slot.binding,
                            kind: slot.kind,
                        })
                        .collect(),
                }
            })
            .collect();

        let bind_group_layouts: Vec<_> =
            groups.iter().map(|group| &group.layout).collect();

        let push_constant_ranges = if push_constant_size > 0 {
            vec![wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: Range {
                    start: 0,
                    end: push_constant_size,
                },
            }]
        } else {
            vec![]
        };

        let pipeline_layout_label = format!("{}_pipeline_layout", desc.label);

        let pipeline_layout = self.device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some(&pipeline_layout_label),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &push_constant_ranges,
            },
        );

        let pipeline_label = format!("{}_pipeline", desc.label);

        let pipeline = self.device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some(&pipeline_label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    zero_initialize_workgroup_memory: false,
                    ..Default::default()
                },
                cache: None,
            },
        );

        Ok(GpuProgram {
            label: desc.label.clone(),
            pipeline,
            groups,
            push_constant_size,
            workgroup_size,
        })
    }

    fn dispatch(
        &mut self,
        program: &Self::Program,
        vars: &ShaderVars<Self>,
        params: &[u8],
        threads: UVec3,
    ) -> Result<()> {
        let bind_groups = program
            .groups
            .iter()
            .enumerate()
            .map(|(group, slots)| {
                self.bind_group(program, group as u32, slots, vars)
            })
            .collect::<Result<Vec<_>>>()?;

        let push_constants = program.push_constant_size as usize;

        if params.len() > push_constants {
            return Err(Error::Dispatch {
                program: program.label.clone(),
                reason: format!(
                    "got {} bytes of parameters, but the kernel accepts {}",
                    params.len(),
                    push_constants
                ),
            });
        }

        let workgroups = workgroup_count(threads, program.workgroup_size);

        let mut pass =
            self.encoder()
                .begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&program.label),
                    timestamp_writes: None,
                });

        pass.set_pipeline(&program.pipeline);

        if push_constants > 0 {
            let mut data = vec![0; push_constants];

            data[..params.len()].copy_from_slice(params);
            pass.set_push_constants(0, &data);
        }

        for (group, bind_group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(group as u32, bind_group, &[]);
        }

        pass.dispatch_workgroups(workgroups.x, workgroups.y, workgroups.z);

        Ok(())
    }

    fn clear_image(&mut self, image: &Self::Image) {
        // Writes issued through the queue land before any recorded work, so
        // whatever has been recorded must go first
        self.flush();

        let zeros = vec![0u8; (image.size.x * image.size.y * 16) as usize];

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &zeros,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.size.x * 16),
                rows_per_image: Some(image.size.y),
            },
            wgpu::Extent3d {
                width: image.size.x,
                height: image.size.y,
                depth_or_array_layers: 1,
            },
        );
    }

    fn image_size(&self, image: &Self::Image) -> UVec2 {
        image.size
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit([encoder.finish()]);
        }
    }
}

#[derive(Clone, Debug)]
pub struct GpuBuffer {
    label: String,
    buffer: Arc<wgpu::Buffer>,
}

impl GpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[derive(Clone, Debug)]
pub struct GpuImage {
    size: UVec2,
    texture: Arc<wgpu::Texture>,
    view: Arc<wgpu::TextureView>,
}

impl GpuImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

#[derive(Debug)]
pub struct GpuProgram {
    label: String,
    pipeline: wgpu::ComputePipeline,
    groups: Vec<BindGroupSlots>,
    push_constant_size: u32,
    workgroup_size: UVec3,
}

#[derive(Debug)]
struct BindGroupSlots {
    layout: wgpu::BindGroupLayout,
    slots: Vec<BindingSlot>,
}

#[derive(Debug)]
struct BindingSlot {
    name: String,
    binding: u32,
    kind: SlotKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotKind {
    Buffer,
    Image(wgpu::TextureFormat),
}

/// Binding discovered by walking the module's global variables.
#[derive(Debug)]
struct ReflectedSlot {
    name: String,
    binding: u32,
    ty: wgpu::BindingType,
    kind: SlotKind,
}

fn builtin_source(kernel: BuiltinKernel) -> &'static str {
    match kernel {
        BuiltinKernel::HashCacheReset => {
            include_str!("../shaders/hash_cache_reset.wgsl")
        }
        BuiltinKernel::HashCacheResolve => {
            include_str!("../shaders/hash_cache_resolve.wgsl")
        }
        BuiltinKernel::GradientClear => {
            include_str!("../shaders/gradient_clear.wgsl")
        }
        BuiltinKernel::GradientDescent => {
            include_str!("../shaders/gradient_descent.wgsl")
        }
        BuiltinKernel::NnReset => include_str!("../shaders/nn_reset.wgsl"),
    }
}

/// Returns the module's bindings grouped by bind group; groups the module
/// doesn't use come out empty, since layouts have to be contiguous.
fn reflect_bind_groups(
    module: &naga::Module,
) -> Result<Vec<Vec<ReflectedSlot>>, String> {
    let mut groups: BTreeMap<u32, Vec<ReflectedSlot>> = BTreeMap::new();

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };

        let name = global.name.clone().ok_or_else(|| {
            format!(
                "binding @group({}) @binding({}) has no name",
                binding.group, binding.binding
            )
        })?;

        let (ty, kind) = reflect_binding_type(module, global)
            .ok_or_else(|| format!("`{name}` has an unsupported type"))?;

        groups.entry(binding.group).or_default().push(ReflectedSlot {
            name,
            binding: binding.binding,
            ty,
            kind,
        });
    }

    let group_count = groups.keys().next_back().map_or(0, |group| group + 1);

    Ok((0..group_count)
        .map(|group| groups.remove(&group).unwrap_or_default())
        .collect())
}

fn reflect_binding_type(
    module: &naga::Module,
    global: &naga::GlobalVariable,
) -> Option<(wgpu::BindingType, SlotKind)> {
    match global.space {
        naga::AddressSpace::Storage { access } => Some((
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            SlotKind::Buffer,
        )),

        naga::AddressSpace::Uniform => Some((
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            SlotKind::Buffer,
        )),

        naga::AddressSpace::Handle => {
            let naga::TypeInner::Image {
                dim: naga::ImageDimension::D2,
                arrayed: false,
                class,
            } = &module.types[global.ty].inner
            else {
                return None;
            };

            match *class {
                naga::ImageClass::Sampled { kind, multi } => {
                    let (sample_type, format) = match kind {
                        naga::ScalarKind::Float => (
                            wgpu::TextureSampleType::Float {
                                filterable: false,
                            },
                            wgpu::TextureFormat::Rgba32Float,
                        ),
                        naga::ScalarKind::Uint => (
                            wgpu::TextureSampleType::Uint,
                            wgpu::TextureFormat::Rgba32Uint,
                        ),
                        naga::ScalarKind::Sint => (
                            wgpu::TextureSampleType::Sint,
                            wgpu::TextureFormat::Rgba32Sint,
                        ),
                        _ => return None,
                    };

                    Some((
                        wgpu::BindingType::Texture {
                            sample_type,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: multi,
                        },
                        SlotKind::Image(format),
                    ))
                }

                naga::ImageClass::Storage { format, access } => {
                    let format = storage_format(format)?;

                    let load = access.contains(naga::StorageAccess::LOAD);
                    let store = access.contains(naga::StorageAccess::STORE);

                    let access = match (load, store) {
                        (true, true) => wgpu::StorageTextureAccess::ReadWrite,
                        (true, false) => wgpu::StorageTextureAccess::ReadOnly,
                        _ => wgpu::StorageTextureAccess::WriteOnly,
                    };

                    Some((
                        wgpu::BindingType::StorageTexture {
                            access,
                            format,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        SlotKind::Image(format),
                    ))
                }

                naga::ImageClass::Depth { .. } => None,
            }
        }

        _ => None,
    }
}

fn storage_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    Some(match format {
        naga::StorageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        naga::StorageFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
        naga::StorageFormat::Rgba32Sint => wgpu::TextureFormat::Rgba32Sint,
        naga::StorageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        naga::StorageFormat::R32Float => wgpu::TextureFormat::R32Float,
        naga::StorageFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        naga::StorageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        _ => return None,
    })
}

fn reflect_push_constant_size(module: &naga::Module) -> u32 {
    module
        .global_variables
        .iter()
        .find(|(_, global)| global.space == naga::AddressSpace::PushConstant)
        .map_or(0, |(_, global)| {
            module.types[global.ty].inner.size(module.to_ctx())
        })
}

/// Translates defines into override constants, keeping only those the
/// module declares.
fn override_constants(
    module: &naga::Module,
    desc: &ProgramDesc,
) -> HashMap<String, f64> {
    module
        .overrides
        .iter()
        .filter_map(|(_, item)| {
            let name = item.name.as_deref()?;
            let value = desc.defines.get(name)?;

            let key = item
                .id
                .map(|id| id.to_string())
                .unwrap_or_else(|| name.to_string());

            Some((key, value.as_f64()))
        })
        .collect()
}

/// Converts a thread count into workgroups; one-dimensional dispatches that
/// exceed the per-dimension limit get folded into the second dimension
/// (built-in kernels reconstruct the linear id from `num_workgroups`).
fn workgroup_count(threads: UVec3, workgroup_size: UVec3) -> UVec3 {
    let groups = uvec3(
        threads.x.div_ceil(workgroup_size.x),
        threads.y.div_ceil(workgroup_size.y),
        threads.z.div_ceil(workgroup_size.z),
    );

    if groups.x > MAX_WORKGROUPS_PER_DIMENSION && groups.y == 1 && groups.z == 1
    {
        uvec3(
            MAX_WORKGROUPS_PER_DIMENSION,
            groups.x.div_ceil(MAX_WORKGROUPS_PER_DIMENSION),
            1,
        )
    } else {
        groups
    }
}

fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        ImageFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
    }
}

fn create_buffer(device: &wgpu::Device, label: &str, size: u64) -> GpuBuffer {
    debug!("Allocating storage buffer `{label}`; size={size}");

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    GpuBuffer {
        label: label.to_string(),
        buffer: Arc::new(buffer),
    }
}

fn create_texture(
    device: &wgpu::Device,
    label: &str,
    size: UVec2,
    format: wgpu::TextureFormat,
) -> GpuImage {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.x,
            height: size.y,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let view = texture.create_view(&Default::default());

    GpuImage {
        size,
        texture: Arc::new(texture),
        view: Arc::new(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> naga::Module {
        naga::front::wgsl::parse_str(source).unwrap()
    }

    #[test]
    fn builtin_kernels_reflect() {
        for (kernel, names) in [
            (
                BuiltinKernel::HashCacheReset,
                vec!["hash_grid_entries", "voxel_data", "voxel_data_prev"],
            ),
            (
                BuiltinKernel::HashCacheResolve,
                vec!["hash_grid_entries", "voxel_data", "voxel_data_prev"],
            ),
            (
                BuiltinKernel::GradientClear,
                vec!["gradient", "gradient_count"],
            ),
            (
                BuiltinKernel::GradientDescent,
                vec![
                    "primal",
                    "filtered_primal",
                    "gradient",
                    "gradient_count",
                    "gradient_aux",
                ],
            ),
            (
                BuiltinKernel::NnReset,
                vec![
                    "primal",
                    "filtered_primal",
                    "gradient",
                    "gradient_count",
                    "gradient_aux",
                    "feature_hash_grid_entries",
                ],
            ),
        ] {
            let module = parse(builtin_source(kernel));
            let groups = reflect_bind_groups(&module).unwrap();

            assert_eq!(1, groups.len(), "{kernel:?}");

            let actual: Vec<_> =
                groups[0].iter().map(|slot| slot.name.as_str()).collect();

            assert_eq!(names, actual, "{kernel:?}");

            assert!(groups[0].iter().all(|slot| slot.kind == SlotKind::Buffer));
        }
    }

    #[test]
    fn push_constants_match_params() {
        use crate::gpu;
        use std::mem::size_of;

        for (kernel, size) in [
            (
                BuiltinKernel::HashCacheReset,
                size_of::<gpu::HashCacheResetPassParams>(),
            ),
            (
                BuiltinKernel::HashCacheResolve,
                size_of::<gpu::HashCacheResolvePassParams>(),
            ),
            (
                BuiltinKernel::GradientClear,
                size_of::<gpu::GradientClearPassParams>(),
            ),
            (
                BuiltinKernel::GradientDescent,
                size_of::<gpu::GradientDescentPassParams>(),
            ),
            (
                BuiltinKernel::NnReset,
                size_of::<gpu::NnResetPassParams>(),
            ),
        ] {
            let module = parse(builtin_source(kernel));

            assert_eq!(
                size as u32,
                reflect_push_constant_size(&module),
                "{kernel:?}"
            );
        }
    }

    #[test]
    fn storage_images_reflect() {
        let module = parse(
            "
            @group(0) @binding(0)
            var vbuffer: texture_2d<u32>;

            @group(1) @binding(3)
            var output_color: texture_storage_2d<rgba32float, write>;

            @compute @workgroup_size(8, 8)
            fn main() {
            }
            ",
        );

        let groups = reflect_bind_groups(&module).unwrap();

        assert_eq!(2, groups.len());

        assert_eq!(
            SlotKind::Image(wgpu::TextureFormat::Rgba32Uint),
            groups[0][0].kind
        );

        assert_eq!(3, groups[1][0].binding);

        assert_eq!(
            SlotKind::Image(wgpu::TextureFormat::Rgba32Float),
            groups[1][0].kind
        );
    }

    #[test]
    fn overrides_filter_defines() {
        let module = parse(
            "
            override USE_NEE: bool = true;
            @id(7) override UPPER_BOUNCE_COUNT: u32 = 3u;

            @compute @workgroup_size(64)
            fn main() {
                _ = USE_NEE;
                _ = UPPER_BOUNCE_COUNT;
            }
            ",
        );

        let mut defines = crate::Defines::default();

        defines
            .set("USE_NEE", false)
            .set("UPPER_BOUNCE_COUNT", 5u32)
            .set("USE_MIS", true);

        let desc = ProgramDesc {
            label: "test".into(),
            source: ProgramSource::Builtin(BuiltinKernel::GradientClear),
            defines,
        };

        let constants = override_constants(&module, &desc);

        assert_eq!(2, constants.len());
        assert_eq!(Some(&0.0), constants.get("USE_NEE"));
        assert_eq!(Some(&5.0), constants.get("7"));
    }

    #[test]
    fn large_dispatches_fold() {
        assert_eq!(
            uvec3(2, 1, 1),
            workgroup_count(uvec3(100, 1, 1), uvec3(64, 1, 1))
        );

        assert_eq!(
            uvec3(4, 3, 1),
            workgroup_count(uvec3(25, 17, 1), uvec3(8, 8, 1))
        );

        // 2^28 threads
        assert_eq!(
            uvec3(65535, 65, 1),
            workgroup_count(uvec3(1 << 28, 1, 1), uvec3(64, 1, 1))
        );
    }
}

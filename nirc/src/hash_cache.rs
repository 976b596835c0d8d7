use glam::uvec2;
use log::debug;

use crate::{
    gpu, Backend, BufferDesc, BufferTag, BuiltinKernel, ComputePass, Defines,
    HashCacheOptions, PassRole, Passes, ProgramSource, ResourceSet, Result,
    ShaderVars, VoxelRoles,
};

/// Spatial radiance cache.
///
/// Insertion happens inside the shared training dispatch; this type owns the
/// cache's buffers, its reset and resolve passes, and the reset request.
#[derive(Clone, Debug, Default)]
pub struct HashCache {
    active: bool,
    map_size: u32,
    probing_size: u32,
    reset_pending: bool,
}

impl HashCache {
    /// Adopts freshly applied options; a cache that becomes active starts
    /// with a pending reset.
    pub fn configure(&mut self, options: &HashCacheOptions, active: bool) {
        self.active = active;
        self.map_size = options.map_size();
        self.probing_size = options.probing_size;
        self.reset_pending = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    pub fn probing_size(&self) -> u32 {
        self.probing_size
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

        let len = self.map_size as u64;

        resources.allocate(
            backend,
            BufferTag::HashGridEntries,
            BufferDesc::structured::<gpu::HashGridEntry>(
                BufferTag::HashGridEntries.label(),
                len,
            ),
        );

        for tag in [BufferTag::VoxelData0, BufferTag::VoxelData1] {
            resources.allocate(
                backend,
                tag,
                BufferDesc::structured::<gpu::VoxelRecord>(tag.label(), len),
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

        let reset = ComputePass::builder(PassRole::HashCacheReset.label())
            .build(
                backend,
                ProgramSource::Builtin(BuiltinKernel::HashCacheReset),
            )?;

        let resolve = ComputePass::builder(PassRole::HashCacheResolve.label())
            .build(
                backend,
                ProgramSource::Builtin(BuiltinKernel::HashCacheResolve),
            )?;

        passes.insert(PassRole::HashCacheReset, reset);
        passes.insert(PassRole::HashCacheResolve, resolve);

        Ok(())
    }

    /// Defines consumed by kernels that insert into or query the cache.
    pub fn defines(&self) -> Defines {
        let mut defines = Defines::default();

        defines
            .set("R_HC_HASHMAP_SIZE", self.map_size)
            .set("R_HC_PROBING_SIZE", self.probing_size);

        defines
    }

    /// Binds the entry table and both voxel buffers in this frame's roles.
    pub fn bind<B>(
        &self,
        resources: &ResourceSet<B>,
        roles: VoxelRoles,
        vars: &mut ShaderVars<B>,
    ) -> Result<()>
    where
        B: Backend,
    {
        vars.set_buffer(
            gpu::HASH_GRID_ENTRIES,
            resources.get(BufferTag::HashGridEntries)?,
        )
        .set_buffer(gpu::VOXEL_DATA, resources.get(roles.current)?)
        .set_buffer(gpu::VOXEL_DATA_PREV, resources.get(roles.previous)?);

        Ok(())
    }

    /// Zeroes the entry table and both voxel buffers, if a reset is
    /// pending; returns whether anything was dispatched.
    ///
    /// The request is considered handled only once the dispatch has been
    /// issued.
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

        debug!("Resetting hash cache; map-size={}", self.map_size);

        let mut vars = ShaderVars::new();

        vars.set_buffer(
            gpu::HASH_GRID_ENTRIES,
            resources.get(BufferTag::HashGridEntries)?,
        )
        .set_buffer(gpu::VOXEL_DATA, resources.get(BufferTag::VoxelData0)?)
        .set_buffer(
            gpu::VOXEL_DATA_PREV,
            resources.get(BufferTag::VoxelData1)?,
        );

        passes.get(PassRole::HashCacheReset)?.run(
            backend,
            &vars,
            uvec2(self.map_size, 1),
            &gpu::HashCacheResetPassParams {
                map_size: self.map_size,
                ..Default::default()
            },
        )?;

        self.reset_pending = false;

        Ok(true)
    }

    /// Folds this frame's samples and the previous frame's history into the
    /// current voxel buffer.
    pub fn resolve<B>(
        &self,
        backend: &mut B,
        passes: &Passes<B>,
        resources: &ResourceSet<B>,
        roles: VoxelRoles,
        frame: u32,
    ) -> Result<()>
    where
        B: Backend,
    {
        if !self.active {
            return Ok(());
        }

        let mut vars = ShaderVars::new();

        self.bind(resources, roles, &mut vars)?;

        passes.get(PassRole::HashCacheResolve)?.run(
            backend,
            &vars,
            uvec2(self.map_size, 1),
            &gpu::HashCacheResolvePassParams {
                map_size: self.map_size,
                frame,
                max_history: gpu::HASH_CACHE_MAX_HISTORY,
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use glam::{vec3, Vec3};

    use super::*;
    use crate::ReferenceBackend;

    struct Fixture {
        backend: ReferenceBackend,
        resources: ResourceSet<ReferenceBackend>,
        passes: Passes<ReferenceBackend>,
        target: HashCache,
    }

    impl Fixture {
        fn new(map_size_exponent: u32) -> Self {
            let mut backend = ReferenceBackend::new();
            let mut resources = ResourceSet::new();
            let mut passes = Passes::new();
            let mut target = HashCache::default();

            target.configure(
                &HashCacheOptions {
                    map_size_exponent,
                    ..Default::default()
                },
                true,
            );

            target.allocate(&mut backend, &mut resources);
            target.create_passes(&mut backend, &mut passes).unwrap();

            Self {
                backend,
                resources,
                passes,
                target,
            }
        }

        fn entries(&self) -> Vec<gpu::HashGridEntry> {
            self.backend.read(
                self.resources.get(BufferTag::HashGridEntries).unwrap(),
            )
        }

        fn voxels(&self, tag: BufferTag) -> Vec<gpu::VoxelRecord> {
            self.backend.read(self.resources.get(tag).unwrap())
        }

        fn insert(&mut self, frame: u32, key: gpu::VoxelKey, radiance: Vec3) {
            let roles = VoxelRoles::for_frame(frame);
            let mut entries = self.entries();
            let mut voxels = self.voxels(roles.current);

            assert!(gpu::hash_cache_insert(
                &mut entries,
                &mut voxels,
                key,
                radiance,
                frame,
                self.target.probing_size(),
            ));

            self.backend.write(
                self.resources.get(BufferTag::HashGridEntries).unwrap(),
                &entries,
            );

            self.backend
                .write(self.resources.get(roles.current).unwrap(), &voxels);
        }

        fn resolve(&mut self, frame: u32) {
            self.target
                .resolve(
                    &mut self.backend,
                    &self.passes,
                    &self.resources,
                    VoxelRoles::for_frame(frame),
                    frame,
                )
                .unwrap();
        }
    }

    #[test]
    fn allocate() {
        let target = Fixture::new(10);

        assert_eq!(1024, target.entries().len());

        for tag in [BufferTag::VoxelData0, BufferTag::VoxelData1] {
            assert_eq!(16384, target.resources.desc(tag).unwrap().size());
        }
    }

    #[test]
    fn inactive_cache_owns_nothing() {
        let mut backend = ReferenceBackend::new();
        let mut resources = ResourceSet::new();
        let mut passes = Passes::new();
        let mut target = HashCache::default();

        target.configure(&Default::default(), false);
        target.allocate(&mut backend, &mut resources);
        target.create_passes(&mut backend, &mut passes).unwrap();

        assert!(resources.is_empty());
        assert!(passes.is_empty());
        assert!(!target.reset(&mut backend, &passes, &resources).unwrap());
        assert!(backend.dispatches().is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut target = Fixture::new(4);
        let key = gpu::VoxelKey::new(Vec3::ONE, Vec3::Y, Vec3::ZERO);

        target.insert(0, key, vec3(1.0, 2.0, 3.0));
        target.resolve(0);

        let mut snapshots = Vec::new();

        for _ in 0..2 {
            target.target.request_reset();

            assert!(target
                .target
                .reset(&mut target.backend, &target.passes, &target.resources)
                .unwrap());

            assert!(!target.target.is_reset_pending());

            snapshots.push((
                target.entries(),
                target.voxels(BufferTag::VoxelData0),
                target.voxels(BufferTag::VoxelData1),
            ));
        }

        assert_eq!(snapshots[0], snapshots[1]);

        let (entries, voxels0, voxels1) = &snapshots[0];

        assert!(entries.iter().all(|entry| entry.is_empty()));
        assert!(voxels0.iter().all(|v| *v == gpu::VoxelRecord::EMPTY));
        assert!(voxels1.iter().all(|v| *v == gpu::VoxelRecord::EMPTY));
    }

    #[test]
    fn reset_runs_once_per_request() {
        let mut target = Fixture::new(4);

        assert!(target.target.is_reset_pending());

        for expected in [true, false, false] {
            assert_eq!(
                expected,
                target
                    .target
                    .reset(
                        &mut target.backend,
                        &target.passes,
                        &target.resources
                    )
                    .unwrap()
            );
        }

        assert_eq!(1, target.backend.dispatches().len());
    }

    #[test]
    fn resolved_samples_become_visible_next_frame() {
        let mut target = Fixture::new(6);
        let key = gpu::VoxelKey::new(vec3(1.0, 0.0, 2.0), Vec3::X, Vec3::ZERO);

        target.insert(0, key, vec3(2.0, 2.0, 2.0));
        target.insert(0, key, vec3(4.0, 4.0, 4.0));
        target.resolve(0);

        // Frame 1 reads what frame 0 wrote
        let prev = VoxelRoles::for_frame(1).previous;

        let radiance = gpu::hash_cache_query(
            &target.entries(),
            &target.voxels(prev),
            key,
            target.target.probing_size(),
        );

        assert_eq!(Some(vec3(3.0, 3.0, 3.0)), radiance);

        // No new samples this frame, so the history carries over
        target.resolve(1);

        let radiance = gpu::hash_cache_query(
            &target.entries(),
            &target.voxels(VoxelRoles::for_frame(1).current),
            key,
            target.target.probing_size(),
        );

        assert_eq!(Some(vec3(3.0, 3.0, 3.0)), radiance);
    }
}

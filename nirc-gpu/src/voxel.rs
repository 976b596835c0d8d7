use bytemuck::{Pod, Zeroable};
use glam::{vec3, Vec3};

/// Edge length of a voxel at LOD level 0.
pub const HASH_CACHE_VOXEL_SIZE: f32 = 0.05;

/// Camera distance up to which voxels use LOD level 0; every doubling of the
/// distance past it doubles the voxel's edge length.
pub const HASH_CACHE_LOD_DISTANCE: f32 = 2.0;

pub const HASH_CACHE_MAX_LOD: u32 = 31;

/// Samples of history a voxel keeps when being resolved; older samples decay
/// proportionally.
pub const HASH_CACHE_MAX_HISTORY: u32 = 64;

const COORD_BITS: u32 = 17;
const COORD_MASK: u64 = (1 << COORD_BITS) - 1;

/// Spatial-directional key of a hash-cache voxel.
///
/// Layout (from the least significant bit):
///
/// - 3 x 17 bits: quantized position (two's complement, wrapping),
/// - 3 bits: direction bucket (dominant axis and its sign),
/// - 5 bits: LOD level,
/// - bit 63: always set, so that a valid key is never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoxelKey(u64);

impl VoxelKey {
    pub fn new(position: Vec3, direction: Vec3, camera_pos: Vec3) -> Self {
        let level = Self::lod_level(position.distance(camera_pos));
        let size = HASH_CACHE_VOXEL_SIZE * (1u64 << level) as f32;
        let coords = (position / size).floor().as_ivec3();

        let x = (coords.x as u32 as u64) & COORD_MASK;
        let y = (coords.y as u32 as u64) & COORD_MASK;
        let z = (coords.z as u32 as u64) & COORD_MASK;
        let dir = Self::direction_bucket(direction) as u64;

        Self(
            x | (y << COORD_BITS)
                | (z << (2 * COORD_BITS))
                | (dir << (3 * COORD_BITS))
                | ((level as u64) << (3 * COORD_BITS + 3))
                | (1 << 63),
        )
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn level(self) -> u32 {
        ((self.0 >> (3 * COORD_BITS + 3)) & 0x1f) as u32
    }

    pub fn lod_level(distance: f32) -> u32 {
        let ratio = (distance / HASH_CACHE_LOD_DISTANCE).max(1.0);

        (ratio.log2().ceil() as u32).min(HASH_CACHE_MAX_LOD)
    }

    /// Returns one of six buckets: `2 * axis + (component < 0)`.
    pub fn direction_bucket(direction: Vec3) -> u32 {
        let abs = direction.abs();

        let axis = if abs.x >= abs.y && abs.x >= abs.z {
            0
        } else if abs.y >= abs.z {
            1
        } else {
            2
        };

        2 * axis + (direction[axis as usize] < 0.0) as u32
    }
}

/// Payload of a single hash-cache slot (128 bits).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoxelRecord {
    /// Sum of the radiance samples
    pub radiance: [f32; 3],

    /// `frame stamp << 16 | sample count`
    pub meta: u32,
}

impl VoxelRecord {
    pub const EMPTY: Self = Self {
        radiance: [0.0; 3],
        meta: 0,
    };

    pub const MAX_SAMPLES: u32 = 0xffff;

    /// Counts above [`Self::MAX_SAMPLES`] get clamped, with the sum scaled
    /// down alongside so that the mean is kept.
    pub fn new(radiance: Vec3, sample_count: u32, stamp: u32) -> Self {
        let (radiance, sample_count) = if sample_count > Self::MAX_SAMPLES {
            let scale = Self::MAX_SAMPLES as f32 / sample_count as f32;

            (radiance * scale, Self::MAX_SAMPLES)
        } else {
            (radiance, sample_count)
        };

        Self {
            radiance: radiance.to_array(),
            meta: (stamp << 16) | sample_count,
        }
    }

    pub fn radiance_sum(&self) -> Vec3 {
        vec3(self.radiance[0], self.radiance[1], self.radiance[2])
    }

    pub fn sample_count(&self) -> u32 {
        self.meta & 0xffff
    }

    pub fn stamp(&self) -> u32 {
        self.meta >> 16
    }

    /// Mean radiance; zero for a record without samples.
    pub fn mean(&self) -> Vec3 {
        match self.sample_count() {
            0 => Vec3::ZERO,
            n => self.radiance_sum() / n as f32,
        }
    }
}

/// Truncates the frame counter to the 16 bits stored in a record.
pub fn frame_stamp(frame: u32) -> u32 {
    frame & 0xffff
}

#[cfg(test)]
mod tests {
    use glam::vec3;

    use super::*;

    #[test]
    fn key_is_deterministic_and_never_empty() {
        let cam = vec3(0.0, 1.0, -4.0);
        let a = VoxelKey::new(vec3(0.31, 0.2, 0.9), Vec3::Y, cam);
        let b = VoxelKey::new(vec3(0.31, 0.2, 0.9), Vec3::Y, cam);

        assert_eq!(a, b);
        assert_ne!(0, a.bits());

        let origin = VoxelKey::new(Vec3::ZERO, Vec3::X, Vec3::ZERO);

        assert_ne!(0, origin.bits());
    }

    #[test]
    fn key_distinguishes_direction_buckets() {
        let keys: Vec<_> = [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ]
        .into_iter()
        .map(|dir| VoxelKey::new(Vec3::ONE, dir, Vec3::ZERO))
        .collect();

        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn lod_grows_with_distance() {
        assert_eq!(0, VoxelKey::lod_level(0.0));
        assert_eq!(0, VoxelKey::lod_level(2.0));
        assert_eq!(1, VoxelKey::lod_level(4.0));
        assert_eq!(2, VoxelKey::lod_level(7.9));
        assert_eq!(HASH_CACHE_MAX_LOD, VoxelKey::lod_level(f32::MAX));

        let key = VoxelKey::new(vec3(100.0, 0.0, 0.0), Vec3::Y, Vec3::ZERO);

        assert_eq!(VoxelKey::lod_level(100.0), key.level());
    }

    #[test]
    fn record_packing() {
        let record = VoxelRecord::new(vec3(2.0, 4.0, 6.0), 2, 0xbeef);

        assert_eq!(2, record.sample_count());
        assert_eq!(0xbeef, record.stamp());
        assert_eq!(vec3(1.0, 2.0, 3.0), record.mean());
        assert_eq!(Vec3::ZERO, VoxelRecord::EMPTY.mean());
        assert_eq!(16, std::mem::size_of::<VoxelRecord>());
    }

    #[test]
    fn oversized_counts_are_rescaled() {
        let record = VoxelRecord::new(Vec3::splat(131070.0), 131070, 1);

        assert_eq!(VoxelRecord::MAX_SAMPLES, record.sample_count());
        assert_eq!(1, record.stamp());
        assert_eq!(Vec3::ONE, record.mean());
    }
}

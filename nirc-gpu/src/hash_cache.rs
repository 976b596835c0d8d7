use glam::Vec3;

use crate::{
    frame_stamp, hash_grid_find, hash_grid_find_or_insert,
    HashCacheResetPassParams, HashCacheResolvePassParams, HashGridEntry,
    VoxelKey, VoxelRecord,
};

/// Kernel: zeroes slot `id` of the entry table and of both voxel buffers.
pub fn hash_cache_reset(
    id: u32,
    params: &HashCacheResetPassParams,
    entries: &mut [HashGridEntry],
    voxels: &mut [VoxelRecord],
    voxels_prev: &mut [VoxelRecord],
) {
    if id >= params.map_size {
        return;
    }

    let id = id as usize;

    entries[id] = HashGridEntry::EMPTY;
    voxels[id] = VoxelRecord::EMPTY;
    voxels_prev[id] = VoxelRecord::EMPTY;
}

/// Accumulates a radiance sample into the voxel owning `key` in the current
/// buffer.
///
/// A record whose stamp doesn't match the current frame holds data from two
/// frames ago (it was the previous buffer last frame) and gets overwritten
/// instead of accumulated into.
///
/// Returns `false` when the key couldn't be placed within `probing_size`
/// slots.
pub fn hash_cache_insert(
    entries: &mut [HashGridEntry],
    voxels: &mut [VoxelRecord],
    key: VoxelKey,
    radiance: Vec3,
    frame: u32,
    probing_size: u32,
) -> bool {
    let Some(slot) =
        hash_grid_find_or_insert(entries, key.bits(), probing_size)
    else {
        return false;
    };

    let stamp = frame_stamp(frame);
    let record = voxels[slot];

    voxels[slot] = if record.stamp() == stamp {
        VoxelRecord::new(
            record.radiance_sum() + radiance,
            record.sample_count() + 1,
            stamp,
        )
    } else {
        VoxelRecord::new(radiance, 1, stamp)
    };

    true
}

/// Returns the resolved mean radiance stored for `key`, if any.
pub fn hash_cache_query(
    entries: &[HashGridEntry],
    voxels: &[VoxelRecord],
    key: VoxelKey,
    probing_size: u32,
) -> Option<Vec3> {
    let slot = hash_grid_find(entries, key.bits(), probing_size)?;
    let record = voxels[slot];

    if record.sample_count() > 0 {
        Some(record.mean())
    } else {
        None
    }
}

/// Kernel: merges this frame's fresh samples of slot `id` with the history
/// kept in the previous buffer and stores the result in the current buffer.
///
/// Every slot gets rewritten, so after this pass the current buffer carries
/// this frame's stamp everywhere and can be read as "previous" next frame.
pub fn hash_cache_resolve(
    id: u32,
    params: &HashCacheResolvePassParams,
    entries: &[HashGridEntry],
    voxels: &mut [VoxelRecord],
    voxels_prev: &[VoxelRecord],
) {
    if id >= params.map_size {
        return;
    }

    let id = id as usize;
    let stamp = frame_stamp(params.frame);

    if entries[id].is_empty() {
        voxels[id] = VoxelRecord::new(Vec3::ZERO, 0, stamp);
        return;
    }

    let curr = voxels[id];

    let (fresh_sum, fresh_count) = if curr.stamp() == stamp {
        (curr.radiance_sum(), curr.sample_count())
    } else {
        (Vec3::ZERO, 0)
    };

    let prev = voxels_prev[id];
    let mut history_sum = prev.radiance_sum();
    let mut history_count = prev.sample_count();

    if history_count > params.max_history {
        history_sum *= params.max_history as f32 / history_count as f32;
        history_count = params.max_history;
    }

    voxels[id] = VoxelRecord::new(
        fresh_sum + history_sum,
        fresh_count + history_count,
        stamp,
    );
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::vec3;

    use super::*;
    use crate::HASH_CACHE_MAX_HISTORY;

    const MAP_SIZE: u32 = 16;

    struct Cache {
        entries: Vec<HashGridEntry>,
        buffers: [Vec<VoxelRecord>; 2],
    }

    impl Cache {
        fn new() -> Self {
            Self {
                entries: vec![HashGridEntry::EMPTY; MAP_SIZE as usize],
                buffers: [
                    vec![VoxelRecord::EMPTY; MAP_SIZE as usize],
                    vec![VoxelRecord::EMPTY; MAP_SIZE as usize],
                ],
            }
        }

        fn split(
            &mut self,
            frame: u32,
        ) -> (&mut Vec<VoxelRecord>, &mut Vec<VoxelRecord>) {
            let [a, b] = &mut self.buffers;

            if frame % 2 == 0 {
                (a, b)
            } else {
                (b, a)
            }
        }

        fn insert(&mut self, frame: u32, key: VoxelKey, radiance: Vec3) {
            let [a, b] = &mut self.buffers;
            let curr = if frame % 2 == 0 { a } else { b };

            assert!(hash_cache_insert(
                &mut self.entries,
                curr,
                key,
                radiance,
                frame,
                4
            ));
        }

        fn resolve(&mut self, frame: u32) {
            let params = HashCacheResolvePassParams {
                map_size: MAP_SIZE,
                frame,
                max_history: HASH_CACHE_MAX_HISTORY,
                _pad: 0,
            };

            let entries = self.entries.clone();
            let (curr, prev) = self.split(frame);

            for id in 0..MAP_SIZE {
                hash_cache_resolve(id, &params, &entries, curr, prev);
            }
        }

        fn query(&mut self, frame: u32, key: VoxelKey) -> Option<Vec3> {
            let entries = self.entries.clone();
            let (_, prev) = self.split(frame);

            hash_cache_query(&entries, prev, key, 4)
        }
    }

    fn key() -> VoxelKey {
        VoxelKey::new(vec3(1.0, 2.0, 3.0), Vec3::Y, Vec3::ZERO)
    }

    #[test]
    fn resolved_data_becomes_visible_one_frame_later() {
        let mut target = Cache::new();

        target.insert(0, key(), vec3(1.0, 1.0, 1.0));
        target.insert(0, key(), vec3(3.0, 3.0, 3.0));
        target.resolve(0);

        // Frame 0 reads the (empty) previous buffer
        assert_eq!(None, target.query(0, key()));

        // Frame 1 reads what frame 0 resolved
        assert_eq!(Some(vec3(2.0, 2.0, 2.0)), target.query(1, key()));
    }

    #[test]
    fn stale_records_are_overwritten_not_accumulated() {
        let mut target = Cache::new();

        target.insert(0, key(), Vec3::splat(10.0));
        target.resolve(0);

        // Frame 1 writes into the buffer that held frame -1's data
        target.insert(1, key(), Vec3::splat(4.0));
        target.resolve(1);

        // Frame 2 writes into frame 0's buffer; its record (stamp 0) must not
        // leak into this frame's fresh samples
        target.insert(2, key(), Vec3::splat(1.0));
        target.resolve(2);

        let (curr, _) = target.split(2);
        let slot = curr
            .iter()
            .find(|record| record.sample_count() > 0)
            .unwrap();

        assert_eq!(3, slot.sample_count());
        assert_relative_eq!(15.0, slot.radiance[0]);
    }

    #[test]
    fn history_decays() {
        let mut target = Cache::new();

        for frame in 0..200 {
            target.insert(frame, key(), Vec3::ONE);
            target.resolve(frame);
        }

        let (curr, _) = target.split(199);
        let record = curr.iter().find(|r| r.sample_count() > 0).unwrap();

        assert_eq!(HASH_CACHE_MAX_HISTORY + 1, record.sample_count());
        assert_relative_eq!(Vec3::ONE.x, record.mean().x, epsilon = 1e-5);
    }

    #[test]
    fn saturated_voxels_keep_their_mean() {
        let mut target = Cache::new();

        for _ in 0..VoxelRecord::MAX_SAMPLES + 5000 {
            target.insert(0, key(), Vec3::ONE);
        }

        let (curr, _) = target.split(0);
        let record = curr.iter().find(|r| r.sample_count() > 0).unwrap();

        assert_eq!(VoxelRecord::MAX_SAMPLES, record.sample_count());
        assert_relative_eq!(1.0, record.mean().x, epsilon = 1e-4);

        target.resolve(0);

        assert_relative_eq!(
            1.0,
            target.query(1, key()).unwrap().x,
            epsilon = 1e-4
        );
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut target = Cache::new();

        target.insert(0, key(), Vec3::ONE);
        target.resolve(0);

        let params = HashCacheResetPassParams {
            map_size: MAP_SIZE,
            _pad: [0; 3],
        };

        let [a, b] = &mut target.buffers;

        for id in 0..MAP_SIZE {
            hash_cache_reset(id, &params, &mut target.entries, a, b);
        }

        assert!(target.entries.iter().all(HashGridEntry::is_empty));
        assert!(target
            .buffers
            .iter()
            .flatten()
            .all(|r| *r == VoxelRecord::EMPTY));
    }
}

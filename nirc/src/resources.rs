use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use derivative::Derivative;
use log::info;

use crate::{Backend, BufferDesc, Error, Result};

/// Closed set of buffers owned by the caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferTag {
    HashGridEntries,
    VoxelData0,
    VoxelData1,
    NnPrimal,
    NnFilteredPrimal,
    NnGradient,
    NnGradientCount,
    NnGradientAux,
    FeatureHashGridEntries,
}

impl BufferTag {
    pub const ALL: [Self; 9] = [
        Self::HashGridEntries,
        Self::VoxelData0,
        Self::VoxelData1,
        Self::NnPrimal,
        Self::NnFilteredPrimal,
        Self::NnGradient,
        Self::NnGradientCount,
        Self::NnGradientAux,
        Self::FeatureHashGridEntries,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::HashGridEntries => "nirc_hash_grid_entries",
            Self::VoxelData0 => "nirc_voxel_data_0",
            Self::VoxelData1 => "nirc_voxel_data_1",
            Self::NnPrimal => "nirc_nn_primal",
            Self::NnFilteredPrimal => "nirc_nn_filtered_primal",
            Self::NnGradient => "nirc_nn_gradient",
            Self::NnGradientCount => "nirc_nn_gradient_count",
            Self::NnGradientAux => "nirc_nn_gradient_aux",
            Self::FeatureHashGridEntries => "nirc_feature_hash_grid_entries",
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
struct AllocatedBuffer<B>
where
    B: Backend,
{
    desc: BufferDesc,
    buffer: B::Buffer,
}

/// Buffers currently owned by the caches, keyed by [`BufferTag`].
///
/// Querying a buffer that doesn't exist (because its owner is inactive, or
/// because the set hasn't been rebuilt yet) is an error rather than a silent
/// no-op.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Default(bound = ""))]
pub struct ResourceSet<B>
where
    B: Backend,
{
    buffers: BTreeMap<BufferTag, AllocatedBuffer<B>>,
}

impl<B> ResourceSet<B>
where
    B: Backend,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(
        &mut self,
        backend: &mut B,
        tag: BufferTag,
        desc: BufferDesc,
    ) -> &B::Buffer {
        info!(
            "Allocating buffer `{}`; elements={}, size={}",
            desc.label,
            desc.element_count,
            desc.size(),
        );

        let buffer = backend.create_buffer(&desc);
        let slot = AllocatedBuffer { desc, buffer };

        match self.buffers.entry(tag) {
            Entry::Occupied(mut entry) => {
                entry.insert(slot);
                &entry.into_mut().buffer
            }
            Entry::Vacant(entry) => &entry.insert(slot).buffer,
        }
    }

    pub fn get(&self, tag: BufferTag) -> Result<&B::Buffer> {
        self.buffers
            .get(&tag)
            .map(|slot| &slot.buffer)
            .ok_or(Error::MissingBuffer(tag))
    }

    pub fn desc(&self, tag: BufferTag) -> Result<&BufferDesc> {
        self.buffers
            .get(&tag)
            .map(|slot| &slot.desc)
            .ok_or(Error::MissingBuffer(tag))
    }

    pub fn contains(&self, tag: BufferTag) -> bool {
        self.buffers.contains_key(&tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = BufferTag> + '_ {
        self.buffers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drops every handle.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

/// Assignment of the two voxel buffers for a single frame.
///
/// Computed once per frame and passed to every dispatch that touches the
/// hash cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoxelRoles {
    /// Written this frame.
    pub current: BufferTag,

    /// Written last frame; read-only this frame.
    pub previous: BufferTag,
}

impl VoxelRoles {
    pub fn for_frame(frame: u32) -> Self {
        if frame % 2 == 0 {
            Self {
                current: BufferTag::VoxelData0,
                previous: BufferTag::VoxelData1,
            }
        } else {
            Self {
                current: BufferTag::VoxelData1,
                previous: BufferTag::VoxelData0,
            }
        }
    }
}

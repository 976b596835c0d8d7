use bitflags::bitflags;
use derivative::Derivative;
use fxhash::FxHashMap;
use glam::{uvec2, UVec2};

use crate::{gpu, Backend, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgba32Float,
    Rgba32Uint,
}

/// Image consumed or produced by the render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelDesc {
    /// Name under which the render graph provides the image.
    pub name: &'static str,

    /// Name under which kernels see the image.
    pub binding: &'static str,

    pub description: &'static str,
    pub optional: bool,
    pub format: ImageFormat,

    /// Fixed size; `None` means the frame's size.
    pub size: Option<UVec2>,
}

pub const INPUT_VBUFFER: ChannelDesc = ChannelDesc {
    name: "vbuffer",
    binding: gpu::VBUFFER,
    description: "Visibility buffer in packed format",
    optional: false,
    format: ImageFormat::Rgba32Uint,
    size: None,
};

pub const INPUT_VIEW_DIR: ChannelDesc = ChannelDesc {
    name: "viewW",
    binding: gpu::VIEW_DIR,
    description: "World-space view direction (xyz float format)",
    optional: true,
    format: ImageFormat::Rgba32Float,
    size: None,
};

pub const INPUT_REF_IMAGE: ChannelDesc = ChannelDesc {
    name: "refImage",
    binding: gpu::REF_IMAGE,
    description: "Reference image, read by the pixel measurement estimate",
    optional: true,
    format: ImageFormat::Rgba32Float,
    size: None,
};

pub const OUTPUT_COLOR: ChannelDesc = ChannelDesc {
    name: "color",
    binding: gpu::OUTPUT_COLOR,
    description: "Output color (sum of direct and indirect)",
    optional: false,
    format: ImageFormat::Rgba32Float,
    size: None,
};

const DEBUG_OUTPUT_SIZE: UVec2 =
    uvec2(gpu::DEBUG_OUTPUT_WIDTH, gpu::DEBUG_OUTPUT_HEIGHT);

pub const OUTPUT_DEBUG_COLOR: ChannelDesc = ChannelDesc {
    name: "nirc_debug",
    binding: gpu::DEBUG_OUTPUT_COLOR,
    description: "Output color of the cache debug visualization",
    optional: true,
    format: ImageFormat::Rgba32Float,
    size: Some(DEBUG_OUTPUT_SIZE),
};

pub const OUTPUT_DEBUG_COLOR_REF: ChannelDesc = ChannelDesc {
    name: "nirc_debug_ref",
    binding: gpu::DEBUG_OUTPUT_COLOR_REF,
    description: "Path-traced reference of the cache debug visualization",
    optional: true,
    format: ImageFormat::Rgba32Float,
    size: Some(DEBUG_OUTPUT_SIZE),
};

pub const INPUT_CHANNELS: [ChannelDesc; 3] =
    [INPUT_VBUFFER, INPUT_VIEW_DIR, INPUT_REF_IMAGE];

pub const OUTPUT_CHANNELS: [ChannelDesc; 3] =
    [OUTPUT_COLOR, OUTPUT_DEBUG_COLOR, OUTPUT_DEBUG_COLOR_REF];

/// Images a render pass reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reflection {
    pub inputs: Vec<ChannelDesc>,
    pub outputs: Vec<ChannelDesc>,
}

bitflags! {
    /// Signals passed to downstream passes (e.g. temporal accumulation).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RefreshFlags: u32 {
        const LIGHTING_CHANGED       = 1 << 0;
        const RENDER_OPTIONS_CHANGED = 1 << 1;
    }
}

/// Images of a single frame, keyed by channel name, plus the refresh flags
/// raised while rendering it.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Default(bound = ""))]
pub struct RenderData<B>
where
    B: Backend,
{
    images: FxHashMap<&'static str, B::Image>,
    refresh_flags: RefreshFlags,
}

impl<B> RenderData<B>
where
    B: Backend,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, image: B::Image) {
        self.images.insert(name, image);
    }

    pub fn with(mut self, name: &'static str, image: B::Image) -> Self {
        self.insert(name, image);
        self
    }

    pub fn get(&self, name: &str) -> Option<&B::Image> {
        self.images.get(name)
    }

    /// Returns the channel's image, failing if the render graph didn't
    /// provide it.
    pub fn require(&self, channel: &ChannelDesc) -> Result<&B::Image> {
        self.get(channel.name)
            .ok_or(Error::MissingImage(channel.name))
    }

    pub fn refresh_flags(&self) -> RefreshFlags {
        self.refresh_flags
    }

    pub fn raise(&mut self, flags: RefreshFlags) {
        self.refresh_flags |= flags;
    }

    /// Forgets the flags raised by the previous frame.
    pub fn take_refresh_flags(&mut self) -> RefreshFlags {
        std::mem::take(&mut self.refresh_flags)
    }
}

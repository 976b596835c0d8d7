mod reference;
mod wgpu;

pub use self::reference::*;
pub use self::wgpu::*;

use thiserror::Error;

use crate::{BufferTag, PassRole, SceneUpdates};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The scene changed in a way that would require recompiling kernels
    /// (e.g. geometry got added or removed); this is not supported and
    /// terminates the frame.
    #[error(
        "scene changes that require kernel recompilation are not supported \
         (updates: {0:?})"
    )]
    UnsupportedSceneChange(SceneUpdates),

    #[error("buffer `{0:?}` is not allocated - its owner is inactive")]
    MissingBuffer(BufferTag),

    #[error("pass `{0:?}` is not built - its owner is inactive")]
    MissingPass(PassRole),

    #[error("render data has no image `{0}`")]
    MissingImage(&'static str),

    #[error("couldn't create program `{label}`: {reason}")]
    ProgramCreation { label: String, reason: String },

    #[error("no kernel registered under `{0}`")]
    UnknownKernel(String),

    #[error("program `{program}` expects `{name}`, but it wasn't bound")]
    MissingBinding { program: String, name: String },

    #[error("couldn't dispatch `{program}`: {reason}")]
    Dispatch { program: String, reason: String },

    #[error("couldn't read buffer `{label}` back: {reason}")]
    Readback { label: String, reason: String },
}

//! Library interface for instarelink
//!
//! Post-install fixups for pre-built vendor client SDKs: rewrite runtime
//! search paths and install names of staged binaries, and wrap executables
//! in launchers that carry a fixed environment.

pub mod artifact;
pub mod config;
pub mod editor;
pub mod error;
pub mod installer;
pub mod layout;
pub mod permissions;
pub mod relink;
pub mod wrap;

// Re-export commonly used items
pub use artifact::{ArtifactKind, BinaryArtifact, BinaryFormat};
pub use editor::{BinaryEditor, EditError, InstallNameTool, PatchElf, platform_editor};
pub use error::{RelinkError, Result};
pub use relink::{RelinkPolicy, RelinkReport, RelinkTarget, Relinker};
pub use wrap::{EnvMap, WrappedExecutable, wrap, wrap_all};

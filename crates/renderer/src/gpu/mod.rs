//! wgpu side of the engine.
//!
//! - `context` opens the instance, adapter and device, headless or bound to a
//!   window surface.
//! - `pipeline` turns a checked program into render pipelines plus the bind
//!   group layouts its uniforms and samplers need.
//! - `uniforms` packs built-ins and user values into std140 blocks.
//! - `textures` owns decoded images per texture unit and assembles bind groups.
//! - `offscreen` renders into readable textures for grading and capture.
//! - `surface` drives one preview window frame by frame.

mod context;
pub(crate) mod offscreen;
mod pipeline;
mod surface;
mod textures;
mod uniforms;

pub use context::GpuContext;
pub use pipeline::{CompiledProgram, PipelineLayouts, CAPTURE_FORMAT};
pub use surface::{
    CaptureError, CaptureHandle, FrameStatus, PreviewSurface, SurfaceFault, SurfaceOptions,
};
pub use textures::{load_image, mip_chain, Binder};
pub use uniforms::{pack_user_uniforms, BuiltinUniforms};

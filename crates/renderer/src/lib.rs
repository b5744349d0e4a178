//! Shader engine for shaderlab: program building, live preview and grading.
//!
//! User shaders are WebGL-flavoured GLSL. They are wrapped with a generated
//! prelude, compiled to a wgpu pipeline and then either drawn every frame in a
//! preview window or rendered once offscreen for grading:
//!
//! ```text
//!   ShaderSource ──▶ ProgramBuilder::check ──▶ CheckedProgram
//!        ▲                 │ BuildFailure               │
//!        │                 ▼                            ▼
//!   LiveShader        diagnostics::translate     ProgramBuilder::build
//!   (debounced)                                         │
//!                                 ┌─────────────────────┴────────────┐
//!                                 ▼                                  ▼
//!                        PreviewSurface::render              Grader::grade
//!                        (Binder, TimeSource)          (two offscreen targets)
//! ```
//!
//! A failed build never touches the program that is already running. GPU
//! faults are scoped to the surface that hit them.

pub mod compile;
pub mod frame;
pub mod gpu;
pub mod grade;
pub mod live;
pub mod runtime;
pub mod types;
pub mod window;

pub use compile::{BuildFailure, CheckedProgram, ProgramBuilder, Stage};
pub use frame::SurfaceState;
pub use gpu::{
    CaptureError, CaptureHandle, CompiledProgram, FrameStatus, GpuContext, PreviewSurface,
    SurfaceFault, SurfaceOptions,
};
pub use grade::{GradePolicy, GradeVerdict, Grader, RenderError, UniformSnapshot};
pub use live::{CompileAttempt, LiveShader, ProgramSink};
pub use runtime::{
    BoxedTimeSource, ControlledTimeSource, FixedTimeSource, SystemTimeSource, TimeSample,
    TimeSource, TimeState,
};
pub use types::{
    ShaderCompiler, ShaderSource, TextureId, TextureSlot, UniformSet, UniformValue,
    MAX_TEXTURE_UNITS,
};
pub use window::{run_preview, PreviewWindowOptions};

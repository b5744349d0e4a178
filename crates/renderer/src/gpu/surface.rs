use std::cell::RefCell;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use image::{ImageFormat, RgbaImage};
use winit::window::Window;

use crate::compile::{BuildFailure, ProgramBuilder};
use crate::frame::{FpsCounter, FrameLoop, SurfaceState};
use crate::runtime::{BoxedTimeSource, SystemTimeSource, TimeState};
use crate::types::{ShaderCompiler, ShaderSource, TextureSlot, UniformSet};

use super::context::{GpuContext, PresentTarget};
use super::offscreen::{read_texture, OffscreenTarget};
use super::pipeline::{CompiledProgram, PipelineLayouts, CAPTURE_FORMAT};
use super::textures::Binder;
use super::uniforms::BuiltinUniforms;

/// Terminal failure of one preview surface. Other surfaces are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceFault {
    #[error("the GPU ran out of memory while presenting")]
    OutOfMemory,
    #[error("the GPU device was lost: {0}")]
    DeviceLost(String),
    #[error("the surface failed: {0}")]
    Surface(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("the preview surface has been torn down")]
    TornDown,
    #[error("the surface was created without preserve_drawing_buffer")]
    NotRetained,
    #[error("no frame has been drawn yet")]
    NoFrame,
    #[error("failed to read the frame back: {0}")]
    Readback(String),
    #[error("failed to encode PNG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Drawn,
    /// The swapchain was not available this tick; the next tick retries.
    Skipped,
    /// No program is installed, or the surface is torn down.
    Idle,
}

#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    pub preserve_drawing_buffer: bool,
    pub compiler: ShaderCompiler,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            preserve_drawing_buffer: true,
            compiler: ShaderCompiler::default(),
        }
    }
}

struct RetainedFrame {
    gpu: GpuContext,
    target: OffscreenTarget,
    has_frame: bool,
}

enum CaptureSlot {
    Disabled,
    Retained(RetainedFrame),
    TornDown,
}

/// Reads the last presented frame of the surface that created it.
#[derive(Clone)]
pub struct CaptureHandle {
    slot: Rc<RefCell<CaptureSlot>>,
}

impl CaptureHandle {
    fn new(slot: CaptureSlot) -> Self {
        Self {
            slot: Rc::new(RefCell::new(slot)),
        }
    }

    pub fn capture(&self) -> Result<RgbaImage, CaptureError> {
        match &*self.slot.borrow() {
            CaptureSlot::TornDown => Err(CaptureError::TornDown),
            CaptureSlot::Disabled => Err(CaptureError::NotRetained),
            CaptureSlot::Retained(frame) if !frame.has_frame => Err(CaptureError::NoFrame),
            CaptureSlot::Retained(frame) => {
                read_texture(&frame.gpu, &frame.target.texture, frame.target.width, frame.target.height)
                    .map_err(|err| CaptureError::Readback(format!("{err:#}")))
            }
        }
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>, CaptureError> {
        let image = self.capture()?;
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    pub fn save_png(&self, path: &Path) -> Result<(), CaptureError> {
        let bytes = self.to_png_bytes()?;
        std::fs::write(path, bytes).map_err(|source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A window surface drawing the installed program every tick.
pub struct PreviewSurface {
    window: Arc<Window>,
    gpu: GpuContext,
    target: PresentTarget,
    layouts: PipelineLayouts,
    builder: ProgramBuilder,
    program: Option<CompiledProgram>,
    binder: Binder,
    uniforms: UniformSet,
    clock: BoxedTimeSource,
    frames: FrameLoop,
    fps: FpsCounter,
    capture: Rc<RefCell<CaptureSlot>>,
    device_lost: Arc<AtomicBool>,
    fault: Option<SurfaceFault>,
}

impl PreviewSurface {
    pub fn new(window: Arc<Window>, options: SurfaceOptions) -> Result<(Self, CaptureHandle)> {
        let size = window.inner_size();
        let (gpu, target) = GpuContext::with_surface(window.as_ref(), size.width, size.height)?;

        let device_lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&device_lost);
        gpu.device.set_device_lost_callback(move |reason, message| {
            tracing::error!(?reason, %message, "GPU device lost");
            flag.store(true, Ordering::SeqCst);
        });

        let layouts = PipelineLayouts::new(&gpu);
        let binder = Binder::new(&gpu);
        let (width, height) = target.size();
        let slot = if options.preserve_drawing_buffer {
            CaptureSlot::Retained(RetainedFrame {
                gpu: gpu.clone(),
                target: OffscreenTarget::new(&gpu, width, height, "retained frame")?,
                has_frame: false,
            })
        } else {
            CaptureSlot::Disabled
        };
        let handle = CaptureHandle::new(slot);

        let surface = Self {
            window,
            gpu,
            target,
            layouts,
            builder: ProgramBuilder::new(options.compiler),
            program: None,
            binder,
            uniforms: UniformSet::new(),
            clock: Box::new(SystemTimeSource::new()),
            frames: FrameLoop::new(),
            fps: FpsCounter::new(),
            capture: Rc::clone(&handle.slot),
            device_lost,
            fault: None,
        };
        Ok((surface, handle))
    }

    pub fn state(&self) -> SurfaceState {
        self.frames.state()
    }

    pub fn fault(&self) -> Option<&SurfaceFault> {
        self.fault.as_ref()
    }

    pub fn builder(&self) -> &ProgramBuilder {
        &self.builder
    }

    /// Builds a program for this surface without installing it.
    pub fn build_program(&self, source: &ShaderSource) -> Result<CompiledProgram, BuildFailure> {
        let mut formats = vec![self.target.format()];
        if self.target.format() != CAPTURE_FORMAT {
            formats.push(CAPTURE_FORMAT);
        }
        self.builder.build(&self.gpu, &self.layouts, source, &formats)
    }

    /// Replaces the running program. Ignored once torn down.
    pub fn install_program(&mut self, program: CompiledProgram) {
        if self.frames.state() == SurfaceState::TornDown {
            tracing::debug!(program = program.id(), "surface torn down; dropping program");
            return;
        }
        if let Some(previous) = self.program.replace(program) {
            tracing::debug!(previous = previous.id(), "program replaced");
        }
        self.frames.mark_ready();
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    pub fn set_uniforms(&mut self, values: UniformSet) {
        self.uniforms = values;
    }

    pub fn set_textures(&mut self, slots: &[TextureSlot]) {
        if self.frames.state() != SurfaceState::TornDown {
            self.binder.set_textures(slots);
        }
    }

    pub fn set_time_source(&mut self, clock: BoxedTimeSource) {
        self.clock = clock;
    }

    pub fn time_state(&self) -> TimeState {
        self.clock.state()
    }

    /// Seek, pause or change speed.
    pub fn set_time(&mut self, state: TimeState) {
        self.clock.apply(state);
    }

    pub fn toggle_pause(&mut self) -> bool {
        let mut state = self.clock.state();
        state.is_paused = !state.is_paused;
        self.clock.apply(state);
        state.is_paused
    }

    /// Asks the window for another redraw.
    pub fn request_frame(&mut self) {
        if self.frames.schedule().is_some() {
            self.window.request_redraw();
        }
    }

    pub fn fps(&mut self, now: Instant) -> u32 {
        self.fps.fps(now)
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames.frames_drawn()
    }

    fn enter_fault(&mut self, fault: SurfaceFault) -> SurfaceFault {
        tracing::error!(%fault, "preview surface faulted");
        self.fault = Some(fault.clone());
        self.tear_down();
        fault
    }

    /// Draws one frame at `now`.
    pub fn render(&mut self, now: Instant) -> Result<FrameStatus, SurfaceFault> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        if self.device_lost.load(Ordering::SeqCst) {
            return Err(self.enter_fault(SurfaceFault::DeviceLost(
                "the device stopped responding".into(),
            )));
        }
        let Some(token) = self.frames.schedule() else {
            return Ok(FrameStatus::Idle);
        };
        if !self.frames.begin_frame(token) {
            return Ok(FrameStatus::Idle);
        }

        self.binder.poll_decoded();
        let size = self.window.inner_size();
        if self.target.resize(&self.gpu.device, size.width, size.height) {
            tracing::debug!(width = size.width, height = size.height, "surface resized");
        }
        let (width, height) = self.target.size();
        let sample = self.clock.sample(now);

        let frame = match self.target.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost or outdated; reconfiguring");
                self.target.reconfigure(&self.gpu.device);
                return Ok(FrameStatus::Skipped);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::trace!("surface acquire timed out; skipping frame");
                return Ok(FrameStatus::Skipped);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(self.enter_fault(SurfaceFault::OutOfMemory));
            }
            Err(error) => return Err(self.enter_fault(SurfaceFault::Surface(error.to_string()))),
        };

        let Some(program) = &self.program else {
            frame.present();
            return Ok(FrameStatus::Idle);
        };
        let builtins = BuiltinUniforms::new(sample.seconds, width, height);
        let groups = self.binder.prepare(program, &self.uniforms, &builtins);

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("preview frame"),
            });
        program.encode(&mut encoder, &view, self.target.format(), &self.layouts, &groups);

        let mut capture = self.capture.borrow_mut();
        if let CaptureSlot::Retained(retained) = &mut *capture {
            if (retained.target.width, retained.target.height) != (width, height) {
                match OffscreenTarget::new(&self.gpu, width, height, "retained frame") {
                    Ok(target) => {
                        retained.target.texture.destroy();
                        retained.target = target;
                        retained.has_frame = false;
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to resize retained frame"),
                }
            }
            if (retained.target.width, retained.target.height) == (width, height) {
                retained.has_frame |= program.encode(
                    &mut encoder,
                    &retained.target.view,
                    CAPTURE_FORMAT,
                    &self.layouts,
                    &groups,
                );
            }
        }
        drop(capture);

        self.gpu.queue.submit(Some(encoder.finish()));
        frame.present();
        self.frames.finish_frame();
        self.fps.record(now);
        Ok(FrameStatus::Drawn)
    }

    /// Releases the program and textures and cancels the pending frame. Idempotent.
    pub fn tear_down(&mut self) {
        if !self.frames.tear_down() {
            return;
        }
        self.program = None;
        self.binder.release();
        let previous = self.capture.replace(CaptureSlot::TornDown);
        if let CaptureSlot::Retained(retained) = previous {
            retained.target.texture.destroy();
        }
        tracing::debug!(frames = self.frames.frames_drawn(), "preview surface torn down");
    }
}

impl Drop for PreviewSurface {
    fn drop(&mut self) {
        self.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torn_down_handle_reports_teardown() {
        let handle = CaptureHandle::new(CaptureSlot::TornDown);
        assert!(matches!(handle.capture(), Err(CaptureError::TornDown)));
        assert!(matches!(handle.to_png_bytes(), Err(CaptureError::TornDown)));
    }

    #[test]
    fn disabled_handle_needs_preserved_buffer() {
        let handle = CaptureHandle::new(CaptureSlot::Disabled);
        let clone = handle.clone();
        assert!(matches!(clone.capture(), Err(CaptureError::NotRetained)));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        assert!(handle.save_png(&path).is_err());
        assert!(!path.exists());
    }
}

//! Interactive preview window.
//!
//! One winit window, one [`PreviewSurface`]. The shader files on disk are
//! polled for edits which go through [`LiveShader`], so a save in any editor
//! recompiles after the quiet interval without disturbing the running frame.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use engineconfig::PreviewConfig;
use tracing::{debug, error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::gpu::{CaptureHandle, FrameStatus, PreviewSurface, SurfaceOptions};
use crate::live::{CompileAttempt, LiveShader};
use crate::runtime::{SystemTimeSource, TimeState};
use crate::types::{ShaderCompiler, ShaderSource, TextureSlot, UniformSet};

const WATCH_INTERVAL: Duration = Duration::from_millis(250);
const TITLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PreviewWindowOptions {
    pub fragment_path: PathBuf,
    pub vertex_path: Option<PathBuf>,
    pub uniforms: UniformSet,
    pub textures: Vec<TextureSlot>,
    pub time: TimeState,
    pub config: PreviewConfig,
    pub compiler: ShaderCompiler,
    /// Where `S` writes screenshots.
    pub screenshot_dir: PathBuf,
}

/// Polls shader files by modification time.
#[derive(Debug)]
pub struct SourceWatcher {
    fragment: PathBuf,
    vertex: Option<PathBuf>,
    stamps: (Option<SystemTime>, Option<SystemTime>),
    next_poll: Instant,
}

impl SourceWatcher {
    pub fn new(fragment: PathBuf, vertex: Option<PathBuf>) -> Self {
        let mut watcher = Self {
            fragment,
            vertex,
            stamps: (None, None),
            next_poll: Instant::now(),
        };
        watcher.stamps = watcher.current_stamps();
        watcher
    }

    fn current_stamps(&self) -> (Option<SystemTime>, Option<SystemTime>) {
        (
            modified(&self.fragment),
            self.vertex.as_deref().and_then(modified),
        )
    }

    pub fn read(&self) -> Result<ShaderSource> {
        let fragment = fs::read_to_string(&self.fragment)
            .with_context(|| format!("failed to read {}", self.fragment.display()))?;
        let mut source = ShaderSource::fragment(fragment);
        if let Some(path) = &self.vertex {
            let vertex = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            source = source.with_vertex(vertex);
        }
        Ok(source)
    }

    /// Returns the new source when either file changed since the last poll.
    pub fn poll(&mut self, now: Instant) -> Option<ShaderSource> {
        if now < self.next_poll {
            return None;
        }
        self.next_poll = now + WATCH_INTERVAL;
        let stamps = self.current_stamps();
        if stamps == self.stamps {
            return None;
        }
        self.stamps = stamps;
        match self.read() {
            Ok(source) => Some(source),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "shader changed but could not be read");
                None
            }
        }
    }

    pub fn next_poll(&self) -> Instant {
        self.next_poll
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn report(attempt: &CompileAttempt) {
    match &attempt.diagnostic {
        None => info!(generation = attempt.generation, "shader compiled"),
        Some(diagnostic) => warn!(
            generation = attempt.generation,
            kind = diagnostic.kind.id(),
            line = diagnostic.source_line,
            hint = diagnostic.hint.as_deref().unwrap_or(""),
            "{}: {}",
            diagnostic.title,
            diagnostic.detail()
        ),
    }
}

fn screenshot_path(dir: &Path) -> PathBuf {
    dir.join(format!("shaderlab-{}.png", Local::now().format("%Y%m%d-%H%M%S%.3f")))
}

fn save_screenshot(capture: &CaptureHandle, dir: &Path) {
    if let Err(err) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %err, "failed to create screenshot directory");
        return;
    }
    let path = screenshot_path(dir);
    match capture.save_png(&path) {
        Ok(()) => info!(path = %path.display(), "screenshot saved"),
        Err(err) => warn!(error = %err, "screenshot failed"),
    }
}

fn is_key(event: &KeyEvent, letter: &str) -> bool {
    matches!(&event.logical_key, Key::Character(value) if value.eq_ignore_ascii_case(letter))
}

/// Opens the preview window and blocks until it closes.
pub fn run_preview(options: PreviewWindowOptions) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let (width, height) = options.config.size;
    let name = options
        .fragment_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shader".into());
    let window = WindowBuilder::new()
        .with_title(format!("shaderlab - {name}"))
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let (mut surface, capture) = PreviewSurface::new(
        Arc::clone(&window),
        SurfaceOptions {
            preserve_drawing_buffer: options.config.preserve_drawing_buffer,
            compiler: options.compiler,
        },
    )
    .context("failed to initialise preview surface")?;
    surface.set_uniforms(options.uniforms.clone());
    surface.set_textures(&options.textures);
    surface.set_time_source(Box::new(SystemTimeSource::with_state(options.time)));

    let mut watcher = SourceWatcher::new(options.fragment_path.clone(), options.vertex_path.clone());
    let mut live = LiveShader::new(&options.config);
    let initial = watcher.read()?;
    if let Some(attempt) = live.compile_now(initial, Instant::now(), &mut surface) {
        report(&attempt);
    }
    surface.request_frame();

    let show_fps = options.config.show_fps;
    let mut last_title = Instant::now();
    let mut fault = None;

    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                match &event.logical_key {
                    Key::Named(NamedKey::Escape) => elwt.exit(),
                    Key::Named(NamedKey::Space) => {
                        let paused = surface.toggle_pause();
                        info!(paused, "playback toggled");
                        surface.request_frame();
                    }
                    _ if is_key(&event, "s") => save_screenshot(&capture, &options.screenshot_dir),
                    _ => {}
                }
            }
            WindowEvent::Resized(size) => {
                debug!(width = size.width, height = size.height, "window resized");
                surface.request_frame();
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                match surface.render(now) {
                    Ok(FrameStatus::Drawn | FrameStatus::Skipped) => {
                        if show_fps && now.duration_since(last_title) >= TITLE_INTERVAL {
                            last_title = now;
                            let fps = surface.fps(now);
                            window.set_title(&format!("shaderlab - {name} - {fps} fps"));
                        }
                        surface.request_frame();
                    }
                    Ok(FrameStatus::Idle) => {}
                    Err(err) => {
                        error!(error = %err, "preview surface stopped");
                        fault = Some(err);
                        elwt.exit();
                    }
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if let Some(source) = watcher.poll(now) {
                debug!("shader file changed");
                live.edit(source, now);
            }
            if let Some(attempt) = live.poll(now, &mut surface) {
                report(&attempt);
                surface.request_frame();
            }
            let wake = live
                .deadline()
                .map_or(watcher.next_poll(), |deadline| deadline.min(watcher.next_poll()));
            elwt.set_control_flow(ControlFlow::WaitUntil(wake));
        }
        _ => {}
    });

    surface.tear_down();
    run_result.map_err(|err| anyhow!("window event loop error: {err}"))?;
    match fault {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_reports_edits_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.frag");
        fs::write(&path, "void main() {}").unwrap();
        let mut watcher = SourceWatcher::new(path.clone(), None);
        let start = Instant::now();
        assert!(watcher.poll(start).is_none());

        let later = SystemTime::now() + Duration::from_secs(5);
        fs::write(&path, "void main() { gl_FragColor = vec4(1.0); }").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(watcher.poll(start + Duration::from_millis(100)).is_none());
        let source = watcher.poll(start + Duration::from_millis(300)).unwrap();
        assert!(source.fragment.contains("vec4(1.0)"));
        assert!(source.vertex.is_none());
        assert!(watcher.poll(start + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn watcher_reads_vertex_stage() {
        let dir = tempfile::tempdir().unwrap();
        let fragment = dir.path().join("a.frag");
        let vertex = dir.path().join("a.vert");
        fs::write(&fragment, "void main() {}").unwrap();
        fs::write(&vertex, "attribute vec2 position; void main() {}").unwrap();
        let source = SourceWatcher::new(fragment, Some(vertex)).read().unwrap();
        assert!(source.vertex.unwrap().contains("attribute"));
    }

    #[test]
    fn missing_file_reports_path() {
        let watcher = SourceWatcher::new(PathBuf::from("/nonexistent/x.frag"), None);
        let err = watcher.read().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/x.frag"));
    }

    #[test]
    fn screenshots_are_timestamped_pngs() {
        let path = screenshot_path(Path::new("/tmp/shots"));
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file.starts_with("shaderlab-"));
        assert!(file.ends_with(".png"));
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use diagnostics::{CompileDiagnostic, Locale};
use engineconfig::{EngineConfig, GradingConfig};
use renderer::{
    run_preview, GradePolicy, Grader, PreviewWindowOptions, ProgramBuilder, ShaderCompiler,
    ShaderSource, TextureSlot, TimeState, UniformSet, UniformSnapshot, UniformValue,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{CaptureArgs, CheckArgs, GradeArgs, PreviewArgs, SourceArgs};
use crate::paths::AppPaths;

/// Exit status of `grade` when the shaders render differently.
pub const EXIT_MISMATCH: u8 = 2;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Explicit file, then the platform config file if present, then defaults.
pub fn load_config(explicit: Option<&Path>, paths: Option<&AppPaths>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        return EngineConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    if let Some(path) = paths.map(AppPaths::config_file).filter(|path| path.is_file()) {
        tracing::debug!(path = %path.display(), "using config file");
        return EngineConfig::from_path(&path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    Ok(EngineConfig::default())
}

pub struct Session {
    pub config: EngineConfig,
    pub compiler: ShaderCompiler,
    pub paths: Option<AppPaths>,
}

impl Session {
    pub fn builder(&self) -> ProgramBuilder {
        ProgramBuilder::new(self.compiler)
    }

    fn grader(&self, policy: GradePolicy) -> Result<Grader> {
        Grader::headless(self.builder(), policy).context("failed to open a GPU adapter")
    }
}

fn read_shader(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_source(args: &SourceArgs) -> Result<ShaderSource> {
    let mut source = ShaderSource::fragment(read_shader(&args.fragment)?);
    if let Some(vertex) = &args.vertex {
        source = source.with_vertex(read_shader(vertex)?);
    }
    Ok(source)
}

fn uniform_set(values: &[(String, UniformValue)]) -> UniformSet {
    values.iter().cloned().collect()
}

#[derive(Serialize)]
struct CheckReport<'a> {
    ok: bool,
    diagnostic: Option<&'a CompileDiagnostic>,
    diagnostics: &'a [CompileDiagnostic],
}

fn print_diagnostic(diagnostic: &CompileDiagnostic, path: &Path) {
    match diagnostic.source_line {
        Some(line) => println!(
            "{}:{line}: {} [{}]",
            path.display(),
            diagnostic.title,
            diagnostic.kind.id()
        ),
        None => println!(
            "{}: {} [{}]",
            path.display(),
            diagnostic.title,
            diagnostic.kind.id()
        ),
    }
    println!("  {}", diagnostic.detail());
    if let Some(hint) = &diagnostic.hint {
        println!("  hint: {hint}");
    }
}

pub fn check(ctx: &Session, args: CheckArgs) -> Result<ExitCode> {
    let source = read_source(&args.source)?;
    let locale = Locale::from_tag(
        args.locale
            .as_deref()
            .unwrap_or(ctx.config.preview.locale.as_str()),
    );

    let outcome = ctx.builder().check(&source);
    let all = match &outcome {
        Ok(_) => Vec::new(),
        Err(failure) => failure.diagnostics(locale),
    };
    let headline = diagnostics::primary(&all);

    if args.json {
        let report = CheckReport {
            ok: outcome.is_ok(),
            diagnostic: headline,
            diagnostics: &all,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(diagnostic) = headline {
        print_diagnostic(diagnostic, &args.source.fragment);
    } else {
        println!("ok");
    }

    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// The configured grading section with `--acceptance` applied, validated as a whole.
fn grading_config(ctx: &Session, acceptance: Option<f32>) -> Result<GradingConfig> {
    let mut grading = ctx.config.grading.clone();
    if let Some(acceptance) = acceptance {
        grading.acceptance = acceptance;
    }
    grading.validate().context("invalid --acceptance")?;
    Ok(grading)
}

pub fn grade(ctx: &Session, args: GradeArgs) -> Result<ExitCode> {
    let user = ShaderSource::fragment(read_shader(&args.user)?);
    let reference = ShaderSource::fragment(read_shader(&args.reference)?);

    let policy = GradePolicy::from(&grading_config(ctx, args.acceptance)?);
    let snapshot = UniformSnapshot {
        time: args.time,
        resolution: args
            .resolution
            .map(|(width, height)| [width as f32, height as f32]),
        values: uniform_set(&args.uniforms),
    };

    let grader = ctx.grader(policy)?;
    let verdict = grader.grade(&user, &reference, &snapshot);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(if verdict.is_match {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_MISMATCH)
    })
}

pub fn capture(ctx: &Session, args: CaptureArgs) -> Result<ExitCode> {
    let source = read_source(&args.source)?;
    let policy = GradePolicy::from(&ctx.config.grading);
    let (width, height) = args.size.unwrap_or((policy.width, policy.height));
    let snapshot = UniformSnapshot {
        time: args.time,
        resolution: None,
        values: uniform_set(&args.uniforms),
    };

    let grader = ctx.grader(policy)?;
    let image = grader
        .render(&source, &snapshot, width, height)
        .with_context(|| format!("failed to render {}", args.source.fragment.display()))?;
    image
        .save(&args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    tracing::info!(path = %args.out.display(), width, height, "frame captured");
    Ok(ExitCode::SUCCESS)
}

fn screenshot_dir(ctx: &Session, explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| ctx.paths.as_ref().map(AppPaths::screenshot_dir))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn preview(ctx: &Session, args: PreviewArgs) -> Result<ExitCode> {
    let mut config = ctx.config.preview.clone();
    if let Some(size) = args.size {
        config.size = size;
    }
    let textures = args
        .textures
        .iter()
        .enumerate()
        .map(|(index, (name, url))| TextureSlot::new(index as u32, name.clone(), Some(url.clone())))
        .collect();
    let time = TimeState {
        is_paused: args.paused,
        playback_speed: args.speed,
        ..TimeState::default()
    };

    run_preview(PreviewWindowOptions {
        fragment_path: args.source.fragment,
        vertex_path: args.source.vertex,
        uniforms: uniform_set(&args.uniforms),
        textures,
        time,
        config,
        compiler: ctx.compiler,
        screenshot_dir: screenshot_dir(ctx, args.screenshots),
    })?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::from_raw(dir.path().join("config"), dir.path().join("data"));
        let config = load_config(None, Some(&paths)).unwrap();
        assert_eq!(config.grading.canonical_width, 256);
    }

    #[test]
    fn platform_config_file_is_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::from_raw(dir.path().to_path_buf(), dir.path().join("data"));
        fs::write(
            paths.config_file(),
            "version = 1\n[grading]\nacceptance = 0.5\n",
        )
        .unwrap();
        let config = load_config(None, Some(&paths)).unwrap();
        assert_eq!(config.grading.acceptance, 0.5);
    }

    #[test]
    fn explicit_config_must_exist() {
        let err = load_config(Some(Path::new("/nonexistent/shaderlab.toml")), None).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/shaderlab.toml"));
    }

    #[test]
    fn acceptance_override_is_validated() {
        let ctx = Session {
            config: EngineConfig::default(),
            compiler: ShaderCompiler::Naga,
            paths: None,
        };
        assert_eq!(grading_config(&ctx, Some(0.5)).unwrap().acceptance, 0.5);
        assert_eq!(grading_config(&ctx, None).unwrap().acceptance, 0.90);
        let err = grading_config(&ctx, Some(f32::NAN)).unwrap_err();
        assert!(format!("{err:#}").contains("grading.acceptance must be a finite number"));
        assert!(grading_config(&ctx, Some(f32::INFINITY)).is_err());
    }

    #[test]
    fn screenshots_default_to_data_dir() {
        let ctx = Session {
            config: EngineConfig::default(),
            compiler: ShaderCompiler::Naga,
            paths: Some(AppPaths::from_raw("/c".into(), "/d".into())),
        };
        assert_eq!(screenshot_dir(&ctx, None), PathBuf::from("/d/screenshots"));
        assert_eq!(
            screenshot_dir(&ctx, Some("/tmp/shots".into())),
            PathBuf::from("/tmp/shots")
        );
    }
}

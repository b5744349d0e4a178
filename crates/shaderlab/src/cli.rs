use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use renderer::{ShaderCompiler, UniformValue};

#[derive(Parser, Debug)]
#[command(
    name = "shaderlab",
    author,
    version,
    about = "Compile, preview and grade WebGL-style GLSL shaders"
)]
pub struct Cli {
    /// Configuration file; defaults to `config.toml` in the platform config directory.
    #[arg(long, global = true, env = "SHADERLAB_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Shader compiler backend: `naga` or `shaderc`. Overrides the config file.
    #[arg(long, global = true, value_name = "COMPILER", value_parser = parse_shader_compiler)]
    pub compiler: Option<ShaderCompiler>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a shader and print the leading diagnostic, or `ok`.
    Check(CheckArgs),
    /// Render two shaders offscreen and compare them; prints the verdict as JSON.
    Grade(GradeArgs),
    /// Render one offscreen frame to a PNG.
    Capture(CaptureArgs),
    /// Open a live preview window that recompiles when the file changes.
    Preview(PreviewArgs),
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Fragment shader file.
    #[arg(value_name = "FRAG")]
    pub fragment: PathBuf,

    /// Vertex shader file; the full-viewport quad shader is used when omitted.
    #[arg(long, value_name = "FILE")]
    pub vertex: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Diagnostic language (`en`, `es`, `fr`, `de`). Overrides `preview.locale`.
    #[arg(long, value_name = "TAG")]
    pub locale: Option<String>,

    /// Print every diagnostic as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GradeArgs {
    /// The submitted fragment shader.
    #[arg(value_name = "USER")]
    pub user: PathBuf,

    /// The reference fragment shader.
    #[arg(value_name = "REFERENCE")]
    pub reference: PathBuf,

    /// Value of `u_time` for both renders.
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub time: f32,

    /// Value of `u_resolution`; defaults to the canonical grading size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub resolution: Option<(u32, u32)>,

    /// Uniform value shared by both renders (`name=1.0`, `name=0.2,0.4`, `name=#ff8800`, `name=true`).
    #[arg(long = "uniform", value_name = "NAME=VALUE", value_parser = parse_uniform_assignment)]
    pub uniforms: Vec<(String, UniformValue)>,

    /// Similarity a submission must exceed. Overrides `grading.acceptance`.
    #[arg(long, value_name = "RATIO")]
    pub acceptance: Option<f32>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// PNG file to write.
    #[arg(long, value_name = "FILE.png")]
    pub out: PathBuf,

    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub time: f32,

    /// Output size; defaults to the canonical grading size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub size: Option<(u32, u32)>,

    #[arg(long = "uniform", value_name = "NAME=VALUE", value_parser = parse_uniform_assignment)]
    pub uniforms: Vec<(String, UniformValue)>,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Image bound to the sampler uniform `NAME`; a path or an http(s) URL.
    #[arg(long = "texture", value_name = "NAME=PATH", value_parser = parse_texture_assignment)]
    pub textures: Vec<(String, String)>,

    #[arg(long = "uniform", value_name = "NAME=VALUE", value_parser = parse_uniform_assignment)]
    pub uniforms: Vec<(String, UniformValue)>,

    /// Playback speed multiplier.
    #[arg(long, value_name = "FACTOR", default_value_t = 1.0)]
    pub speed: f32,

    /// Start with playback paused.
    #[arg(long)]
    pub paused: bool,

    /// Window size. Overrides `preview.size`.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub size: Option<(u32, u32)>,

    /// Directory for screenshots taken with `S`.
    #[arg(long, value_name = "DIR")]
    pub screenshots: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_shader_compiler(value: &str) -> Result<ShaderCompiler, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("shader compiler must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "shaderc" => {
            if cfg!(feature = "shaderc") {
                Ok(ShaderCompiler::Shaderc)
            } else {
                Err("shaderc support is not enabled in this build".to_string())
            }
        }
        "naga" | "naga-glsl" => Ok(ShaderCompiler::Naga),
        _ => Err("unknown shader compiler (expected naga or shaderc)".to_string()),
    }
}

pub fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

fn split_assignment(value: &str) -> Result<(String, &str), String> {
    let (name, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("uniform name must not be empty".into());
    }
    Ok((name.to_string(), rest.trim()))
}

pub fn parse_uniform_assignment(value: &str) -> Result<(String, UniformValue), String> {
    let (name, raw) = split_assignment(value)?;
    Ok((name, parse_uniform_value(raw)?))
}

pub fn parse_texture_assignment(value: &str) -> Result<(String, String), String> {
    let (name, path) = split_assignment(value)?;
    if path.is_empty() {
        return Err(format!("texture '{name}' needs a path or URL"));
    }
    Ok((name, path.to_string()))
}

/// `1.0` float, `a,b[,c[,d]]` vector, `#rrggbb[aa]` colour, `true|false` bool.
pub fn parse_uniform_value(raw: &str) -> Result<UniformValue, String> {
    match raw {
        "true" => return Ok(UniformValue::Bool(true)),
        "false" => return Ok(UniformValue::Bool(false)),
        _ => {}
    }
    if let Some(hex) = raw.strip_prefix('#') {
        return parse_color(hex).map(UniformValue::Color);
    }
    if raw.contains(',') {
        let parts = raw
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f32>()
                    .map_err(|_| format!("invalid vector component '{}'", part.trim()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return match parts.as_slice() {
            [x, y] => Ok(UniformValue::Vec2([*x, *y])),
            [x, y, z] => Ok(UniformValue::Vec3([*x, *y, *z])),
            [x, y, z, w] => Ok(UniformValue::Vec4([*x, *y, *z, *w])),
            _ => Err(format!(
                "vectors need 2 to 4 components, got {}",
                parts.len()
            )),
        };
    }
    raw.parse::<f32>()
        .map(UniformValue::Float)
        .map_err(|_| format!("cannot parse uniform value '{raw}'"))
}

fn parse_color(hex: &str) -> Result<[f32; 4], String> {
    if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
        return Err(format!("colours are #rrggbb or #rrggbbaa, got '#{hex}'"));
    }
    let mut rgba = [1.0f32; 4];
    for (index, channel) in rgba.iter_mut().enumerate().take(hex.len() / 2) {
        let pair = &hex[index * 2..index * 2 + 2];
        let byte = u8::from_str_radix(pair, 16)
            .map_err(|_| format!("invalid hex digits '{pair}' in colour"))?;
        *channel = f32::from(byte) / 255.0;
    }
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uniform_shapes() {
        assert_eq!(parse_uniform_value("1.5").unwrap(), UniformValue::Float(1.5));
        assert_eq!(
            parse_uniform_value("0.5, 1").unwrap(),
            UniformValue::Vec2([0.5, 1.0])
        );
        assert_eq!(
            parse_uniform_value("1,2,3").unwrap(),
            UniformValue::Vec3([1.0, 2.0, 3.0])
        );
        assert_eq!(
            parse_uniform_value("1,2,3,4").unwrap(),
            UniformValue::Vec4([1.0, 2.0, 3.0, 4.0])
        );
        assert_eq!(parse_uniform_value("true").unwrap(), UniformValue::Bool(true));
        assert!(parse_uniform_value("1,2,3,4,5").is_err());
        assert!(parse_uniform_value("fast").is_err());
    }

    #[test]
    fn parses_hex_colours() {
        assert_eq!(
            parse_uniform_value("#ff0000").unwrap(),
            UniformValue::Color([1.0, 0.0, 0.0, 1.0])
        );
        let UniformValue::Color(rgba) = parse_uniform_value("#00ff0080").unwrap() else {
            panic!("expected colour");
        };
        assert!((rgba[3] - 128.0 / 255.0).abs() < 1e-6);
        assert!(parse_uniform_value("#fff").is_err());
        assert!(parse_uniform_value("#gg0000").is_err());
    }

    #[test]
    fn parses_assignments() {
        let (name, value) = parse_uniform_assignment("speed = 2").unwrap();
        assert_eq!(name, "speed");
        assert_eq!(value, UniformValue::Float(2.0));
        assert!(parse_uniform_assignment("=2").is_err());
        assert!(parse_uniform_assignment("speed").is_err());
        assert_eq!(
            parse_texture_assignment("noise=textures/noise.png").unwrap(),
            ("noise".to_string(), "textures/noise.png".to_string())
        );
        assert!(parse_texture_assignment("noise=").is_err());
    }

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_dimensions("200x100").unwrap(), (200, 100));
        assert_eq!(parse_dimensions("64X64").unwrap(), (64, 64));
        assert!(parse_dimensions("0x10").is_err());
        assert!(parse_dimensions("200").is_err());
    }

    #[test]
    fn naga_is_always_selectable() {
        assert_eq!(parse_shader_compiler("NAGA").unwrap(), ShaderCompiler::Naga);
        assert!(parse_shader_compiler("").is_err());
        assert!(parse_shader_compiler("fxc").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

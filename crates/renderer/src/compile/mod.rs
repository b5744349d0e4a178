//! Program building up to, but not including, the GPU.
//!
//! [`ProgramBuilder::check`] wraps both stages, runs the chosen compiler and
//! checks the stage interface. It needs no device, so the editor, the CLI and
//! the tests can all report compile errors without an adapter.

pub mod messages;
pub mod wrap;

use std::borrow::Cow;
use std::fmt;

use diagnostics::{CompileDiagnostic, Locale, EMPTY_SHADER_MESSAGE};
use serde::Serialize;
use tracing::debug;
use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::naga::ShaderStage;

use crate::types::{ShaderCompiler, ShaderSource};

pub use wrap::{
    Attribute, GlslType, ProgramInterface, UniformField, Varying, WrappedProgram, WrappedStage,
    DEFAULT_VERTEX_SHADER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        }
    }

    pub(crate) fn naga(self) -> ShaderStage {
        match self {
            Stage::Vertex => ShaderStage::Vertex,
            Stage::Fragment => ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a program could not be built. The running program is never touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildFailure {
    #[error("{}", EMPTY_SHADER_MESSAGE)]
    EmptyFragment,
    #[error("{} shader failed to compile: {}", stage_list(.stages), .messages.join("; "))]
    Compile {
        stages: Vec<Stage>,
        messages: Vec<String>,
    },
    #[error("program failed to link: {}", .messages.join("; "))]
    Link { messages: Vec<String> },
}

fn stage_list(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|stage| stage.as_str())
        .collect::<Vec<_>>()
        .join(" and ")
}

impl BuildFailure {
    /// Compiler messages in glslang form, one per error.
    pub fn messages(&self) -> Vec<String> {
        match self {
            BuildFailure::EmptyFragment => vec![EMPTY_SHADER_MESSAGE.to_string()],
            BuildFailure::Compile { messages, .. } | BuildFailure::Link { messages } => {
                messages.clone()
            }
        }
    }

    /// The messages joined into a compiler log.
    pub fn log(&self) -> String {
        self.messages().join("\n")
    }

    pub fn diagnostics(&self, locale: Locale) -> Vec<CompileDiagnostic> {
        match self {
            BuildFailure::EmptyFragment => vec![diagnostics::translate(EMPTY_SHADER_MESSAGE, locale)],
            _ => diagnostics::translate_log(&self.log(), locale),
        }
    }

    /// The diagnostic the editor should lead with.
    pub fn headline(&self, locale: Locale) -> Option<CompileDiagnostic> {
        let all = self.diagnostics(locale);
        diagnostics::primary(&all).cloned()
    }
}

/// Output of a stage compiler, ready for `wgpu::ShaderModuleDescriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledStage {
    Glsl(String),
    SpirV(Vec<u32>),
}

impl CompiledStage {
    pub(crate) fn module_source(&self, stage: Stage) -> wgpu::ShaderSource<'_> {
        match self {
            CompiledStage::Glsl(source) => wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source.as_str()),
                stage: stage.naga(),
                defines: &[],
            },
            CompiledStage::SpirV(words) => wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
        }
    }
}

/// A program that compiled and linked on the CPU side.
#[derive(Debug, Clone)]
pub struct CheckedProgram {
    pub wrapped: WrappedProgram,
    pub vertex: CompiledStage,
    pub fragment: CompiledStage,
}

impl CheckedProgram {
    pub fn interface(&self) -> &ProgramInterface {
        &self.wrapped.interface
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramBuilder {
    compiler: ShaderCompiler,
}

impl ProgramBuilder {
    pub fn new(compiler: ShaderCompiler) -> Self {
        Self { compiler }
    }

    pub fn compiler(&self) -> ShaderCompiler {
        self.compiler
    }

    /// Compiles and links `source` without touching the GPU.
    pub fn check(&self, source: &ShaderSource) -> Result<CheckedProgram, BuildFailure> {
        if source.is_fragment_empty() {
            debug!("fragment source is empty; skipping compile");
            return Err(BuildFailure::EmptyFragment);
        }

        let vertex_source = source.vertex.as_deref().unwrap_or(DEFAULT_VERTEX_SHADER);
        let wrapped = wrap::wrap_program(vertex_source, &source.fragment)?;

        let mut failed = Vec::new();
        let mut messages = Vec::new();
        let mut compiled = Vec::with_capacity(2);
        for stage in [Stage::Vertex, Stage::Fragment] {
            match self.compile_stage(wrapped.stage(stage)) {
                Ok(output) => compiled.push(output),
                Err(stage_messages) => {
                    failed.push(stage);
                    messages.extend(stage_messages);
                }
            }
        }
        if !failed.is_empty() {
            debug!(stages = %stage_list(&failed), errors = messages.len(), "compile failed");
            return Err(BuildFailure::Compile {
                stages: failed,
                messages,
            });
        }

        let mut link_errors = wrapped.conflicts.clone();
        link_errors.extend(wrapped.interface.link_errors());
        if !link_errors.is_empty() {
            debug!(errors = link_errors.len(), "link failed");
            return Err(BuildFailure::Link {
                messages: link_errors,
            });
        }

        let fragment = compiled.pop();
        let vertex = compiled.pop();
        match (vertex, fragment) {
            (Some(vertex), Some(fragment)) => Ok(CheckedProgram {
                wrapped,
                vertex,
                fragment,
            }),
            _ => Err(BuildFailure::Link {
                messages: vec!["link error: a stage produced no output".to_string()],
            }),
        }
    }

    fn compile_stage(&self, wrapped: &WrappedStage) -> Result<CompiledStage, Vec<String>> {
        match self.compiler {
            ShaderCompiler::Naga => compile_with_naga(wrapped),
            #[cfg(feature = "shaderc")]
            ShaderCompiler::Shaderc => compile_with_shaderc(wrapped),
            #[cfg(not(feature = "shaderc"))]
            ShaderCompiler::Shaderc => compile_with_naga(wrapped),
        }
    }
}

fn compile_with_naga(wrapped: &WrappedStage) -> Result<CompiledStage, Vec<String>> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(wrapped.stage.naga()), &wrapped.source)
        .map_err(|errors| messages::parse_messages(&errors, wrapped))?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|error| vec![messages::validation_message(&error, wrapped)])?;

    Ok(CompiledStage::Glsl(wrapped.source.clone()))
}

#[cfg(feature = "shaderc")]
fn compile_with_shaderc(wrapped: &WrappedStage) -> Result<CompiledStage, Vec<String>> {
    let unavailable =
        |err: shaderc::Error| vec![messages::located(None, &format!("shaderc unavailable: {err}"))];
    let compiler = shaderc::Compiler::new().map_err(unavailable)?;
    let mut options = shaderc::CompileOptions::new().map_err(unavailable)?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );

    let (kind, file_name) = match wrapped.stage {
        Stage::Vertex => (shaderc::ShaderKind::Vertex, "user.vert"),
        Stage::Fragment => (shaderc::ShaderKind::Fragment, "user.frag"),
    };
    let artifact = compiler
        .compile_into_spirv(&wrapped.source, kind, file_name, "main", Some(&options))
        .map_err(|err| messages::remap_shaderc_log(&err.to_string(), wrapped))?;
    Ok(CompiledStage::SpirV(artifact.as_binary().to_vec()))
}

#[cfg(test)]
mod tests {
    use diagnostics::ErrorKind;

    use super::*;

    const GRADIENT: &str = "precision mediump float;
varying vec2 vUv;
uniform float u_time;

void main() {
    gl_FragColor = vec4(vUv, 0.5 + 0.5 * sin(u_time), 1.0);
}
";

    fn check(fragment: &str) -> Result<CheckedProgram, BuildFailure> {
        ProgramBuilder::default().check(&ShaderSource::fragment(fragment))
    }

    #[test]
    fn gradient_compiles() {
        let program = check(GRADIENT).expect("gradient should compile");
        assert!(matches!(program.fragment, CompiledStage::Glsl(_)));
        assert_eq!(program.interface().varyings.len(), 1);
    }

    #[test]
    fn user_uniforms_and_gl_frag_coord_compile() {
        let program = check(
            "uniform vec2 u_resolution;
uniform vec3 tint;
uniform bool inverted;
void main() {
    vec2 st = gl_FragCoord.xy / u_resolution;
    vec3 color = tint * st.x;
    if (inverted) { color = 1.0 - color; }
    gl_FragColor = vec4(color, 1.0);
}
",
        )
        .expect("compile");
        assert!(program.interface().uniform("tint").is_some());
    }

    #[test]
    fn empty_fragment_is_reported_before_compiling() {
        let err = check("  \n\t").unwrap_err();
        assert_eq!(err, BuildFailure::EmptyFragment);
        let headline = err.headline(Locale::En).expect("headline");
        assert_eq!(headline.kind, ErrorKind::EmptyShader);
    }

    #[test]
    fn missing_semicolon_is_a_syntax_error() {
        let err = check(
            "void main() {
    vec3 color = vec3(1.0)
    gl_FragColor = vec4(color, 1.0);
}
",
        )
        .unwrap_err();
        match &err {
            BuildFailure::Compile { stages, .. } => assert_eq!(stages, &vec![Stage::Fragment]),
            other => panic!("unexpected failure {other:?}"),
        }
        let headline = err.headline(Locale::En).unwrap();
        assert_eq!(headline.kind, ErrorKind::SyntaxError);
        assert!(matches!(headline.source_line, Some(2) | Some(3)));
    }

    #[test]
    fn undeclared_identifier_points_at_user_line() {
        let err = check(
            "void main() {
    vec3 color = vec3(1.0);
    gl_FragColor = vec4(colr, 1.0);
}
",
        )
        .unwrap_err();
        let headline = err.headline(Locale::En).unwrap();
        assert_eq!(headline.kind, ErrorKind::UndeclaredIdentifier);
        assert_eq!(headline.source_line, Some(3));
        assert!(headline.raw_message.contains("'colr'"));
    }

    #[test]
    fn missing_main_is_reported() {
        let err = check("vec3 shade() { return vec3(1.0); }\n").unwrap_err();
        let headline = err.headline(Locale::En).unwrap();
        assert_eq!(headline.kind, ErrorKind::MissingMain);
    }

    fn headline_kind(fragment: &str) -> (ErrorKind, Option<u32>) {
        let err = check(fragment).unwrap_err();
        let headline = err.headline(Locale::En).expect("headline");
        (headline.kind, headline.source_line)
    }

    #[test]
    fn second_main_is_a_duplicate_main() {
        let (kind, line) = headline_kind(
            "void main() { gl_FragColor = vec4(1.0); }
void main() { gl_FragColor = vec4(0.0); }
",
        );
        assert_eq!(kind, ErrorKind::DuplicateMain);
        assert_eq!(line, Some(2));
    }

    #[test]
    fn mismatched_initializer_is_a_type_mismatch() {
        let (kind, _) = headline_kind(
            "void main() {
    float x = vec2(1.0);
    gl_FragColor = vec4(x);
}
",
        );
        assert_eq!(kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn short_constructor_is_an_argument_count_error() {
        let (kind, _) = headline_kind(
            "void main() {
    gl_FragColor = vec4(1.0, 2.0);
}
",
        );
        assert_eq!(kind, ErrorKind::ArgumentCount);
    }

    #[test]
    fn constant_float_division_by_zero_is_reported() {
        let (kind, _) = headline_kind(
            "void main() {
    float x = 1.0 / 0.0;
    gl_FragColor = vec4(x);
}
",
        );
        assert_eq!(kind, ErrorKind::DivisionByZero);
    }

    #[test]
    fn unwritten_varying_fails_to_link() {
        let err = check(
            "varying vec3 vNormal;
void main() { gl_FragColor = vec4(vNormal, 1.0); }
",
        )
        .unwrap_err();
        assert!(matches!(err, BuildFailure::Link { .. }));
        assert_eq!(err.headline(Locale::En).unwrap().kind, ErrorKind::LinkError);
    }

    #[test]
    fn custom_vertex_stage_is_used() {
        let source = ShaderSource::fragment(
            "varying vec3 vColor;\nvoid main() { gl_FragColor = vec4(vColor, 1.0); }\n",
        )
        .with_vertex(
            "attribute vec2 position;
varying vec3 vColor;
void main() {
    vColor = vec3(position * 0.5 + 0.5, 0.0);
    gl_Position = vec4(position, 0.0, 1.0);
}
",
        );
        let program = ProgramBuilder::default().check(&source).expect("compile");
        assert_eq!(program.interface().vertex_outputs[0].location, 1);
    }

    #[test]
    fn vertex_errors_name_the_vertex_stage() {
        let source = ShaderSource::fragment(GRADIENT)
            .with_vertex("attribute vec2 position;\nvarying vec2 vUv;\nvoid main() { gl_Position = vec4(positon, 0.0, 1.0); }\n");
        match ProgramBuilder::default().check(&source).unwrap_err() {
            BuildFailure::Compile { stages, messages } => {
                assert_eq!(stages, vec![Stage::Vertex]);
                assert!(messages[0].contains("positon"));
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn failure_display_lists_stages() {
        let failure = BuildFailure::Compile {
            stages: vec![Stage::Vertex, Stage::Fragment],
            messages: vec!["ERROR: 0:1: a".into(), "ERROR: 0:2: b".into()],
        };
        assert_eq!(
            failure.to_string(),
            "vertex and fragment shader failed to compile: ERROR: 0:1: a; ERROR: 0:2: b"
        );
        assert_eq!(failure.log(), "ERROR: 0:1: a\nERROR: 0:2: b");
    }
}

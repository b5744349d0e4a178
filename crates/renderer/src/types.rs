use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use engineconfig::CompilerBackend;

/// Largest number of texture slots a single program can sample from.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Vertex and fragment source text for one program.
///
/// `vertex = None` selects the built-in full-viewport quad shader. The fragment
/// text is shared, so cloning a source on every edit stays cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: Option<Arc<str>>,
    pub fragment: Arc<str>,
}

impl ShaderSource {
    pub fn fragment(fragment: impl Into<Arc<str>>) -> Self {
        Self {
            vertex: None,
            fragment: fragment.into(),
        }
    }

    pub fn with_vertex(mut self, vertex: impl Into<Arc<str>>) -> Self {
        self.vertex = Some(vertex.into());
        self
    }

    /// True when the fragment stage has nothing but whitespace.
    pub fn is_fragment_empty(&self) -> bool {
        self.fragment.trim().is_empty()
    }
}

/// Stable identifier of a texture slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value supplied for a user uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Linear RGBA in `[0, 1]`; fits `vec3` (rgb) and `vec4` uniforms.
    Color([f32; 4]),
    Bool(bool),
    Sampler(TextureId),
}

impl UniformValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "float",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Vec4(_) => "vec4",
            UniformValue::Color(_) => "color",
            UniformValue::Bool(_) => "bool",
            UniformValue::Sampler(_) => "sampler",
        }
    }
}

/// Named uniform values for one frame.
pub type UniformSet = HashMap<String, UniformValue>;

/// An entry of the ordered texture list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub id: TextureId,
    /// Name of the `sampler2D` uniform this slot feeds.
    pub name: String,
    /// Filesystem path, `file://` or `http(s)://` URL. `None` keeps the placeholder.
    pub image_url: Option<String>,
}

impl TextureSlot {
    pub fn new(id: u32, name: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            id: TextureId(id),
            name: name.into(),
            image_url,
        }
    }
}

/// Shader compilation backend requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderCompiler {
    /// Parse and validate with naga's GLSL frontend.
    #[default]
    Naga,
    /// Compile wrapped GLSL to SPIR-V through shaderc.
    Shaderc,
}

impl ShaderCompiler {
    /// Resolves the configured backend, falling back to naga when shaderc was not built in.
    pub fn from_backend(backend: CompilerBackend) -> Self {
        match backend {
            CompilerBackend::Naga => ShaderCompiler::Naga,
            CompilerBackend::Shaderc if cfg!(feature = "shaderc") => ShaderCompiler::Shaderc,
            CompilerBackend::Shaderc => {
                tracing::warn!("shaderc backend requested but not compiled in; using naga");
                ShaderCompiler::Naga
            }
        }
    }
}

impl fmt::Display for ShaderCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderCompiler::Naga => f.write_str("naga"),
            ShaderCompiler::Shaderc => f.write_str("shaderc"),
        }
    }
}

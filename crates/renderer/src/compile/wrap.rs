//! Rewrites learner GLSL (WebGL flavour) into Vulkan-style GLSL 450.
//!
//! Every user line survives as exactly one output line, so a compiler line
//! number maps back to the editor by subtracting the prelude length. Loose
//! uniforms are hoisted into std140 blocks whose layout is computed here and
//! mirrored by the uniform packer, and `sampler2D` uniforms are split into the
//! texture + sampler pairs wgpu binds.

use super::{BuildFailure, Stage};
use crate::types::MAX_TEXTURE_UNITS;

/// Full-viewport quad shader used when the caller supplies no vertex stage.
pub const DEFAULT_VERTEX_SHADER: &str = "attribute vec2 position;
varying vec2 vUv;

void main() {
    vUv = position * 0.5 + 0.5;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

pub const TIME_UNIFORM: &str = "u_time";
pub const RESOLUTION_UNIFORM: &str = "u_resolution";
const UV_VARYING: &str = "vUv";

/// Declares the built-in block; must match `BuiltinUniforms` in `gpu/uniforms.rs`.
const BUILTIN_BLOCK: &str = "layout(std140, set = 0, binding = 0) uniform ShaderlabBuiltins {
    vec2 _u_resolution;
    float _u_time;
    float _shaderlab_pad0;
    vec2 _shaderlab_viewport;
    vec2 _shaderlab_pad1;
} shaderlab_builtins;
#define u_resolution shaderlab_builtins._u_resolution
#define u_time shaderlab_builtins._u_time
";

const FRAGMENT_PRELUDE: &str = "layout(location = 0) out vec4 shaderlab_FragColor;
#define gl_FragColor shaderlab_FragColor
vec4 shaderlab_FragCoord;
#define gl_FragCoord shaderlab_FragCoord
#define main shaderlab_user_main
";

// Flips the hardware coordinate to the bottom-left origin WebGL shaders expect.
const FRAGMENT_FOOTER: &str = "#undef main
#undef gl_FragCoord
void main() {
    shaderlab_FragCoord = vec4(gl_FragCoord.x, shaderlab_builtins._shaderlab_viewport.y - gl_FragCoord.y, gl_FragCoord.zw);
    shaderlab_user_main();
}
";

/// GLSL types the wrapper understands in declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlslType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
}

impl GlslType {
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "float" => GlslType::Float,
            "int" => GlslType::Int,
            "bool" => GlslType::Bool,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "ivec2" => GlslType::IVec2,
            "ivec3" => GlslType::IVec3,
            "ivec4" => GlslType::IVec4,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            "sampler2D" => GlslType::Sampler2D,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GlslType::Float => "float",
            GlslType::Int => "int",
            GlslType::Bool => "bool",
            GlslType::Vec2 => "vec2",
            GlslType::Vec3 => "vec3",
            GlslType::Vec4 => "vec4",
            GlslType::IVec2 => "ivec2",
            GlslType::IVec3 => "ivec3",
            GlslType::IVec4 => "ivec4",
            GlslType::Mat2 => "mat2",
            GlslType::Mat3 => "mat3",
            GlslType::Mat4 => "mat4",
            GlslType::Sampler2D => "sampler2D",
        }
    }

    /// std140 `(size, alignment)` in bytes; `None` for opaque types.
    ///
    /// `mat2` travels as a `vec4` because std140 pads its columns.
    pub fn std140(self) -> Option<(u32, u32)> {
        match self {
            GlslType::Float | GlslType::Int | GlslType::Bool => Some((4, 4)),
            GlslType::Vec2 | GlslType::IVec2 => Some((8, 8)),
            GlslType::Vec3 | GlslType::IVec3 => Some((12, 16)),
            GlslType::Vec4 | GlslType::IVec4 | GlslType::Mat2 => Some((16, 16)),
            GlslType::Mat3 => Some((48, 16)),
            GlslType::Mat4 => Some((64, 16)),
            GlslType::Sampler2D => None,
        }
    }

    fn block_member_type(self) -> &'static str {
        match self {
            GlslType::Bool => "int",
            GlslType::Mat2 => "vec4",
            other => other.as_str(),
        }
    }

    fn is_varying(self) -> bool {
        matches!(
            self,
            GlslType::Float | GlslType::Vec2 | GlslType::Vec3 | GlslType::Vec4
        )
    }

    fn is_attribute(self) -> bool {
        matches!(self, GlslType::Vec2 | GlslType::Vec3 | GlslType::Vec4)
    }
}

/// A user uniform hoisted into the `ShaderlabParams` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub ty: GlslType,
    pub offset: u32,
}

impl UniformField {
    fn access_expression(&self) -> String {
        match self.ty {
            GlslType::Bool => format!("(shaderlab_params._{} != 0)", self.name),
            GlslType::Mat2 => format!(
                "mat2(shaderlab_params._{0}.xy, shaderlab_params._{0}.zw)",
                self.name
            ),
            _ => format!("shaderlab_params._{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Varying {
    pub name: String,
    pub ty: GlslType,
    pub location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub ty: GlslType,
}

/// Resources and stage interface shared by both wrapped stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    pub uniforms: Vec<UniformField>,
    /// Size of the user block rounded up to 16 bytes; 0 without user uniforms.
    pub block_size: u32,
    /// `sampler2D` names in binding order.
    pub samplers: Vec<String>,
    /// Fragment inputs.
    pub varyings: Vec<Varying>,
    pub vertex_outputs: Vec<Varying>,
    pub attributes: Vec<Attribute>,
}

impl ProgramInterface {
    pub fn uniform(&self, name: &str) -> Option<&UniformField> {
        self.uniforms.iter().find(|field| field.name == name)
    }

    /// The quad position input, if the vertex stage declares one.
    pub fn position_attribute(&self) -> Option<&Attribute> {
        self.attributes.first()
    }

    /// Problems that only show up once both stages are put together.
    pub fn link_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for input in &self.varyings {
            match self.vertex_outputs.iter().find(|out| out.name == input.name) {
                None => errors.push(format!(
                    "link error: varying '{}' is read by the fragment shader but not written by the vertex shader",
                    input.name
                )),
                Some(output) if output.ty != input.ty => errors.push(format!(
                    "link error: varying '{}' is {} in the vertex shader but {} in the fragment shader",
                    input.name,
                    output.ty.as_str(),
                    input.ty.as_str()
                )),
                Some(_) => {}
            }
        }
        if self.attributes.len() > 1 {
            errors.push(format!(
                "link error: only one vertex attribute (the quad position) is supported, found {}",
                self.attributes.len()
            ));
        }
        if self.samplers.len() > MAX_TEXTURE_UNITS {
            errors.push(format!(
                "link error: {} samplers declared but only {MAX_TEXTURE_UNITS} texture units are available",
                self.samplers.len()
            ));
        }
        errors
    }
}

/// One stage after wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedStage {
    pub stage: Stage,
    pub source: String,
    pub prelude_lines: u32,
    pub user_lines: u32,
}

impl WrappedStage {
    /// Maps a 1-based line of the wrapped text back to the user's source.
    pub fn user_line(&self, wrapped_line: u32) -> Option<u32> {
        let line = wrapped_line.checked_sub(self.prelude_lines)?;
        (line >= 1 && line <= self.user_lines).then_some(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedProgram {
    pub vertex: WrappedStage,
    pub fragment: WrappedStage,
    pub interface: ProgramInterface,
    /// Declaration conflicts between the stages, reported at link time.
    pub conflicts: Vec<String>,
}

impl WrappedProgram {
    pub fn stage(&self, stage: Stage) -> &WrappedStage {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }
}

/// Wraps both stages. Declaration problems fail the owning stage.
pub fn wrap_program(vertex_source: &str, fragment_source: &str) -> Result<WrappedProgram, BuildFailure> {
    let vertex = ScannedStage::scan(Stage::Vertex, vertex_source);
    let fragment = ScannedStage::scan(Stage::Fragment, fragment_source);

    let mut failed = Vec::new();
    let mut messages = Vec::new();
    for scanned in [&vertex, &fragment] {
        if !scanned.errors.is_empty() {
            failed.push(scanned.stage);
            messages.extend(scanned.errors.iter().cloned());
        }
    }
    if !failed.is_empty() {
        return Err(BuildFailure::Compile {
            stages: failed,
            messages,
        });
    }

    let (interface, conflicts) = build_interface(&vertex, &fragment);
    Ok(WrappedProgram {
        vertex: vertex.emit(&interface),
        fragment: fragment.emit(&interface),
        interface,
        conflicts,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Uniform,
    Varying,
    Attribute,
}

#[derive(Debug)]
struct Declaration {
    qualifier: Qualifier,
    ty: String,
    names: Vec<String>,
}

#[derive(Debug)]
enum Hoisted {
    Varying(String, GlslType),
    Attribute(String, GlslType),
}

#[derive(Debug)]
enum ScannedLine {
    Keep(String),
    Blank,
    Declared(Vec<Hoisted>),
}

#[derive(Debug)]
struct ScannedStage {
    stage: Stage,
    lines: Vec<ScannedLine>,
    /// Per line: starts inside a block comment, ends inside one.
    comment_edges: Vec<(bool, bool)>,
    uniforms: Vec<(String, GlslType)>,
    samplers: Vec<String>,
    varyings: Vec<(String, GlslType)>,
    attributes: Vec<(String, GlslType)>,
    uses_uv: bool,
    errors: Vec<String>,
}

impl ScannedStage {
    fn scan(stage: Stage, source: &str) -> Self {
        let mut scanned = Self {
            stage,
            lines: Vec::new(),
            comment_edges: Vec::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            varyings: Vec::new(),
            attributes: Vec::new(),
            uses_uv: false,
            errors: Vec::new(),
        };

        let raw: Vec<&str> = source.lines().collect();
        let mut in_comment = false;
        let mut code = Vec::with_capacity(raw.len());
        for line in &raw {
            let starts_inside = in_comment;
            code.push(strip_comments(line, &mut in_comment));
            scanned.comment_edges.push((starts_inside, in_comment));
        }
        let mut main_line = None;

        let mut index = 0;
        while index < raw.len() {
            let line_number = index as u32 + 1;
            let trimmed = code[index].trim();
            scanned.uses_uv |= contains_identifier(&code[index], UV_VARYING);

            if defines_main(trimmed) {
                match main_line {
                    None => main_line = Some(line_number),
                    Some(first) => scanned.error(
                        line_number,
                        format!("'main' : function already has a body (first defined on line {first})"),
                    ),
                }
            }

            if trimmed.starts_with("#version")
                || trimmed.starts_with("#extension")
                || (trimmed.starts_with("precision ") && trimmed.ends_with(';'))
            {
                scanned.lines.push(ScannedLine::Blank);
                index += 1;
                continue;
            }

            let (statement, consumed) = declaration_statement(&code[index..]);
            match declarations_on_line(&statement) {
                Some(declarations) => {
                    let mut hoisted = Vec::new();
                    for declaration in declarations {
                        scanned.declare(declaration, line_number, &mut hoisted);
                    }
                    scanned.lines.push(if hoisted.is_empty() {
                        ScannedLine::Blank
                    } else {
                        ScannedLine::Declared(hoisted)
                    });
                    for _ in 1..consumed {
                        scanned.lines.push(ScannedLine::Blank);
                    }
                    index += consumed;
                }
                None => {
                    scanned.lines.push(ScannedLine::Keep(raw[index].to_string()));
                    index += 1;
                }
            }
        }
        scanned
    }

    fn error(&mut self, line: u32, message: String) {
        self.errors.push(format!("ERROR: 0:{line}: {message}"));
    }

    fn declare(&mut self, declaration: Declaration, line: u32, hoisted: &mut Vec<Hoisted>) {
        let parsed = GlslType::parse(&declaration.ty);
        for name in declaration.names {
            if !is_identifier(&name) {
                let what = match declaration.qualifier {
                    Qualifier::Uniform => "unsupported uniform declaration",
                    Qualifier::Varying => "unsupported varying declaration",
                    Qualifier::Attribute => "unsupported attribute declaration",
                };
                self.error(
                    line,
                    format!("'{name}' : {what} (arrays and initializers are not supported)"),
                );
                continue;
            }

            match declaration.qualifier {
                Qualifier::Uniform => self.declare_uniform(name, &declaration.ty, parsed, line),
                Qualifier::Varying => match parsed {
                    Some(ty) if ty.is_varying() => {
                        if self.varyings.iter().any(|(existing, _)| *existing == name) {
                            self.error(line, format!("'{name}' : redefinition"));
                            continue;
                        }
                        self.varyings.push((name.clone(), ty));
                        hoisted.push(Hoisted::Varying(name, ty));
                    }
                    _ => self.error(
                        line,
                        format!("'{}' : unsupported varying type for '{name}'", declaration.ty),
                    ),
                },
                Qualifier::Attribute => {
                    if self.stage == Stage::Fragment {
                        self.error(
                            line,
                            format!("'attribute' : not supported in the fragment shader ('{name}')"),
                        );
                        continue;
                    }
                    match parsed {
                        Some(ty) if ty.is_attribute() => {
                            self.attributes.push((name.clone(), ty));
                            hoisted.push(Hoisted::Attribute(name, ty));
                        }
                        _ => self.error(
                            line,
                            format!(
                                "'{}' : unsupported attribute type for '{name}'",
                                declaration.ty
                            ),
                        ),
                    }
                }
            }
        }
    }

    fn declare_uniform(&mut self, name: String, ty_token: &str, ty: Option<GlslType>, line: u32) {
        let builtin = match name.as_str() {
            TIME_UNIFORM => Some(GlslType::Float),
            RESOLUTION_UNIFORM => Some(GlslType::Vec2),
            _ => None,
        };
        if let Some(expected) = builtin {
            if ty != Some(expected) {
                self.error(
                    line,
                    format!(
                        "'{name}' : unsupported uniform type '{ty_token}' for a built-in, expected {}",
                        expected.as_str()
                    ),
                );
            }
            return;
        }

        let already_declared = self.uniforms.iter().any(|(existing, _)| *existing == name)
            || self.samplers.iter().any(|existing| *existing == name);
        if already_declared {
            self.error(line, format!("'{name}' : redefinition"));
            return;
        }

        match ty {
            Some(GlslType::Sampler2D) => self.samplers.push(name),
            Some(ty) => self.uniforms.push((name, ty)),
            None => self.error(
                line,
                format!("'{ty_token}' : unsupported uniform type for '{name}'"),
            ),
        }
    }

    fn emit(&self, interface: &ProgramInterface) -> WrappedStage {
        let prelude = prelude(self.stage, interface);
        let prelude_lines = prelude.matches('\n').count() as u32;
        let mut source = prelude;

        for (line, &(closes, opens)) in self.lines.iter().zip(&self.comment_edges) {
            if let ScannedLine::Keep(text) = line {
                source.push_str(text);
                source.push('\n');
                continue;
            }
            // A replaced line must still end or start the comment it was part of.
            if closes {
                source.push_str("*/ ");
            }
            if let ScannedLine::Declared(hoisted) = line {
                let declarations: Vec<String> = hoisted
                    .iter()
                    .filter_map(|item| self.hoisted_declaration(item, interface))
                    .collect();
                source.push_str(&declarations.join(" "));
            }
            if opens {
                source.push_str(" /*");
            }
            source.push('\n');
        }

        if self.stage == Stage::Fragment {
            source.push_str(FRAGMENT_FOOTER);
        }

        WrappedStage {
            stage: self.stage,
            source,
            prelude_lines,
            user_lines: self.lines.len() as u32,
        }
    }

    fn hoisted_declaration(&self, item: &Hoisted, interface: &ProgramInterface) -> Option<String> {
        match (self.stage, item) {
            // The prelude already declares the shared coordinate input.
            (Stage::Fragment, Hoisted::Varying(name, _)) if name == UV_VARYING => None,
            (Stage::Fragment, Hoisted::Varying(name, ty)) => {
                let location = location_of(&interface.varyings, name)?;
                Some(format!(
                    "layout(location = {location}) in {} {name};",
                    ty.as_str()
                ))
            }
            (Stage::Vertex, Hoisted::Varying(name, ty)) => {
                let location = location_of(&interface.vertex_outputs, name)?;
                Some(format!(
                    "layout(location = {location}) out {} {name};",
                    ty.as_str()
                ))
            }
            (_, Hoisted::Attribute(name, ty)) => {
                let location = interface
                    .attributes
                    .iter()
                    .position(|attribute| attribute.name == *name)?;
                Some(format!(
                    "layout(location = {location}) in {} {name};",
                    ty.as_str()
                ))
            }
        }
    }
}

fn location_of(varyings: &[Varying], name: &str) -> Option<u32> {
    varyings
        .iter()
        .find(|varying| varying.name == name)
        .map(|varying| varying.location)
}

fn build_interface(vertex: &ScannedStage, fragment: &ScannedStage) -> (ProgramInterface, Vec<String>) {
    let mut conflicts = Vec::new();

    let mut merged: Vec<(String, GlslType)> = Vec::new();
    for (name, ty) in fragment.uniforms.iter().chain(vertex.uniforms.iter()) {
        match merged.iter().find(|(existing, _)| existing == name) {
            Some((_, existing)) if existing != ty => conflicts.push(format!(
                "link error: uniform '{name}' is {} in one stage and {} in the other",
                existing.as_str(),
                ty.as_str()
            )),
            Some(_) => {}
            None => merged.push((name.clone(), *ty)),
        }
    }
    let (uniforms, block_size) = std140_layout(&merged);

    let mut samplers: Vec<String> = Vec::new();
    for name in fragment.samplers.iter().chain(vertex.samplers.iter()) {
        if merged.iter().any(|(uniform, _)| uniform == name) {
            conflicts.push(format!(
                "link error: '{name}' is a sampler in one stage and a value uniform in the other"
            ));
        } else if !samplers.contains(name) {
            samplers.push(name.clone());
        }
    }

    let mut varyings = Vec::new();
    let declared_uv = fragment
        .varyings
        .iter()
        .find(|(name, _)| name == UV_VARYING)
        .map(|(_, ty)| *ty);
    if let Some(ty) = declared_uv.or(fragment.uses_uv.then_some(GlslType::Vec2)) {
        varyings.push(Varying {
            name: UV_VARYING.to_string(),
            ty,
            location: 0,
        });
    }
    let mut next_location = 1;
    for (name, ty) in &fragment.varyings {
        if name == UV_VARYING {
            continue;
        }
        varyings.push(Varying {
            name: name.clone(),
            ty: *ty,
            location: next_location,
        });
        next_location += 1;
    }

    let mut vertex_outputs = Vec::new();
    for (name, ty) in &vertex.varyings {
        let location = if name == UV_VARYING {
            0
        } else if let Some(location) = location_of(&varyings, name) {
            location
        } else {
            let location = next_location;
            next_location += 1;
            location
        };
        vertex_outputs.push(Varying {
            name: name.clone(),
            ty: *ty,
            location,
        });
    }

    let attributes = vertex
        .attributes
        .iter()
        .map(|(name, ty)| Attribute {
            name: name.clone(),
            ty: *ty,
        })
        .collect();

    (
        ProgramInterface {
            uniforms,
            block_size,
            samplers,
            varyings,
            vertex_outputs,
            attributes,
        },
        conflicts,
    )
}

/// Assigns std140 offsets in declaration order.
pub(crate) fn std140_layout(fields: &[(String, GlslType)]) -> (Vec<UniformField>, u32) {
    let mut offset = 0u32;
    let mut laid_out = Vec::with_capacity(fields.len());
    for (name, ty) in fields {
        let Some((size, align)) = ty.std140() else {
            continue;
        };
        offset = align_to(offset, align);
        laid_out.push(UniformField {
            name: name.clone(),
            ty: *ty,
            offset,
        });
        offset += size;
    }
    let size = if laid_out.is_empty() {
        0
    } else {
        align_to(offset, 16)
    };
    (laid_out, size)
}

fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn prelude(stage: Stage, interface: &ProgramInterface) -> String {
    let mut out = String::from("#version 450\n");
    out.push_str(BUILTIN_BLOCK);

    if !interface.uniforms.is_empty() {
        out.push_str("layout(std140, set = 0, binding = 1) uniform ShaderlabParams {\n");
        for field in &interface.uniforms {
            out.push_str(&format!(
                "    {} _{};\n",
                field.ty.block_member_type(),
                field.name
            ));
        }
        out.push_str("} shaderlab_params;\n");
        for field in &interface.uniforms {
            out.push_str(&format!(
                "#define {} {}\n",
                field.name,
                field.access_expression()
            ));
        }
    }

    for (index, name) in interface.samplers.iter().enumerate() {
        let binding = index * 2;
        out.push_str(&format!(
            "layout(set = 1, binding = {binding}) uniform texture2D shaderlab_texture{index};\n"
        ));
        out.push_str(&format!(
            "layout(set = 1, binding = {}) uniform sampler shaderlab_sampler{index};\n",
            binding + 1
        ));
        out.push_str(&format!(
            "#define {name} sampler2D(shaderlab_texture{index}, shaderlab_sampler{index})\n"
        ));
    }
    // Must follow the texture declarations above, which use the real type name.
    out.push_str("#define texture2D texture\n");

    if stage == Stage::Fragment {
        if let Some(uv) = interface.varyings.iter().find(|v| v.name == UV_VARYING) {
            out.push_str(&format!(
                "layout(location = 0) in {} {UV_VARYING};\n",
                uv.ty.as_str()
            ));
        }
        out.push_str(FRAGMENT_PRELUDE);
    }
    out
}

fn declarations_on_line(trimmed: &str) -> Option<Vec<Declaration>> {
    if !trimmed.ends_with(';') {
        return None;
    }
    trimmed
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(parse_declaration)
        .collect()
}

fn parse_declaration(statement: &str) -> Option<Declaration> {
    let mut words = statement.split_whitespace();
    let qualifier = match words.next()? {
        "uniform" => Qualifier::Uniform,
        "varying" => Qualifier::Varying,
        "attribute" => Qualifier::Attribute,
        _ => return None,
    };
    let mut words = words.filter(|word| !matches!(*word, "lowp" | "mediump" | "highp"));
    let ty = words.next()?.to_string();
    let rest: Vec<&str> = words.collect();
    let names: Vec<String> = rest
        .join(" ")
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return None;
    }
    Some(Declaration {
        qualifier,
        ty,
        names,
    })
}

/// Blanks `//` and `/* */` comments; `in_comment` carries an open block across lines.
fn strip_comments(line: &str, in_comment: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        if *in_comment {
            match rest.find("*/") {
                Some(end) => {
                    out.push(' ');
                    rest = &rest[end + 2..];
                    *in_comment = false;
                }
                None => return out,
            }
        }
        let line_comment = rest.find("//");
        let block = rest.find("/*");
        match (line_comment, block) {
            (Some(at), Some(open)) if at < open => {
                out.push_str(&rest[..at]);
                return out;
            }
            (_, Some(open)) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + 2..];
                *in_comment = true;
            }
            (Some(at), None) => {
                out.push_str(&rest[..at]);
                return out;
            }
            (None, None) => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

/// Joins a `uniform`/`varying`/`attribute` statement that spans lines.
/// Returns the statement and how many lines it covers.
fn declaration_statement(lines: &[String]) -> (String, usize) {
    let first = lines[0].trim();
    let opens_declaration = matches!(
        first.split_whitespace().next(),
        Some("uniform" | "varying" | "attribute")
    );
    if !opens_declaration || first.ends_with(';') {
        return (first.to_string(), 1);
    }

    let mut statement = first.to_string();
    for (offset, line) in lines.iter().enumerate().skip(1) {
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.contains(['{', '}']) {
            break;
        }
        statement.push(' ');
        statement.push_str(trimmed);
        if trimmed.ends_with(';') {
            return (statement, offset + 1);
        }
    }
    (first.to_string(), 1)
}

/// A `void main(...)` header that is not a prototype.
fn defines_main(code: &str) -> bool {
    let Some(rest) = code.strip_prefix("void") else {
        return false;
    };
    let Some(rest) = rest.trim_start().strip_prefix("main") else {
        return false;
    };
    if rest.starts_with(is_identifier_char) || code[4..].starts_with(is_identifier_char) {
        return false;
    }
    let Some(params) = rest.trim_start().strip_prefix('(') else {
        return false;
    };
    match params.find(')') {
        Some(close) => !params[close + 1..].trim_start().starts_with(';'),
        None => true,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn contains_identifier(code: &str, identifier: &str) -> bool {
    code.match_indices(identifier).any(|(start, _)| {
        let before = code[..start].chars().next_back();
        let after = code[start + identifier.len()..].chars().next();
        !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRADIENT: &str = "precision mediump float;
varying vec2 vUv;
uniform float u_time;
uniform vec2 u_resolution;

void main() {
    gl_FragColor = vec4(vUv, 0.0, 1.0);
}
";

    fn wrap(fragment: &str) -> WrappedProgram {
        wrap_program(DEFAULT_VERTEX_SHADER, fragment).expect("wrap")
    }

    #[test]
    fn preserves_user_line_numbers() {
        let program = wrap(GRADIENT);
        let fragment = &program.fragment;
        assert_eq!(fragment.user_lines, 8);
        let lines: Vec<&str> = fragment.source.lines().collect();
        let user_main = fragment.prelude_lines as usize + 6;
        assert_eq!(lines[user_main - 1], "void main() {");
        assert_eq!(fragment.user_line(fragment.prelude_lines + 7), Some(7));
        assert_eq!(fragment.user_line(1), None);
        assert_eq!(fragment.user_line(fragment.prelude_lines + 9), None);
    }

    #[test]
    fn builtins_and_precision_are_blanked() {
        let program = wrap(GRADIENT);
        let source = &program.fragment.source;
        assert!(source.starts_with("#version 450\n"));
        assert!(!source.contains("precision mediump"));
        assert!(!source.contains("uniform float u_time"));
        assert!(source.contains("#define u_time shaderlab_builtins._u_time"));
        assert!(source.contains("layout(location = 0) in vec2 vUv;"));
        assert!(program.interface.uniforms.is_empty());
        assert_eq!(program.interface.block_size, 0);
    }

    #[test]
    fn user_uniforms_follow_std140() {
        let program = wrap(
            "uniform float speed;
uniform vec3 tint;
uniform float gain;
uniform vec2 offset;
uniform bool inverted;
uniform mat2 spin;
void main() { gl_FragColor = vec4(tint * speed * gain, 1.0); }
",
        );
        let offsets: Vec<(&str, u32)> = program
            .interface
            .uniforms
            .iter()
            .map(|field| (field.name.as_str(), field.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("speed", 0),
                ("tint", 16),
                ("gain", 28),
                ("offset", 32),
                ("inverted", 40),
                ("spin", 48),
            ]
        );
        assert_eq!(program.interface.block_size, 64);
        let source = &program.fragment.source;
        assert!(source.contains("    int _inverted;"));
        assert!(source.contains("#define inverted (shaderlab_params._inverted != 0)"));
        assert!(source.contains("    vec4 _spin;"));
    }

    #[test]
    fn samplers_become_texture_sampler_pairs() {
        let program = wrap(
            "uniform sampler2D u_image;
uniform sampler2D u_mask;
varying vec2 vUv;
void main() { gl_FragColor = texture2D(u_image, vUv) * texture2D(u_mask, vUv).a; }
",
        );
        assert_eq!(program.interface.samplers, vec!["u_image", "u_mask"]);
        let source = &program.fragment.source;
        assert!(source.contains("layout(set = 1, binding = 2) uniform texture2D shaderlab_texture1;"));
        assert!(source.contains("layout(set = 1, binding = 3) uniform sampler shaderlab_sampler1;"));
        let texture_decl = source.find("uniform texture2D shaderlab_texture0").unwrap();
        let alias = source.find("#define texture2D texture").unwrap();
        assert!(texture_decl < alias);
    }

    #[test]
    fn declarations_split_across_lines_are_hoisted() {
        let program = wrap(
            "uniform
    float speed;
uniform vec3
    tint,
    shade;
void main() { gl_FragColor = vec4(tint * shade * speed, 1.0); }
",
        );
        let names: Vec<&str> = program
            .interface
            .uniforms
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        assert_eq!(names, vec!["speed", "tint", "shade"]);
        let fragment = &program.fragment;
        assert_eq!(fragment.user_lines, 6);
        let lines: Vec<&str> = fragment.source.lines().collect();
        assert!(lines[fragment.prelude_lines as usize + 5].starts_with("void main()"));
    }

    #[test]
    fn commented_out_declarations_are_ignored() {
        let program = wrap(
            "/* uniform float speed;
uniform vec3 tint; */
uniform float gain; /* trailing
uniform float hidden; */
void main() { gl_FragColor = vec4(vec3(gain), 1.0); }
",
        );
        let names: Vec<&str> = program
            .interface
            .uniforms
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        assert_eq!(names, vec!["gain"]);
        let source = &program.fragment.source;
        assert!(source.contains("/* uniform float speed;"));
        // The hoisted line still opens the comment that the next line closes.
        assert!(source.contains(" /*\nuniform float hidden; */"));
    }

    #[test]
    fn second_main_is_rejected_with_its_line() {
        let err = wrap_program(
            DEFAULT_VERTEX_SHADER,
            "void main() { gl_FragColor = vec4(1.0); }
void main(void)
{
    gl_FragColor = vec4(0.0);
}
",
        )
        .unwrap_err();
        match err {
            BuildFailure::Compile { stages, messages } => {
                assert_eq!(stages, vec![Stage::Fragment]);
                assert_eq!(
                    messages,
                    vec!["ERROR: 0:2: 'main' : function already has a body (first defined on line 1)"]
                );
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn main_prototype_is_not_a_definition() {
        assert!(defines_main("void main() {"));
        assert!(defines_main("void main ( void )"));
        assert!(!defines_main("void main();"));
        assert!(!defines_main("void mainImage(out vec4 c) {"));
        assert!(!defines_main("voidmain() {"));
    }

    #[test]
    fn block_comments_are_stripped_across_lines() {
        let mut inside = false;
        assert_eq!(strip_comments("a /* b */ c // d", &mut inside), "a   c ");
        assert_eq!(strip_comments("x /* open", &mut inside), "x ");
        assert!(inside);
        assert_eq!(strip_comments("still */ y", &mut inside), "  y");
        assert!(!inside);
    }

    #[test]
    fn unsupported_uniform_fails_the_stage() {
        let err = wrap_program(
            DEFAULT_VERTEX_SHADER,
            "uniform samplerCube sky;\nvoid main() {}\n",
        )
        .unwrap_err();
        match err {
            BuildFailure::Compile { stages, messages } => {
                assert_eq!(stages, vec![Stage::Fragment]);
                assert_eq!(
                    messages,
                    vec!["ERROR: 0:1: 'samplerCube' : unsupported uniform type for 'sky'"]
                );
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn uniform_arrays_are_rejected() {
        let err = wrap_program(
            DEFAULT_VERTEX_SHADER,
            "void main() {}\nuniform float weights[4];\n",
        )
        .unwrap_err();
        assert!(err.messages()[0].starts_with("ERROR: 0:2: 'weights[4]'"));
    }

    #[test]
    fn vertex_outputs_reuse_fragment_locations() {
        let vertex = "attribute vec4 position;
varying vec3 vColor;
varying vec2 vUv;
void main() { vUv = position.xy; vColor = position.xyz; gl_Position = position; }
";
        let fragment = "varying vec2 vUv;
varying vec3 vColor;
void main() { gl_FragColor = vec4(vColor, vUv.x); }
";
        let program = wrap_program(vertex, fragment).unwrap();
        assert!(program.interface.link_errors().is_empty());
        assert!(program
            .vertex
            .source
            .contains("layout(location = 1) out vec3 vColor;"));
        assert!(program
            .vertex
            .source
            .contains("layout(location = 0) in vec4 position;"));
        assert!(program
            .fragment
            .source
            .contains("layout(location = 1) in vec3 vColor;"));
        assert_eq!(
            program.interface.position_attribute().map(|a| a.ty),
            Some(GlslType::Vec4)
        );
    }

    #[test]
    fn missing_vertex_output_is_a_link_error() {
        let program = wrap("varying vec3 vNormal;\nvoid main() { gl_FragColor = vec4(vNormal, 1.0); }\n");
        let errors = program.interface.link_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'vNormal'"));
    }

    #[test]
    fn conflicting_uniform_types_are_reported() {
        let program = wrap_program(
            "uniform float scale;\nattribute vec2 position;\nvoid main() { gl_Position = vec4(position * scale, 0.0, 1.0); }\n",
            "uniform vec2 scale;\nvoid main() { gl_FragColor = vec4(scale, 0.0, 1.0); }\n",
        )
        .unwrap();
        assert_eq!(program.conflicts.len(), 1);
        assert!(program.conflicts[0].starts_with("link error"));
    }

    #[test]
    fn uv_declared_when_only_referenced() {
        let program = wrap("void main() { gl_FragColor = vec4(vUv, 0.0, 1.0); }\n");
        assert_eq!(program.interface.varyings.len(), 1);
        let commented = wrap("// vUv is unused here\nvoid main() { gl_FragColor = vec4(1.0); }\n");
        assert!(commented.interface.varyings.is_empty());
    }

    #[test]
    fn identifier_search_respects_boundaries() {
        assert!(contains_identifier("x = vUv.x;", "vUv"));
        assert!(!contains_identifier("x = vUvScaled;", "vUv"));
        assert!(!contains_identifier("x = my_vUv;", "vUv"));
    }
}

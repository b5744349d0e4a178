use bytemuck::{Pod, Zeroable};
use tracing::trace;

use crate::compile::{GlslType, ProgramInterface};
use crate::types::{UniformSet, UniformValue};

/// Mirror of the `ShaderlabBuiltins` std140 block injected by the wrapper.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BuiltinUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    _pad0: f32,
    /// Height of the render target, used to flip `gl_FragCoord`.
    pub viewport: [f32; 2],
    _pad1: [f32; 2],
}

impl BuiltinUniforms {
    pub fn new(time: f32, width: u32, height: u32) -> Self {
        let size = [width as f32, height as f32];
        Self {
            resolution: size,
            time,
            viewport: size,
            ..Self::default()
        }
    }

    /// Reports `resolution` to the shader while rendering into a target of another size.
    pub fn with_resolution(mut self, resolution: [f32; 2]) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Packs `values` into the std140 block described by `interface`.
///
/// Uniforms without a value stay zeroed. A value whose shape does not fit the
/// declared type is skipped.
pub fn pack_user_uniforms(interface: &ProgramInterface, values: &UniformSet) -> Vec<u8> {
    let mut block = vec![0u8; interface.block_size as usize];
    for field in &interface.uniforms {
        let Some(value) = values.get(&field.name) else {
            continue;
        };
        let Some(bytes) = encode(field.ty, value) else {
            trace!(
                name = %field.name,
                declared = field.ty.as_str(),
                supplied = value.kind_name(),
                "uniform value does not fit declared type; skipped"
            );
            continue;
        };
        let start = field.offset as usize;
        if let Some(slot) = block.get_mut(start..start + bytes.len()) {
            slot.copy_from_slice(&bytes);
        }
    }
    block
}

fn floats(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn ints(values: &[f32]) -> Vec<u8> {
    let cast: Vec<i32> = values.iter().map(|value| *value as i32).collect();
    bytemuck::cast_slice(&cast).to_vec()
}

fn encode(ty: GlslType, value: &UniformValue) -> Option<Vec<u8>> {
    use UniformValue as V;
    Some(match (ty, value) {
        (GlslType::Float, V::Float(v)) => floats(&[*v]),
        (GlslType::Int, V::Float(v)) => ints(&[*v]),
        (GlslType::Bool, V::Bool(v)) => bytemuck::bytes_of(&i32::from(*v)).to_vec(),
        (GlslType::Vec2, V::Vec2(v)) => floats(v),
        (GlslType::Vec3, V::Vec3(v)) => floats(v),
        (GlslType::Vec3, V::Color(c)) => floats(&c[..3]),
        (GlslType::Vec4, V::Vec4(v) | V::Color(v)) => floats(v),
        (GlslType::IVec2, V::Vec2(v)) => ints(v),
        (GlslType::IVec3, V::Vec3(v)) => ints(v),
        (GlslType::IVec4, V::Vec4(v)) => ints(v),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::wrap::std140_layout;

    fn interface(fields: &[(&str, GlslType)]) -> ProgramInterface {
        let owned: Vec<(String, GlslType)> = fields
            .iter()
            .map(|(name, ty)| (name.to_string(), *ty))
            .collect();
        let (uniforms, block_size) = std140_layout(&owned);
        ProgramInterface {
            uniforms,
            block_size,
            ..ProgramInterface::default()
        }
    }

    fn f32_at(block: &[u8], offset: usize) -> f32 {
        bytemuck::pod_read_unaligned(&block[offset..offset + 4])
    }

    fn i32_at(block: &[u8], offset: usize) -> i32 {
        bytemuck::pod_read_unaligned(&block[offset..offset + 4])
    }

    #[test]
    fn builtin_block_is_32_bytes() {
        assert_eq!(std::mem::size_of::<BuiltinUniforms>(), 32);
        let builtins = BuiltinUniforms::new(1.5, 640, 480);
        let bytes = bytemuck::bytes_of(&builtins);
        assert_eq!(f32_at(bytes, 0), 640.0);
        assert_eq!(f32_at(bytes, 8), 1.5);
        assert_eq!(f32_at(bytes, 20), 480.0);

        let reported = builtins.with_resolution([200.0, 100.0]);
        assert_eq!(reported.resolution, [200.0, 100.0]);
        assert_eq!(reported.viewport, [640.0, 480.0]);
    }

    #[test]
    fn values_land_at_std140_offsets() {
        let layout = interface(&[
            ("speed", GlslType::Float),
            ("tint", GlslType::Vec3),
            ("gain", GlslType::Float),
            ("enabled", GlslType::Bool),
        ]);
        let mut values = UniformSet::new();
        values.insert("speed".into(), UniformValue::Float(2.0));
        values.insert("tint".into(), UniformValue::Color([0.25, 0.5, 0.75, 1.0]));
        values.insert("gain".into(), UniformValue::Float(3.0));
        values.insert("enabled".into(), UniformValue::Bool(true));

        let block = pack_user_uniforms(&layout, &values);
        assert_eq!(block.len(), 48);
        assert_eq!(f32_at(&block, 0), 2.0);
        assert_eq!(f32_at(&block, 16), 0.25);
        assert_eq!(f32_at(&block, 24), 0.75);
        assert_eq!(f32_at(&block, 28), 3.0);
        assert_eq!(i32_at(&block, 32), 1);
    }

    #[test]
    fn mismatched_and_missing_values_stay_zero() {
        let layout = interface(&[("offset", GlslType::Vec2), ("count", GlslType::Int)]);
        let mut values = UniformSet::new();
        values.insert("offset".into(), UniformValue::Float(9.0));
        values.insert("unused".into(), UniformValue::Float(1.0));

        let block = pack_user_uniforms(&layout, &values);
        assert!(block.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn integer_uniforms_truncate_floats() {
        let layout = interface(&[("steps", GlslType::Int), ("cells", GlslType::IVec2)]);
        let mut values = UniformSet::new();
        values.insert("steps".into(), UniformValue::Float(7.9));
        values.insert("cells".into(), UniformValue::Vec2([4.0, 3.2]));

        let block = pack_user_uniforms(&layout, &values);
        assert_eq!(i32_at(&block, 0), 7);
        assert_eq!(i32_at(&block, 8), 4);
        assert_eq!(i32_at(&block, 12), 3);
    }
}

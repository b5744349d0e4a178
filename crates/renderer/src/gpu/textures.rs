use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::imageops::{flip_vertical_in_place, FilterType};
use image::RgbaImage;
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::types::{TextureId, TextureSlot, UniformSet, UniformValue, MAX_TEXTURE_UNITS};

use super::context::GpuContext;
use super::pipeline::CompiledProgram;
use super::uniforms::{pack_user_uniforms, BuiltinUniforms};

const PLACEHOLDER_PIXEL: [u8; 4] = [128, 128, 128, 255];

/// GPU image bound to one `sampler2D`.
pub(crate) struct TextureResource {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl TextureResource {
    fn destroy(&self) {
        self.texture.destroy();
    }
}

fn create_placeholder(gpu: &GpuContext) -> TextureResource {
    let texture = gpu.device.create_texture_with_data(
        &gpu.queue,
        &wgpu::TextureDescriptor {
            label: Some("placeholder texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &PLACEHOLDER_PIXEL,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = gpu.device.create_sampler(&clamped_sampler("placeholder sampler"));
    TextureResource {
        texture,
        view,
        sampler,
    }
}

fn clamped_sampler(label: &str) -> wgpu::SamplerDescriptor<'_> {
    wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    }
}

/// Uploads a decoded image. Power-of-two images get mipmaps and repeat wrapping.
pub(crate) fn upload_image(gpu: &GpuContext, id: TextureId, image: &RgbaImage) -> TextureResource {
    let levels = mip_chain(image);
    let mut data = Vec::with_capacity(levels.iter().map(|level| level.as_raw().len()).sum());
    for level in &levels {
        data.extend_from_slice(level.as_raw());
    }

    let label = format!("texture {id}");
    let texture = gpu.device.create_texture_with_data(
        &gpu.queue,
        &wgpu::TextureDescriptor {
            label: Some(&label),
            size: wgpu::Extent3d {
                width: image.width(),
                height: image.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &data,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let sampler = if levels.len() > 1 {
        gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&label),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        })
    } else {
        gpu.device.create_sampler(&clamped_sampler(&label))
    };

    TextureResource {
        texture,
        view,
        sampler,
    }
}

/// Full mip chain for power-of-two images, otherwise just the base level.
pub fn mip_chain(image: &RgbaImage) -> Vec<RgbaImage> {
    let (width, height) = image.dimensions();
    let mut levels = vec![image.clone()];
    if !(width.is_power_of_two() && height.is_power_of_two()) {
        return levels;
    }
    let (mut w, mut h) = (width, height);
    while w > 1 || h > 1 {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        levels.push(image::imageops::resize(image, w, h, FilterType::Triangle));
    }
    levels
}

/// Decodes an image from a path, `file://` URL or `http(s)://` URL.
///
/// Rows are flipped so texture coordinates put the origin bottom-left.
pub fn load_image(url: &str) -> Result<RgbaImage> {
    let decoded = if url.starts_with("http://") || url.starts_with("https://") {
        let http = reqwest::blocking::Client::builder().build()?;
        let bytes = http
            .get(url)
            .send()
            .with_context(|| format!("requesting image {url}"))?
            .error_for_status()
            .context("image request failed")?
            .bytes()?;
        image::load_from_memory(&bytes).with_context(|| format!("failed to decode image from {url}"))?
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        image::open(path).with_context(|| format!("failed to open image at {path}"))?
    };
    let mut rgba = decoded.to_rgba8();
    flip_vertical_in_place(&mut rgba);
    Ok(rgba)
}

struct Decoded {
    id: TextureId,
    request: u64,
    result: std::result::Result<RgbaImage, String>,
}

struct SlotState {
    slot: TextureSlot,
    resource: Option<TextureResource>,
    request: u64,
    loading: bool,
}

struct CachedGroup {
    program: u64,
    revision: u64,
    resolved: Vec<Option<TextureId>>,
    group: wgpu::BindGroup,
}

/// Owns texture slots and assembles per-frame bind groups.
///
/// Images decode on worker threads; until one arrives its sampler reads the
/// grey placeholder. Results for slots that were replaced or removed in the
/// meantime are dropped.
pub struct Binder {
    gpu: GpuContext,
    placeholder: TextureResource,
    slots: Vec<SlotState>,
    next_request: u64,
    decoded_tx: Sender<Decoded>,
    decoded_rx: Receiver<Decoded>,
    revision: u64,
    cached: Option<CachedGroup>,
}

impl Binder {
    pub fn new(gpu: &GpuContext) -> Self {
        let (decoded_tx, decoded_rx) = unbounded();
        Self {
            gpu: gpu.clone(),
            placeholder: create_placeholder(gpu),
            slots: Vec::new(),
            next_request: 0,
            decoded_tx,
            decoded_rx,
            revision: 0,
            cached: None,
        }
    }

    /// Replaces the ordered slot list. Unchanged slots keep their textures.
    pub fn set_textures(&mut self, slots: &[TextureSlot]) {
        let accepted = if slots.len() > MAX_TEXTURE_UNITS {
            tracing::warn!(
                requested = slots.len(),
                limit = MAX_TEXTURE_UNITS,
                "too many texture slots; extra slots ignored"
            );
            &slots[..MAX_TEXTURE_UNITS]
        } else {
            slots
        };

        let mut previous = std::mem::take(&mut self.slots);
        for slot in accepted {
            let kept = previous
                .iter()
                .position(|state| state.slot.id == slot.id && state.slot.image_url == slot.image_url)
                .map(|index| previous.swap_remove(index));
            match kept {
                Some(mut state) => {
                    state.slot.name = slot.name.clone();
                    self.slots.push(state);
                }
                None => {
                    let state = self.start_slot(slot.clone());
                    self.slots.push(state);
                }
            }
        }

        for removed in previous {
            if let Some(resource) = removed.resource {
                tracing::debug!(id = %removed.slot.id, "releasing texture");
                resource.destroy();
            }
        }
        self.revision = self.revision.wrapping_add(1);
    }

    fn start_slot(&mut self, slot: TextureSlot) -> SlotState {
        self.next_request = self.next_request.wrapping_add(1);
        let request = self.next_request;
        let mut loading = false;
        if let Some(url) = slot.image_url.clone() {
            let id = slot.id;
            let tx = self.decoded_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("texture-{}", id.0))
                .spawn(move || {
                    let result = load_image(&url).map_err(|err| format!("{err:#}"));
                    let _ = tx.send(Decoded {
                        id,
                        request,
                        result,
                    });
                });
            match spawned {
                Ok(_) => loading = true,
                Err(err) => tracing::warn!(id = %slot.id, error = %err, "failed to spawn texture loader"),
            }
        }
        SlotState {
            slot,
            resource: None,
            request,
            loading,
        }
    }

    /// Uploads every image decoded since the last call. Returns how many landed.
    pub fn poll_decoded(&mut self) -> usize {
        let mut uploaded = 0;
        while let Ok(decoded) = self.decoded_rx.try_recv() {
            if self.accept(decoded) {
                uploaded += 1;
            }
        }
        uploaded
    }

    /// Blocks until no slot is still decoding, or `timeout` passes.
    #[cfg(test)]
    pub(crate) fn wait_for_pending(&mut self, timeout: std::time::Duration) -> bool {
        use crossbeam_channel::RecvTimeoutError;
        use std::time::Instant;

        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.decoded_rx.recv_timeout(remaining) {
                Ok(decoded) => {
                    self.accept(decoded);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.pending() == 0
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|state| state.loading).count()
    }

    fn accept(&mut self, decoded: Decoded) -> bool {
        let Some(state) = self
            .slots
            .iter_mut()
            .find(|state| state.slot.id == decoded.id && state.request == decoded.request)
        else {
            tracing::trace!(id = %decoded.id, "dropping image for a replaced slot");
            return false;
        };
        state.loading = false;
        match decoded.result {
            Ok(image) => {
                tracing::debug!(
                    id = %decoded.id,
                    width = image.width(),
                    height = image.height(),
                    "texture decoded"
                );
                let resource = upload_image(&self.gpu, decoded.id, &image);
                if let Some(old) = state.resource.replace(resource) {
                    old.destroy();
                }
                self.revision = self.revision.wrapping_add(1);
                true
            }
            Err(error) => {
                tracing::warn!(
                    id = %decoded.id,
                    url = state.slot.image_url.as_deref().unwrap_or_default(),
                    %error,
                    "failed to load texture; keeping placeholder"
                );
                false
            }
        }
    }

    fn resolve(&self, sampler_name: &str, values: &UniformSet) -> Option<TextureId> {
        let id = match values.get(sampler_name) {
            Some(UniformValue::Sampler(id)) => Some(*id),
            _ => self
                .slots
                .iter()
                .find(|state| state.slot.name == sampler_name)
                .map(|state| state.slot.id),
        }?;
        self.slots
            .iter()
            .find(|state| state.slot.id == id && state.resource.is_some())
            .map(|state| state.slot.id)
    }

    fn resource(&self, id: Option<TextureId>) -> &TextureResource {
        id.and_then(|id| {
            self.slots
                .iter()
                .find(|state| state.slot.id == id)
                .and_then(|state| state.resource.as_ref())
        })
        .unwrap_or(&self.placeholder)
    }

    /// Writes this frame's uniforms and returns the bind groups for sets 0 and 1.
    pub(crate) fn prepare(
        &mut self,
        program: &CompiledProgram,
        values: &UniformSet,
        builtins: &BuiltinUniforms,
    ) -> (wgpu::BindGroup, wgpu::BindGroup) {
        let queue = &self.gpu.queue;
        queue.write_buffer(program.builtin_buffer(), 0, bytemuck::bytes_of(builtins));
        let params = pack_user_uniforms(program.interface(), values);
        if !params.is_empty() {
            queue.write_buffer(program.params_buffer(), 0, &params);
        }

        let resolved: Vec<Option<TextureId>> = program
            .interface()
            .samplers
            .iter()
            .map(|name| self.resolve(name, values))
            .collect();

        let reusable = self.cached.as_ref().filter(|cached| {
            cached.program == program.id()
                && cached.revision == self.revision
                && cached.resolved == resolved
        });
        if let Some(cached) = reusable {
            return (program.uniform_bind_group().clone(), cached.group.clone());
        }

        let resources: Vec<&TextureResource> =
            resolved.iter().map(|id| self.resource(*id)).collect();
        let mut entries = Vec::with_capacity(resources.len() * 2);
        for (index, resource) in resources.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2,
                resource: wgpu::BindingResource::TextureView(&resource.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&resource.sampler),
            });
        }
        let group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture bind group"),
            layout: program.texture_layout(),
            entries: &entries,
        });

        self.cached = Some(CachedGroup {
            program: program.id(),
            revision: self.revision,
            resolved,
            group: group.clone(),
        });
        (program.uniform_bind_group().clone(), group)
    }

    /// Releases every texture, including the placeholder.
    pub fn release(&mut self) {
        for state in self.slots.drain(..) {
            if let Some(resource) = state.resource {
                resource.destroy();
            }
        }
        self.cached = None;
        self.placeholder.destroy();
    }
}

//! Visual equivalence grading.
//!
//! Both programs render one frame offscreen with the same uniform snapshot,
//! then a regular grid of pixels is compared by RGB distance. Any failure on
//! the way collapses to a non-matching verdict.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use engineconfig::GradingConfig;
use image::RgbaImage;
use serde::Serialize;
use tracing::debug;

use crate::compile::{BuildFailure, ProgramBuilder};
use crate::gpu::offscreen::OffscreenTarget;
use crate::gpu::{Binder, BuiltinUniforms, GpuContext, PipelineLayouts, CAPTURE_FORMAT};
use crate::types::{ShaderSource, UniformSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeVerdict {
    pub is_match: bool,
    /// Share of sampled pixels within the pixel threshold, in `[0, 1]`.
    pub similarity: f32,
    pub sampled_pixel_count: u32,
}

impl GradeVerdict {
    pub fn no_match() -> Self {
        Self {
            is_match: false,
            similarity: 0.0,
            sampled_pixel_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradePolicy {
    pub width: u32,
    pub height: u32,
    pub sample_stride: u32,
    pub pixel_threshold: f32,
    pub acceptance: f32,
    pub settle: Duration,
}

impl Default for GradePolicy {
    fn default() -> Self {
        Self::from(&GradingConfig::default())
    }
}

impl From<&GradingConfig> for GradePolicy {
    fn from(config: &GradingConfig) -> Self {
        Self {
            width: config.canonical_width,
            height: config.canonical_height,
            sample_stride: config.sample_stride,
            pixel_threshold: config.pixel_threshold,
            acceptance: config.acceptance,
            settle: config.settle,
        }
    }
}

/// Uniform values shared by both renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformSnapshot {
    pub time: f32,
    /// `u_resolution`; defaults to the canonical render size.
    pub resolution: Option<[f32; 2]>,
    pub values: UniformSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelComparison {
    pub sampled: u32,
    pub differing: u32,
    /// Every sampled pixel matched exactly.
    pub exact: bool,
}

impl PixelComparison {
    pub fn similarity(&self) -> f32 {
        if self.sampled == 0 {
            return 0.0;
        }
        1.0 - self.differing as f32 / self.sampled as f32
    }

    pub fn verdict(&self, acceptance: f32) -> GradeVerdict {
        let similarity = self.similarity();
        GradeVerdict {
            is_match: self.sampled > 0 && (self.exact || similarity > acceptance),
            similarity,
            sampled_pixel_count: self.sampled,
        }
    }
}

/// Compares every `stride`-th pixel on both axes. `None` when sizes differ.
pub fn compare_pixels(
    a: &RgbaImage,
    b: &RgbaImage,
    stride: u32,
    threshold: f32,
) -> Option<PixelComparison> {
    if a.dimensions() != b.dimensions() || stride == 0 {
        return None;
    }
    let (width, height) = a.dimensions();
    let mut comparison = PixelComparison {
        sampled: 0,
        differing: 0,
        exact: true,
    };
    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            let pa = a.get_pixel(x, y).0;
            let pb = b.get_pixel(x, y).0;
            let distance = pa[..3]
                .iter()
                .zip(&pb[..3])
                .map(|(ca, cb)| {
                    let delta = f32::from(*ca) - f32::from(*cb);
                    delta * delta
                })
                .sum::<f32>()
                .sqrt();
            comparison.sampled += 1;
            if distance > 0.0 {
                comparison.exact = false;
            }
            if distance > threshold {
                comparison.differing += 1;
            }
        }
    }
    Some(comparison)
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Build(#[from] BuildFailure),
    #[error("GPU error: {0}")]
    Gpu(String),
}

/// Renders sources offscreen on a headless device.
pub struct Grader {
    gpu: GpuContext,
    builder: ProgramBuilder,
    layouts: PipelineLayouts,
    policy: GradePolicy,
}

impl Grader {
    pub fn new(gpu: GpuContext, builder: ProgramBuilder, policy: GradePolicy) -> Self {
        let layouts = PipelineLayouts::new(&gpu);
        Self {
            gpu,
            builder,
            layouts,
            policy,
        }
    }

    pub fn headless(builder: ProgramBuilder, policy: GradePolicy) -> Result<Self> {
        Ok(Self::new(GpuContext::headless()?, builder, policy))
    }

    pub fn policy(&self) -> &GradePolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: GradePolicy) {
        self.policy = policy;
    }

    /// Grades `user` against `reference`.
    pub fn grade(
        &self,
        user: &ShaderSource,
        reference: &ShaderSource,
        snapshot: &UniformSnapshot,
    ) -> GradeVerdict {
        let size = (self.policy.width, self.policy.height);
        let images = match self.render_many(&[user, reference], snapshot, size) {
            Ok(images) => images,
            Err(err) => {
                debug!(error = %err, "grading render failed; no match");
                return GradeVerdict::no_match();
            }
        };
        let [user_image, reference_image] = images.as_slice() else {
            return GradeVerdict::no_match();
        };
        let Some(comparison) = compare_pixels(
            user_image,
            reference_image,
            self.policy.sample_stride,
            self.policy.pixel_threshold,
        ) else {
            return GradeVerdict::no_match();
        };
        let verdict = comparison.verdict(self.policy.acceptance);
        debug!(
            is_match = verdict.is_match,
            similarity = verdict.similarity,
            sampled = verdict.sampled_pixel_count,
            differing = comparison.differing,
            "graded submission"
        );
        verdict
    }

    /// Renders one frame of `source` into an image of the given size.
    pub fn render(
        &self,
        source: &ShaderSource,
        snapshot: &UniformSnapshot,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, RenderError> {
        let mut images = self.render_many(&[source], snapshot, (width, height))?;
        images
            .pop()
            .ok_or_else(|| RenderError::Gpu("render produced no image".into()))
    }

    fn render_many(
        &self,
        sources: &[&ShaderSource],
        snapshot: &UniformSnapshot,
        (width, height): (u32, u32),
    ) -> Result<Vec<RgbaImage>, RenderError> {
        let programs = sources
            .iter()
            .map(|source| {
                self.builder
                    .build(&self.gpu, &self.layouts, source, &[CAPTURE_FORMAT])
            })
            .collect::<Result<Vec<_>, _>>()?;

        let targets = programs
            .iter()
            .enumerate()
            .map(|(index, _)| {
                OffscreenTarget::new(&self.gpu, width, height, &format!("grading target {index}"))
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|err| RenderError::Gpu(format!("{err:#}")))?;

        let mut builtins = BuiltinUniforms::new(snapshot.time, width, height);
        if let Some(resolution) = snapshot.resolution {
            builtins = builtins.with_resolution(resolution);
        }

        // Samplers read the placeholder so grading never waits on image decoding.
        let mut binder = Binder::new(&self.gpu);
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grading frame"),
            });
        for (program, target) in programs.iter().zip(&targets) {
            let groups = binder.prepare(program, &snapshot.values, &builtins);
            program.encode(&mut encoder, &target.view, CAPTURE_FORMAT, &self.layouts, &groups);
        }
        self.gpu.queue.submit(Some(encoder.finish()));

        if !self.policy.settle.is_zero() {
            thread::sleep(self.policy.settle);
        }

        let images = targets
            .iter()
            .map(|target| target.read(&self.gpu))
            .collect::<Result<Vec<_>>>()
            .map_err(|err| RenderError::Gpu(format!("{err:#}")));

        for target in &targets {
            target.texture.destroy();
        }
        binder.release();
        images
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn identical_images_are_exact() {
        let a = solid(16, 16, [10, 200, 30, 255]);
        let comparison = compare_pixels(&a, &a.clone(), 4, 10.0).unwrap();
        assert_eq!(comparison.sampled, 16);
        assert!(comparison.exact);
        let verdict = comparison.verdict(0.9);
        assert!(verdict.is_match);
        assert_eq!(verdict.similarity, 1.0);
    }

    #[test]
    fn red_versus_blue_does_not_match() {
        let red = solid(256, 256, [255, 0, 0, 255]);
        let blue = solid(256, 256, [0, 0, 255, 255]);
        let verdict = compare_pixels(&red, &blue, 4, 10.0).unwrap().verdict(0.9);
        assert!(!verdict.is_match);
        assert_eq!(verdict.similarity, 0.0);
        assert_eq!(verdict.sampled_pixel_count, 64 * 64);
    }

    #[test]
    fn small_differences_stay_within_threshold() {
        let a = solid(8, 8, [100, 100, 100, 255]);
        let b = solid(8, 8, [105, 103, 100, 255]);
        let comparison = compare_pixels(&a, &b, 1, 10.0).unwrap();
        assert_eq!(comparison.differing, 0);
        assert!(!comparison.exact);
        assert!(comparison.verdict(0.9).is_match);
        assert!(!comparison.verdict(1.5).is_match);
    }

    #[test]
    fn acceptance_above_one_needs_exact_equality() {
        let a = solid(8, 8, [1, 2, 3, 255]);
        assert!(compare_pixels(&a, &a, 2, 10.0).unwrap().verdict(1.5).is_match);
    }

    #[test]
    fn negative_acceptance_matches_anything() {
        let red = solid(8, 8, [255, 0, 0, 255]);
        let blue = solid(8, 8, [0, 0, 255, 255]);
        assert!(compare_pixels(&red, &blue, 1, 10.0).unwrap().verdict(-0.01).is_match);
    }

    #[test]
    fn alpha_is_ignored() {
        let opaque = solid(4, 4, [50, 60, 70, 255]);
        let clear = solid(4, 4, [50, 60, 70, 0]);
        assert!(compare_pixels(&opaque, &clear, 1, 0.0).unwrap().exact);
    }

    #[test]
    fn partial_difference_scales_similarity() {
        let a = solid(4, 4, [0, 0, 0, 255]);
        let mut b = a.clone();
        for x in 0..4 {
            b.put_pixel(x, 0, Rgba([255, 255, 255, 255]));
        }
        let comparison = compare_pixels(&a, &b, 1, 10.0).unwrap();
        assert_eq!(comparison.differing, 4);
        assert!((comparison.similarity() - 0.75).abs() < 1e-6);
        assert!(!comparison.verdict(0.9).is_match);
        assert!(comparison.verdict(0.5).is_match);
    }

    #[test]
    fn mismatched_sizes_do_not_compare() {
        let a = solid(4, 4, [0, 0, 0, 255]);
        let b = solid(4, 8, [0, 0, 0, 255]);
        assert!(compare_pixels(&a, &b, 1, 10.0).is_none());
        assert!(compare_pixels(&a, &a, 0, 10.0).is_none());
    }

    #[test]
    fn verdict_serializes_for_the_cli() {
        let verdict = GradeVerdict::no_match();
        let json = serde_json::to_value(verdict).unwrap();
        assert_eq!(json["is_match"], false);
        assert_eq!(json["sampled_pixel_count"], 0);
    }

    #[test]
    fn policy_follows_config() {
        let config = GradingConfig {
            acceptance: 0.5,
            sample_stride: 2,
            ..GradingConfig::default()
        };
        let policy = GradePolicy::from(&config);
        assert_eq!(policy.acceptance, 0.5);
        assert_eq!(policy.sample_stride, 2);
        assert_eq!(GradePolicy::default().width, 256);
    }
}

//! Configuration parameters for shadow rendering.

use bitflags::bitflags;

/// The shadow-comparison technique used when sampling the atlas. The choice
/// is passed through to the host engine's shaders; no filtering is computed
/// in this crate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShadowAlgorithm {
    /// Plain depth comparison without filtering.
    None,
    /// Percentage-closer filtering.
    Pcf,
    /// Exponential shadow maps.
    Esm,
    /// Variance shadow maps.
    Vsm,
    /// Exponential variance shadow maps.
    Evsm,
}

/// The storage precision of the atlas texture. The `Linear` variants request
/// linear filtering on float formats, overriding the algorithm-driven filter
/// choice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TexturePrecision {
    UnsignedByte,
    HalfFloat,
    HalfFloatLinear,
    Float,
    FloatLinear,
}

bitflags! {
    /// Scene-graph traversal mask selecting which nodes participate in a
    /// shadow-casting traversal. Bit meanings are defined by the host engine.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TraversalMask: u32 {
        const ALL = u32::MAX;
    }
}

impl Default for TraversalMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Parameters controlling one light's shadow rendering, and (through the
/// `*_all` setters on the manager) the atlas-wide texture configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShadowSettings {
    pub algorithm: ShadowAlgorithm,
    pub precision: TexturePrecision,
    /// Depth offset applied when comparing against the shadow map.
    pub bias: f32,
    /// First exponent parameter (ESM/EVSM).
    pub exponent0: f32,
    /// Second exponent parameter (EVSM).
    pub exponent1: f32,
    /// Lower bound on the variance estimate (VSM).
    pub epsilon_vsm: f32,
    /// Number of taps per axis in the PCF kernel.
    pub kernel_size_pcf: u32,
    /// Approximate PCF with bilinear texture filtering instead of a
    /// multi-sample kernel.
    pub fake_pcf: bool,
    /// Rotate the PCF sample offsets per fragment.
    pub rotate_offset: bool,
    /// Width and height of the shared atlas texture in pixels.
    pub atlas_size: u32,
    /// Width and height of each light's tile in pixels.
    pub texture_size: u32,
    /// Traversal mask for computing shadow-caster bounds.
    pub casts_shadow_bounds_traversal_mask: TraversalMask,
    /// Traversal mask for the shadow-caster draw pass.
    pub casts_shadow_draw_traversal_mask: TraversalMask,
    /// Render debug visualization for the shadow camera.
    pub debug: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            algorithm: ShadowAlgorithm::Pcf,
            precision: TexturePrecision::UnsignedByte,
            bias: 0.005,
            exponent0: 80.0,
            exponent1: 0.33,
            epsilon_vsm: 8.0e-4,
            kernel_size_pcf: 4,
            fake_pcf: true,
            rotate_offset: false,
            atlas_size: 1024,
            texture_size: 256,
            casts_shadow_bounds_traversal_mask: TraversalMask::ALL,
            casts_shadow_draw_traversal_mask: TraversalMask::ALL,
            debug: false,
        }
    }
}

impl TexturePrecision {
    /// Returns the texture format the atlas should be allocated with for this
    /// precision.
    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match self {
            Self::UnsignedByte => wgpu::TextureFormat::Rgba8Unorm,
            Self::HalfFloat | Self::HalfFloatLinear => wgpu::TextureFormat::Rgba16Float,
            Self::Float | Self::FloatLinear => wgpu::TextureFormat::Rgba32Float,
        }
    }
}

/// Derives the minification and magnification filter modes for the atlas
/// texture from the shadow algorithm, the fake-PCF flag and the texture
/// precision.
///
/// Algorithms storing moments or exponents (ESM/VSM/EVSM) always want linear
/// filtering, while plain depth comparison (PCF/NONE) wants nearest unless
/// fake PCF exploits bilinear filtering. Float precisions then override the
/// algorithm-driven choice: plain float formats cannot assume filterability
/// and force nearest, while the explicit `Linear` variants force linear.
pub fn derive_texture_filtering(
    algorithm: ShadowAlgorithm,
    fake_pcf: bool,
    precision: TexturePrecision,
) -> (wgpu::FilterMode, wgpu::FilterMode) {
    let algorithm_driven = match algorithm {
        ShadowAlgorithm::Esm | ShadowAlgorithm::Vsm | ShadowAlgorithm::Evsm => {
            wgpu::FilterMode::Linear
        }
        ShadowAlgorithm::Pcf | ShadowAlgorithm::None => {
            if fake_pcf {
                wgpu::FilterMode::Linear
            } else {
                wgpu::FilterMode::Nearest
            }
        }
    };

    let filter = match precision {
        TexturePrecision::HalfFloat | TexturePrecision::Float => wgpu::FilterMode::Nearest,
        TexturePrecision::HalfFloatLinear | TexturePrecision::FloatLinear => {
            wgpu::FilterMode::Linear
        }
        TexturePrecision::UnsignedByte => algorithm_driven,
    };

    (filter, filter)
}

#[cfg(test)]
mod test {
    use super::*;
    use wgpu::FilterMode::{Linear, Nearest};

    #[test]
    fn moment_based_algorithms_filter_linearly_regardless_of_fake_pcf() {
        for algorithm in [
            ShadowAlgorithm::Esm,
            ShadowAlgorithm::Vsm,
            ShadowAlgorithm::Evsm,
        ] {
            for fake_pcf in [false, true] {
                assert_eq!(
                    derive_texture_filtering(algorithm, fake_pcf, TexturePrecision::UnsignedByte),
                    (Linear, Linear)
                );
            }
        }
    }

    #[test]
    fn depth_comparison_algorithms_filter_nearest_without_fake_pcf() {
        for algorithm in [ShadowAlgorithm::Pcf, ShadowAlgorithm::None] {
            assert_eq!(
                derive_texture_filtering(algorithm, false, TexturePrecision::UnsignedByte),
                (Nearest, Nearest)
            );
            assert_eq!(
                derive_texture_filtering(algorithm, true, TexturePrecision::UnsignedByte),
                (Linear, Linear)
            );
        }
    }

    #[test]
    fn plain_float_precisions_force_nearest_filtering() {
        for precision in [TexturePrecision::HalfFloat, TexturePrecision::Float] {
            assert_eq!(
                derive_texture_filtering(ShadowAlgorithm::Vsm, true, precision),
                (Nearest, Nearest)
            );
        }
    }

    #[test]
    fn linear_float_precisions_force_linear_filtering() {
        for precision in [
            TexturePrecision::HalfFloatLinear,
            TexturePrecision::FloatLinear,
        ] {
            assert_eq!(
                derive_texture_filtering(ShadowAlgorithm::Pcf, false, precision),
                (Linear, Linear)
            );
        }
    }

    #[test]
    fn precision_maps_to_texture_format() {
        assert_eq!(
            TexturePrecision::UnsignedByte.texture_format(),
            wgpu::TextureFormat::Rgba8Unorm
        );
        assert_eq!(
            TexturePrecision::HalfFloatLinear.texture_format(),
            wgpu::TextureFormat::Rgba16Float
        );
        assert_eq!(
            TexturePrecision::FloatLinear.texture_format(),
            wgpu::TextureFormat::Rgba32Float
        );
    }
}

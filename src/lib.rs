//! Tiled shadow-map atlasing for a real-time rendering engine.
//!
//! Packs the shadow maps of multiple lights into one shared texture atlas:
//! every registered light gets a stable slot with its own tile viewport,
//! shadow camera and filtering parameters, while the atlas manager keeps the
//! per-slot shader uniforms and the shared texture resource in sync with the
//! current tile layout.

#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]
#![warn(clippy::cast_lossless)]

pub mod layout;
pub mod manager;
pub mod scene;
pub mod settings;
pub mod texture;
pub mod uniform;
pub mod unit;

pub use layout::{TileLayout, ViewportRect};
pub use manager::{AtlasCommitState, ShadowAtlasManager, SlotHandle};
pub use scene::{
    AttachmentToken, LightId, ReceivingStateSet, RenderState, ShadowCasterCuller, ShadowedScene,
    UpdateContext,
};
pub use settings::{ShadowAlgorithm, ShadowSettings, TexturePrecision, TraversalMask};
pub use texture::ShadowAtlasTexture;
pub use uniform::{Uniform, UniformSet, UniformSetCache, UniformValue};
pub use unit::{PerLightShadowUnit, ShadowCamera};

//! Orchestration of the shadow atlas: light registration, layout commits and
//! per-frame traversal driving.

use crate::{
    layout::{TileLayout, ViewportRect},
    scene::{
        AttachmentToken, LightId, RenderState, ShadowCasterCuller, ShadowedScene, UpdateContext,
    },
    settings::{
        ShadowAlgorithm, ShadowSettings, TexturePrecision, TraversalMask,
        derive_texture_filtering,
    },
    texture::ShadowAtlasTexture,
    uniform::UniformSetCache,
    unit::PerLightShadowUnit,
};
use anyhow::Result;
use std::{cell::RefCell, rc::Rc};

/// Width and height in pixels of the atlas texture if not configured.
pub const DEFAULT_ATLAS_SIZE: u32 = 1024;

/// Width and height in pixels of each light's tile if not configured, and
/// the value the tile size is reset to when the atlas is resized.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Texture unit at which shadow textures start if not configured.
pub const DEFAULT_TEXTURE_UNIT_BASE: u32 = 4;

/// Handle to a registered light slot. The slot index is stable for the
/// lifetime of the manager; there is no unregistration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle(usize);

/// Pending-work state of the atlas between commits. Parameter changes move
/// the state here; [`ShadowAtlasManager::initialize`] is the explicit commit
/// point that resolves it back to [`AtlasCommitState::Clean`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AtlasCommitState {
    /// Committed: layout and texture resource match the configuration.
    Clean,
    /// Tile viewports must be recomputed; the texture resource is still
    /// valid.
    LayoutDirty,
    /// The texture resource itself must be reconfigured and reallocated
    /// (implies recomputing viewports).
    ResourceDirty,
}

/// Owner and orchestrator of the shadow atlas: the shared atlas texture, the
/// registered lights with their per-light shadow units, and the tile layout
/// mapping light slots to atlas sub-rectangles.
#[derive(Debug)]
pub struct ShadowAtlasManager {
    texture: ShadowAtlasTexture,
    texture_unit_base: u32,
    texture_unit: u32,
    layout: TileLayout,
    /// Atlas-wide settings driving the shared texture's filtering and
    /// format. The `*_all` setters keep these in sync with every unit.
    settings: ShadowSettings,
    lights: Vec<LightId>,
    units: Vec<PerLightShadowUnit>,
    viewports: Vec<ViewportRect>,
    commit_state: AtlasCommitState,
    scene: Option<Rc<RefCell<ShadowedScene>>>,
    attachment_token: Option<AttachmentToken>,
}

impl SlotHandle {
    /// The sentinel handle returned when registering a null light.
    pub const INVALID: Self = Self(usize::MAX);

    /// Returns the slot index the handle refers to.
    pub fn index(&self) -> usize {
        self.0
    }

    /// Whether the handle refers to an actual slot.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl ShadowAtlasManager {
    /// Creates a manager with the given atlas-wide settings and no
    /// registered lights. The first [`initialize`](Self::initialize) after a
    /// scene is set will allocate the texture.
    ///
    /// # Errors
    /// Returns an error if the settings' tile size does not evenly divide
    /// the atlas size.
    pub fn new(settings: ShadowSettings) -> Result<Self> {
        let layout = TileLayout::new(settings.atlas_size, settings.texture_size)?;
        Ok(Self {
            texture: ShadowAtlasTexture::new(),
            texture_unit_base: DEFAULT_TEXTURE_UNIT_BASE,
            texture_unit: DEFAULT_TEXTURE_UNIT_BASE,
            layout,
            settings,
            lights: Vec::new(),
            units: Vec::new(),
            viewports: Vec::new(),
            commit_state: AtlasCommitState::ResourceDirty,
            scene: None,
            attachment_token: None,
        })
    }

    /// Returns the current tile layout.
    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    /// Returns the current commit state.
    pub fn commit_state(&self) -> AtlasCommitState {
        self.commit_state
    }

    /// Returns the number of registered lights.
    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    /// Returns the shared atlas texture.
    pub fn texture(&self) -> &ShadowAtlasTexture {
        &self.texture
    }

    /// Returns the shared atlas texture for modification (for the host to
    /// acknowledge reallocation).
    pub fn texture_mut(&mut self) -> &mut ShadowAtlasTexture {
        &mut self.texture
    }

    /// Returns the texture unit the atlas is bound at.
    pub fn texture_unit(&self) -> u32 {
        self.texture_unit
    }

    /// Sets the texture unit at which shadow textures start. Takes effect at
    /// the next [`initialize`](Self::initialize).
    pub fn set_texture_unit_base(&mut self, texture_unit: u32) {
        self.texture_unit_base = texture_unit;
        self.texture_unit = texture_unit;
    }

    /// Returns the per-light shadow unit at the given slot.
    pub fn unit(&self, slot: SlotHandle) -> &PerLightShadowUnit {
        debug_assert!(slot.is_valid());
        &self.units[slot.index()]
    }

    /// Returns the per-light shadow unit at the given slot for modification.
    pub fn unit_mut(&mut self, slot: SlotHandle) -> &mut PerLightShadowUnit {
        debug_assert!(slot.is_valid());
        &mut self.units[slot.index()]
    }

    /// Returns the atlas rectangle currently assigned to the given slot.
    pub fn viewport(&self, slot: SlotHandle) -> ViewportRect {
        debug_assert!(slot.is_valid());
        self.viewports[slot.index()]
    }

    /// Registers a light for shadow casting and returns its slot handle.
    ///
    /// A null light yields [`SlotHandle::INVALID`]. Registering an already
    /// registered light is idempotent and returns the existing handle (the
    /// duplicate check scans the registration list). Otherwise a new
    /// per-light shadow unit is appended and its initial viewport computed
    /// from the slot index and the current layout. Lights are never
    /// unregistered.
    pub fn register_light(&mut self, light: LightId, settings: ShadowSettings) -> SlotHandle {
        if light.is_null() {
            return SlotHandle::INVALID;
        }

        if let Some(slot) = self.lights.iter().position(|&existing| existing == light) {
            return SlotHandle(slot);
        }

        let slot = self.lights.len();
        let capacity = self.layout.capacity() as usize;
        if slot >= capacity {
            log::warn!(
                "Shadow atlas overcommitted: light {} at slot {} aliases the tile of slot {}",
                light,
                slot,
                slot % capacity
            );
        }

        let viewport = self.layout.viewport_for_slot(slot);
        let mut unit = PerLightShadowUnit::new(light, settings);

        self.lights.push(light);
        self.viewports.push(viewport);
        self.texture.set_light_slot_count(slot + 1);
        unit.bind_atlas(&mut self.texture, slot, viewport);
        self.units.push(unit);

        SlotHandle(slot)
    }

    /// Places a light into an existing slot, replacing the one registered
    /// there. A no-op when the light is null or already registered at any
    /// slot. The slot's unit is marked dirty so its tile is re-rendered.
    pub fn set_light(&mut self, slot: SlotHandle, light: LightId) {
        debug_assert!(slot.is_valid());
        if light.is_null() || self.lights.contains(&light) {
            return;
        }
        self.lights[slot.index()] = light;
        self.units[slot.index()].set_light(light);
    }

    /// Sets the pixel size of the atlas texture. A no-op when unchanged;
    /// otherwise the tile size is reset to [`DEFAULT_TILE_SIZE`], the grid
    /// recomputed, and the texture resource marked for reallocation at the
    /// next [`initialize`](Self::initialize).
    ///
    /// # Errors
    /// Returns an error if [`DEFAULT_TILE_SIZE`] does not evenly divide the
    /// new atlas size; the previous layout is kept in that case.
    pub fn set_atlas_size(&mut self, pixels: u32) -> Result<()> {
        if pixels == self.layout.atlas_size() {
            return Ok(());
        }
        self.layout = TileLayout::new(pixels, DEFAULT_TILE_SIZE)?;
        self.settings.atlas_size = pixels;
        self.settings.texture_size = DEFAULT_TILE_SIZE;
        self.commit_state = AtlasCommitState::ResourceDirty;
        log::debug!(
            "Shadow atlas resized to {0}x{0}, awaiting commit",
            pixels
        );
        Ok(())
    }

    /// Sets the tile size for every light and recomputes the grid. The
    /// shared texture is not reallocated (only per-unit camera resolutions
    /// and the tile viewports change), so the commit state only moves from
    /// [`AtlasCommitState::Clean`] to [`AtlasCommitState::LayoutDirty`].
    ///
    /// # Errors
    /// Returns an error if the tile size does not evenly divide the atlas
    /// size; the previous layout is kept in that case.
    pub fn set_tile_size_all(&mut self, pixels: u32) -> Result<()> {
        self.layout = TileLayout::new(self.layout.atlas_size(), pixels)?;
        self.settings.texture_size = pixels;
        for unit in &mut self.units {
            unit.set_map_size(pixels);
        }
        if self.commit_state == AtlasCommitState::Clean {
            self.commit_state = AtlasCommitState::LayoutDirty;
        }
        Ok(())
    }

    /// Sets the shadow camera resolution of a single light. This is per-unit
    /// state only: neither the grid nor the shared texture is affected.
    pub fn set_tile_size(&mut self, slot: SlotHandle, pixels: u32) {
        self.unit_mut(slot).set_map_size(pixels);
    }

    /// Sets the scene whose geometry receives shadows from the atlas.
    pub fn set_shadowed_scene(&mut self, scene: Rc<RefCell<ShadowedScene>>) {
        self.scene = Some(scene);
    }

    /// Whether a shadowed scene is currently set.
    pub fn has_shadowed_scene(&self) -> bool {
        self.scene.is_some()
    }

    /// Commits pending configuration: the explicit resolution point of the
    /// commit state machine. A no-op while no shadowed scene is set.
    ///
    /// If the texture resource is dirty, its descriptor is reconfigured
    /// (size, format derived from the precision, filtering derived from the
    /// algorithm/fake-PCF/precision, clamped wrap) and marked for
    /// reallocation by the host. In all cases every slot's viewport is
    /// recomputed from the current layout, every unit is re-bound to the
    /// texture, the texel/render size uniform seeds are refreshed and the
    /// texture is attached to the scene's receiving state.
    pub fn initialize(&mut self) {
        let Some(scene) = self.scene.clone() else {
            return;
        };

        if self.commit_state == AtlasCommitState::ResourceDirty {
            self.reallocate_texture();
        }

        self.texture_unit = self.texture_unit_base;
        self.texture.set_light_unit_start(self.texture_unit);
        self.texture
            .set_name(format!("ShadowTexture{}", self.texture_unit));

        let atlas_size = self.layout.atlas_size() as f32;
        self.texture.set_texel_size(1.0 / atlas_size);
        self.texture.set_render_size([atlas_size, atlas_size]);

        for (slot, unit) in self.units.iter_mut().enumerate() {
            let viewport = self.layout.viewport_for_slot(slot);
            self.viewports[slot] = viewport;
            unit.bind_atlas(&mut self.texture, slot, viewport);
        }

        self.attachment_token = Some(
            scene
                .borrow_mut()
                .receiving_state_mut()
                .attach_texture(self.texture_unit, self.texture.compute_hash()),
        );

        self.commit_state = AtlasCommitState::Clean;
    }

    /// Per-frame update: forwards the update context and each slot's current
    /// viewport to its shadow unit, in registration order, so every unit
    /// refreshes its render-target state and the texture's per-slot arrays.
    pub fn update_frame(&mut self, ctx: &UpdateContext) {
        for (slot, unit) in self.units.iter_mut().enumerate() {
            unit.update(ctx, self.viewports[slot], &mut self.texture, slot);
        }
    }

    /// Forwards the cull traversal to every enabled unit in registration
    /// order. The order matters for draw-call batching consistency, not for
    /// correctness.
    pub fn cull_shadow_casters(&self, culler: &mut dyn ShadowCasterCuller) {
        for unit in &self.units {
            unit.cull_shadow_casting(culler);
        }
    }

    /// Whether the given slot has state requiring a GPU resource update.
    pub fn is_dirty(&self, slot: SlotHandle) -> bool {
        self.unit(slot).is_dirty()
    }

    /// Whether any slot has state requiring a GPU resource update.
    pub fn is_any_dirty(&self) -> bool {
        self.units.iter().any(PerLightShadowUnit::is_dirty)
    }

    /// Binds the atlas texture at its texture unit and pushes the per-slot
    /// uniform values, using the injected uniform-set cache.
    pub fn apply(&self, render_state: &mut dyn RenderState, cache: &mut UniformSetCache) {
        self.texture.apply(render_state, cache, self.texture_unit);
    }

    /// Releases the atlas resources and drops the shadowed-scene reference.
    /// The texture attachment is removed from the scene's receiving state
    /// only if it is still this atlas's attachment. The manager is inert
    /// until a scene is set and [`initialize`](Self::initialize) runs again.
    pub fn teardown(&mut self) {
        let token = self.attachment_token.take();
        if let Some(scene) = self.scene.take() {
            let mut scene = scene.borrow_mut();
            let receiving = scene.receiving_state_mut();
            if token.is_some() && receiving.attachment_token(self.texture_unit) == token {
                receiving.detach_texture(self.texture_unit);
            }
        }
        self.texture = ShadowAtlasTexture::new();
        self.texture.set_light_slot_count(self.lights.len());
        self.commit_state = AtlasCommitState::ResourceDirty;
    }

    /// Sets the depth bias of every unit.
    pub fn set_bias_all(&mut self, bias: f32) {
        self.settings.bias = bias;
        for unit in &mut self.units {
            unit.set_bias(bias);
        }
    }

    /// Sets the first exponent parameter of every unit.
    pub fn set_exponent0_all(&mut self, exponent: f32) {
        self.settings.exponent0 = exponent;
        for unit in &mut self.units {
            unit.set_exponent0(exponent);
        }
    }

    /// Sets the second exponent parameter of every unit.
    pub fn set_exponent1_all(&mut self, exponent: f32) {
        self.settings.exponent1 = exponent;
        for unit in &mut self.units {
            unit.set_exponent1(exponent);
        }
    }

    /// Sets the VSM variance epsilon of every unit.
    pub fn set_epsilon_vsm_all(&mut self, epsilon: f32) {
        self.settings.epsilon_vsm = epsilon;
        for unit in &mut self.units {
            unit.set_epsilon_vsm(epsilon);
        }
    }

    /// Sets the PCF kernel size of every unit.
    pub fn set_kernel_size_pcf_all(&mut self, kernel_size: u32) {
        self.settings.kernel_size_pcf = kernel_size;
        for unit in &mut self.units {
            unit.set_kernel_size_pcf(kernel_size);
        }
    }

    /// Sets the fake-PCF flag of every unit. The shared texture's filtering
    /// depends on it, so the texture resource is marked for reallocation.
    pub fn set_fake_pcf_all(&mut self, fake_pcf: bool) {
        if self.settings.fake_pcf != fake_pcf {
            self.settings.fake_pcf = fake_pcf;
            self.commit_state = AtlasCommitState::ResourceDirty;
        }
        for unit in &mut self.units {
            unit.set_fake_pcf(fake_pcf);
        }
    }

    /// Sets the rotate-offset flag of every unit.
    pub fn set_rotate_offset_all(&mut self, rotate_offset: bool) {
        self.settings.rotate_offset = rotate_offset;
        for unit in &mut self.units {
            unit.set_rotate_offset(rotate_offset);
        }
    }

    /// Sets the shadow algorithm of every unit. The shared texture's
    /// filtering depends on it, so the texture resource is marked for
    /// reallocation.
    pub fn set_algorithm_all(&mut self, algorithm: ShadowAlgorithm) {
        if self.settings.algorithm != algorithm {
            self.settings.algorithm = algorithm;
            self.commit_state = AtlasCommitState::ResourceDirty;
        }
        for unit in &mut self.units {
            unit.set_algorithm(algorithm);
        }
    }

    /// Sets the texture precision of every unit. The shared texture's format
    /// and filtering depend on it, so the texture resource is marked for
    /// reallocation.
    pub fn set_texture_precision_all(&mut self, precision: TexturePrecision) {
        if self.settings.precision != precision {
            self.settings.precision = precision;
            self.commit_state = AtlasCommitState::ResourceDirty;
        }
        for unit in &mut self.units {
            unit.set_texture_precision(precision);
        }
    }

    /// Sets the debug-visualization flag of every unit.
    pub fn set_debug_all(&mut self, debug: bool) {
        self.settings.debug = debug;
        for unit in &mut self.units {
            unit.set_debug(debug);
        }
    }

    /// Sets the shadow-caster bounds traversal mask of every unit.
    pub fn set_casts_shadow_bounds_traversal_mask_all(&mut self, mask: TraversalMask) {
        self.settings.casts_shadow_bounds_traversal_mask = mask;
        for unit in &mut self.units {
            unit.set_casts_shadow_bounds_traversal_mask(mask);
        }
    }

    /// Sets the shadow-caster draw traversal mask of every unit.
    pub fn set_casts_shadow_draw_traversal_mask_all(&mut self, mask: TraversalMask) {
        self.settings.casts_shadow_draw_traversal_mask = mask;
        for unit in &mut self.units {
            unit.set_casts_shadow_draw_traversal_mask(mask);
        }
    }

    fn reallocate_texture(&mut self) {
        let atlas_size = self.layout.atlas_size();
        let (min_filter, mag_filter) = derive_texture_filtering(
            self.settings.algorithm,
            self.settings.fake_pcf,
            self.settings.precision,
        );

        self.texture.set_texture_size(atlas_size, atlas_size);
        self.texture
            .set_format(self.settings.precision.texture_format());
        self.texture.set_filtering(min_filter, mag_filter);
        self.texture.set_address_mode(wgpu::AddressMode::ClampToEdge);
        self.texture.mark_allocation_dirty();

        log::debug!(
            "Shadow atlas texture reconfigured: {0}x{0} {1:?}, {2:?}/{3:?} filtering",
            atlas_size,
            self.texture.format(),
            min_filter,
            mag_filter
        );
    }
}

impl Default for ShadowAtlasManager {
    fn default() -> Self {
        Self::new(ShadowSettings::default()).expect("default shadow settings form a valid layout")
    }
}

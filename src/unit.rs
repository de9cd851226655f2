//! Per-light shadow state within the atlas.

use crate::{
    layout::ViewportRect,
    scene::{LightId, ShadowCasterCuller, UpdateContext},
    settings::{ShadowAlgorithm, ShadowSettings, TexturePrecision, TraversalMask},
    texture::ShadowAtlasTexture,
};
use nalgebra::{Matrix4, Vector4};

/// The camera rendering one light's shadow tile: view and projection
/// matrices, the depth range they cover, and the atlas viewport the tile is
/// rendered into.
#[derive(Clone, Debug)]
pub struct ShadowCamera {
    view_matrix: Matrix4<f32>,
    projection_matrix: Matrix4<f32>,
    depth_range: Vector4<f32>,
    viewport: Option<ViewportRect>,
}

/// One light's shadow unit: its shadow camera, filtering and bias
/// parameters, traversal state and dirty flag. One unit exists per
/// registered light slot, driven by the atlas manager.
#[derive(Debug)]
pub struct PerLightShadowUnit {
    light: LightId,
    camera: ShadowCamera,
    settings: ShadowSettings,
    /// Resolution of this unit's shadow camera in pixels (the tile size,
    /// unless overridden per unit).
    map_size: u32,
    enabled: bool,
    dirty: bool,
    last_update_frame: Option<u64>,
}

impl ShadowCamera {
    /// Creates a camera with identity matrices and an empty depth range.
    pub fn new() -> Self {
        Self {
            view_matrix: Matrix4::identity(),
            projection_matrix: Matrix4::identity(),
            depth_range: Vector4::zeros(),
            viewport: None,
        }
    }

    /// Returns the light-space view matrix.
    pub fn view_matrix(&self) -> &Matrix4<f32> {
        &self.view_matrix
    }

    /// Returns the light-space projection matrix.
    pub fn projection_matrix(&self) -> &Matrix4<f32> {
        &self.projection_matrix
    }

    /// Returns the depth range covered by the camera, packed as
    /// `(near, far, far - near, 1 / (far - near))`.
    pub fn depth_range(&self) -> &Vector4<f32> {
        &self.depth_range
    }

    /// Returns the atlas viewport the camera renders into, once assigned.
    pub fn viewport(&self) -> Option<ViewportRect> {
        self.viewport
    }

    /// Sets the light-space view matrix.
    pub fn set_view_matrix(&mut self, view_matrix: Matrix4<f32>) {
        self.view_matrix = view_matrix;
    }

    /// Sets the light-space projection matrix.
    pub fn set_projection_matrix(&mut self, projection_matrix: Matrix4<f32>) {
        self.projection_matrix = projection_matrix;
    }

    /// Sets the depth range covered by the camera from near and far plane
    /// distances.
    pub fn set_depth_range(&mut self, near: f32, far: f32) {
        let span = far - near;
        self.depth_range = Vector4::new(near, far, span, 1.0 / span);
    }

    pub(crate) fn set_viewport(&mut self, viewport: ViewportRect) {
        self.viewport = Some(viewport);
    }
}

impl Default for ShadowCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl PerLightShadowUnit {
    /// Creates a unit for the given light with the given settings. The unit
    /// starts dirty: it requires a bind and an update before its tile holds
    /// valid data.
    pub fn new(light: LightId, settings: ShadowSettings) -> Self {
        Self {
            light,
            camera: ShadowCamera::new(),
            map_size: settings.texture_size,
            settings,
            enabled: true,
            dirty: true,
            last_update_frame: None,
        }
    }

    /// Returns the light this unit casts shadows for.
    pub fn light(&self) -> LightId {
        self.light
    }

    /// Replaces the light this unit casts shadows for and marks the unit
    /// dirty so its tile is re-rendered.
    pub fn set_light(&mut self, light: LightId) {
        self.light = light;
        self.dirty = true;
    }

    /// Returns the unit's shadow camera.
    pub fn camera(&self) -> &ShadowCamera {
        &self.camera
    }

    /// Returns the unit's shadow camera for modification. The caller is
    /// responsible for marking the unit dirty if the change must reach the
    /// GPU outside the regular frame update.
    pub fn camera_mut(&mut self) -> &mut ShadowCamera {
        &mut self.camera
    }

    /// Returns the unit's settings.
    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    /// Whether the unit has state requiring a GPU resource update.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the unit as requiring a GPU resource update.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether the unit participates in frame updates and cull traversals.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns the resolution of the unit's shadow camera in pixels.
    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    /// Sets the resolution of the unit's shadow camera in pixels. This is
    /// per-unit camera state only; the shared atlas texture is unaffected.
    pub fn set_map_size(&mut self, map_size: u32) {
        if self.map_size != map_size {
            self.map_size = map_size;
            self.dirty = true;
        }
    }

    /// Returns the frame number of the last completed update, if any.
    pub fn last_update_frame(&self) -> Option<u64> {
        self.last_update_frame
    }

    pub fn bias(&self) -> f32 {
        self.settings.bias
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.settings.bias = bias;
    }

    pub fn exponent0(&self) -> f32 {
        self.settings.exponent0
    }

    pub fn set_exponent0(&mut self, exponent: f32) {
        self.settings.exponent0 = exponent;
    }

    pub fn exponent1(&self) -> f32 {
        self.settings.exponent1
    }

    pub fn set_exponent1(&mut self, exponent: f32) {
        self.settings.exponent1 = exponent;
    }

    pub fn epsilon_vsm(&self) -> f32 {
        self.settings.epsilon_vsm
    }

    pub fn set_epsilon_vsm(&mut self, epsilon: f32) {
        self.settings.epsilon_vsm = epsilon;
    }

    pub fn kernel_size_pcf(&self) -> u32 {
        self.settings.kernel_size_pcf
    }

    pub fn set_kernel_size_pcf(&mut self, kernel_size: u32) {
        self.settings.kernel_size_pcf = kernel_size;
    }

    pub fn fake_pcf(&self) -> bool {
        self.settings.fake_pcf
    }

    /// Fake PCF changes the required texture filtering, so the unit is
    /// marked dirty.
    pub fn set_fake_pcf(&mut self, fake_pcf: bool) {
        if self.settings.fake_pcf != fake_pcf {
            self.settings.fake_pcf = fake_pcf;
            self.dirty = true;
        }
    }

    pub fn rotate_offset(&self) -> bool {
        self.settings.rotate_offset
    }

    pub fn set_rotate_offset(&mut self, rotate_offset: bool) {
        self.settings.rotate_offset = rotate_offset;
    }

    pub fn algorithm(&self) -> ShadowAlgorithm {
        self.settings.algorithm
    }

    /// Changing the algorithm changes the required texture filtering, so the
    /// unit is marked dirty.
    pub fn set_algorithm(&mut self, algorithm: ShadowAlgorithm) {
        if self.settings.algorithm != algorithm {
            self.settings.algorithm = algorithm;
            self.dirty = true;
        }
    }

    pub fn texture_precision(&self) -> TexturePrecision {
        self.settings.precision
    }

    /// Changing the precision changes the required texture storage, so the
    /// unit is marked dirty.
    pub fn set_texture_precision(&mut self, precision: TexturePrecision) {
        if self.settings.precision != precision {
            self.settings.precision = precision;
            self.dirty = true;
        }
    }

    pub fn debug(&self) -> bool {
        self.settings.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.settings.debug = debug;
    }

    pub fn casts_shadow_bounds_traversal_mask(&self) -> TraversalMask {
        self.settings.casts_shadow_bounds_traversal_mask
    }

    pub fn set_casts_shadow_bounds_traversal_mask(&mut self, mask: TraversalMask) {
        self.settings.casts_shadow_bounds_traversal_mask = mask;
    }

    pub fn casts_shadow_draw_traversal_mask(&self) -> TraversalMask {
        self.settings.casts_shadow_draw_traversal_mask
    }

    pub fn set_casts_shadow_draw_traversal_mask(&mut self, mask: TraversalMask) {
        self.settings.casts_shadow_draw_traversal_mask = mask;
    }

    /// Binds the unit to the atlas texture at the given slot: assigns the
    /// tile viewport to the shadow camera and writes the camera's current
    /// state into the texture's per-slot arrays. The unit stays dirty until
    /// its first frame update.
    pub fn bind_atlas(
        &mut self,
        texture: &mut ShadowAtlasTexture,
        slot: usize,
        viewport: ViewportRect,
    ) {
        self.camera.set_viewport(viewport);
        self.write_camera_state(texture, slot);
        self.dirty = true;
    }

    /// Per-frame update: assigns the (possibly recomputed) tile viewport and
    /// refreshes the texture's per-slot arrays from the camera, clearing the
    /// dirty flag.
    pub fn update(
        &mut self,
        ctx: &UpdateContext,
        viewport: ViewportRect,
        texture: &mut ShadowAtlasTexture,
        slot: usize,
    ) {
        self.camera.set_viewport(viewport);
        self.write_camera_state(texture, slot);
        self.last_update_frame = Some(ctx.frame_number());
        self.dirty = false;
    }

    /// Forwards the shadow camera and traversal masks to the host culler.
    /// Disabled units are skipped.
    pub fn cull_shadow_casting(&self, culler: &mut dyn ShadowCasterCuller) {
        if !self.enabled {
            return;
        }
        culler.cull_casters(
            &self.camera,
            self.settings.casts_shadow_bounds_traversal_mask,
            self.settings.casts_shadow_draw_traversal_mask,
        );
    }

    fn write_camera_state(&self, texture: &mut ShadowAtlasTexture, slot: usize) {
        texture.set_view_matrix(*self.camera.view_matrix(), slot);
        texture.set_projection_matrix(*self.camera.projection_matrix(), slot);
        texture.set_depth_range(*self.camera.depth_range(), slot);
        texture.set_map_size(self.map_size as f32, self.map_size as f32, slot);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct CountingCuller {
        culled: usize,
    }

    impl ShadowCasterCuller for CountingCuller {
        fn cull_casters(
            &mut self,
            _camera: &ShadowCamera,
            _bounds_mask: TraversalMask,
            _draw_mask: TraversalMask,
        ) {
            self.culled += 1;
        }
    }

    #[test]
    fn depth_range_packs_span_and_reciprocal() {
        let mut camera = ShadowCamera::new();
        camera.set_depth_range(1.0, 101.0);
        let range = camera.depth_range();
        assert_abs_diff_eq!(range.x, 1.0);
        assert_abs_diff_eq!(range.y, 101.0);
        assert_abs_diff_eq!(range.z, 100.0);
        assert_abs_diff_eq!(range.w, 0.01);
    }

    #[test]
    fn new_unit_is_dirty_until_updated() {
        let mut unit = PerLightShadowUnit::new(LightId::new(1), ShadowSettings::default());
        assert!(unit.is_dirty());

        let mut texture = ShadowAtlasTexture::new();
        texture.set_light_slot_count(1);
        let viewport = ViewportRect::new(0, 0, 256, 256);

        unit.bind_atlas(&mut texture, 0, viewport);
        assert!(unit.is_dirty());

        unit.update(&UpdateContext::new(1), viewport, &mut texture, 0);
        assert!(!unit.is_dirty());
        assert_eq!(unit.last_update_frame(), Some(1));
        assert_eq!(unit.camera().viewport(), Some(viewport));
    }

    #[test]
    fn update_writes_camera_state_into_texture_arrays() {
        let mut unit = PerLightShadowUnit::new(LightId::new(1), ShadowSettings::default());
        unit.camera_mut().set_view_matrix(Matrix4::new_scaling(3.0));
        unit.camera_mut().set_depth_range(0.5, 50.5);

        let mut texture = ShadowAtlasTexture::new();
        texture.set_light_slot_count(1);

        unit.update(
            &UpdateContext::new(7),
            ViewportRect::new(1, 0, 256, 256),
            &mut texture,
            0,
        );

        assert_eq!(texture.view_matrix(0), &Matrix4::new_scaling(3.0));
        assert_abs_diff_eq!(texture.depth_range(0).y, 50.5);
        assert_abs_diff_eq!(texture.map_size(0).x, 256.0);
    }

    #[test]
    fn filtering_relevant_setters_mark_the_unit_dirty() {
        let mut unit = PerLightShadowUnit::new(LightId::new(1), ShadowSettings::default());
        let mut texture = ShadowAtlasTexture::new();
        texture.set_light_slot_count(1);
        unit.update(
            &UpdateContext::new(1),
            ViewportRect::new(0, 0, 256, 256),
            &mut texture,
            0,
        );
        assert!(!unit.is_dirty());

        unit.set_bias(0.01);
        assert!(!unit.is_dirty());

        unit.set_algorithm(ShadowAlgorithm::Vsm);
        assert!(unit.is_dirty());
    }

    #[test]
    fn disabled_units_are_skipped_by_cull() {
        let mut unit = PerLightShadowUnit::new(LightId::new(1), ShadowSettings::default());
        let mut culler = CountingCuller { culled: 0 };

        unit.cull_shadow_casting(&mut culler);
        assert_eq!(culler.culled, 1);

        unit.set_enabled(false);
        unit.cull_shadow_casting(&mut culler);
        assert_eq!(culler.culled, 1);
    }
}

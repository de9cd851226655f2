//! The shared atlas texture and its shader uniform source data.

use crate::{
    scene::RenderState,
    uniform::{Uniform, UniformSet, UniformSetCache},
};
use nalgebra::{Matrix4, Vector4};
use std::{cell::RefCell, rc::Rc};
use xxhash_rust::xxh3::xxh3_64;

/// Tag identifying this texture type in uniform names and state hashes.
const TYPE_TAG: &str = "ShadowTextureAtlas";

/// A single texture resource holding one shadow tile per light, together with
/// the per-light-slot arrays (view matrix, projection matrix, depth range,
/// map size) a shader needs to index into the correct sub-region.
///
/// The texture is held at descriptor level: size, format, filtering and wrap
/// modes, plus an allocation-dirty flag telling the host when the backing GPU
/// object must be (re)created. Actual GPU object creation is the host
/// engine's job.
#[derive(Debug)]
pub struct ShadowAtlasTexture {
    name: String,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    min_filter: wgpu::FilterMode,
    mag_filter: wgpu::FilterMode,
    address_mode: wgpu::AddressMode,
    allocation_dirty: bool,
    light_unit_start: Option<u32>,
    texel_size: f32,
    render_size: [f32; 2],
    view_matrices: Vec<Matrix4<f32>>,
    projection_matrices: Vec<Matrix4<f32>>,
    depth_ranges: Vec<Vector4<f32>>,
    map_sizes: Vec<Vector4<f32>>,
}

impl ShadowAtlasTexture {
    /// Creates an unallocated atlas texture with no light slots.
    pub fn new() -> Self {
        Self {
            name: String::from("ShadowTexture"),
            width: 0,
            height: 0,
            format: wgpu::TextureFormat::Rgba8Unorm,
            min_filter: wgpu::FilterMode::Nearest,
            mag_filter: wgpu::FilterMode::Nearest,
            address_mode: wgpu::AddressMode::ClampToEdge,
            allocation_dirty: true,
            light_unit_start: None,
            texel_size: 0.0,
            render_size: [0.0; 2],
            view_matrices: Vec::new(),
            projection_matrices: Vec::new(),
            depth_ranges: Vec::new(),
            map_sizes: Vec::new(),
        }
    }

    /// Sets the debug name of the texture.
    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Returns the debug name of the texture.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the pixel size of the texture, marking the backing GPU object for
    /// reallocation.
    pub fn set_texture_size(&mut self, width: u32, height: u32) {
        if (self.width, self.height) != (width, height) {
            self.width = width;
            self.height = height;
            self.allocation_dirty = true;
        }
    }

    /// Returns the pixel width and height of the texture.
    pub fn texture_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Sets the texture format, marking the backing GPU object for
    /// reallocation.
    pub fn set_format(&mut self, format: wgpu::TextureFormat) {
        if self.format != format {
            self.format = format;
            self.allocation_dirty = true;
        }
    }

    /// Returns the texture format.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Sets the minification and magnification filter modes.
    pub fn set_filtering(&mut self, min_filter: wgpu::FilterMode, mag_filter: wgpu::FilterMode) {
        self.min_filter = min_filter;
        self.mag_filter = mag_filter;
    }

    /// Returns the minification filter mode.
    pub fn min_filter(&self) -> wgpu::FilterMode {
        self.min_filter
    }

    /// Returns the magnification filter mode.
    pub fn mag_filter(&self) -> wgpu::FilterMode {
        self.mag_filter
    }

    /// Sets the address mode used on both texture axes.
    pub fn set_address_mode(&mut self, address_mode: wgpu::AddressMode) {
        self.address_mode = address_mode;
    }

    /// Returns the address mode used on both texture axes.
    pub fn address_mode(&self) -> wgpu::AddressMode {
        self.address_mode
    }

    /// Whether the backing GPU object must be (re)created before next use.
    pub fn is_allocation_dirty(&self) -> bool {
        self.allocation_dirty
    }

    /// Marks the backing GPU object for reallocation.
    pub fn mark_allocation_dirty(&mut self) {
        self.allocation_dirty = true;
    }

    /// Called by the host after it has (re)created the backing GPU object.
    pub fn clear_allocation_dirty(&mut self) {
        self.allocation_dirty = false;
    }

    /// Sets the texture unit at which the shadow texture units start; uniform
    /// names are derived from it.
    pub fn set_light_unit_start(&mut self, texture_unit: u32) {
        self.light_unit_start = Some(texture_unit);
    }

    /// Returns the texture unit at which the shadow texture units start.
    pub fn light_unit_start(&self) -> Option<u32> {
        self.light_unit_start
    }

    /// Sets the shared texel size uniform seed (reciprocal of the atlas
    /// size).
    pub fn set_texel_size(&mut self, texel_size: f32) {
        self.texel_size = texel_size;
    }

    /// Sets the shared render size uniform seed.
    pub fn set_render_size(&mut self, render_size: [f32; 2]) {
        self.render_size = render_size;
    }

    /// Resizes all four per-slot arrays to the given light count. Entries
    /// beyond the old length hold identity/zero values until written.
    pub fn set_light_slot_count(&mut self, count: usize) {
        self.view_matrices.resize(count, Matrix4::identity());
        self.projection_matrices.resize(count, Matrix4::identity());
        self.depth_ranges.resize(count, Vector4::zeros());
        self.map_sizes.resize(count, Vector4::zeros());
    }

    /// Returns the number of light slots the per-slot arrays hold.
    pub fn light_count(&self) -> usize {
        self.view_matrices.len()
    }

    /// Sets the view matrix for the given light slot.
    pub fn set_view_matrix(&mut self, view_matrix: Matrix4<f32>, slot: usize) {
        debug_assert!(slot < self.light_count());
        self.view_matrices[slot] = view_matrix;
    }

    /// Sets the projection matrix for the given light slot.
    pub fn set_projection_matrix(&mut self, projection_matrix: Matrix4<f32>, slot: usize) {
        debug_assert!(slot < self.light_count());
        self.projection_matrices[slot] = projection_matrix;
    }

    /// Sets the depth range for the given light slot.
    pub fn set_depth_range(&mut self, depth_range: Vector4<f32>, slot: usize) {
        debug_assert!(slot < self.light_count());
        self.depth_ranges[slot] = depth_range;
    }

    /// Sets the shadow map size for the given light slot, packed as
    /// `(width, height, 1/width, 1/height)` for texel-space computations in
    /// the shader.
    pub fn set_map_size(&mut self, width: f32, height: f32, slot: usize) {
        debug_assert!(slot < self.light_count());
        self.map_sizes[slot] = Vector4::new(width, height, 1.0 / width, 1.0 / height);
    }

    /// Returns the view matrix for the given light slot.
    pub fn view_matrix(&self, slot: usize) -> &Matrix4<f32> {
        &self.view_matrices[slot]
    }

    /// Returns the projection matrix for the given light slot.
    pub fn projection_matrix(&self, slot: usize) -> &Matrix4<f32> {
        &self.projection_matrices[slot]
    }

    /// Returns the depth range for the given light slot.
    pub fn depth_range(&self, slot: usize) -> &Vector4<f32> {
        &self.depth_ranges[slot]
    }

    /// Returns the packed map size for the given light slot.
    pub fn map_size(&self, slot: usize) -> &Vector4<f32> {
        &self.map_sizes[slot]
    }

    /// Composes the shader-visible name of a uniform. Names combine a fixed
    /// prefix, the texture type tag, the light-unit start index and, for
    /// per-slot uniforms, the slot index, so two atlases bound at different
    /// units never collide.
    pub fn uniform_name(&self, name: &str, slot: Option<usize>) -> String {
        let start = self.light_unit_start.unwrap_or_default();
        match slot {
            Some(slot) => format!("uShadow_{TYPE_TAG}{start}_{slot}_{name}"),
            None => format!("uShadow_{TYPE_TAG}{start}_{name}"),
        }
    }

    /// Returns the uniform set for the given texture unit, creating and
    /// caching it on first use. All atlas textures bound at the same unit
    /// share one set, keyed on the unit within the injected cache.
    ///
    /// The light-unit start index must have been set, since uniform names
    /// are derived from it.
    pub fn get_or_create_uniform_set(
        &self,
        cache: &mut UniformSetCache,
        texture_unit: u32,
    ) -> Rc<RefCell<UniformSet>> {
        debug_assert!(
            self.light_unit_start.is_some(),
            "uniform set requested before light-unit start index was set"
        );

        cache.get_or_insert_with(texture_unit, || self.create_uniform_set(texture_unit))
    }

    /// Binds the texture into the host render state, then pushes every
    /// per-slot array entry and the shared seeds into the cached uniform set
    /// for the unit. Skipped entirely when no light-unit start index has been
    /// set.
    pub fn apply(
        &self,
        render_state: &mut dyn RenderState,
        cache: &mut UniformSetCache,
        texture_unit: u32,
    ) {
        render_state.bind_texture(texture_unit, self);

        if self.light_unit_start.is_none() {
            return;
        }

        let set = self.get_or_create_uniform_set(cache, texture_unit);
        let mut set = set.borrow_mut();

        for (uniform, matrix) in set.view_matrices_mut().iter_mut().zip(&self.view_matrices) {
            uniform.set_matrix4((*matrix).into());
        }
        for (uniform, matrix) in set
            .projection_matrices_mut()
            .iter_mut()
            .zip(&self.projection_matrices)
        {
            uniform.set_matrix4((*matrix).into());
        }
        for (uniform, range) in set.depth_ranges_mut().iter_mut().zip(&self.depth_ranges) {
            uniform.set_float4((*range).into());
        }
        for (uniform, size) in set.map_sizes_mut().iter_mut().zip(&self.map_sizes) {
            uniform.set_float4((*size).into());
        }
        set.texel_size_mut().set_float(self.texel_size);
        set.render_size_mut().set_float2(self.render_size);
    }

    /// Produces a key combining the texture type identity, light-unit start
    /// index, light count and pixel format. Two atlas bindings with equal
    /// hashes are shader-compatible, which upstream state sorting exploits.
    pub fn compute_hash(&self) -> u64 {
        let key = format!(
            "{}_{}_{}_{:?}",
            TYPE_TAG,
            self.light_unit_start.map_or(-1, i64::from),
            self.light_count(),
            self.format,
        );
        xxh3_64(key.as_bytes())
    }

    fn create_uniform_set(&self, texture_unit: u32) -> UniformSet {
        let count = self.light_count();
        let mut view_matrices = Vec::with_capacity(count);
        let mut projection_matrices = Vec::with_capacity(count);
        let mut depth_ranges = Vec::with_capacity(count);
        let mut map_sizes = Vec::with_capacity(count);

        for slot in 0..count {
            view_matrices.push(Uniform::matrix4(
                self.uniform_name("viewMatrix", Some(slot)),
                Matrix4::identity().into(),
            ));
            projection_matrices.push(Uniform::matrix4(
                self.uniform_name("projectionMatrix", Some(slot)),
                Matrix4::identity().into(),
            ));
            depth_ranges.push(Uniform::float4(
                self.uniform_name("depthRange", Some(slot)),
                [0.0; 4],
            ));
            map_sizes.push(Uniform::float4(
                self.uniform_name("mapSize", Some(slot)),
                [0.0; 4],
            ));
        }

        UniformSet::new(
            view_matrices,
            projection_matrices,
            depth_ranges,
            map_sizes,
            Uniform::float(self.uniform_name("texelSize", None), self.texel_size),
            Uniform::float2(self.uniform_name("renderSize", None), self.render_size),
            Uniform::int(format!("Texture{texture_unit}"), texture_unit as i32),
        )
    }
}

impl Default for ShadowAtlasTexture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::uniform::UniformValue;
    use approx::assert_abs_diff_eq;
    use std::collections::HashSet;

    struct RecordingRenderState {
        bound: Vec<(u32, u64)>,
    }

    impl RenderState for RecordingRenderState {
        fn bind_texture(&mut self, texture_unit: u32, texture: &ShadowAtlasTexture) {
            self.bound.push((texture_unit, texture.compute_hash()));
        }
    }

    fn texture_with_slots(count: usize) -> ShadowAtlasTexture {
        let mut texture = ShadowAtlasTexture::new();
        texture.set_light_unit_start(4);
        texture.set_light_slot_count(count);
        texture
    }

    #[test]
    fn per_slot_arrays_grow_and_shrink_together() {
        let mut texture = texture_with_slots(3);
        assert_eq!(texture.light_count(), 3);
        assert_eq!(texture.view_matrix(2), &Matrix4::identity());
        assert_eq!(texture.depth_range(2), &Vector4::zeros());

        texture.set_light_slot_count(1);
        assert_eq!(texture.light_count(), 1);
    }

    #[test]
    fn map_size_packs_reciprocals() {
        let mut texture = texture_with_slots(1);
        texture.set_map_size(256.0, 256.0, 0);
        let size = texture.map_size(0);
        assert_abs_diff_eq!(size.x, 256.0);
        assert_abs_diff_eq!(size.z, 1.0 / 256.0);
    }

    #[test]
    fn uniform_names_are_distinct_across_units_and_slots() {
        let mut first = texture_with_slots(2);
        first.set_light_unit_start(4);
        let mut second = texture_with_slots(2);
        second.set_light_unit_start(5);

        let mut cache = UniformSetCache::new();
        let set_a = first.get_or_create_uniform_set(&mut cache, 4);
        let set_b = second.get_or_create_uniform_set(&mut cache, 5);

        let names_a = set_a.borrow();
        let names_b = set_b.borrow();
        let all: Vec<String> = names_a
            .uniform_names()
            .into_iter()
            .chain(names_b.uniform_names())
            .map(String::from)
            .collect();
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn uniform_set_is_cached_per_unit() {
        let texture = texture_with_slots(2);
        let mut cache = UniformSetCache::new();

        let first = texture.get_or_create_uniform_set(&mut cache, 4);
        let second = texture.get_or_create_uniform_set(&mut cache, 4);
        assert!(Rc::ptr_eq(&first, &second));

        let other = texture.get_or_create_uniform_set(&mut cache, 5);
        assert!(!Rc::ptr_eq(&first, &other));
    }

    #[test]
    fn apply_binds_texture_and_pushes_per_slot_values() {
        let mut texture = texture_with_slots(2);
        texture.set_view_matrix(Matrix4::new_scaling(2.0), 1);
        texture.set_depth_range(Vector4::new(0.1, 100.0, 0.0, 0.0), 1);
        texture.set_map_size(256.0, 256.0, 1);
        texture.set_texel_size(1.0 / 1024.0);
        texture.set_render_size([1024.0, 1024.0]);

        let mut cache = UniformSetCache::new();
        let mut render_state = RecordingRenderState { bound: Vec::new() };
        texture.apply(&mut render_state, &mut cache, 4);

        assert_eq!(render_state.bound, vec![(4, texture.compute_hash())]);

        let set = cache.get(4).unwrap().borrow();
        assert_eq!(
            set.view_matrix(1).value(),
            &UniformValue::Matrix4(Matrix4::new_scaling(2.0).into())
        );
        assert_eq!(
            set.depth_range(1).value(),
            &UniformValue::Float4([0.1, 100.0, 0.0, 0.0])
        );
        assert_eq!(
            set.texel_size().value(),
            &UniformValue::Float(1.0 / 1024.0)
        );
        assert_eq!(set.sampler_unit().value(), &UniformValue::Int(4));
    }

    #[test]
    fn hash_distinguishes_incompatible_bindings() {
        let base = texture_with_slots(2);

        let same = texture_with_slots(2);
        assert_eq!(base.compute_hash(), same.compute_hash());

        let mut more_lights = texture_with_slots(3);
        more_lights.set_light_unit_start(4);
        assert_ne!(base.compute_hash(), more_lights.compute_hash());

        let mut other_unit = texture_with_slots(2);
        other_unit.set_light_unit_start(6);
        assert_ne!(base.compute_hash(), other_unit.compute_hash());

        let mut other_format = texture_with_slots(2);
        other_format.set_format(wgpu::TextureFormat::Rgba32Float);
        assert_ne!(base.compute_hash(), other_format.compute_hash());
    }
}

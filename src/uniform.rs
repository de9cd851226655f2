//! Shader uniform values for atlas bindings.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// A value held by a shader uniform.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Float2([f32; 2]),
    Float4([f32; 4]),
    Matrix4([[f32; 4]; 4]),
}

/// A named shader uniform with a typed value. The host engine reads the name
/// and value when flushing uniforms to the shader program.
#[derive(Clone, Debug)]
pub struct Uniform {
    name: String,
    value: UniformValue,
}

/// The bundle of uniforms a shader needs to sample the correct atlas
/// sub-region for each light: one view matrix, projection matrix, depth range
/// and map size uniform per light slot, plus the shared texel size, render
/// size and sampler unit uniforms.
#[derive(Debug)]
pub struct UniformSet {
    view_matrices: Vec<Uniform>,
    projection_matrices: Vec<Uniform>,
    depth_ranges: Vec<Uniform>,
    map_sizes: Vec<Uniform>,
    texel_size: Uniform,
    render_size: Uniform,
    sampler_unit: Uniform,
}

/// Cache of [`UniformSet`]s keyed by GPU texture unit.
///
/// Uniform identity is a function of the GPU binding point, not of the
/// texture instance, so all atlas textures bound at the same unit share one
/// set. The cache is owned by the renderer context and injected wherever sets
/// are created or applied; entries live as long as the cache does.
#[derive(Debug, Default)]
pub struct UniformSetCache {
    sets: HashMap<u32, Rc<RefCell<UniformSet>>>,
}

impl Uniform {
    /// Creates an integer uniform, typically holding a texture unit index.
    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self {
            name: name.into(),
            value: UniformValue::Int(value),
        }
    }

    /// Creates a scalar float uniform.
    pub fn float(name: impl Into<String>, value: f32) -> Self {
        Self {
            name: name.into(),
            value: UniformValue::Float(value),
        }
    }

    /// Creates a two-component float uniform.
    pub fn float2(name: impl Into<String>, value: [f32; 2]) -> Self {
        Self {
            name: name.into(),
            value: UniformValue::Float2(value),
        }
    }

    /// Creates a four-component float uniform.
    pub fn float4(name: impl Into<String>, value: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            value: UniformValue::Float4(value),
        }
    }

    /// Creates a 4x4 matrix uniform.
    pub fn matrix4(name: impl Into<String>, value: [[f32; 4]; 4]) -> Self {
        Self {
            name: name.into(),
            value: UniformValue::Matrix4(value),
        }
    }

    /// Returns the shader-visible name of the uniform.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current value of the uniform.
    pub fn value(&self) -> &UniformValue {
        &self.value
    }

    pub fn set_int(&mut self, value: i32) {
        self.value = UniformValue::Int(value);
    }

    pub fn set_float(&mut self, value: f32) {
        self.value = UniformValue::Float(value);
    }

    pub fn set_float2(&mut self, value: [f32; 2]) {
        self.value = UniformValue::Float2(value);
    }

    pub fn set_float4(&mut self, value: [f32; 4]) {
        self.value = UniformValue::Float4(value);
    }

    pub fn set_matrix4(&mut self, value: [[f32; 4]; 4]) {
        self.value = UniformValue::Matrix4(value);
    }
}

impl UniformSet {
    pub(crate) fn new(
        view_matrices: Vec<Uniform>,
        projection_matrices: Vec<Uniform>,
        depth_ranges: Vec<Uniform>,
        map_sizes: Vec<Uniform>,
        texel_size: Uniform,
        render_size: Uniform,
        sampler_unit: Uniform,
    ) -> Self {
        Self {
            view_matrices,
            projection_matrices,
            depth_ranges,
            map_sizes,
            texel_size,
            render_size,
            sampler_unit,
        }
    }

    /// Returns the number of light slots the set was created for.
    pub fn light_count(&self) -> usize {
        self.view_matrices.len()
    }

    /// Returns the view matrix uniform for the given light slot.
    pub fn view_matrix(&self, slot: usize) -> &Uniform {
        &self.view_matrices[slot]
    }

    /// Returns the projection matrix uniform for the given light slot.
    pub fn projection_matrix(&self, slot: usize) -> &Uniform {
        &self.projection_matrices[slot]
    }

    /// Returns the depth range uniform for the given light slot.
    pub fn depth_range(&self, slot: usize) -> &Uniform {
        &self.depth_ranges[slot]
    }

    /// Returns the map size uniform for the given light slot.
    pub fn map_size(&self, slot: usize) -> &Uniform {
        &self.map_sizes[slot]
    }

    /// Returns the shared texel size uniform.
    pub fn texel_size(&self) -> &Uniform {
        &self.texel_size
    }

    /// Returns the shared render size uniform.
    pub fn render_size(&self) -> &Uniform {
        &self.render_size
    }

    /// Returns the sampler uniform holding the texture unit index.
    pub fn sampler_unit(&self) -> &Uniform {
        &self.sampler_unit
    }

    /// Returns the names of every uniform in the set.
    pub fn uniform_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .view_matrices
            .iter()
            .chain(&self.projection_matrices)
            .chain(&self.depth_ranges)
            .chain(&self.map_sizes)
            .map(Uniform::name)
            .collect();
        names.push(self.texel_size.name());
        names.push(self.render_size.name());
        names.push(self.sampler_unit.name());
        names
    }

    pub(crate) fn view_matrices_mut(&mut self) -> &mut [Uniform] {
        &mut self.view_matrices
    }

    pub(crate) fn projection_matrices_mut(&mut self) -> &mut [Uniform] {
        &mut self.projection_matrices
    }

    pub(crate) fn depth_ranges_mut(&mut self) -> &mut [Uniform] {
        &mut self.depth_ranges
    }

    pub(crate) fn map_sizes_mut(&mut self) -> &mut [Uniform] {
        &mut self.map_sizes
    }

    pub(crate) fn texel_size_mut(&mut self) -> &mut Uniform {
        &mut self.texel_size
    }

    pub(crate) fn render_size_mut(&mut self) -> &mut Uniform {
        &mut self.render_size
    }
}

impl UniformSetCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached set for the given texture unit, if one was created.
    pub fn get(&self, texture_unit: u32) -> Option<&Rc<RefCell<UniformSet>>> {
        self.sets.get(&texture_unit)
    }

    /// Returns the number of texture units with a cached set.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no set has been created yet.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub(crate) fn get_or_insert_with(
        &mut self,
        texture_unit: u32,
        create: impl FnOnce() -> UniformSet,
    ) -> Rc<RefCell<UniformSet>> {
        Rc::clone(
            self.sets
                .entry(texture_unit)
                .or_insert_with(|| Rc::new(RefCell::new(create()))),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn setting_uniform_values_replaces_them() {
        let mut uniform = Uniform::float("uTexelSize", 1.0 / 1024.0);
        assert_eq!(uniform.name(), "uTexelSize");
        uniform.set_float(1.0 / 2048.0);
        assert_eq!(uniform.value(), &UniformValue::Float(1.0 / 2048.0));
    }

    #[test]
    fn cache_returns_same_set_for_same_unit() {
        let mut cache = UniformSetCache::new();
        let make = || {
            UniformSet::new(
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Uniform::float("t", 0.0),
                Uniform::float2("r", [0.0; 2]),
                Uniform::int("Texture4", 4),
            )
        };
        let first = cache.get_or_insert_with(4, make);
        let second = cache.get_or_insert_with(4, make);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_creates_distinct_sets_for_distinct_units() {
        let mut cache = UniformSetCache::new();
        let make_for = |unit: u32| {
            move || {
                UniformSet::new(
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Uniform::float("t", 0.0),
                    Uniform::float2("r", [0.0; 2]),
                    Uniform::int(format!("Texture{unit}"), unit as i32),
                )
            }
        };
        let first = cache.get_or_insert_with(4, make_for(4));
        let second = cache.get_or_insert_with(5, make_for(5));
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 2);
    }
}

//! Tile layout of the shadow atlas.

use anyhow::{Result, bail};

/// The pixel sub-rectangle within the atlas assigned to one light's shadow
/// render target.
///
/// A rectangle is always derived from a light slot index and the current
/// [`TileLayout`]; it is never stored independently of the slot that produced
/// it, and is recomputed whenever the layout changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ViewportRect {
    tile_column: u32,
    tile_row: u32,
    width: u32,
    height: u32,
}

/// A uniform grid of equal-size square tiles subdividing a square atlas
/// texture, with one tile per light slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileLayout {
    atlas_size: u32,
    tile_size: u32,
}

impl ViewportRect {
    /// Creates a rectangle at the given tile coordinates with the given pixel
    /// extents.
    pub fn new(tile_column: u32, tile_row: u32, width: u32, height: u32) -> Self {
        Self {
            tile_column,
            tile_row,
            width,
            height,
        }
    }

    /// Returns the column of the tile within the atlas grid.
    pub fn tile_column(&self) -> u32 {
        self.tile_column
    }

    /// Returns the row of the tile within the atlas grid.
    pub fn tile_row(&self) -> u32 {
        self.tile_row
    }

    /// Returns the width of the rectangle in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of the rectangle in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the pixel x-coordinate of the rectangle's origin within the
    /// atlas.
    pub fn x(&self) -> u32 {
        self.tile_column * self.width
    }

    /// Returns the pixel y-coordinate of the rectangle's origin within the
    /// atlas.
    pub fn y(&self) -> u32 {
        self.tile_row * self.height
    }
}

impl TileLayout {
    /// Creates a new layout for the given atlas and tile sizes (both in
    /// pixels, both square).
    ///
    /// # Errors
    /// Returns an error if either size is zero or if the tile size does not
    /// evenly divide the atlas size.
    pub fn new(atlas_size: u32, tile_size: u32) -> Result<Self> {
        if atlas_size == 0 || tile_size == 0 {
            bail!(
                "Invalid shadow atlas layout: atlas size {} and tile size {} must be nonzero",
                atlas_size,
                tile_size
            );
        }
        if atlas_size % tile_size != 0 {
            bail!(
                "Invalid shadow atlas layout: atlas size {} is not divisible by tile size {}",
                atlas_size,
                tile_size
            );
        }
        Ok(Self {
            atlas_size,
            tile_size,
        })
    }

    /// Returns the width and height of the atlas in pixels.
    pub fn atlas_size(&self) -> u32 {
        self.atlas_size
    }

    /// Returns the width and height of each tile in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Returns the number of tiles along the horizontal axis of the atlas.
    pub fn tiles_per_row(&self) -> u32 {
        self.atlas_size / self.tile_size
    }

    /// Returns the number of tiles along the vertical axis of the atlas.
    pub fn tiles_per_column(&self) -> u32 {
        self.atlas_size / self.tile_size
    }

    /// Returns the total number of tiles in the atlas grid.
    pub fn capacity(&self) -> u32 {
        self.tiles_per_row() * self.tiles_per_column()
    }

    /// Computes the atlas rectangle for the given light slot.
    ///
    /// The mapping is a pure function of the slot index and the current
    /// layout: row = slot / tiles per row, column = slot % tiles per row,
    /// scaled by the tile size. Slots beyond the grid capacity wrap around
    /// and alias an earlier tile.
    pub fn viewport_for_slot(&self, slot: usize) -> ViewportRect {
        let n = self.tiles_per_row();
        let slot = (slot as u32) % self.capacity();
        ViewportRect::new(slot % n, slot / n, self.tile_size, self.tile_size)
    }
}

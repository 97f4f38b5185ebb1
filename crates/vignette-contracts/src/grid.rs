/// Fixed sprite sheet geometry: a `G×G` grid of square tiles on a square
/// sheet, read left-to-right, top-to-bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    pub dimension: u32,
    pub sheet_px: u32,
}

pub const GRID_DIMENSION: u32 = 4;
pub const FRAME_COUNT: u32 = GRID_DIMENSION * GRID_DIMENSION;
pub const SHEET_PX: u32 = 1024;

pub const STANDARD_GRID: GridSpec = GridSpec {
    dimension: GRID_DIMENSION,
    sheet_px: SHEET_PX,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("sprite sheet must be square, got {width}x{height}")]
    NotSquare { width: u32, height: u32 },
    #[error("sprite sheet width {width} does not divide into {dimension} columns")]
    UnevenTiles { width: u32, dimension: u32 },
    #[error("sprite sheet is empty")]
    Empty,
}

impl Default for GridSpec {
    fn default() -> Self {
        STANDARD_GRID
    }
}

impl GridSpec {
    pub fn frame_count(&self) -> u32 {
        self.dimension * self.dimension
    }

    pub fn tile_px(&self) -> u32 {
        self.sheet_px / self.dimension
    }

    pub fn row(&self, frame: u32) -> u32 {
        frame / self.dimension
    }

    pub fn col(&self, frame: u32) -> u32 {
        frame % self.dimension
    }

    pub fn next_frame(&self, frame: u32) -> u32 {
        (frame + 1) % self.frame_count()
    }

    pub fn normalized_rect(&self, frame: u32) -> NormalizedRect {
        let size = 1.0 / self.dimension as f32;
        NormalizedRect {
            x: self.col(frame) as f32 * size,
            y: self.row(frame) as f32 * size,
            width: size,
            height: size,
        }
    }

    pub fn pixel_rect(&self, frame: u32, tile_px: u32) -> PixelRect {
        PixelRect {
            x: self.col(frame) * tile_px,
            y: self.row(frame) * tile_px,
            width: tile_px,
            height: tile_px,
        }
    }

    /// Returns the tile size for a sheet of the given dimensions, or why the
    /// sheet cannot be split into `frame_count()` square tiles.
    pub fn tile_size_for(&self, width: u32, height: u32) -> Result<u32, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::Empty);
        }
        if width != height {
            return Err(GridError::NotSquare { width, height });
        }
        if width % self.dimension != 0 {
            return Err(GridError::UnevenTiles {
                width,
                dimension: self.dimension,
            });
        }
        Ok(width / self.dimension)
    }
}

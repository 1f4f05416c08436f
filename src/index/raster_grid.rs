//! North-up raster grid shared by every image of a source.

use serde::{Deserialize, Serialize};

/// Bounds in the grid CRS: [min_x, min_y, max_x, max_y]
pub type Bounds = [f64; 4];

/// A pixel window within the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    /// X offset (column) from top-left
    pub x: usize,
    /// Y offset (row) from top-left
    pub y: usize,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl PixelWindow {
    /// Create a new pixel window with the given offset and dimensions.
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Number of pixels in the window.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlap of two windows, `None` if they share no pixel.
    pub fn intersection(&self, other: &PixelWindow) -> Option<PixelWindow> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(PixelWindow::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Grid definition, stored as `grid.json` next to a source's image index.
///
/// Uses top-down convention: row 0 is at `origin_y` (max_y), rows increase
/// southward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    /// CRS of the grid (e.g., "EPSG:6933")
    pub crs: String,

    /// X coordinate of the top-left corner
    pub origin_x: f64,

    /// Y coordinate of the top-left corner
    pub origin_y: f64,

    /// Square pixel size in CRS units
    pub pixel_size: f64,

    /// Width in pixels
    pub width: usize,

    /// Height in pixels
    pub height: usize,

    /// Pixel value marking missing data (NaN is always missing)
    #[serde(default)]
    pub nodata: Option<f64>,
}

impl RasterGrid {
    /// Check the grid is usable.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.pixel_size.is_finite() || self.pixel_size <= 0.0 {
            anyhow::bail!("Grid pixel size must be positive, got {}", self.pixel_size);
        }
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("Grid must have non-zero dimensions, got {}x{}", self.width, self.height);
        }
        if !self.origin_x.is_finite() || !self.origin_y.is_finite() {
            anyhow::bail!("Grid origin must be finite");
        }
        Ok(())
    }

    /// Grid extent in CRS units.
    pub fn bounds(&self) -> Bounds {
        [
            self.origin_x,
            self.origin_y - self.height as f64 * self.pixel_size,
            self.origin_x + self.width as f64 * self.pixel_size,
            self.origin_y,
        ]
    }

    /// Extent of a pixel window in CRS units.
    pub fn window_bounds(&self, window: &PixelWindow) -> Bounds {
        let min_x = self.origin_x + window.x as f64 * self.pixel_size;
        let max_y = self.origin_y - window.y as f64 * self.pixel_size;
        [
            min_x,
            max_y - window.height as f64 * self.pixel_size,
            min_x + window.width as f64 * self.pixel_size,
            max_y,
        ]
    }

    /// Window spanning the whole grid.
    pub fn full_window(&self) -> PixelWindow {
        PixelWindow::new(0, 0, self.width, self.height)
    }

    /// Smallest window covering `bounds`, clamped to the grid.
    ///
    /// Returns `None` when the bounds do not overlap the grid.
    pub fn window_covering(&self, bounds: &Bounds) -> Option<PixelWindow> {
        if !bounds_intersect(bounds, &self.bounds()) {
            return None;
        }
        let clamp = |v: f64, max: usize| v.max(0.0).min(max as f64) as usize;

        let x0 = clamp(((bounds[0] - self.origin_x) / self.pixel_size).floor(), self.width);
        let x1 = clamp(((bounds[2] - self.origin_x) / self.pixel_size).ceil(), self.width);
        let y0 = clamp(((self.origin_y - bounds[3]) / self.pixel_size).floor(), self.height);
        let y1 = clamp(((self.origin_y - bounds[1]) / self.pixel_size).ceil(), self.height);

        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(PixelWindow::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Whether a window lies completely inside the grid.
    pub fn contains_window(&self, window: &PixelWindow) -> bool {
        window.x + window.width <= self.width && window.y + window.height <= self.height
    }

    /// Pixel (row, col) containing a CRS coordinate, `None` outside the grid.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.pixel_size).floor();
        let row = ((self.origin_y - y) / self.pixel_size).floor();
        if col < 0.0 || row < 0.0 || !col.is_finite() || !row.is_finite() {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row >= self.height || col >= self.width {
            return None;
        }
        Some((row, col))
    }

    /// Whether a raw pixel value is valid data.
    pub fn is_valid(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.nodata {
            Some(nodata) => value != nodata,
            None => true,
        }
    }
}

/// Grow bounds by `margin` on every side.
pub fn expand_bounds(bounds: &Bounds, margin: f64) -> Bounds {
    [
        bounds[0] - margin,
        bounds[1] - margin,
        bounds[2] + margin,
        bounds[3] + margin,
    ]
}

/// Whether two bounding boxes overlap with positive area.
pub fn bounds_intersect(a: &Bounds, b: &Bounds) -> bool {
    a[0] < b[2] && a[2] > b[0] && a[1] < b[3] && a[3] > b[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_grid() -> RasterGrid {
        RasterGrid {
            crs: "EPSG:6933".to_string(),
            origin_x: 0.0,
            origin_y: 100.0,
            pixel_size: 10.0,
            width: 8,
            height: 10,
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn test_bounds() {
        let grid = create_test_grid();
        assert_eq!(grid.bounds(), [0.0, 0.0, 80.0, 100.0]);
    }

    #[test]
    fn test_window_bounds_top_down() {
        let grid = create_test_grid();

        // Row 0 is at the top of the grid
        let top = grid.window_bounds(&PixelWindow::new(0, 0, 2, 1));
        assert_eq!(top, [0.0, 90.0, 20.0, 100.0]);

        let bottom_right = grid.window_bounds(&PixelWindow::new(6, 9, 2, 1));
        assert_eq!(bottom_right, [60.0, 0.0, 80.0, 10.0]);
    }

    #[test]
    fn test_contains_window() {
        let grid = create_test_grid();
        assert!(grid.contains_window(&PixelWindow::new(0, 0, 8, 10)));
        assert!(!grid.contains_window(&PixelWindow::new(1, 0, 8, 10)));
        assert!(!grid.contains_window(&PixelWindow::new(0, 5, 1, 6)));
    }

    #[test]
    fn test_world_to_pixel() {
        let grid = create_test_grid();

        assert_eq!(grid.world_to_pixel(15.0, 95.0), Some((0, 1)));

        // Bottom-right pixel
        assert_eq!(grid.world_to_pixel(79.0, 1.0), Some((9, 7)));
    }

    #[test]
    fn test_world_to_pixel_outside() {
        let grid = create_test_grid();
        assert_eq!(grid.world_to_pixel(-1.0, 50.0), None);
        assert_eq!(grid.world_to_pixel(80.0, 50.0), None);
        assert_eq!(grid.world_to_pixel(10.0, 100.5), None);
        assert_eq!(grid.world_to_pixel(10.0, 0.0), None);
    }

    #[test]
    fn test_window_intersection() {
        let a = PixelWindow::new(0, 0, 4, 4);
        assert_eq!(a.intersection(&PixelWindow::new(2, 3, 4, 4)), Some(PixelWindow::new(2, 3, 2, 1)));
        assert_eq!(a.intersection(&PixelWindow::new(4, 0, 2, 2)), None);
    }

    #[test]
    fn test_window_covering() {
        let grid = create_test_grid();

        // Partial pixels are included
        assert_eq!(
            grid.window_covering(&[15.0, 72.0, 31.0, 95.0]),
            Some(PixelWindow::new(1, 0, 3, 3))
        );
        // Clamped to the grid
        assert_eq!(
            grid.window_covering(&[-50.0, -50.0, 500.0, 500.0]),
            Some(grid.full_window())
        );
        assert_eq!(grid.window_covering(&[100.0, 0.0, 120.0, 10.0]), None);
    }

    #[test]
    fn test_expand_bounds() {
        assert_eq!(expand_bounds(&[0.0, 0.0, 10.0, 20.0], 5.0), [-5.0, -5.0, 15.0, 25.0]);
    }

    #[test]
    fn test_is_valid() {
        let grid = create_test_grid();
        assert!(grid.is_valid(0.0));
        assert!(grid.is_valid(12.5));
        assert!(!grid.is_valid(-9999.0));
        assert!(!grid.is_valid(f64::NAN));
    }

    #[test]
    fn test_validate() {
        let mut grid = create_test_grid();
        assert!(grid.validate().is_ok());

        grid.pixel_size = 0.0;
        assert!(grid.validate().is_err());

        let mut grid = create_test_grid();
        grid.width = 0;
        assert!(grid.validate().is_err());
    }

    #[test]
    fn test_grid_json() {
        let json = r#"{"crs": "EPSG:6933", "origin_x": 0, "origin_y": 100,
                       "pixel_size": 10, "width": 8, "height": 10}"#;
        let grid: RasterGrid = serde_json::from_str(json).unwrap();
        assert_eq!(grid.nodata, None);
        assert_eq!(grid.bounds(), [0.0, 0.0, 80.0, 100.0]);
    }

    #[test]
    fn test_bounds_intersect() {
        assert!(bounds_intersect(&[0.0, 0.0, 2.0, 2.0], &[1.0, 1.0, 3.0, 3.0]));
        // Touching edges do not count
        assert!(!bounds_intersect(&[0.0, 0.0, 1.0, 1.0], &[1.0, 0.0, 2.0, 1.0]));
        assert!(!bounds_intersect(&[0.0, 0.0, 1.0, 1.0], &[5.0, 5.0, 6.0, 6.0]));
    }
}

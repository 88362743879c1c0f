//! Crop, 3D split and spatial decimation.
//!
//! The source coordinates for every output column and row are computed
//! once per geometry change and reused for each frame.

use serde::Serialize;

use super::convert::sample_pixel;
use crate::capture::types::{CropWindow, Mode3d, NegotiatedFormat};

/// Row-major RGB24 image handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl OutputImage {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Number of output samples along one axis.
///
/// `None` when the margins leave no source pixels.
pub fn output_len(effective: u32, near: u32, far: u32, decimation: u32) -> Option<u32> {
    let span = effective.checked_sub(near)?.checked_sub(far)?;
    if span == 0 || decimation == 0 {
        return None;
    }
    Some((span + decimation / 2) / decimation)
}

/// Source coordinates along one axis: `near + dec/2 + i*dec`, clamped to
/// the last pixel inside the window.
pub fn source_coords(effective: u32, near: u32, far: u32, decimation: u32) -> Option<Vec<usize>> {
    let count = output_len(effective, near, far, decimation)?;
    let last = (effective - far - 1) as usize;
    let start = (near + decimation / 2) as usize;
    let step = decimation as usize;
    Some(
        (0..count as usize)
            .map(|i| (start + i * step).min(last))
            .collect(),
    )
}

/// Precomputed sampling grid for one combination of format and settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGeometry {
    xs: Vec<usize>,
    ys: Vec<usize>,
}

impl FrameGeometry {
    /// Build the grid, or `None` when the crop leaves an empty image.
    pub fn new(
        format: &NegotiatedFormat,
        crop: CropWindow,
        mode: Mode3d,
        horizontal_decimation: u32,
        vertical_decimation: u32,
    ) -> Option<Self> {
        let (width, height) = mode.effective_size(format.width, format.height);
        let xs = source_coords(width, crop.left, crop.right, horizontal_decimation)?;
        let ys = source_coords(height, crop.top, crop.bottom, vertical_decimation)?;
        if xs.is_empty() || ys.is_empty() {
            return None;
        }
        Some(Self { xs, ys })
    }

    pub fn width(&self) -> u32 {
        self.xs.len() as u32
    }

    pub fn height(&self) -> u32 {
        self.ys.len() as u32
    }

    /// Decode `data` (exactly one frame of `format`) into a new image.
    pub fn decode(&self, format: &NegotiatedFormat, data: &[u8]) -> OutputImage {
        let stride = format.stride();
        let mut out = Vec::with_capacity(self.xs.len() * self.ys.len() * 3);
        for &y in &self.ys {
            for &x in &self.xs {
                out.extend_from_slice(&sample_pixel(format.pixel_format, data, stride, x, y));
            }
        }
        OutputImage {
            width: self.width(),
            height: self.height(),
            data: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::PixelFormat;

    #[test]
    fn output_len_matrix() {
        // (effective, near, far, decimation, expected)
        let cases = [
            (640, 0, 0, 1, Some(640)),
            (640, 0, 0, 8, Some(80)),
            (640, 10, 10, 8, Some(78)),
            (10, 0, 0, 8, Some(1)),
            (12, 0, 0, 8, Some(2)),
            (5, 1, 1, 2, Some(2)),
            (7, 0, 0, 2, Some(4)),
            (4, 2, 2, 1, None),
            (4, 3, 2, 1, None),
            (1, 0, 0, 3, Some(0)),
            (4, 0, 0, 0, None),
        ];
        for (eff, near, far, dec, expected) in cases {
            assert_eq!(
                output_len(eff, near, far, dec),
                expected,
                "eff={eff} near={near} far={far} dec={dec}"
            );
        }
    }

    #[test]
    fn decimation_of_one_keeps_every_pixel() {
        assert_eq!(source_coords(6, 1, 2, 1).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn coordinates_are_centred_in_their_cell() {
        assert_eq!(source_coords(16, 0, 0, 4).unwrap(), vec![2, 6, 10, 14]);
    }

    #[test]
    fn rounding_overrun_is_clamped() {
        // (12 + 4) / 8 = 2 samples, the second at 4 + 8 = 12 is past 11.
        assert_eq!(source_coords(12, 0, 0, 8).unwrap(), vec![4, 11]);
        // (7 + 1) / 2 = 4 samples: 1, 3, 5, 7 -> last clamped to 6.
        assert_eq!(source_coords(7, 0, 0, 2).unwrap(), vec![1, 3, 5, 6]);
        // Clamp respects the far margin.
        assert_eq!(source_coords(10, 0, 3, 4).unwrap(), vec![2, 6]);
    }

    #[test]
    fn three_d_modes_use_one_view() {
        let format = NegotiatedFormat::new(PixelFormat::Uyvy, 8, 6);
        let sbs = FrameGeometry::new(&format, CropWindow::default(), Mode3d::SideBySide, 1, 1)
            .unwrap();
        assert_eq!((sbs.width(), sbs.height()), (4, 6));
        let tab = FrameGeometry::new(&format, CropWindow::default(), Mode3d::TopAndBottom, 1, 1)
            .unwrap();
        assert_eq!((tab.width(), tab.height()), (8, 3));
    }

    #[test]
    fn degenerate_crop_has_no_geometry() {
        let format = NegotiatedFormat::new(PixelFormat::Uyvy, 8, 8);
        let crop = CropWindow::new(2, 2, 0, 0);
        assert!(FrameGeometry::new(&format, crop, Mode3d::Off, 1, 1).is_some());
        assert!(FrameGeometry::new(&format, crop, Mode3d::SideBySide, 1, 1).is_none());
    }

    #[test]
    fn four_by_four_uyvy_decodes_exactly() {
        // Row-wise luma ramps; neutral chroma so R == G == B.
        let lumas = [
            [16, 235, 16, 235],
            [235, 16, 235, 16],
            [126, 126, 16, 16],
            [235, 235, 235, 235],
        ];
        let mut data = Vec::new();
        for row in lumas {
            data.extend_from_slice(&[128, row[0], 128, row[1], 128, row[2], 128, row[3]]);
        }
        let format = NegotiatedFormat::new(PixelFormat::Uyvy, 4, 4);
        let geometry =
            FrameGeometry::new(&format, CropWindow::default(), Mode3d::Off, 1, 1).unwrap();
        let image = geometry.decode(&format, &data);

        assert_eq!((image.width, image.height), (4, 4));
        assert_eq!(image.data.len(), 4 * 4 * 3);
        let level = |y: u8| match y {
            16 => 0,
            126 => 128,
            _ => 255,
        };
        for (y, row) in lumas.iter().enumerate() {
            for (x, &luma) in row.iter().enumerate() {
                let v = level(luma);
                assert_eq!(image.pixel(x as u32, y as u32), [v, v, v], "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn crop_and_decimation_pick_expected_pixels() {
        // 8x2 RGB32 where each pixel's red channel is its x coordinate.
        let mut data = Vec::new();
        for y in 0..2u8 {
            for x in 0..8u8 {
                data.extend_from_slice(&[x, y, 0, 0]);
            }
        }
        let format = NegotiatedFormat::new(PixelFormat::Rgb32, 8, 2);
        let geometry =
            FrameGeometry::new(&format, CropWindow::new(1, 1, 0, 1), Mode3d::Off, 2, 1).unwrap();
        let image = geometry.decode(&format, &data);
        assert_eq!((image.width, image.height), (3, 1));
        assert_eq!(image.pixel(0, 0), [2, 0, 0]);
        assert_eq!(image.pixel(1, 0), [4, 0, 0]);
        assert_eq!(image.pixel(2, 0), [6, 0, 0]);
    }
}

use crate::capture::types::PixelFormat;

/// BT.601 studio-swing YUV to RGB with fixed-point integer arithmetic (<<8).
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8,
        ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8,
        ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8,
    ]
}

/// Decode the pixel at (`x`, `y`) of a packed frame with `stride` bytes per row.
///
/// UYVY and YUYV store two pixels per 4-byte macro-pixel sharing one U,V
/// pair: an even `x` takes the first luma sample, an odd `x` the second.
/// RGB32 takes the first three bytes of each 4-byte pixel as R, G, B.
/// The caller guarantees the coordinates lie inside the frame.
#[inline]
pub fn sample_pixel(format: PixelFormat, data: &[u8], stride: usize, x: usize, y: usize) -> [u8; 3] {
    let row = y * stride;
    match format {
        PixelFormat::Uyvy => {
            let m = row + (x & !1) * 2;
            let luma = if x & 1 == 0 { data[m + 1] } else { data[m + 3] };
            yuv_to_rgb(luma, data[m], data[m + 2])
        }
        PixelFormat::Yuyv => {
            let m = row + (x & !1) * 2;
            let luma = if x & 1 == 0 { data[m] } else { data[m + 2] };
            yuv_to_rgb(luma, data[m + 1], data[m + 3])
        }
        PixelFormat::Rgb32 => {
            let p = row + x * 4;
            [data[p], data[p + 1], data[p + 2]]
        }
    }
}

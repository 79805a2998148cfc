//! Random-access decoding of one rectangle out of one tiled JPEG.

use std::fs::File;

use jpeg_decoder::{Decoder, PixelFormat};

use crate::error::{DecodeError, Result, bail};
use crate::index::TiledJpeg;
use crate::source::WindowSource;

/// Decode the `w` x `h` (post-scale) rectangle at pre-scale offset
/// `(x, y)` of `jpeg`, downscaled by `scale_denom`, into `dest`.
///
/// `dest` starts at the rectangle's top-left output pixel and advances by
/// `stride` words per row; pixels are written as `ARGB` words, alpha
/// opaque. Rows and columns the decoder cannot supply (a rectangle
/// reaching past the file) are left untouched.
pub(crate) fn read_window(
    jpeg: &TiledJpeg,
    dest: &mut [u32],
    x: u32,
    y: u32,
    scale_denom: u32,
    w: u32,
    h: u32,
    stride: usize,
) -> Result<()> {
    if w == 0 || h == 0 {
        return Ok(());
    }

    let tile_w = jpeg.tile_width;
    let tile_h = jpeg.tile_height;
    let tile_x = x / tile_w;
    let tile_y = y / tile_h;
    let stride_in_tiles = jpeg.width / tile_w;
    let file_tiles_down = jpeg.height / tile_h;

    let width_in_tiles =
        (w * scale_denom + x % tile_w).div_ceil(tile_w).min(stride_in_tiles - tile_x);
    let height_in_tiles =
        (h * scale_denom + y % tile_h).div_ceil(tile_h).min(file_tiles_down - tile_y);

    // The tile window is decoded as a standalone image of this size; the
    // source serves exactly these tiles, so the decoder sees a consistent
    // smaller picture.
    let window_w = (width_in_tiles * tile_w) as u16;
    let window_h = (height_in_tiles * tile_h) as u16;

    let file = File::open(&jpeg.path)?;
    let source = WindowSource::windowed(
        file,
        &jpeg.mcu_starts,
        (tile_y * stride_in_tiles + tile_x) as usize,
        width_in_tiles as usize,
        stride_in_tiles as usize,
        height_in_tiles as usize,
        (window_w, window_h),
    )?;

    let mut decoder = Decoder::new(source);
    decoder.read_info()?;

    // The decoder rounds scaled output up over any partial trailing MCU.
    let out_w = u32::from(window_w).div_ceil(scale_denom) as usize;
    let out_h = u32::from(window_h).div_ceil(scale_denom) as usize;
    if scale_denom > 1 {
        // Requesting this size maps exactly onto one of the decoder's
        // native IDCT truncations; anything else would resample.
        let scaled = decoder.scale(out_w as u16, out_h as u16)?;
        if scaled != (out_w as u16, out_h as u16) {
            bail!(DecodeError::UnexpectedScale);
        }
    }

    let data = decoder.decode()?;
    let info = decoder.info().unwrap();
    let samples_per_pixel = match info.pixel_format {
        PixelFormat::RGB24 => 3,
        PixelFormat::L8 => 1,
        _ => bail!(DecodeError::UnsupportedPixelFormat),
    };

    // Intra-tile offset of the requested rectangle inside the decoded
    // window, in output (post-scale) pixels.
    let dx = ((x % tile_w) / scale_denom) as usize;
    let dy = ((y % tile_h) / scale_denom) as usize;
    let cols = (w as usize).min(out_w - dx);

    for row in 0..h as usize {
        let src_row = dy + row;
        if src_row >= out_h {
            break;
        }
        let samples = &data[(src_row * out_w + dx) * samples_per_pixel..][..cols * samples_per_pixel];
        let out = &mut dest[row * stride..][..cols];
        match samples_per_pixel {
            3 => {
                for (px, rgb) in out.iter_mut().zip(samples.chunks_exact(3)) {
                    *px = 0xFF00_0000
                        | u32::from(rgb[0]) << 16
                        | u32::from(rgb[1]) << 8
                        | u32::from(rgb[2]);
                }
            }
            _ => {
                for (px, &gray) in out.iter_mut().zip(samples) {
                    let gray = u32::from(gray);
                    *px = 0xFF00_0000 | gray << 16 | gray << 8 | gray;
                }
            }
        }
    }

    Ok(())
}

//! Assembles minimal baseline JPEGs for tests.
//!
//! Every 8x8 block carries only a DC coefficient, so each block decodes to
//! one uniform shade chosen per block position. With an all-ones quantizer
//! the shade survives encoding exactly, which makes region and stitching
//! tests fully predictable, while the streams remain ordinary baseline
//! JPEGs that the real decoder accepts: standard DC Huffman table, a
//! one-code AC table holding just EOB, byte stuffing, and cyclic restart
//! markers after every `restart_interval` MCUs.

use std::fs::File;
use std::path::Path;

use jpeg_decoder::PixelFormat;

use crate::index::marker;

const DQT: u8 = 0xDB;

/// The standard luminance DC table from the JPEG annex: code lengths per
/// bit count, then the difference categories 0..=11 in code order.
const DC_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

/// An AC table with a single one-bit code for EOB; DC-only blocks never
/// emit anything else.
const AC_BITS: [u8; 16] = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// Shape of a synthesized file.
pub(crate) struct JpegSpec {
    pub(crate) width: u16,
    pub(crate) height: u16,
    /// MCUs per restart segment; 0 omits DRI and restart markers entirely.
    pub(crate) restart_interval: u16,
    /// 1 for grayscale, 3 for YCbCr (chroma held neutral).
    pub(crate) components: u8,
    pub(crate) comment: Option<&'static [u8]>,
}

pub(crate) struct BuiltJpeg {
    pub(crate) bytes: Vec<u8>,
    /// Offset of the first entropy byte after the scan header.
    pub(crate) data_start: usize,
}

/// Build a file where block `(bx, by)` decodes to `shade(bx, by)` gray.
pub(crate) fn build(spec: &JpegSpec, shade: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    build_full(spec, shade).bytes
}

pub(crate) fn build_full(spec: &JpegSpec, shade: impl Fn(u32, u32) -> u8) -> BuiltJpeg {
    assert!(spec.width % 8 == 0 && spec.height % 8 == 0);
    assert!(spec.components == 1 || spec.components == 3);

    let mut out = vec![0xFF, marker::SOI];

    if let Some(comment) = spec.comment {
        segment(&mut out, marker::COM, comment);
    }

    let mut dqt = vec![0x00];
    dqt.extend([1u8; 64]);
    segment(&mut out, DQT, &dqt);

    let mut sof = vec![
        8,
        (spec.height >> 8) as u8,
        spec.height as u8,
        (spec.width >> 8) as u8,
        spec.width as u8,
        spec.components,
    ];
    for c in 0..spec.components {
        sof.extend([c + 1, 0x11, 0x00]);
    }
    segment(&mut out, marker::SOF0, &sof);

    let mut dht = vec![0x00];
    dht.extend(DC_BITS);
    dht.extend(DC_VALUES);
    segment(&mut out, marker::DHT, &dht);
    let mut dht = vec![0x10];
    dht.extend(AC_BITS);
    dht.push(0x00);
    segment(&mut out, marker::DHT, &dht);

    if spec.restart_interval > 0 {
        let ri = spec.restart_interval;
        segment(&mut out, marker::DRI, &[(ri >> 8) as u8, ri as u8]);
    }

    let mut sos = vec![spec.components];
    for c in 0..spec.components {
        sos.extend([c + 1, 0x00]);
    }
    sos.extend([0, 63, 0]);
    segment(&mut out, marker::SOS, &sos);

    let data_start = out.len();

    let mcus_per_row = u32::from(spec.width) / 8;
    let mcu_rows = u32::from(spec.height) / 8;
    let dc_codes = canonical_codes(&DC_BITS, &DC_VALUES);

    if spec.restart_interval == 0 {
        let mut pred = [0i32; 3];
        let mut writer = BitWriter::new(&mut out);
        for by in 0..mcu_rows {
            for bx in 0..mcus_per_row {
                encode_mcu(&mut writer, &mut pred, spec.components, &dc_codes, shade(bx, by));
            }
        }
        writer.pad();
        out.extend([0xFF, marker::EOI]);
    } else {
        let interval = u32::from(spec.restart_interval);
        assert!(mcus_per_row % interval == 0);
        let segments_per_row = mcus_per_row / interval;
        let mut rst = 0u8;

        for by in 0..mcu_rows {
            for seg in 0..segments_per_row {
                // Restart: predictors reset, bits realign to a byte.
                let mut pred = [0i32; 3];
                let mut writer = BitWriter::new(&mut out);
                for m in 0..interval {
                    let bx = seg * interval + m;
                    encode_mcu(&mut writer, &mut pred, spec.components, &dc_codes, shade(bx, by));
                }
                writer.pad();

                let last = by == mcu_rows - 1 && seg == segments_per_row - 1;
                if last {
                    out.extend([0xFF, marker::EOI]);
                } else {
                    out.extend([0xFF, marker::RST0 | rst]);
                    rst = (rst + 1) % 8;
                }
            }
        }
    }

    BuiltJpeg { bytes: out, data_start }
}

fn segment(out: &mut Vec<u8>, m: u8, payload: &[u8]) {
    let len = payload.len() + 2;
    out.push(0xFF);
    out.push(m);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(payload);
}

/// One MCU: for each component a DC difference and an EOB. The luma block
/// targets `shade`, chroma blocks stay at the neutral midpoint.
fn encode_mcu(
    writer: &mut BitWriter<'_>,
    pred: &mut [i32; 3],
    components: u8,
    dc_codes: &[(u16, u8); 256],
    shade: u8,
) {
    for c in 0..usize::from(components) {
        let target = if c == 0 { i32::from(shade) } else { 128 };
        // With a unit quantizer, a DC of 8 * (v - 128) decodes to the flat
        // level-shifted value v.
        let dc = (target - 128) * 8;
        let diff = dc - pred[c];
        pred[c] = dc;

        let category = if diff == 0 { 0 } else { (32 - diff.unsigned_abs().leading_zeros()) as usize };
        let (code, len) = dc_codes[category];
        writer.put(code, len);
        if category > 0 {
            // Negative differences are sent as diff - 1 in the low bits.
            let raw = if diff < 0 { diff - 1 } else { diff };
            let bits = (raw as u32) & ((1u32 << category) - 1);
            writer.put(bits as u16, category as u8);
        }
        // EOB, the AC table's lone code.
        writer.put(0, 1);
    }
}

/// Derive canonical Huffman codes from a DHT-style description, indexed by
/// symbol value.
fn canonical_codes(bits: &[u8; 16], values: &[u8]) -> [(u16, u8); 256] {
    let mut codes = [(0u16, 0u8); 256];
    let mut code = 0u16;
    let mut next = 0usize;
    for (i, &count) in bits.iter().enumerate() {
        for _ in 0..count {
            codes[usize::from(values[next])] = (code, (i + 1) as u8);
            code += 1;
            next += 1;
        }
        code <<= 1;
    }
    codes
}

/// MSB-first bit assembly with JPEG byte stuffing.
struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u32,
    filled: u8,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> BitWriter<'a> {
        BitWriter { out, acc: 0, filled: 0 }
    }

    fn put(&mut self, code: u16, len: u8) {
        for i in (0..len).rev() {
            self.acc = (self.acc << 1) | u32::from((code >> i) & 1);
            self.filled += 1;
            if self.filled == 8 {
                let byte = self.acc as u8;
                self.out.push(byte);
                if byte == 0xFF {
                    self.out.push(0x00);
                }
                self.acc = 0;
                self.filled = 0;
            }
        }
    }

    /// Pad the final partial byte with one bits, as the scan syntax
    /// requires before a marker.
    fn pad(&mut self) {
        if self.filled > 0 {
            let remaining = 8 - self.filled;
            self.put((1 << remaining) - 1, remaining);
        }
    }
}

/// Decode a whole file the ordinary way and expand it to ARGB words.
pub(crate) fn reference_bgra(path: &Path) -> (Vec<u32>, u16, u16) {
    let mut decoder = jpeg_decoder::Decoder::new(File::open(path).unwrap());
    decoder.read_info().unwrap();
    let info = decoder.info().unwrap();
    let data = decoder.decode().unwrap();
    (expand(&data, info.pixel_format), info.width, info.height)
}

/// Decode a whole file at a native decoder scale and expand it.
pub(crate) fn reference_bgra_scaled(path: &Path, w: u16, h: u16) -> (Vec<u32>, u16, u16) {
    let mut decoder = jpeg_decoder::Decoder::new(File::open(path).unwrap());
    decoder.read_info().unwrap();
    let (out_w, out_h) = decoder.scale(w, h).unwrap();
    let data = decoder.decode().unwrap();
    let format = decoder.info().unwrap().pixel_format;
    (expand(&data, format), out_w, out_h)
}

fn expand(data: &[u8], format: PixelFormat) -> Vec<u32> {
    match format {
        PixelFormat::RGB24 => data
            .chunks_exact(3)
            .map(|rgb| {
                0xFF00_0000 | u32::from(rgb[0]) << 16 | u32::from(rgb[1]) << 8 | u32::from(rgb[2])
            })
            .collect(),
        PixelFormat::L8 => data
            .iter()
            .map(|&gray| {
                let gray = u32::from(gray);
                0xFF00_0000 | gray << 16 | gray << 8 | gray
            })
            .collect(),
        _ => panic!("unexpected pixel format {format:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // The synthesizer itself must produce files the reference decoder
    // accepts and that decode to the requested shades.

    #[test]
    fn grayscale_blocks_decode_to_their_shades() {
        let bytes = build(
            &JpegSpec { width: 32, height: 16, restart_interval: 2, components: 1, comment: None },
            |bx, by| (50 + 20 * bx + 10 * by) as u8,
        );

        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
        let data = decoder.decode().unwrap();
        let info = decoder.info().unwrap();
        assert_eq!((info.width, info.height), (32, 16));
        assert_eq!(info.pixel_format, PixelFormat::L8);

        for by in 0..2u32 {
            for bx in 0..4u32 {
                // The block's center pixel carries the flat shade.
                let px = data[((by * 8 + 4) * 32 + bx * 8 + 4) as usize];
                assert_eq!(px, (50 + 20 * bx + 10 * by) as u8, "block ({bx}, {by})");
            }
        }
    }

    #[test]
    fn ycbcr_blocks_decode_to_gray_pixels() {
        let bytes = build(
            &JpegSpec { width: 16, height: 8, restart_interval: 1, components: 3, comment: None },
            |bx, _| (100 + 40 * bx) as u8,
        );

        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
        let data = decoder.decode().unwrap();
        assert_eq!(decoder.info().unwrap().pixel_format, PixelFormat::RGB24);

        // Neutral chroma: R, G and B agree, tracking the luma shade.
        for bx in 0..2usize {
            let base = (4 * 16 + bx * 8 + 4) * 3;
            let rgb = &data[base..base + 3];
            assert!(rgb.iter().all(|&c| c.abs_diff(100 + 40 * bx as u8) <= 1), "{rgb:?}");
        }
    }
}

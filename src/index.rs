//! Per-file indexing: restart segment table, tile geometry, comment.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::PathBuf;

use log::debug;

use crate::error::{FormatError, Result, bail};
use crate::source::WindowSource;

/// JPEG marker codes (the byte following `FF`).
pub(crate) mod marker {
    /// Baseline sequential frame header.
    pub(crate) const SOF0: u8 = 0xC0;
    /// Extended sequential frame header.
    pub(crate) const SOF1: u8 = 0xC1;
    /// Huffman table definition.
    pub(crate) const DHT: u8 = 0xC4;
    /// First of the eight restart markers, `RST0..RST7`.
    pub(crate) const RST0: u8 = 0xD0;
    /// Start of image.
    pub(crate) const SOI: u8 = 0xD8;
    /// End of image.
    pub(crate) const EOI: u8 = 0xD9;
    /// Start of scan.
    pub(crate) const SOS: u8 = 0xDA;
    /// Restart interval definition.
    pub(crate) const DRI: u8 = 0xDD;
    /// Comment.
    pub(crate) const COM: u8 = 0xFE;
}

/// One indexed JPEG file of a pyramid level.
///
/// Immutable once built. The restart interval divides the image into a
/// grid of tiles, each `restart_interval` MCUs wide and one MCU row tall;
/// `mcu_starts` holds the byte offset of every tile's entropy data, which
/// is what makes random access into the scan possible.
pub(crate) struct TiledJpeg {
    pub(crate) path: PathBuf,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) tile_width: u32,
    pub(crate) tile_height: u32,
    /// Byte offsets of tile starts, row-major. Entry 0 is the first entropy
    /// byte after the scan header; entry k+1 follows tile k's restart
    /// marker. Strictly increasing.
    pub(crate) mcu_starts: Vec<u64>,
    pub(crate) comment: Option<String>,
}

struct Frame {
    width: u32,
    height: u32,
    mcu_width: u32,
    mcu_height: u32,
}

impl TiledJpeg {
    /// Index the file at `path`.
    pub(crate) fn scan(path: PathBuf) -> Result<TiledJpeg> {
        let file = File::open(&path)?;
        Self::scan_reader(path, file)
    }

    /// Index a JPEG stream: walk the header for dimensions, restart
    /// interval and comment, then locate every restart marker in the scan.
    pub(crate) fn scan_reader<R: Read + Seek>(path: PathBuf, reader: R) -> Result<TiledJpeg> {
        let mut src = WindowSource::passthrough(reader);

        if src.read_byte()? != 0xFF || src.read_byte()? != marker::SOI {
            bail!(FormatError::InvalidSignature);
        }

        let mut frame = None;
        let mut restart_interval = 0u32;
        let mut comment = None;

        loop {
            match next_marker(&mut src)? {
                marker::SOF0 | marker::SOF1 => frame = Some(parse_frame(&mut src)?),
                m @ 0xC0..=0xCF if m != marker::DHT => {
                    // Progressive, lossless, differential and arithmetic
                    // frames all lack the restart structure this reader
                    // depends on.
                    bail!(FormatError::UnsupportedCoding);
                }
                marker::DRI => {
                    if src.read_u16()? != 4 {
                        bail!(FormatError::InvalidMarker);
                    }
                    restart_interval = u32::from(src.read_u16()?);
                }
                marker::COM => {
                    let len = usize::from(src.read_u16()?);
                    if len < 2 {
                        bail!(FormatError::InvalidMarker);
                    }
                    let mut data = vec![0; len - 2];
                    src.read_exact(&mut data)?;
                    if comment.is_none() {
                        // Only the part up to the first NUL is meaningful.
                        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                        comment = Some(String::from_utf8_lossy(&data[..end]).into_owned());
                    }
                }
                marker::SOS => {
                    let len = usize::from(src.read_u16()?);
                    if len < 2 {
                        bail!(FormatError::InvalidMarker);
                    }
                    src.skip(len - 2)?;
                    break;
                }
                marker::EOI | 0xD0..=0xD7 => bail!(FormatError::InvalidMarker),
                _ => {
                    let len = usize::from(src.read_u16()?);
                    if len < 2 {
                        bail!(FormatError::InvalidMarker);
                    }
                    src.skip(len - 2)?;
                }
            }
        }

        let Some(frame) = frame else {
            bail!(FormatError::MissingFrameHeader);
        };
        if restart_interval == 0 {
            bail!(FormatError::NoRestartInterval);
        }

        let mcus_per_row = frame.width.div_ceil(frame.mcu_width);
        let mcu_rows = frame.height.div_ceil(frame.mcu_height);
        if mcus_per_row % restart_interval != 0 {
            bail!(FormatError::IrregularTileGrid);
        }
        let segments_per_row = mcus_per_row / restart_interval;
        if frame.width % segments_per_row != 0 || frame.height % mcu_rows != 0 {
            bail!(FormatError::IrregularTileGrid);
        }
        let tile_width = frame.width / segments_per_row;
        let tile_height = frame.height / mcu_rows;

        let expected = (segments_per_row * mcu_rows) as usize;
        let mut mcu_starts = Vec::with_capacity(expected);
        mcu_starts.push(src.file_position());

        // Scan the raw entropy data for restart markers. Byte stuffing
        // guarantees `FF Dn` cannot occur inside entropy-coded data, so
        // every hit is a real marker.
        let mut last_was_ff = false;
        while mcu_starts.len() < expected {
            let b = src.read_byte()?;
            if last_was_ff {
                if b == marker::EOI {
                    break;
                }
                if (marker::RST0..marker::RST0 + 8).contains(&b) {
                    mcu_starts.push(src.file_position());
                }
            }
            last_was_ff = b == 0xFF;
        }
        if mcu_starts.len() != expected {
            bail!(FormatError::MissingRestartMarkers);
        }

        debug!(
            "indexed {}: {}x{}, {}x{} tiles, {} segments",
            path.display(),
            frame.width,
            frame.height,
            tile_width,
            tile_height,
            expected,
        );

        Ok(TiledJpeg {
            path,
            width: frame.width,
            height: frame.height,
            tile_width,
            tile_height,
            mcu_starts,
            comment,
        })
    }
}

/// Advance to the next marker, tolerating fill bytes.
fn next_marker<R: Read + Seek>(src: &mut WindowSource<'_, R>) -> Result<u8> {
    if src.read_byte()? != 0xFF {
        bail!(FormatError::InvalidMarker);
    }
    let mut b = src.read_byte()?;
    while b == 0xFF {
        b = src.read_byte()?;
    }
    if b == 0 {
        bail!(FormatError::InvalidMarker);
    }
    Ok(b)
}

fn parse_frame<R: Read + Seek>(src: &mut WindowSource<'_, R>) -> Result<Frame> {
    let len = usize::from(src.read_u16()?);
    if src.read_byte()? != 8 {
        bail!(FormatError::UnsupportedCoding);
    }
    let height = u32::from(src.read_u16()?);
    let width = u32::from(src.read_u16()?);
    if width == 0 || height == 0 {
        // A zero height defers the real value to a DNL marker, which the
        // tile geometry cannot be derived from up front.
        bail!(FormatError::UnsupportedCoding);
    }

    let components = usize::from(src.read_byte()?);
    if components == 0 || len != 8 + 3 * components {
        bail!(FormatError::InvalidMarker);
    }

    let mut h_max = 1u32;
    let mut v_max = 1u32;
    for _ in 0..components {
        let _id = src.read_byte()?;
        let hv = src.read_byte()?;
        let _quant_table = src.read_byte()?;
        let h = u32::from(hv >> 4);
        let v = u32::from(hv & 0xF);
        if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
            bail!(FormatError::InvalidMarker);
        }
        h_max = h_max.max(h);
        v_max = v_max.max(v);
    }

    Ok(Frame { width, height, mcu_width: 8 * h_max, mcu_height: 8 * v_max })
}

//! A decoder input source with random access into restart-marker JPEGs.
//!
//! [`WindowSource`] implements the pull contract of the JPEG decoder
//! (`std::io::Read`) over a window of a tiled file: it serves the header,
//! then splices together the byte ranges of the selected restart segments,
//! seeking over everything in between. Because restart markers carry their
//! position modulo 8, splicing invalidates their numbering; the source
//! renumbers every marker it emits so the decoder sees the cyclic
//! RST0..RST7 sequence it expects.

use std::io::{self, Read, Seek, SeekFrom};

use log::warn;

use crate::error::{FormatError, Result, bail, err};
use crate::index::marker;

/// Size of the read buffer. Reads never straddle a segment jump, so a
/// single buffer fill always holds bytes from one contiguous byte range.
pub(crate) const INPUT_BUF_SIZE: usize = 4096;

/// An `io::Read` over a window of a tiled JPEG.
///
/// In passthrough mode (no positions) the whole stream is served untouched;
/// this mode backs the index scan. In windowed mode the source serves the
/// header with its frame dimensions rewritten to the window size, then
/// `rows` rows of `width` tiles starting at tile `topleft`, advancing by
/// `stride` tiles per row, and finally a clean EOI.
pub(crate) struct WindowSource<'a, R> {
    inner: R,
    positions: &'a [u64],
    width: usize,
    stride: usize,
    rows_remaining: usize,

    /// Patched header bytes, drained before any segment data.
    header: Vec<u8>,
    header_pos: usize,

    buf: [u8; INPUT_BUF_SIZE],
    buf_pos: usize,
    buf_len: usize,

    /// Byte offset in `inner` just past the last byte read into `buf`.
    file_pos: u64,
    stop_position: u64,
    /// Tile index of the most recent row start, seeded one stride before
    /// the window's top-left so the first advance lands on it.
    next_start_offset: isize,
    next_restart_marker: u8,
    start_of_file: bool,
    /// The stream has ended; a synthetic EOI has been served if needed.
    eof: bool,
}

impl<R: Read + Seek> WindowSource<'_, R> {
    /// A source that serves the whole stream, start to finish.
    pub(crate) fn passthrough(inner: R) -> WindowSource<'static, R> {
        WindowSource {
            inner,
            positions: &[],
            width: 0,
            stride: 0,
            rows_remaining: 0,
            header: Vec::new(),
            header_pos: 0,
            buf: [0; INPUT_BUF_SIZE],
            buf_pos: 0,
            buf_len: 0,
            file_pos: 0,
            stop_position: u64::MAX,
            next_start_offset: 0,
            next_restart_marker: 0,
            start_of_file: true,
            eof: false,
        }
    }

    /// A source that serves a `width` × `rows` tile window of a tiled JPEG.
    ///
    /// `positions` is the file's restart segment table; `topleft` indexes
    /// the window's first tile and `stride` is the file's full row width in
    /// tiles. The header is read and patched immediately so that the frame
    /// dimensions the decoder parses are `window_dims`, the pixel size of
    /// the window itself.
    pub(crate) fn windowed(
        mut inner: R,
        positions: &[u64],
        topleft: usize,
        width: usize,
        stride: usize,
        rows: usize,
        window_dims: (u16, u16),
    ) -> Result<WindowSource<'_, R>> {
        debug_assert!(!positions.is_empty());
        debug_assert!(topleft + (rows - 1) * stride + width <= positions.len());

        let mut header = vec![0; positions[0] as usize];
        inner.read_exact(&mut header)?;
        patch_frame_dimensions(&mut header, window_dims)?;

        Ok(WindowSource {
            inner,
            positions,
            width,
            stride,
            rows_remaining: rows,
            header,
            header_pos: 0,
            buf: [0; INPUT_BUF_SIZE],
            buf_pos: 0,
            buf_len: 0,
            // The header ends exactly at the first segment table entry, so
            // the first fill immediately advances to the window.
            file_pos: positions[0],
            stop_position: positions[0],
            next_start_offset: topleft as isize - stride as isize,
            next_restart_marker: 0,
            start_of_file: false,
            eof: false,
        })
    }

    /// The stream offset of the next unconsumed byte, i.e. the position in
    /// the underlying reader minus whatever is still buffered.
    pub(crate) fn file_position(&self) -> u64 {
        self.file_pos - (self.buf_len - self.buf_pos) as u64
    }

    /// Read one byte, treating end of stream as an error.
    pub(crate) fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0];
        match self.read(&mut byte)? {
            0 => Err(io::ErrorKind::UnexpectedEof.into()),
            _ => Ok(byte[0]),
        }
    }

    /// Read a big-endian u16, as used by all JPEG marker segment fields.
    pub(crate) fn read_u16(&mut self) -> io::Result<u16> {
        Ok(u16::from(self.read_byte()?) << 8 | u16::from(self.read_byte()?))
    }

    /// Discard `n` bytes, advancing within the buffer where possible and
    /// refilling (including across segment jumps) where not.
    pub(crate) fn skip(&mut self, mut n: usize) -> io::Result<()> {
        let in_header = self.header.len() - self.header_pos;
        let take = n.min(in_header);
        self.header_pos += take;
        n -= take;

        while n > 0 {
            let avail = self.buf_len - self.buf_pos;
            if avail >= n {
                self.buf_pos += n;
                return Ok(());
            }
            n -= avail;
            self.buf_pos = self.buf_len;
            self.fill()?;
            if self.buf_len == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }

        Ok(())
    }

    /// Move the segment cursor to the next row of the window, or end the
    /// stream when the window is exhausted.
    fn advance_window(&mut self) -> io::Result<()> {
        if self.rows_remaining == 0 {
            self.eof = true;
            return Ok(());
        }
        self.rows_remaining -= 1;

        self.next_start_offset += self.stride as isize;
        let idx = self.next_start_offset as usize;
        debug_assert!(idx < self.positions.len());

        let start = self.positions[idx];
        self.stop_position = match self.positions.get(idx + self.width) {
            // The final row must not leak its trailing restart marker: the
            // stream ends here, so cut two bytes before the next segment
            // and let the synthetic EOI terminate the image.
            Some(&next) if self.rows_remaining == 0 => next - 2,
            Some(&next) => next,
            None => u64::MAX,
        };

        self.inner.seek(SeekFrom::Start(start))?;
        self.file_pos = start;
        Ok(())
    }

    /// Refill the buffer with the next run of bytes.
    fn fill(&mut self) -> io::Result<()> {
        self.buf_pos = 0;
        self.buf_len = 0;
        if self.eof {
            return Ok(());
        }

        if self.file_pos == self.stop_position {
            self.advance_window()?;
            if self.eof {
                self.buf[0] = 0xFF;
                self.buf[1] = marker::EOI;
                self.buf_len = 2;
                return Ok(());
            }
        }

        let want = (self.stop_position - self.file_pos).min(INPUT_BUF_SIZE as u64) as usize;
        let mut n = self.inner.read(&mut self.buf[..want])?;

        if n == 0 {
            if self.start_of_file {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty JPEG input"));
            }
            warn!("unexpected end of JPEG stream, synthesizing EOI");
            self.buf[0] = 0xFF;
            self.buf[1] = marker::EOI;
            self.buf_len = 2;
            self.eof = true;
            return Ok(());
        }
        self.file_pos += n as u64;

        if !self.positions.is_empty() {
            let mut last_was_ff = false;
            for b in &mut self.buf[..n] {
                let orig = *b;
                if last_was_ff && (marker::RST0..marker::RST0 + 8).contains(&orig) {
                    *b = marker::RST0 | (self.next_restart_marker & 7);
                    self.next_restart_marker = (self.next_restart_marker + 1) % 8;
                }
                last_was_ff = orig == 0xFF;
            }

            // Never yield a trailing FF: the following byte might be a
            // restart marker number that a later fill would fail to
            // renumber. A lone FF in a single-byte fill can pass, as it
            // cannot be part of a marker without its second byte.
            if last_was_ff && n > 1 {
                n -= 1;
                self.inner.seek(SeekFrom::Current(-1))?;
                self.file_pos -= 1;
            }
        }

        self.buf_len = n;
        self.start_of_file = false;
        Ok(())
    }
}

impl<R: Read + Seek> Read for WindowSource<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        if self.header_pos < self.header.len() {
            let n = out.len().min(self.header.len() - self.header_pos);
            out[..n].copy_from_slice(&self.header[self.header_pos..self.header_pos + n]);
            self.header_pos += n;
            return Ok(n);
        }

        if self.buf_pos == self.buf_len {
            self.fill()?;
            if self.buf_len == 0 {
                return Ok(0);
            }
        }

        let n = out.len().min(self.buf_len - self.buf_pos);
        out[..n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        Ok(n)
    }
}

/// Rewrite the frame dimensions inside a raw JPEG header.
///
/// The decoder sizes its MCU grid from the SOF segment; pointing the frame
/// at the window's dimensions makes the spliced segment stream a complete,
/// consistent image.
fn patch_frame_dimensions(header: &mut [u8], (width, height): (u16, u16)) -> Result<()> {
    let mut i = 2; // past SOI, which the index scan has already verified
    while i + 4 <= header.len() {
        if header[i] != 0xFF {
            bail!(FormatError::InvalidMarker);
        }
        let m = header[i + 1];
        let len = usize::from(u16::from(header[i + 2]) << 8 | u16::from(header[i + 3]));
        if m == marker::SOF0 || m == marker::SOF1 {
            // Segment layout: length, precision, height, width, ...
            if i + 9 > header.len() {
                bail!(FormatError::InvalidMarker);
            }
            header[i + 5..i + 7].copy_from_slice(&height.to_be_bytes());
            header[i + 7..i + 9].copy_from_slice(&width.to_be_bytes());
            return Ok(());
        }
        i += 2 + len;
    }

    err!(FormatError::MissingFrameHeader)
}

/*!
A reader for pyramids of restart-marker tiled JPEGs.

Some scanned-image formats store one huge picture as a grid of plain JPEG
files per resolution, relying on two properties of the baseline format: a
restart marker resynchronizes the entropy coder every fixed number of MCUs,
and the IDCT can be truncated to produce output at 1/2, 1/4 or 1/8 scale
for free. `lamella` indexes every restart marker of every file once, and
from then on serves arbitrary rectangles at arbitrary levels by decoding
only the restart segments the rectangle touches, spliced into a small
standalone JPEG stream behind the decoder's back.

Opening a slide takes the fragment list describing the pyramid: which file
sits at which grid position of which depth, in `(z, x, y)` order. Each
input depth publishes four levels, one per native scale, sorted by width
descending.

# Example
```no_run
use lamella::{Fragment, OpenSettings, Slide};

let fragments = vec![Fragment { z: 0, x: 0, y: 0, path: "slide_0_0.jpg".into() }];
let slide = Slide::open(fragments, &OpenSettings::default()).unwrap();

let (width, height) = slide.dimensions(0);
println!("{width}x{height} across {} levels", slide.level_count());

let mut region = vec![0u32; 512 * 512];
slide.read_region(&mut region, 0, 0, 0, 512, 512).unwrap();
```

Pixels are written as 32-bit words in native endianness, laid out
`A R G B` from the most significant byte down, alpha always opaque — BGRA
byte order on little-endian machines.

# Concurrency
A [`Slide`] is immutable after opening and can be shared across threads;
every decode opens its own file handle, so concurrent `read_region` calls
do not contend. Distinct concurrent requests must write to distinct
buffers.
*/

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

use log::debug;

mod cache;
mod decode;
mod error;
mod index;
mod pyramid;
mod source;
#[cfg(test)]
mod testjpeg;

pub use cache::{TileCache, TileId};
pub use error::{DecodeError, Error, FormatError, LayoutError, Result};
pub use pyramid::Fragment;

use index::TiledJpeg;
use pyramid::Level;

/// Settings applied when opening a slide.
#[derive(Debug, Clone, Copy)]
pub struct OpenSettings {
    /// Whether degenerate pyramids should be rejected.
    ///
    /// When two depths publish the same width (which only happens for
    /// pathological inputs), the default is to silently keep the later
    /// one; strict mode turns this into [`LayoutError::DuplicateWidth`].
    pub strict: bool,
    /// Byte budget for the slide's tile cache.
    pub cache_capacity: usize,
}

impl Default for OpenSettings {
    fn default() -> Self {
        Self { strict: false, cache_capacity: 16 * 1024 * 1024 }
    }
}

/// Metadata of one published level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    /// Published width in pixels.
    pub width: u64,
    /// Published height in pixels.
    pub height: u64,
    /// The native decoder downscale this level is served at.
    pub scale_denom: u32,
    /// Total downsample relative to level 0.
    pub downsample: f64,
}

/// An opened pyramid of tiled JPEG files.
pub struct Slide {
    jpegs: Vec<TiledJpeg>,
    /// Sorted by published width, descending.
    levels: Vec<Level>,
    cache: TileCache,
}

impl Slide {
    /// Open a slide from its fragment list.
    ///
    /// Every file is indexed (its restart markers located and its geometry
    /// checked), then the level pyramid is built. Any rejected file or
    /// layout violation aborts the whole open.
    pub fn open(fragments: Vec<Fragment>, settings: &OpenSettings) -> Result<Slide> {
        let mut jpegs = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            debug!(
                "fragment z={} x={} y={}: {}",
                fragment.z,
                fragment.x,
                fragment.y,
                fragment.path.display()
            );
            jpegs.push(TiledJpeg::scan(fragment.path.clone())?);
        }

        let levels = pyramid::build_levels(&fragments, &jpegs, settings.strict)?;
        debug!("{} fragments -> {} levels", fragments.len(), levels.len());

        Ok(Slide { jpegs, levels, cache: TileCache::new(settings.cache_capacity) })
    }

    /// Number of published levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Published dimensions of a level, or `(0, 0)` if `level` is out of
    /// range.
    pub fn dimensions(&self, level: usize) -> (u64, u64) {
        self.levels.get(level).map_or((0, 0), |l| (l.published_w(), l.published_h()))
    }

    /// Metadata of a level, or `None` if `level` is out of range.
    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        self.levels.get(level).map(|l| LevelInfo {
            width: l.published_w(),
            height: l.published_h(),
            scale_denom: l.scale_denom,
            downsample: l.no_scale_denom_downsample * f64::from(l.scale_denom),
        })
    }

    /// The comment of the first JPEG, if it carries one.
    pub fn comment(&self) -> Option<&str> {
        self.jpegs.first().and_then(|j| j.comment.as_deref())
    }

    /// The slide's tile cache, for callers that keep decoded tiles around.
    pub fn tile_cache(&self) -> &TileCache {
        &self.cache
    }

    /// Read a `w` x `h` rectangle of a level into `dest`.
    ///
    /// `x` and `y` address the rectangle's top-left corner in level 0
    /// coordinates; they are translated through the level's downsample and
    /// rounded down to a scaled-pixel boundary. `w` and `h` count pixels
    /// of the chosen level itself. `dest` must hold at least `w * h` words
    /// and is written row-major with pitch `w`. Parts of the rectangle
    /// outside the level are left untouched, so callers wanting defined
    /// contents there should clear the buffer first. An out-of-range
    /// `level` writes nothing.
    pub fn read_region(
        &self,
        dest: &mut [u32],
        x: i64,
        y: i64,
        level: usize,
        w: u32,
        h: u32,
    ) -> Result<()> {
        let Some(level) = self.levels.get(level) else {
            return Ok(());
        };
        let s = i64::from(level.scale_denom);
        let d = level.no_scale_denom_downsample;
        let image00_w = i64::from(level.image00_w);
        let image00_h = i64::from(level.image00_h);

        // Translate into this level's pre-scale space, rounded down to a
        // multiple of the scale denominator so the decoder can produce the
        // scaled pixel exactly. The denominator itself is the decoder's
        // business; it enters here only through `w` and `h`.
        let origin_y = ((y as f64 / d) as i64 / s) * s;
        let end_src_y = (origin_y + i64::from(h) * s).min(level.pixel_h as i64);
        let mut src_y = origin_y.max(0);
        let mut dest_y = (src_y - origin_y) / s;

        // Walk the file grid row-major over the intersected area. The grid
        // pitch is the size of file (0, 0); only the rightmost column and
        // bottom row may be smaller, clipped by the level extent.
        while src_y < end_src_y {
            let file_y = src_y / image00_h;
            let level_origin_y = file_y * image00_h;
            let end_in_file_y = ((file_y + 1) * image00_h).min(end_src_y) - level_origin_y;
            let start_in_file_y = src_y - level_origin_y;
            let dest_h = (end_in_file_y - start_in_file_y) / s;

            let origin_x = ((x as f64 / d) as i64 / s) * s;
            let end_src_x = (origin_x + i64::from(w) * s).min(level.pixel_w as i64);
            let mut src_x = origin_x.max(0);
            let mut dest_x = (src_x - origin_x) / s;

            while src_x < end_src_x {
                let file_x = src_x / image00_w;
                let level_origin_x = file_x * image00_w;
                let end_in_file_x = ((file_x + 1) * image00_w).min(end_src_x) - level_origin_x;
                let start_in_file_x = src_x - level_origin_x;
                let dest_w = (end_in_file_x - start_in_file_x) / s;

                let index = level.jpegs[(file_y * i64::from(level.jpegs_across) + file_x) as usize];
                let offset = (dest_y * i64::from(w) + dest_x) as usize;
                decode::read_window(
                    &self.jpegs[index as usize],
                    &mut dest[offset..],
                    start_in_file_x as u32,
                    start_in_file_y as u32,
                    level.scale_denom,
                    dest_w as u32,
                    dest_h as u32,
                    w as usize,
                )?;

                dest_x += dest_w;
                src_x = level_origin_x + end_in_file_x;
            }

            dest_y += dest_h;
            src_y = level_origin_y + end_in_file_y;
        }

        Ok(())
    }
}

//! Building the level pyramid from an ordered fragment list.

use std::path::PathBuf;

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{LayoutError, Result, bail};
use crate::index::TiledJpeg;

/// One input JPEG file and its place in the pyramid.
///
/// `z` is the pyramid depth (0 is the highest resolution); `(x, y)` is the
/// file's position in that depth's file grid. Fragments must be supplied in
/// `(z, x, y)` lexicographic order with every grid position present.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Pyramid depth, 0 being the highest resolution.
    pub z: u32,
    /// Column in the depth's file grid.
    pub x: u32,
    /// Row in the depth's file grid.
    pub y: u32,
    /// The JPEG file for this grid cell.
    pub path: PathBuf,
}

/// One published resolution level.
///
/// Each input depth yields four levels, one per scale denominator, sharing
/// the same file grid; a level's published dimensions are its pixel extent
/// divided by `scale_denom`.
pub(crate) struct Level {
    /// Indices into the backend's flat file array, row-major over the grid.
    pub(crate) jpegs: Vec<u32>,
    pub(crate) jpegs_across: u32,
    pub(crate) jpegs_down: u32,
    /// Pixel extent before any decoder scaling.
    pub(crate) pixel_w: u64,
    pub(crate) pixel_h: u64,
    /// Size of the grid's (0, 0) file, used as the pitch for file-grid
    /// arithmetic. Only the rightmost column and bottom row may differ.
    pub(crate) image00_w: u32,
    pub(crate) image00_h: u32,
    /// Native decoder downscale, one of 1, 2, 4, 8.
    pub(crate) scale_denom: u32,
    /// Downsample relative to depth 0, before `scale_denom` is applied.
    pub(crate) no_scale_denom_downsample: f64,
}

impl Level {
    pub(crate) fn published_w(&self) -> u64 {
        self.pixel_w / u64::from(self.scale_denom)
    }

    pub(crate) fn published_h(&self) -> u64 {
        self.pixel_h / u64::from(self.scale_denom)
    }
}

/// Is `(z, x, y)` the successor of `prev` in fragment order?
fn is_zxy_successor(prev: (u32, u32, u32), (z, x, y): (u32, u32, u32)) -> bool {
    let (pz, px, py) = prev;
    if z == pz + 1 {
        return x == 0 && y == 0;
    }
    if z != pz {
        return false;
    }
    if y == py + 1 {
        return x == 0;
    }
    if y != py {
        return false;
    }
    x == px + 1
}

/// Build the sorted level array from the fragment list and the aligned
/// flat file array (fragment `i` describes `jpegs[i]`).
pub(crate) fn build_levels(
    fragments: &[Fragment],
    jpegs: &[TiledJpeg],
    strict: bool,
) -> Result<Vec<Level>> {
    assert_eq!(fragments.len(), jpegs.len());
    if fragments.is_empty() {
        bail!(LayoutError::Empty);
    }

    let mut map: FxHashMap<u64, Level> = FxHashMap::default();

    let mut prev: Option<(u32, u32, u32)> = None;
    let mut level_pixel_w = 0u64;
    let mut level_pixel_h = 0u64;
    let mut image00_w = 0u32;
    let mut image00_h = 0u32;
    let mut depth0_pixel_w = 0u64;
    let mut first = 0usize;

    for (i, fr) in fragments.iter().enumerate() {
        let jpeg = &jpegs[i];

        let in_order = match prev {
            None => (fr.z, fr.x, fr.y) == (0, 0, 0),
            Some(p) => is_zxy_successor(p, (fr.z, fr.x, fr.y)),
        };
        if !in_order {
            bail!(LayoutError::FragmentOutOfOrder);
        }

        if fr.x == 0 && fr.y == 0 {
            image00_w = jpeg.width;
            image00_h = jpeg.height;
        }
        // The top row's widths and the left column's heights sum to the
        // level's pixel extent.
        if fr.y == 0 {
            level_pixel_w += u64::from(jpeg.width);
        }
        if fr.x == 0 {
            level_pixel_h += u64::from(jpeg.height);
        }

        let depth_ends = i + 1 == fragments.len() || fragments[i + 1].z != fr.z;
        if depth_ends {
            if fr.z == 0 {
                depth0_pixel_w = level_pixel_w;
            }

            let across = fr.x + 1;
            let down = fr.y + 1;
            if (i + 1 - first) as u64 != u64::from(across) * u64::from(down) {
                bail!(LayoutError::IncompleteGrid);
            }
            // Grid arithmetic uses the (0, 0) file as pitch, so everything
            // except the rightmost column and bottom row must match it.
            for (fragment, jpeg) in fragments[first..=i].iter().zip(&jpegs[first..=i]) {
                if (fragment.x + 1 < across && jpeg.width != image00_w)
                    || (fragment.y + 1 < down && jpeg.height != image00_h)
                {
                    bail!(LayoutError::NonUniformFragments);
                }
            }
            let indices: Vec<u32> = (first as u32..=i as u32).collect();

            // The decoder can downscale by 1, 2, 4 or 8 nearly for free by
            // truncating the IDCT, so each depth publishes four levels.
            let mut scale_denom = 1u32;
            while scale_denom <= 8 {
                let level = Level {
                    jpegs: indices.clone(),
                    jpegs_across: across,
                    jpegs_down: down,
                    pixel_w: level_pixel_w,
                    pixel_h: level_pixel_h,
                    image00_w,
                    image00_h,
                    scale_denom,
                    no_scale_denom_downsample: depth0_pixel_w as f64 / level_pixel_w as f64,
                };
                let key = level.published_w();
                if let Some(old) = map.insert(key, level) {
                    if strict {
                        bail!(LayoutError::DuplicateWidth);
                    }
                    debug!(
                        "width {key} published twice, dropping the level at scale 1/{}",
                        old.scale_denom
                    );
                }
                scale_denom <<= 1;
            }

            level_pixel_w = 0;
            level_pixel_h = 0;
            image00_w = 0;
            image00_h = 0;
            first = i + 1;
        }

        prev = Some((fr.z, fr.x, fr.y));
    }

    let mut levels: Vec<Level> = map.into_values().collect();
    levels.sort_by(|a, b| b.published_w().cmp(&a.published_w()));
    Ok(levels)
}

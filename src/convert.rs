//! Pixel conversion for 8 bit buffers.
//!
//! Bayer mosaics are demosaiced with the `bayer` crate; mono and RGB go
//! through the `image` buffers.

use std::io::Cursor;

use bayer as wang_debayer;
use image::{DynamicImage, GrayImage, RgbImage};

use crate::image::ColorProcessing;
use crate::{Error, Result};

/// 2×2 color filter layouts, named after the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPattern {
    Rg,
    Gb,
    Gr,
    Bg,
}

impl BayerPattern {
    /// Index (0 red, 1 green, 2 blue) of the channel sampled at `(x, y)`.
    pub fn channel_index(self, x: usize, y: usize) -> usize {
        let (rx, ry) = match self {
            BayerPattern::Rg => (0, 0),
            BayerPattern::Gr => (1, 0),
            BayerPattern::Bg => (1, 1),
            BayerPattern::Gb => (0, 1),
        };
        match (x % 2 == rx, y % 2 == ry) {
            (true, true) => 0,
            (false, false) => 2,
            _ => 1,
        }
    }

    fn cfa(self) -> wang_debayer::CFA {
        match self {
            BayerPattern::Rg => wang_debayer::CFA::RGGB,
            BayerPattern::Gb => wang_debayer::CFA::GBRG,
            BayerPattern::Gr => wang_debayer::CFA::GRBG,
            BayerPattern::Bg => wang_debayer::CFA::BGGR,
        }
    }
}

/// Demosaic a tightly packed 8 bit mosaic into RGB8.
pub fn demosaic(
    raw: &[u8],
    width: u32,
    height: u32,
    pattern: BayerPattern,
    processing: ColorProcessing,
) -> Result<Vec<u8>> {
    let alg = match processing {
        ColorProcessing::HqLinear => wang_debayer::Demosaic::Linear,
        ColorProcessing::NearestNeighbor => wang_debayer::Demosaic::NearestNeighbour,
    };
    let (w, h) = (width as usize, height as usize);
    if raw.len() != w * h {
        return Err(size_mismatch());
    }
    let mut rgb = vec![0u8; w * h * 3];
    {
        let mut dst =
            wang_debayer::RasterMut::new(w, h, wang_debayer::RasterDepth::Depth8, &mut rgb);
        wang_debayer::run_demosaic(
            &mut Cursor::new(raw),
            wang_debayer::BayerDepth::Depth8,
            pattern.cfa(),
            alg,
            &mut dst,
        )?;
    }
    Ok(rgb)
}

fn size_mismatch() -> Error {
    Error::Sdk("image buffer does not match its dimensions".into())
}

pub fn mono_to_rgb(width: u32, height: u32, mono: Vec<u8>) -> Result<Vec<u8>> {
    let gray = GrayImage::from_raw(width, height, mono).ok_or_else(size_mismatch)?;
    Ok(DynamicImage::ImageLuma8(gray).to_rgb8().into_raw())
}

pub fn rgb_to_mono(width: u32, height: u32, rgb: Vec<u8>) -> Result<Vec<u8>> {
    let rgb = RgbImage::from_raw(width, height, rgb).ok_or_else(size_mismatch)?;
    Ok(DynamicImage::ImageRgb8(rgb).to_luma8().into_raw())
}

/// Swap the first and third channel of every pixel (BGR ↔ RGB).
pub fn swap_red_blue(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect()
}

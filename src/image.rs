/*
 * Copyright (c) 2022. XIMEA GmbH - All Rights Reserved
 */

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, GrayImage, RgbImage};

use crate::convert::{self, BayerPattern};
use crate::{Error, Result};

/// Layout of the pixels in an [Image] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    Mono8,
    BayerRG8,
    BayerGB8,
    BayerGR8,
    BayerBG8,
    #[default]
    RGB8,
    BGR8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 7] = [
        PixelFormat::Mono8,
        PixelFormat::BayerRG8,
        PixelFormat::BayerGB8,
        PixelFormat::BayerGR8,
        PixelFormat::BayerBG8,
        PixelFormat::RGB8,
        PixelFormat::BGR8,
    ];

    /// GenICam symbolic name, as used by the `PixelFormat` node.
    pub fn symbolic(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerBG8 => "BayerBG8",
            PixelFormat::RGB8 => "RGB8",
            PixelFormat::BGR8 => "BGR8",
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::RGB8 | PixelFormat::BGR8 => 3,
            _ => 1,
        }
    }

    pub fn bayer_pattern(self) -> Option<BayerPattern> {
        match self {
            PixelFormat::BayerRG8 => Some(BayerPattern::Rg),
            PixelFormat::BayerGB8 => Some(BayerPattern::Gb),
            PixelFormat::BayerGR8 => Some(BayerPattern::Gr),
            PixelFormat::BayerBG8 => Some(BayerPattern::Bg),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbolic())
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.symbolic() == s)
            .ok_or_else(|| Error::UnknownPixelFormat(s.to_string()))
    }
}

/// Transfer status of an [Image].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Complete,
    DataMissing,
    DataOverrun,
    FrameTimeout,
    InsufficientBuffer,
}

impl ImageStatus {
    pub fn description(self) -> &'static str {
        match self {
            ImageStatus::Complete => "Image is complete",
            ImageStatus::DataMissing => "Image data is incomplete, packets are missing",
            ImageStatus::DataOverrun => "Image data was overrun",
            ImageStatus::FrameTimeout => "Frame was not received before the transfer timed out",
            ImageStatus::InsufficientBuffer => "Image buffer too small for the frame",
        }
    }
}

/// Demosaic quality used when converting from a Bayer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorProcessing {
    NearestNeighbor,
    #[default]
    HqLinear,
}

/// An image as it is delivered by the camera.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    data: Vec<u8>,
    status: ImageStatus,
    frame_id: u64,
    exposure_time_us: f64,
    timestamp_ns: u64,
}

impl Image {
    /// Wrap a tightly packed pixel buffer.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * pixel_format.bytes_per_pixel();
        if data.len() != expected {
            return Err(Error::Sdk(format!(
                "buffer of {} bytes for {width}x{height} {pixel_format}, expected {expected}",
                data.len()
            )));
        }
        Ok(Image {
            width,
            height,
            pixel_format,
            data,
            status: ImageStatus::Complete,
            frame_id: 0,
            exposure_time_us: 0.0,
            timestamp_ns: 0,
        })
    }

    pub(crate) fn with_frame_info(
        mut self,
        frame_id: u64,
        exposure_time_us: f64,
        timestamp_ns: u64,
    ) -> Self {
        self.frame_id = frame_id;
        self.exposure_time_us = exposure_time_us;
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub(crate) fn with_status(mut self, status: ImageStatus) -> Self {
        self.status = status;
        self
    }

    /// Get a pixel from the image.
    ///
    /// # Arguments
    ///
    /// * `x`: Horizontal coordinate of the requested pixel.
    /// * `y`: Vertical coordinate of the requested pixel.
    ///
    /// returns: Option<&[u8]> The channels of the pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.pixel_format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        self.data.get(offset..offset + bpp)
    }

    /// Get the width of this image in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the height of this image
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Format of image data
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Frame number, counted from the start of the session.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Exposure time for this image in us
    pub fn exposure_time_us(&self) -> f64 {
        self.exposure_time_us
    }

    /// Device timestamp in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn status(&self) -> ImageStatus {
        self.status
    }

    pub fn is_incomplete(&self) -> bool {
        self.status != ImageStatus::Complete
    }

    /// Get the raw image data as a slice.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert into `target`, producing a new image.
    ///
    /// Incomplete images are refused. Only `RGB8` and `Mono8` are supported
    /// as targets.
    pub fn convert(&self, target: PixelFormat, processing: ColorProcessing) -> Result<Image> {
        if self.is_incomplete() {
            return Err(Error::IncompleteImage(self.status.description().to_string()));
        }
        let (w, h) = (self.width, self.height);
        let rgb = || -> Result<Vec<u8>> {
            match (self.pixel_format.bayer_pattern(), self.pixel_format) {
                (Some(pattern), _) => convert::demosaic(&self.data, w, h, pattern, processing),
                (None, PixelFormat::Mono8) => convert::mono_to_rgb(w, h, self.data.clone()),
                (None, PixelFormat::BGR8) => Ok(convert::swap_red_blue(&self.data)),
                (None, _) => Ok(self.data.clone()),
            }
        };
        let data = match target {
            PixelFormat::RGB8 => rgb()?,
            PixelFormat::Mono8 if self.pixel_format == PixelFormat::Mono8 => self.data.clone(),
            PixelFormat::Mono8 => convert::rgb_to_mono(w, h, rgb()?)?,
            _ => {
                return Err(Error::UnsupportedConversion {
                    from: self.pixel_format.to_string(),
                    to: target.to_string(),
                })
            }
        };
        let mut converted = Image::new(self.width, self.height, target, data)?;
        converted.frame_id = self.frame_id;
        converted.exposure_time_us = self.exposure_time_us;
        converted.timestamp_ns = self.timestamp_ns;
        Ok(converted)
    }

    /// Save to `path`, the file format follows the extension.
    ///
    /// The image must already be `RGB8` or `Mono8`, see [Image::convert].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        match self.pixel_format {
            PixelFormat::Mono8 => GrayImage::try_from(self)?.save(path)?,
            _ => RgbImage::try_from(self)?.save(path)?,
        }
        Ok(())
    }

    /// Save as JPEG with an explicit quality (1-100).
    pub fn save_jpeg<P: AsRef<Path>>(&self, path: P, quality: u8) -> Result<()> {
        let color = match self.pixel_format {
            PixelFormat::RGB8 => ColorType::Rgb8,
            PixelFormat::Mono8 => ColorType::L8,
            other => {
                return Err(Error::UnsupportedConversion {
                    from: other.to_string(),
                    to: "JPEG".to_string(),
                })
            }
        };
        let mut writer = BufWriter::new(File::create(path)?);
        JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100)).encode(
            &self.data,
            self.width,
            self.height,
            color,
        )?;
        // dropping a BufWriter swallows write errors
        writer.flush()?;
        Ok(())
    }
}

impl TryFrom<&Image> for RgbImage {
    type Error = Error;

    /// Converts an `RGB8` image to an [RgbImage]
    fn try_from(image: &Image) -> Result<Self> {
        if image.pixel_format != PixelFormat::RGB8 {
            return Err(Error::UnsupportedConversion {
                from: image.pixel_format.to_string(),
                to: "RgbImage".to_string(),
            });
        }
        RgbImage::from_raw(image.width, image.height, image.data.clone())
            .ok_or_else(|| Error::Sdk("image buffer does not match its dimensions".into()))
    }
}

impl TryFrom<&Image> for GrayImage {
    type Error = Error;

    fn try_from(image: &Image) -> Result<Self> {
        if image.pixel_format != PixelFormat::Mono8 {
            return Err(Error::UnsupportedConversion {
                from: image.pixel_format.to_string(),
                to: "GrayImage".to_string(),
            });
        }
        GrayImage::from_raw(image.width, image.height, image.data.clone())
            .ok_or_else(|| Error::Sdk("image buffer does not match its dimensions".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bayer(width: u32, height: u32) -> Image {
        let data = (0..width * height).map(|i| (i % 251) as u8).collect();
        Image::new(width, height, PixelFormat::BayerRG8, data).unwrap()
    }

    #[test]
    fn pixel_format_symbolic_round_trip() {
        for f in PixelFormat::ALL {
            assert_eq!(f.symbolic().parse::<PixelFormat>().unwrap(), f);
        }
        assert!(matches!(
            "YUV422".parse::<PixelFormat>(),
            Err(Error::UnknownPixelFormat(_))
        ));
    }

    #[test]
    fn buffer_size_is_checked() {
        assert!(Image::new(4, 4, PixelFormat::RGB8, vec![0; 16]).is_err());
    }

    #[test]
    fn pixel_bounds() {
        let img = Image::new(2, 1, PixelFormat::RGB8, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(img.pixel(1, 0), Some(&[4u8, 5, 6][..]));
        assert_eq!(img.pixel(2, 0), None);
        assert_eq!(img.pixel(0, 1), None);
    }

    #[test]
    fn convert_bayer_to_rgb_keeps_frame_info() {
        let img = bayer(8, 6).with_frame_info(7, 5e5, 1234);
        let rgb = img.convert(PixelFormat::RGB8, ColorProcessing::HqLinear).unwrap();
        assert_eq!(rgb.pixel_format(), PixelFormat::RGB8);
        assert_eq!(rgb.data().len(), 8 * 6 * 3);
        assert_eq!(rgb.frame_id(), 7);
        assert_eq!(rgb.timestamp_ns(), 1234);
    }

    #[test]
    fn convert_refuses_incomplete() {
        let img = bayer(4, 4).with_status(ImageStatus::DataMissing);
        assert!(img.is_incomplete());
        assert!(matches!(
            img.convert(PixelFormat::RGB8, ColorProcessing::HqLinear),
            Err(Error::IncompleteImage(_))
        ));
    }

    #[test]
    fn convert_to_bayer_is_unsupported() {
        let img = bayer(4, 4);
        assert!(matches!(
            img.convert(PixelFormat::BayerBG8, ColorProcessing::HqLinear),
            Err(Error::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn save_requires_displayable_format() {
        let dir = tempfile::tempdir().unwrap();
        let img = bayer(4, 4);
        assert!(img.save(dir.path().join("raw.jpg")).is_err());
    }

    #[test]
    fn save_jpeg_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = bayer(16, 8)
            .convert(PixelFormat::RGB8, ColorProcessing::HqLinear)
            .unwrap();
        let path = dir.path().join("frame.jpg");
        rgb.save(&path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (16, 8));

        let q_path = dir.path().join("frame_q.jpg");
        rgb.save_jpeg(&q_path, 90).unwrap();
        assert!(q_path.metadata().unwrap().len() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn save_jpeg_reports_full_device() {
        let rgb = Image::new(8, 8, PixelFormat::RGB8, vec![128; 8 * 8 * 3]).unwrap();
        assert!(matches!(
            rgb.save_jpeg("/dev/full", 90),
            Err(Error::Io(_) | Error::Image(_))
        ));
    }

    #[test]
    fn save_mono_png() {
        let dir = tempfile::tempdir().unwrap();
        let mono = Image::new(3, 2, PixelFormat::Mono8, vec![0, 50, 100, 150, 200, 250]).unwrap();
        let path = dir.path().join("mono.png");
        mono.save(&path).unwrap();
        let loaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(loaded.into_raw(), vec![0, 50, 100, 150, 200, 250]);
    }
}

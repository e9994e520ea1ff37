//! Test fixtures: synthetic source images with known dimensions

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A source image and the derivative sizes it should produce
#[derive(Debug, Clone)]
pub struct TestImageFixture {
    pub filename: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

pub const TEST_FIXTURES: &[TestImageFixture] = &[
    // 2:1 landscape JPEG, default sizes downscale
    TestImageFixture {
        filename: "landscape.jpg",
        width: 1000,
        height: 500,
        format: ImageFormat::Jpeg,
    },
    // Square PNG, used for upscaling
    TestImageFixture {
        filename: "square.png",
        width: 500,
        height: 500,
        format: ImageFormat::Png,
    },
    // 2:3 portrait PNG
    TestImageFixture {
        filename: "portrait.png",
        width: 300,
        height: 450,
        format: ImageFormat::Png,
    },
];

impl TestImageFixture {
    /// Encode a gradient image with this fixture's dimensions and format.
    pub fn encode(&self) -> Vec<u8> {
        encode_image(self.width, self.height, self.format)
    }

    /// Expected derivative height for `target_width` (floored).
    pub fn expected_height(&self, target_width: u32) -> u32 {
        (self.height as f64 * (target_width as f64 / self.width as f64)).floor() as u32
    }
}

pub fn fixture(filename: &str) -> &'static TestImageFixture {
    TEST_FIXTURES
        .iter()
        .find(|f| f.filename == filename)
        .unwrap_or_else(|| panic!("unknown fixture {filename}"))
}

pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, format)
        .expect("encode fixture");
    out.into_inner()
}

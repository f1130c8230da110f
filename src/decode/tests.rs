use super::*;
use crate::camera::PixelFormat;
use image::{Rgb, RgbImage};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 16 % 256) as u8, (y * 16 % 256) as u8, 128])
    })
}

fn close(a: u8, b: u8, tolerance: u8) -> bool {
    a.abs_diff(b) <= tolerance
}

#[test]
fn test_software_decoder_decodes_jpeg() {
    let source = gradient(32, 16);
    let jpeg = encode_jpeg(&source, 95).unwrap();
    let raw = RawFrame::new(jpeg, 32, 16, PixelFormat::Mjpeg);

    let mut decoder = SoftwareDecoder::new();
    let image = decoder.decode(&raw).unwrap();

    assert_eq!(image.dimensions(), (32, 16));
}

#[test]
fn test_software_decoder_rejects_corrupt_jpeg() {
    let raw = RawFrame::new(vec![0xFF, 0xD8, 0x00, 0x01, 0x02], 32, 16, PixelFormat::Mjpeg);

    let mut decoder = SoftwareDecoder::new();
    assert!(matches!(
        decoder.decode(&raw),
        Err(DecodeError::Corrupt { .. })
    ));

    // Still usable after a failure
    let jpeg = encode_jpeg(&gradient(8, 8), 90).unwrap();
    assert!(decoder
        .decode(&RawFrame::new(jpeg, 8, 8, PixelFormat::Mjpeg))
        .is_ok());
}

#[test]
fn test_software_decoder_rejects_short_i420() {
    let raw = RawFrame::new(vec![0u8; 10], 4, 4, PixelFormat::Yuv420);

    let mut decoder = SoftwareDecoder::new();
    match decoder.decode(&raw) {
        Err(DecodeError::ShortBuffer { expected, actual }) => {
            assert_eq!(expected, 24);
            assert_eq!(actual, 10);
        }
        other => panic!("Unexpected decode result: {:?}", other.map(|i| i.dimensions())),
    }
}

#[test]
fn test_i420_conversion_preserves_flat_colors() {
    for color in [[0u8, 0, 0], [255, 255, 255], [200, 40, 40], [30, 160, 220]] {
        let source = RgbImage::from_pixel(6, 4, Rgb(color));
        let yuv = rgb_to_i420(&source);
        assert_eq!(Some(yuv.len()), PixelFormat::Yuv420.frame_size(6, 4));

        let back = i420_to_rgb(&yuv, 6, 4);
        let pixel = back.get_pixel(3, 2);
        for channel in 0..3 {
            assert!(
                close(pixel[channel], color[channel], 4),
                "{:?} became {:?}",
                color,
                pixel
            );
        }
    }
}

#[test]
fn test_software_decoder_decodes_i420() {
    let source = RgbImage::from_pixel(5, 3, Rgb([90, 90, 90]));
    let raw = RawFrame::new(rgb_to_i420(&source), 5, 3, PixelFormat::Yuv420);

    let image = SoftwareDecoder::new().decode(&raw).unwrap();
    assert_eq!(image.dimensions(), (5, 3));
    assert!(close(image.get_pixel(4, 2)[0], 90, 3));
}

#[test]
fn test_decoder_kind_availability() {
    assert!(DecoderKind::Software.is_available());
    assert!(build_decoder(DecoderKind::Software).is_ok());

    if !DecoderKind::Hardware.is_available() {
        assert!(build_decoder(DecoderKind::Hardware).is_err());
    }
}

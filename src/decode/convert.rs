use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageResult, Rgb, RgbImage};

/// JPEG quality used for re-encoded frames
pub const JPEG_QUALITY: u8 = 85;

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert planar I420 bytes to RGB (BT.601, limited range).
///
/// `data` must hold at least `PixelFormat::Yuv420.frame_size(width, height)`
/// bytes; the caller checks the length.
pub fn i420_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let y_plane = &data[..w * h];
    let u_plane = &data[w * h..w * h + cw * ch];
    let v_plane = &data[w * h + cw * ch..w * h + 2 * cw * ch];

    RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane[y * w + x] as i32 - 16;
        let chroma = (y / 2) * cw + x / 2;
        let u = u_plane[chroma] as i32 - 128;
        let v = v_plane[chroma] as i32 - 128;

        let c = 298 * luma;
        Rgb([
            clamp((c + 409 * v + 128) >> 8),
            clamp((c - 100 * u - 208 * v + 128) >> 8),
            clamp((c + 516 * u + 128) >> 8),
        ])
    })
}

/// Convert an RGB image to planar I420 bytes (BT.601, limited range).
///
/// Chroma is taken from the top-left pixel of each 2x2 block.
pub fn rgb_to_i420(image: &RgbImage) -> Vec<u8> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut out = vec![0u8; w * h + 2 * cw * ch];
    let (y_plane, chroma) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(i32::from);
        let (x, y) = (x as usize, y as usize);

        y_plane[y * w + x] = clamp(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);

        if x % 2 == 0 && y % 2 == 0 {
            let index = (y / 2) * cw + x / 2;
            u_plane[index] = clamp(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
            v_plane[index] = clamp(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
        }
    }

    out
}

/// Encode an RGB image as a baseline JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(out)
}

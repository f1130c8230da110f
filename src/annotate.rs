use crate::error::AnnotateError;
use crate::frame::DecodedImage;
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use image::Rgb;
use imageproc::drawing::{draw_text_mut, text_size};
use rusttype::{Font, Scale};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Brightness-sum distance below which the inverse color is not legible
const CONTRAST_THRESHOLD: i32 = 150;

/// Channel sum above which a background counts as bright (3 * 255 / 2)
const BRIGHT_SUM: i32 = 382;

/// Gap between the text and the image edge in pixels
const MARGIN: i32 = 8;

/// Where overlay text is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    TopRight,
    TopLeft,
    BottomLeft,
    BottomRight,
    Center,
}

/// When the measured frame rate is appended to the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FpsDisplay {
    Never,
    /// Only while frames take longer than the frame budget
    WarnOnly,
    Always,
}

impl FpsDisplay {
    pub fn should_show(&self, over_budget: bool) -> bool {
        match self {
            FpsDisplay::Never => false,
            FpsDisplay::WarnOnly => over_budget,
            FpsDisplay::Always => true,
        }
    }
}

/// Resolve configured timezone, falling back to UTC on parse errors
pub fn resolve_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Invalid overlay timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}

/// Legible text color for a background whose average color is `average`.
///
/// Uses the inverse color unless it is close in brightness to the
/// background, in which case pure black or white is used.
pub fn pick_text_color(average: Rgb<u8>) -> Rgb<u8> {
    let inverse = Rgb(average.0.map(|c| 255 - c));
    let sum = |color: Rgb<u8>| color.0.iter().map(|&c| c as i32).sum::<i32>();

    let average_sum = sum(average);
    if (average_sum - sum(inverse)).abs() < CONTRAST_THRESHOLD {
        if average_sum > BRIGHT_SUM {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    } else {
        inverse
    }
}

/// Average color of the `width`x`height` rectangle at (`x`, `y`), clipped to
/// the image
pub fn average_color(image: &DecodedImage, x: i32, y: i32, width: u32, height: u32) -> Rgb<u8> {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = (x.max(0) as u32 + width).min(image.width());
    let y1 = (y.max(0) as u32 + height).min(image.height());

    let mut totals = [0u64; 3];
    let mut count = 0u64;
    for py in y0..y1 {
        for px in x0..x1 {
            let pixel = image.get_pixel(px, py);
            for (total, &channel) in totals.iter_mut().zip(pixel.0.iter()) {
                *total += channel as u64;
            }
            count += 1;
        }
    }

    if count == 0 {
        return Rgb([0, 0, 0]);
    }
    Rgb(totals.map(|total| (total / count) as u8))
}

/// Top-left corner of a `text_width`x`text_height` box placed at `position`
pub fn text_origin(
    position: Position,
    image_width: u32,
    image_height: u32,
    text_width: i32,
    text_height: i32,
) -> (i32, i32) {
    let (w, h) = (image_width as i32, image_height as i32);
    match position {
        Position::TopLeft => (MARGIN, MARGIN),
        Position::TopRight => (w - text_width - MARGIN, MARGIN),
        Position::BottomLeft => (MARGIN, h - text_height - MARGIN),
        Position::BottomRight => (w - text_width - MARGIN, h - text_height - MARGIN),
        Position::Center => ((w - text_width) / 2, (h - text_height) / 2),
    }
}

/// Draws timestamp and diagnostic text onto decoded frames
pub struct Annotator {
    font: Font<'static>,
    scale: Scale,
    timezone: Tz,
}

impl Annotator {
    /// Load the TrueType font at `font_path`.
    ///
    /// A missing or unreadable font fails here rather than on the first frame.
    pub fn open(font_path: &Path, font_size: f32, timezone: &str) -> Result<Self, AnnotateError> {
        let font_data = std::fs::read(font_path).map_err(|source| AnnotateError::FontRead {
            path: font_path.to_path_buf(),
            source,
        })?;
        let font = Font::try_from_vec(font_data).ok_or_else(|| AnnotateError::FontParse {
            path: font_path.to_path_buf(),
        })?;

        debug!(
            "Loaded overlay font {} at {}px",
            font_path.display(),
            font_size
        );

        Ok(Self {
            font,
            scale: Scale::uniform(font_size),
            timezone: resolve_timezone(timezone),
        })
    }

    /// Timestamp text for a frame taken at `time`
    pub fn timestamp_text<T: TimeZone>(&self, time: &DateTime<T>) -> String {
        time.with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Overlay text for a frame, with the frame rate appended when given
    pub fn overlay_text<T: TimeZone>(&self, time: &DateTime<T>, fps: Option<f64>) -> String {
        let timestamp = self.timestamp_text(time);
        match fps {
            Some(fps) => format!("{} {:.1} fps", timestamp, fps),
            None => timestamp,
        }
    }

    /// Draw `text` at `position` in place
    pub fn annotate(&self, position: Position, text: &str, image: &mut DecodedImage) {
        let (text_width, text_height) = text_size(self.scale, &self.font, text);
        let (x, y) = text_origin(
            position,
            image.width(),
            image.height(),
            text_width,
            text_height,
        );

        let average = average_color(
            image,
            x,
            y,
            text_width.max(0) as u32,
            text_height.max(0) as u32,
        );
        let color = pick_text_color(average);

        draw_text_mut(image, color, x, y, self.scale, &self.font, text);
    }
}

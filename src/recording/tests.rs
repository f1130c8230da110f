use super::*;
use crate::frame::DecodedImage;
use chrono::{DateTime, Local, TimeZone};
use image::Rgb;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Encoder backend that records what it was asked to do
#[derive(Clone, Default)]
struct RecordingFactory {
    opened: Arc<Mutex<Vec<PathBuf>>>,
    frames: Arc<Mutex<Vec<(PathBuf, u64)>>>,
    attempts: Arc<Mutex<u32>>,
    failures_left: Arc<Mutex<u32>>,
}

impl RecordingFactory {
    fn failing(failures: u32) -> Self {
        let factory = Self::default();
        *factory.failures_left.lock() = failures;
        factory
    }
}

struct CountingEncoder {
    path: PathBuf,
    frames: u64,
    finished: Arc<Mutex<Vec<(PathBuf, u64)>>>,
}

impl VideoEncoder for CountingEncoder {
    fn write_frame(&mut self, _image: &DecodedImage) -> Result<(), WriterError> {
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), WriterError> {
        self.finished.lock().push((self.path, self.frames));
        Ok(())
    }
}

impl EncoderFactory for RecordingFactory {
    fn open(
        &self,
        path: &Path,
        _codec: OutputCodec,
        _fps: u32,
        _size: (u32, u32),
    ) -> Result<Box<dyn VideoEncoder>, WriterError> {
        *self.attempts.lock() += 1;
        let mut failures = self.failures_left.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(WriterError::Open {
                path: path.to_path_buf(),
                attempts: 1,
                details: "injected".to_string(),
            });
        }

        self.opened.lock().push(path.to_path_buf());
        Ok(Box::new(CountingEncoder {
            path: path.to_path_buf(),
            frames: 0,
            finished: self.frames.clone(),
        }))
    }
}

fn settings(dir: &Path, duration_secs: u64) -> WriterSettings {
    WriterSettings {
        save_directory: dir.to_path_buf(),
        codec: OutputCodec::Mjpeg,
        fps: 2,
        duration: Duration::from_secs(duration_secs),
        write_index: false,
    }
}

fn start_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap()
}

fn frame() -> DecodedImage {
    DecodedImage::from_pixel(8, 6, Rgb([10, 20, 30]))
}

#[test]
fn test_zero_duration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = FileWriter::new(settings(dir.path(), 0), Box::new(RecordingFactory::default()));
    assert!(matches!(result, Err(WriterError::InvalidDuration)));
}

#[test]
fn test_clock_stepping_back_starts_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let mut writer = FileWriter::new(settings(dir.path(), 60), Box::new(factory.clone())).unwrap();

    writer.write(start_time(), &frame()).unwrap();
    writer
        .write(start_time() + chrono::Duration::seconds(1), &frame())
        .unwrap();
    // Wall clock corrected by an hour
    let corrected = start_time() - chrono::Duration::hours(1);
    writer.write(corrected, &frame()).unwrap();
    writer
        .write(corrected + chrono::Duration::seconds(1), &frame())
        .unwrap();
    writer.close().unwrap();

    let opened = factory.opened.lock().clone();
    assert_eq!(opened.len(), 2);
    assert_eq!(
        opened[1].file_name().unwrap().to_string_lossy(),
        "2024-03-10 at 07.30.00.mjpeg"
    );
    let finished = factory.frames.lock().clone();
    assert_eq!(finished.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec![2, 2]);
}

#[test]
fn test_rotation_after_duration() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let mut writer = FileWriter::new(settings(dir.path(), 2), Box::new(factory.clone())).unwrap();

    // 10 frames, 500ms apart: files start at 0s, 2s and 4s
    for n in 0..10 {
        let time = start_time() + chrono::Duration::milliseconds(500 * n);
        writer.write(time, &frame()).unwrap();
    }
    writer.close().unwrap();

    let opened = factory.opened.lock().clone();
    assert_eq!(opened.len(), 3);
    assert_eq!(writer.files_opened(), 3);
    assert_eq!(
        opened[0].file_name().unwrap().to_string_lossy(),
        "2024-03-10 at 08.30.00.mjpeg"
    );
    assert_eq!(
        opened[1].file_name().unwrap().to_string_lossy(),
        "2024-03-10 at 08.30.02.mjpeg"
    );

    let frames: Vec<u64> = factory.frames.lock().iter().map(|(_, n)| *n).collect();
    assert_eq!(frames, vec![4, 4, 2]);
}

#[test]
fn test_generated_names_never_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let mut writer = FileWriter::new(settings(dir.path(), 1), Box::new(factory.clone())).unwrap();

    let first = writer.open(start_time(), (8, 6)).unwrap().to_path_buf();
    let second = writer.open(start_time(), (8, 6)).unwrap().to_path_buf();
    let third = writer.open(start_time(), (8, 6)).unwrap().to_path_buf();

    assert_ne!(first, second);
    assert_eq!(
        second.file_name().unwrap().to_string_lossy(),
        "2024-03-10 at 08.30.00-1.mjpeg"
    );
    assert_eq!(
        third.file_name().unwrap().to_string_lossy(),
        "2024-03-10 at 08.30.00-2.mjpeg"
    );
}

#[test]
fn test_open_retries_before_failing() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::failing(2);
    let mut writer = FileWriter::new(settings(dir.path(), 5), Box::new(factory.clone())).unwrap();

    assert!(writer.open(start_time(), (8, 6)).is_ok());
    assert_eq!(*factory.attempts.lock(), 3);

    let factory = RecordingFactory::failing(WRITER_OPEN_ATTEMPTS);
    let mut writer = FileWriter::new(settings(dir.path(), 5), Box::new(factory.clone())).unwrap();

    match writer.write(start_time(), &frame()) {
        Err(WriterError::Open { attempts, .. }) => assert_eq!(attempts, WRITER_OPEN_ATTEMPTS),
        other => panic!("Expected open failure, got {:?}", other),
    }
    assert!(writer.current_path().is_none());
}

#[test]
fn test_frame_size_change_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        FileWriter::new(settings(dir.path(), 5), Box::new(RecordingFactory::default())).unwrap();

    writer.write(start_time(), &frame()).unwrap();
    let larger = DecodedImage::new(16, 12);
    assert!(matches!(
        writer.write(start_time(), &larger),
        Err(WriterError::SizeMismatch { .. })
    ));
}

#[test]
fn test_yuv_file_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = settings(dir.path(), 60);
    config.codec = OutputCodec::Yuv420;
    config.write_index = true;

    let mut writer = FileWriter::new(config, Box::new(FileEncoderFactory::new(1))).unwrap();
    for n in 0..3 {
        let time = start_time() + chrono::Duration::seconds(n);
        writer.write(time, &frame()).unwrap();
    }
    let path = writer.current_path().unwrap().to_path_buf();
    writer.close().unwrap();

    let size = std::fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(size, 3 * (8 * 6 + 2 * 4 * 3));

    let index = RecordingIndex::load(dir.path());
    assert_eq!(index.entries().len(), 1);
    let entry = &index.entries()[0];
    assert_eq!(entry.filename, "2024-03-10 at 08.30.00.yuv");
    assert_eq!(entry.length_secs, 2);
    assert!(entry.finished);
}

#[test]
fn test_mjpeg_file_contains_jpeg_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        FileWriter::new(settings(dir.path(), 60), Box::new(FileEncoderFactory::new(1))).unwrap();

    writer.write(start_time(), &frame()).unwrap();
    writer.write(start_time(), &frame()).unwrap();
    let path = writer.current_path().unwrap().to_path_buf();
    drop(writer);

    let data = std::fs::read(path).unwrap();
    let markers = data.windows(2).filter(|w| *w == [0xFF, 0xD8]).count();
    assert!(markers >= 2);
}

#[test]
fn test_output_codec_parsing() {
    assert_eq!(OutputCodec::try_from("h264".to_string()).unwrap(), OutputCodec::H264);
    assert_eq!(OutputCodec::try_from("MJPG".to_string()).unwrap(), OutputCodec::Mjpeg);
    assert_eq!(OutputCodec::try_from("yuv420".to_string()).unwrap(), OutputCodec::Yuv420);
    assert!(OutputCodec::try_from("vp9".to_string()).is_err());

    assert_eq!(OutputCodec::Yuv420.extension(), "yuv");
    assert_eq!(OutputCodec::H265.extension(), "mov");
    assert!(OutputCodec::Mjpeg.is_available());
}

#[test]
fn test_unreadable_index_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(INDEX_FILE_NAME), b"{ not json").unwrap();

    let index = RecordingIndex::load(dir.path());
    assert!(index.entries().is_empty());
}

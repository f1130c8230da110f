use super::{EncoderFactory, OutputCodec, RecordingIndex, VideoEncoder};
use crate::error::WriterError;
use crate::frame::DecodedImage;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts made to open a file before giving up
pub const WRITER_OPEN_ATTEMPTS: u32 = 3;

/// Pause between open attempts
pub const WRITER_RETRY_DELAY: Duration = Duration::from_millis(100);

/// File writer settings
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub save_directory: PathBuf,
    pub codec: OutputCodec,
    pub fps: u32,
    /// Frame time covered by each file
    pub duration: Duration,
    pub write_index: bool,
}

struct OpenFile {
    path: PathBuf,
    encoder: Box<dyn VideoEncoder>,
    size: (u32, u32),
    started: DateTime<Local>,
    last_frame: DateTime<Local>,
    frames: u64,
    index_row: Option<usize>,
}

impl OpenFile {
    fn length_secs(&self) -> u32 {
        (self.last_frame - self.started).num_seconds().max(0) as u32
    }
}

/// Writes decoded frames into a rotating sequence of timestamped files.
///
/// The first frame of a file determines its name and size. A new file is
/// started once the frame time since the current file's first frame reaches
/// the configured duration.
pub struct FileWriter {
    settings: WriterSettings,
    factory: Box<dyn EncoderFactory>,
    current: Option<OpenFile>,
    used_names: HashSet<String>,
    index: Option<RecordingIndex>,
    files_opened: u64,
}

impl FileWriter {
    /// Check the settings and prepare the save directory
    pub fn new(
        settings: WriterSettings,
        factory: Box<dyn EncoderFactory>,
    ) -> Result<Self, WriterError> {
        // File names have one-second granularity
        if settings.duration < Duration::from_secs(1) {
            return Err(WriterError::InvalidDuration);
        }
        if !settings.codec.is_available() {
            return Err(WriterError::CodecUnavailable {
                codec: settings.codec.to_string(),
            });
        }

        std::fs::create_dir_all(&settings.save_directory).map_err(|e| WriterError::Open {
            path: settings.save_directory.clone(),
            attempts: 1,
            details: format!("Failed to create save directory: {}", e),
        })?;

        let index = settings
            .write_index
            .then(|| RecordingIndex::load(&settings.save_directory));

        info!(
            "Recording {} files of {}s to {}",
            settings.codec,
            settings.duration.as_secs(),
            settings.save_directory.display()
        );

        Ok(Self {
            settings,
            factory,
            current: None,
            used_names: HashSet::new(),
            index,
            files_opened: 0,
        })
    }

    /// Path of the file being written
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|file| file.path.as_path())
    }

    pub fn files_opened(&self) -> u64 {
        self.files_opened
    }

    pub fn index(&self) -> Option<&RecordingIndex> {
        self.index.as_ref()
    }

    /// Unused path for a file whose first frame is at `start`
    fn next_path(&mut self, start: DateTime<Local>) -> PathBuf {
        let stem = start.format("%Y-%m-%d at %H.%M.%S").to_string();
        let extension = self.settings.codec.extension();

        let mut name = format!("{}.{}", stem, extension);
        let mut suffix = 1;
        while self.used_names.contains(&name) || self.settings.save_directory.join(&name).exists() {
            name = format!("{}-{}.{}", stem, suffix, extension);
            suffix += 1;
        }

        self.used_names.insert(name.clone());
        self.settings.save_directory.join(name)
    }

    /// Open a new file starting at `start`, retrying a few times
    pub fn open(&mut self, start: DateTime<Local>, size: (u32, u32)) -> Result<&Path, WriterError> {
        self.close()?;

        let path = self.next_path(start);
        let mut last_error = None;

        for attempt in 1..=WRITER_OPEN_ATTEMPTS {
            match self
                .factory
                .open(&path, self.settings.codec, self.settings.fps, size)
            {
                Ok(encoder) => {
                    let index_row = self.register(&path, start);
                    self.files_opened += 1;
                    info!("Opened {} ({}x{})", path.display(), size.0, size.1);

                    let file = self.current.insert(OpenFile {
                        path,
                        encoder,
                        size,
                        started: start,
                        last_frame: start,
                        frames: 0,
                        index_row,
                    });
                    return Ok(file.path.as_path());
                }
                Err(e) => {
                    warn!(
                        "Failed to open {} (attempt {}/{}): {}",
                        path.display(),
                        attempt,
                        WRITER_OPEN_ATTEMPTS,
                        e
                    );
                    last_error = Some(e);
                    if attempt < WRITER_OPEN_ATTEMPTS {
                        std::thread::sleep(WRITER_RETRY_DELAY);
                    }
                }
            }
        }

        Err(WriterError::Open {
            path,
            attempts: WRITER_OPEN_ATTEMPTS,
            details: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn register(&mut self, path: &Path, start: DateTime<Local>) -> Option<usize> {
        let index = self.index.as_mut()?;
        let filename = path.file_name()?.to_string_lossy().into_owned();
        match index.add(filename, start) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Failed to update recording index: {}", e);
                None
            }
        }
    }

    /// Write one frame taken at `frame_time`, rotating first when the
    /// current file is full.
    ///
    /// Open failures are returned as `WriterError::Open`; every other error
    /// only affects this frame.
    pub fn write(&mut self, frame_time: DateTime<Local>, image: &DecodedImage) -> Result<(), WriterError> {
        let size = image.dimensions();
        let rotate = match &self.current {
            None => true,
            Some(file) => match (frame_time - file.started).to_std() {
                Ok(elapsed) => elapsed >= self.settings.duration,
                Err(_) => {
                    warn!(
                        "Clock moved back before the start of {}, starting a new file",
                        file.path.display()
                    );
                    true
                }
            },
        };

        if rotate {
            if let Some(file) = &self.current {
                debug!(
                    "Rotating {} after {} frames",
                    file.path.display(),
                    file.frames
                );
            }
            self.open(frame_time, size)?;
        }

        let file = self.current.as_mut().ok_or_else(|| WriterError::Write {
            path: self.settings.save_directory.clone(),
            details: "no file is open".to_string(),
        })?;
        if file.size != size {
            return Err(WriterError::SizeMismatch {
                expected: file.size,
                actual: size,
            });
        }

        file.encoder.write_frame(image)?;
        file.frames += 1;
        file.last_frame = frame_time;
        Ok(())
    }

    /// Finish the current file, if any
    pub fn close(&mut self) -> Result<(), WriterError> {
        let Some(file) = self.current.take() else {
            return Ok(());
        };

        let length = file.length_secs();
        let result = file.encoder.finish();

        if let (Some(index), Some(row)) = (self.index.as_mut(), file.index_row) {
            if let Err(e) = index.finish(row, length) {
                warn!("Failed to update recording index: {}", e);
            }
        }

        info!(
            "Closed {} ({} frames, {}s)",
            file.path.display(),
            file.frames,
            length
        );
        result
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close recording: {}", e);
        }
    }
}

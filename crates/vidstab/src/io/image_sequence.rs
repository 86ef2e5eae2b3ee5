//! Directory-of-images frame I/O.
//!
//! A sequence directory holds one image per frame, ordered by file name, and
//! optionally a `manifest.json` written by [`ImageSequenceSink`] that records
//! geometry, frame rate and the frame files in order. When a manifest is
//! present, only the frames it lists are read.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SinkError, SourceError};
use crate::frame::Frame;

use super::{FrameSink, FrameSource};

const MANIFEST: &str = "manifest.json";
const FRAME_PREFIX: &str = "frame_";
const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Metadata written next to an output sequence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SequenceManifest {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: Vec<String>,
}

/// Reads frames lazily from image files in a directory.
#[derive(Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    fps: Option<f64>,
    size: Option<(u32, u32)>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = fs::read_dir(&dir).map_err(|source| SourceError::Open {
            path: dir.clone(),
            source,
        })?;

        let manifest = fs::read_to_string(dir.join(MANIFEST))
            .ok()
            .and_then(|s| serde_json::from_str::<SequenceManifest>(&s).ok());

        let files: Vec<PathBuf> = match &manifest {
            Some(m) => m.frames.iter().map(|name| dir.join(name)).collect(),
            None => {
                let mut files: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| has_image_extension(p))
                    .collect();
                files.sort();
                files
            }
        };
        if files.is_empty() {
            return Err(SourceError::Empty(dir));
        }
        let fps = manifest.map(|m| m.fps);

        tracing::info!("{} frames in {}", files.len(), dir.display());
        Ok(Self {
            dir,
            files,
            next: 0,
            fps,
            size: None,
        })
    }

    /// Override the frame rate (otherwise taken from a manifest, if any).
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let index = self.next;
        let img = image::open(path)
            .map_err(|source| SourceError::Decode {
                index,
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        let dims = img.dimensions();
        match self.size {
            None => self.size = Some(dims),
            Some(expected) if expected != dims => {
                return Err(SourceError::SizeMismatch {
                    index,
                    expected,
                    got: dims,
                })
            }
            Some(_) => {}
        }

        self.next += 1;
        Ok(Some(Frame::new(index, img)))
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Writes frames as numbered PNG files plus a manifest.
///
/// Opening the sink removes frame files and the manifest left in the
/// directory by an earlier run; other files are kept.
#[derive(Debug)]
pub struct ImageSequenceSink {
    dir: PathBuf,
    geometry: Option<(u32, u32, f64)>,
    written: Vec<String>,
}

impl ImageSequenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            geometry: None,
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> usize {
        self.written.len()
    }

    /// Delete `frame_*.png` files and the manifest; returns the frames removed.
    fn clear_previous_run(&self) -> Result<usize, SinkError> {
        let create_err = |source| SinkError::Create {
            path: self.dir.clone(),
            source,
        };
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(create_err)? {
            let path = entry.map_err(create_err)?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == MANIFEST {
                fs::remove_file(&path).map_err(create_err)?;
            } else if name.starts_with(FRAME_PREFIX) && name.ends_with(".png") {
                fs::remove_file(&path).map_err(create_err)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl FrameSink for ImageSequenceSink {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir).map_err(|source| SinkError::Create {
            path: self.dir.clone(),
            source,
        })?;
        let stale = self.clear_previous_run()?;
        if stale > 0 {
            tracing::info!("removed {} frames of a previous run", stale);
        }
        self.written.clear();
        self.geometry = Some((width, height, fps));
        tracing::info!(
            "writing {}x{} @ {:.2} fps to {}",
            width,
            height,
            fps,
            self.dir.display()
        );
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.geometry.is_none() {
            return Err(SinkError::NotOpen);
        }
        let name = format!("{}{:06}.png", FRAME_PREFIX, self.written.len());
        let path = self.dir.join(&name);
        frame
            .image()
            .save(&path)
            .map_err(|source| SinkError::Write {
                index: frame.index(),
                path,
                source,
            })?;
        self.written.push(name);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let Some((width, height, fps)) = self.geometry.take() else {
            return Ok(());
        };
        let manifest = SequenceManifest {
            width,
            height,
            fps,
            frames: std::mem::take(&mut self.written),
        };
        let path = self.dir.join(MANIFEST);
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| SinkError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| SinkError::Manifest {
            path,
            reason: e.to_string(),
        })?;
        tracing::info!("{} frames written", manifest.frames.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_run(dir: &Path, n: u8, fps: f64) {
        let mut sink = ImageSequenceSink::new(dir);
        sink.open(8, 6, fps).unwrap();
        for i in 0..n {
            let img = RgbImage::from_pixel(8, 6, Rgb([i * 40, 0, 0]));
            sink.write(&Frame::new(i as usize, img)).unwrap();
        }
        sink.close().unwrap();
    }

    #[test]
    fn sink_output_reads_back_in_order_with_fps() {
        let tmp = tempfile::tempdir().unwrap();
        write_run(tmp.path(), 3, 24.0);

        let mut src = ImageSequenceSource::open(tmp.path()).unwrap();
        assert_eq!(src.frame_count(), Some(3));
        assert_eq!(src.fps(), Some(24.0));
        for i in 0..3u8 {
            let f = src.next_frame().unwrap().unwrap();
            assert_eq!(f.index(), i as usize);
            assert_eq!(f.image().get_pixel(0, 0)[0], i * 40);
        }
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn shorter_rerun_replaces_previous_frames() {
        let tmp = tempfile::tempdir().unwrap();
        write_run(tmp.path(), 5, 30.0);
        write_run(tmp.path(), 3, 25.0);

        let leftover: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(FRAME_PREFIX))
            .collect();
        assert_eq!(leftover.len(), 3);

        let src = ImageSequenceSource::open(tmp.path()).unwrap();
        assert_eq!(src.frame_count(), Some(3));
        assert_eq!(src.fps(), Some(25.0));
    }

    #[test]
    fn manifest_limits_frames_read() {
        let tmp = tempfile::tempdir().unwrap();
        write_run(tmp.path(), 2, 30.0);
        RgbImage::new(8, 6).save(tmp.path().join("zz_extra.png")).unwrap();

        let mut src = ImageSequenceSource::open(tmp.path()).unwrap();
        assert_eq!(src.frame_count(), Some(2));
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn unrelated_files_survive_open() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.txt"), "keep").unwrap();
        let mut sink = ImageSequenceSink::new(tmp.path());
        sink.open(4, 4, 30.0).unwrap();
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn missing_directory_is_a_source_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ImageSequenceSource::open(tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[test]
    fn writing_before_open_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = ImageSequenceSink::new(tmp.path());
        let f = Frame::new(0, RgbImage::new(2, 2));
        assert!(matches!(sink.write(&f), Err(SinkError::NotOpen)));
    }
}

//! Image decoding with an explicit deadline.
//!
//! Decoding runs on a worker thread; the caller waits on a channel for at most
//! the configured timeout instead of blocking forever on a bad source.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use image::{ImageReader, RgbaImage};
use thiserror::Error;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {path} has zero width or height")]
    Empty { path: PathBuf },
    #[error("timed out after {timeout:?} waiting for {path} to decode")]
    Timeout { path: PathBuf, timeout: Duration },
    #[error("decoder thread for {path} stopped without a result")]
    Disconnected { path: PathBuf },
    #[error("failed to start decoder thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A decode in flight. Dropping it abandons the result.
#[derive(Debug)]
pub struct PendingImage {
    path: PathBuf,
    receiver: mpsc::Receiver<Result<RgbaImage, LoadError>>,
}

impl PendingImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn wait(self, timeout: Duration) -> Result<RgbaImage, LoadError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(LoadError::Timeout {
                path: self.path,
                timeout,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(LoadError::Disconnected { path: self.path })
            }
        }
    }
}

/// Start decoding `path` on a worker thread.
///
/// A path that cannot be stat'ed fails here, before any thread starts.
pub fn spawn_decode(path: &Path) -> Result<PendingImage, LoadError> {
    std::fs::metadata(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let (sender, receiver) = mpsc::sync_channel(1);
    let worker_path = path.to_path_buf();

    thread::Builder::new()
        .name("blockpix-image-decoder".to_owned())
        .spawn(move || {
            // A closed receiver means the load was superseded or timed out.
            let _ = sender.send(decode_rgba(&worker_path));
        })
        .map_err(LoadError::Spawn)?;

    Ok(PendingImage {
        path: path.to_path_buf(),
        receiver,
    })
}

pub fn decode_rgba(path: &Path) -> Result<RgbaImage, LoadError> {
    let reader = ImageReader::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = reader.with_guessed_format().map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let image = reader
        .decode()
        .map_err(|source| LoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    if image.width() == 0 || image.height() == 0 {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(image)
}

//! Result image persistence

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::debug;

use crate::camera::ImageFrame;
use crate::config::ImageConfig;

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist `image` if the OK/NG policy wants it. `None` when skipped.
    async fn save_result_image(
        &self,
        image: &ImageFrame,
        station_id: u32,
        is_ok: bool,
    ) -> Result<Option<PathBuf>>;
}

/// Binary PGM files under `{dir}/{YYYYMMDD}/station{N}/{OK|NG}/{HHMMSS_mmm}.pgm`
#[derive(Debug, Clone)]
pub struct FileImageStore {
    root: PathBuf,
    save_ok: bool,
    save_ng: bool,
}

impl FileImageStore {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            root: config.dir.clone(),
            save_ok: config.save_ok,
            save_ng: config.save_ng,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, station_id: u32, is_ok: bool, at: DateTime<Local>) -> PathBuf {
        self.root
            .join(at.format("%Y%m%d").to_string())
            .join(format!("station{}", station_id))
            .join(if is_ok { "OK" } else { "NG" })
            .join(format!("{}.pgm", at.format("%H%M%S_%3f")))
    }
}

/// Encode an 8-bit grayscale frame as binary PGM (P5)
pub fn encode_pgm(image: &ImageFrame) -> Result<Vec<u8>> {
    if !image.is_valid() {
        bail!(
            "frame {}x{} has {} bytes",
            image.width,
            image.height,
            image.pixels.len()
        );
    }
    let header = format!("P5\n{} {}\n255\n", image.width, image.height);
    let mut out = Vec::with_capacity(header.len() + image.pixels.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&image.pixels);
    Ok(out)
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn save_result_image(
        &self,
        image: &ImageFrame,
        station_id: u32,
        is_ok: bool,
    ) -> Result<Option<PathBuf>> {
        if (is_ok && !self.save_ok) || (!is_ok && !self.save_ng) {
            return Ok(None);
        }

        let data = encode_pgm(image)?;
        let mut path = self.path_for(station_id, is_ok, image.timestamp.with_timezone(&Local));
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;

        // Two frames in the same millisecond
        let mut n = 1;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("image")
                .split('-')
                .next()
                .unwrap_or("image")
                .to_string();
            path.set_file_name(format!("{}-{}.pgm", stem, n));
            n += 1;
        }

        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        debug!("Image saved: {}", path.display());
        Ok(Some(path))
    }
}

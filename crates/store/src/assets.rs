//! ROM image and cover art reads.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::StoreError;

/// Directory under the ROM root holding cover art.
pub const IMAGES_DIR: &str = "images";

/// Cover art location for a basename: `<rom_dir>/images/<basename>-image.jpg`.
pub fn cover_image_path(rom_dir: &Path, basename: &str) -> PathBuf {
    rom_dir
        .join(IMAGES_DIR)
        .join(format!("{basename}-image.jpg"))
}

/// Read the static ROM bytes.
pub async fn read_rom(path: &Path) -> Result<Bytes, StoreError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| StoreError::io(path, e))
}

/// Read cover art, or `None` if the ROM has none.
pub async fn read_cover_image(rom_dir: &Path, basename: &str) -> Result<Option<Bytes>, StoreError> {
    let path = cover_image_path(rom_dir, basename);
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

use std::path::{Path, PathBuf};

use fusion_contracts::codec::data_url;
use fusion_contracts::FusionError;

pub const NOT_AN_IMAGE_MESSAGE: &str = "Please upload image files";

/// A selected file after its bytes have been read.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl LoadedImage {
    pub fn preview_url(&self) -> String {
        data_url(self.mime, &self.bytes)
    }
}

/// Reads a file and confirms it holds an image.
pub async fn load_image(path: PathBuf) -> Result<LoadedImage, FusionError> {
    let bytes = read_file(&path).await?;
    let Some(mime) = image_mime(&bytes, &path) else {
        return Err(FusionError::Validation(NOT_AN_IMAGE_MESSAGE.to_string()));
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(LoadedImage {
        path,
        name,
        mime,
        bytes,
    })
}

async fn read_file(path: &Path) -> Result<Vec<u8>, FusionError> {
    tokio::fs::read(path).await.map_err(|source| FusionError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Content sniffing first; the extension only decides for formats the
/// decoder does not recognise.
pub fn image_mime(bytes: &[u8], path: &Path) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(bytes) {
        return Some(format.to_mime_type());
    }
    mime_for_path(path)
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())?;
    match ext.as_str() {
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "svg" => Some("image/svg+xml"),
        "jxl" => Some("image/jxl"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::{Path, PathBuf};

    use fusion_contracts::codec::decode_payload;

    pub const PIXEL_PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    /// A 1x1 PNG with `tag` appended so every fixture has distinct bytes.
    pub fn png_bytes(tag: &str) -> Vec<u8> {
        let mut bytes = decode_payload(PIXEL_PNG_B64).unwrap_or_default();
        bytes.extend_from_slice(tag.as_bytes());
        bytes
    }

    pub fn write_png(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, png_bytes(name))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use fusion_contracts::codec::decode_payload;

    use super::fixtures::{png_bytes, write_png};
    use super::*;

    #[tokio::test]
    async fn load_image_sniffs_content() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        // Extension lies; content decides.
        let path = temp.path().join("photo.bin");
        fs::write(&path, png_bytes("a"))?;

        let loaded = load_image(path.clone()).await?;
        assert_eq!(loaded.mime, "image/png");
        assert_eq!(loaded.name, "photo.bin");
        assert!(loaded.preview_url().starts_with("data:image/png;base64,iVBOR"));
        Ok(())
    }

    #[tokio::test]
    async fn load_image_rejects_non_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.txt");
        fs::write(&path, "hello")?;

        let err = load_image(path).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), NOT_AN_IMAGE_MESSAGE);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = load_image(temp.path().join("gone.png")).await.unwrap_err();
        assert!(matches!(err, FusionError::Io { .. }));
        assert!(err.user_message("x").starts_with("Could not read"));
        Ok(())
    }

    #[tokio::test]
    async fn preview_carries_the_file_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "one.png")?;
        let loaded = load_image(path.clone()).await?;
        assert_eq!(loaded.bytes, fs::read(&path)?);
        assert_eq!(decode_payload(&loaded.preview_url())?, loaded.bytes);
        Ok(())
    }

    #[test]
    fn extension_fallback_covers_undecodable_formats() {
        assert_eq!(image_mime(b"....", Path::new("x.HEIC")), Some("image/heic"));
        assert_eq!(image_mime(b"....", Path::new("x.txt")), None);
    }
}

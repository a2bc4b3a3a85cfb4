//! Image transcode capability
//!
//! Compression converts downloads that are not already in an efficient format
//! to WebP. Encoding runs on the blocking pool.

use crate::error::ToolError;
use async_trait::async_trait;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::path::Path;
use tracing::debug;

/// Extension produced by the default transcoder
pub const WEBP_EXT: &str = ".webp";

/// Formats that are stored as downloaded even when compression is requested
pub const EFFICIENT_EXTS: &[&str] = &[".webp", ".jpg", ".jpeg"];

/// True when `ext` (with dot) should be transcoded under compression
pub fn needs_transcode(ext: &str) -> bool {
    !EFFICIENT_EXTS.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Convert `src` into `dst`
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Extension (with dot) of files this transcoder writes
    fn output_ext(&self) -> &str;

    /// `quality` is 0-100; 100 requests lossless output
    async fn transcode(&self, src: &Path, dst: &Path, quality: u8) -> Result<(), ToolError>;
}

/// Lossless WebP through the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpTranscoder;

#[async_trait]
impl Transcoder for WebpTranscoder {
    fn output_ext(&self) -> &str {
        WEBP_EXT
    }

    async fn transcode(&self, src: &Path, dst: &Path, quality: u8) -> Result<(), ToolError> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        debug!(src = %src.display(), dst = %dst.display(), quality, "Transcoding to WebP");

        tokio::task::spawn_blocking(move || -> Result<(), ToolError> {
            let failed = |message: String| ToolError::Failed {
                tool: "webp".to_string(),
                message,
            };
            let rgba = image::open(&src)
                .map_err(|e| failed(format!("decode {}: {}", src.display(), e)))?
                .into_rgba8();
            let file = std::fs::File::create(&dst)?;
            let writer = std::io::BufWriter::new(file);
            // the encoder in `image` is lossless only, which is what quality 100 asks for
            WebPEncoder::new_lossless(writer)
                .write_image(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
                .map_err(|e| failed(format!("encode {}: {}", dst.display(), e)))
        })
        .await
        .map_err(|e| ToolError::Failed {
            tool: "webp".to_string(),
            message: format!("Transcode task panicked: {}", e),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_needs_transcode() {
        assert!(needs_transcode(".png"));
        assert!(!needs_transcode(".webp"));
        assert!(!needs_transcode(".JPG"));
    }

    #[tokio::test]
    async fn test_png_to_webp() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("in.png");
        let dst = temp.path().join("out.webp");
        let img = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
        img.save_with_format(&src, ImageFormat::Png).unwrap();

        WebpTranscoder.transcode(&src, &dst, 100).await.unwrap();

        let decoded = image::open(&dst).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[tokio::test]
    async fn test_undecodable_source_fails() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("in.png");
        std::fs::write(&src, b"not an image").unwrap();

        let result = WebpTranscoder.transcode(&src, &temp.path().join("o.webp"), 100).await;

        assert!(matches!(result, Err(ToolError::Failed { .. })));
    }
}

//! OCR engine shelling out to the `tesseract` CLI.
//!
//! Pure-Rust extraction handles text-layer formats; OCR covers raster
//! images and scanned PDFs. A missing binary is a designed degradation
//! (`MissingDependency`), not a crash.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Command;

use crate::error::PreviewError;

const DEFAULT_BINARY: &str = "tesseract";
const DEFAULT_LANGUAGE: &str = "eng";

pub struct OcrEngine {
    binary: PathBuf,
    language: String,
}

impl OcrEngine {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Whether the tesseract binary is installed and runnable.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .is_ok()
    }

    /// Run OCR over a rendered page bitmap. Blocking.
    pub fn recognize(&self, image: &DynamicImage) -> Result<String, PreviewError> {
        if !self.is_available() {
            return Err(self.missing());
        }

        let input = std::env::temp_dir().join(format!(
            "easyrename_ocr_{}_{}.png",
            std::process::id(),
            fastrand_suffix()
        ));

        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| PreviewError::Io(format!("Failed to encode OCR input: {}", e)))?;
        std::fs::write(&input, buffer.into_inner())
            .map_err(|e| PreviewError::Io(format!("Failed to write OCR input: {}", e)))?;

        // tesseract INPUT stdout -l LANG
        let output = Command::new(&self.binary)
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output();

        let _ = std::fs::remove_file(&input);

        let output = output.map_err(|_| self.missing())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreviewError::ExtractionEngine(format!(
                "tesseract failed (exit {}): {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn missing(&self) -> PreviewError {
        PreviewError::MissingDependency {
            capability: format!("OCR ({})", self.binary.display()),
            hint: "Install tesseract-ocr to extract text from scanned pages and images"
                .to_string(),
        }
    }
}

impl Default for OcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap unique-ish suffix for temp filenames; avoids clobbering when two
/// pages are OCRed back to back within the same process.
fn fastrand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

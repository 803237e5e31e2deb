use super::{SheetPayload, SheetSubmission};
use crate::config::ProcessingParams;
use crate::error::{OmrError, OmrResult};
use image::ImageFormat;
use std::fs;

/// Cheap checks that run before any pixel is decoded.
#[derive(Debug, Clone)]
pub(crate) struct InputValidator {
    max_bytes: u64,
    formats: Vec<ImageFormat>,
}

/// Accepts a MIME type (`image/png`) or an extension (`png`, `.png`).
pub(crate) fn parse_format(name: &str) -> Option<ImageFormat> {
    let name = name.trim();
    if name.contains('/') {
        ImageFormat::from_mime_type(name.to_ascii_lowercase())
    } else {
        ImageFormat::from_extension(name.trim_start_matches('.').to_ascii_lowercase())
    }
}

impl InputValidator {
    pub(crate) fn new(params: &ProcessingParams) -> OmrResult<Self> {
        let mut formats = Vec::new();
        for name in params
            .supported_formats
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let format = parse_format(name).ok_or_else(|| {
                OmrError::Config(format!("unknown image format '{}' in supported_formats", name))
            })?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        if formats.is_empty() {
            return Err(OmrError::Config("supported_formats is empty".into()));
        }
        Ok(Self {
            max_bytes: params.max_file_size_bytes(),
            formats,
        })
    }

    pub(crate) fn formats(&self) -> &[ImageFormat] {
        &self.formats
    }

    fn check_size(&self, size: u64) -> OmrResult<()> {
        if size > self.max_bytes {
            return Err(OmrError::FileTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Fetches the raw bytes. Files are size-checked before they are read.
    pub(crate) fn read_payload(&self, submission: &SheetSubmission) -> OmrResult<Vec<u8>> {
        match &submission.payload {
            SheetPayload::Bytes(bytes) => {
                self.check_size(bytes.len() as u64)?;
                Ok(bytes.clone())
            }
            SheetPayload::Path(path) => {
                self.check_size(fs::metadata(path)?.len())?;
                Ok(fs::read(path)?)
            }
        }
    }

    /// Size, declared type, then the sniffed signature.
    pub(crate) fn check(&self, bytes: &[u8], declared: Option<&str>) -> OmrResult<ImageFormat> {
        self.check_size(bytes.len() as u64)?;

        if let Some(declared) = declared {
            match parse_format(declared) {
                Some(format) if self.formats.contains(&format) => {}
                _ => return Err(OmrError::UnsupportedFormat(declared.to_string())),
            }
        }

        let sniffed = image::guess_format(bytes)
            .map_err(|e| OmrError::Decode(format!("unrecognised image signature: {}", e)))?;
        if !self.formats.contains(&sniffed) {
            return Err(OmrError::UnsupportedFormat(format!("{:?}", sniffed)));
        }
        Ok(sniffed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const GIF_MAGIC: &[u8] = b"GIF89a\x01\0\x01\0";

    fn validator() -> InputValidator {
        InputValidator::new(&ProcessingParams::default()).unwrap()
    }

    #[test]
    fn test_default_formats_parse() {
        let v = validator();
        assert!(v.formats().contains(&ImageFormat::Jpeg));
        assert!(v.formats().contains(&ImageFormat::Png));
        assert!(!v.formats().contains(&ImageFormat::Gif));
    }

    #[test]
    fn test_unknown_format_name_is_config_error() {
        let params = ProcessingParams {
            supported_formats: "png,xyz".into(),
            ..ProcessingParams::default()
        };
        let err = InputValidator::new(&params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_check_order() {
        let v = validator();
        assert!(v.check(PNG_MAGIC, Some("image/png")).is_ok());
        assert!(v.check(PNG_MAGIC, Some(".PNG")).is_ok());
        assert_eq!(
            v.check(PNG_MAGIC, Some("application/pdf")).unwrap_err().kind(),
            ErrorKind::UnsupportedFormat
        );
        assert_eq!(
            v.check(GIF_MAGIC, None).unwrap_err().kind(),
            ErrorKind::UnsupportedFormat
        );
        assert_eq!(
            v.check(b"definitely not an image", None).unwrap_err().kind(),
            ErrorKind::Decode
        );
    }

    #[test]
    fn test_size_limit() {
        let params = ProcessingParams {
            max_file_size_mb: 1,
            ..ProcessingParams::default()
        };
        let v = InputValidator::new(&params).unwrap();
        let big = vec![0u8; 1024 * 1024 + 1];
        assert_eq!(v.check(&big, None).unwrap_err().kind(), ErrorKind::FileTooLarge);
    }
}

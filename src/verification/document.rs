use crate::error::{Error, Result};

/// Last eight bytes of a well-formed PNG: the `IEND` chunk type and its CRC.
const PNG_TRAILER: [u8; 8] = [b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82];

/// Image formats accepted as ID documents.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

impl ImageFormat {
    /// Identify the format from the leading bytes and check the file is not
    /// truncated. Every failure here is final.
    pub fn sniff(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::BadRequest("Document file is empty".to_string()));
        }
        if bytes[..bytes.len().min(5)].windows(4).any(|w| w == b"%PDF") {
            return Err(Error::BadRequest(
                "PDF files are not supported. Please upload an image file (JPG, PNG) instead."
                    .to_string(),
            ));
        }

        let format = match bytes {
            [0x89, 0x50, ..] => Self::Png,
            [0xFF, 0xD8, ..] => Self::Jpeg,
            [0x47, 0x49, ..] => Self::Gif,
            _ => {
                return Err(Error::BadRequest(
                    "Invalid image file. Please upload JPG, PNG, or GIF image.".to_string(),
                ))
            }
        };

        let complete = match format {
            Self::Jpeg => bytes.len() >= 4 && bytes.ends_with(&[0xFF, 0xD9]),
            Self::Png => bytes.ends_with(&PNG_TRAILER),
            Self::Gif => bytes.ends_with(&[0x3B]),
        };
        if !complete {
            return Err(Error::BadRequest(format!(
                "Corrupted {}: premature end of file",
                format.label()
            )));
        }

        Ok(format)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Gif => "GIF",
        }
    }
}

/// Minimal well-formed documents for tests.
#[cfg(test)]
pub(crate) mod examples {
    pub fn jpeg() -> Vec<u8> {
        vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9]
    }

    pub fn png() -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&super::PNG_TRAILER);
        bytes
    }
}

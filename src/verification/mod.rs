//! ID document verification: a local OCR engine first, escalating to a
//! remote one when the local result is weak.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};

mod document;
mod gemini;
mod matching;
mod service;
mod tesseract;

pub use document::ImageFormat;
pub use gemini::GeminiOcr;
pub use matching::{check_identity, department_keywords, ExpectedIdentity};
pub use service::VerificationService;
pub use tesseract::TesseractCli;

/// Confidence assigned to a failed remote check. The remote engine reports none.
pub const REMOTE_FAILURE_CONFIDENCE: f64 = 0.85;

/// Confidence assigned to a passed remote check.
pub const REMOTE_SUCCESS_CONFIDENCE: f64 = 0.90;

/// Text pulled out of an image by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Engine-reported confidence in `0..=1`, if it reports one.
    pub confidence: Option<f64>,
}

/// Something that can read text off an image.
#[rocket::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extract text. An image with no readable text is an error.
    async fn recognize(&self, image: &[u8], format: ImageFormat) -> Result<Recognition>;
}

/// Which engine produced a verdict.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Local,
    Remote,
}

/// The outcome of verifying one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub success: bool,
    pub confidence: f64,
    pub reason: Option<String>,
    pub engine: EngineKind,
}

/// Runs the verification pipeline.
#[derive(Clone)]
pub struct DocumentVerifier {
    local: Arc<dyn OcrEngine>,
    remote: Option<Arc<dyn OcrEngine>>,
    threshold: f64,
}

impl DocumentVerifier {
    /// `remote` is `None` when fallback is disabled or not configured.
    pub fn new(
        local: Arc<dyn OcrEngine>,
        remote: Option<Arc<dyn OcrEngine>>,
        threshold: f64,
    ) -> Self {
        Self {
            local,
            remote,
            threshold,
        }
    }

    pub async fn verify(&self, image: &[u8], expected: &ExpectedIdentity) -> Result<Verdict> {
        let format = ImageFormat::sniff(image)?;

        let local = match self.local.recognize(image, format).await {
            Ok(recognition) => {
                let confidence = recognition.confidence.unwrap_or(0.0);
                let verdict = judge(&recognition.text, expected, confidence, EngineKind::Local);
                if verdict.success && confidence >= self.threshold {
                    info!(
                        "{} verified document with confidence {confidence:.2}",
                        self.local.name()
                    );
                    return Ok(verdict);
                }
                warn!(
                    "{} result: success={}, confidence={confidence:.2}; escalating",
                    self.local.name(),
                    verdict.success
                );
                Ok(verdict)
            }
            Err(e) => {
                warn!("{} failed, escalating: {e}", self.local.name());
                Err(e)
            }
        };

        let remote = match self.remote {
            Some(ref remote) => remote,
            None => return local,
        };

        let remote_outcome = match remote.recognize(image, format).await {
            Ok(recognition) => {
                let verdict = judge(&recognition.text, expected, 0.0, EngineKind::Remote);
                if verdict.success {
                    info!("{} verified document", remote.name());
                    return Ok(Verdict {
                        confidence: REMOTE_SUCCESS_CONFIDENCE,
                        ..verdict
                    });
                }
                Ok(verdict.reason.unwrap_or_default())
            }
            Err(e) => {
                error!("{} failed: {e}", remote.name());
                Err((e.kind(), format!("{}: {e}", remote.name())))
            }
        };

        // A weak local result still beats nothing: it can go to manual review.
        let local_error = match local {
            Ok(verdict) => {
                warn!("Falling back to the {} result", self.local.name());
                return Ok(verdict);
            }
            Err(e) => format!("{}: {e}", self.local.name()),
        };
        match remote_outcome {
            // Neither engine could be run.
            Err((ErrorKind::Infrastructure, remote_error)) => Err(Error::Unavailable(format!(
                "{local_error}. {remote_error}"
            ))),
            // The remote engine looked at the document and found it wanting.
            Err((_, reason)) | Ok(reason) => {
                Err(Error::Unreadable(format!("{local_error}. {reason}")))
            }
        }
    }
}

fn judge(text: &str, expected: &ExpectedIdentity, confidence: f64, engine: EngineKind) -> Verdict {
    match check_identity(text, expected) {
        Ok(()) => Verdict {
            success: true,
            confidence,
            reason: None,
            engine,
        },
        Err(reason) => Verdict {
            success: false,
            confidence: match engine {
                EngineKind::Local => confidence,
                EngineKind::Remote => REMOTE_FAILURE_CONFIDENCE,
            },
            reason: Some(reason),
            engine,
        },
    }
}

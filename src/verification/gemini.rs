use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::verification::{ImageFormat, OcrEngine, Recognition};

const PROMPT: &str = "Extract all visible text from this student ID card image. \
    Return only the extracted text, nothing else.";

/// The remote engine: a Gemini model asked to transcribe the card.
#[derive(Debug, Clone)]
pub struct GeminiOcr {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiOcr {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

impl<'a> GenerateRequest<'a> {
    fn for_image(image: &[u8], format: ImageFormat) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: PROMPT },
                    RequestPart::Image {
                        inline_data: InlineData {
                            mime_type: format.mime_type(),
                            data: BASE64.encode(image),
                        },
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[rocket::async_trait]
impl OcrEngine for GeminiOcr {
    fn name(&self) -> &'static str {
        "Gemini"
    }

    async fn recognize(&self, image: &[u8], format: ImageFormat) -> Result<Recognition> {
        info!("Using Gemini fallback for OCR");
        let response: GenerateResponse = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest::for_image(image, format))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response.text();
        if text.trim().is_empty() {
            return Err(Error::Unreadable("No text extracted by Gemini".to_string()));
        }
        Ok(Recognition {
            text,
            confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::{json, serde_json};

    use super::*;

    #[test]
    fn request_shape() {
        let request = GenerateRequest::for_image(b"GIF;", ImageFormat::Gif);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "parts": [
                        { "text": PROMPT },
                        { "inlineData": { "mimeType": "image/gif", "data": "R0lGOw==" } },
                    ]
                }]
            })
        );
    }

    #[test]
    fn response_text() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "MAT/2021/0042\n" }, { "text": "NURSING" }] },
                "finishReason": "STOP",
            }]
        }))
        .unwrap();
        assert_eq!(response.text(), "MAT/2021/0042\nNURSING");

        let blocked: GenerateResponse =
            serde_json::from_value(json!({ "promptFeedback": {} })).unwrap();
        assert_eq!(blocked.text(), "");
    }

    #[test]
    fn url_joins_cleanly() {
        let engine = GeminiOcr::new("https://example.test/v1beta/", "some-model", "key");
        assert_eq!(
            engine.url(),
            "https://example.test/v1beta/models/some-model:generateContent"
        );
    }
}

use std::process::Stdio;

use tokio::{io::AsyncWriteExt, process::Command};

use crate::error::{Error, Result};
use crate::verification::{ImageFormat, OcrEngine, Recognition};

/// The local engine: the `tesseract` command-line tool, fed over stdin.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    path: String,
    language: String,
}

impl TesseractCli {
    pub fn new(path: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
        }
    }
}

#[rocket::async_trait]
impl OcrEngine for TesseractCli {
    fn name(&self) -> &'static str {
        "Tesseract"
    }

    async fn recognize(&self, image: &[u8], _format: ImageFormat) -> Result<Recognition> {
        let mut child = Command::new(&self.path)
            .args(["stdin", "stdout", "-l", self.language.as_str(), "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed the image from another task so a full stdout pipe can't stall us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Unavailable("tesseract stdin unavailable".to_string()))?;
        let image = image.to_vec();
        let writer = tokio::spawn(async move { stdin.write_all(&image).await });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = writer.await {
            debug!("tesseract closed stdin early: {e}");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Unavailable(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        if recognition.text.trim().is_empty() {
            return Err(Error::Unreadable(
                "No text found in document. Please ensure the document is clear and readable."
                    .to_string(),
            ));
        }
        Ok(recognition)
    }
}

/// Rebuild text and overall confidence from tesseract's TSV output.
///
/// Word rows (level 5) are joined with spaces within a line and lines with
/// newlines. Confidence is the mean word confidence, scaled to `0..=1`.
fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut current_line = None;
    let mut total_conf = 0.0;
    let mut words = 0_u32;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        let conf = cols[10].parse::<f64>().unwrap_or(-1.0);
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        // page, block, paragraph, line
        let line = (cols[1], cols[2], cols[3], cols[4]);
        match current_line {
            Some(prev) if prev == line => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(line);
        text.push_str(word);

        total_conf += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        total_conf / f64::from(words) / 100.0
    };
    Recognition {
        text,
        confidence: Some(confidence),
    }
}

//! Request and response bodies of the JSON API, and the normalization that
//! turns raw oracle output into them.

use crate::loader::{InputError, MediaKind, MediaSource};
use crate::oracle::{Inference, Prediction};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Body of `/classify_audio` and `/asr`
#[derive(Debug, Default, Deserialize)]
pub struct AudioRequest {
    pub audio_base64: Option<String>,
    pub audio_url: Option<String>,
}

impl AudioRequest {
    pub fn source(&self) -> Result<MediaSource<'_>, InputError> {
        MediaSource::resolve(
            MediaKind::Audio,
            self.audio_base64.as_deref(),
            self.audio_url.as_deref(),
        )
    }
}

/// Body of `/detect`
#[derive(Debug, Default, Deserialize)]
pub struct ImageRequest {
    pub image_base64: Option<String>,
    pub image_url: Option<String>,
}

impl ImageRequest {
    pub fn source(&self) -> Result<MediaSource<'_>, InputError> {
        MediaSource::resolve(
            MediaKind::Image,
            self.image_base64.as_deref(),
            self.image_url.as_deref(),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct QaRequest {
    pub question: Option<String>,
    pub context: Option<String>,
}

impl QaRequest {
    /// The question and context, both required and non-empty
    pub fn into_parts(self) -> Result<(String, String), InputError> {
        match (non_empty(self.question), non_empty(self.context)) {
            (Some(question), Some(context)) => Ok((question, context)),
            _ => Err(InputError::MissingField(
                "Both 'question' and 'context' fields are required.",
            )),
        }
    }
}

/// Body of `/summarize`, `/translate` and `/tts`
#[derive(Debug, Default, Deserialize)]
pub struct TextRequest {
    pub text: Option<String>,
    pub target_lang: Option<String>,
}

impl TextRequest {
    pub fn text(&self) -> Result<&str, InputError> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(InputError::MissingField("Field 'text' is required."))
    }

    pub fn target_lang(&self) -> Option<String> {
        non_empty(self.target_lang.clone()).map(|lang| lang.trim().to_string())
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<Prediction>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct DetectionsResponse {
    pub detections: Vec<Prediction>,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct TranslationResponse {
    pub translation: String,
}

#[derive(Debug, Serialize)]
pub struct SpeechResponse {
    pub audio_url: String,
}

/// Clamp a model score into `[0, 1]`
pub fn coerce_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// The `k` highest scoring predictions, best first
pub fn top_k(mut predictions: Vec<Prediction>, k: usize) -> Vec<Prediction> {
    for p in predictions.iter_mut() {
        p.score = coerce_score(p.score);
    }
    predictions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    predictions.truncate(k);
    predictions
}

/// All predictions in model order, scores coerced
pub fn all_predictions(predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions
        .into_iter()
        .map(|p| Prediction::new(p.label, coerce_score(p.score)))
        .collect()
}

/// Expect a ranked prediction list from the oracle
pub fn expect_predictions(inference: Inference) -> Result<Vec<Prediction>> {
    match inference {
        Inference::Predictions(predictions) => Ok(predictions),
        Inference::Text(_) => Err(anyhow!("model returned text where predictions were expected")),
    }
}

/// Expect free text from the oracle
pub fn expect_text(inference: Inference) -> Result<String> {
    match inference {
        Inference::Text(text) => Ok(text),
        Inference::Predictions(_) => {
            Err(anyhow!("model returned predictions where text was expected"))
        }
    }
}

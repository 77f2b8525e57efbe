//! Hosted inference: the model stays on the hub and every task is one HTTP
//! call to its inference endpoint.

use super::{
    check_task, Inference, InferenceTask, InferenceType, InputData, Oracle, Pipeline, Prediction,
};
use crate::config::Settings;
use crate::loader::AudioClip;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use image::{ImageOutputFormat, RgbImage};
use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Cursor;
use tracing::{debug, warn};

/// Model metadata, as much of it as we need
#[derive(Debug, Deserialize)]
struct ModelInfo {
    pipeline_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubPrediction {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Answer {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct Summary {
    summary_text: String,
}

#[derive(Debug, Deserialize)]
struct Translation {
    translation_text: String,
}

pub struct HubOracle {
    client: reqwest::Client,
    pipeline: Pipeline,
    model: String,
    endpoint: String,
    token: Option<String>,
}

impl std::fmt::Debug for HubOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HubOracle {{ pipeline: {}, model: {}, endpoint: {} }}",
            self.pipeline, self.model, self.endpoint
        )
    }
}

impl HubOracle {
    /// Look the model up on the hub and make sure it serves `pipeline`
    pub async fn load(settings: &Settings, pipeline: Pipeline) -> Result<Self> {
        let model = settings.model_for(pipeline).to_string();
        let client = reqwest::Client::builder()
            .timeout(settings.inference_timeout())
            .build()?;
        let token = settings.hf_token.clone().filter(|t| !t.is_empty());

        let info_url = format!("{}/api/models/{}", settings.hub_url.trim_end_matches('/'), model);
        debug!("looking up {model} at {info_url}");
        let info: ModelInfo = authorize(client.get(&info_url), token.as_deref())
            .send()
            .await
            .with_context(|| format!("could not reach the model hub at {info_url}"))?
            .error_for_status()
            .with_context(|| format!("model {model} is not available"))?
            .json()
            .await?;
        check_pipeline_tag(pipeline, &model, info.pipeline_tag.as_deref())?;

        let endpoint = format!(
            "{}/models/{}",
            settings.inference_url.trim_end_matches('/'),
            model
        );
        Ok(HubOracle {
            client,
            pipeline,
            model,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl Oracle for HubOracle {
    fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn run(&self, task: InferenceTask) -> Result<Inference> {
        check_task(self, &task)?;
        let InferenceTask {
            data,
            inference_type,
        } = task;

        let request = authorize(self.client.post(&self.endpoint), self.token.as_deref());
        let request = match data {
            InputData::Audio(clip) => request
                .header(CONTENT_TYPE, "audio/wav")
                .body(wav_bytes(&clip)?),
            InputData::Image(image) => request
                .header(CONTENT_TYPE, "image/png")
                .body(png_bytes(&image)?),
            InputData::Question { question, context } => request.json(&json!({
                "inputs": { "question": question, "context": context },
                "options": { "wait_for_model": true },
            })),
            InputData::Text(text) => request.json(&text_payload(text, &inference_type)),
        };

        debug!("running {} inference on {}", self.pipeline, self.endpoint);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} answered {status}: {body}", self.model);
        }

        let inference = match inference_type {
            InferenceType::ObjectDetection | InferenceType::AudioClassification => {
                let predictions: Vec<HubPrediction> = response.json().await?;
                Inference::Predictions(
                    predictions
                        .into_iter()
                        .map(|p| Prediction::new(p.label, p.score))
                        .collect(),
                )
            }
            InferenceType::SpeechRecognition => {
                Inference::Text(response.json::<Transcription>().await?.text)
            }
            InferenceType::QuestionAnswering => {
                Inference::Text(response.json::<Answer>().await?.answer)
            }
            InferenceType::Summarization { .. } => {
                let summaries: Vec<Summary> = response.json().await?;
                Inference::Text(
                    summaries
                        .into_iter()
                        .next()
                        .map(|s| s.summary_text)
                        .unwrap_or_default(),
                )
            }
            InferenceType::Translation { .. } => {
                let translations: Vec<Translation> = response.json().await?;
                Inference::Text(
                    translations
                        .into_iter()
                        .next()
                        .map(|t| t.translation_text)
                        .unwrap_or_default(),
                )
            }
        };
        Ok(inference)
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

fn check_pipeline_tag(pipeline: Pipeline, model: &str, tag: Option<&str>) -> Result<()> {
    match tag {
        None => {
            warn!("model {model} does not declare a pipeline, assuming {pipeline}");
            Ok(())
        }
        Some(tag) if tag == pipeline.tag() => Ok(()),
        // seq2seq checkpoints are usually tagged generically
        Some("text2text-generation")
            if matches!(pipeline, Pipeline::Summarization | Pipeline::Translation) =>
        {
            Ok(())
        }
        Some(tag) => Err(anyhow!("model {model} is a {tag} model, not {pipeline}")),
    }
}

/// JSON body for the text-to-text tasks
fn text_payload(text: String, inference_type: &InferenceType) -> Value {
    let mut payload = json!({
        "inputs": text,
        "options": { "wait_for_model": true },
    });
    match inference_type {
        InferenceType::Summarization {
            min_length,
            max_length,
        } => {
            payload["parameters"] = json!({
                "min_length": min_length,
                "max_length": max_length,
                "do_sample": false,
            });
        }
        InferenceType::Translation {
            target_lang: Some(lang),
        } => {
            payload["parameters"] = json!({ "tgt_lang": lang });
        }
        _ => {}
    }
    payload
}

/// Encode a clip as 16-bit PCM WAV
fn wav_bytes(clip: &AudioClip) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
    for sample in &clip.samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(bytes)
}

fn png_bytes(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

//! Inference oracles: preloaded pipelines that map a typed input to a typed
//! output. Every route talks to an `Oracle` and never to a concrete backend,
//! so the stub, hosted and TorchScript implementations are interchangeable.

use crate::config::{Backend, Settings};
use crate::loader::AudioClip;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbImage;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::info;

pub mod hub;
pub mod stub;
#[cfg(feature = "torch")]
pub mod torch;

/// A model-backed task that a service can load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    ObjectDetection,
    AudioClassification,
    SpeechRecognition,
    QuestionAnswering,
    Summarization,
    Translation,
}

impl Pipeline {
    pub const ALL: [Pipeline; 6] = [
        Pipeline::ObjectDetection,
        Pipeline::AudioClassification,
        Pipeline::SpeechRecognition,
        Pipeline::QuestionAnswering,
        Pipeline::Summarization,
        Pipeline::Translation,
    ];

    /// The task tag used by the model hub
    pub fn tag(&self) -> &'static str {
        match self {
            Pipeline::ObjectDetection => "object-detection",
            Pipeline::AudioClassification => "audio-classification",
            Pipeline::SpeechRecognition => "automatic-speech-recognition",
            Pipeline::QuestionAnswering => "question-answering",
            Pipeline::Summarization => "summarization",
            Pipeline::Translation => "translation",
        }
    }

    /// Settings key (and, upper-cased, environment variable) selecting the model
    pub fn setting_key(&self) -> &'static str {
        match self {
            Pipeline::ObjectDetection => "vision_model",
            Pipeline::AudioClassification => "audio_class_model",
            Pipeline::SpeechRecognition => "asr_model",
            Pipeline::QuestionAnswering => "qa_model",
            Pipeline::Summarization => "summarization_model",
            Pipeline::Translation => "translation_model",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Pipeline::ObjectDetection => "facebook/detr-resnet-50",
            Pipeline::AudioClassification => "superb/hubert-large-superb-ks",
            Pipeline::SpeechRecognition => "openai/whisper-small",
            Pipeline::QuestionAnswering => "distilbert-base-uncased-distilled-squad",
            Pipeline::Summarization => "facebook/bart-large-cnn",
            Pipeline::Translation => "Helsinki-NLP/opus-mt-en-es",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Input data that inference can be computed on
pub enum InputData {
    Audio(AudioClip),
    Image(RgbImage),
    Question { question: String, context: String },
    Text(String),
}

impl Debug for InputData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputData::Audio(clip) => write!(
                f,
                "Audio {{ samples: <{}>, sample_rate: {} }}",
                clip.samples.len(),
                clip.sample_rate
            ),
            InputData::Image(image) => write!(
                f,
                "Image {{ img: <data>, height: {}, width: {} }}",
                image.height(),
                image.width()
            ),
            InputData::Question { .. } => write!(f, "Question {{ <text> }}"),
            InputData::Text(text) => write!(f, "Text {{ <{} bytes> }}", text.len()),
        }
    }
}

/// The type of inference to compute, with its per-request parameters
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceType {
    /// `InputData::Image` to `Inference::Predictions`
    ObjectDetection,

    /// `InputData::Audio` to `Inference::Predictions`
    AudioClassification,

    /// `InputData::Audio` to `Inference::Text`
    SpeechRecognition,

    /// `InputData::Question` to `Inference::Text`
    QuestionAnswering,

    /// `InputData::Text` to `Inference::Text`, bounded in length
    Summarization { min_length: u32, max_length: u32 },

    /// `InputData::Text` to `Inference::Text`
    Translation { target_lang: Option<String> },
}

impl InferenceType {
    pub fn pipeline(&self) -> Pipeline {
        match self {
            InferenceType::ObjectDetection => Pipeline::ObjectDetection,
            InferenceType::AudioClassification => Pipeline::AudioClassification,
            InferenceType::SpeechRecognition => Pipeline::SpeechRecognition,
            InferenceType::QuestionAnswering => Pipeline::QuestionAnswering,
            InferenceType::Summarization { .. } => Pipeline::Summarization,
            InferenceType::Translation { .. } => Pipeline::Translation,
        }
    }
}

/// A request for inference
#[derive(Debug)]
pub struct InferenceTask {
    pub data: InputData,
    pub inference_type: InferenceType,
}

/// A label prediction outputted by a classifier or detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Prediction {
            label: label.into(),
            score,
        }
    }
}

/// The output of a model's inference
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    Predictions(Vec<Prediction>),
    Text(String),
}

/// A preloaded, read-only inference pipeline
#[async_trait]
pub trait Oracle: Send + Sync + Debug {
    /// The pipeline this oracle was loaded for
    fn pipeline(&self) -> Pipeline;

    /// The name of the loaded model
    fn model(&self) -> &str;

    /// Run inference on the loaded model given an `InferenceTask`
    async fn run(&self, task: InferenceTask) -> Result<Inference>;
}

/// Reject a task that was routed to an oracle loaded for another pipeline
pub(crate) fn check_task(oracle: &dyn Oracle, task: &InferenceTask) -> Result<()> {
    let wanted = task.inference_type.pipeline();
    if wanted != oracle.pipeline() {
        return Err(anyhow!(
            "{} oracle cannot run {} inference",
            oracle.pipeline(),
            wanted
        ));
    }
    Ok(())
}

/// Load the oracle for `pipeline` using the configured backend
pub async fn load(settings: &Settings, pipeline: Pipeline) -> Result<Arc<dyn Oracle>> {
    let model = settings.model_for(pipeline);
    info!(
        "loading {} model {} ({:?} backend)",
        pipeline, model, settings.oracle_backend
    );

    let oracle: Arc<dyn Oracle> = match settings.oracle_backend {
        Backend::Stub => Arc::new(stub::StubOracle::new(pipeline)),
        Backend::Hub => Arc::new(hub::HubOracle::load(settings, pipeline).await?),
        #[cfg(feature = "torch")]
        Backend::Torch => Arc::new(torch::TorchOracle::load(pipeline, model)?),
        #[cfg(not(feature = "torch"))]
        Backend::Torch => {
            return Err(anyhow!(
                "the torch backend requires building with the `torch` feature"
            ))
        }
    };

    info!("loaded {} model {}", pipeline, oracle.model());
    Ok(oracle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_type_pipeline() {
        let ty = InferenceType::Summarization {
            min_length: 1,
            max_length: 2,
        };
        assert_eq!(ty.pipeline(), Pipeline::Summarization);
        let ty = InferenceType::Translation { target_lang: None };
        assert_eq!(ty.pipeline(), Pipeline::Translation);
    }

    #[test]
    fn test_check_task_mismatch() {
        let oracle = stub::StubOracle::new(Pipeline::QuestionAnswering);
        let task = InferenceTask {
            data: InputData::Text("hello".into()),
            inference_type: InferenceType::Translation { target_lang: None },
        };
        let err = check_task(&oracle, &task).unwrap_err();
        assert_eq!(
            err.to_string(),
            "question-answering oracle cannot run translation inference"
        );
    }

    #[test]
    fn test_input_debug_hides_content() {
        let data = InputData::Question {
            question: "secret question".into(),
            context: "secret context".into(),
        };
        assert!(!format!("{data:?}").contains("secret"));
    }
}

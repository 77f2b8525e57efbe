//! The four deployable services and the per-process state they share with
//! their request handlers.

use crate::config::Settings;
use crate::loader::MediaLoader;
use crate::oracle::{self, Inference, InferenceTask, InferenceType, InputData, Oracle, Pipeline};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A deployable service: one process, one endpoint set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `/detect`
    Vision,
    /// `/classify_audio` and `/asr`
    Audio,
    /// `/qa` and `/summarize`
    Qa,
    /// `/translate` and `/tts`
    Translation,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::Vision,
        Service::Audio,
        Service::Qa,
        Service::Translation,
    ];

    pub fn default_port(&self) -> u16 {
        match self {
            Service::Vision => 5001,
            Service::Audio => 5002,
            Service::Qa => 5003,
            Service::Translation => 5004,
        }
    }

    /// The pipelines that must load before the service may serve
    pub fn pipelines(&self) -> &'static [Pipeline] {
        match self {
            Service::Vision => &[Pipeline::ObjectDetection],
            Service::Audio => &[Pipeline::AudioClassification, Pipeline::SpeechRecognition],
            Service::Qa => &[Pipeline::QuestionAnswering, Pipeline::Summarization],
            Service::Translation => &[Pipeline::Translation],
        }
    }
}

impl FromStr for Service {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vision" => Ok(Service::Vision),
            "audio" => Ok(Service::Audio),
            "qa" => Ok(Service::Qa),
            "translation" => Ok(Service::Translation),
            _ => Err(anyhow!("unknown service {s:?}")),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Vision => "vision",
            Service::Audio => "audio",
            Service::Qa => "qa",
            Service::Translation => "translation",
        };
        f.write_str(name)
    }
}

/// Everything a request handler needs. Built once at startup and never mutated.
#[derive(Debug)]
pub struct AppState {
    oracles: HashMap<Pipeline, Arc<dyn Oracle>>,
    pub loader: MediaLoader,
    pub summary_min_length: u32,
    pub summary_max_length: u32,
    pub tts_placeholder_url: String,
}

impl AppState {
    /// Build the state from already loaded oracles
    pub fn new(settings: &Settings, oracles: Vec<Arc<dyn Oracle>>) -> Result<Self> {
        Ok(AppState {
            oracles: oracles.into_iter().map(|o| (o.pipeline(), o)).collect(),
            loader: MediaLoader::new(settings.fetch_timeout())?,
            summary_min_length: settings.summary_min_length,
            summary_max_length: settings.summary_max_length,
            tts_placeholder_url: settings.tts_placeholder_url.clone(),
        })
    }

    /// Load every oracle `service` needs. Any failure aborts startup.
    pub async fn load(service: Service, settings: &Settings) -> Result<Self> {
        let mut oracles = Vec::new();
        for pipeline in service.pipelines() {
            let oracle = oracle::load(settings, *pipeline)
                .await
                .map_err(|e| e.context(format!("failed to load {pipeline} model")))?;
            oracles.push(oracle);
        }
        Self::new(settings, oracles)
    }

    pub fn oracle(&self, pipeline: Pipeline) -> Result<&dyn Oracle> {
        self.oracles
            .get(&pipeline)
            .map(|o| o.as_ref())
            .ok_or_else(|| anyhow!("no {pipeline} model is loaded"))
    }

    /// Run one inference on the oracle for `inference_type`'s pipeline
    pub async fn run(&self, data: InputData, inference_type: InferenceType) -> Result<Inference> {
        let oracle = self.oracle(inference_type.pipeline())?;
        oracle
            .run(InferenceTask {
                data,
                inference_type,
            })
            .await
    }

    pub fn summarization(&self) -> InferenceType {
        InferenceType::Summarization {
            min_length: self.summary_min_length,
            max_length: self.summary_max_length,
        }
    }
}

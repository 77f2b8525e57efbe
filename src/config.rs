//! Process configuration. Settings are layered: built-in defaults, then an
//! optional TOML file, then the process environment (`VISION_MODEL`, `PORT`,
//! `LOG_LEVEL`, ...).

use crate::oracle::Pipeline;
use anyhow::{bail, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Sample rate every audio clip is normalized to before inference
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Number of events returned by audio classification
pub const TOP_K_EVENTS: usize = 3;

/// Which oracle implementation backs the pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Deterministic placeholder answers, no model
    Stub,
    /// Hosted inference on the model hub
    Hub,
    /// Local TorchScript models (requires the `torch` feature)
    Torch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub oracle_backend: Backend,
    pub host: String,
    /// Overrides the service's default port when set
    pub port: Option<u16>,
    pub log_level: String,

    /// Largest request body accepted, base64 media included
    pub max_body_bytes: usize,
    pub fetch_timeout_secs: u64,
    pub inference_timeout_secs: u64,

    pub hub_url: String,
    pub inference_url: String,
    pub hf_token: Option<String>,

    pub vision_model: String,
    pub audio_class_model: String,
    pub asr_model: String,
    pub qa_model: String,
    pub summarization_model: String,
    pub translation_model: String,

    pub summary_min_length: u32,
    pub summary_max_length: u32,

    pub tts_placeholder_url: String,
}

impl Settings {
    /// Load settings from the defaults, an optional TOML file, and the environment
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path));
        }
        let builder = builder.add_source(Environment::default().try_parsing(true));
        Self::from_config(builder.build()?)
    }

    /// The built-in defaults, before any file or environment layer
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let mut builder = Config::builder()
            .set_default("oracle_backend", "hub")?
            .set_default("host", "0.0.0.0")?
            .set_default("log_level", "info")?
            .set_default("max_body_bytes", 32 * 1024 * 1024)?
            .set_default("fetch_timeout_secs", 10)?
            .set_default("inference_timeout_secs", 60)?
            .set_default("hub_url", "https://huggingface.co")?
            .set_default("inference_url", "https://api-inference.huggingface.co")?
            .set_default("summary_min_length", 30)?
            .set_default("summary_max_length", 200)?
            .set_default("tts_placeholder_url", "http://example.com/audio.mp3")?;
        for pipeline in Pipeline::ALL {
            builder = builder.set_default(pipeline.setting_key(), pipeline.default_model())?;
        }
        Ok(builder)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.summary_min_length > self.summary_max_length {
            bail!(
                "summary_min_length ({}) is larger than summary_max_length ({})",
                self.summary_min_length,
                self.summary_max_length
            );
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be positive");
        }
        if self.summary_max_length == 0 {
            bail!("summary_max_length must be positive");
        }
        Ok(())
    }

    /// The model name configured for a pipeline
    pub fn model_for(&self, pipeline: Pipeline) -> &str {
        match pipeline {
            Pipeline::ObjectDetection => &self.vision_model,
            Pipeline::AudioClassification => &self.audio_class_model,
            Pipeline::SpeechRecognition => &self.asr_model,
            Pipeline::QuestionAnswering => &self.qa_model,
            Pipeline::Summarization => &self.summarization_model,
            Pipeline::Translation => &self.translation_model,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_config(Settings::defaults().unwrap().build().unwrap()).unwrap();
        assert_eq!(settings.oracle_backend, Backend::Hub);
        assert_eq!(settings.port, None);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(settings.max_body_bytes, 32 * 1024 * 1024);
        assert_eq!(settings.summary_max_length, 200);
        assert_eq!(
            settings.model_for(Pipeline::ObjectDetection),
            "facebook/detr-resnet-50"
        );
        assert_eq!(
            settings.model_for(Pipeline::SpeechRecognition),
            "openai/whisper-small"
        );
    }

    #[test]
    fn test_overrides() {
        let config = Settings::defaults()
            .unwrap()
            .set_override("oracle_backend", "stub")
            .unwrap()
            .set_override("port", 8080)
            .unwrap()
            .set_override("qa_model", "deepset/roberta-base-squad2")
            .unwrap()
            .build()
            .unwrap();
        let settings = Settings::from_config(config).unwrap();
        assert_eq!(settings.oracle_backend, Backend::Stub);
        assert_eq!(settings.port, Some(8080));
        assert_eq!(
            settings.model_for(Pipeline::QuestionAnswering),
            "deepset/roberta-base-squad2"
        );
    }

    #[test]
    fn test_rejects_inverted_summary_bounds() {
        let config = Settings::defaults()
            .unwrap()
            .set_override("summary_min_length", 300)
            .unwrap()
            .build()
            .unwrap();
        assert!(Settings::from_config(config).is_err());
    }

    #[test]
    fn test_rejects_zero_body_limit() {
        let config = Settings::defaults()
            .unwrap()
            .set_override("max_body_bytes", 0)
            .unwrap()
            .build()
            .unwrap();
        let err = Settings::from_config(config).unwrap_err();
        assert!(err.to_string().contains("max_body_bytes"));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let config = Settings::defaults()
            .unwrap()
            .set_override("oracle_backend", "onnx")
            .unwrap()
            .build()
            .unwrap();
        assert!(Settings::from_config(config).is_err());
    }
}

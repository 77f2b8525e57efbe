//! Deterministic placeholder oracles. They answer without a model, which
//! makes them the default test double and a usable offline mode.

use super::{
    check_task, Inference, InferenceTask, InferenceType, InputData, Oracle, Pipeline, Prediction,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PLACEHOLDER_TRANSCRIPT: &str = "This is a placeholder transcript.";
pub const PLACEHOLDER_ANSWER: &str = "This is a placeholder answer.";

const ELLIPSIS: &str = "...";

#[derive(Debug)]
pub struct StubOracle {
    pipeline: Pipeline,
    failing: bool,
    calls: AtomicUsize,
}

impl StubOracle {
    pub fn new(pipeline: Pipeline) -> Self {
        StubOracle {
            pipeline,
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// An oracle whose every call fails, as a broken model would
    pub fn failing(pipeline: Pipeline) -> Self {
        StubOracle {
            failing: true,
            ..Self::new(pipeline)
        }
    }

    /// Number of inference calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for StubOracle {
    fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    fn model(&self) -> &str {
        "stub"
    }

    async fn run(&self, task: InferenceTask) -> Result<Inference> {
        check_task(self, &task)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(anyhow!("stub {} model failed", self.pipeline));
        }

        match (task.inference_type, task.data) {
            (InferenceType::ObjectDetection, InputData::Image(_)) => {
                Ok(Inference::Predictions(vec![
                    Prediction::new("helmet", 0.91),
                    Prediction::new("vest", 0.84),
                ]))
            }
            (InferenceType::AudioClassification, InputData::Audio(_)) => {
                Ok(Inference::Predictions(vec![
                    Prediction::new("silence", 0.04),
                    Prediction::new("alarm", 0.62),
                    Prediction::new("speech", 0.11),
                    Prediction::new("machinery", 0.23),
                ]))
            }
            (InferenceType::SpeechRecognition, InputData::Audio(_)) => {
                Ok(Inference::Text(PLACEHOLDER_TRANSCRIPT.into()))
            }
            (InferenceType::QuestionAnswering, InputData::Question { question, context }) => {
                Ok(Inference::Text(answer(&question, &context)))
            }
            (InferenceType::Summarization { max_length, .. }, InputData::Text(text)) => {
                Ok(Inference::Text(truncate(&text, max_length as usize)))
            }
            (InferenceType::Translation { .. }, InputData::Text(text)) => Ok(Inference::Text(text)),
            (ty, data) => Err(anyhow!("invalid input {data:?} for {ty:?} inference")),
        }
    }
}

fn words(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// The context sentence sharing the most words with the question
fn answer(question: &str, context: &str) -> String {
    let asked = words(question);
    context
        .split_inclusive(&['.', '!', '?'][..])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        // ties go to the earliest sentence
        .max_by_key(|(i, sentence)| (words(sentence).intersection(&asked).count(), Reverse(*i)))
        .map(|(_, sentence)| sentence.to_string())
        .unwrap_or_else(|| PLACEHOLDER_ANSWER.to_string())
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an ellipsis
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_task(inference_type: InferenceType, text: &str) -> InferenceTask {
        InferenceTask {
            data: InputData::Text(text.into()),
            inference_type,
        }
    }

    #[test]
    fn test_answer_picks_overlapping_sentence() {
        let context = "The weather is mild. Paris is the capital of France. It has museums.";
        assert_eq!(
            answer("What is the capital?", context),
            "Paris is the capital of France."
        );
    }

    #[test]
    fn test_answer_ties_prefer_first_sentence() {
        assert_eq!(answer("zzz", "First one. Second one."), "First one.");
    }

    #[test]
    fn test_answer_empty_context() {
        assert_eq!(answer("why?", "   "), PLACEHOLDER_ANSWER);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("abcdefghij", 2), "ab");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[actix_web::test]
    async fn test_summary_respects_max_length() {
        let oracle = StubOracle::new(Pipeline::Summarization);
        let text = "x".repeat(201);
        let ty = InferenceType::Summarization {
            min_length: 30,
            max_length: 200,
        };
        match oracle.run(text_task(ty, &text)).await.unwrap() {
            Inference::Text(summary) => assert!(summary.chars().count() <= 200),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[actix_web::test]
    async fn test_translation_echoes_and_counts() {
        let oracle = StubOracle::new(Pipeline::Translation);
        for _ in 0..2 {
            let ty = InferenceType::Translation {
                target_lang: Some("es".into()),
            };
            let out = oracle.run(text_task(ty, "hola")).await.unwrap();
            assert_eq!(out, Inference::Text("hola".into()));
        }
        assert_eq!(oracle.calls(), 2);
    }

    #[actix_web::test]
    async fn test_failing_oracle() {
        let oracle = StubOracle::failing(Pipeline::Translation);
        let ty = InferenceType::Translation { target_lang: None };
        assert!(oracle.run(text_task(ty, "hi")).await.is_err());
        assert_eq!(oracle.calls(), 1);
    }

    #[actix_web::test]
    async fn test_wrong_input_kind() {
        let oracle = StubOracle::new(Pipeline::QuestionAnswering);
        let task = text_task(InferenceType::QuestionAnswering, "no context");
        assert!(oracle.run(task).await.is_err());
    }
}

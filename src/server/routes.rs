//! The user-facing JSON endpoints. Every handler follows the same path:
//! load the input, run the oracle, normalize the result.

use super::protocol::*;
use super::{JsonBody, WebError};
use crate::config::TOP_K_EVENTS;
use crate::oracle::{InferenceType, InputData};
use crate::service::{AppState, Service};
use actix_web::{post, web, Responder};
use tracing::info;

type Result<T> = std::result::Result<T, WebError>;

/// Register the endpoints that `service` serves
pub fn configure(service: Service) -> impl Fn(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| match service {
        Service::Vision => {
            cfg.service(detect);
        }
        Service::Audio => {
            cfg.service(classify_audio).service(asr);
        }
        Service::Qa => {
            cfg.service(qa).service(summarize);
        }
        Service::Translation => {
            cfg.service(translate).service(tts);
        }
    }
}

#[post("/classify_audio")]
pub async fn classify_audio(
    req: JsonBody<AudioRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let clip = state.loader.load_audio(req.source()?).await?;
    let output = state
        .run(InputData::Audio(clip), InferenceType::AudioClassification)
        .await?;
    let events = top_k(expect_predictions(output)?, TOP_K_EVENTS);

    info!("finished serving audio classification request");
    Ok(web::Json(EventsResponse { events }))
}

#[post("/asr")]
pub async fn asr(
    req: JsonBody<AudioRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let clip = state.loader.load_audio(req.source()?).await?;
    let output = state
        .run(InputData::Audio(clip), InferenceType::SpeechRecognition)
        .await?;
    let transcript = expect_text(output)?;

    info!("finished serving speech recognition request");
    Ok(web::Json(TranscriptResponse { transcript }))
}

#[post("/detect")]
pub async fn detect(
    req: JsonBody<ImageRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let image = state.loader.load_image(req.source()?).await?;
    let output = state
        .run(InputData::Image(image), InferenceType::ObjectDetection)
        .await?;
    let detections = all_predictions(expect_predictions(output)?);

    info!("finished serving object detection request");
    Ok(web::Json(DetectionsResponse { detections }))
}

#[post("/qa")]
pub async fn qa(req: JsonBody<QaRequest>, state: web::Data<AppState>) -> Result<impl Responder> {
    let (question, context) = req.into_inner().into_parts()?;
    let output = state
        .run(
            InputData::Question { question, context },
            InferenceType::QuestionAnswering,
        )
        .await?;
    let answer = expect_text(output)?;

    info!("finished serving question answering request");
    Ok(web::Json(AnswerResponse { answer }))
}

#[post("/summarize")]
pub async fn summarize(
    req: JsonBody<TextRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let text = req.text()?.to_string();
    let output = state
        .run(InputData::Text(text), state.summarization())
        .await?;
    let summary = expect_text(output)?;

    info!("finished serving summarization request");
    Ok(web::Json(SummaryResponse { summary }))
}

#[post("/translate")]
pub async fn translate(
    req: JsonBody<TextRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let text = req.text()?.to_string();
    let target_lang = req.target_lang();
    let output = state
        .run(InputData::Text(text), InferenceType::Translation { target_lang })
        .await?;
    let translation = expect_text(output)?;

    info!("finished serving translation request");
    Ok(web::Json(TranslationResponse { translation }))
}

/// Speech synthesis is not backed by a model yet: a valid request gets the
/// configured placeholder URL
#[post("/tts")]
pub async fn tts(
    req: JsonBody<TextRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    req.text()?;
    Ok(web::Json(SpeechResponse {
        audio_url: state.tts_placeholder_url.clone(),
    }))
}

use crate::loader::InputError;
use actix_web::dev::Payload;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use tracing::{error, warn};

pub mod protocol;
pub mod routes;

/// Message returned for every failure that is not the caller's fault
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// A failed request: either the caller's fault (400) or ours (500)
#[derive(Debug)]
pub enum WebError {
    Input(InputError),
    Internal(anyhow::Error),
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebError::Input(err) => write!(f, "{err}"),
            WebError::Internal(_) => write!(f, "{INTERNAL_ERROR_MESSAGE}"),
        }
    }
}

impl ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        match self {
            WebError::Input(err) => warn!("bad request: {err}"),
            WebError::Internal(err) => error!("internal error: {err:?}"),
        }
        let err = HashMap::from([("error", self.to_string())]);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(err)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            WebError::Input(_) => StatusCode::BAD_REQUEST,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors carrying an `InputError` are the caller's fault, everything else is internal
impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        match err.downcast::<InputError>() {
            Ok(input) => WebError::Input(input),
            Err(err) => WebError::Internal(err),
        }
    }
}

impl From<InputError> for WebError {
    fn from(err: InputError) -> Self {
        WebError::Input(err)
    }
}

/// Size limit for request bodies read by [`JsonBody`]
pub fn body_config(max_body_bytes: usize) -> web::PayloadConfig {
    web::PayloadConfig::new(max_body_bytes)
}

/// A JSON request body. An empty body or a bare `null` reads as the
/// default request, so the handler reports which fields are missing.
/// Anything else that does not parse is a 400 in the `{"error": ...}` shape.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<T> JsonBody<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for JsonBody<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> FromRequest for JsonBody<T>
where
    T: DeserializeOwned + Default + 'static,
{
    type Error = WebError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, WebError>>>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let body = web::Bytes::from_request(req, payload);
        Box::pin(async move {
            let bytes = body
                .await
                .map_err(|e| InputError::Body(e.to_string()))?;
            Ok(JsonBody(parse_body(&bytes)?))
        })
    }
}

fn parse_body<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T, InputError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice::<Option<T>>(bytes)
        .map(Option::unwrap_or_default)
        .map_err(|e| InputError::Body(e.to_string()))
}

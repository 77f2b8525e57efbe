//! Turns a request's media fields into normalized media: base64 is decoded in
//! place, URLs are fetched once with a bounded timeout.

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub mod audio;

pub use audio::AudioClip;

/// The kind of media a request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

impl MediaKind {
    pub fn url_field(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio_url",
            MediaKind::Image => "image_url",
        }
    }

    pub fn base64_field(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio_base64",
            MediaKind::Image => "image_base64",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Image => f.write_str("image"),
        }
    }
}

/// A problem with the request itself. Always reported back to the caller.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("An '{}' or '{}' field is required.", .0.url_field(), .0.base64_field())]
    MissingMedia(MediaKind),

    #[error("Invalid base64 {kind}: {reason}")]
    InvalidBase64 { kind: MediaKind, reason: String },

    #[error("Failed to fetch {kind} from URL: {reason}")]
    Fetch { kind: MediaKind, reason: String },

    #[error("{0}")]
    MissingField(&'static str),

    #[error("Invalid JSON body: {0}")]
    Body(String),
}

impl InputError {
    fn invalid_base64(kind: MediaKind, reason: String) -> Self {
        InputError::InvalidBase64 { kind, reason }
    }

    fn fetch(kind: MediaKind, reason: String) -> Self {
        InputError::Fetch { kind, reason }
    }
}

/// Where a request's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource<'a> {
    Base64(&'a str),
    Url(&'a str),
}

impl<'a> MediaSource<'a> {
    /// Pick the media source from a request's fields. Empty fields count as
    /// absent, and base64 wins when both are given.
    pub fn resolve(
        kind: MediaKind,
        base64: Option<&'a str>,
        url: Option<&'a str>,
    ) -> std::result::Result<Self, InputError> {
        let present = |field: Option<&'a str>| field.filter(|s| !s.trim().is_empty());
        match (present(base64), present(url)) {
            (Some(data), _) => Ok(MediaSource::Base64(data)),
            (None, Some(url)) => Ok(MediaSource::Url(url.trim())),
            (None, None) => Err(InputError::MissingMedia(kind)),
        }
    }
}

/// Decodes and fetches request media
#[derive(Debug, Clone)]
pub struct MediaLoader {
    client: reqwest::Client,
}

impl MediaLoader {
    pub fn new(fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;
        Ok(MediaLoader { client })
    }

    /// Load a mono 16 kHz audio clip
    pub async fn load_audio(&self, source: MediaSource<'_>) -> Result<AudioClip> {
        let clip = self.load(MediaKind::Audio, source, audio::decode).await?;
        debug!("loaded {:.2}s of audio", clip.duration_secs());
        Ok(clip)
    }

    /// Load an image in RGB layout
    pub async fn load_image(&self, source: MediaSource<'_>) -> Result<RgbImage> {
        self.load(MediaKind::Image, source, |bytes| {
            Ok(image::load_from_memory(&bytes)?.to_rgb8())
        })
        .await
    }

    async fn load<T, F>(&self, kind: MediaKind, source: MediaSource<'_>, decode: F) -> Result<T>
    where
        F: FnOnce(Vec<u8>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (bytes, reject): (Vec<u8>, fn(MediaKind, String) -> InputError) = match source {
            MediaSource::Base64(data) => match decode_base64(data) {
                Ok(bytes) => (bytes, InputError::invalid_base64),
                Err(e) => return Err(InputError::invalid_base64(kind, e.to_string()).into()),
            },
            MediaSource::Url(url) => match self.fetch(url).await {
                Ok(bytes) => (bytes, InputError::fetch),
                Err(e) => return Err(InputError::fetch(kind, e.to_string()).into()),
            },
        };
        debug!("decoding {} bytes of {kind}", bytes.len());

        // Decoding is CPU bound, keep it off the server's event loop
        match tokio::task::spawn_blocking(move || decode(bytes)).await? {
            Ok(media) => Ok(media),
            Err(e) => Err(reject(kind, format!("{e:#}")).into()),
        }
    }

    /// A single GET: no retries, bounded by the client timeout
    async fn fetch(&self, url: &str) -> reqwest::Result<Vec<u8>> {
        debug!("fetching {url}");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Decode standard base64, tolerating whitespace and a `data:` URL prefix
fn decode_base64(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let data = match (data.starts_with("data:"), data.find(";base64,")) {
        (true, Some(i)) => &data[i + ";base64,".len()..],
        _ => data,
    };
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    general_purpose::STANDARD.decode(compact)
}

//! Audio decoding: any container symphonia can probe, downmixed to mono and
//! resampled to the rate the models expect.

use crate::config::TARGET_SAMPLE_RATE;
use anyhow::{anyhow, bail, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::{Cursor, ErrorKind};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Mono audio samples ready for inference
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode an encoded audio file into a mono clip at `TARGET_SAMPLE_RATE`
pub fn decode(bytes: Vec<u8>) -> Result<AudioClip> {
    let (interleaved, channels, sample_rate) = pcm_decode(bytes)?;
    let mono = downmix(&interleaved, channels);
    let samples = resample(mono, sample_rate, TARGET_SAMPLE_RATE)?;
    Ok(AudioClip {
        samples,
        sample_rate: TARGET_SAMPLE_RATE,
    })
}

/// Decode the first audio track to interleaved f32 samples.
/// Returns the samples, the channel count and the sample rate.
fn pcm_decode(bytes: Vec<u8>) -> Result<(Vec<f32>, usize, u32)> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no supported audio tracks"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let mut sample_rate = codec_params.sample_rate;
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet is skipped, the rest of the stream may still decode
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let spec = *decoded.spec();
        channels = spec.channels.count();
        sample_rate = Some(spec.rate);

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    if samples.is_empty() {
        bail!("stream contains no audio samples");
    }
    let sample_rate = sample_rate.ok_or_else(|| anyhow!("unknown sample rate"))?;
    Ok((samples, channels.max(1), sample_rate))
}

/// Average interleaved channels into a single channel
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

pub fn resample(samples: Vec<f32>, from_hz: u32, to_hz: u32) -> Result<Vec<f32>> {
    if from_hz == 0 || to_hz == 0 {
        bail!("invalid sample rates: from_hz={from_hz} to_hz={to_hz}");
    }
    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_hz as f64 / from_hz as f64;
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)?;

    let mut out = resampler
        .process(&[samples], None)?
        .pop()
        .ok_or_else(|| anyhow!("resampler returned no output channels"))?;
    // The filter lags its input, push zeros through to get the tail out
    let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
    out.extend(tail.into_iter().flatten());

    let delay = resampler.output_delay();
    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::test::wav_bytes;
    use super::*;

    #[test]
    fn test_decode_mono_wav() {
        let input = vec![0.25f32; 1600];
        let clip = decode(wav_bytes(&input, 1, 16_000)).unwrap();
        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.samples.len(), 1600);
        assert!((clip.samples[0] - 0.25).abs() < 1e-3);
        assert!((clip.duration_secs() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        let input: Vec<f32> = (0..800).flat_map(|_| [0.5f32, 0.25]).collect();
        let clip = decode(wav_bytes(&input, 2, 16_000)).unwrap();
        assert_eq!(clip.samples.len(), 800);
        assert!(clip.samples.iter().all(|s| (s - 0.375).abs() < 1e-3));
    }

    #[test]
    fn test_decode_resamples() {
        let input = vec![0.0f32; 8000];
        let clip = decode(wav_bytes(&input, 1, 8_000)).unwrap();
        assert_eq!(clip.sample_rate, TARGET_SAMPLE_RATE);
        let n = clip.samples.len();
        assert!((15_000..=17_000).contains(&n), "got {n} samples");
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode(b"definitely not audio".to_vec()).is_err());
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_resample_keeps_alignment() {
        let mut input = vec![0.0f32; 8000];
        input[4000] = 1.0;
        input[7990] = 1.0;
        let out = resample(input, 8_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);

        let peak = |range: std::ops::Range<usize>| {
            range
                .max_by(|&a, &b| out[a].total_cmp(&out[b]))
                .unwrap()
        };
        let first = peak(0..12_000);
        assert!(first.abs_diff(8000) <= 1, "first peak at {first}");
        // An impulse near the end of the clip must survive
        let last = peak(12_000..16_000);
        assert!(last.abs_diff(15_980) <= 1, "last peak at {last}");
        assert!(out[last] > 0.5);
    }

    #[test]
    fn test_resample_identity() {
        let x = vec![0.0f32, 0.5, -0.25, 1.0];
        assert_eq!(resample(x.clone(), 16_000, 16_000).unwrap(), x);
        assert!(resample(x, 0, 16_000).is_err());
    }
}

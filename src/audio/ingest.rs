//! WAV decoding, channel downmix and resampling.

use crate::audio::processor::enhance;
use crate::audio::AudioError;
use std::io::Cursor;

/// Sample rate the engine is trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode an uploaded file into engine-ready samples.
pub fn decode(bytes: &[u8], enhance_audio: bool) -> Result<Vec<f32>, AudioError> {
    if bytes.is_empty() {
        return Err(AudioError::Empty);
    }

    let (header, data) = wav::read(&mut Cursor::new(bytes))?;

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(s) => s.iter().map(|&v| (v as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(s) => s.iter().map(|&v| v as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(s) => s.iter().map(|&v| v as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(s) => s,
        wav::BitDepth::Empty => {
            return Err(AudioError::Unsupported(format!(
                "format tag {} with {} bits per sample",
                header.audio_format, header.bits_per_sample
            )))
        }
    };

    let mono = downmix(&interleaved, header.channel_count);
    if mono.is_empty() {
        return Err(AudioError::Empty);
    }

    let mut samples = resample(&mono, header.sampling_rate);

    tracing::debug!(
        channels = header.channel_count,
        sample_rate = header.sampling_rate,
        samples = samples.len(),
        enhance = enhance_audio,
        "Decoded upload"
    );

    if enhance_audio {
        enhance(&mut samples);
    }

    Ok(samples)
}

/// Average interleaved channels into one.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Linear-interpolation resample from `source_rate` to [`TARGET_SAMPLE_RATE`].
pub fn resample(samples: &[f32], source_rate: u32) -> Vec<f32> {
    if source_rate == TARGET_SAMPLE_RATE || source_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = TARGET_SAMPLE_RATE as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a * (1.0 - frac) + b * frac,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

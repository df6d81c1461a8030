//! # Audio Enhancement
//!
//! Optional clean-up applied when a request sets `enhance_audio`.
//!
//! ## Steps:
//! 1. **Remove DC offset**: center the signal around zero
//! 2. **Normalize volume**: scale the peak to [`TARGET_PEAK`]
//! 3. **Smooth**: 3-point moving average to knock down high-frequency hiss

/// Peak level after normalization, leaving headroom below full scale.
pub const TARGET_PEAK: f32 = 0.85;

/// Below this peak the signal is treated as silence and not amplified.
const SILENCE_PEAK: f32 = 0.003;

/// Above this peak the signal is already hot enough.
const HOT_PEAK: f32 = 0.915;

/// Run the full enhancement chain in place.
pub fn enhance(samples: &mut [f32]) {
    remove_dc_offset(samples);
    normalize_volume(samples);
    smooth(samples);
}

/// Average value of the signal.
fn dc_offset(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64).sum();
    (sum / samples.len() as f64) as f32
}

fn remove_dc_offset(samples: &mut [f32]) {
    let offset = dc_offset(samples);
    for sample in samples.iter_mut() {
        *sample -= offset;
    }
}

/// Scale so the loudest sample sits at [`TARGET_PEAK`].
///
/// Near-silent and already-hot signals are left alone to avoid amplifying noise or clipping.
fn normalize_volume(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
    if !(SILENCE_PEAK..=HOT_PEAK).contains(&peak) {
        return;
    }

    let scale = TARGET_PEAK / peak;
    for sample in samples.iter_mut() {
        *sample = (*sample * scale).clamp(-1.0, 1.0);
    }
}

/// 3-point moving average. Endpoints are kept as-is.
fn smooth(samples: &mut [f32]) {
    if samples.len() < 3 {
        return;
    }

    let original = samples.to_vec();
    for i in 1..samples.len() - 1 {
        samples[i] = (original[i - 1] + original[i] + original[i + 1]) / 3.0;
    }
}

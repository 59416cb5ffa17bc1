//! Objective restoration metrics

use crate::error::{DspError, DspResult};
use crate::stft::{Stft, StftConfig};

const LSD_EPS: f64 = 1e-8;

/// Per-frame SNR is clamped to this range (dB)
const SEG_SNR_MIN_DB: f64 = -10.0;
const SEG_SNR_MAX_DB: f64 = 35.0;

/// Log-spectral distance between a reference and an estimate
///
/// `mean_t sqrt(mean_f (log10 |X|^2 - log10 |Y|^2)^2)` over a 2048-point
/// STFT (hop 512). Signals are compared over their common length.
pub fn lsd(reference: &[f32], estimate: &[f32]) -> DspResult<f64> {
    let len = reference.len().min(estimate.len());
    if len == 0 {
        return Err(DspError::InputTooShort(0, 1));
    }

    let stft = Stft::new(StftConfig::new(2048).with_hop_length(512))?;
    let x = stft.magnitude(&reference[..len])?;
    let y = stft.magnitude(&estimate[..len])?;

    let (n_bins, n_frames) = x.dim();
    let mut total = 0.0f64;
    for t in 0..n_frames {
        let mut acc = 0.0f64;
        for k in 0..n_bins {
            let px = (x[[k, t]] as f64).powi(2) + LSD_EPS;
            let py = (y[[k, t]] as f64).powi(2) + LSD_EPS;
            let d = px.log10() - py.log10();
            acc += d * d;
        }
        total += (acc / n_bins as f64).sqrt();
    }

    Ok(total / n_frames as f64)
}

/// Segmental SNR (dB) over non-overlapping frames
///
/// Frames where the reference is silent are skipped; each frame's SNR is
/// clamped to [-10, 35] dB. Returns the lower clamp when no frame qualifies.
pub fn segmental_snr(reference: &[f32], estimate: &[f32], frame_len: usize) -> DspResult<f64> {
    if frame_len == 0 {
        return Err(DspError::InvalidConfig("frame_len must be > 0".into()));
    }
    let len = reference.len().min(estimate.len());

    let mut total = 0.0f64;
    let mut frames = 0usize;
    for (r, e) in reference[..len]
        .chunks(frame_len)
        .zip(estimate[..len].chunks(frame_len))
    {
        let signal: f64 = r.iter().map(|&s| (s as f64).powi(2)).sum();
        if signal < 1e-10 {
            continue;
        }
        let noise: f64 = r
            .iter()
            .zip(e)
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum();
        let snr = 10.0 * (signal / (noise + 1e-10)).log10();
        total += snr.clamp(SEG_SNR_MIN_DB, SEG_SNR_MAX_DB);
        frames += 1;
    }

    Ok(if frames == 0 {
        SEG_SNR_MIN_DB
    } else {
        total / frames as f64
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(len: usize, freq: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 16000.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_lsd_identical_is_zero() {
        let s = sine(16000, 440.0);
        assert!(lsd(&s, &s).unwrap() < 1e-9);
    }

    #[test]
    fn test_lsd_grows_with_distortion() {
        let s = sine(16000, 440.0);
        let slightly: Vec<f32> = s.iter().map(|x| x * 0.9).collect();
        let other = sine(16000, 3000.0);
        let near = lsd(&s, &slightly).unwrap();
        let far = lsd(&s, &other).unwrap();
        assert!(near > 0.0);
        assert!(far > near);
    }

    #[test]
    fn test_lsd_empty_rejected() {
        assert!(lsd(&[], &[0.1]).is_err());
    }

    #[test]
    fn test_segmental_snr_clamps() {
        let s = sine(4096, 440.0);
        assert_eq!(segmental_snr(&s, &s, 256).unwrap(), SEG_SNR_MAX_DB);
        let silence = vec![0.0f32; 4096];
        assert!(segmental_snr(&s, &silence, 256).unwrap().abs() < 1e-6);
        assert_eq!(segmental_snr(&silence, &s, 256).unwrap(), SEG_SNR_MIN_DB);
    }
}

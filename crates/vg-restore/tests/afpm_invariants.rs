//! Masking invariants on synthetic speech-like input

use std::f32::consts::PI;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use vg_restore::{Afpm, AfpmConfig};

fn harmonic_tone(len: usize, f0: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / 16000.0;
            (1..=8)
                .map(|h| (2.0 * PI * f0 * h as f32 * t).sin() * 0.3 / h as f32)
                .sum()
        })
        .collect()
}

fn white_noise(len: usize, seed: u64) -> Vec<f32> {
    use rand::Rng;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-0.5..0.5)).collect()
}

#[test]
fn test_zero_probe_leaves_speaker_bands_untouched() {
    let afpm = Afpm::new(AfpmConfig::inference().with_probe_amplitude(0.0)).unwrap();
    let wave = harmonic_tone(32000, 220.0);
    let raw = afpm.magnitude(&wave).unwrap();
    let out = afpm.apply(&wave, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();

    assert!(out.pitch_threshold.is_some());
    for band in afpm.layout().bands() {
        for j in band.start..band.end {
            assert_eq!(out.max_diff[j], 0.0);
            assert_eq!(out.magnitude.row(j), raw.row(j));
        }
    }
}

#[test]
fn test_silence_passes_through() {
    for config in [AfpmConfig::inference(), AfpmConfig::training()] {
        let afpm = Afpm::new(config).unwrap();
        let out = afpm
            .apply(&vec![0.0f32; 16000], &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert!(out.pitch_threshold.is_none());
        assert!(out.magnitude.iter().all(|&m| m == 0.0));
        assert_eq!(out.magnitude.dim(), (257, 126));
    }
}

#[test]
fn test_noise_output_non_negative() {
    for (seed, config) in [(1, AfpmConfig::inference()), (2, AfpmConfig::training())] {
        let afpm = Afpm::new(config).unwrap();
        let out = afpm
            .apply(&white_noise(20000, seed), &mut ChaCha8Rng::seed_from_u64(seed))
            .unwrap();
        assert!(out.magnitude.iter().all(|&m| m >= 0.0 && m.is_finite()));
    }
}

#[test]
fn test_masking_never_increases_energy() {
    let afpm = Afpm::new(AfpmConfig::training()).unwrap();
    let wave = harmonic_tone(16000, 180.0);
    let raw = afpm.magnitude(&wave).unwrap();
    let out = afpm.apply(&wave, &mut ChaCha8Rng::seed_from_u64(11)).unwrap();

    for (m, r) in out.magnitude.iter().zip(raw.iter()) {
        assert!(*m == 0.0 || m == r);
    }
}

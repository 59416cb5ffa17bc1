//! Paired dataset assembly from metadata on disk

use std::path::Path;

use vg_file::{write_meta, write_wav_f32, MetaEntry, HIGH_RES_META, LOW_RES_META};
use vg_ml::{MaskedMagnitudeDataset, MlError, RawPairDataset, RunConfig};

fn constant(dir: &Path, name: &str, value: f32, len: usize, sr: u32) -> MetaEntry {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    write_wav_f32(&path, &vec![value; len], sr).unwrap();
    MetaEntry::new(path, len as u64)
}

fn write_lists(meta_dir: &Path, low: &[MetaEntry], high: &[MetaEntry]) {
    write_meta(meta_dir.join(LOW_RES_META), low).unwrap();
    write_meta(meta_dir.join(HIGH_RES_META), high).unwrap();
}

fn whole_files() -> RunConfig {
    let mut config = RunConfig::default();
    config.data.segment_seconds = None;
    config
}

#[test]
fn test_lists_are_paired_by_sorted_file_name() {
    let root = tempfile::tempdir().unwrap();
    let lr = root.path().join("lr");
    let hr = root.path().join("hr");

    // Low-res list arrives in reverse order
    let low = vec![
        constant(&lr, "b.wav", 0.2, 1000, 16000),
        constant(&lr, "a.wav", 0.1, 1000, 16000),
    ];
    let high = vec![
        constant(&hr, "a.wav", 0.5, 1000, 16000),
        constant(&hr, "b.wav", 0.6, 1000, 16000),
    ];
    let meta = root.path().join("egs");
    write_lists(&meta, &low, &high);

    let dataset = RawPairDataset::from_dir(&meta, &whole_files()).unwrap();
    assert_eq!(dataset.len(), 2);

    let first = dataset.get(0).unwrap();
    assert_eq!(first.stem, "a");
    assert!((first.low[0] - 0.1).abs() < 1e-6);
    assert!((first.high[0] - 0.5).abs() < 1e-6);

    let second = dataset.get(1).unwrap();
    assert_eq!(second.stem, "b");
    assert!((second.low[0] - 0.2).abs() < 1e-6);
}

#[test]
fn test_name_mismatch_fails_before_reading() {
    let root = tempfile::tempdir().unwrap();
    let meta = root.path().join("egs");
    // Paths need not exist: alignment is checked first
    write_lists(
        &meta,
        &[MetaEntry::new("lr/a.wav", 16000)],
        &[MetaEntry::new("hr/z.wav", 16000)],
    );
    assert!(matches!(
        RawPairDataset::from_dir(&meta, &whole_files()),
        Err(MlError::Alignment(_))
    ));
}

#[test]
fn test_missing_metadata() {
    let root = tempfile::tempdir().unwrap();
    assert!(matches!(
        RawPairDataset::from_dir(root.path(), &whole_files()),
        Err(MlError::File(_))
    ));
}

#[test]
fn test_upsample_matches_high_res_length() {
    let root = tempfile::tempdir().unwrap();
    let low = vec![constant(&root.path().join("lr"), "a.wav", 0.1, 800, 8000)];
    let high = vec![constant(&root.path().join("hr"), "a.wav", 0.1, 1600, 16000)];
    let meta = root.path().join("egs");
    write_lists(&meta, &low, &high);

    let mut config = whole_files();
    config.data.lr_sr = 8000;
    let dataset = RawPairDataset::from_dir(&meta, &config).unwrap();
    let pair = dataset.get(0).unwrap();
    assert_eq!(pair.low.len(), 1600);
    assert_eq!(pair.low[799], 0.1);
    assert_eq!(pair.low[800], 0.0);
}

#[test]
fn test_unexpected_sample_rate() {
    let root = tempfile::tempdir().unwrap();
    let low = vec![constant(&root.path().join("lr"), "a.wav", 0.1, 1000, 22050)];
    let high = vec![constant(&root.path().join("hr"), "a.wav", 0.1, 1000, 16000)];
    let meta = root.path().join("egs");
    write_lists(&meta, &low, &high);

    let dataset = RawPairDataset::from_dir(&meta, &whole_files()).unwrap();
    assert!(matches!(dataset.get(0), Err(MlError::SampleRate { got: 22050, .. })));
}

#[test]
fn test_masked_items_are_reproducible_per_epoch() {
    let root = tempfile::tempdir().unwrap();
    let tone: Vec<f32> = (0..8000)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 500.0 * i as f32 / 16000.0).sin())
        .collect();
    let lr = root.path().join("lr");
    let hr = root.path().join("hr");
    std::fs::create_dir_all(&lr).unwrap();
    std::fs::create_dir_all(&hr).unwrap();
    write_wav_f32(lr.join("a.wav"), &tone, 16000).unwrap();
    write_wav_f32(hr.join("a.wav"), &tone, 16000).unwrap();
    let meta = root.path().join("egs");
    write_lists(
        &meta,
        &[MetaEntry::new(lr.join("a.wav"), 8000)],
        &[MetaEntry::new(hr.join("a.wav"), 8000)],
    );

    let mut config = RunConfig::default();
    config.data.segment_seconds = Some(0.25);
    config.data.stride_seconds = 0.25;
    let dataset = MaskedMagnitudeDataset::from_dir(&meta, &config).unwrap();
    assert_eq!(dataset.len(), 2);

    let a = dataset.get(1, 3).unwrap();
    let b = dataset.get(1, 3).unwrap();
    assert_eq!(a.masked, b.masked);
    assert_eq!(a.masked.dim(), a.clean.dim());
    assert_eq!(a.masked.dim(), (257, 1 + 4000 / 128));
    assert!(a.masked.iter().all(|&m| m >= 0.0));
}

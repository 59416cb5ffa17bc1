//! Corpus scanning against a temporary speaker tree

use std::fs;
use std::path::Path;

use vg_file::{create_meta, read_meta, write_split, write_wav_f32, ScanConfig};

fn make_corpus(root: &Path, speakers: usize, files_per_speaker: usize) {
    for s in 0..speakers {
        let chapter = root.join("train-clean").join(format!("spk{:02}", s)).join("ch1");
        fs::create_dir_all(&chapter).unwrap();
        for f in 0..files_per_speaker {
            let len = 100 * (f + 1);
            write_wav_f32(chapter.join(format!("utt{}.wav", f)), &vec![0.1; len], 16000).unwrap();
        }
        // Non-audio files are ignored
        fs::write(chapter.join("notes.txt"), "x").unwrap();
    }
}

#[test]
fn test_speaker_split() {
    let dir = tempfile::tempdir().unwrap();
    make_corpus(dir.path(), 10, 2);

    let split = create_meta(dir.path(), &ScanConfig::default().with_num_threads(2)).unwrap();
    assert_eq!(split.train.entries.len(), 18);
    assert_eq!(split.test.entries.len(), 2);
    assert!(split.test.entries.iter().all(|e| e.path.to_string_lossy().contains("spk09")));
    assert_eq!(split.train.entries[0].frames, 100);
    assert_eq!(split.train.entries[1].frames, 200);
}

#[test]
fn test_limit_truncates() {
    let dir = tempfile::tempdir().unwrap();
    make_corpus(dir.path(), 10, 3);

    let config = ScanConfig::default().with_num_threads(4).with_limit(Some(5));
    let split = create_meta(dir.path(), &config).unwrap();
    assert_eq!(split.train.entries.len(), 5);
    assert_eq!(split.test.entries.len(), 3);
}

#[test]
fn test_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    make_corpus(dir.path(), 10, 1);
    let broken = dir.path().join("train-clean/spk03/ch1/broken.wav");
    fs::write(&broken, b"not a wav file").unwrap();

    let split = create_meta(dir.path(), &ScanConfig::default()).unwrap();
    assert_eq!(split.train.failures, 1);
    assert_eq!(split.train.entries.len(), 9);
}

#[test]
fn test_no_speakers_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(create_meta(dir.path(), &ScanConfig::default()).is_err());
}

#[test]
fn test_write_split_layout() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    make_corpus(&corpus, 10, 1);

    let split = create_meta(&corpus, &ScanConfig::default()).unwrap();
    let out = dir.path().join("meta");
    write_split(&out, "raw", &split).unwrap();

    assert_eq!(read_meta(out.join("tr/raw.json")).unwrap().len(), 9);
    assert_eq!(read_meta(out.join("val/raw.json")).unwrap().len(), 1);
}

//! End-to-end training on a tiny synthetic corpus

use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use vg_file::{write_meta, write_wav_f32, MetaEntry, HIGH_RES_META, LOW_RES_META};
use vg_ml::{ModelConfig, RunConfig, Solver, SolverState};

const SR: u32 = 16000;

fn voiced(len: usize, f0: f32, phase: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SR as f32;
            (1..=5)
                .map(|h| 0.3 / h as f32 * (2.0 * PI * f0 * h as f32 * t + phase).sin())
                .sum()
        })
        .collect()
}

/// Write `n` paired files under `<root>/<split>` and its metadata directory
fn make_split(root: &Path, split: &str, n: usize) -> PathBuf {
    let audio = root.join("audio").join(split);
    std::fs::create_dir_all(audio.join("lr")).unwrap();
    std::fs::create_dir_all(audio.join("hr")).unwrap();

    let mut low = Vec::new();
    let mut high = Vec::new();
    for i in 0..n {
        let name = format!("utt{}.wav", i);
        let clean = voiced(8000, 180.0 + 40.0 * i as f32, i as f32);
        let noisy: Vec<f32> = clean
            .iter()
            .enumerate()
            .map(|(j, s)| s + 0.01 * (j as f32 * 0.37).sin())
            .collect();

        let lr_path = audio.join("lr").join(&name);
        let hr_path = audio.join("hr").join(&name);
        write_wav_f32(&lr_path, &noisy, SR).unwrap();
        write_wav_f32(&hr_path, &clean, SR).unwrap();
        low.push(MetaEntry::new(lr_path, noisy.len() as u64));
        high.push(MetaEntry::new(hr_path, clean.len() as u64));
    }

    let meta = root.join("egs").join(split);
    write_meta(meta.join(LOW_RES_META), &low).unwrap();
    write_meta(meta.join(HIGH_RES_META), &high).unwrap();
    meta
}

fn corpus(root: &Path) -> (PathBuf, PathBuf, PathBuf) {
    (
        make_split(root, "tr", 3),
        make_split(root, "cv", 2),
        make_split(root, "tt", 1),
    )
}

fn config(corpus: &(PathBuf, PathBuf, PathBuf), run_dir: &Path, epochs: usize) -> RunConfig {
    let mut config = RunConfig::default();
    config.seed = 11;
    config.data.train_dir = corpus.0.clone();
    config.data.valid_dir = Some(corpus.1.clone());
    config.data.test_dir = Some(corpus.2.clone());
    config.data.segment_seconds = Some(0.25);
    config.data.stride_seconds = 0.25;
    config.data.batch_size = 2;
    config.data.num_workers = 2;
    config.model = ModelConfig {
        hidden_channels: 2,
        depth: 1,
        kernel_size: 3,
        adversarial: true,
        discriminator_channels: 2,
    };
    config.solver.epochs = epochs;
    config.solver.eval_every = 1;
    config.solver.num_prints = 2;
    config.solver.checkpoint_file = run_dir.join("checkpoint.json");
    config.solver.history_file = run_dir.join("history.json");
    config.solver.samples_dir = run_dir.join("samples");
    config.inference.griffin_lim.iterations = 2;
    config.inference.chunk_seconds = 0.25;
    config
}

#[test]
fn test_resumed_run_matches_uninterrupted_run() {
    let root = tempfile::tempdir().unwrap();
    let corpus = corpus(root.path());

    let straight_dir = root.path().join("straight");
    let mut straight = Solver::from_config(config(&corpus, &straight_dir, 2)).unwrap();
    let straight_history = straight.train().unwrap().to_vec();
    assert_eq!(straight_history.len(), 2);
    assert_eq!(straight.state(), SolverState::Done);

    let resumed_dir = root.path().join("resumed");
    let mut first = Solver::from_config(config(&corpus, &resumed_dir, 1)).unwrap();
    assert_eq!(first.train().unwrap().len(), 1);
    assert!(resumed_dir.join("checkpoint.json").exists());

    let mut second = Solver::from_config(config(&corpus, &resumed_dir, 2)).unwrap();
    let resumed_history = second.train().unwrap().to_vec();
    assert_eq!(resumed_history.len(), 2);

    for (epoch, (a, b)) in straight_history.iter().zip(&resumed_history).enumerate() {
        assert_eq!(
            a.keys().collect::<Vec<_>>(),
            b.keys().collect::<Vec<_>>(),
            "metric keys differ at epoch {}",
            epoch + 1
        );
        for (key, value) in a {
            assert_relative_eq!(*value, b[key], max_relative = 1e-4, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_metrics_and_samples_written() {
    let root = tempfile::tempdir().unwrap();
    let corpus = corpus(root.path());
    let run_dir = root.path().join("run");

    let mut solver = Solver::from_config(config(&corpus, &run_dir, 1)).unwrap();
    let history = solver.train().unwrap().to_vec();
    let metrics = &history[0];

    for key in [
        "total_loss",
        "generator_l1_loss",
        "discriminator_loss",
        "valid_total_loss",
        "valid_generator_l1_loss",
        "valid_evaluation_loss",
        "evaluation_loss",
        "best_loss",
        "lsd",
        "quality",
    ] {
        assert!(metrics.contains_key(key), "missing metric {}", key);
    }
    assert_eq!(metrics["evaluation_loss"], metrics["valid_evaluation_loss"]);
    assert_eq!(metrics["best_loss"], metrics["valid_evaluation_loss"]);
    assert!(solver.best_states().is_some());

    for kind in ["lr", "hr", "pr"] {
        assert!(run_dir.join("samples").join(format!("utt0_{}.wav", kind)).exists());
    }

    let saved: Vec<vg_ml::EpochMetrics> =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("history.json")).unwrap()).unwrap();
    assert_eq!(saved, history);
}

#[test]
fn test_restart_ignores_checkpoint() {
    let root = tempfile::tempdir().unwrap();
    let corpus = corpus(root.path());
    let run_dir = root.path().join("run");

    Solver::from_config(config(&corpus, &run_dir, 1)).unwrap().train().unwrap();

    let mut restarted = config(&corpus, &run_dir, 1);
    restarted.solver.restart = true;
    let mut solver = Solver::from_config(restarted).unwrap();
    // Without restart this would resume with a complete history and do nothing
    assert_eq!(solver.train().unwrap().len(), 1);
}

#[test]
fn test_continue_from_best_state() {
    let root = tempfile::tempdir().unwrap();
    let corpus = corpus(root.path());
    let source_dir = root.path().join("source");
    Solver::from_config(config(&corpus, &source_dir, 1)).unwrap().train().unwrap();

    let mut next = config(&corpus, &root.path().join("next"), 2);
    next.solver.continue_from = Some(source_dir.join("checkpoint.json"));
    next.solver.continue_best = true;
    next.solver.keep_history = false;

    let mut solver = Solver::from_config(next).unwrap();
    solver.resume().unwrap();
    assert!(solver.history().is_empty());
    assert!(solver.best_states().is_some());
}

#[test]
fn test_malformed_checkpoint_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let corpus = corpus(root.path());
    let run_dir = root.path().join("run");
    std::fs::create_dir_all(&run_dir).unwrap();
    std::fs::write(run_dir.join("checkpoint.json"), "garbage").unwrap();

    let mut solver = Solver::from_config(config(&corpus, &run_dir, 1)).unwrap();
    assert!(matches!(solver.train(), Err(vg_ml::MlError::Checkpoint { .. })));
}

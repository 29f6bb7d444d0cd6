use anyhow::Result;
use candle_core::{Device, Tensor};
use std::cell::Cell;
use std::collections::HashMap;
use tempfile::TempDir;

use mrc_core::{AnnotatedEncoding, AnswerSpan, ArtifactChunking, BatchEncoding};
use mrc_model::{BertSpanModel, FreezePolicy, SpanOutput, SpanPredictor, TrainableSpanModel};
use mrc_train::{
    load_split_loaders, Evaluator, SpanDataset, SpanLoader, TrainOptions, Trainer, INTERMEDIATE_CHECKPOINT,
};

const SEQ_LEN: usize = 8;

fn tiny_config() -> serde_json::Value {
    serde_json::json!({
        "vocab_size": 32,
        "hidden_size": 16,
        "num_hidden_layers": 2,
        "num_attention_heads": 2,
        "intermediate_size": 32,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.0,
        "max_position_embeddings": 64,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0
    })
}

/// Rows of `[a, b, 3, ...]` labelled with the given (start, end) pairs.
fn encoding(rows: &[([u32; 2], (usize, usize))]) -> AnnotatedEncoding {
    let input_ids = rows
        .iter()
        .map(|([a, b], _)| {
            let mut ids = vec![3u32; SEQ_LEN];
            ids[0] = *a;
            ids[1] = *b;
            ids
        })
        .collect();
    let attention_mask = vec![vec![1u32; SEQ_LEN]; rows.len()];
    let spans: Vec<AnswerSpan> = rows.iter().map(|(_, (s, e))| AnswerSpan { start: Some(*s), end: Some(*e) }).collect();
    BatchEncoding { input_ids, attention_mask }.annotate(&spans).unwrap()
}

fn loader(encodings: Vec<AnnotatedEncoding>, batch_size: usize) -> SpanLoader {
    SpanLoader::new(SpanDataset::from_encodings(encodings), batch_size).unwrap()
}

fn options(out: &TempDir, every: usize) -> TrainOptions {
    TrainOptions {
        model_dir: out.path().join("unused"),
        learning_rate: 1e-2,
        freeze: FreezePolicy::None,
        iterations_before_saving_model: every,
        save_model_name: "final-bert".into(),
        output_path: out.path().join("models"),
    }
}

/// Start logits peak at `input_ids[:, 0]`, end logits at `input_ids[:, 1]`.
struct EchoModel {
    device: Device,
}

impl SpanPredictor for EchoModel {
    fn forward(&self, input_ids: &Tensor, _mask: &Tensor, _positions: Option<(&Tensor, &Tensor)>) -> Result<SpanOutput> {
        let ids: Vec<Vec<u32>> = input_ids.to_vec2()?;
        let (b, t) = input_ids.dims2()?;
        let one_hot = |col: usize| -> Result<Tensor> {
            let mut v = vec![0f32; b * t];
            for (r, row) in ids.iter().enumerate() {
                v[r * t + row[col] as usize] = 1.0;
            }
            Ok(Tensor::from_vec(v, (b, t), &self.device)?)
        };
        Ok(SpanOutput { loss: None, start_logits: one_hot(0)?, end_logits: one_hot(1)? })
    }

    fn device(&self) -> &Device { &self.device }
}

#[test]
fn loader_batches_preserve_order_and_remainder() {
    let l = loader(
        vec![
            encoding(&[([1, 2], (1, 2)), ([2, 3], (2, 3))]),
            encoding(&[([4, 5], (4, 5)), ([5, 6], (5, 6)), ([6, 7], (6, 7))]),
        ],
        2,
    );
    assert_eq!(l.len(), 3);
    let batches: Vec<_> = l.batches().collect::<Result<_>>().unwrap();
    assert_eq!(batches[0].input_ids.dims(), &[2, SEQ_LEN]);
    assert_eq!(batches[2].len(), 1);
    assert_eq!(batches[1].start_positions.to_vec1::<i64>().unwrap(), vec![4, 5]);
    // re-iterable
    assert_eq!(l.batches().count(), 3);
}

#[test]
fn evaluation_pools_start_and_end_accuracy() {
    // Two batches: one correct and one wrong start each, every end correct.
    let l = loader(
        vec![encoding(&[([1, 2], (1, 2)), ([3, 4], (5, 4))]), encoding(&[([2, 6], (2, 6)), ([4, 7], (0, 7))])],
        2,
    );
    let model = EchoModel { device: Device::Cpu };

    let report = Evaluator::run(&model, &[l]).expect("evaluate");

    assert!((report.accuracy - 0.75).abs() < 1e-12);
    assert!((report.start_accuracy - 0.5).abs() < 1e-12);
    assert!((report.end_accuracy - 1.0).abs() < 1e-12);
    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.batches[0].start_pred, vec![1, 3]);
    assert_eq!(report.batches[0].start_true, vec![1, 5]);
}

#[test]
fn evaluating_nothing_is_an_error() {
    let model = EchoModel { device: Device::Cpu };
    assert!(Evaluator::run(&model, &[]).is_err());
}

#[test]
fn training_checkpoints_and_reports_first_output_once() {
    let out = TempDir::new().unwrap();
    let model = BertSpanModel::from_config(tiny_config(), FreezePolicy::None, &Device::Cpu).unwrap();
    let loaders: Vec<SpanLoader> = (0..3)
        .map(|_| loader(vec![encoding(&[([5, 6], (1, 2)), ([7, 8], (3, 4)), ([9, 10], (0, 0))])], 2))
        .collect();

    let calls = Cell::new(0);
    let outcome = {
        let mut trainer = Trainer::new(options(&out, 2))
            .unwrap()
            .on_first_output(|output: &SpanOutput| {
                assert!(output.loss.is_some());
                calls.set(calls.get() + 1);
            });
        trainer.run(model, &loaders).expect("train")
    };

    assert_eq!(calls.get(), 1);
    assert_eq!(outcome.steps, 6);
    assert!(outcome.last_loss.is_some_and(f32::is_finite));

    let models = out.path().join("models");
    assert!(mrc_model::checkpoint_path(&models, INTERMEDIATE_CHECKPOINT).exists());
    assert!(mrc_model::checkpoint_path(&models, "final-bert").exists());
    assert!(models.join(mrc_model::CONFIG_FILE).exists());

    let reloaded = Evaluator::load_checkpoint(&models, "final-bert", &Device::Cpu).expect("reload");
    let report = Evaluator::run(&reloaded, &loaders).expect("evaluate");
    assert!((0.0..=1.0).contains(&report.accuracy));
}

/// Train a fresh tiny model under `freeze` and return its weights before and after.
fn train_snapshots(freeze: FreezePolicy) -> (HashMap<String, Tensor>, HashMap<String, Tensor>) {
    let out = TempDir::new().unwrap();
    let model = BertSpanModel::from_config(tiny_config(), freeze, &Device::Cpu).unwrap();
    let before = model.save(&out.path().join("before"), "snapshot").unwrap();
    let loaders = vec![loader(vec![encoding(&[([5, 6], (1, 2)), ([7, 8], (3, 4))])], 2)];

    let mut trainer = Trainer::new(options(&out, 1)).unwrap();
    trainer.run(model, &loaders).expect("train");

    let a = candle_core::safetensors::load(&before, &Device::Cpu).unwrap();
    let b = candle_core::safetensors::load(
        mrc_model::checkpoint_path(&out.path().join("models"), "final-bert"),
        &Device::Cpu,
    )
    .unwrap();
    (a, b)
}

fn max_diff(a: &HashMap<String, Tensor>, b: &HashMap<String, Tensor>, name: &str) -> f32 {
    (&a[name] - &b[name]).unwrap().abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap()
}

#[test]
fn frozen_embeddings_are_left_untouched() {
    let (a, b) = train_snapshots(FreezePolicy::EmbeddingsOnly);
    for name in a.keys().filter(|n| n.starts_with("bert.embeddings.")) {
        assert_eq!(max_diff(&a, &b, name), 0.0, "{name} moved");
    }
    assert!(max_diff(&a, &b, "qa_outputs.weight") > 0.0);
    assert!(max_diff(&a, &b, "bert.encoder.layer.0.intermediate.dense.weight") > 0.0);
}

#[test]
fn freezing_one_layer_still_trains_the_layers_above() {
    let (a, b) = train_snapshots(FreezePolicy::EmbeddingsPlusLayers(1));
    for name in a.keys().filter(|n| n.starts_with("bert.embeddings.") || n.starts_with("bert.encoder.layer.0.")) {
        assert_eq!(max_diff(&a, &b, name), 0.0, "{name} moved");
    }
    assert!(max_diff(&a, &b, "bert.encoder.layer.1.output.dense.weight") > 0.0);
    assert!(max_diff(&a, &b, "bert.encoder.layer.1.attention.self.query.weight") > 0.0);
}

#[test]
fn unfrozen_training_updates_the_embeddings() {
    let (a, b) = train_snapshots(FreezePolicy::None);
    assert!(max_diff(&a, &b, "bert.embeddings.word_embeddings.weight") > 0.0);
    assert!(max_diff(&a, &b, "bert.encoder.layer.0.attention.output.LayerNorm.weight") > 0.0);
}

#[test]
fn split_loaders_follow_persisted_artifacts() {
    let tmp = TempDir::new().unwrap();
    let encodings = vec![
        encoding(&[([1, 2], (1, 2))]),
        encoding(&[([3, 4], (3, 4))]),
        encoding(&[([5, 6], (5, 6))]),
    ];
    let chunking = ArtifactChunking::from_chunk_size(2);
    mrc_encode::persist(&encodings, chunking, tmp.path(), "train").unwrap();

    let loaders = load_split_loaders(tmp.path(), "train", 4).unwrap();
    assert_eq!(loaders.len(), 2);
    assert_eq!(loaders[0].len(), 1);
    let first = loaders[0].batches().next().unwrap().unwrap();
    assert_eq!(first.len(), 2);
}

#[test]
fn zero_save_interval_is_rejected() {
    let out = TempDir::new().unwrap();
    assert!(Trainer::new(options(&out, 0)).is_err());
}

#[test]
fn learning_rate_must_be_a_positive_number() {
    let out = TempDir::new().unwrap();
    for lr in [f64::NAN, 0.0, -1e-3] {
        let opts = TrainOptions { learning_rate: lr, ..options(&out, 1) };
        assert!(Trainer::new(opts).is_err(), "lr={lr} accepted");
    }
    let opts = TrainOptions { learning_rate: 5e-5, ..options(&out, 1) };
    assert!(Trainer::new(opts).is_ok());
}

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use mrc_core::records::Columns;
use mrc_core::{Record, NOT_FOUND};
use mrc_encode::{artifact_path, load_tokenizer, read_split, EncodeOptions, EncodingBuilder};

const WORDS: &[&str] = &[
    "where", "is", "paris", "in", "france", "who", "wrote", "hamlet", "shakespeare", "the", "play", "?",
];

fn write_tokenizer(dir: &Path) -> PathBuf {
    let mut vocab = serde_json::Map::new();
    for (id, tok) in ["[PAD]", "[UNK]", "[CLS]", "[SEP]"].iter().chain(WORDS).enumerate() {
        vocab.insert(tok.to_string(), serde_json::json!(id));
    }
    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": { "type": "BertProcessing", "sep": ["[SEP]", 3], "cls": ["[CLS]", 2] },
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
    });
    let path = dir.join("tokenizer.json");
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
    path
}

fn options(tmp: &Path, batch_size: usize, chunk_size: i64, max_length: usize) -> EncodeOptions {
    EncodeOptions {
        tokenizer: tmp.to_path_buf(),
        batch_size,
        chunk_size,
        output_path: tmp.join("out"),
        file_prefix: "train".into(),
        max_length,
    }
}

fn columns() -> Columns {
    Columns::from_records(vec![
        Record::new("Where is Paris?", "Paris is in France", "France"),
        Record::new("Who wrote Hamlet?", "Shakespeare wrote the play Hamlet", "Shakespeare"),
        Record::new("Where is Paris?", "Paris is in France", "in France"),
        Record::new("Who wrote Hamlet?", "Shakespeare wrote the play", "Marlowe"),
        Record::new("Where is Paris?", "Paris is in France", "France"),
    ])
}

#[test]
fn tokenizer_pads_pairs_to_fixed_length() {
    let tmp = TempDir::new().unwrap();
    write_tokenizer(tmp.path());
    let tokenizer = load_tokenizer(tmp.path(), 16).expect("tokenizer");

    let enc = tokenizer.encode(("where is paris", "paris is in france"), true).unwrap();
    assert_eq!(enc.get_ids().len(), 16);
    assert_eq!(&enc.get_tokens()[..5], &["[CLS]", "where", "is", "paris", "[SEP]"]);
    assert_eq!(enc.get_attention_mask().iter().sum::<u32>(), 10);
}

#[test]
fn build_labels_every_record_and_chunks_artifacts() {
    let tmp = TempDir::new().unwrap();
    write_tokenizer(tmp.path());
    let builder = EncodingBuilder::new(options(tmp.path(), 2, 2, 16)).expect("builder");

    let encodings = builder.build(&columns()).expect("build");

    assert_eq!(encodings.len(), 3, "5 records in batches of 2");
    assert_eq!(encodings.iter().map(|e| e.len()).sum::<usize>(), 5);
    for e in &encodings {
        assert_eq!(e.start_positions().len(), e.len());
        assert_eq!(e.end_positions().len(), e.len());
        assert!(e.input_ids().iter().all(|row| row.len() == 16));
    }

    // [CLS] where is paris ? [SEP] paris is in france [SEP]
    assert_eq!(encodings[0].start_positions()[0], 9);
    assert_eq!(encodings[0].end_positions()[0], 9);
    // [CLS] who wrote hamlet ? [SEP] shakespeare ...
    assert_eq!(encodings[0].start_positions()[1], 6);
    // "in france": first word "in" and last word "france"
    assert_eq!((encodings[1].start_positions()[0], encodings[1].end_positions()[0]), (8, 9));
    // "marlowe" never appears, nor does any prefix of it
    assert_eq!(encodings[1].start_positions()[1], NOT_FOUND);

    let out = tmp.path().join("out");
    assert!(artifact_path(&out, "train", 1).exists());
    assert!(artifact_path(&out, "train", 2).exists());
    assert!(!artifact_path(&out, "train", 3).exists());

    let restored = read_split(&out, "train").expect("read back");
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.concat(), encodings);
}

#[test]
fn non_positive_chunk_size_writes_one_artifact() {
    let tmp = TempDir::new().unwrap();
    write_tokenizer(tmp.path());
    let builder = EncodingBuilder::new(options(tmp.path(), 2, 0, 16)).expect("builder");

    let encodings = builder.build(&columns()).expect("build");

    let restored = read_split(&tmp.path().join("out"), "train").expect("read back");
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].len(), encodings.len());
}

#[test]
fn truncated_answer_is_labelled_not_found() {
    let tmp = TempDir::new().unwrap();
    write_tokenizer(tmp.path());
    let builder = EncodingBuilder::new(options(tmp.path(), 8, 0, 8)).expect("builder");

    let cols = Columns::from_records(vec![Record::new("where is paris", "paris is in france", "France")]);
    let encodings = builder.encode_all(&cols).expect("encode");

    assert_eq!(encodings[0].input_ids()[0].len(), 8);
    assert_eq!(encodings[0].start_positions(), &[NOT_FOUND]);
    assert_eq!(encodings[0].end_positions(), &[NOT_FOUND]);
}

#[test]
fn zero_batch_size_is_rejected() {
    let tmp = TempDir::new().unwrap();
    write_tokenizer(tmp.path());
    assert!(EncodingBuilder::new(options(tmp.path(), 0, 0, 16)).is_err());
}

#[test]
fn missing_split_is_an_error() {
    let tmp = TempDir::new().unwrap();
    assert!(read_split(tmp.path(), "dev").is_err());
}

#[test]
fn misaligned_columns_are_rejected_before_encoding() {
    let tmp = TempDir::new().unwrap();
    write_tokenizer(tmp.path());
    let builder = EncodingBuilder::new(options(tmp.path(), 2, 0, 16)).unwrap();

    let mut cols = columns();
    cols.answers.pop();
    let err = builder.build(&cols).unwrap_err();
    match err.downcast_ref::<mrc_core::error::Error>() {
        Some(mrc_core::error::Error::Misaligned { what, expected, actual }) => {
            assert_eq!(*what, "answers");
            assert_eq!((*expected, *actual), (5, 4));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!artifact_path(&tmp.path().join("out"), "train", 1).exists());
}

//! Layered configuration for the encode/train/evaluate stages.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml` and
//! `APP_*` env vars (`__` separates nested keys, e.g. `APP_TRAIN__LEARNING_RATE`).
//! `expand_path` expands `~` and `${VAR}` in user-provided paths.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_in(Path::new("."))
    }

    /// Same as [`Config::load`] but resolves the TOML files against `dir`.
    pub fn load_in(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Defaults::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn encode(&self) -> Result<EncodeSection> {
        let section: EncodeSection = self.section("encode")?;
        if section.batch_size == 0 {
            return Err(Error::InvalidConfig("encode.batch_size must be positive".into()));
        }
        Ok(section)
    }

    pub fn train(&self) -> Result<TrainSection> {
        let section: TrainSection = self.section("train")?;
        if section.batch_size == 0 {
            return Err(Error::InvalidConfig("train.batch_size must be positive".into()));
        }
        if section.iterations_before_saving_model == 0 {
            return Err(Error::InvalidConfig("train.iterations_before_saving_model must be positive".into()));
        }
        if section.freeze_layer_count < -1 {
            return Err(Error::InvalidConfig(format!(
                "train.freeze_layer_count must be -1, 0 or a positive layer count, got {}",
                section.freeze_layer_count
            )));
        }
        Ok(section)
    }

    pub fn evaluate(&self) -> Result<EvaluateSection> {
        let section: EvaluateSection = self.section("evaluate")?;
        if section.batch_size == 0 {
            return Err(Error::InvalidConfig("evaluate.batch_size must be positive".into()));
        }
        Ok(section)
    }

    pub fn section<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("section '{key}': {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeSplit {
    /// JSON Lines file with `Context`, `Question` and `Answer` columns.
    pub input: PathBuf,
    /// Encodings per artifact; `<= 0` writes the whole split as one artifact.
    pub chunk_size: i64,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeSection {
    pub tokenizer: String,
    pub batch_size: usize,
    pub max_length: usize,
    pub output_path: PathBuf,
    #[serde(default)]
    pub splits: Vec<EncodeSplit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSection {
    pub model_dir: PathBuf,
    pub learning_rate: f64,
    pub freeze_layer_count: i64,
    pub iterations_before_saving_model: usize,
    pub save_model_name: String,
    pub output_path: PathBuf,
    pub batch_size: usize,
    pub data_path: PathBuf,
    pub data_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateSection {
    pub model_path: PathBuf,
    pub model_name: String,
    pub batch_size: usize,
    pub data_path: PathBuf,
    pub data_prefix: String,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct Defaults {
    encode: EncodeSection,
    train: TrainSection,
    evaluate: EvaluateSection,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            encode: EncodeSection {
                tokenizer: "models/bert-base-uncased".into(),
                batch_size: 16,
                max_length: 512,
                output_path: "data/encodings".into(),
                splits: Vec::new(),
            },
            train: TrainSection {
                model_dir: "models/bert-base-uncased".into(),
                learning_rate: 5e-5,
                freeze_layer_count: 0,
                iterations_before_saving_model: 5,
                save_model_name: "final-bert".into(),
                output_path: "data/models".into(),
                batch_size: 8,
                data_path: "data/encodings".into(),
                data_prefix: "train".into(),
            },
            evaluate: EvaluateSection {
                model_path: "data/models".into(),
                model_name: "final-bert".into(),
                batch_size: 8,
                data_path: "data/encodings".into(),
                data_prefix: "dev".into(),
                report_path: None,
            },
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use mrc_core::error::Error;
use mrc_core::records::Columns;
use mrc_core::{divide_into_chunks, locate_answer_span, AnnotatedEncoding, ArtifactChunking, BatchEncoding};

use crate::artifact::persist;
use crate::tokenizer::{load_tokenizer, token_strings};

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Model directory holding `tokenizer.json`, or the file itself.
    pub tokenizer: PathBuf,
    pub batch_size: usize,
    /// Encodings per artifact; `<= 0` persists the split as a single artifact.
    pub chunk_size: i64,
    pub output_path: PathBuf,
    pub file_prefix: String,
    pub max_length: usize,
}

/// Tokenises question/context pairs batch by batch and labels each record with its answer span.
pub struct EncodingBuilder {
    tokenizer: Tokenizer,
    options: EncodeOptions,
}

impl EncodingBuilder {
    pub fn new(options: EncodeOptions) -> Result<Self> {
        let tokenizer = load_tokenizer(&options.tokenizer, options.max_length)?;
        Self::with_tokenizer(tokenizer, options)
    }

    /// Use an already configured tokenizer as is.
    pub fn with_tokenizer(tokenizer: Tokenizer, options: EncodeOptions) -> Result<Self> {
        if options.batch_size == 0 {
            bail!(Error::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self { tokenizer, options })
    }

    /// Encode and annotate every record, persist the result and return all encodings in order.
    pub fn build(&self, columns: &Columns) -> Result<Vec<AnnotatedEncoding>> {
        let encodings = self.encode_all(columns)?;
        let chunking = ArtifactChunking::from_chunk_size(self.options.chunk_size);
        persist(&encodings, chunking, &self.options.output_path, &self.options.file_prefix)?;
        Ok(encodings)
    }

    /// Steps before persistence: batch, tokenise, locate spans.
    pub fn encode_all(&self, columns: &Columns) -> Result<Vec<AnnotatedEncoding>> {
        for (what, actual) in [("contexts", columns.contexts.len()), ("answers", columns.answers.len())] {
            if actual != columns.questions.len() {
                bail!(Error::Misaligned { what, expected: columns.questions.len(), actual });
            }
        }
        let size = self.options.batch_size;
        let questions = divide_into_chunks(&columns.questions, size)?;
        let contexts = divide_into_chunks(&columns.contexts, size)?;
        let answers = divide_into_chunks(&columns.answers, size)?;

        let total = columns.len().div_ceil(size);
        info!("Encoding {} records in {} batches for '{}'", columns.len(), total, self.options.file_prefix);
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg}")?
                .progress_chars("#>-"),
        );

        let mut encodings = Vec::with_capacity(total);
        for (i, ((q, c), a)) in questions.zip(contexts).zip(answers).enumerate() {
            let encoding = self.encode_batch(q, c)?;
            let annotated = self.annotate(encoding, a).with_context(|| format!("batch {}", i + 1))?;
            debug!("Encoded batch {}/{} ({} records)", i + 1, total, annotated.len());
            encodings.push(annotated);
            pb.inc(1);
        }
        pb.finish_with_message("done");
        Ok(encodings)
    }

    fn encode_batch(&self, questions: &[String], contexts: &[String]) -> Result<BatchEncoding> {
        let pairs: Vec<(String, String)> = questions.iter().cloned().zip(contexts.iter().cloned()).collect();
        let encoded = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| anyhow!("Tokenization failed: {e}"))?;
        let (input_ids, attention_mask) = encoded
            .iter()
            .map(|e| (e.get_ids().to_vec(), e.get_attention_mask().to_vec()))
            .unzip();
        Ok(BatchEncoding { input_ids, attention_mask })
    }

    fn annotate(&self, encoding: BatchEncoding, answers: &[String]) -> Result<AnnotatedEncoding> {
        let spans: Vec<_> = encoding
            .input_ids
            .iter()
            .zip(answers)
            .map(|(ids, answer)| locate_answer_span(&token_strings(&self.tokenizer, ids), answer))
            .collect();
        Ok(encoding.annotate(&spans)?)
    }
}

use std::env;
use std::fs;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mrc_core::config::{expand_path, Config};
use mrc_core::records::{read_records, Columns};
use mrc_encode::{EncodeOptions, EncodingBuilder};
use mrc_model::{select_device, FreezePolicy};
use mrc_train::{load_split_loaders, Evaluator, TrainOptions, Trainer};

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() { eprintln!("Usage: {} <encode|train|evaluate>", prog); std::process::exit(1); }
    let cmd = args.remove(0);
    (cmd, args)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mrc=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn encode(config: &Config) -> anyhow::Result<()> {
    let section = config.encode()?;
    if section.splits.is_empty() {
        anyhow::bail!("encode.splits is empty; nothing to encode");
    }
    let output_path = expand_path(section.output_path.to_string_lossy());
    for split in &section.splits {
        let input = expand_path(split.input.to_string_lossy());
        let records = read_records(&input)?;
        info!("Read {} records from {}", records.len(), input.display());
        let builder = EncodingBuilder::new(EncodeOptions {
            tokenizer: expand_path(&section.tokenizer),
            batch_size: section.batch_size,
            chunk_size: split.chunk_size,
            output_path: output_path.clone(),
            file_prefix: split.prefix.clone(),
            max_length: section.max_length,
        })?;
        let encodings = builder.build(&Columns::from_records(records))?;
        println!("✅ Encoded '{}' into {} batches under {}", split.prefix, encodings.len(), output_path.display());
    }
    Ok(())
}

fn train(config: &Config) -> anyhow::Result<()> {
    let section = config.train()?;
    let data_path = expand_path(section.data_path.to_string_lossy());
    let loaders = load_split_loaders(&data_path, &section.data_prefix, section.batch_size)?;
    let mut trainer = Trainer::new(TrainOptions {
        model_dir: expand_path(section.model_dir.to_string_lossy()),
        learning_rate: section.learning_rate,
        freeze: FreezePolicy::from_layer_count(section.freeze_layer_count)?,
        iterations_before_saving_model: section.iterations_before_saving_model,
        save_model_name: section.save_model_name.clone(),
        output_path: expand_path(section.output_path.to_string_lossy()),
    })?
    .on_first_output(|output| {
        let loss = output.loss.as_ref().and_then(|l| l.to_scalar::<f32>().ok());
        info!("First forward pass: start_logits {:?}, loss {:?}", output.start_logits.dims(), loss);
    });
    let outcome = trainer.run_pretrained(&loaders)?;
    println!("✅ Trained {} steps, last loss {:?}", outcome.steps, outcome.last_loss);
    Ok(())
}

fn evaluate(config: &Config) -> anyhow::Result<()> {
    let section = config.evaluate()?;
    let data_path = expand_path(section.data_path.to_string_lossy());
    let loaders = load_split_loaders(&data_path, &section.data_prefix, section.batch_size)?;
    let device = select_device();
    let model = Evaluator::load_checkpoint(&expand_path(section.model_path.to_string_lossy()), &section.model_name, &device)?;
    let report = Evaluator::run(&model, &loaders)?;
    println!(
        "📊 Accuracy {:.4} (start {:.4}, end {:.4}) over {} batches",
        report.accuracy,
        report.start_accuracy,
        report.end_accuracy,
        report.batches.len()
    );
    if let Some(path) = &section.report_path {
        let path = expand_path(path.to_string_lossy());
        fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("📝 Wrote predictions to {}", path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let (cmd, _args) = parse_args();
    match cmd.as_str() {
        "encode" => encode(&config)?,
        "train" => train(&config)?,
        "evaluate" => evaluate(&config)?,
        _ => { eprintln!("Unknown command: {}", cmd); std::process::exit(1); }
    }
    Ok(())
}

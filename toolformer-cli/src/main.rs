use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use anyhow::{bail, Result};
use candle_core::Device;
use chrono::NaiveDate;
use clap::Parser;
use serde::Serialize;
use toolformer_core::tools::{Calendar, ToolRegistry};
use toolformer_core::{
    initialize_logging, AcceptAll, AcceptanceDecision, DataGenerator, DataGeneratorConfig,
    DecodingStrategy, HfTokenizer, LlamaOracle, LlamaPaths, PromptTemplate, TriggerPosition,
    CALCULATOR_PROMPT,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML file with a `[data_generator]` table. Defaults are used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hugging Face repository of a Llama-family model.
    #[arg(short, long)]
    model_id: String,

    /// Model revision. Defaults to `main`.
    #[arg(long)]
    revision: Option<String>,

    /// Local `tokenizer.json` to use instead of the one in the model repository.
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Token used to pad candidates, for tokenizers that do not define one.
    #[arg(long)]
    pad_token: Option<String>,

    /// A single document to annotate.
    #[arg(short, long, conflicts_with = "input_file")]
    input: Option<String>,

    /// A file with one document per line. Blank lines are skipped.
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Prompt template with an `{input}` placeholder. Defaults to a few-shot
    /// Calculator prompt.
    #[arg(short, long, conflicts_with = "jinja_template")]
    template: Option<String>,

    /// Jinja prompt template receiving an `input` variable.
    #[arg(long)]
    jinja_template: Option<String>,

    /// Integer seed for sampled decoding. Greedy decoding is used if omitted.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Date the Calendar tool reports, as `YYYY-MM-DD`. Defaults to the
    /// system clock, which makes runs on different days disagree.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Keep every candidate without invoking any tool.
    #[arg(long, default_value_t = false)]
    accept_all: bool,

    /// Also write rejected candidates, with the reason they were rejected.
    #[arg(long, default_value_t = false)]
    scored: bool,

    /// JSON Lines output file. Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use CPU only
    #[arg(long)]
    cpu: bool,
}

#[derive(Serialize)]
struct Record<'a> {
    input: &'a str,
    position: TriggerPosition,
    text: String,
    #[serde(flatten)]
    decision: &'a AcceptanceDecision,
}

fn read_documents(args: &Args) -> Result<Vec<String>> {
    if let Some(input) = &args.input {
        return Ok(vec![input.clone()]);
    }
    let Some(path) = &args.input_file else {
        bail!("one of `--input` or `--input-file` is required");
    };
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect())
}

fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging();

    let mut config = match &args.config {
        Some(path) => DataGeneratorConfig::from_toml_file(path)?,
        None => DataGeneratorConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.decoding = DecodingStrategy::Sampling { seed };
    }

    let template = match (&args.template, &args.jinja_template) {
        (Some(template), _) => PromptTemplate::new(template.as_str())?,
        (None, Some(template)) => PromptTemplate::jinja(template.as_str())?,
        (None, None) => PromptTemplate::new(CALCULATOR_PROMPT)?,
    };
    let documents = read_documents(&args)?;

    #[cfg(feature = "metal")]
    let device = Device::new_metal(0)?;
    #[cfg(not(feature = "metal"))]
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    let paths = LlamaPaths::download(&args.model_id, args.revision.clone())?;
    let tokenizer_filename = args
        .tokenizer
        .clone()
        .unwrap_or_else(|| paths.tokenizer_filename.clone());
    let mut tokenizer = HfTokenizer::from_file(&tokenizer_filename)?;
    if let Some(pad_token) = &args.pad_token {
        tokenizer = tokenizer.with_pad_token(pad_token)?;
    }
    let model = LlamaOracle::load(&paths, &device)?;

    let mut tools = ToolRegistry::with_defaults();
    tools.register(match args.date {
        Some(date) => Calendar::fixed(date),
        None => Calendar::system(),
    });
    let mut generator =
        DataGenerator::new(config, Box::new(model), Box::new(tokenizer))?.with_tools(tools);
    if args.accept_all {
        generator = generator.with_filter(AcceptAll);
    }
    info!(
        "Tools: {}",
        generator.tools().names().collect::<Vec<_>>().join(", ")
    );

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    let mut written = 0;
    for (i, document) in documents.iter().enumerate() {
        let result = if args.scored {
            generator.generate_scored(&template, document)
        } else {
            generator.generate(&template, document)
        };
        let scored = match result {
            Ok(scored) => scored,
            Err(e) => {
                warn!("Skipping document {i}: {e}");
                continue;
            }
        };
        for entry in &scored {
            let record = Record {
                input: document,
                position: entry.candidate.position(),
                text: generator.decode_candidate(&entry.candidate)?,
                decision: &entry.decision,
            };
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
            written += 1;
        }
    }
    out.flush()?;
    info!("Wrote {written} records for {} documents.", documents.len());

    Ok(())
}

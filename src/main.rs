use std::path::PathBuf;

use anyhow::Result;
use causal_decoder::{
    model::{GenerationConfig, SamplingStrategy, SequenceModel, SequenceModelConfig},
    setup_device, Prompt,
};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sample continuations from a decoder-only transformer", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Model config (.toml or .json); a tiny model is used when omitted")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "1,2,3", help = "Prompt token ids, rows separated by ';'")]
    prompt: Prompt,

    #[arg(long, default_value_t = 10, help = "Total sequence length including the prompt")]
    max_length: usize,

    #[arg(short, long, default_value_t = 1.0, help = "Sampling temperature (> 0)")]
    temperature: f64,

    #[arg(long, help = "Keep only the k most likely tokens")]
    top_k: Option<usize>,

    #[arg(long, help = "Nucleus sampling mass in (0, 1]")]
    top_p: Option<f64>,

    #[arg(long, help = "Token id that ends a row early")]
    stop_token: Option<u32>,

    #[arg(long, help = "Seed for reproducible sampling")]
    seed: Option<u64>,

    #[arg(long, help = "Pick the most likely token instead of sampling")]
    greedy: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("generation failed: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let device = setup_device();

    let config = match &args.config {
        Some(path) => SequenceModelConfig::from_path(path)?,
        None => SequenceModelConfig::tiny(),
    };
    let model = SequenceModel::new(config, &device)?;

    let generation = GenerationConfig {
        max_length: args.max_length,
        temperature: args.temperature,
        strategy: if args.greedy {
            SamplingStrategy::Greedy
        } else {
            SamplingStrategy::Multinomial
        },
        top_k: args.top_k,
        top_p: args.top_p,
        stop_token: args.stop_token,
        seed: args.seed,
    };

    let prompt = args.prompt.to_tensor(&device)?;
    let output = model.generate_with(&prompt, &generation)?;
    for row in output.to_vec2::<u32>()? {
        let ids: Vec<String> = row.iter().map(u32::to_string).collect();
        println!("{}", ids.join(" "));
    }
    Ok(())
}

//! Command-line demo: generates a noisy key at a given QBER, runs one reconciliation against
//! an in-process mock channel, and prints the resulting stats. Not part of the core contract
//! (spec.md §6): a real deployment wires the engine to a real [`cascade::channel::ClassicalChannel`].

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use cascade::config::ReconciliationConfig;
use cascade::key::{Key, NoiseMethod};
use cascade::mock_channel::MockClassicalChannel;
use cascade::reconciliation::Reconciliation;

#[derive(Debug, Parser)]
#[command(name = "cascade-demo", about = "Run one Cascade reconciliation against a mock peer")]
struct Cli {
    /// Cascade variant: original, biconf, yanetal, option3, option4, option7, option8.
    #[arg(long)]
    variant: Option<String>,

    /// Number of bits in the key.
    #[arg(long)]
    key_size: Option<u32>,

    /// Estimated bit error rate used to size the first pass.
    #[arg(long)]
    estimated_ber: Option<f32>,

    /// Actual bit error rate used to generate the noisy key.
    #[arg(long)]
    actual_ber: Option<f32>,

    /// Seed for the key-generation PRNG, for reproducible demo runs.
    #[arg(long)]
    key_seed: Option<u64>,

    /// Seed for the shuffle PRNG, for reproducible demo runs.
    #[arg(long)]
    shuffle_seed: Option<u64>,

    /// Optional config file (toml/yaml/json) to layer under CLI args and CASCADE_ env vars.
    #[arg(long)]
    config: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = ReconciliationConfig::load(cli.config.as_deref())
        .context("failed to load reconciliation configuration")?;
    if let Some(variant) = cli.variant {
        config.variant = variant;
    }
    if let Some(key_size) = cli.key_size {
        config.key_size = key_size;
    }
    if let Some(est) = cli.estimated_ber {
        config.estimated_bit_error_rate = est;
    }
    if let Some(actual) = cli.actual_ber {
        config.actual_bit_error_rate = actual;
    }
    if cli.key_seed.is_some() {
        config.key_seed = cli.key_seed;
    }
    if cli.shuffle_seed.is_some() {
        config.shuffle_seed = cli.shuffle_seed;
    }

    let mut key_rng = match config.key_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let correct_key = Key::random(config.key_size, &mut key_rng);
    let noisy_key = correct_key
        .copy_with_noise(config.actual_bit_error_rate, NoiseMethod::Exact, &mut key_rng)
        .context("invalid actual bit error rate")?;

    let channel = MockClassicalChannel::new(correct_key.clone());
    let mut reconciliation = Reconciliation::with_shuffle_seed(
        &config.variant,
        channel,
        &noisy_key,
        config.estimated_bit_error_rate,
        config.shuffle_seed,
    )
    .context("failed to construct reconciliation engine")?;

    let reconciled_key = reconciliation.reconcile().context("reconciliation failed")?;

    let mut stats = reconciliation.stats().clone();
    stats
        .record_residual_errors(&reconciled_key, &correct_key)
        .context("failed to compute residual errors")?;

    println!("variant:               {}", config.variant);
    println!("key size:              {}", config.key_size);
    println!("normal passes:         {}", stats.normal_passes);
    println!("biconf iterations:     {}", stats.biconf_iterations);
    println!("ask_parities messages: {}", stats.ask_parity_messages);
    println!("blocks asked:          {}", stats.ask_parity_blocks);
    println!("blocks inferred:       {}", stats.infer_parity_blocks);
    println!("remaining bit errors:  {}", stats.remaining_bit_errors);
    println!(
        "unrealistic efficiency: {:.4}",
        stats.unrealistic_efficiency(config.key_size, config.estimated_bit_error_rate)
    );
    println!(
        "realistic efficiency:   {:.4}",
        stats.realistic_efficiency(config.key_size, config.estimated_bit_error_rate)
    );

    Ok(())
}

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;

use leaf_sam_rs::{
    classifier::resolve_input,
    config::{Cli, Command, DiagnoseConfig, ServeConfig},
    logging::setup_logging,
    server, DiseaseModel, LeafDiagnoser, OracleHandle, SamModel,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(config) => run_serve(&config),
        Command::Diagnose(config) => run_diagnose(&config),
    }
}

fn run_serve(config: &ServeConfig) -> Result<()> {
    setup_logging(config.log_format);

    let model = SamModel::new(&config.encoder_path, &config.decoder_path, config.device_id)
        .context("Failed to load segment anything model")?;
    let oracle = OracleHandle::new(model);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(server::serve(config, oracle))?;
    Ok(())
}

fn run_diagnose(config: &DiagnoseConfig) -> Result<()> {
    setup_logging(config.log_format);

    let artifact = config.artifact();
    let model_path = artifact.ensure()?;
    let model = DiseaseModel::new(model_path, config.image_size)?;
    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let diagnoser = LeafDiagnoser::new(model);
    let input = Path::new(&config.input);

    if input.is_dir() {
        for (path, outcome) in diagnoser.diagnose_directory(input)? {
            match outcome {
                Ok(diagnosis) => println!("{}: {}", path.display(), diagnosis),
                Err(e) => tracing::error!(path = %path.display(), error = %e, "diagnosis failed"),
            }
        }
        return Ok(());
    }

    let path = resolve_input(&config.input, &config.sample_dir);
    let diagnosis = diagnoser
        .diagnose_file(&path)
        .with_context(|| format!("Failed to diagnose {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        label = diagnosis.label,
        score = diagnosis.score,
        "leaf diagnosed"
    );
    println!("{diagnosis}");
    Ok(())
}

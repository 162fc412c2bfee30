//! deploy-forge CLI entrypoint.
//!
//! This is the main entrypoint for the deploy-forge command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use deploy_forge::cli::{Cli, Commands, OutputFormatter, TargetArgs};
use deploy_forge::config::{FsLayerSource, LayerLoader, ResolvedConfig, Target};
use deploy_forge::emit::{ArtifactWriter, SecretHandling};
use deploy_forge::error::{ForgeError, Result};
use deploy_forge::pipeline::{BatchSummary, Pipeline, PipelineOptions};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Starter layers written by `init`.
const STARTER_LAYERS: &[(&str, &str)] = &[
    ("base.yaml", include_str!("../templates/layers/base.yaml")),
    ("env-dev.yaml", include_str!("../templates/layers/env-dev.yaml")),
    ("env-staging.yaml", include_str!("../templates/layers/env-staging.yaml")),
    ("env-prod.yaml", include_str!("../templates/layers/env-prod.yaml")),
    ("platform-local.yaml", include_str!("../templates/layers/platform-local.yaml")),
    ("platform-docker.yaml", include_str!("../templates/layers/platform-docker.yaml")),
    ("platform-cloud.yaml", include_str!("../templates/layers/platform-cloud.yaml")),
];

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    let formatter = OutputFormatter::new(cli.output);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", formatter.format_error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout stays
/// parseable.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    if let Commands::Init { force } = cli.command {
        return cmd_init(&cli.config_dir, force);
    }

    let pipeline = create_pipeline(&cli)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Resolve { target, origins, raw } => {
            cmd_resolve(&pipeline, target, origins, raw, formatter).await
        }
        Commands::Validate { target } => {
            let resolved = pipeline.resolve(target.target()).await?;
            print_stdout(&formatter.format_validation(&resolved))
        }
        Commands::Ports { target } => {
            let resolved = pipeline.resolve(target.target()).await?;
            print_stdout(&formatter.format_ports(&resolved))
        }
        Commands::Build { target, build } => {
            let target = target.target();
            let output = pipeline.build(target, &build.kinds()).await?;
            let dir = ArtifactWriter::new(&build.out)
                .write(&target, &output.artifacts, &output.manifest)
                .await?;
            print_stdout(&formatter.format_build(&output, &dir))
        }
        Commands::BuildAll { build } => cmd_build_all(&pipeline, &build.out, &build.kinds(), formatter).await,
    }
}

/// Write the starter layers into the config directory.
fn cmd_init(dir: &Path, force: bool) -> Result<()> {
    info!("Initializing layers in: {}", dir.display());

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let mut written = 0;
    for (name, content) in STARTER_LAYERS {
        let path = dir.join(name);
        if path.exists() && !force {
            eprintln!("Skipped (exists): {}", path.display());
            continue;
        }
        std::fs::write(&path, content)?;
        eprintln!("Created: {}", path.display());
        written += 1;
    }

    // The local override layer is per developer.
    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        std::fs::write(&gitignore_path, "local.yaml\nlocal.yml\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    if written == 0 {
        eprintln!("\nNothing written. Use --force to overwrite.");
        return Ok(());
    }

    eprintln!("\nLayers initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Replace every REPLACE_WITH_* value in the layers");
    eprintln!("  2. Export the secrets the layers reference (e.g. AUTH_JWT_SECRET)");
    eprintln!("  3. Run 'deploy-forge validate -e dev -p docker'");
    eprintln!("  4. Run 'deploy-forge build -e dev -p docker' to write the artifacts");

    Ok(())
}

/// Print the merged configuration for a target.
async fn cmd_resolve(
    pipeline: &Pipeline,
    target: TargetArgs,
    origins: bool,
    raw: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config: ResolvedConfig = if raw {
        pipeline.merge_only(target.target()).await?
    } else {
        pipeline.resolve(target.target()).await?.config
    };
    print_stdout(&formatter.format_resolved(&config, origins))
}

/// Build every target and write the ones that succeeded.
async fn cmd_build_all(
    pipeline: &Pipeline,
    out: &Path,
    kinds: &[deploy_forge::emit::ArtifactKind],
    formatter: &OutputFormatter,
) -> Result<()> {
    let targets = Target::all();
    let writer = ArtifactWriter::new(out);
    let mut outcomes = pipeline.build_all(&targets, kinds).await;

    for outcome in &mut outcomes {
        let failed = match &outcome.result {
            Ok(output) => writer
                .write(&outcome.target, &output.artifacts, &output.manifest)
                .await
                .err(),
            Err(_) => None,
        };
        if let Some(e) = failed {
            outcome.result = Err(e);
        }
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    print_stdout(&formatter.format_batch(&outcomes, &summary))?;

    if summary.all_succeeded() {
        return Ok(());
    }
    debug!("{} target(s) failed", summary.failed);
    Err(outcomes
        .into_iter()
        .find_map(|o| o.result.err())
        .unwrap_or_else(|| ForgeError::internal("build failed")))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Creates the pipeline over the config directory and the `--secrets` chain.
fn create_pipeline(cli: &Cli) -> Result<Pipeline> {
    debug!("Loading layers from: {}", cli.config_dir.display());

    let loader = LayerLoader::new(FsLayerSource::new(&cli.config_dir));
    let secrets = cli.secret_source()?;
    let options = PipelineOptions {
        load_timeout: Duration::from_secs(cli.load_timeout_secs),
        secret_timeout: Duration::from_secs(cli.secret_timeout_secs),
        secret_handling: SecretHandling::Reference,
    };

    Ok(Pipeline::new(loader, secrets).with_options(options))
}

/// Writes command output to stdout.
fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

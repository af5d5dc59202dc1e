//! `pq`: keep a packaging patch queue in sync with git history.

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use pq_core::codec::PatchCodec;
use pq_core::config::{PqConfig, CONFIG_FILE_NAME};
use pq_core::exporter::Exporter;
use pq_core::message::{series_change_message, synthesize};
use pq_core::repository::GitRepository;
use pq_core::series::{compare, Series};
use pq_core::vcs_tag::annotate_file;
use pq_core::Repository;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pq", version, about = "Synchronize git history with a quilt patch series")]
struct Cli {
    /// Path inside the git repository to operate on.
    #[arg(long, short = 'C', default_value = ".")]
    repo: Utf8PathBuf,

    /// Configuration file; defaults to pq.toml in the repository root.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Log debug output.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Regenerate the patch series from the commits after BASE.
    Export {
        /// Exclusive lower bound of the exported range.
        base: String,
        /// Inclusive upper bound; defaults to HEAD.
        #[arg(long)]
        tip: Option<String>,
    },
    /// Print the commit message for adding a patch file.
    Message {
        /// Patch file to describe.
        patch: Utf8PathBuf,
    },
    /// Record the exported tag and commit in a packaging description.
    VcsTag {
        /// Packaging description to rewrite.
        file: Utf8PathBuf,
        /// Full name of the tag that was exported.
        #[arg(long)]
        tag: String,
        /// Commit the tag points at.
        #[arg(long, default_value = "HEAD")]
        commit: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let repository = GitRepository::open(&cli.repo)
        .with_context(|| format!("failed to open repository at {}", cli.repo))?;
    let root = Utf8PathBuf::from_path_buf(repository.root().to_path_buf())
        .map_err(|path| anyhow!("repository root {} is not valid UTF-8", path.display()))?;
    let config_path = cli.config.unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
    let config = PqConfig::load(config_path.as_std_path())
        .with_context(|| format!("failed to load {config_path}"))?;
    let codec = PatchCodec::new(pq_backends::default_registry());

    match cli.command {
        Command::Export { base, tip } => export(&repository, &root, &config, &codec, &base, tip.as_deref()),
        Command::Message { patch } => message(&repository, &config, &codec, &patch),
        Command::VcsTag { file, tag, commit } => vcs_tag(&repository, &config, &file, &tag, &commit),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn export(
    repository: &GitRepository,
    root: &Utf8Path,
    config: &PqConfig,
    codec: &PatchCodec,
    base: &str,
    tip: Option<&str>,
) -> Result<()> {
    let series_path = config.series_path(root.as_std_path());
    let previous = Series::load_or_empty(&series_path)
        .with_context(|| format!("failed to read {}", series_path.display()))?;
    let old_names: Vec<String> = previous.names().map(str::to_owned).collect();

    let options = config.export_options().context("invalid export configuration")?;
    let range = config.commit_range(base, tip);
    let series = Exporter::new(repository, codec, options)
        .export(&previous, &range)
        .with_context(|| format!("failed to export {base}..{}", tip.unwrap_or("HEAD")))?;

    let new_names: Vec<String> = series.names().map(str::to_owned).collect();
    let (added, removed) = compare(&old_names, &new_names);
    if added.is_empty() && removed.is_empty() {
        info!("patch series unchanged");
        return Ok(());
    }

    let closes = config.closes_pattern()?;
    let message = series_change_message(&added, &removed, series.patch_dir(), codec, &closes)?;
    println!("{message}");
    Ok(())
}

fn message(
    repository: &GitRepository,
    config: &PqConfig,
    codec: &PatchCodec,
    patch: &Utf8Path,
) -> Result<()> {
    let bytes = std::fs::read(patch).with_context(|| format!("failed to read {patch}"))?;
    let (patch, _) = codec
        .parse(patch.as_str(), &bytes)
        .with_context(|| format!("failed to parse {patch}"))?;
    let identity = repository.author_identity()?;
    let closes = config.closes_pattern()?;
    print!("{}", synthesize(&patch, &identity.name, &closes));
    Ok(())
}

fn vcs_tag(
    repository: &GitRepository,
    config: &PqConfig,
    file: &Utf8Path,
    tag: &str,
    commit: &str,
) -> Result<()> {
    let commit_id = repository
        .resolve(commit)
        .with_context(|| format!("failed to resolve {commit}"))?;
    let changed = annotate_file(
        file.as_std_path(),
        &config.vcs_tag,
        tag,
        &commit_id,
        &config.vcs_tag_options(),
    )
    .with_context(|| format!("failed to annotate {file}"))?;
    if changed {
        info!(file = %file, "updated provenance field");
    }
    Ok(())
}

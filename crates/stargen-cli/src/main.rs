//! CLI binary for stargen: generate BUILD files by running extensions over
//! the source tree.

mod build_file;
mod walk;

use anyhow::{Context, Result};
use build_file::BuildFile;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use stargen_cache::IncrementalCache;
use stargen_core::error::CancelToken;
use stargen_host::config::{BuildConfig, GenerationMode};
use stargen_host::generate::{GenerateArgs, GeneratedRule};
use stargen_host::registry::ExtensionRegistry;
use stargen_host::resolver::RuleIndex;
use stargen_host::Host;
use stargen_query::QueryResults;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stargen", about = "Pluggable BUILD-file generator")]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true)]
    repo_root: Option<PathBuf>,

    /// What to do with generated BUILD files
    #[arg(long, global = true, value_enum, default_value = "fix")]
    mode: Mode,

    /// Show per-directory progress
    #[arg(long, global = true)]
    progress: bool,

    /// Treat unresolved non-optional imports as fatal
    #[arg(long, global = true)]
    strict: bool,

    /// Extra extension definitions directory (in addition to
    /// $ORION_EXTENSIONS)
    #[arg(long, global = true)]
    extensions_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Write BUILD files in place
    Fix,
    /// Print generated BUILD files to stdout
    Print,
    /// Show what would change
    Diff,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and update BUILD files
    Update {
        /// Restrict generation to these repo-relative directories
        paths: Vec<String>,
    },
    /// Alias of `update`: the host contributes no fixes of its own
    Fix {
        paths: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("stargen: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let root = match &cli.repo_root {
        Some(p) => p.clone(),
        None => std::env::current_dir().context("failed to get current directory")?,
    };
    let repo_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let paths = match &cli.command {
        Commands::Update { paths } | Commands::Fix { paths } => paths.clone(),
    };

    let mut registry = ExtensionRegistry::new();
    if let Some(dir) = &cli.extensions_dir {
        registry
            .load_dir(dir)
            .with_context(|| format!("loading extensions from {}", dir.display()))?;
    }
    registry.load_from_env().context("loading extensions from env")?;

    let token = CancelToken::new();
    let host = Host::new(registry)
        .with_cancel(token.clone())
        .with_strict_imports(cli.strict);

    let dirs = walk::collect_directories(&root, &paths)?;

    // The per-run query cache. Wiring a change stream (for cross-run reuse)
    // is the embedder's job; without one the cache memoizes within the run.
    let cache: IncrementalCache<QueryResults> = IncrementalCache::in_memory();

    let bar = progress_bar(cli.progress, dirs.len() as u64);

    // Generate, walking parents before children so config nodes inherit.
    let mut configs: BTreeMap<String, Arc<BuildConfig>> = BTreeMap::new();
    let root_config = BuildConfig::new_root(&repo_name);
    let mut generated: Vec<(String, Vec<GeneratedRule>, BuildFile)> = Vec::new();

    for dir in &dirs {
        bar.set_message(dir.rel.clone());

        let config = if dir.rel.is_empty() {
            root_config.clone()
        } else {
            parent_config(&configs, &root_config, &dir.rel).new_child(&dir.rel)
        };
        configs.insert(dir.rel.clone(), config.clone());

        let build_file = build_file::read_build_file(&root.join(&dir.rel));
        for (key, value) in &build_file.directives {
            config.add_directive(key, value);
        }

        match config.generation_mode()? {
            GenerationMode::Disabled => {
                bar.inc(1);
                continue;
            }
            GenerationMode::Update if !build_file.exists() => {
                bar.inc(1);
                continue;
            }
            _ => {}
        }

        let result = host.generate_rules(
            &GenerateArgs {
                root: &root,
                rel: &dir.rel,
                config: &config,
                files: &dir.files,
                existing_rules: &build_file.rules,
            },
            &cache,
        );

        match result {
            Ok(result) => generated.push((dir.rel.clone(), result.rules, build_file)),
            Err(e) => {
                if token.is_cancelled() {
                    break;
                }
                tracing::error!("generate failed for {:?}: {e}", dir.rel);
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    check_token(&token)?;

    // Resolve imports across the whole run.
    let index = RuleIndex::build(generated.iter().flat_map(|(_, rules, _)| rules.iter()));
    for (rel, rules, _) in &mut generated {
        let config = configs
            .get(rel)
            .cloned()
            .unwrap_or_else(|| root_config.clone());
        for rule in rules.iter_mut() {
            if let Err(e) = host.resolve_rule(rule, &config, &index) {
                check_token(&token)?;
                anyhow::bail!("resolving //{}:{}: {e}", rule.package, rule.name);
            }
        }
    }

    check_token(&token)?;

    let loads = host.registry().apparent_loads(&|_| None);
    write_outputs(cli.mode, &root, &generated, &loads)
}

fn parent_config(
    configs: &BTreeMap<String, Arc<BuildConfig>>,
    root: &Arc<BuildConfig>,
    rel: &str,
) -> Arc<BuildConfig> {
    let mut prefix = rel;
    while let Some((parent, _)) = prefix.rsplit_once('/') {
        if let Some(config) = configs.get(parent) {
            return config.clone();
        }
        prefix = parent;
    }
    root.clone()
}

fn write_outputs(
    mode: Mode,
    root: &Path,
    generated: &[(String, Vec<GeneratedRule>, BuildFile)],
    loads: &[stargen_host::registry::LoadInfo],
) -> Result<()> {
    for (rel, rules, existing) in generated {
        // The host only manages its own rules; a directory with nothing
        // generated is left alone.
        if rules.is_empty() {
            continue;
        }

        let rendered = build_file::render(rules, loads, existing);
        let path = existing
            .path
            .clone()
            .unwrap_or_else(|| root.join(rel).join("BUILD.bazel"));

        match mode {
            Mode::Print => {
                println!("# {}", path.strip_prefix(root).unwrap_or(&path).display());
                println!("{rendered}");
            }
            Mode::Diff => {
                if let Some(d) = build_file::diff(&path, &existing.content, &rendered) {
                    print!("{d}");
                }
            }
            Mode::Fix => {
                if existing.content != rendered {
                    std::fs::write(&path, &rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                }
            }
        }
    }
    Ok(())
}

fn check_token(token: &CancelToken) -> Result<()> {
    if token.is_cancelled() {
        anyhow::bail!(
            "{}",
            token
                .cause()
                .unwrap_or_else(|| "run cancelled".to_string())
        );
    }
    Ok(())
}

fn progress_bar(enabled: bool, total: u64) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("##-"),
    );
    bar.set_prefix("generating");
    bar
}

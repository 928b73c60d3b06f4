//! confgate - pipeline configuration and plugin trust inspection
//!
//! ## Commands
//!
//! - `resolve`: Show which pipeline configuration a working copy resolves to
//! - `check-image`: Ask the trust gate whether images may run privileged
//! - `clone-image`: Print the default clone image
//! - `plan`: Resolve configuration and prepare a list of steps for scheduling
//! - `policy`: Print the active policy
//!
//! Exit status is 2 when a repository has no pipeline configuration, 1 for
//! any other failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{debug, error, Level};

use confgate_core::policy;
use confgate_core::{
    prepare_steps, FsTree, Policy, PrivilegeVerdict, ResolveError, Resolver, SetupOptions,
    StepSpec,
};

#[derive(Parser)]
#[command(name = "confgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pipeline configuration resolution and privileged plugin trust gate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Deployment policy file (TOML), read once at startup
    #[arg(long, global = true, env = "CONFGATE_POLICY")]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which pipeline configuration a working copy resolves to
    Resolve {
        /// Repository working copy (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Also read the files and report sizes and digests
        #[arg(long)]
        load: bool,

        /// Per-query timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Check whether images may run with elevated privileges
    CheckImage {
        /// Image references, e.g. docker.io/plugins/docker:latest
        #[arg(required = true)]
        images: Vec<String>,
    },

    /// Print the image used for clone steps that do not name one
    CloneImage,

    /// Resolve configuration and prepare steps for scheduling
    Plan {
        /// Repository working copy (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// JSON file with the parsed steps
        #[arg(short, long)]
        steps: PathBuf,

        /// Do not inject an implicit clone step
        #[arg(long)]
        skip_clone: bool,
    },

    /// Print the active policy
    Policy,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    confgate_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<String> {
    let active = match &cli.policy {
        Some(path) => {
            let loaded = Policy::load(path)
                .with_context(|| format!("Failed to load policy from {}", path.display()))?;
            policy::install(loaded)?
        }
        None => policy::current(),
    };

    match cli.command {
        Commands::Resolve {
            path,
            load,
            timeout_ms,
        } => cmd_resolve(active, &path, load, timeout_ms, cli.format).await,
        Commands::CheckImage { images } => Ok(cmd_check_image(active, &images, cli.format)),
        Commands::CloneImage => Ok(cmd_clone_image(active, cli.format)),
        Commands::Plan {
            path,
            steps,
            skip_clone,
        } => cmd_plan(active, &path, &steps, skip_clone, cli.format).await,
        Commands::Policy => cmd_policy(active),
    }
}

/// 2 for a repository without configuration, 1 otherwise.
fn exit_status(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<ResolveError>() {
        Some(resolve) if resolve.is_user_error() => 2,
        _ => 1,
    }
}

fn resolver(active: &Policy, timeout_ms: Option<u64>) -> Resolver<'_> {
    let resolver = Resolver::new(active);
    match timeout_ms {
        Some(ms) => resolver.with_query_timeout(Duration::from_millis(ms)),
        None => resolver,
    }
}

async fn cmd_resolve(
    active: &Policy,
    path: &Path,
    load: bool,
    timeout_ms: Option<u64>,
    format: Format,
) -> Result<String> {
    let tree = FsTree::new(path);
    let resolver = resolver(active, timeout_ms);
    debug!(root = %path.display(), "Resolving pipeline configuration");

    if !load {
        let resolved = resolver.resolve(&tree).await?;
        return Ok(match format {
            Format::Json => serde_json::to_string_pretty(&resolved)?,
            Format::Text => {
                let mut out = format!("Source: {}", resolved.candidate());
                for file in resolved.files() {
                    out.push_str(&format!("\n  {file}"));
                }
                out
            }
        });
    }

    let loaded = resolver.load(&tree).await?;
    Ok(match format {
        Format::Json => serde_json::to_string_pretty(&json!({
            "resolved": &loaded.resolved,
            "digest": loaded.digest(),
            "files": loaded.files.iter().map(|f| json!({
                "path": &f.path,
                "bytes": f.data.len(),
                "digest": f.digest(),
            })).collect::<Vec<_>>(),
        }))?,
        Format::Text => {
            let mut out = format!("Source: {}", loaded.resolved.candidate());
            for file in &loaded.files {
                out.push_str(&format!(
                    "\n  {} ({} bytes, sha256 {})",
                    file.path,
                    file.data.len(),
                    &file.digest()[..12]
                ));
            }
            out.push_str(&format!("\nDigest: {}", loaded.digest()));
            out
        }
    })
}

fn cmd_check_image(active: &Policy, images: &[String], format: Format) -> String {
    let verdicts: Vec<(&str, bool)> = images
        .iter()
        .map(|image| (image.as_str(), active.is_privileged(image)))
        .collect();

    match format {
        Format::Json => json!(verdicts
            .iter()
            .map(|(image, privileged)| json!({ "image": image, "privileged": privileged }))
            .collect::<Vec<_>>())
        .to_string(),
        Format::Text => verdicts
            .iter()
            .map(|(image, privileged)| {
                let status = if *privileged { "privileged" } else { "unprivileged" };
                format!("{image}\t{status}")
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn cmd_clone_image(active: &Policy, format: Format) -> String {
    let image = active.default_clone_image().to_string();
    match format {
        Format::Json => json!({ "default_clone_image": image }).to_string(),
        Format::Text => image,
    }
}

async fn cmd_plan(
    active: &Policy,
    path: &Path,
    steps_path: &Path,
    skip_clone: bool,
    format: Format,
) -> Result<String> {
    let resolved = Resolver::new(active).resolve(&FsTree::new(path)).await?;

    let raw = std::fs::read_to_string(steps_path)
        .with_context(|| format!("Failed to read steps from {}", steps_path.display()))?;
    let steps: Vec<StepSpec> =
        serde_json::from_str(&raw).context("Failed to parse steps file")?;

    let prepared = prepare_steps(steps, SetupOptions { skip_clone }, active)?;

    Ok(match format {
        Format::Json => serde_json::to_string_pretty(&json!({
            "config": &resolved,
            "steps": &prepared,
        }))?,
        Format::Text => {
            let mut out = format!("Config: {}", resolved.candidate());
            for step in &prepared {
                let privilege = match &step.privilege {
                    PrivilegeVerdict::Elevated => "elevated".to_string(),
                    PrivilegeVerdict::Sandboxed => "sandboxed".to_string(),
                    PrivilegeVerdict::Denied { reason } => format!("sandboxed (denied: {reason})"),
                };
                out.push_str(&format!("\n  {} [{}] -> {}", step.name, step.image, privilege));
            }
            out
        }
    })
}

fn cmd_policy(active: &Policy) -> Result<String> {
    Ok(serde_json::to_string_pretty(&active.to_document())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo_with(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, contents).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_resolve_text_output() {
        let dir = repo_with(&[(".woodpecker/b.yml", "b"), (".woodpecker/a.yml", "a")]);
        let out = cmd_resolve(Policy::builtin(), dir.path(), false, None, Format::Text)
            .await
            .unwrap();
        assert_eq!(
            out,
            "Source: .woodpecker/\n  .woodpecker/a.yml\n  .woodpecker/b.yml"
        );
    }

    #[tokio::test]
    async fn test_resolve_load_json_output() {
        let dir = repo_with(&[(".drone.yml", "kind: pipeline")]);
        let out = cmd_resolve(Policy::builtin(), dir.path(), true, Some(1000), Format::Json)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["resolved"]["path"], ".drone.yml");
        assert_eq!(value["files"][0]["bytes"], 14);
    }

    #[tokio::test]
    async fn test_missing_config_exits_with_two() {
        let dir = repo_with(&[("README.md", "hi")]);
        let err = cmd_resolve(Policy::builtin(), dir.path(), false, None, Format::Text)
            .await
            .unwrap_err();
        assert_eq!(exit_status(&err), 2);
    }

    #[test]
    fn test_other_failures_exit_with_one() {
        assert_eq!(exit_status(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn test_check_image_output() {
        let images = vec!["plugins/docker:latest".to_string(), "plugins/dockerx".to_string()];
        let out = cmd_check_image(Policy::builtin(), &images, Format::Text);
        assert_eq!(
            out,
            "plugins/docker:latest\tprivileged\nplugins/dockerx\tunprivileged"
        );

        let out = cmd_check_image(Policy::builtin(), &images, Format::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["privileged"], true);
        assert_eq!(value[1]["privileged"], false);
    }

    #[test]
    fn test_clone_image_output() {
        assert_eq!(
            cmd_clone_image(Policy::builtin(), Format::Text),
            confgate_core::DEFAULT_CLONE_IMAGE
        );
    }

    #[tokio::test]
    async fn test_plan_output() {
        let dir = repo_with(&[
            (".woodpecker.yml", "steps: {}"),
            (
                "steps.json",
                r#"[
                    {"name": "build", "image": "rust:1.80"},
                    {"name": "publish", "kind": "plugin", "image": "plugins/docker"}
                ]"#,
            ),
        ]);
        let out = cmd_plan(
            Policy::builtin(),
            dir.path(),
            &dir.path().join("steps.json"),
            false,
            Format::Json,
        )
        .await
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["config"]["path"], ".woodpecker.yml");
        assert_eq!(value["steps"][0]["name"], "clone");
        assert_eq!(value["steps"][0]["image_source"], "default_clone");
        assert_eq!(value["steps"][2]["privilege"]["verdict"], "elevated");
    }

    #[test]
    fn test_policy_output_is_builtin() {
        let out = cmd_policy(Policy::builtin()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["config_order"][0], ".woodpecker/");
        assert_eq!(value["privileged_plugins"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["confgate", "--format", "json", "check-image", "plugins/gcr"])
            .unwrap();
        assert_eq!(cli.format, Format::Json);
        assert!(matches!(cli.command, Commands::CheckImage { .. }));
    }
}

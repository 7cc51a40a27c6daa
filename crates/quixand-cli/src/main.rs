//! Thin CLI surface over `quixand-core`, grounded in
//! `quixand/cli/main.py` (a `typer` app) and in shape on the teacher's
//! `clap`-derive binaries (`process_executor/src/main.rs`). Every command
//! prints one JSON object to stdout on success; failures print a short
//! message to stderr and exit non-zero.

use std::collections::HashMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use quixand_core::config::Config;
use quixand_core::model::VolumeMount;
use quixand_core::sandbox::{Sandbox, SandboxConfig};
use quixand_core::templates::Templates;
use serde_json::json;

#[derive(Parser)]
#[command(name = "quixand", about = "Host-side SDK CLI for ephemeral Docker/Podman sandboxes")]
struct Cli {
    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Subcommand)]
enum TopCommand {
    /// Sandbox lifecycle and exec.
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },
    /// Filesystem operations against a connected sandbox.
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },
    /// Template build cache management.
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },
}

#[derive(Subcommand)]
enum SandboxAction {
    Create {
        #[arg(long)]
        template: Option<String>,
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        #[arg(long = "env")]
        env: Vec<String>,
        #[arg(long)]
        metadata: Option<String>,
    },
    Connect {
        id: String,
    },
    Exec {
        id: String,
        cmd: Vec<String>,
    },
    Ls,
    #[command(name = "refresh-timeout")]
    RefreshTimeout {
        id: String,
        seconds: u64,
    },
    #[command(name = "run-code")]
    RunCode {
        id: String,
        code: String,
    },
    Kill {
        id: String,
    },
}

#[derive(Subcommand)]
enum FilesAction {
    Put { id: String, local: String, remote: String },
    Get { id: String, remote: String, local: String },
    Ls { id: String, #[arg(default_value = ".")] path: String },
    Mkdir {
        id: String,
        path: String,
        #[arg(long)]
        parents: bool,
    },
    Rm {
        id: String,
        path: String,
        #[arg(long)]
        recursive: bool,
    },
}

#[derive(Subcommand)]
enum TemplatesAction {
    Build {
        path: String,
        #[arg(long)]
        name: Option<String>,
    },
    Ls,
    Rm {
        name: String,
    },
}

fn parse_env_pairs(pairs: &[String]) -> HashMap<String, String> {
    pairs
        .iter()
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: TopCommand) -> quixand_core::error::Result<serde_json::Value> {
    match command {
        TopCommand::Sandbox { action } => run_sandbox(action).await,
        TopCommand::Files { action } => run_files(action).await,
        TopCommand::Templates { action } => run_templates(action),
    }
}

async fn run_sandbox(action: SandboxAction) -> quixand_core::error::Result<serde_json::Value> {
    match action {
        SandboxAction::Create {
            template,
            timeout,
            env,
            metadata,
        } => {
            let metadata_value = metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?;
            let sbx = Sandbox::create(SandboxConfig {
                template,
                timeout: Some(timeout),
                metadata: metadata_value,
                env: parse_env_pairs(&env),
                workdir: None,
                adapter: None,
                resources: None,
                volumes: Vec::<VolumeMount>::new(),
            })
            .await?;
            Ok(json!({ "id": sbx.id() }))
        }
        SandboxAction::Connect { id } => {
            let sbx = Sandbox::connect(&id).await?;
            Ok(json!({ "id": sbx.id() }))
        }
        SandboxAction::Exec { id, cmd } => {
            let sbx = Sandbox::connect(&id).await?;
            let joined = cmd.join(" ");
            let result = sbx.run(&joined, None, None).await?;
            Ok(json!({ "exit_code": result.exit_code, "text": result.text }))
        }
        SandboxAction::Ls => {
            let config = Config::from_env();
            let store = quixand_core::state_store::StateStore::new(config.state_file());
            let state = store.load();
            Ok(serde_json::to_value(state.sandboxes)?)
        }
        SandboxAction::RefreshTimeout { id, seconds } => {
            let sbx = Sandbox::connect(&id).await?;
            sbx.refresh_timeout(seconds).await?;
            Ok(json!({ "ok": true, "timeout": seconds }))
        }
        SandboxAction::RunCode { id, code } => {
            let sbx = Sandbox::connect(&id).await?;
            let execution = sbx.run_code(&code).await?;
            Ok(json!({ "ok": execution.ok, "text": execution.text }))
        }
        SandboxAction::Kill { id } => {
            let sbx = Sandbox::connect(&id).await?;
            sbx.shutdown().await?;
            Ok(json!({ "ok": true }))
        }
    }
}

async fn run_files(action: FilesAction) -> quixand_core::error::Result<serde_json::Value> {
    match action {
        FilesAction::Put { id, local, remote } => {
            let sbx = Sandbox::connect(&id).await?;
            sbx.files.put(&local, &remote).await?;
            Ok(json!({ "ok": true }))
        }
        FilesAction::Get { id, remote, local } => {
            let sbx = Sandbox::connect(&id).await?;
            sbx.files.get(&remote, &local).await?;
            Ok(json!({ "ok": true }))
        }
        FilesAction::Ls { id, path } => {
            let sbx = Sandbox::connect(&id).await?;
            let entries = sbx.files.ls(&path).await?;
            Ok(serde_json::to_value(
                entries
                    .into_iter()
                    .map(|f| {
                        json!({
                            "path": f.path,
                            "size": f.size,
                            "is_dir": f.is_dir,
                            "modified_at": f.modified_at,
                        })
                    })
                    .collect::<Vec<_>>(),
            )?)
        }
        FilesAction::Mkdir { id, path, parents: _ } => {
            let sbx = Sandbox::connect(&id).await?;
            sbx.files.mkdir(&path).await?;
            Ok(json!({ "ok": true }))
        }
        FilesAction::Rm { id, path, recursive } => {
            let sbx = Sandbox::connect(&id).await?;
            sbx.files.rm(&path, recursive).await?;
            Ok(json!({ "ok": true }))
        }
    }
}

fn run_templates(action: TemplatesAction) -> quixand_core::error::Result<serde_json::Value> {
    let templates = Templates::new(Config::from_env());
    match action {
        TemplatesAction::Build { path, name } => {
            let image = templates.build(std::path::Path::new(&path), name.as_deref(), &HashMap::new())?;
            Ok(json!({ "image": image }))
        }
        TemplatesAction::Ls => Ok(serde_json::to_value(templates.ls()?)?),
        TemplatesAction::Rm { name } => {
            templates.rm(&name)?;
            Ok(json!({ "ok": true }))
        }
    }
}

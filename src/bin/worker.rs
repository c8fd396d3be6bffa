//! Worker process entrypoint (§6).

use clap::Parser;
use std::path::PathBuf;
use ticket_worker::supervisor::{self, RunArgs};

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Runs the agent orchestrator against a single ticket")]
struct Args {
    /// Ticket to work on.
    #[arg(long)]
    ticket_id: String,

    /// Base URL of the control-plane server.
    #[arg(long)]
    server_url: String,

    /// Directory under which the ticket's workspace is cloned.
    #[arg(long, default_value = "./workspaces")]
    repo_root: PathBuf,

    /// Path to the worker's settings JSON file.
    #[arg(long, default_value = "./settings.json")]
    settings: PathBuf,

    /// Directory containing `<role>.txt` prompt templates.
    #[arg(long, default_value = "./prompts")]
    prompts: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let exit_code = supervisor::run(RunArgs {
        ticket_id: &args.ticket_id,
        server_url: &args.server_url,
        repo_root: &args.repo_root,
        settings_path: &args.settings,
        prompts_dir: &args.prompts,
    })
    .await;

    std::process::exit(exit_code);
}

//! # Forgent CLI
//!
//! Chat with a code agent that forges, sends and captures packets.
//!
//! Usage:
//!   forgent
//!   forgent --settings lab/settings.yaml --prompts lab/prompts.yaml
//!   RUST_LOG=forgent_agent=debug forgent
//!
//! Startup needs raw-socket privileges (run as root or grant CAP_NET_RAW),
//! then asks which network interface the agent should use.

mod shell;
mod theme;

use clap::Parser;
use forgent_agent::{AgentConfig, CodeAgent, TranscriptRenderer};
use forgent_core::error::provider_error;
use forgent_core::{
    build_provider, list_interfaces, load_prompt_templates, probe_raw_socket, prompt_for_interface,
    render_interface_table, ProviderConfig, Result, Settings, Theme,
};
use shell::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use theme::Palette;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forgent")]
#[command(author, version, about = "Forgent - forge and send packets by asking for them")]
struct Cli {
    /// Model settings (LiteLLMModel) and agent limits
    #[arg(long, default_value = "settings.yaml")]
    settings: PathBuf,

    /// Prompt template overrides
    #[arg(long, default_value = "prompts.yaml")]
    prompts: PathBuf,

    /// Terminal colors and spacing
    #[arg(long, default_value = "theme.json")]
    theme: PathBuf,

    /// Key for the model provider
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let interfaces = list_interfaces().await?;
    print!("{}", render_interface_table(&interfaces));
    let index = prompt_for_interface(std::io::stdin().lock(), std::io::stdout(), &interfaces)?;
    let interface = &interfaces[index];
    info!(interface = %interface.name, "using interface");

    let settings = Settings::load(&cli.settings)?;
    let templates = load_prompt_templates(&cli.prompts, &interface.name)?;
    let theme = Theme::load(&cli.theme)?;

    let provider_config = ProviderConfig::from_model_settings(&settings.model, cli.api_key);
    let provider = build_provider(provider_config)
        .map_err(|e| provider_error(&settings.model.model_id, e).with_operation("cli::build_provider"))?;
    let provider = Arc::new(provider);
    let config = AgentConfig::from_settings(&settings, interface.name.clone());

    let factory = move || CodeAgent::new(provider.clone(), config.clone(), templates.clone());
    // Fail at startup, not on the first prompt, if the templates don't render
    let probe = factory()?;
    let (name, description) = (probe.config().name.clone(), probe.config().description.clone());
    debug!(system_prompt = probe.system_prompt(), "agent ready");
    drop(probe);

    let mut shell = Shell::new(
        TranscriptRenderer::new(factory),
        Palette::from_theme(&theme),
        name,
        description,
    );
    shell.run(std::io::stdin().lock(), std::io::stdout()).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = probe_raw_socket() {
        debug!(error = %e, "raw socket probe failed");
        eprintln!("Error: Insufficient privileges to use raw sockets. Please run as administrator/root.");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e.message());
        debug!(error = ?e, "forgent exited with an error");
        std::process::exit(1);
    }
}

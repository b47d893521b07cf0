use agent_deck_app::{listener, Config};
use agent_deck_policy::Allowlist;
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("init") {
        let path = Config::default_path();
        Config::sample().save(&path)?;
        println!("wrote sample config to {}", path.display());
        return Ok(());
    }

    let config_path = args
        .get(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    println!("agent-deckd: remote agent console");
    println!("config: {}", config_path.display());

    // Startup is the only place the listener fails fatally: bad config,
    // unbindable port, or an unreadable allowlist.
    let config = Config::load(&config_path)?;
    config.validate()?;
    let allowlist = Allowlist::load(&config.allowlist_path)
        .with_context(|| format!("cannot load allowlist {}", config.allowlist_path.display()))?;

    listener::serve(config, allowlist).await
}

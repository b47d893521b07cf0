use crate::config::Config;
use crate::{auth, session};
use agent_deck_policy::Allowlist;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accept loop: one spawned task per connection, so authentication and the
/// session lifecycle of one operator never block or break another's.
pub async fn serve(config: Config, allowlist: Allowlist) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, users = allowlist.len(), "listening");

    let config = Arc::new(config);
    let allowlist = Arc::new(allowlist);

    loop {
        // Startup is the only fatal phase; a runtime accept error (fd
        // pressure, an aborted handshake) must not take live sessions down.
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        let config = Arc::clone(&config);
        let allowlist = Arc::clone(&allowlist);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &allowlist, &config).await {
                tracing::warn!(%peer, error = %e, "session ended with error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    allowlist: &Allowlist,
    config: &Config,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let entry = match auth::authenticate(&mut stream, allowlist).await {
        Ok(entry) => entry,
        Err(e) => {
            // Rejected, never downgraded to read-only access.
            tracing::warn!(?peer, error = %e, "authentication failed");
            return Ok(());
        }
    };
    session::run(stream, entry, config).await
}

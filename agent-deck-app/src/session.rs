use crate::config::Config;
use crate::dashboard::{Control, Dashboard, DashboardDeps};
use crate::{input, render};
use agent_deck_gateway::ExecutionGateway;
use agent_deck_policy::{AllowlistEntry, SessionEnvironment};
use agent_deck_store::{AuditLog, RequestQueue};
use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// One authenticated connection: derives the immutable session environment,
/// then loops read-event / dispatch / render / write-frame until quit, EOF,
/// or an I/O error. Nothing here is shared with other sessions except the
/// queue and audit files behind their locks.
pub async fn run(stream: TcpStream, entry: AllowlistEntry, config: &Config) -> Result<()> {
    let env = SessionEnvironment::derive(&entry);
    tracing::info!(user = %env.user, admin = env.is_admin, "session start");

    let timeout = Duration::from_secs(config.invoke_timeout_secs);
    let gateway = ExecutionGateway::new(&config.runner_path, AuditLog::new(&config.audit_log_path))
        .with_plugin_env(&env.plugin_env_path)
        .with_process_env(env.process_env())
        .with_timeout(timeout);
    let deps = DashboardDeps {
        gateway,
        queue: RequestQueue::new(&config.queue_path),
        audit: AuditLog::new(&config.audit_log_path),
        agents_dir: config.agents_dir.clone(),
        external_editor: config.external_editor.clone(),
        image_viewer: config.image_viewer.clone(),
        video_player: config.video_player.clone(),
        shell_timeout: timeout,
    };
    let mut dashboard = Dashboard::new(env, deps);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = render::render(&dashboard);
        write_half.write_all(frame.as_bytes()).await?;

        let Some(key) = input::read_key(&mut reader).await? else {
            break;
        };
        if dashboard.handle_key(key).await == Control::Quit {
            break;
        }
    }

    tracing::info!(user = %dashboard.env.user, "session closed");
    Ok(())
}

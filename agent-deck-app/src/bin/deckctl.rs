//! Out-of-band approval tool: a peer actor on the same request queue and
//! audit log as the dashboard, honoring the same allowlist checks and the
//! same lock discipline.

use agent_deck_app::Config;
use agent_deck_core::{AuditEntry, Request};
use agent_deck_gateway::ExecutionGateway;
use agent_deck_policy::{Allowlist, AllowlistEntry, SessionEnvironment};
use agent_deck_store::{AuditLog, QueueError, RequestQueue};
use anyhow::{bail, Context, Result};
use std::time::Duration;

const USAGE: &str = "usage: deckctl [--config <path>] [--user <name>] \
<list | approve <id> | deny <id> | request <agent> [notes...]>";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let config_path = take_flag(&mut args, "--config")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let user = match take_flag(&mut args, "--user") {
        Some(user) => user,
        None => std::env::var("USER").context("no --user flag and $USER is unset")?,
    };

    if args.is_empty() {
        bail!("{USAGE}");
    }

    let config = Config::load(&config_path)?;
    let allowlist = Allowlist::load(&config.allowlist_path)
        .with_context(|| format!("cannot load allowlist {}", config.allowlist_path.display()))?;
    let queue = RequestQueue::new(&config.queue_path);
    let audit = AuditLog::new(&config.audit_log_path);

    match args[0].as_str() {
        "list" => {
            let pending = queue.list();
            if pending.is_empty() {
                println!("no pending requests");
            }
            for request in pending {
                println!(
                    "{}  {}  by {}  at {}  {}",
                    request.id,
                    request.agent,
                    request.user,
                    request.time,
                    request.notes.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        "approve" => {
            let id = args.get(1).context(USAGE)?;
            let entry = require_admin(&allowlist, &user)?;
            approve(&config, &queue, &entry, id).await
        }
        "deny" => {
            let id = args.get(1).context(USAGE)?;
            require_admin(&allowlist, &user)?;
            deny(&queue, &audit, &user, id)
        }
        "request" => {
            let agent = args.get(1).context(USAGE)?;
            if allowlist.lookup(&user).is_none() {
                bail!("not permitted: '{user}' is not in the allowlist");
            }
            let notes = if args.len() > 2 {
                Some(args[2..].join(" "))
            } else {
                None
            };
            let request = Request::new(agent.clone(), user, notes);
            let id = request.id.clone();
            queue.enqueue(request)?;
            println!("queued {id}");
            Ok(())
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

fn require_admin(allowlist: &Allowlist, user: &str) -> Result<AllowlistEntry> {
    match allowlist.lookup(user) {
        Some(entry) if entry.is_admin => Ok(entry.clone()),
        Some(_) => bail!("not permitted: '{user}' is not an admin"),
        None => bail!("not permitted: '{user}' is not in the allowlist"),
    }
}

async fn approve(
    config: &Config,
    queue: &RequestQueue,
    approver: &AllowlistEntry,
    id: &str,
) -> Result<()> {
    // Resolve first: the actor who removes the request is the one who
    // executes it, so two racing approvers cannot both run the agent.
    let request = match queue.resolve(id) {
        Ok(request) => request,
        Err(QueueError::NotFound(_)) => {
            println!("request {id} not found (already resolved by another actor)");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let env = SessionEnvironment::derive(approver);
    let gateway = ExecutionGateway::new(
        &config.runner_path,
        AuditLog::new(&config.audit_log_path),
    )
    .with_plugin_env(&env.plugin_env_path)
    .with_process_env(env.process_env())
    .with_timeout(Duration::from_secs(config.invoke_timeout_secs));

    let invocation = gateway
        .invoke(&request.agent, true, Some(&request.user), Some(&env.user))
        .await?;
    print!("{}", invocation.output);
    println!("exit code: {}", invocation.exit_code);
    println!("approved {} ({})", request.id, request.agent);
    Ok(())
}

fn deny(queue: &RequestQueue, audit: &AuditLog, approver: &str, id: &str) -> Result<()> {
    let request = match queue.resolve(id) {
        Ok(request) => request,
        Err(QueueError::NotFound(_)) => {
            println!("request {id} not found (already resolved by another actor)");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let entry = AuditEntry::new(&request.agent, false, 0)
        .with_error("denied")
        .with_requester(&request.user)
        .with_approver(approver);
    audit.append(&entry)?;
    println!("denied {} ({})", request.id, request.agent);
    Ok(())
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let position = args.iter().position(|a| a == flag)?;
    if position + 1 >= args.len() {
        return None;
    }
    let value = args.remove(position + 1);
    args.remove(position);
    Some(value)
}

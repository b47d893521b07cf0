use agent_deck_core::AuditEntry;
use agent_deck_store::{AuditLog, AuditLogError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Audit write failed: {0}")]
    Audit(#[from] AuditLogError),
}

/// Result of one agent-runner or shell invocation: combined stdout+stderr,
/// exit status, and the error text when the process never ran cleanly.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: String,
    pub exit_code: i32,
    pub error: Option<String>,
}

/// Synchronous (per-session) bridge to the external agent-runner process.
///
/// The runner is an opaque collaborator: `<runner> <agent> [--exec]`,
/// diagnostics on stdout/stderr, exit 0 on success. Every invocation is
/// recorded to the audit log exactly once, whatever the outcome, before
/// this returns. The caller enforces the allowlist before asking for
/// `exec = true`.
pub struct ExecutionGateway {
    runner: PathBuf,
    plugin_env: Option<PathBuf>,
    process_env: Vec<(String, String)>,
    timeout: Duration,
    audit: AuditLog,
}

impl ExecutionGateway {
    pub fn new<P: AsRef<Path>>(runner: P, audit: AuditLog) -> Self {
        Self {
            runner: runner.as_ref().to_path_buf(),
            plugin_env: None,
            process_env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            audit,
        }
    }

    pub fn with_plugin_env<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.plugin_env = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_process_env(mut self, env: Vec<(String, String)>) -> Self {
        self.process_env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn invoke(
        &self,
        agent: &str,
        exec: bool,
        requester: Option<&str>,
        approver: Option<&str>,
    ) -> Result<Invocation, GatewayError> {
        let invocation = if valid_agent_name(agent) {
            let mut script = String::new();
            if let Some(env_file) = &self.plugin_env {
                let env_file = shell_quote(&env_file.to_string_lossy());
                script.push_str(&format!("[ -f {env_file} ] && . {env_file}; "));
            }
            script.push_str(&format!(
                "exec {} {}",
                shell_quote(&self.runner.to_string_lossy()),
                shell_quote(agent)
            ));
            if exec {
                script.push_str(" --exec");
            }
            tracing::info!(agent, exec, "invoking agent runner");
            spawn_captured(&script, &self.process_env, self.timeout).await
        } else {
            Invocation {
                output: String::new(),
                exit_code: -1,
                error: Some(format!("invalid agent name: {agent}")),
            }
        };

        let mut entry = AuditEntry::new(agent, exec, invocation.exit_code);
        if let Some(error) = &invocation.error {
            entry = entry.with_error(error.clone());
        }
        if let Some(requester) = requester {
            entry = entry.with_requester(requester);
        }
        if let Some(approver) = approver {
            entry = entry.with_approver(approver);
        }
        self.audit.append(&entry)?;

        Ok(invocation)
    }
}

/// Runs one shell line for the Shell view, sourcing the plugin env file
/// first when present. Not audited; only agent invocations are.
pub async fn run_shell(
    line: &str,
    plugin_env: Option<&Path>,
    process_env: &[(String, String)],
    limit: Duration,
) -> Invocation {
    let mut script = String::new();
    if let Some(env_file) = plugin_env {
        let env_file = shell_quote(&env_file.to_string_lossy());
        script.push_str(&format!("[ -f {env_file} ] && . {env_file}; "));
    }
    script.push_str(line);
    spawn_captured(&script, process_env, limit).await
}

async fn spawn_captured(
    script: &str,
    process_env: &[(String, String)],
    limit: Duration,
) -> Invocation {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in process_env {
        cmd.env(key, value);
    }

    // Own process group so session teardown or a timeout can take the
    // whole tree down, not just the direct child.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Invocation {
                output: String::new(),
                exit_code: -1,
                error: Some(format!("spawn failed: {e}")),
            }
        }
    };
    let pid = child.id();

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let exit_code = output.status.code().unwrap_or(-1);
            Invocation {
                output: combined,
                exit_code,
                error: if output.status.success() {
                    None
                } else {
                    Some(format!("exit code {exit_code}"))
                },
            }
        }
        Ok(Err(e)) => Invocation {
            output: String::new(),
            exit_code: -1,
            error: Some(format!("wait failed: {e}")),
        },
        Err(_) => {
            kill_process_group(pid);
            Invocation {
                output: String::new(),
                exit_code: -1,
                error: Some(format!("timeout after {}s", limit.as_secs())),
            }
        }
    }
}

fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: plain kill(2) on the process group we created via setsid.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn valid_agent_name(agent: &str) -> bool {
    !agent.is_empty()
        && agent
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_runner(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("runner.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn gateway(dir: &Path, body: &str) -> (ExecutionGateway, AuditLog) {
        let runner = write_runner(dir, body);
        let audit_path = dir.join("audit.log");
        let gateway = ExecutionGateway::new(&runner, AuditLog::new(&audit_path));
        (gateway, AuditLog::new(&audit_path))
    }

    #[tokio::test]
    async fn test_dry_run_omits_exec_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, audit) = gateway(dir.path(), r#"echo "agent=$1 flag=${2:-none}""#);

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("agent=deploy flag=none"));

        let entries = audit.tail(10);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].exec);
    }

    #[tokio::test]
    async fn test_exec_passes_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, audit) = gateway(dir.path(), r#"echo "agent=$1 flag=${2:-none}""#);

        let result = gateway
            .invoke("deploy", true, Some("alice"), None)
            .await
            .unwrap();
        assert!(result.output.contains("agent=deploy flag=--exec"));

        let entries = audit.tail(10);
        assert!(entries[0].exec);
        assert_eq!(entries[0].requester.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_combined_output_includes_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(dir.path(), "echo out; echo err >&2");

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn test_failure_is_audited_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, audit) = gateway(dir.path(), "echo broken >&2; exit 3");

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.error.is_some());

        let entries = audit.tail(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].exit_code, 3);
        assert!(entries[0].error.is_some());
    }

    #[tokio::test]
    async fn test_timeout_reports_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, audit) = gateway(dir.path(), "sleep 10");
        let gateway = gateway.with_timeout(Duration::from_millis(200));

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_deref().unwrap().contains("timeout"));

        let entries = audit.tail(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].exit_code, -1);
    }

    #[tokio::test]
    async fn test_invalid_agent_name_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let (gateway, audit) = gateway(
            dir.path(),
            &format!("touch {}", marker.to_string_lossy()),
        );

        let result = gateway
            .invoke("deploy; rm -rf /", false, None, None)
            .await
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(!marker.exists());

        // Still exactly one audit entry.
        assert_eq!(audit.tail(10).len(), 1);
    }

    #[tokio::test]
    async fn test_plugin_env_sourced_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("env.sh");
        std::fs::write(&env_file, "DECK_GREETING=hello\nexport DECK_GREETING\n").unwrap();
        let (gateway, _) = gateway(dir.path(), r#"echo "greeting=$DECK_GREETING""#);
        let gateway = gateway.with_plugin_env(&env_file);

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert!(result.output.contains("greeting=hello"));
    }

    #[tokio::test]
    async fn test_missing_plugin_env_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(dir.path(), "echo ok");
        let gateway = gateway.with_plugin_env(dir.path().join("absent.sh"));

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("ok"));
    }

    #[tokio::test]
    async fn test_session_env_reaches_runner() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(dir.path(), r#"echo "user=$DECK_USER""#);
        let gateway =
            gateway.with_process_env(vec![("DECK_USER".to_string(), "alice".to_string())]);

        let result = gateway.invoke("deploy", false, None, None).await.unwrap();
        assert!(result.output.contains("user=alice"));
    }

    #[tokio::test]
    async fn test_run_shell_captures_combined_output() {
        let result = run_shell(
            "echo front; echo back >&2",
            None,
            &[],
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("front"));
        assert!(result.output.contains("back"));
    }
}

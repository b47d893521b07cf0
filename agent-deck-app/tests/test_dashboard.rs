use agent_deck_app::dashboard::{Control, Dashboard, DashboardDeps, Layout, View};
use agent_deck_app::input::KeyEvent;
use agent_deck_core::Request;
use agent_deck_gateway::ExecutionGateway;
use agent_deck_policy::SessionEnvironment;
use agent_deck_store::{AuditLog, RequestQueue};
use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    marker: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("exec-marker");

        let agents = dir.path().join("agents");
        std::fs::create_dir(&agents).unwrap();
        std::fs::write(agents.join("backup.md"), "# backup\nNightly backup.\n").unwrap();
        std::fs::write(agents.join("deploy.md"), "# deploy\nShip to prod.\n").unwrap();
        std::fs::write(
            agents.join("shutdown-cluster.md"),
            "# shutdown-cluster\nTurn it all off.\n",
        )
        .unwrap();

        let runner = dir.path().join("runner.sh");
        std::fs::write(
            &runner,
            format!(
                "#!/bin/sh\necho \"ran $1 ${{2:-dry}}\"\nif [ \"$2\" = \"--exec\" ]; then touch {}; fi\nexit 0\n",
                marker.to_string_lossy()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir, marker }
    }

    fn audit(&self) -> AuditLog {
        AuditLog::new(self.dir.path().join("audit.log"))
    }

    fn queue(&self) -> RequestQueue {
        RequestQueue::new(self.dir.path().join("requests.json"))
    }

    fn session(&self, user: &str, allowed: &[&str], is_admin: bool) -> Dashboard {
        let env = SessionEnvironment {
            user: user.to_string(),
            allowed_exec: allowed.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            is_admin,
            home_dir: self.dir.path().to_path_buf(),
            plugin_env_path: self.dir.path().join("env.sh"),
        };
        let gateway = ExecutionGateway::new(self.dir.path().join("runner.sh"), self.audit())
            .with_process_env(env.process_env())
            .with_timeout(Duration::from_secs(10));
        let deps = DashboardDeps {
            gateway,
            queue: self.queue(),
            audit: self.audit(),
            agents_dir: self.dir.path().join("agents"),
            external_editor: "true".to_string(),
            image_viewer: "true".to_string(),
            video_player: "true".to_string(),
            shell_timeout: Duration::from_secs(10),
        };
        Dashboard::new(env, deps)
    }
}

fn select_agent(dashboard: &mut Dashboard, name: &str) {
    dashboard.agent_sel = dashboard
        .agents
        .iter()
        .position(|a| a.name == name)
        .expect("agent listed");
}

// Scenario A: alice may exec "deploy"; exec runs the gateway and writes
// exactly one audit entry with exec=true.
#[tokio::test]
async fn test_exec_allowed_agent_runs_and_audits() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &["deploy"], false);
    dashboard.view = View::Agents;
    select_agent(&mut dashboard, "deploy");

    dashboard.handle_key(KeyEvent::Char('x')).await;

    assert!(fixture.marker.exists());
    assert_eq!(dashboard.view, View::Preview);
    assert!(dashboard.preview.contains("ran deploy --exec"));

    let entries = fixture.audit().tail(10);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].agent, "deploy");
    assert!(entries[0].exec);
    assert_eq!(entries[0].requester.as_deref(), Some("alice"));
}

// Scenario B: exec of an agent outside the allowlist is refused with no
// audit write and no process spawn.
#[tokio::test]
async fn test_exec_forbidden_agent_refused() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &["deploy"], false);
    dashboard.view = View::Agents;
    select_agent(&mut dashboard, "shutdown-cluster");

    dashboard.handle_key(KeyEvent::Char('x')).await;

    assert!(dashboard.status.contains("not permitted"));
    assert_eq!(dashboard.view, View::Agents);
    assert!(!fixture.marker.exists());
    assert!(fixture.audit().tail(10).is_empty());
}

#[tokio::test]
async fn test_dry_run_needs_no_permission_and_audits() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Agents;
    select_agent(&mut dashboard, "shutdown-cluster");

    dashboard.handle_key(KeyEvent::Char('d')).await;

    assert!(dashboard.preview.contains("ran shutdown-cluster dry"));
    assert!(!fixture.marker.exists());

    let entries = fixture.audit().tail(10);
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].exec);
}

// Scenario C: admin approval executes, tags the approver, removes the
// request; a second resolution reports not-found.
#[tokio::test]
async fn test_admin_approve_executes_and_clears_request() {
    let fixture = Fixture::new();
    let request = Request::new("backup", "carol", None);
    let id = request.id.clone();
    fixture.queue().enqueue(request).unwrap();

    let mut dashboard = fixture.session("bob", &[], true);
    dashboard.view = View::Requests;
    dashboard.handle_key(KeyEvent::Char('r')).await;
    assert_eq!(dashboard.requests.len(), 1);

    dashboard.handle_key(KeyEvent::Char('a')).await;

    assert!(fixture.queue().list().is_empty());
    let entries = fixture.audit().tail(10);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].approver.as_deref(), Some("bob"));
    assert_eq!(entries[0].requester.as_deref(), Some("carol"));
    assert!(entries[0].exec);

    assert!(matches!(
        fixture.queue().resolve(&id),
        Err(agent_deck_store::QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_non_admin_cannot_approve_or_deny() {
    let fixture = Fixture::new();
    fixture
        .queue()
        .enqueue(Request::new("backup", "carol", None))
        .unwrap();

    let mut dashboard = fixture.session("alice", &["deploy"], false);
    dashboard.view = View::Requests;
    dashboard.handle_key(KeyEvent::Char('r')).await;

    dashboard.handle_key(KeyEvent::Char('a')).await;
    assert!(dashboard.status.contains("not permitted"));
    dashboard.handle_key(KeyEvent::Char('d')).await;
    assert!(dashboard.status.contains("not permitted"));

    // Queue unchanged, nothing executed, nothing audited.
    assert_eq!(fixture.queue().list().len(), 1);
    assert!(!fixture.marker.exists());
    assert!(fixture.audit().tail(10).is_empty());
}

#[tokio::test]
async fn test_admin_deny_audits_without_execution() {
    let fixture = Fixture::new();
    fixture
        .queue()
        .enqueue(Request::new("backup", "carol", None))
        .unwrap();

    let mut dashboard = fixture.session("bob", &[], true);
    dashboard.view = View::Requests;
    dashboard.handle_key(KeyEvent::Char('r')).await;
    dashboard.handle_key(KeyEvent::Char('d')).await;

    assert!(fixture.queue().list().is_empty());
    assert!(!fixture.marker.exists());

    let entries = fixture.audit().tail(10);
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].exec);
    assert_eq!(entries[0].error.as_deref(), Some("denied"));
    assert_eq!(entries[0].approver.as_deref(), Some("bob"));
}

// A request resolved by another actor between refresh and approve must
// not execute or audit a second time.
#[tokio::test]
async fn test_approve_of_already_resolved_request_runs_nothing() {
    let fixture = Fixture::new();
    let request = Request::new("backup", "carol", None);
    let id = request.id.clone();
    fixture.queue().enqueue(request).unwrap();

    let mut dashboard = fixture.session("bob", &[], true);
    dashboard.view = View::Requests;
    dashboard.handle_key(KeyEvent::Char('r')).await;

    // Another approver wins the race.
    fixture.queue().resolve(&id).unwrap();

    dashboard.handle_key(KeyEvent::Char('a')).await;

    assert!(dashboard.status.contains("not found"));
    assert!(!fixture.marker.exists());
    assert!(fixture.audit().tail(10).is_empty());
}

#[tokio::test]
async fn test_deny_of_already_resolved_request_audits_nothing() {
    let fixture = Fixture::new();
    let request = Request::new("backup", "carol", None);
    let id = request.id.clone();
    fixture.queue().enqueue(request).unwrap();

    let mut dashboard = fixture.session("bob", &[], true);
    dashboard.view = View::Requests;
    dashboard.handle_key(KeyEvent::Char('r')).await;

    fixture.queue().resolve(&id).unwrap();

    dashboard.handle_key(KeyEvent::Char('d')).await;

    assert!(dashboard.status.contains("not found"));
    assert!(fixture.audit().tail(10).is_empty());
}

#[tokio::test]
async fn test_request_from_agents_view_enqueues() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Agents;
    select_agent(&mut dashboard, "backup");

    dashboard.handle_key(KeyEvent::Char('r')).await;

    let pending = fixture.queue().list();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].agent, "backup");
    assert_eq!(pending[0].user, "alice");
}

#[tokio::test]
async fn test_view_cycling_and_digit_jump() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    assert_eq!(dashboard.view, View::Files);

    for _ in 0..View::ALL.len() {
        dashboard.handle_key(KeyEvent::Tab).await;
    }
    assert_eq!(dashboard.view, View::Files);

    dashboard.handle_key(KeyEvent::BackTab).await;
    assert_eq!(dashboard.view, View::YouTube);

    dashboard.handle_key(KeyEvent::Char('4')).await;
    // '4' typed in a text view would be input; YouTube captures text, so
    // digits only jump from non-text views.
    assert_eq!(dashboard.view, View::YouTube);
    dashboard.handle_key(KeyEvent::Tab).await;
    dashboard.handle_key(KeyEvent::Char('4')).await;
    assert_eq!(dashboard.view, View::Audit);
    dashboard.handle_key(KeyEvent::Char('0')).await;
    assert_eq!(dashboard.view, View::YouTube);
}

#[tokio::test]
async fn test_layout_cycles_through_three() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    assert_eq!(dashboard.layout, Layout::Single);
    dashboard.handle_key(KeyEvent::Char('w')).await;
    assert_eq!(dashboard.layout, Layout::VerticalSplit);
    dashboard.handle_key(KeyEvent::Char('w')).await;
    assert_eq!(dashboard.layout, Layout::HorizontalSplit);
    dashboard.handle_key(KeyEvent::Char('w')).await;
    assert_eq!(dashboard.layout, Layout::Single);
}

#[tokio::test]
async fn test_quit_key() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    assert_eq!(dashboard.handle_key(KeyEvent::Char('q')).await, Control::Quit);
}

#[tokio::test]
async fn test_editor_save_writes_target() {
    let fixture = Fixture::new();
    let target = fixture.dir.path().join("note.txt");
    std::fs::write(&target, "before").unwrap();

    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Editor;
    dashboard.editor_target = Some(target.clone());
    dashboard.editor_buffer = "after".to_string();

    dashboard.handle_key(KeyEvent::Char('!')).await;
    dashboard.handle_key(KeyEvent::CtrlS).await;

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "after!");
}

#[tokio::test]
async fn test_editor_save_without_target_is_error() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Editor;

    dashboard.handle_key(KeyEvent::CtrlS).await;
    assert!(dashboard.status.contains("no target path"));
}

#[tokio::test]
async fn test_editor_exit_keeps_buffer() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Editor;
    dashboard.editor_buffer = "draft".to_string();

    dashboard.handle_key(KeyEvent::CtrlX).await;
    assert_eq!(dashboard.view, View::Files);
    assert_eq!(dashboard.editor_buffer, "draft");
}

#[tokio::test]
async fn test_shell_command_output_lands_in_preview() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Shell;

    for c in "echo hello-deck".chars() {
        dashboard.handle_key(KeyEvent::Char(c)).await;
    }
    dashboard.handle_key(KeyEvent::Enter).await;

    assert_eq!(dashboard.view, View::Preview);
    assert!(dashboard.preview.contains("hello-deck"));
    assert!(dashboard.shell_input.is_empty());
}

#[tokio::test]
async fn test_agent_describe_shows_description() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &[], false);
    dashboard.view = View::Agents;
    select_agent(&mut dashboard, "deploy");

    dashboard.handle_key(KeyEvent::Enter).await;
    assert_eq!(dashboard.view, View::Preview);
    assert!(dashboard.preview.contains("Ship to prod"));
}

#[tokio::test]
async fn test_render_smoke_all_views_and_layouts() {
    let fixture = Fixture::new();
    let mut dashboard = fixture.session("alice", &["deploy"], true);
    for view in View::ALL {
        dashboard.view = view;
        for _ in 0..3 {
            dashboard.layout = dashboard.layout.cycle();
            let frame = agent_deck_app::render::render(&dashboard);
            assert!(frame.contains(view.title()));
        }
    }
}

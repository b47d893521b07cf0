use crate::input::KeyEvent;
use agent_deck_core::{AgentInfo, AuditEntry, Request};
use agent_deck_gateway::{run_shell, ExecutionGateway};
use agent_deck_policy::SessionEnvironment;
use agent_deck_store::{AuditLog, QueueError, RequestQueue};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

const AUDIT_VIEW_LIMIT: usize = 100;

/// The ten dashboard views, in tab order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Files,
    Agents,
    Requests,
    Audit,
    Plugins,
    Preview,
    Editor,
    Shell,
    Image,
    YouTube,
}

impl View {
    pub const ALL: [View; 10] = [
        View::Files,
        View::Agents,
        View::Requests,
        View::Audit,
        View::Plugins,
        View::Preview,
        View::Editor,
        View::Shell,
        View::Image,
        View::YouTube,
    ];

    pub fn title(self) -> &'static str {
        match self {
            View::Files => "Files",
            View::Agents => "Agents",
            View::Requests => "Requests",
            View::Audit => "Audit",
            View::Plugins => "Plugins",
            View::Preview => "Preview",
            View::Editor => "Editor",
            View::Shell => "Shell",
            View::Image => "Image",
            View::YouTube => "YouTube",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|v| *v == self).unwrap_or(0)
    }

    pub fn next(self) -> View {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> View {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// `1`-`9` jump to the first nine views, `0` to the tenth.
    pub fn from_digit(digit: char) -> Option<View> {
        match digit {
            '1'..='9' => Self::ALL.get(digit as usize - '1' as usize).copied(),
            '0' => Some(Self::ALL[9]),
            _ => None,
        }
    }

    /// Views where printable keys feed a text buffer instead of bindings.
    fn captures_text(self) -> bool {
        matches!(self, View::Editor | View::Shell | View::YouTube)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    VerticalSplit,
    HorizontalSplit,
}

impl Layout {
    pub fn cycle(self) -> Layout {
        match self {
            Layout::Single => Layout::VerticalSplit,
            Layout::VerticalSplit => Layout::HorizontalSplit,
            Layout::HorizontalSplit => Layout::Single,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Layout::Single => "single",
            Layout::VerticalSplit => "vsplit",
            Layout::HorizontalSplit => "hsplit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub name: String,
    pub is_dir: bool,
}

/// External collaborators and per-session settings the state machine
/// drives. Queue and audit log are the only shared state; everything else
/// is session-owned.
pub struct DashboardDeps {
    pub gateway: ExecutionGateway,
    pub queue: RequestQueue,
    pub audit: AuditLog,
    pub agents_dir: PathBuf,
    pub external_editor: String,
    pub image_viewer: String,
    pub video_player: String,
    pub shell_timeout: Duration,
}

/// Per-session dashboard state machine. Pure, synchronous, single-threaded:
/// one key event is fully processed (including any gateway call) before the
/// next is read, so a long invocation blocks only its own session.
pub struct Dashboard {
    pub env: SessionEnvironment,
    pub view: View,
    pub layout: Layout,
    pub status: String,

    pub files_dir: PathBuf,
    pub files: Vec<FileRow>,
    pub file_sel: usize,

    pub agents: Vec<AgentInfo>,
    pub agent_sel: usize,

    pub requests: Vec<Request>,
    pub request_sel: usize,

    pub audit_entries: Vec<AuditEntry>,

    pub preview: String,
    pub preview_scroll: usize,

    pub editor_buffer: String,
    pub editor_target: Option<PathBuf>,

    pub shell_input: String,
    pub youtube_input: String,

    deps: DashboardDeps,
}

impl Dashboard {
    pub fn new(env: SessionEnvironment, deps: DashboardDeps) -> Self {
        let files_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let mut dashboard = Self {
            env,
            view: View::Files,
            layout: Layout::Single,
            status: String::from("connected"),
            files_dir,
            files: Vec::new(),
            file_sel: 0,
            agents: Vec::new(),
            agent_sel: 0,
            requests: Vec::new(),
            request_sel: 0,
            audit_entries: Vec::new(),
            preview: String::new(),
            preview_scroll: 0,
            editor_buffer: String::new(),
            editor_target: None,
            shell_input: String::new(),
            youtube_input: String::new(),
            deps,
        };
        dashboard.reload_files();
        dashboard.reload_agents();
        dashboard.reload_requests();
        dashboard.reload_audit();
        dashboard
    }

    pub async fn handle_key(&mut self, key: KeyEvent) -> Control {
        match key {
            KeyEvent::Tab => {
                self.view = self.view.next();
                return Control::Continue;
            }
            KeyEvent::BackTab => {
                self.view = self.view.prev();
                return Control::Continue;
            }
            _ => {}
        }

        if self.view.captures_text() {
            return self.handle_text_view_key(key).await;
        }

        if let KeyEvent::Char(c) = key {
            if c == 'q' {
                return Control::Quit;
            }
            if c == 'w' {
                self.layout = self.layout.cycle();
                self.status = format!("layout: {}", self.layout.title());
                return Control::Continue;
            }
            if let Some(view) = View::from_digit(c) {
                self.view = view;
                return Control::Continue;
            }
        }

        match self.view {
            View::Files => self.handle_files_key(key).await,
            View::Agents => self.handle_agents_key(key).await,
            View::Requests => self.handle_requests_key(key).await,
            View::Audit => self.handle_audit_key(key),
            View::Preview => self.handle_preview_key(key),
            View::Image => self.handle_image_key(key),
            View::Plugins => Control::Continue,
            // Text views handled above; unreachable here.
            View::Editor | View::Shell | View::YouTube => Control::Continue,
        }
    }

    // ----- Files ---------------------------------------------------------

    async fn handle_files_key(&mut self, key: KeyEvent) -> Control {
        match key {
            KeyEvent::Up | KeyEvent::Char('k') => {
                self.file_sel = self.file_sel.saturating_sub(1);
            }
            KeyEvent::Down | KeyEvent::Char('j') => {
                if self.file_sel + 1 < self.files.len() {
                    self.file_sel += 1;
                }
            }
            KeyEvent::Backspace => {
                if let Some(parent) = self.files_dir.parent() {
                    self.files_dir = parent.to_path_buf();
                    self.reload_files();
                }
            }
            KeyEvent::Enter => self.confirm_file(),
            KeyEvent::Char('p') => self.print_file(),
            KeyEvent::Char('e') => self.external_edit(),
            KeyEvent::Char('i') => self.embedded_edit(),
            KeyEvent::Char('r') => self.reload_files(),
            _ => {}
        }
        Control::Continue
    }

    fn selected_file(&self) -> Option<(PathBuf, bool)> {
        self.files
            .get(self.file_sel)
            .map(|row| (self.files_dir.join(&row.name), row.is_dir))
    }

    fn confirm_file(&mut self) {
        let Some((path, is_dir)) = self.selected_file() else {
            self.status = "nothing selected".to_string();
            return;
        };
        if is_dir {
            self.files_dir = path;
            self.reload_files();
            return;
        }
        if path.extension().is_some_and(|ext| ext == "md") {
            self.print_file();
            return;
        }
        self.status = "plain file: i = edit, p = print".to_string();
    }

    fn print_file(&mut self) {
        let Some((path, is_dir)) = self.selected_file() else {
            self.status = "nothing selected".to_string();
            return;
        };
        if is_dir {
            self.status = "selection is a directory".to_string();
            return;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                self.show_preview(content);
                self.status = format!("preview: {}", path.display());
            }
            Err(e) => self.status = format!("cannot read {}: {e}", path.display()),
        }
    }

    /// Fire-and-forget hand-off to the configured external editor; no
    /// output is captured.
    fn external_edit(&mut self) {
        let Some((path, is_dir)) = self.selected_file() else {
            self.status = "nothing selected".to_string();
            return;
        };
        if is_dir {
            self.status = "selection is a directory".to_string();
            return;
        }
        let editor = self.deps.external_editor.clone();
        self.spawn_detached(&editor, &path.to_string_lossy());
        self.status = format!("opened {} in {editor}", path.display());
    }

    fn embedded_edit(&mut self) {
        let Some((path, is_dir)) = self.selected_file() else {
            self.status = "nothing selected".to_string();
            return;
        };
        if is_dir {
            self.status = "selection is a directory".to_string();
            return;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                self.editor_buffer = content;
                self.editor_target = Some(path);
                self.view = View::Editor;
                self.status = "editing: ^S save, ^X exit".to_string();
            }
            Err(e) => self.status = format!("cannot read {}: {e}", path.display()),
        }
    }

    fn reload_files(&mut self) {
        self.files.clear();
        self.file_sel = 0;
        match std::fs::read_dir(&self.files_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    self.files.push(FileRow {
                        name: entry.file_name().to_string_lossy().to_string(),
                        is_dir,
                    });
                }
                self.files
                    .sort_by(|a, b| (!a.is_dir, &a.name).cmp(&(!b.is_dir, &b.name)));
            }
            Err(e) => self.status = format!("cannot list {}: {e}", self.files_dir.display()),
        }
    }

    // ----- Agents --------------------------------------------------------

    async fn handle_agents_key(&mut self, key: KeyEvent) -> Control {
        match key {
            KeyEvent::Up | KeyEvent::Char('k') => {
                self.agent_sel = self.agent_sel.saturating_sub(1);
            }
            KeyEvent::Down | KeyEvent::Char('j') => {
                if self.agent_sel + 1 < self.agents.len() {
                    self.agent_sel += 1;
                }
            }
            KeyEvent::Enter => self.describe_agent(),
            KeyEvent::Char('d') => self.invoke_agent(false).await,
            KeyEvent::Char('x') => self.invoke_agent(true).await,
            KeyEvent::Char('r') => self.request_agent(),
            _ => {}
        }
        Control::Continue
    }

    fn selected_agent(&self) -> Option<&AgentInfo> {
        self.agents.get(self.agent_sel)
    }

    fn describe_agent(&mut self) {
        let Some(agent) = self.selected_agent() else {
            self.status = "no agent selected".to_string();
            return;
        };
        let name = agent.name.clone();
        let description = agent.description.clone();
        self.show_preview(description);
        self.status = format!("agent: {name}");
    }

    async fn invoke_agent(&mut self, exec: bool) {
        let Some(agent) = self.selected_agent() else {
            self.status = "no agent selected".to_string();
            return;
        };
        let name = agent.name.clone();

        // Allowlist gate: a refusal is session-local and leaves the audit
        // log untouched (no process is spawned).
        if exec && !self.env.can_exec(&name) {
            self.status = format!("not permitted: '{name}' is not in your allowlist");
            return;
        }

        let user = self.env.user.clone();
        match self
            .deps
            .gateway
            .invoke(&name, exec, Some(&user), None)
            .await
        {
            Ok(invocation) => {
                let mode = if exec { "exec" } else { "dry-run" };
                let mut text = invocation.output;
                if let Some(error) = &invocation.error {
                    text.push_str(&format!("\n[{error}]"));
                }
                self.show_preview(text);
                self.status = format!("{mode} {name}: exit {}", invocation.exit_code);
            }
            Err(e) => self.status = format!("gateway error: {e}"),
        }
    }

    fn request_agent(&mut self) {
        let Some(agent) = self.selected_agent() else {
            self.status = "no agent selected".to_string();
            return;
        };
        let request = Request::new(agent.name.clone(), self.env.user.clone(), None);
        let id = request.id.clone();
        match self.deps.queue.enqueue(request) {
            Ok(()) => {
                self.status = format!("queued {id}");
                self.reload_requests();
            }
            Err(e) => self.status = format!("enqueue failed: {e}"),
        }
    }

    fn reload_agents(&mut self) {
        self.agents.clear();
        self.agent_sel = 0;
        let Ok(entries) = std::fs::read_dir(&self.deps.agents_dir) else {
            self.status = format!(
                "cannot list agents dir {}",
                self.deps.agents_dir.display()
            );
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            let description = std::fs::read_to_string(&path).unwrap_or_default();
            self.agents.push(AgentInfo { name, description });
        }
        self.agents.sort_by(|a, b| a.name.cmp(&b.name));
    }

    // ----- Requests ------------------------------------------------------

    async fn handle_requests_key(&mut self, key: KeyEvent) -> Control {
        match key {
            KeyEvent::Up | KeyEvent::Char('k') => {
                self.request_sel = self.request_sel.saturating_sub(1);
            }
            KeyEvent::Down | KeyEvent::Char('j') => {
                if self.request_sel + 1 < self.requests.len() {
                    self.request_sel += 1;
                }
            }
            KeyEvent::Char('r') => {
                self.reload_requests();
                self.status = format!("{} pending request(s)", self.requests.len());
            }
            KeyEvent::Char('a') => self.approve_selected().await,
            KeyEvent::Char('d') => self.deny_selected(),
            _ => {}
        }
        Control::Continue
    }

    async fn approve_selected(&mut self) {
        if !self.env.is_admin {
            self.status = "not permitted: approve requires admin".to_string();
            return;
        }
        let Some(request) = self.requests.get(self.request_sel).cloned() else {
            self.status = "no request selected".to_string();
            return;
        };

        // Claim the request before running anything: whichever actor wins
        // the resolve executes, so racing approvers cannot double-execute.
        let claimed = match self.deps.queue.resolve(&request.id) {
            Ok(claimed) => claimed,
            Err(QueueError::NotFound(id)) => {
                self.status = format!("request {id} not found (already resolved)");
                self.reload_requests();
                return;
            }
            Err(e) => {
                self.status = format!("queue error: {e}");
                return;
            }
        };

        let approver = self.env.user.clone();
        match self
            .deps
            .gateway
            .invoke(&claimed.agent, true, Some(&claimed.user), Some(&approver))
            .await
        {
            Ok(invocation) => {
                let mut text = invocation.output;
                if let Some(error) = &invocation.error {
                    text.push_str(&format!("\n[{error}]"));
                }
                self.show_preview(text);
                self.status = format!(
                    "approved {}: exit {}",
                    claimed.id, invocation.exit_code
                );
            }
            Err(e) => self.status = format!("gateway error: {e}"),
        }
        self.reload_requests();
        self.reload_audit();
    }

    fn deny_selected(&mut self) {
        if !self.env.is_admin {
            self.status = "not permitted: deny requires admin".to_string();
            return;
        }
        let Some(request) = self.requests.get(self.request_sel).cloned() else {
            self.status = "no request selected".to_string();
            return;
        };

        // Resolve first so a racing deny of an already-handled request
        // never writes a spurious "denied" line.
        let claimed = match self.deps.queue.resolve(&request.id) {
            Ok(claimed) => claimed,
            Err(QueueError::NotFound(id)) => {
                self.status = format!("request {id} not found (already resolved)");
                self.reload_requests();
                return;
            }
            Err(e) => {
                self.status = format!("queue error: {e}");
                return;
            }
        };

        let entry = AuditEntry::new(&claimed.agent, false, 0)
            .with_error("denied")
            .with_requester(&claimed.user)
            .with_approver(&self.env.user);
        match self.deps.audit.append(&entry) {
            Ok(()) => self.status = format!("denied {}", claimed.id),
            Err(e) => self.status = format!("audit error: {e}"),
        }
        self.reload_requests();
        self.reload_audit();
    }

    fn reload_requests(&mut self) {
        self.requests = self.deps.queue.list();
        if self.request_sel >= self.requests.len() {
            self.request_sel = self.requests.len().saturating_sub(1);
        }
    }

    // ----- Audit ---------------------------------------------------------

    fn handle_audit_key(&mut self, key: KeyEvent) -> Control {
        if key == KeyEvent::Char('r') {
            self.reload_audit();
            self.status = format!("{} audit entries loaded", self.audit_entries.len());
        }
        Control::Continue
    }

    fn reload_audit(&mut self) {
        self.audit_entries = self.deps.audit.tail(AUDIT_VIEW_LIMIT);
    }

    // ----- Preview / Image -----------------------------------------------

    fn handle_preview_key(&mut self, key: KeyEvent) -> Control {
        match key {
            KeyEvent::Up | KeyEvent::Char('k') => {
                self.preview_scroll = self.preview_scroll.saturating_sub(1);
            }
            KeyEvent::Down | KeyEvent::Char('j') => {
                let lines = self.preview.lines().count();
                if self.preview_scroll + 1 < lines {
                    self.preview_scroll += 1;
                }
            }
            _ => {}
        }
        Control::Continue
    }

    fn handle_image_key(&mut self, key: KeyEvent) -> Control {
        if key == KeyEvent::Enter {
            let Some((path, is_dir)) = self.selected_file() else {
                self.status = "select a file in the Files view first".to_string();
                return Control::Continue;
            };
            if is_dir {
                self.status = "selection is a directory".to_string();
                return Control::Continue;
            }
            let viewer = self.deps.image_viewer.clone();
            self.spawn_detached(&viewer, &path.to_string_lossy());
            self.status = format!("delegated {} to {viewer}", path.display());
        }
        Control::Continue
    }

    // ----- Text views: Editor, Shell, YouTube -----------------------------

    async fn handle_text_view_key(&mut self, key: KeyEvent) -> Control {
        match self.view {
            View::Editor => self.handle_editor_key(key),
            View::Shell => self.handle_shell_key(key).await,
            View::YouTube => self.handle_youtube_key(key),
            _ => {}
        }
        Control::Continue
    }

    fn handle_editor_key(&mut self, key: KeyEvent) {
        match key {
            KeyEvent::CtrlS => match &self.editor_target {
                Some(path) => match std::fs::write(path, &self.editor_buffer) {
                    Ok(()) => self.status = format!("saved {}", path.display()),
                    Err(e) => self.status = format!("save failed: {e}"),
                },
                None => self.status = "no target path set".to_string(),
            },
            // Buffer stays in memory, nothing is persisted.
            KeyEvent::CtrlX => {
                self.view = View::Files;
                self.status = "editor closed".to_string();
            }
            KeyEvent::Enter => self.editor_buffer.push('\n'),
            KeyEvent::Backspace => {
                self.editor_buffer.pop();
            }
            KeyEvent::Char(c) => self.editor_buffer.push(c),
            _ => {}
        }
    }

    async fn handle_shell_key(&mut self, key: KeyEvent) {
        match key {
            KeyEvent::Enter => {
                let line = std::mem::take(&mut self.shell_input);
                if line.trim().is_empty() {
                    return;
                }
                let invocation = run_shell(
                    &line,
                    Some(self.env.plugin_env_path.as_path()),
                    &self.env.process_env(),
                    self.deps.shell_timeout,
                )
                .await;
                let mut text = invocation.output;
                if let Some(error) = &invocation.error {
                    text.push_str(&format!("\n[{error}]"));
                }
                self.show_preview(text);
                self.status = format!("$ {line} -> exit {}", invocation.exit_code);
            }
            KeyEvent::Backspace => {
                self.shell_input.pop();
            }
            KeyEvent::Char(c) => self.shell_input.push(c),
            _ => {}
        }
    }

    fn handle_youtube_key(&mut self, key: KeyEvent) {
        match key {
            KeyEvent::Enter => {
                let url = std::mem::take(&mut self.youtube_input);
                if url.trim().is_empty() {
                    self.status = "type a URL first".to_string();
                    return;
                }
                let player = self.deps.video_player.clone();
                self.spawn_detached(&player, url.trim());
                self.status = format!("delegated playback to {player}");
            }
            KeyEvent::Backspace => {
                self.youtube_input.pop();
            }
            KeyEvent::Char(c) => self.youtube_input.push(c),
            _ => {}
        }
    }

    // ----- Shared helpers --------------------------------------------------

    fn show_preview(&mut self, content: String) {
        self.preview = content;
        self.preview_scroll = 0;
        self.view = View::Preview;
    }

    fn spawn_detached(&mut self, program: &str, arg: &str) {
        let result = tokio::process::Command::new(program)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = result {
            self.status = format!("cannot start {program}: {e}");
        }
    }
}

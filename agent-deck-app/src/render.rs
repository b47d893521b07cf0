use crate::dashboard::{Dashboard, Layout, View};

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const ACCENT: &str = "\x1b[38;5;39m";

fn paint(text: &str, style: &str) -> String {
    if std::env::var_os("NO_COLOR").is_none() {
        format!("{style}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Renders one full frame for the session's terminal. Body lines carry no
/// ANSI styling, so plain character counts are enough for padding.
pub fn render(dashboard: &Dashboard) -> String {
    let (width, height) = terminal_size();
    let width = width.max(80);
    let body_lines = height.saturating_sub(8).max(10);

    let mut frame = String::from("\x1b[2J\x1b[H");
    frame.push_str(&border_top(width, " AGENT DECK "));
    frame.push('\n');
    frame.push_str(&row(width, &identity_line(dashboard)));
    frame.push('\n');
    frame.push_str(&row(width, &tabs_line(dashboard, width)));
    frame.push('\n');
    frame.push_str(&divider(width, &format!(" {} ", dashboard.view.title())));
    frame.push('\n');

    for line in body(dashboard, width, body_lines) {
        frame.push_str(&row(width, &line));
        frame.push('\n');
    }

    frame.push_str(&divider(width, ""));
    frame.push('\n');
    frame.push_str(&row(width, &format!(" {}", dashboard.status)));
    frame.push('\n');
    // Pad before painting so escape codes stay out of the width math.
    frame.push_str(&format!(
        "|{}|",
        paint(
            &pad_plain(help_line(dashboard.view), width.saturating_sub(2)),
            DIM
        )
    ));
    frame.push('\n');
    frame.push_str(&border_bottom(width));
    frame.push('\n');
    frame
}

fn identity_line(dashboard: &Dashboard) -> String {
    format!(
        " user {}  admin {}  layout {}  allowed [{}]",
        dashboard.env.user,
        if dashboard.env.is_admin { "yes" } else { "no" },
        dashboard.layout.title(),
        dashboard
            .env
            .allowed_exec
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    )
}

fn tabs_line(dashboard: &Dashboard, width: usize) -> String {
    let mut line = String::from(" ");
    for (i, view) in View::ALL.iter().enumerate() {
        let digit = if i == 9 { 0 } else { i + 1 };
        let tab = if *view == dashboard.view {
            format!("[{digit}:{}] ", view.title())
        } else {
            format!(" {digit}:{} ", view.title())
        };
        line.push_str(&tab);
    }
    truncate(&line, width.saturating_sub(2))
}

fn body(dashboard: &Dashboard, width: usize, max_lines: usize) -> Vec<String> {
    let inner = width.saturating_sub(2);
    match dashboard.layout {
        Layout::Single => {
            pad_lines(view_lines(dashboard, dashboard.view, inner), max_lines)
        }
        Layout::VerticalSplit => {
            let left_w = inner / 2;
            let right_w = inner.saturating_sub(left_w + 1);
            let left = pad_lines(view_lines(dashboard, dashboard.view, left_w), max_lines);
            let right = pad_lines(view_lines(dashboard, View::Preview, right_w), max_lines);
            left.into_iter()
                .zip(right)
                .map(|(l, r)| format!("{}|{}", pad_plain(&l, left_w), r))
                .collect()
        }
        Layout::HorizontalSplit => {
            let top_lines = max_lines / 2;
            let bottom_lines = max_lines.saturating_sub(top_lines + 1);
            let mut out = pad_lines(view_lines(dashboard, dashboard.view, inner), top_lines);
            out.push("-".repeat(inner));
            out.extend(pad_lines(
                view_lines(dashboard, View::Preview, inner),
                bottom_lines,
            ));
            out
        }
    }
}

fn view_lines(dashboard: &Dashboard, view: View, width: usize) -> Vec<String> {
    match view {
        View::Files => {
            let mut out = vec![format!(" {}", dashboard.files_dir.display())];
            if dashboard.files.is_empty() {
                out.push("  (empty)".to_string());
            }
            for (i, file) in dashboard.files.iter().enumerate() {
                let marker = if i == dashboard.file_sel { ">" } else { " " };
                let kind = if file.is_dir { "/" } else { "" };
                out.push(format!(" {marker} {}{kind}", file.name));
            }
            out
        }
        View::Agents => {
            let mut out = Vec::new();
            if dashboard.agents.is_empty() {
                out.push(" no agents found".to_string());
            }
            for (i, agent) in dashboard.agents.iter().enumerate() {
                let marker = if i == dashboard.agent_sel { ">" } else { " " };
                let permitted = if dashboard.env.can_exec(&agent.name) {
                    "exec"
                } else {
                    "view"
                };
                out.push(format!(" {marker} {:<24} [{permitted}]", agent.name));
            }
            out
        }
        View::Requests => {
            let mut out = Vec::new();
            if dashboard.requests.is_empty() {
                out.push(" no pending requests".to_string());
            }
            for (i, request) in dashboard.requests.iter().enumerate() {
                let marker = if i == dashboard.request_sel { ">" } else { " " };
                out.push(format!(
                    " {marker} {}  {}  by {}  {}",
                    request.id,
                    request.agent,
                    request.user,
                    request.notes.as_deref().unwrap_or("")
                ));
            }
            out
        }
        View::Audit => {
            let mut out = Vec::new();
            if dashboard.audit_entries.is_empty() {
                out.push(" audit log is empty".to_string());
            }
            for entry in dashboard.audit_entries.iter().rev() {
                out.push(format!(
                    " {}  {:<18} {}  exit {}  {}",
                    entry.time,
                    entry.agent,
                    if entry.exec { "exec" } else { "dry " },
                    entry.exit_code,
                    entry.error.as_deref().unwrap_or("")
                ));
            }
            out
        }
        View::Plugins => {
            let path = &dashboard.env.plugin_env_path;
            let mut out = vec![format!(" plugin env: {}", path.display())];
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    out.push(" (sourced before shell and runner invocations)".to_string());
                    out.push(String::new());
                    out.extend(content.lines().map(|l| format!("  {l}")));
                }
                Err(_) => out.push(" (not present; invocations proceed without it)".to_string()),
            }
            out
        }
        View::Preview => dashboard
            .preview
            .lines()
            .skip(dashboard.preview_scroll)
            .map(|l| format!(" {l}"))
            .collect(),
        View::Editor => {
            let target = dashboard
                .editor_target
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(no target)".to_string());
            let mut out = vec![format!(" editing {target}")];
            out.extend(dashboard.editor_buffer.lines().map(|l| format!(" {l}")));
            out
        }
        View::Shell => vec![
            format!(" $ {}_", dashboard.shell_input),
            String::new(),
            " output appears in Preview".to_string(),
        ],
        View::Image => vec![
            " image preview is delegated to an external viewer".to_string(),
            " select a file in Files, then Enter here".to_string(),
        ],
        View::YouTube => vec![
            format!(" url: {}_", dashboard.youtube_input),
            String::new(),
            " playback is delegated to an external player".to_string(),
        ],
    }
    .into_iter()
    .map(|l| truncate(&l, width))
    .collect()
}

fn help_line(view: View) -> &'static str {
    match view {
        View::Files => " tab views  1-0 jump  w layout  j/k move  enter open  e ext-edit  i edit  p print  bksp up  q quit",
        View::Agents => " tab views  j/k move  enter describe  d dry-run  x exec  r request  q quit",
        View::Requests => " tab views  j/k move  r refresh  a approve  d deny  q quit",
        View::Audit => " tab views  r refresh  q quit",
        View::Preview => " tab views  j/k scroll  q quit",
        View::Editor => " ^S save  ^X exit  (text goes to buffer)",
        View::Shell => " type command, enter runs it  tab leaves view",
        View::YouTube => " type url, enter delegates to player  tab leaves view",
        _ => " tab views  1-0 jump  w layout  q quit",
    }
}

fn pad_lines(mut lines: Vec<String>, count: usize) -> Vec<String> {
    lines.truncate(count);
    while lines.len() < count {
        lines.push(String::new());
    }
    lines
}

fn terminal_size() -> (usize, usize) {
    let width = std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(100);
    let height = std::env::var("LINES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(30);
    (width, height)
}

fn border_top(width: usize, title: &str) -> String {
    let inner = width.saturating_sub(2);
    let label = truncate(title, inner);
    let left = inner.saturating_sub(label.len()) / 2;
    let right = inner.saturating_sub(label.len() + left);
    format!(
        "+{}{}{}+",
        "=".repeat(left),
        paint(&label, ACCENT),
        "=".repeat(right)
    )
}

fn border_bottom(width: usize) -> String {
    format!("+{}+", "=".repeat(width.saturating_sub(2)))
}

fn divider(width: usize, label: &str) -> String {
    let inner = width.saturating_sub(2);
    let label = truncate(label, inner);
    let right = inner.saturating_sub(label.len() + 2);
    format!("+--{}{}+", paint(&label, ACCENT), "-".repeat(right))
}

fn row(width: usize, text: &str) -> String {
    format!("|{}|", pad_plain(text, width.saturating_sub(2)))
}

fn pad_plain(value: &str, width: usize) -> String {
    let mut out = truncate(value, width);
    let len = out.chars().count();
    if len < width {
        out.push_str(&" ".repeat(width - len));
    }
    out
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    // No room for an ellipsis below three columns; hard-cut instead.
    if max < 3 {
        return value.chars().take(max).collect();
    }
    let mut out: String = value.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_and_long() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdefgh", 5), "ab...");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn test_truncate_never_exceeds_width() {
        assert_eq!(truncate("abcdefgh", 3), "...");
        assert_eq!(truncate("abcdefgh", 2), "ab");
        assert_eq!(truncate("abcdefgh", 1), "a");
        for max in 0..10 {
            assert!(truncate("abcdefghij", max).chars().count() <= max);
        }
    }

    #[test]
    fn test_pad_plain_fills_width() {
        let padded = pad_plain("hi", 6);
        assert_eq!(padded.chars().count(), 6);
        assert!(padded.starts_with("hi"));
    }

    #[test]
    fn test_borders_match_width() {
        std::env::set_var("NO_COLOR", "1");
        assert_eq!(border_top(40, " X ").chars().count(), 40);
        assert_eq!(border_bottom(40).chars().count(), 40);
        assert_eq!(divider(40, " Y ").chars().count(), 40);
    }
}

//! CLI presentation: text and json formatters for status, limits, sessions and runs.

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

use crate::error::GenError;
use crate::ledger::LedgerSummary;
use crate::limiter::CredentialSnapshot;
use crate::orchestrator::{RunOutcome, RunReport};
use crate::session::SessionState;

/// Everything `status` reports.
pub struct StatusView {
    pub summary: LedgerSummary,
    pub session: Option<SessionState>,
    pub credentials: Vec<CredentialSnapshot>,
}

fn heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

/// Spend against a cap, colored by how close it is.
fn spend_cell(spent: f64, cap: f64) -> String {
    let text = format!("${:.2} / ${:.2}", spent, cap);
    if cap <= 0.0 {
        return text;
    }
    let ratio = spent / cap;
    if ratio >= 1.0 {
        format!("{}", text.red())
    } else if ratio >= 0.8 {
        format!("{}", text.yellow())
    } else {
        format!("{}", text.green())
    }
}

fn to_json(value: &serde_json::Value) -> Result<String, GenError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| GenError::InputError(format!("Failed to render JSON: {}", e)))
}

pub fn format_limits_text(summary: &LedgerSummary) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Period", "Spent / Cap", "Primary", "Fallback"]);
    table.add_row(vec![
        format!("day {}", summary.daily.period),
        spend_cell(summary.daily.total_cost, summary.limits.daily_cost_cap),
        summary.daily.primary_count.to_string(),
        summary.daily.fallback_count.to_string(),
    ]);
    table.add_row(vec![
        format!("month {}", summary.monthly.period),
        spend_cell(summary.monthly.total_cost, summary.limits.monthly_cost_cap),
        summary.monthly.primary_count.to_string(),
        summary.monthly.fallback_count.to_string(),
    ]);
    let mut out = format!("{}\n{}", heading("Cost"), table);
    if let Some(cap) = summary.limits.session_cost_cap_default {
        out.push_str(&format!("\nDefault session cap: ${:.2}", cap));
    }
    out
}

pub fn format_status_text(view: &StatusView) -> String {
    let mut sections = vec![format_limits_text(&view.summary)];

    let session = match &view.session {
        Some(s) => format!(
            "{}\n  {} (created {})\n  done {}, failed {}, pending {}\n  session cost ${:.2}, {} pricing",
            heading("Active session"),
            s.session_id,
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            s.done_count(),
            s.failed_count(),
            s.pending_count(),
            s.progress.session_cost,
            if s.settings.batch { "batch" } else { "sequential" },
        ),
        None => format!("{}\n  none", heading("Active session")),
    };
    sections.push(session);

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Credential", "Primary", "Fallback", "Cap", "Cool-down"]);
    for c in &view.credentials {
        let cooldown = if c.cooldown_remaining_secs > 0 {
            format!("{}", format!("{}s", c.cooldown_remaining_secs).yellow())
        } else {
            "-".to_string()
        };
        table.add_row(vec![
            c.id.clone(),
            c.primary_calls.to_string(),
            c.fallback_calls.to_string(),
            c.daily_cap.to_string(),
            cooldown,
        ]);
    }
    let credentials = if view.credentials.is_empty() {
        "  none configured".to_string()
    } else {
        table.to_string()
    };
    sections.push(format!("{}\n{}", heading("Credentials today"), credentials));

    sections.join("\n\n")
}

pub fn format_status_json(view: &StatusView) -> Result<String, GenError> {
    let session = view.session.as_ref().map(|s| {
        json!({
            "session_id": s.session_id,
            "created_at": s.created_at.to_rfc3339(),
            "batch": s.settings.batch,
            "target_count": s.settings.target_count,
            "done": s.done_count(),
            "failed": s.failed_count(),
            "pending": s.pending_count(),
            "progress": s.progress,
        })
    });
    to_json(&json!({
        "cost": view.summary,
        "session": session,
        "credentials": view.credentials,
    }))
}

pub fn format_session_list_text(archives: &[SessionState]) -> String {
    if archives.is_empty() {
        return "No archived sessions.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Session", "Created", "Done", "Failed", "Cost", "Reason"]);
    for s in archives {
        table.add_row(vec![
            s.session_id.clone(),
            s.created_at.format("%Y-%m-%d %H:%M").to_string(),
            s.progress.generated.to_string(),
            s.progress.failed.to_string(),
            format!("${:.2}", s.progress.session_cost),
            s.stop_reason.clone().unwrap_or_default(),
        ]);
    }
    table.to_string()
}

pub fn format_session_list_json(archives: &[SessionState]) -> Result<String, GenError> {
    let rows: Vec<_> = archives
        .iter()
        .map(|s| {
            json!({
                "session_id": s.session_id,
                "created_at": s.created_at.to_rfc3339(),
                "stop_reason": s.stop_reason,
                "progress": s.progress,
                "total_calls": s.total_calls,
            })
        })
        .collect();
    to_json(&json!(rows))
}

pub fn format_run_report(report: &RunReport) -> String {
    let outcome = match &report.outcome {
        RunOutcome::Halted(reason) => format!("ended: {}", reason),
        RunOutcome::Interrupted => "interrupted; resume with `genloop run --resume`".to_string(),
    };
    format!(
        "Session {} {}\n  generated {}, failed {} (primary {}, fallback {})\n  cost ${:.2}, {} calls for {} attempts",
        report.session_id,
        outcome,
        report.progress.generated,
        report.progress.failed,
        report.progress.primary_count,
        report.progress.fallback_count,
        report.progress.session_cost,
        report.calls,
        report.attempts,
    )
}

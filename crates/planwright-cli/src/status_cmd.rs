//! `planwright status` command: show one session or list them all.

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use planwright_core::Orchestrator;
use planwright_core::checkpoint::SessionSummary;
use planwright_core::rounds::{TOTAL_ROUNDS, percent_complete, round_spec};

/// Run the status command.
///
/// When `session_id_str` is `Some`, shows detailed status for that session.
/// When `None`, lists sessions (optionally for one user).
pub async fn run_status(
    orchestrator: &Orchestrator,
    session_id_str: Option<&str>,
    user_id: Option<&str>,
) -> Result<()> {
    match session_id_str {
        Some(id_str) => run_session_status(orchestrator, id_str).await,
        None => run_session_list(orchestrator, user_id).await,
    }
}

async fn run_session_status(orchestrator: &Orchestrator, session_id_str: &str) -> Result<()> {
    let session_id = Uuid::parse_str(session_id_str)
        .with_context(|| format!("invalid session ID: {session_id_str}"))?;
    let summary = orchestrator.session_status(session_id).await?;

    println!("Session: {}", summary.session_id);
    println!("User: {}", summary.user_id);
    if let Some(correlation_id) = &summary.correlation_id {
        println!("Correlation ID: {correlation_id}");
    }
    println!("Status: {}", summary.status);
    println!(
        "Progress: round {}/{TOTAL_ROUNDS} ({}%)",
        summary.round_index,
        percent_complete(summary.round_index)
    );
    if let Some(spec) = round_spec(summary.round_index) {
        let phase = summary
            .phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "not started".to_string());
        println!("  {} ({phase})", spec.name);
    }
    if let Some(reason) = &summary.failure_reason {
        println!("Failure: {reason}");
    }
    println!(
        "Updated: {}",
        summary.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}

async fn run_session_list(orchestrator: &Orchestrator, user_id: Option<&str>) -> Result<()> {
    let sessions = orchestrator.list_sessions(user_id).await?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<11} {:>8} {:>10}",
        "ID", "USER", "STATUS", "ROUND", "UPDATED"
    );
    println!("{}", "-".repeat(91));

    for session in &sessions {
        println!(
            "{:<38} {:<20} {:<11} {:>8} {:>10}",
            session.session_id,
            truncate(&session.user_id, 20),
            session.status.to_string(),
            format!("{}/{TOTAL_ROUNDS}", session.round_index),
            age(session)
        );
    }

    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width - 3).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn age(session: &SessionSummary) -> String {
    let elapsed = Utc::now().signed_duration_since(session.updated_at);
    if elapsed.num_days() > 0 {
        format!("{}d ago", elapsed.num_days())
    } else if elapsed.num_hours() > 0 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}m ago", elapsed.num_minutes().max(0))
    }
}

//! `planwright generate` and `planwright resume`: run a session to
//! completion and report the program.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_stream::StreamExt;
use uuid::Uuid;

use planwright_core::finance::BudgetPosition;
use planwright_core::model::load_context_file;
use planwright_core::progress::{DEFAULT_CAPACITY, ProgressEvent, ProgressSink};
use planwright_core::{GenerateRequest, GenerationError, GenerationOutcome, Orchestrator};

/// Options for a `generate` run.
pub struct GenerateOptions<'a> {
    pub context_path: &'a Path,
    pub user_id: &'a str,
    pub correlation_id: Option<String>,
    pub output: Option<&'a Path>,
    pub json: bool,
}

/// Run the generate command.
///
/// Status lines go to stderr; stdout carries only the summary or, with
/// `--json`, the program.
///
/// When a correlation id is given and a session submitted under it is
/// still unfinished, that session is continued instead of starting anew.
pub async fn run_generate(orchestrator: Arc<Orchestrator>, opts: GenerateOptions<'_>) -> Result<()> {
    let file = load_context_file(opts.context_path)?;

    if let Some(correlation_id) = opts.correlation_id.as_deref() {
        if let Some(active) = orchestrator.find_active_session(correlation_id).await? {
            eprintln!(
                "Continuing session {} for correlation id {correlation_id} (round {}, {})",
                active.session_id, active.round_index, active.status
            );
            return drive(orchestrator, active.session_id, opts.output, opts.json).await;
        }
    }

    let mut request = GenerateRequest::new(opts.user_id, file.context).with_insights(file.insights);
    if let Some(correlation_id) = opts.correlation_id {
        request = request.with_correlation_id(correlation_id);
    }
    let session_id = orchestrator.create_session(&request).await?;

    eprintln!("Generating program for {} ({session_id})", request.context.name);
    drive(orchestrator, session_id, opts.output, opts.json).await
}

/// Run the resume command.
pub async fn run_resume(
    orchestrator: Arc<Orchestrator>,
    session_id_str: &str,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let session_id = Uuid::parse_str(session_id_str)
        .with_context(|| format!("invalid session ID: {session_id_str}"))?;
    eprintln!("Resuming session {session_id}");
    drive(orchestrator, session_id, output, json).await
}

async fn drive(
    orchestrator: Arc<Orchestrator>,
    session_id: Uuid,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let (sink, mut events) = ProgressSink::channel(DEFAULT_CAPACITY);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            eprintln!("{}", format_event(&event));
        }
    });

    // First signal cancels the session, second force-exits.
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let signals = {
        let orchestrator = Arc::clone(&orchestrator);
        let got_first = Arc::clone(&got_first_signal);
        tokio::spawn(async move {
            loop {
                tokio::signal::ctrl_c().await.ok();
                if got_first.swap(true, Ordering::SeqCst) {
                    eprintln!("\nForce exit.");
                    std::process::exit(130);
                }
                eprintln!("\nStopping after the agents in flight (Ctrl+C again to force)...");
                orchestrator.cancel(session_id);
            }
        })
    };

    let result = orchestrator.resume_session(session_id, Some(sink)).await;
    signals.abort();
    printer.await.ok();

    match result {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.program)?);
            } else {
                print_summary(&outcome);
            }
            if let Some(path) = output {
                write_program(path, &outcome)?;
                eprintln!("Program written to {}", path.display());
            }
            Ok(())
        }
        Err(GenerationError::Cancelled(id)) => {
            eprintln!("\nSession interrupted. Completed phases are checkpointed.");
            eprintln!("Re-run `planwright resume {id}` to continue.");
            std::process::exit(130);
        }
        Err(err @ GenerationError::SessionFailed { .. }) => {
            Err(anyhow::Error::new(err).context("program generation failed"))
        }
        Err(err) => Err(err.into()),
    }
}

fn format_event(event: &ProgressEvent) -> String {
    let agent = event
        .current_agent
        .as_deref()
        .map(|a| format!(" [{a}]"))
        .unwrap_or_default();
    format!(
        "[{:>3}%] round {}/{} {:?}{agent}: {}",
        event.percent_complete, event.round, event.total_rounds, event.kind, event.message
    )
}

fn print_summary(outcome: &GenerationOutcome) {
    let program = &outcome.program;
    let timeline = &program.timeline;

    println!();
    println!("Program for session {}", outcome.session_id);
    println!("  Workstreams: {}", program.workstreams.len());
    for ws in &program.workstreams {
        println!(
            "    {:<28} months {:>2}-{:<2} owner {}",
            ws.id, ws.start_month, ws.end_month, ws.owner
        );
    }
    println!(
        "  Timeline: {} months (work ends after month {})",
        timeline.total_months, timeline.effective_duration
    );
    if timeline.timeline_violation {
        println!("    WARNING: work exceeds the declared timeline");
    }
    println!("  Critical path: {}", timeline.critical_path.join(" -> "));

    let plan = &program.financial_plan;
    print!("  Budget: {:.0}", plan.total_budget);
    match plan.position() {
        Some(BudgetPosition::Headroom(h)) => {
            println!(" ({:.0} available, {:.1}%)", h.available, h.available_percentage)
        }
        Some(BudgetPosition::Violation(v)) => println!(
            " (exceeds the ceiling by {:.0}, {:.1}%)",
            v.exceeds_by, v.exceeds_percentage
        ),
        None => println!(),
    }
    println!(
        "  Risks: {}  Decisions: {}  Annotations: {}",
        program.risk_register.risks.len(),
        program.governance.decisions.len(),
        program.annotations.len()
    );
    println!("  Confidence: {:.2}", program.overall_confidence);

    let stats = &outcome.knowledge.stats;
    println!(
        "  Knowledge: {} emitted, {} contested, {} rejected",
        stats.emitted, stats.contested, stats.rejected
    );
}

fn write_program(path: &Path, outcome: &GenerationOutcome) -> Result<()> {
    let contents =
        serde_json::to_string_pretty(&outcome.program).context("failed to serialize program")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write program to {}", path.display()))
}

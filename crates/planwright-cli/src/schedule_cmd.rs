//! `planwright schedule` command: run the critical-path scheduler over a
//! workstream file without generating a program.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use planwright_core::conflict::check_dependency_graph;
use planwright_core::model::{
    BusinessContext, Constraints, Scale, ScheduleShift, Timeline, TimelineRange, UpstreamInsights,
    Workstream,
};
use planwright_core::schedule::{align_to_dependencies, schedule};

/// Workstreams to schedule, as JSON or TOML.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFile {
    pub workstreams: Vec<Workstream>,
    #[serde(default)]
    pub insights: UpstreamInsights,
}

pub fn load_schedule_file(path: &Path) -> Result<ScheduleFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workstream file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).with_context(|| format!("failed to parse TOML {}", path.display()))
    } else {
        serde_json::from_str(&raw).with_context(|| format!("failed to parse JSON {}", path.display()))
    }
}

/// Validate and align the workstreams, then schedule them.
pub fn build_timeline(
    file: ScheduleFile,
    range: Option<TimelineRange>,
) -> Result<(Timeline, Vec<ScheduleShift>)> {
    let context = BusinessContext {
        name: "standalone schedule".into(),
        business_type: "schedule".into(),
        scale: Scale::Smb,
        description: "workstreams supplied on the command line".into(),
        industry: None,
        keywords: vec![],
        constraints: range.map(|r| Constraints {
            timeline_range: Some(r),
            ..Default::default()
        }),
    };
    context.validate()?;

    let mut workstreams = file.workstreams;
    check_dependency_graph(&workstreams, true)?;
    let shifts = align_to_dependencies(&mut workstreams);
    Ok((schedule(&file.insights, &workstreams, &context), shifts))
}

/// Run the schedule command.
pub fn run_schedule(path: &Path, range: Option<TimelineRange>, json: bool) -> Result<()> {
    let file = load_schedule_file(path)?;
    let (timeline, shifts) = build_timeline(file, range)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&timeline)?);
        return Ok(());
    }

    for shift in &shifts {
        println!(
            "Shifted {} from month {} to {} to follow its dependencies",
            shift.workstream_id, shift.from_start, shift.to_start
        );
    }
    println!(
        "Total: {} months (work ends after month {})",
        timeline.total_months, timeline.effective_duration
    );
    if timeline.timeline_violation {
        println!("WARNING: work exceeds the declared timeline");
    }
    println!("Critical path: {}", timeline.critical_path.join(" -> "));
    println!("Phases:");
    for phase in &timeline.phases {
        println!(
            "  {:<20} months {:>2}-{:<2} {}",
            phase.name,
            phase.start_month,
            phase.end_month,
            phase.workstream_ids.join(", ")
        );
    }
    println!("Milestones:");
    for milestone in &timeline.milestones {
        println!("  month {:>2}: {}", milestone.due_month, milestone.name);
    }
    Ok(())
}

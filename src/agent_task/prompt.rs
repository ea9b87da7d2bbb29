//! Prompt construction for each `AgentTask` variant (spec.md §4.6.1).
//!
//! Mirrors `orchestrator/runner.rs`'s `generate_prompt`: a template body
//! plus a fixed critical-rules block concatenated together. A variant's
//! template is read from `.fuel/templates/{variant}.md` if the operator
//! dropped one there, else a built-in default compiled into the binary.
//! This is deliberately a format-and-concatenate seam, not a templating
//! engine — richer template authoring is out of scope.

use crate::agent_task::Kind;
use crate::context::Context;
use crate::gates::{parse_quality_gates, render_quality_gates};
use fuel_common::{Epic, Task};

const WORK_DEFAULT: &str = include_str!("templates/work.md");
const REVIEW_DEFAULT: &str = include_str!("templates/review.md");
const MERGE_DEFAULT: &str = include_str!("templates/merge.md");
const REALITY_DEFAULT: &str = include_str!("templates/reality.md");
const SELF_GUIDED_DEFAULT: &str = include_str!("templates/self_guided.md");

fn variant_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Work => "work",
        Kind::Review { .. } => "review",
        Kind::MergeEpic { .. } => "merge",
        Kind::UpdateReality => "reality",
        Kind::SelfGuided => "self_guided",
    }
}

fn default_template(kind: Kind) -> &'static str {
    match kind {
        Kind::Work => WORK_DEFAULT,
        Kind::Review { .. } => REVIEW_DEFAULT,
        Kind::MergeEpic { .. } => MERGE_DEFAULT,
        Kind::UpdateReality => REALITY_DEFAULT,
        Kind::SelfGuided => SELF_GUIDED_DEFAULT,
    }
}

/// Loads the operator-overridable template for `kind`, falling back to
/// the compiled-in default when no file exists under `templates/`.
fn load_template(ctx: &Context, kind: Kind) -> String {
    let path = ctx.templates_dir.join(format!("{}.md", variant_name(kind)));
    std::fs::read_to_string(&path).unwrap_or_else(|_| default_template(kind).to_string())
}

/// Builds the prompt for a plain work task (spec.md §4.6 Work variant).
pub fn work(ctx: &Context, task: &Task) -> String {
    let template = load_template(ctx, Kind::Work);
    template
        .replace("{{task_id}}", &task.short_id)
        .replace("{{title}}", &task.title)
        .replace("{{description}}", &task.description)
}

/// Builds the review prompt. The review run is logged under the
/// namespaced id `review-{originalShortId}` per spec.md §4.6, built here
/// rather than persisted as a task id.
pub fn review(ctx: &Context, task: &Task, diff: &str) -> String {
    let template = load_template(ctx, Kind::Review { original_task_id: task.id });
    let namespaced_id = format!("review-{}", task.short_id);
    template
        .replace("{{review_id}}", &namespaced_id)
        .replace("{{task_id}}", &task.short_id)
        .replace("{{title}}", &task.title)
        .replace("{{diff}}", diff)
}

/// Builds the epic-merge prompt, embedding the Quality Gates table parsed
/// out of `reality.md` so the merging agent knows which checks to run
/// before merging a mirror back (spec.md §4.6 MergeEpic, §6).
pub fn merge_epic(ctx: &Context, epic: &Epic) -> String {
    let template = load_template(ctx, Kind::MergeEpic { epic_id: epic.id });
    let reality = std::fs::read_to_string(&ctx.reality_path).unwrap_or_default();
    let gates = render_quality_gates(&parse_quality_gates(&reality));
    template
        .replace("{{epic_id}}", &epic.short_id)
        .replace("{{title}}", &epic.title)
        .replace("{{branch}}", epic.mirror_branch.as_deref().unwrap_or(""))
        .replace("{{quality_gates}}", &gates)
}

/// Builds the reality-update prompt (spec.md §4.1 `reality.md`).
pub fn update_reality(ctx: &Context, existing_reality: &str) -> String {
    let template = load_template(ctx, Kind::UpdateReality);
    template.replace("{{reality}}", existing_reality)
}

/// Hard cap on self-guided iterations (spec.md §4.6 SelfGuided:
/// "`max_iterations` (= 50)").
pub const MAX_SELFGUIDED_ITERATIONS: u32 = 50;

/// Pulls the `## Progress Log` section out of a plan file's contents
/// (everything from that heading to the next `##` heading or EOF), so
/// the self-guided prompt can show only the log rather than the whole
/// plan twice.
fn extract_progress_log(plan_content: &str) -> String {
    let Some(start) = plan_content.find("## Progress Log") else { return String::new() };
    let after_heading = &plan_content[start + "## Progress Log".len()..];
    let end = after_heading.find("\n## ").unwrap_or(after_heading.len());
    after_heading[..end].trim().to_string()
}

/// Builds the self-guided iteration prompt (spec.md §4.6 SelfGuided:
/// "template with `iteration`, `max_iterations` (= 50), reality content,
/// plan content, and the `## Progress Log` section of the plan, plus
/// task/epic ids").
pub fn self_guided(ctx: &Context, epic: &Epic, task: &Task, reality_content: &str, plan_content: &str) -> String {
    let template = load_template(ctx, Kind::SelfGuided);
    let progress_log = extract_progress_log(plan_content);
    template
        .replace("{{epic_id}}", &epic.short_id)
        .replace("{{task_id}}", &task.short_id)
        .replace("{{title}}", &epic.title)
        .replace("{{iteration}}", &task.selfguided_iteration.to_string())
        .replace("{{max_iterations}}", &MAX_SELFGUIDED_ITERATIONS.to_string())
        .replace("{{stuck_count}}", &task.selfguided_stuck_count.to_string())
        .replace("{{reality}}", reality_content)
        .replace("{{plan}}", plan_content)
        .replace("{{progress_log}}", &progress_log)
}

use std::path::Path;

use super::{CheckResult, CheckStatus, EVIDENCE_MARKER, EvidenceReport};

const SCOPE_CHECKLIST: &[&str] = &[
    "Scope matches the story acceptance criteria",
    "No new dependencies without an approved ADR",
    "Security model changes reviewed (if applicable)",
    "Documentation updated alongside the change",
];

/// Render the review pack and the pull request comment for `report`.
///
/// Output depends on nothing but the report, so the same report always
/// produces byte-identical markdown.
pub fn render(report: &EvidenceReport) -> (String, String) {
    (review_pack(report), comment_body(report))
}

fn review_pack(report: &EvidenceReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Review Pack: {}: {}\n\n",
        report.identifier, report.title
    ));
    out.push_str(&format!("Generated: {}\n\n", timestamp(report)));

    out.push_str("## Links\n\n");
    out.push_str(&format!("- Story: `{}`\n", display_path(&report.story_path)));
    out.push_str(&format!("- Branch: `{}`\n\n", report.branch));

    out.push_str("## Scope (human-verified)\n\n");
    for item in SCOPE_CHECKLIST {
        out.push_str(&format!("- [ ] {item}\n"));
    }
    out.push('\n');

    out.push_str("## Evidence (autopilot)\n\n");
    out.push_str(&format!("Mode: {}\n", report.mode));
    out.push_str(&format!("Summary: {}\n", report.counts()));
    out.push_str(&format!("Digest: `{}`\n\n", report.digest()));
    write_checklist(&mut out, &report.results);
    out.push('\n');
    write_table(&mut out, &report.results);

    let with_detail: Vec<&CheckResult> =
        report.results.iter().filter(|r| r.detail.is_some()).collect();
    if !with_detail.is_empty() {
        out.push_str("\n### Output\n");
        for r in with_detail {
            out.push_str(&format!(
                "\n<details><summary>{} ({})</summary>\n\n",
                r.name, r.status
            ));
            out.push_str("```text\n");
            out.push_str(&format!("{}\n", r.detail.as_deref().unwrap_or_default()));
            out.push_str("```\n\n</details>\n");
        }
    }

    out.push_str("\n## Notes\n\n");
    out.push_str(
        "- Reviewer notes, risks and waivers go here (link ADRs or waivers where needed).\n",
    );
    out
}

fn comment_body(report: &EvidenceReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{EVIDENCE_MARKER}\n"));
    out.push_str(&format!(
        "## Evidence Pack: {}: {}\n\n",
        report.identifier, report.title
    ));
    out.push_str(&format!(
        "Generated {} | mode: {} | {}\n\n",
        timestamp(report),
        report.mode,
        report.counts()
    ));
    write_table(&mut out, &report.results);
    out.push_str(&format!(
        "\nReview pack: `{}`\n\n",
        display_path(&report.review_pack_path)
    ));
    out.push_str(
        "_Maintained by autopilot; this comment is updated in place on every evidence run._\n",
    );
    out
}

/// Body for a newly created pull request.
pub fn pull_request_body(
    story_path: &Path,
    review_pack_path: &Path,
    tracker_reference: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str("## Summary\n\n");
    out.push_str(&format!("- Story: `{}`\n", display_path(story_path)));
    out.push_str(&format!(
        "- Review pack: `{}`\n",
        display_path(review_pack_path)
    ));
    if let Some(reference) = tracker_reference {
        out.push_str(&format!("- Tracker: {reference}\n"));
    }
    out.push_str("\n## Autopilot checklist\n\n");
    out.push_str("- [ ] Acceptance criteria covered by tests\n");
    out.push_str("- [ ] Evidence pack attached (`autopilot evidence --run-local`)\n");
    out.push_str("- [ ] Review pack scope section completed\n");
    out
}

fn write_checklist(out: &mut String, results: &[CheckResult]) {
    if results.is_empty() {
        out.push_str("_No checks configured._\n");
        return;
    }
    for r in results {
        let mark = if r.status == CheckStatus::Pass { "x" } else { " " };
        out.push_str(&format!("- [{mark}] `{}`: {}\n", r.name, r.status));
    }
}

fn write_table(out: &mut String, results: &[CheckResult]) {
    out.push_str("| Check | Status | Summary |\n");
    out.push_str("|---|---|---|\n");
    for r in results {
        out.push_str(&format!(
            "| `{}` | {} {} | {} |\n",
            r.name,
            status_icon(r.status),
            r.status,
            escape_cell(&r.summary)
        ));
    }
}

fn status_icon(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "✅",
        CheckStatus::Fail => "❌",
        CheckStatus::Skipped => "⏭️",
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn timestamp(report: &EvidenceReport) -> String {
    report
        .generated_at
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Forward slashes regardless of platform so the markdown is stable.
fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

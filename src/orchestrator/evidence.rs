use super::{EvidenceOptions, Orchestrator, RunReport, StepStatus, remote_ids};
use crate::errors::AutopilotError;
use crate::evidence::{self, EVIDENCE_MARKER, EvidenceMode, EvidenceReport, checks};
use crate::provider::{self, ProviderMode, Selection};
use crate::state::{HexDigest, StateUpdate, Step};
use crate::tracker::BranchManager;

impl EvidenceOptions {
    /// `--full-verify` implies `--run-local`.
    pub fn mode(&self) -> EvidenceMode {
        if self.full_verify {
            EvidenceMode::Full
        } else if self.run_local {
            EvidenceMode::Fast
        } else {
            EvidenceMode::NotRequested
        }
    }
}

impl Orchestrator {
    /// `Resolve → LoadState → RunChecks → Render → UpsertComment →
    /// PersistState`.
    pub(super) async fn run_evidence(
        &self,
        identifier: &str,
        options: &EvidenceOptions,
        run: &mut RunReport,
    ) -> Result<(), AutopilotError> {
        let (descriptor, id) = self.resolve(identifier)?;
        run.record(
            Step::Resolve,
            StepStatus::Done,
            descriptor.source_path.display().to_string(),
        );

        let store = self.store();
        let recorded = store.load(&id)?;
        match &recorded {
            Some(_) => run.record(
                Step::LoadState,
                StepStatus::Done,
                self.relative(&store.path_for(&id)).display().to_string(),
            ),
            None => run.record(
                Step::LoadState,
                StepStatus::Skipped,
                "no state recorded; run `autopilot start` first".to_string(),
            ),
        }
        let branch = recorded
            .as_ref()
            .and_then(|s| s.branch.as_ref())
            .map(|b| b.to_string())
            .unwrap_or_else(|| descriptor.branch_name());
        run.branch = Some(branch.clone());

        let remote_url = BranchManager::open(&self.config.project_dir, self.config.remote())
            .ok()
            .and_then(|g| g.remote_url());
        let provider = provider::select_provider(
            &self.config,
            Selection {
                choice: options.provider,
                remote_url: remote_url.as_deref(),
                recorded: recorded.as_ref(),
                require_integration: options.require_integration,
                dry_run: options.dry_run,
            },
        )?;
        run.provider = Some(provider.kind());
        run.provider_mode = Some(provider.mode());
        let live = provider.mode() == ProviderMode::Live;

        let mode = options.mode();
        let results = if mode == EvidenceMode::NotRequested {
            checks::not_requested(&self.config.settings.checks)
        } else {
            let planned = checks::plan(&self.config.settings.checks, mode, &self.config.project_dir);
            checks::run(&planned).await
        };

        let pack_path = self.review_pack_path(&id);
        let pack_rel = self.relative(&pack_path);
        let report = EvidenceReport {
            identifier: descriptor.identifier.clone(),
            title: descriptor.title.clone(),
            story_path: descriptor.source_path.clone(),
            review_pack_path: pack_rel.clone(),
            branch: branch.clone(),
            mode,
            generated_at: self.clock.now(),
            results,
        };

        if mode == EvidenceMode::NotRequested {
            run.record(
                Step::RunChecks,
                StepStatus::Skipped,
                "local checks not requested (pass --run-local)".to_string(),
            );
        } else {
            let failures: Vec<AutopilotError> = report
                .failures()
                .map(|r| AutopilotError::CheckFailed {
                    name: r.name.clone(),
                    summary: r.summary.clone(),
                })
                .collect();
            for err in &failures {
                tracing::warn!(error = %err, "check failed");
            }
            let detail = match failures.as_slice() {
                [] => format!("{mode} checks"),
                [only] => format!("{mode} checks; {only}"),
                [first, rest @ ..] => format!("{mode} checks; {first} (+{} more)", rest.len()),
            };
            run.record(Step::RunChecks, StepStatus::Done, detail);
        }

        let counts = report.counts();
        let mut update = StateUpdate {
            evidence_digest: HexDigest::parse(&report.digest()).ok(),
            ..Default::default()
        };
        let (pack, comment) = evidence::render(&report);
        match self.write_artifact(&pack_path, &pack) {
            Ok(()) => {
                run.record(
                    Step::Render,
                    StepStatus::Done,
                    format!("{} ({counts})", pack_rel.display()),
                );
                run.artifacts.push(pack_rel);
            }
            Err(e) => run.record(
                Step::Render,
                StepStatus::Failed,
                format!("{}: {e}", pack_path.display()),
            ),
        }

        // IDs recorded against another provider are never reused.
        let known_pr = recorded
            .as_ref()
            .filter(|s| s.provider == Some(provider.kind()))
            .and_then(|s| s.pull_request_id.as_ref())
            .map(|p| p.to_string());

        let mut missing = None;
        let target = match known_pr {
            Some(pr) => Some(pr),
            None if !live => Some(String::new()),
            None => {
                let found = provider.find_pull_request(&branch).await;
                if let Some(pr) = found.resource_id().map(str::to_string) {
                    let (pull_request_id, pull_request_url) = remote_ids(&found);
                    update.pull_request_id = pull_request_id;
                    update.pull_request_url = pull_request_url;
                    Some(pr)
                } else if found.is_failed() {
                    run.record_provider(Step::UpsertComment, found);
                    None
                } else {
                    let err = AutopilotError::MissingPullRequest {
                        identifier: descriptor.identifier.clone(),
                    };
                    run.record(Step::UpsertComment, StepStatus::Failed, err.to_string());
                    missing = Some(err);
                    None
                }
            }
        };
        if let Some(pr) = target {
            let result = provider
                .upsert_evidence_comment(&pr, EVIDENCE_MARKER, &comment)
                .await;
            let (comment_id, _) = remote_ids(&result);
            update.evidence_comment_id = comment_id;
            run.record_provider(Step::UpsertComment, result);
        }

        if let Some(err) = missing {
            run.record(
                Step::PersistState,
                StepStatus::Skipped,
                "no pull request to record against".to_string(),
            );
            return Err(err);
        }
        // The record is created by `start`; evidence only updates it.
        if recorded.is_none() {
            run.record(
                Step::PersistState,
                StepStatus::Skipped,
                "no state record to update".to_string(),
            );
            return Ok(());
        }
        self.persist(&store, &id, update, run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_mode_from_flags() {
        let mut opts = EvidenceOptions::default();
        assert_eq!(opts.mode(), EvidenceMode::NotRequested);
        opts.run_local = true;
        assert_eq!(opts.mode(), EvidenceMode::Fast);
        opts.full_verify = true;
        assert_eq!(opts.mode(), EvidenceMode::Full);
        opts.run_local = false;
        assert_eq!(opts.mode(), EvidenceMode::Full);
    }
}

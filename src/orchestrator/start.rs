use std::fs;

use super::{Orchestrator, RunReport, StartOptions, StepStatus, remote_ids};
use crate::errors::{AutopilotError, GitError};
use crate::evidence::{self, EvidenceMode, EvidenceReport, checks, render};
use crate::provider::{self, FailureClass, Provider, ProviderMode, PullRequestSpec, Selection};
use crate::state::{AutopilotState, RefName, SafeId, StateStore, StateUpdate, Step};
use crate::tracker::{BranchManager, BranchOrigin};
use crate::workitem::WorkItemDescriptor;

impl Orchestrator {
    /// `Resolve → EnsureBranch → WriteReviewPack → Commit → Push →
    /// TrackerItem → PullRequest → Link → PersistState`.
    ///
    /// Returns `Err` only for errors that end the run; everything else is
    /// recorded against its step.
    pub(super) async fn run_start(
        &self,
        identifier: &str,
        options: &StartOptions,
        run: &mut RunReport,
    ) -> Result<(), AutopilotError> {
        let (descriptor, id) = self.resolve(identifier)?;
        run.record(
            Step::Resolve,
            StepStatus::Done,
            descriptor.source_path.display().to_string(),
        );

        let branch = descriptor.branch_name();
        run.branch = Some(branch.clone());
        let base = self.config.base_branch(options.base_branch.as_deref());
        let branch_ref = RefName::parse(&branch).map_err(|e| AutopilotError::Malformed {
            path: descriptor.source_path.clone(),
            reason: format!("title does not yield a valid branch name: {e}"),
        })?;
        let base_ref = RefName::parse(&base)
            .map_err(|e| AutopilotError::Config(format!("invalid base branch: {e}")))?;

        let store = self.store();
        let recorded = store.load(&id)?;
        let git = BranchManager::open(&self.config.project_dir, self.config.remote());
        let remote_url = git.as_ref().ok().and_then(BranchManager::remote_url);

        // Credentials are checked before any local side effect.
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

        if options.push
            && !options.dry_run
            && let Ok(git) = &git
        {
            self.refresh_remote_refs(git, &base, &branch).await;
        }
        let branch_ready = self.ensure_branch(&git, &base, &branch, options, run);

        let mut update = StateUpdate {
            branch: Some(branch_ref),
            base_branch: Some(base_ref),
            completed_steps: vec![Step::Resolve],
            ..Default::default()
        };
        if live {
            update.provider = Some(provider.kind());
            update.remote = provider.coordinates();
        }
        if branch_ready {
            update.completed_steps.push(Step::EnsureBranch);
        }
        self.checkpoint(&store, &id, update)?;
        let state_rel = self.relative(&store.path_for(&id));
        run.artifacts.push(state_rel.clone());

        let pack_path = self.review_pack_path(&id);
        let pack_rel = self.relative(&pack_path);
        let report = EvidenceReport {
            identifier: descriptor.identifier.clone(),
            title: descriptor.title.clone(),
            story_path: descriptor.source_path.clone(),
            review_pack_path: pack_rel.clone(),
            branch: branch.clone(),
            mode: EvidenceMode::NotRequested,
            generated_at: self.clock.now(),
            results: checks::not_requested(&self.config.settings.checks),
        };
        let (pack, _) = evidence::render(&report);
        match self.write_artifact(&pack_path, &pack) {
            Ok(()) => {
                run.record(
                    Step::WriteReviewPack,
                    StepStatus::Done,
                    pack_rel.display().to_string(),
                );
                run.artifacts.push(pack_rel.clone());
            }
            Err(e) => run.record(
                Step::WriteReviewPack,
                StepStatus::Failed,
                format!("{}: {e}", pack_path.display()),
            ),
        }

        let committed = if !options.commits() {
            run.record(
                Step::Commit,
                StepStatus::Skipped,
                "not requested (pass --commit or --push)".to_string(),
            );
            false
        } else if options.dry_run {
            run.record(
                Step::Commit,
                StepStatus::Skipped,
                "dry-run: would commit the review pack and state".to_string(),
            );
            false
        } else {
            match (&git, branch_ready) {
                (Ok(git), true) => {
                    let message = format!("{}: start autopilot", descriptor.identifier);
                    match git.commit_if_dirty(&message, &[pack_rel.clone(), state_rel.clone()]) {
                        Ok(Some(commit)) => {
                            run.record(Step::Commit, StepStatus::Done, commit.sha);
                            true
                        }
                        Ok(None) => {
                            run.record(
                                Step::Commit,
                                StepStatus::Reused,
                                "nothing new to commit".to_string(),
                            );
                            true
                        }
                        Err(e) => {
                            run.record(Step::Commit, StepStatus::Failed, e.to_string());
                            false
                        }
                    }
                }
                _ => {
                    run.record(
                        Step::Commit,
                        StepStatus::PreconditionFailed,
                        format!("branch {branch} is not checked out"),
                    );
                    false
                }
            }
        };

        let mut pushed = git.as_ref().is_ok_and(|g| g.is_pushed(&branch));
        if !options.push {
            let detail = if pushed {
                "not requested; branch already on the remote"
            } else {
                "not requested (pass --push)"
            };
            run.record(Step::Push, StepStatus::Skipped, detail.to_string());
        } else if options.dry_run {
            run.record(
                Step::Push,
                StepStatus::Skipped,
                format!("dry-run: would push {branch}"),
            );
        } else if let (Ok(git), true) = (&git, committed) {
            match git.push(&branch).await {
                Ok(()) => {
                    pushed = true;
                    run.record(Step::Push, StepStatus::Done, format!("{} {branch}", git.remote_name()));
                }
                Err(e) => run.record(Step::Push, StepStatus::Failed, e.to_string()),
            }
        } else {
            run.record(
                Step::Push,
                StepStatus::PreconditionFailed,
                "nothing committed on the feature branch".to_string(),
            );
        }

        self.remote_steps(
            provider.as_ref(),
            recorded.as_ref(),
            &descriptor,
            &id,
            &branch,
            &base,
            pushed,
            options,
            run,
        )
        .await?;

        self.persist(&store, &id, StateUpdate::default(), run)
    }

    /// Fetch the base and feature branches so a branch pushed from another
    /// clone is reused rather than recreated. Failures only cost freshness.
    async fn refresh_remote_refs(&self, git: &BranchManager, base: &str, branch: &str) {
        for name in [base, branch] {
            match tokio::time::timeout(self.config.http_timeout(), git.fetch(name)).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => tracing::debug!(branch = name, "not on the remote yet"),
                Ok(Err(e)) => tracing::warn!(branch = name, error = %e, "fetch failed"),
                Err(_) => tracing::warn!(branch = name, "fetch timed out"),
            }
        }
    }

    fn ensure_branch(
        &self,
        git: &Result<BranchManager, GitError>,
        base: &str,
        branch: &str,
        options: &StartOptions,
        run: &mut RunReport,
    ) -> bool {
        if options.dry_run {
            run.record(
                Step::EnsureBranch,
                StepStatus::Skipped,
                format!("dry-run: would check out {branch} from {base}"),
            );
            return false;
        }
        let git = match git {
            Ok(git) => git,
            Err(e) => {
                run.record(Step::EnsureBranch, StepStatus::Failed, e.to_string());
                return false;
            }
        };

        match git.dirty_paths(options.allow_untracked, &self.config.managed_dirs()) {
            Ok(dirty) if !dirty.is_empty() => {
                let shown: Vec<&str> = dirty.iter().take(5).map(String::as_str).collect();
                let err = AutopilotError::PreconditionFailed(format!(
                    "working tree has uncommitted changes ({}); commit or stash them first",
                    shown.join(", ")
                ));
                run.record(Step::EnsureBranch, StepStatus::PreconditionFailed, err.to_string());
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                run.record(Step::EnsureBranch, StepStatus::Failed, e.to_string());
                return false;
            }
        }

        match git.ensure_branch(base, branch) {
            Ok(r) => {
                let (status, how) = match r.origin {
                    BranchOrigin::Created => (StepStatus::Done, format!("created from {base}")),
                    BranchOrigin::Local => (StepStatus::Reused, "existing local branch".to_string()),
                    BranchOrigin::Remote => {
                        (StepStatus::Reused, format!("tracking {}/{}", git.remote_name(), r.name))
                    }
                };
                run.record(Step::EnsureBranch, status, format!("{} ({how})", r.name));
                true
            }
            Err(e) => {
                run.record(Step::EnsureBranch, StepStatus::Failed, e.to_string());
                false
            }
        }
    }

    /// Tracker item, pull request and link. A failed tracker lookup aborts
    /// the rest of the remote portion; IDs are checkpointed as they arrive.
    #[allow(clippy::too_many_arguments)]
    async fn remote_steps(
        &self,
        provider: &dyn Provider,
        recorded: Option<&AutopilotState>,
        descriptor: &WorkItemDescriptor,
        id: &SafeId,
        branch: &str,
        base: &str,
        pushed: bool,
        options: &StartOptions,
        run: &mut RunReport,
    ) -> Result<(), AutopilotError> {
        let store = self.store();
        let live = provider.mode() == ProviderMode::Live;
        // IDs recorded against another provider are never reused.
        let recorded = recorded.filter(|s| s.provider == Some(provider.kind()));

        let story = fs::read_to_string(self.config.project_dir.join(&descriptor.source_path))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not re-read story for the tracker description");
                String::new()
            });
        let known_tracker = recorded
            .and_then(|s| s.tracker_item_id.as_ref())
            .map(|i| i.to_string());
        let tracker = provider
            .find_or_create_tracker_item(descriptor, &story, known_tracker.as_deref())
            .await;
        let tracker_failure = tracker.is_failed().then_some(tracker.failure);
        let tracker_id = tracker.resource_id().map(str::to_string);
        let (tracker_item_id, tracker_item_url) = remote_ids(&tracker);
        run.record_provider(Step::TrackerItem, tracker);
        if live && tracker_item_id.is_some() {
            self.checkpoint(
                &store,
                id,
                StateUpdate {
                    tracker_item_id,
                    tracker_item_url,
                    completed_steps: vec![Step::TrackerItem],
                    ..Default::default()
                },
            )?;
        }
        if let Some(class) = tracker_failure {
            // Rejected credentials fail every later call the same way.
            let (status, detail) = match class {
                Some(FailureClass::Auth) => (
                    StepStatus::PreconditionFailed,
                    "credentials rejected by the tracker",
                ),
                Some(FailureClass::Transient) => (
                    StepStatus::Skipped,
                    "remote steps aborted after a transient tracker failure; re-run to resume",
                ),
                _ => (
                    StepStatus::Skipped,
                    "remote steps aborted after tracker failure",
                ),
            };
            tracing::warn!(failure = ?class, "aborting remote steps");
            for step in [Step::PullRequest, Step::Link] {
                run.record(step, status, detail.to_string());
            }
            return Ok(());
        }

        let pr_id = if live && !pushed {
            let err = AutopilotError::PreconditionFailed(format!(
                "branch {branch} has not been pushed; re-run with --push"
            ));
            run.record(Step::PullRequest, StepStatus::PreconditionFailed, err.to_string());
            None
        } else {
            let reference = tracker_id
                .as_deref()
                .and_then(|t| provider.tracker_reference(t));
            let spec = PullRequestSpec {
                title: descriptor.display_title(),
                head: branch.to_string(),
                base: base.to_string(),
                body: render::pull_request_body(
                    &descriptor.source_path,
                    &self.relative(&self.review_pack_path(id)),
                    reference.as_deref(),
                ),
                draft: options.draft,
            };
            let known_pr = recorded
                .and_then(|s| s.pull_request_id.as_ref())
                .map(|i| i.to_string());
            let result = provider
                .find_or_create_pull_request(&spec, known_pr.as_deref())
                .await;
            let pr_id = result.resource_id().map(str::to_string);
            let (pull_request_id, pull_request_url) = remote_ids(&result);
            run.record_provider(Step::PullRequest, result);
            if live && pull_request_id.is_some() {
                self.checkpoint(
                    &store,
                    id,
                    StateUpdate {
                        pull_request_id,
                        pull_request_url,
                        completed_steps: vec![Step::PullRequest],
                        ..Default::default()
                    },
                )?;
            }
            pr_id
        };

        match (tracker_id, pr_id) {
            (Some(work_item), Some(pull_request)) => {
                let result = provider
                    .link_work_item_to_pull_request(&work_item, &pull_request)
                    .await;
                run.record_provider(Step::Link, result);
            }
            _ if !live => {
                let result = provider.link_work_item_to_pull_request("", "").await;
                run.record_provider(Step::Link, result);
            }
            _ => run.record(
                Step::Link,
                StepStatus::Skipped,
                "tracker item or pull request unavailable".to_string(),
            ),
        }
        Ok(())
    }

    /// Final merge of `update` plus every step that succeeded.
    pub(super) fn persist(
        &self,
        store: &StateStore,
        id: &SafeId,
        mut update: StateUpdate,
        run: &mut RunReport,
    ) -> Result<(), AutopilotError> {
        update.completed_steps.extend(
            run.steps
                .iter()
                .filter(|s| s.status.is_success())
                .map(|s| s.step),
        );
        match self.checkpoint(store, id, update) {
            Ok(_) => {
                run.record(
                    Step::PersistState,
                    StepStatus::Done,
                    self.relative(&store.path_for(id)).display().to_string(),
                );
                Ok(())
            }
            Err(e) => {
                run.record(Step::PersistState, StepStatus::Failed, e.to_string());
                Err(e)
            }
        }
    }
}

//! The repair loop, as an explicit bounded state machine.
//!
//! `Running -> AssessErrors -> RequestFix -> Validate -> ApplyTentative ->
//! ReRun -> Compare`. Rejections go through `RejectAndRetry`, which either
//! re-enters `RequestFix` with a note or finishes. An accepted patch feeds
//! its re-run back into `AssessErrors` for the next outer attempt.
//!
//! Every transition out of `ApplyTentative` either keeps a verified
//! improvement or restores the snapshot taken right before the mutation.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::apply::{AppliedPatch, PatchTool, apply_guarded};
use crate::artifacts::ArtifactStore;
use crate::assistant::Assistant;
use crate::config::Config;
use crate::diff::DiffFact;
use crate::error::{Error, Result};
use crate::locate::{self, ErrorRef};
use crate::request::{self, FixRequest, FixRequester, FixResponse};
use crate::task::{TaskResult, TaskRunner};
use crate::validate;

/// Progress and diagnostics for the user. Each rejection is one line.
pub trait LoopReporter: Send + Sync {
    fn errors_located(&self, refs: &[ErrorRef], total: usize);
    fn attempt_started(&self, attempt: u32, max_attempts: u32, scope: &[String]);
    fn fix_requested(&self, round: u32, max_rounds: u32);
    fn rejected(&self, round: u32, reason: &Error);
    fn applied(&self, fact: &DiffFact);
    fn accepted(&self, before: usize, after: usize);
    fn reverted(&self, before: usize, after: usize);
}

/// Default reporter that prints to stderr.
pub struct StderrReporter;

impl LoopReporter for StderrReporter {
    fn errors_located(&self, refs: &[ErrorRef], total: usize) {
        eprintln!("[fixloop] {total} error(s) located");
        for r in refs {
            eprintln!("[fixloop]   - {r}");
        }
    }

    fn attempt_started(&self, attempt: u32, max_attempts: u32, scope: &[String]) {
        eprintln!(
            "[fixloop] Attempt {attempt}/{max_attempts}, files: {}",
            scope.join(", ")
        );
    }

    fn fix_requested(&self, round: u32, max_rounds: u32) {
        eprintln!("[fixloop] Requesting fix (round {round}/{max_rounds})");
    }

    fn rejected(&self, round: u32, reason: &Error) {
        eprintln!("[fixloop] Round {round} rejected: {}", reason.feedback_note());
    }

    fn applied(&self, fact: &DiffFact) {
        eprintln!(
            "[fixloop] Patch applied: {} file(s), +{} -{}",
            fact.files.len(),
            fact.added_lines,
            fact.removed_lines
        );
    }

    fn accepted(&self, before: usize, after: usize) {
        eprintln!("[fixloop] Errors reduced: {before} -> {after}, patch kept");
    }

    fn reverted(&self, before: usize, after: usize) {
        eprintln!("[fixloop] No improvement ({before} -> {after}), patch reverted");
    }
}

/// How a loop ended.
#[derive(Debug)]
pub enum Outcome {
    /// No errors remain.
    Success { fixes: u32 },
    /// Attempts exhausted (or fixing disabled) with errors remaining.
    Partial { remaining: usize, fixes: u32 },
    /// Stopped on a non-recoverable error or an exhausted round budget.
    Aborted {
        reason: Error,
        remaining: Option<usize>,
    },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success { .. } => 0,
            Outcome::Partial { .. } => 1,
            Outcome::Aborted { .. } => 3,
        }
    }
}

/// One outer attempt's fix cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub attempt: u32,
    pub round: u32,
    /// Error count at the start of this outer attempt.
    pub baseline: usize,
    pub errors_text: String,
    pub scope: Vec<String>,
    pub note: Option<String>,
}

#[derive(Debug)]
pub enum State {
    Running { attempt: u32 },
    AssessErrors { attempt: u32, result: TaskResult },
    RequestFix(Cycle),
    Validate { cycle: Cycle, response: FixResponse },
    RejectAndRetry { cycle: Cycle, reason: Error },
    ApplyTentative { cycle: Cycle, diff: String },
    ReRun { cycle: Cycle, applied: AppliedPatch },
    Compare {
        cycle: Cycle,
        applied: AppliedPatch,
        result: TaskResult,
    },
    Finished(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// Nothing left to repair.
    Clean,
    /// The run failed but no location could be parsed.
    Unlocatable,
    /// Every located error is outside the repository.
    NoRepoFiles { count: usize },
    Repair {
        count: usize,
        refs: Vec<ErrorRef>,
        scope: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    NotImproved,
}

/// Error locations of a run that count toward the comparison. Locations
/// inside `ignored` (the backup area) are skipped. A successful run counts
/// as clean unless warnings are being repaired.
fn counted_refs(result: &TaskResult, fix_warnings: bool, root: &Path, ignored: &Path) -> Vec<ErrorRef> {
    let output = result.combined();
    if result.success() && !(fix_warnings && locate::has_warnings(&output)) {
        return Vec::new();
    }
    locate::locate_errors(&output, usize::MAX)
        .into_iter()
        .filter(|r| {
            !locate::to_repo_relative(root, &r.file)
                .is_some_and(|rel| Path::new(&rel).starts_with(ignored))
        })
        .collect()
}

/// Uncapped error count used for baselines and comparisons.
pub fn error_count(result: &TaskResult, fix_warnings: bool, root: &Path, ignored: &Path) -> usize {
    counted_refs(result, fix_warnings, root, ignored).len()
}

/// Classify a task run.
pub fn assess(result: &TaskResult, config: &Config) -> Assessment {
    let refs = counted_refs(
        result,
        config.fix_warnings,
        &config.repo_root,
        &config.backup_dir,
    );
    if refs.is_empty() {
        return if result.success() {
            Assessment::Clean
        } else {
            Assessment::Unlocatable
        };
    }
    let count = refs.len();
    let refs: Vec<ErrorRef> = refs.into_iter().take(config.max_errors).collect();
    let scope = locate::target_files(&config.repo_root, &refs, config.max_files);
    if scope.is_empty() {
        return Assessment::NoRepoFiles { count };
    }
    Assessment::Repair { count, refs, scope }
}

/// Strictly fewer errors is the only improvement. Zero errors from a run
/// that still failed means the run could not be assessed.
pub fn compare_counts(before: usize, after: usize, rerun_succeeded: bool) -> Verdict {
    if after < before && (after > 0 || rerun_succeeded) {
        Verdict::Accepted
    } else {
        Verdict::NotImproved
    }
}

/// Retry within the round budget with the rejection as feedback, or abort.
pub fn next_after_rejection(cycle: Cycle, reason: Error, fix_rounds: u32) -> State {
    if cycle.round < fix_rounds {
        State::RequestFix(Cycle {
            round: cycle.round + 1,
            note: Some(reason.feedback_note()),
            ..cycle
        })
    } else {
        let remaining = Some(cycle.baseline);
        State::Finished(Outcome::Aborted { reason, remaining })
    }
}

#[derive(Debug, Default)]
struct Progress {
    fixes: u32,
    last_count: Option<usize>,
    tool_ready: bool,
    responses: u32,
}

impl Progress {
    /// Number for the next assistant response, counted across every attempt.
    fn next_response(&mut self) -> u32 {
        self.responses += 1;
        self.responses
    }
}

pub struct VerificationLoop<T, A, P, R = StderrReporter> {
    config: Config,
    runner: T,
    assistant: A,
    patcher: P,
    requester: FixRequester,
    artifacts: ArtifactStore,
    reporter: R,
}

impl<T: TaskRunner, A: Assistant, P: PatchTool> VerificationLoop<T, A, P> {
    pub fn new(config: Config, runner: T, assistant: A, patcher: P) -> Self {
        Self::with_reporter(config, runner, assistant, patcher, StderrReporter)
    }
}

impl<T: TaskRunner, A: Assistant, P: PatchTool, R: LoopReporter> VerificationLoop<T, A, P, R> {
    pub fn with_reporter(config: Config, runner: T, assistant: A, patcher: P, reporter: R) -> Self {
        let root = config.repo_root.clone();
        let requester = FixRequester::new(&root)
            .with_override_dir(request::default_override_dir(&root))
            .with_limits(config.error_chars, config.context_bytes);
        let artifacts = ArtifactStore::new(ArtifactStore::default_dir(&root));
        Self {
            config,
            runner,
            assistant,
            patcher,
            requester,
            artifacts,
            reporter,
        }
    }

    /// Drive the state machine to a final [`Outcome`].
    ///
    /// Only [`Error::Interrupted`] escapes as `Err`; every other failure ends
    /// the loop as [`Outcome::Aborted`] after any applied patch is reverted.
    pub async fn run(&self) -> Result<Outcome> {
        let mut progress = Progress::default();
        let mut state = State::Running { attempt: 1 };
        loop {
            state = match state {
                State::Finished(outcome) => {
                    info!(?outcome, fixes = progress.fixes, "loop finished");
                    return Ok(outcome);
                }
                other => match self.step(other, &mut progress).await {
                    Ok(next) => next,
                    Err(Error::Interrupted) => return Err(Error::Interrupted),
                    Err(reason) => {
                        error!(error = %reason, "loop aborted");
                        State::Finished(Outcome::Aborted {
                            reason,
                            remaining: progress.last_count,
                        })
                    }
                },
            };
        }
    }

    async fn step(&self, state: State, progress: &mut Progress) -> Result<State> {
        match state {
            State::Running { attempt } => {
                let result = self.runner.run().await?;
                Ok(State::AssessErrors { attempt, result })
            }
            State::AssessErrors { attempt, result } => Ok(self.on_assess(attempt, result, progress)),
            State::RequestFix(cycle) => self.on_request(cycle).await,
            State::Validate { cycle, response } => {
                Ok(self.on_validate(cycle, response, progress.next_response()))
            }
            State::RejectAndRetry { cycle, reason } => {
                self.reporter.rejected(cycle.round, &reason);
                warn!(attempt = cycle.attempt, round = cycle.round, reason = %reason, "fix rejected");
                Ok(next_after_rejection(cycle, reason, self.config.fix_rounds))
            }
            State::ApplyTentative { cycle, diff } => self.on_apply(cycle, diff, progress).await,
            State::ReRun { cycle, applied } => match self.runner.run().await {
                Ok(result) => Ok(State::Compare {
                    cycle,
                    applied,
                    result,
                }),
                Err(e) => {
                    applied.revert()?;
                    Err(e)
                }
            },
            State::Compare {
                cycle,
                applied,
                result,
            } => self.on_compare(cycle, applied, result, progress),
            State::Finished(outcome) => Ok(State::Finished(outcome)),
        }
    }

    fn on_assess(&self, attempt: u32, result: TaskResult, progress: &mut Progress) -> State {
        match assess(&result, &self.config) {
            Assessment::Clean => {
                progress.last_count = Some(0);
                State::Finished(Outcome::Success {
                    fixes: progress.fixes,
                })
            }
            Assessment::Unlocatable => State::Finished(Outcome::Aborted {
                reason: Error::NoErrorLocations(format!(
                    "task exited with code {} but reported no error locations",
                    result.exit_code
                )),
                remaining: progress.last_count,
            }),
            Assessment::NoRepoFiles { count } => State::Finished(Outcome::Aborted {
                reason: Error::NoErrorLocations(
                    "no located error is inside the repository".to_string(),
                ),
                remaining: Some(count),
            }),
            Assessment::Repair { count, refs, scope } => {
                progress.last_count = Some(count);
                self.reporter.errors_located(&refs, count);
                if !self.config.auto_fix || attempt > self.config.attempts {
                    return State::Finished(Outcome::Partial {
                        remaining: count,
                        fixes: progress.fixes,
                    });
                }
                info!(attempt, errors = count, files = ?scope, "starting attempt");
                self.reporter
                    .attempt_started(attempt, self.config.attempts, &scope);
                let output = result.combined();
                let errors_text = if self.config.is_lint() {
                    request::filter_lint_output(&output, &scope)
                } else {
                    output
                };
                State::RequestFix(Cycle {
                    attempt,
                    round: 1,
                    baseline: count,
                    errors_text,
                    scope,
                    note: None,
                })
            }
        }
    }

    async fn on_request(&self, cycle: Cycle) -> Result<State> {
        self.reporter.fix_requested(cycle.round, self.config.fix_rounds);
        let request = FixRequest {
            errors_text: &cycle.errors_text,
            allowed_files: &cycle.scope,
            note: cycle.note.as_deref(),
            strict: self.config.is_lint() || cycle.round > 1,
        };
        match self.requester.request(&self.assistant, &request).await {
            Ok(response) => Ok(State::Validate { cycle, response }),
            Err(reason) if reason.is_recoverable() => Ok(State::RejectAndRetry { cycle, reason }),
            Err(e) => Err(e),
        }
    }

    fn on_validate(&self, cycle: Cycle, response: FixResponse, number: u32) -> State {
        let attempt = validate::validate(number, &response.raw, &cycle.scope);
        if self.config.dump_prompt
            && let Err(e) =
                self.artifacts
                    .write_exchange(&response.prompt, &response.raw, &attempt.cleaned_diff)
        {
            warn!(error = %e, "failed to save prompt artifacts");
        }
        match attempt.into_diff() {
            Ok(diff) => State::ApplyTentative { cycle, diff },
            Err(reason) => State::RejectAndRetry { cycle, reason },
        }
    }

    async fn on_apply(&self, cycle: Cycle, diff: String, progress: &mut Progress) -> Result<State> {
        if !progress.tool_ready {
            self.patcher.ensure_available().await?;
            progress.tool_ready = true;
        }
        if let Err(e) = self.artifacts.write_patch(&diff) {
            warn!(error = %e, "failed to save patch artifact");
        }
        match apply_guarded(
            &self.patcher,
            &self.config.repo_root,
            &self.config.backup_dir,
            &diff,
            self.config.max_lines,
        )
        .await
        {
            Ok(applied) => {
                self.reporter.applied(&applied.fact);
                Ok(State::ReRun { cycle, applied })
            }
            Err(reason) if reason.is_recoverable() => Ok(State::RejectAndRetry { cycle, reason }),
            Err(e) => Err(e),
        }
    }

    fn on_compare(
        &self,
        cycle: Cycle,
        applied: AppliedPatch,
        result: TaskResult,
        progress: &mut Progress,
    ) -> Result<State> {
        let before = cycle.baseline;
        let after = error_count(
            &result,
            self.config.fix_warnings,
            &self.config.repo_root,
            &self.config.backup_dir,
        );
        debug!(before, after, exit_code = result.exit_code, "comparing error counts");

        match compare_counts(before, after, result.success()) {
            Verdict::Accepted => {
                if let Err(e) = applied.commit() {
                    warn!(error = %e, "failed to remove backup of accepted patch");
                }
                progress.fixes += 1;
                info!(before, after, "patch accepted");
                self.reporter.accepted(before, after);
                Ok(State::AssessErrors {
                    attempt: cycle.attempt + 1,
                    result,
                })
            }
            Verdict::NotImproved => {
                applied.revert()?;
                info!(before, after, "patch reverted");
                self.reporter.reverted(before, after);
                Ok(State::RejectAndRetry {
                    cycle,
                    reason: Error::NoImprovement { before, after },
                })
            }
        }
    }
}

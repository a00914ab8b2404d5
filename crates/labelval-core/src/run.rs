// ── Run orchestrator ──
//
// Sequences print → correlate → read cycles over an image roll for a
// number of loops. A faulted image is recorded and the run moves on; only
// a failure to put the node into a usable mode aborts the run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::{DeviceController, ReadResult};
use crate::correlator::{Correlation, RepeatCorrelator, Ticket};
use crate::error::CoreError;
use crate::state::DeviceState;
use crate::store::{ResultKey, ResultStore, StoredResult};

// ── Inputs ───────────────────────────────────────────────────────────

/// One label image that gets printed and verified.
#[derive(Debug, Clone, Serialize)]
pub struct SourceImage {
    pub uid: String,
    pub path: PathBuf,
}

/// An ordered set of images graded against one standard.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRoll {
    pub uid: String,
    /// e.g. `"GS1 TABLE 1"`. `None` grades without a standard.
    pub grading_standard: Option<String>,
    pub images: Vec<SourceImage>,
}

impl ImageRoll {
    pub fn is_gs1(&self) -> bool {
        self.grading_standard
            .as_deref()
            .and_then(|s| s.get(..3))
            .is_some_and(|p| p.eq_ignore_ascii_case("GS1"))
    }
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub roll: ImageRoll,
    pub loops: u32,
}

/// Sends a label image to a physical printer.
///
/// Printing is fire-and-forget from the node's point of view: the repeat
/// number shows up later on the event stream.
pub trait Printer: Send + Sync {
    fn print(
        &self,
        image: &SourceImage,
        copies: u32,
        note: &str,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

// ── Outputs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    Succeeded { repeat: u32 },
    Faulted { reason: String },
    /// No stored sector definitions for this image.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageOutcome {
    pub loop_index: u32,
    pub image_uid: String,
    #[serde(flatten)]
    pub status: ImageStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub outcomes: Vec<ImageOutcome>,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            outcomes: Vec::new(),
        }
    }

    fn count(&self, pred: impl Fn(&ImageStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, ImageStatus::Succeeded { .. }))
    }

    pub fn faulted(&self) -> usize {
        self.count(|s| matches!(s, ImageStatus::Faulted { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ImageStatus::Skipped))
    }

    /// Roll UID results of `loop_index` are stored under.
    pub fn roll_uid(&self, loop_index: u32) -> String {
        format!("{}-{loop_index}", self.run_id)
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// What the correlator carries for each print.
#[derive(Debug, Clone)]
struct PrintRequest {
    loop_index: u32,
    image_uid: String,
}

enum Attempt {
    Done(u32),
    Skipped,
}

pub struct RunOrchestrator<P, S> {
    controller: DeviceController,
    printer: P,
    store: Arc<S>,
    progress: Option<mpsc::UnboundedSender<ImageOutcome>>,
}

impl<P: Printer, S: ResultStore> RunOrchestrator<P, S> {
    pub fn new(controller: DeviceController, printer: P, store: Arc<S>) -> Self {
        Self {
            controller,
            printer,
            store,
            progress: None,
        }
    }

    /// Also send every image outcome to `tx` as soon as it is known.
    #[must_use]
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ImageOutcome>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// UIDs of images with no stored sector definitions for this node.
    ///
    /// The run skips them; callers warn before starting.
    pub fn preflight(&self, roll: &ImageRoll) -> Result<Vec<String>, CoreError> {
        let device = self.controller.device_id();
        let mut missing = Vec::new();
        for image in &roll.images {
            let key = ResultKey::new(device.as_str(), image.uid.as_str(), roll.uid.as_str());
            let has_sectors = self
                .store
                .select(&key)?
                .is_some_and(|stored| stored.has_sectors());
            if !has_sectors {
                missing.push(image.uid.clone());
            }
        }
        Ok(missing)
    }

    /// Run every image of the plan's roll `loops` times.
    ///
    /// `cancel` is checked between images.
    pub async fn run(
        &self,
        plan: &RunPlan,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CoreError> {
        let (correlator, mut outcomes) =
            RepeatCorrelator::new(self.controller.timeouts().correlation);
        self.controller.set_observer(correlator.clone());

        let result = self.run_loops(plan, cancel, &correlator, &mut outcomes).await;

        self.controller.clear_observer();
        correlator.reset();
        result
    }

    async fn run_loops(
        &self,
        plan: &RunPlan,
        cancel: &CancellationToken,
        correlator: &RepeatCorrelator<PrintRequest>,
        outcomes: &mut mpsc::UnboundedReceiver<Correlation<PrintRequest>>,
    ) -> Result<RunSummary, CoreError> {
        let mut summary = RunSummary::new(Uuid::new_v4());
        info!(
            run_id = %summary.run_id,
            roll = %plan.roll.uid,
            images = plan.roll.images.len(),
            loops = plan.loops,
            "run started"
        );

        self.controller
            .switch_to_edit(self.controller.timeouts().switch_to_edit)
            .await?;

        'loops: for loop_index in 1..=plan.loops {
            for (position, image) in plan.roll.images.iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(run_id = %summary.run_id, "run cancelled");
                    summary.cancelled = true;
                    break 'loops;
                }

                let status = match self
                    .cycle(
                        &plan.roll,
                        image,
                        loop_index,
                        position + 1,
                        &summary,
                        correlator,
                        outcomes,
                    )
                    .await
                {
                    Ok(Attempt::Done(repeat)) => ImageStatus::Succeeded { repeat },
                    Ok(Attempt::Skipped) => ImageStatus::Skipped,
                    Err(e) => {
                        warn!(image = %image.uid, loop_index, error = %e, "image faulted");
                        ImageStatus::Faulted { reason: e.status() }
                    }
                };
                let outcome = ImageOutcome {
                    loop_index,
                    image_uid: image.uid.clone(),
                    status,
                };
                if let Some(ref tx) = self.progress {
                    let _ = tx.send(outcome.clone());
                }
                summary.outcomes.push(outcome);
            }
        }

        summary.finished_at = Some(Utc::now());
        info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded(),
            faulted = summary.faulted(),
            skipped = summary.skipped(),
            "run finished"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn cycle(
        &self,
        roll: &ImageRoll,
        image: &SourceImage,
        loop_index: u32,
        position: usize,
        summary: &RunSummary,
        correlator: &RepeatCorrelator<PrintRequest>,
        outcomes: &mut mpsc::UnboundedReceiver<Correlation<PrintRequest>>,
    ) -> Result<Attempt, CoreError> {
        let ctrl = &self.controller;
        let timeouts = ctrl.timeouts();
        let device = ctrl.device_id();

        let baseline = ResultKey::new(device.as_str(), image.uid.as_str(), roll.uid.as_str());
        let Some(stored) = self.store.select(&baseline)?.filter(StoredResult::has_sectors) else {
            warn!(image = %image.uid, "no stored sectors, skipping");
            return Ok(Attempt::Skipped);
        };

        let gs1 = roll.is_gs1();
        if stored.has_sequencing() {
            ctrl.switch_to_edit(timeouts.switch_to_edit).await?;
        }
        if !gs1 {
            ctrl.switch_to_run(timeouts.switch_to_run).await?;
        }

        let ticket = correlator
            .queue_print(PrintRequest {
                loop_index,
                image_uid: image.uid.clone(),
            })
            .await?;

        let note = format!("Loop {loop_index} : {position}");
        if let Err(e) = self.printer.print(image, 1, &note).await {
            correlator.abandon(ticket);
            return Err(e);
        }
        if ctrl.state() != DeviceState::Idle {
            if let Err(e) = ctrl.enable_print(true).await {
                correlator.abandon(ticket);
                return Err(e);
            }
        }

        let repeat = await_ticket(correlator, outcomes, ticket).await?;
        debug!(image = %image.uid, repeat, "processing repeat");

        let read = self.process(&stored, repeat, gs1).await;
        correlator.complete(repeat);
        let read = read?;

        let template = serde_json::to_value(&read.job).map_err(|e| CoreError::Store {
            message: e.to_string(),
        })?;
        let key = ResultKey::new(device, image.uid.as_str(), summary.roll_uid(loop_index));
        self.store.insert(
            key,
            StoredResult {
                template,
                report: read.report.report,
                image: read.report.image,
            },
        )?;

        Ok(Attempt::Done(repeat))
    }

    /// Re-apply the stored sectors for GS1 grading, then read the repeat.
    async fn process(
        &self,
        stored: &StoredResult,
        repeat: u32,
        gs1: bool,
    ) -> Result<ReadResult, CoreError> {
        if gs1 {
            self.controller.delete_sectors().await?;
            for sector in stored.sectors().into_iter().flatten() {
                let name = sector
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                self.controller.add_sector(name, sector.to_string()).await?;
            }
        }
        self.controller.read(repeat).await
    }
}

/// Wait for the outcome of `ticket`, completing any stale repeat that
/// belonged to an earlier print.
async fn await_ticket(
    correlator: &RepeatCorrelator<PrintRequest>,
    outcomes: &mut mpsc::UnboundedReceiver<Correlation<PrintRequest>>,
    ticket: Ticket,
) -> Result<u32, CoreError> {
    loop {
        let Some(outcome) = outcomes.recv().await else {
            return Err(CoreError::Cancelled);
        };
        match outcome {
            Correlation::Ready {
                ticket: t, repeat, ..
            } if t == ticket => return Ok(repeat),
            Correlation::Faulted {
                ticket: t, reason, ..
            } if t == ticket => {
                return Err(CoreError::PrintFaulted {
                    reason: reason.to_string(),
                });
            }
            Correlation::Ready {
                repeat, request, ..
            } => {
                debug!(repeat, image = %request.image_uid, loop_index = request.loop_index, "stale correlation");
                correlator.complete(repeat);
            }
            Correlation::Faulted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roll(standard: Option<&str>) -> ImageRoll {
        ImageRoll {
            uid: "roll".into(),
            grading_standard: standard.map(str::to_owned),
            images: Vec::new(),
        }
    }

    #[test]
    fn gs1_detection_is_prefix_based() {
        assert!(roll(Some("GS1 TABLE 1")).is_gs1());
        assert!(roll(Some("gs1 table 7")).is_gs1());
        assert!(!roll(Some("ISO/IEC 15415")).is_gs1());
        assert!(!roll(None).is_gs1());
    }

    #[test]
    fn summary_counts_by_status() {
        let mut summary = RunSummary::new(Uuid::nil());
        for status in [
            ImageStatus::Succeeded { repeat: 1 },
            ImageStatus::Faulted {
                reason: "timed out".into(),
            },
            ImageStatus::Skipped,
            ImageStatus::Succeeded { repeat: 2 },
        ] {
            summary.outcomes.push(ImageOutcome {
                loop_index: 1,
                image_uid: "img".into(),
                status,
            });
        }
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.faulted(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(
            summary.roll_uid(3),
            "00000000-0000-0000-0000-000000000000-3"
        );
    }
}

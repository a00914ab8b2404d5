//! Print-and-verify run over an image roll.
//!
//! The roll comes from a TOML manifest:
//!
//! ```toml
//! uid = "roll-1"
//! grading_standard = "GS1 TABLE 1"
//!
//! [[images]]
//! uid = "img-1"
//! path = "labels/img-1.png"
//! template = "templates/img-1.json"
//! ```
//!
//! `template` is the stored job (with its sectors) the image is verified
//! against. Relative paths resolve against the manifest's directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use labelval_core::{
    DeviceController, ImageOutcome, ImageRoll, ImageStatus, MemoryStore, ResultKey, ResultStore,
    RunOrchestrator, RunPlan, RunSummary, SourceImage, StoredResult,
};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::error::CliError;
use crate::output;

use super::printer::CommandPrinter;
use super::util;

// ── Manifest ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Manifest {
    uid: String,
    grading_standard: Option<String>,
    #[serde(default)]
    images: Vec<ManifestImage>,
}

#[derive(Debug, Deserialize)]
struct ManifestImage {
    uid: String,
    path: PathBuf,
    template: Option<PathBuf>,
}

impl Manifest {
    fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)?;
        let mut manifest: Self = toml::from_str(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for image in &mut manifest.images {
            image.path = base.join(&image.path);
            if let Some(ref mut template) = image.template {
                *template = base.join(&*template);
            }
        }
        if manifest.images.is_empty() {
            return Err(CliError::Validation {
                field: "manifest".into(),
                reason: format!("{} lists no images", path.display()),
            });
        }
        Ok(manifest)
    }

    /// Store every image's template as its baseline for `device`.
    fn seed(&self, store: &MemoryStore, device: &str) -> Result<(), CliError> {
        for image in &self.images {
            let Some(ref template) = image.template else {
                continue;
            };
            let stored = StoredResult {
                template: util::read_json_file(template)?,
                ..StoredResult::default()
            };
            store.insert(
                ResultKey::new(device, image.uid.as_str(), self.uid.as_str()),
                stored,
            )?;
        }
        Ok(())
    }

    fn roll(&self) -> ImageRoll {
        ImageRoll {
            uid: self.uid.clone(),
            grading_standard: self.grading_standard.clone(),
            images: self
                .images
                .iter()
                .map(|i| SourceImage {
                    uid: i.uid.clone(),
                    path: i.path.clone(),
                })
                .collect(),
        }
    }
}

// ── Output rows ─────────────────────────────────────────────────────

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Loop")]
    loop_index: u32,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn outcome_row(outcome: &ImageOutcome, color: bool) -> OutcomeRow {
    let (result, detail) = match outcome.status {
        ImageStatus::Succeeded { repeat } => (
            output::paint_ok(true, "ok", color),
            format!("repeat {repeat}"),
        ),
        ImageStatus::Faulted { ref reason } => {
            (output::paint_ok(false, "faulted", color), reason.clone())
        }
        ImageStatus::Skipped => ("skipped".into(), "no stored sectors".into()),
    };
    OutcomeRow {
        loop_index: outcome.loop_index,
        image: outcome.image_uid.clone(),
        result,
        detail,
    }
}

#[derive(Serialize)]
struct MissingSectors<'a> {
    roll: &'a str,
    missing: &'a [String],
}

// ── Results on disk ─────────────────────────────────────────────────

fn image_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(b"BM") {
        "bmp"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "jpg"
    } else {
        "bin"
    }
}

/// Write `{dir}/{roll uid}/{image uid}.json` (plus the repeat image) for
/// every result the run stored.
fn write_results(
    store: &MemoryStore,
    summary: &RunSummary,
    loops: u32,
    dir: &Path,
) -> Result<usize, CliError> {
    let mut written = 0;
    for loop_index in 1..=loops {
        let roll_uid = summary.roll_uid(loop_index);
        for key in store.keys_for_roll(&roll_uid) {
            let Some(stored) = store.select(&key)? else {
                continue;
            };
            let roll_dir = dir.join(&roll_uid);
            let body = serde_json::json!({
                "device": key.device,
                "image": key.image_uid,
                "roll": key.roll_uid,
                "template": stored.template,
                "report": stored.report,
            });
            util::write_file(
                &roll_dir.join(format!("{}.json", key.image_uid)),
                serde_json::to_string_pretty(&body)?.as_bytes(),
            )?;
            if let Some(ref image) = stored.image {
                let name = format!("{}.{}", key.image_uid, image_extension(image));
                util::write_file(&roll_dir.join(name), image)?;
            }
            written += 1;
        }
    }
    Ok(written)
}

// ── Handler ─────────────────────────────────────────────────────────

fn progress_bar(total: u64, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar
}

pub async fn handle(
    controller: &DeviceController,
    args: RunArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.loops == 0 {
        return Err(CliError::Validation {
            field: "loops".into(),
            reason: "must be at least 1".into(),
        });
    }

    let manifest = Manifest::load(&args.manifest)?;
    let store = Arc::new(MemoryStore::new());
    manifest.seed(&store, &controller.device_id())?;
    let roll = manifest.roll();

    let (progress_tx, mut progress) = mpsc::unbounded_channel();
    let orchestrator = RunOrchestrator::new(
        controller.clone(),
        CommandPrinter::new(
            args.print_command.clone().unwrap_or_default(),
            args.print_args,
        ),
        Arc::clone(&store),
    )
    .with_progress(progress_tx);

    let missing = orchestrator.preflight(&roll)?;
    if args.check {
        let report = MissingSectors {
            roll: &roll.uid,
            missing: &missing,
        };
        let out = output::render_single(
            &global.output,
            &report,
            |r| {
                if r.missing.is_empty() {
                    "every image has stored sectors".into()
                } else {
                    format!("no stored sectors:\n  {}", r.missing.join("\n  "))
                }
            },
            |r| r.missing.join("\n"),
        );
        output::print_output(&out, global.quiet);
        return Ok(());
    }
    if args.print_command.is_none() {
        return Err(CliError::Validation {
            field: "print-command".into(),
            reason: "a print program is required; pass --print-command or set LABELVAL_PRINT_COMMAND"
                .into(),
        });
    }
    if !missing.is_empty() {
        tracing::warn!(images = ?missing, "images without stored sectors will be skipped");
        let prompt = format!(
            "{} image(s) have no stored sectors and will be skipped. Continue?",
            missing.len()
        );
        if !util::confirm(&prompt, global.yes)? {
            return Ok(());
        }
    }

    let plan = RunPlan {
        roll,
        loops: args.loops,
    };
    let total = plan.roll.images.len() * usize::try_from(plan.loops).unwrap_or(usize::MAX);
    let bar = progress_bar(
        u64::try_from(total).unwrap_or(u64::MAX),
        global.quiet || !matches!(global.output, OutputFormat::Table),
    );
    let cancel = CancellationToken::new();

    let run = orchestrator.run(&plan, &cancel);
    tokio::pin!(run);
    let summary = loop {
        tokio::select! {
            biased;

            result = &mut run => break result?,

            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                bar.println("interrupt: stopping after the current image");
                cancel.cancel();
            }

            Some(outcome) = progress.recv() => {
                bar.set_message(format!("loop {} {}", outcome.loop_index, outcome.image_uid));
                bar.inc(1);
            }
        }
    };
    bar.finish_and_clear();

    if let Some(ref dir) = args.results_dir {
        let written = write_results(&store, &summary, plan.loops, dir)?;
        tracing::info!(written, dir = %dir.display(), "results written");
    }

    let color = output::should_color(&global.color);
    let out = match global.output {
        OutputFormat::Table | OutputFormat::Plain => {
            let list = output::render_list(
                &global.output,
                &summary.outcomes,
                |o| outcome_row(o, color),
                |o| o.image_uid.clone(),
            );
            if matches!(global.output, OutputFormat::Table) {
                format!(
                    "{list}\n{} succeeded, {} faulted, {} skipped",
                    summary.succeeded(),
                    summary.faulted(),
                    summary.skipped()
                )
            } else {
                list
            }
        }
        _ => output::render_single(&global.output, &summary, |_| String::new(), |s| {
            s.run_id.to_string()
        }),
    };
    output::print_output(&out, global.quiet);

    if summary.cancelled {
        return Err(CliError::Interrupted);
    }
    Ok(())
}

//! Read-side node handlers: status, job, inspect, detect, read.

use serde::Serialize;
use tabled::Tabled;

use labelval_core::api::ConnectionState;
use labelval_core::api::events::Detection;
use labelval_core::api::models::Job;
use labelval_core::{DeviceController, DeviceState, ReadResult, RepeatReport};

use crate::cli::{DetectArgs, GlobalOpts, InspectArgs, ReadArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StatusView {
    node: String,
    device_id: String,
    state: DeviceState,
    job_name: Option<String>,
    access_level: Option<String>,
    stream_open: bool,
    symbologies: usize,
}

pub fn status(controller: &DeviceController, global: &GlobalOpts) -> Result<(), CliError> {
    let status = controller.status();
    let view = StatusView {
        node: controller.config().endpoint.to_string(),
        device_id: controller.device_id(),
        state: status.state,
        job_name: status.job_name,
        access_level: controller.session().map(|s| s.access_level.to_string()),
        stream_open: controller.stream_state() == ConnectionState::Open,
        symbologies: controller.symbologies().len(),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| {
            [
                format!("Node:        {}", v.node),
                format!("Device:      {}", v.device_id),
                format!("State:       {}", output::paint_state(v.state, color)),
                format!("Job:         {}", v.job_name.as_deref().unwrap_or("-")),
                format!("Session:     {}", v.access_level.as_deref().unwrap_or("-")),
                format!(
                    "Stream:      {}",
                    output::paint_ok(
                        v.stream_open,
                        if v.stream_open { "open" } else { "closed" },
                        color
                    )
                ),
                format!("Symbologies: {}", v.symbologies),
            ]
            .join("\n")
        },
        |v| v.state.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Job ─────────────────────────────────────────────────────────────

fn job_detail(job: &Job) -> String {
    let mut lines = vec![
        format!("Job:        {}", job.name),
        format!("Sectors:    {}", job.sectors.len()),
        format!("Sequencing: {}", job.has_sequencing()),
    ];
    for sector in &job.sectors {
        lines.push(format!(
            "  - {} ({}, {})",
            sector.name,
            sector.sector_type.as_deref().unwrap_or("?"),
            sector.symbology.as_deref().unwrap_or("?"),
        ));
    }
    lines.join("\n")
}

pub async fn job(controller: &DeviceController, global: &GlobalOpts) -> Result<(), CliError> {
    let job = controller.job().await?;
    let out = output::render_single(&global.output, &job, job_detail, |j| j.name.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn calibration(
    controller: &DeviceController,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let calibration = controller.calibration().await?;
    let out = output::render_single(
        &global.output,
        &calibration,
        output::render_json_pretty::<serde_json::Value>,
        output::render_json_compact::<serde_json::Value>,
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Reports ─────────────────────────────────────────────────────────

/// Repeat number plus the report's top-level scalar fields.
fn report_detail(report: &RepeatReport) -> Vec<String> {
    let mut lines = vec![
        format!("Repeat: {}", report.repeat),
        format!(
            "Image:  {}",
            report
                .image
                .as_ref()
                .map_or_else(|| "recycled".into(), |b| format!("{} bytes", b.len()))
        ),
    ];
    if let Some(fields) = report.report.as_object() {
        for (key, value) in fields {
            match value {
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {}
                serde_json::Value::String(s) => lines.push(format!("{key}: {s}")),
                other => lines.push(format!("{key}: {other}")),
            }
        }
    }
    lines
}

pub async fn inspect(
    controller: &DeviceController,
    args: &InspectArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::wait_or(&args.wait, controller.timeouts().inspect);
    controller.inspect(args.repeat, timeout).await?;

    let report = controller.get_report(args.repeat).await?;
    let out = output::render_single(
        &global.output,
        &report,
        |r| report_detail(r).join("\n"),
        |r| r.repeat.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn read(
    controller: &DeviceController,
    args: &ReadArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let result = controller.read(args.repeat).await?;

    if let Some(ref path) = args.image_out {
        match result.report.image {
            Some(ref bytes) => util::write_file(path, bytes)?,
            None => tracing::warn!(repeat = result.report.repeat, "no image to write"),
        }
    }

    let out = output::render_single(
        &global.output,
        &result,
        |r: &ReadResult| {
            let mut lines = report_detail(&r.report);
            lines.push(format!("Job:    {}", r.job.name));
            lines.join("\n")
        },
        |r| r.report.repeat.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Detect ──────────────────────────────────────────────────────────

#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Symbology")]
    symbology: String,
    #[tabled(rename = "X")]
    x: i32,
    #[tabled(rename = "Y")]
    y: i32,
    #[tabled(rename = "Width")]
    width: i32,
    #[tabled(rename = "Height")]
    height: i32,
    #[tabled(rename = "Orientation")]
    orientation: i32,
}

impl From<&Detection> for DetectionRow {
    fn from(d: &Detection) -> Self {
        Self {
            symbology: d.symbology.clone(),
            x: d.region.x,
            y: d.region.y,
            width: d.region.width,
            height: d.region.height,
            orientation: d.orientation,
        }
    }
}

pub async fn detect(
    controller: &DeviceController,
    args: &DetectArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::wait_or(&args.wait, controller.timeouts().detect);
    let detected = controller.detect_sectors(timeout).await?;
    if detected.detections.is_empty() {
        tracing::info!("no symbols detected");
    }

    let out = output::render_list(
        &global.output,
        &detected.detections,
        |d| DetectionRow::from(d),
        |d| d.symbology.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn report_detail_skips_nested_values() {
        let report = RepeatReport {
            repeat: 4,
            report: json!({"overallGrade": "B", "score": 3.5, "sectors": [{"name": "x"}]}),
            image: None,
        };
        let lines = report_detail(&report);
        assert_eq!(lines[0], "Repeat: 4");
        assert_eq!(lines[1], "Image:  recycled");
        assert!(lines.contains(&"overallGrade: B".to_owned()));
        assert!(lines.contains(&"score: 3.5".to_owned()));
        assert!(!lines.iter().any(|l| l.starts_with("sectors")));
    }
}

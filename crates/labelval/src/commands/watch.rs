//! Live event stream handler.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use labelval_core::api::InspectionEvent;
use labelval_core::api::websocket::FaultKind;
use labelval_core::{DeviceController, Notice};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct EventLine<'a> {
    at: DateTime<Local>,
    #[serde(flatten)]
    event: &'a InspectionEvent,
}

fn summary(event: &InspectionEvent) -> String {
    match event {
        InspectionEvent::Heartbeat(hb) => format!("heartbeat     {}", hb.state),
        InspectionEvent::StateChange(sc) => {
            format!("stateChange   {} -> {}", sc.from_state, sc.to_state)
        }
        InspectionEvent::SetupCapture(n) => format!("setupCapture  repeat {}", n.repeat),
        InspectionEvent::LabelEnd(n) => format!("labelEnd      repeat {}", n.repeat),
        InspectionEvent::SetupDetect(d) => format!(
            "setupDetect   {} symbol(s){}",
            d.detections.len(),
            if d.terminal { ", done" } else { "" }
        ),
        InspectionEvent::SessionStateChange(s) => {
            format!("session       {} {}", s.access_level, s.state.as_deref().unwrap_or(""))
        }
    }
}

fn render(event: &InspectionEvent, format: &OutputFormat) -> String {
    let line = EventLine {
        at: Local::now(),
        event,
    };
    match format {
        OutputFormat::Table | OutputFormat::Plain => {
            format!("{} {}", line.at.format("%H:%M:%S%.3f"), summary(event))
        }
        // One object per line so the stream stays machine-readable.
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json_compact(&line),
        OutputFormat::Yaml => format!("---\n{}", output::render_yaml(&line)),
    }
}

pub async fn handle(
    controller: &DeviceController,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut events = controller.subscribe_events();
    let mut notices = controller.subscribe_notices();
    let reconnects = controller.config().reconnect_on_fault;
    let mut seen = 0_usize;

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted");
                return Ok(());
            }

            notice = notices.recv() => match notice {
                Ok(Notice::SessionTakenOver { access_level }) => {
                    return Err(CliError::Stream {
                        node: controller.config().endpoint.to_string(),
                        message: format!("another client took over the {access_level} session"),
                    });
                }
                Ok(Notice::StreamFault(fault)) => {
                    tracing::warn!(%fault, "event stream fault");
                    if fault.kind != FaultKind::MalformedFrame && !reconnects {
                        return Err(CliError::Stream {
                            node: controller.config().endpoint.to_string(),
                            message: fault.message,
                        });
                    }
                }
                Ok(Notice::Status(text)) => tracing::info!("{text}"),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "notices lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },

            event = events.recv() => match event {
                Ok(event) => {
                    if args.no_heartbeats && matches!(*event, InspectionEvent::Heartbeat(_)) {
                        continue;
                    }
                    output::print_output(&render(&event, &global.output), global.quiet);
                    seen += 1;
                    if args.count.is_some_and(|max| seen >= max) {
                        return Ok(());
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "events lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use labelval_core::api::events::{RepeatNotice, StateChange};

    use super::*;

    #[test]
    fn summaries_name_the_event() {
        let change = InspectionEvent::StateChange(StateChange {
            from_state: "editing".into(),
            to_state: "running".into(),
        });
        assert_eq!(summary(&change), "stateChange   editing -> running");

        let end = InspectionEvent::LabelEnd(RepeatNotice {
            repeat: 12,
            position: None,
            repeat_width: None,
            repeat_height: None,
        });
        assert_eq!(summary(&end), "labelEnd      repeat 12");
    }

    #[test]
    fn json_lines_carry_kind_and_data() {
        let end = InspectionEvent::LabelEnd(RepeatNotice {
            repeat: 3,
            position: None,
            repeat_width: None,
            repeat_height: None,
        });
        let line = render(&end, &OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap_or_default();
        assert_eq!(value["kind"], "labelEnd");
        assert_eq!(value["data"]["repeat"], 3);
        assert!(!line.contains('\n'));
    }
}

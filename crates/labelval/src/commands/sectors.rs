//! Sector maintenance handlers.

use tabled::Tabled;

use labelval_core::api::models::JobSector;
use labelval_core::{DeviceController, VerifySector};

use crate::cli::{GlobalOpts, SectorsArgs, SectorsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct SectorRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    sector_type: String,
    #[tabled(rename = "Symbology")]
    symbology: String,
    #[tabled(rename = "Sequencing")]
    sequencing: bool,
}

impl From<&JobSector> for SectorRow {
    fn from(s: &JobSector) -> Self {
        Self {
            name: s.name.clone(),
            sector_type: s.sector_type.clone().unwrap_or_default(),
            symbology: s.symbology.clone().unwrap_or_default(),
            sequencing: s
                .match_settings
                .as_ref()
                .is_some_and(|m| m.is_sequencing()),
        }
    }
}

#[derive(Tabled)]
struct CreatedRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    sector_type: String,
    #[tabled(rename = "Symbology")]
    symbology: String,
    #[tabled(rename = "Top")]
    top: i32,
    #[tabled(rename = "Left")]
    left: i32,
    #[tabled(rename = "Height")]
    height: i32,
    #[tabled(rename = "Width")]
    width: i32,
    #[tabled(rename = "Standard")]
    standard: String,
}

impl From<&VerifySector> for CreatedRow {
    fn from(s: &VerifySector) -> Self {
        Self {
            name: s.name.clone(),
            sector_type: s.sector_type.clone(),
            symbology: s.symbology.clone(),
            top: s.top,
            left: s.left,
            height: s.height,
            width: s.width,
            standard: if s.grading_standard.enabled {
                format!("{} {}", s.grading_standard.standard, s.grading_standard.table_id)
            } else {
                "-".into()
            },
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    controller: &DeviceController,
    args: SectorsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SectorsCommand::List => {
            let job = controller.job().await?;
            let out = output::render_list(&global.output, &job.sectors, |s| SectorRow::from(s), |s| {
                s.name.clone()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        SectorsCommand::Clear => {
            if !util::confirm("Delete every sector of the loaded job?", global.yes)? {
                return Ok(());
            }
            let deleted = controller.delete_sectors().await?;
            output::print_output(&format!("deleted {deleted} sector(s)"), global.quiet);
            Ok(())
        }

        SectorsCommand::Add { name, from_file } => {
            let sector = util::read_json_file(&from_file)?;
            controller.add_sector(&name, sector.to_string()).await?;
            output::print_output(&format!("added sector {name}"), global.quiet);
            Ok(())
        }

        SectorsCommand::Create {
            standard,
            apply,
            wait,
        } => {
            let timeout = util::wait_or(&wait, controller.timeouts().detect);
            controller.detect_sectors(timeout).await?;
            let created = controller.sectors_from_detection(&standard);

            if apply {
                if !util::confirm("Replace the job's sectors with the detected ones?", global.yes)?
                {
                    return Ok(());
                }
                controller.delete_sectors().await?;
                for sector in &created {
                    controller.add_sector(&sector.name, sector.to_json()?).await?;
                }
                tracing::info!(count = created.len(), "sectors applied");
            }

            let out = output::render_list(&global.output, &created, |s| CreatedRow::from(s), |s| {
                s.name.clone()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

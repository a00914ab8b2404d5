//! Mode switch and print toggle handlers.

use labelval_core::DeviceController;

use crate::cli::{GlobalOpts, PrintArgs, Toggle, WaitArgs};
use crate::error::CliError;
use crate::output;

use super::util;

fn report_state(controller: &DeviceController, global: &GlobalOpts) {
    let color = output::should_color(&global.color);
    let status = controller.status();
    let line = match status.job_name {
        Some(job) => format!("{} ({job})", output::paint_state(status.state, color)),
        None => output::paint_state(status.state, color),
    };
    output::print_output(&line, global.quiet);
}

pub async fn edit(
    controller: &DeviceController,
    args: &WaitArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::wait_or(args, controller.timeouts().switch_to_edit);
    controller.switch_to_edit(timeout).await?;
    report_state(controller, global);
    Ok(())
}

pub async fn run_mode(
    controller: &DeviceController,
    args: &WaitArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::wait_or(args, controller.timeouts().switch_to_run);
    controller.switch_to_run(timeout).await?;
    report_state(controller, global);
    Ok(())
}

pub async fn print(
    controller: &DeviceController,
    args: &PrintArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let enabled = matches!(args.state, Toggle::On);
    controller.enable_print(enabled).await?;
    output::print_output(
        if enabled { "printing enabled" } else { "printing disabled" },
        global.quiet,
    );
    Ok(())
}

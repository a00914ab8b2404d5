//! Command dispatch: bridges CLI args -> controller operations -> output
//! formatting.

pub mod config_cmd;
pub mod devices;
pub mod mode;
pub mod node;
pub mod printer;
pub mod run;
pub mod sectors;
pub mod util;
pub mod watch;

use std::time::Duration;

use labelval_core::{DeviceController, NodeConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// How long to wait for the node's first heartbeat after login.
const HEARTBEAT_WAIT: Duration = Duration::from_secs(5);

/// Dispatch a node-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: NodeConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let controller = DeviceController::new(config)?;

    // Device discovery talks to the system service and needs no session.
    if let Command::Devices = cmd {
        return devices::handle(&controller, global).await;
    }

    let monitor = global.monitor || cmd.is_read_only();
    open_session(&controller, monitor).await?;
    let result = run_command(cmd, &controller, global).await;
    close_session(&controller).await;
    result
}

async fn run_command(
    cmd: Command,
    controller: &DeviceController,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Status => node::status(controller, global),
        Command::Job => node::job(controller, global).await,
        Command::Calibration => node::calibration(controller, global).await,
        Command::Inspect(args) => node::inspect(controller, &args, global).await,
        Command::Detect(args) => node::detect(controller, &args, global).await,
        Command::Read(args) => node::read(controller, &args, global).await,
        Command::Edit(args) => mode::edit(controller, &args, global).await,
        Command::RunMode(args) => mode::run_mode(controller, &args, global).await,
        Command::Print(args) => mode::print(controller, &args, global).await,
        Command::Sectors(args) => sectors::handle(controller, args, global).await,
        Command::Watch(args) => watch::handle(controller, &args, global).await,
        Command::Run(args) => run::handle(controller, args, global).await,
        Command::Devices | Command::Config(_) | Command::Completions(_) => Err(
            CliError::Internal("command is handled before a session is opened".into()),
        ),
    }
}

/// Log in and wait for the first heartbeat so the node's state is known.
async fn open_session(controller: &DeviceController, monitor: bool) -> Result<(), CliError> {
    controller.login(monitor).await?;
    if let Err(e) = controller.wait_for_heartbeat(HEARTBEAT_WAIT).await {
        close_session(controller).await;
        return Err(e.into());
    }
    Ok(())
}

async fn close_session(controller: &DeviceController) {
    if let Err(e) = controller.logout().await {
        tracing::warn!(error = %e, "logout failed");
    }
}

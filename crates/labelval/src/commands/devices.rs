//! Device discovery handler.

use tabled::Tabled;

use labelval_core::DeviceController;
use labelval_core::api::models::NodeDevice;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Camera")]
    camera: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&NodeDevice> for NodeRow {
    fn from(d: &NodeDevice) -> Self {
        Self {
            node: d.node_number.map_or_else(|| "-".into(), |n| n.to_string()),
            camera: d.camera_mac.clone().unwrap_or_else(|| "-".into()),
            enabled: d.enabled.map_or_else(|| "-".into(), |e| e.to_string()),
            state: d.state.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

pub async fn handle(controller: &DeviceController, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = controller.devices().await?;
    let out = output::render_list(&global.output, &devices.nodes, |d| NodeRow::from(d), |d| {
        d.node_number.map(|n| n.to_string()).unwrap_or_default()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

// System and reference-data endpoints.

use crate::client::NodeClient;
use crate::error::Error;
use crate::models::{Devices, Symbology};

impl NodeClient {
    /// Nodes attached to the verification system. Served on the system
    /// port, not the node port.
    ///
    /// `GET {system}/devices`
    pub async fn get_devices(&self) -> Result<Devices, Error> {
        self.get_json(self.system_url("devices")?).await
    }

    /// `GET /inspection/verify/symbologies`
    pub async fn get_symbologies(&self) -> Result<Vec<Symbology>, Error> {
        self.get_json(self.node_url("inspection/verify/symbologies")?).await
    }

    /// `GET /configuration/calibration`
    pub async fn get_calibration(&self) -> Result<serde_json::Value, Error> {
        self.get_json(self.node_url("configuration/calibration")?).await
    }
}

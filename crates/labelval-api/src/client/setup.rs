// Setup and repeat endpoints
//
// Image selection, inspection triggering, sector detection and the
// report/image pairs the node produces for each repeat.

use bytes::Bytes;

use crate::client::NodeClient;
use crate::error::Error;
use crate::models::AvailableRepeats;

impl NodeClient {
    /// Load a repeat from the node's image history into the editor.
    ///
    /// `PUT /inspection/setup/image?source=history&repeat={n}`
    pub async fn set_repeat(&self, repeat: u32) -> Result<(), Error> {
        let mut url = self.node_url("inspection/setup/image")?;
        url.query_pairs_mut()
            .append_pair("source", "history")
            .append_pair("repeat", &repeat.to_string());
        self.put_empty(url).await
    }

    /// Trigger an inspection of the current setup image. Completion is
    /// signalled by a `labelEnd` event, not by this call returning.
    ///
    /// `PUT /inspection/setup/inspect`
    pub async fn inspect(&self) -> Result<(), Error> {
        self.put_empty(self.node_url("inspection/setup/inspect")?).await
    }

    /// Report for the image currently in the editor.
    ///
    /// `GET /inspection/setup/report`
    pub async fn get_setup_report(&self) -> Result<serde_json::Value, Error> {
        self.get_json(self.node_url("inspection/setup/report")?).await
    }

    /// Report produced in run mode for a repeat.
    ///
    /// `GET /inspection/repeat/reports/{n}`
    pub async fn get_repeat_report(&self, repeat: u32) -> Result<serde_json::Value, Error> {
        let url = self.node_url(&format!("inspection/repeat/reports/{repeat}"))?;
        self.get_json(url).await
    }

    /// Captured image for a repeat. The node answers `410 Gone` once the
    /// image has been recycled.
    ///
    /// `GET /inspection/repeat/images/{n}?scale=1.0`
    pub async fn get_repeat_image(&self, repeat: u32) -> Result<Bytes, Error> {
        let mut url = self.node_url(&format!("inspection/repeat/images/{repeat}"))?;
        url.query_pairs_mut().append_pair("scale", "1.0");
        self.get_bytes(url).await
    }

    /// Current detection settings.
    ///
    /// `GET /inspection/setup/detect`
    pub async fn get_detect(&self) -> Result<serde_json::Value, Error> {
        self.get_json(self.node_url("inspection/setup/detect")?).await
    }

    /// Start sector detection on the current image. Results arrive as
    /// `setupDetect` events.
    ///
    /// `PUT /inspection/setup/detect`
    pub async fn detect(&self) -> Result<(), Error> {
        self.put_empty(self.node_url("inspection/setup/detect")?).await
    }

    /// Repeats the node still holds. The editor and run mode keep separate
    /// histories.
    ///
    /// `GET /inspection/repeat/available` when `running`, otherwise
    /// `GET /inspection/setup/image/available`.
    pub async fn available_repeats(&self, running: bool) -> Result<AvailableRepeats, Error> {
        let path = if running {
            "inspection/repeat/available"
        } else {
            "inspection/setup/image/available"
        };
        self.get_json(self.node_url(path)?).await
    }

    /// Release a consumed repeat so a paused job can continue.
    ///
    /// `DELETE /inspection/repeat/{n}`
    pub async fn remove_repeat(&self, repeat: u32) -> Result<(), Error> {
        let url = self.node_url(&format!("inspection/repeat/{repeat}"))?;
        self.delete(url).await
    }
}

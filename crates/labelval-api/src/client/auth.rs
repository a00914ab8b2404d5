// Session login/logout
//
// Login returns a token that is attached as the `Authorization` header to
// every later request and to the event-stream upgrade.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::auth::{AccessLevel, Credentials, LoginSession};
use crate::client::NodeClient;
use crate::error::Error;
use crate::models::LoginResponse;

impl NodeClient {
    /// Open a session on the node.
    ///
    /// `monitor` requests a read-only session; otherwise a control session
    /// is requested, which displaces any other control session. The token
    /// is kept on the client on success.
    ///
    /// `POST /security/login?monitor={0|1}&temporary=0`
    pub async fn login(
        &self,
        credentials: &Credentials,
        monitor: bool,
    ) -> Result<LoginSession, Error> {
        let mut url = self.node_url("security/login")?;
        url.query_pairs_mut()
            .append_pair("monitor", if monitor { "1" } else { "0" })
            .append_pair("temporary", "0");

        debug!(user = %credentials.username, monitor, "logging in at {}", url);

        let body = json!({
            "user": credentials.username,
            "password": credentials.password.expose_secret(),
        });

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!(
                    "{} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        let login: LoginResponse = Self::decode(&text)?;
        let requested = AccessLevel::from_monitor_flag(monitor);
        let access_level = login
            .access_level
            .as_deref()
            .and_then(AccessLevel::parse)
            .unwrap_or(requested);

        let token = SecretString::from(login.token);
        self.set_token(Some(token.clone()));

        debug!(%access_level, "login successful");
        Ok(LoginSession {
            access_level,
            token,
            user_id: login.id,
        })
    }

    /// End the current session. The local token is dropped even when the
    /// node rejects the call.
    ///
    /// `PUT /security/logout`
    pub async fn logout(&self) -> Result<(), Error> {
        let url = self.node_url("security/logout")?;
        let result = self.put_empty(url).await;
        self.set_token(None);
        debug!("logout complete");
        result
    }

    /// Ask the node to include extended grading data in reports.
    ///
    /// `PUT /inspection/setup/report/extendedData`
    pub async fn set_send_extended_data(&self, enabled: bool) -> Result<(), Error> {
        let url = self.node_url("inspection/setup/report/extendedData")?;
        self.put_json(url, &json!({ "enabled": enabled })).await
    }
}

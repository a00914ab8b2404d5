// ── Device controller ──
//
// Single source of truth for one node's operating state and job name.
// Combines command calls with waits on event-stream signals: every wait
// is a `watch` condition under an explicit timeout, never a spin.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::Bytes;
use labelval_api::events::{
    Detection, Heartbeat, RepeatNotice, SessionStateChange, SetupDetect, StateChange,
};
use labelval_api::models::{Devices, Job, Symbology};
use labelval_api::{
    AccessLevel, ConnectionState, EventStream, InspectionEvent, LoginSession, NodeClient,
    StreamFault,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, Timeouts};
use crate::error::CoreError;
use crate::sectors::{self, VerifySector};
use crate::state::{DeviceState, NodeStatus};

const EVENT_CHANNEL_SIZE: usize = 256;
const NOTICE_CHANNEL_SIZE: usize = 64;

// ── Notices ──────────────────────────────────────────────────────────

/// Controller-level notifications for operators and observers.
#[derive(Debug, Clone)]
pub enum Notice {
    /// The event stream dropped a frame or lost its connection.
    StreamFault(StreamFault),
    /// Another client opened a session at our access level; we were logged
    /// out locally.
    SessionTakenOver { access_level: AccessLevel },
    /// Informational status text.
    Status(String),
}

/// Receives every decoded event after the controller has applied it.
///
/// Called synchronously on the event-stream read loop, so implementations
/// must return quickly.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &InspectionEvent, status: &NodeStatus);
}

// ── Results ──────────────────────────────────────────────────────────

/// Report and captured image for one repeat.
#[derive(Debug, Clone, Serialize)]
pub struct RepeatReport {
    pub repeat: u32,
    pub report: serde_json::Value,
    /// `None` when the node had already recycled the image.
    #[serde(skip)]
    pub image: Option<Bytes>,
}

/// Everything `read` collects: the report pair plus the job it was graded
/// against.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    #[serde(flatten)]
    pub report: RepeatReport,
    pub job: Job,
}

// ── Controller ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct DetectProgress {
    /// Terminal `setupDetect` events seen.
    completed: u64,
    partial: Vec<Detection>,
    last: Option<SetupDetect>,
}

/// Controller for one verification node.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns one `NodeClient` and
/// one `EventStream`.
#[derive(Clone)]
pub struct DeviceController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: NodeConfig,
    client: NodeClient,
    stream: EventStream,
    status: watch::Sender<NodeStatus>,
    /// Bumped on every state transition; a job-name fetch only lands if
    /// no transition happened while it was in flight.
    state_epoch: AtomicU64,
    heartbeats: watch::Sender<u64>,
    label_ends: watch::Sender<u64>,
    detect: watch::Sender<DetectProgress>,
    session: ArcSwapOption<LoginSession>,
    last_monitor: AtomicBool,
    symbologies: ArcSwap<Vec<Symbology>>,
    observer: ArcSwapOption<Box<dyn EventObserver>>,
    events: broadcast::Sender<Arc<InspectionEvent>>,
    notices: broadcast::Sender<Notice>,
}

impl DeviceController {
    /// Create a controller. Does not connect; call [`login`](Self::login).
    pub fn new(config: NodeConfig) -> Result<Self, CoreError> {
        let client = NodeClient::new(config.endpoint.clone(), &config.transport)?;
        let stream = EventStream::new(config.endpoint.events_url()?, config.stream.clone());
        let (status, _) = watch::channel(NodeStatus::default());
        let (heartbeats, _) = watch::channel(0);
        let (label_ends, _) = watch::channel(0);
        let (detect, _) = watch::channel(DetectProgress::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                client,
                stream,
                status,
                state_epoch: AtomicU64::new(0),
                heartbeats,
                label_ends,
                detect,
                session: ArcSwapOption::empty(),
                last_monitor: AtomicBool::new(false),
                symbologies: ArcSwap::from_pointee(Vec::new()),
                observer: ArcSwapOption::empty(),
                events,
                notices,
            }),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.inner.config.timeouts
    }

    /// Raw command client, for operations the controller does not wrap.
    pub fn client(&self) -> &NodeClient {
        &self.inner.client
    }

    /// Stable identifier of the node, used as the device part of result keys.
    pub fn device_id(&self) -> String {
        self.inner.config.endpoint.to_string()
    }

    /// Snapshot of the node's state and job name.
    pub fn status(&self) -> NodeStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> DeviceState {
        self.inner.status.borrow().state
    }

    pub fn job_name(&self) -> Option<String> {
        self.inner.status.borrow().job_name.clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<NodeStatus> {
        self.inner.status.subscribe()
    }

    pub fn session(&self) -> Option<LoginSession> {
        self.inner.session.load_full().map(|s| (*s).clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session.load().is_some()
    }

    pub fn is_logged_in_control(&self) -> bool {
        self.inner
            .session
            .load()
            .as_ref()
            .is_some_and(|s| s.is_control())
    }

    pub fn stream_state(&self) -> ConnectionState {
        self.inner.stream.state()
    }

    /// Symbologies fetched at login.
    pub fn symbologies(&self) -> Arc<Vec<Symbology>> {
        self.inner.symbologies.load_full()
    }

    /// Detections from the most recent terminal `setupDetect`.
    pub fn last_detection(&self) -> Option<SetupDetect> {
        self.inner.detect.borrow().last.clone()
    }

    /// Every decoded event, after the controller applied it.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<InspectionEvent>> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Install the observer called for every event (one at a time; a new
    /// observer replaces the previous one).
    pub fn set_observer(&self, observer: impl EventObserver + 'static) {
        self.inner
            .observer
            .store(Some(Arc::new(Box::new(observer))));
    }

    pub fn clear_observer(&self) {
        self.inner.observer.store(None);
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Open a session, start the event stream and request extended report
    /// data.
    ///
    /// Logging in again replaces the previous session and restarts the
    /// stream with the new token.
    pub async fn login(&self, monitor: bool) -> Result<LoginSession, CoreError> {
        let inner = &self.inner;
        inner.stream.stop().await;

        let session = inner
            .client
            .login(&inner.config.credentials, monitor)
            .await?;
        inner.last_monitor.store(monitor, Ordering::SeqCst);
        inner.session.store(Some(Arc::new(session.clone())));
        inner.heartbeats.send_replace(0);

        self.register_handlers();
        if let Err(e) = inner.stream.start(inner.client.token()).await {
            inner.session.store(None);
            return Err(e.into());
        }

        // Monitor sessions may not change setup.
        if session.is_control() {
            if let Err(e) = inner.client.set_send_extended_data(true).await {
                self.abandon_login().await;
                return Err(e.into());
            }
        }

        match inner.client.get_symbologies().await {
            Ok(list) => inner.symbologies.store(Arc::new(list)),
            Err(e) => warn!(error = %e, "could not load symbologies"),
        }

        info!(
            node = %inner.config.endpoint,
            access_level = %session.access_level,
            "logged in"
        );
        Ok(session)
    }

    /// Undo a login that failed after the session was opened.
    async fn abandon_login(&self) {
        let inner = &self.inner;
        inner.stream.stop().await;
        inner.session.store(None);
        self.reset_status();
        if let Err(e) = inner.client.logout().await {
            debug!(error = %e, "logout after failed login failed");
        }
    }

    /// Close the stream, drop all handlers and end the session.
    pub async fn logout(&self) -> Result<(), CoreError> {
        self.inner.stream.close().await;
        self.inner.session.store(None);
        self.reset_status();
        if self.inner.client.is_authenticated() {
            self.inner.client.logout().await?;
        }
        info!(node = %self.inner.config.endpoint, "logged out");
        Ok(())
    }

    /// Tear the stream down and log in again at the last access level.
    pub async fn reconnect(&self) -> Result<LoginSession, CoreError> {
        let monitor = self.inner.last_monitor.load(Ordering::SeqCst);
        info!(node = %self.inner.config.endpoint, "reconnecting");
        self.login(monitor).await
    }

    /// Wait until the first heartbeat after login has been applied.
    pub async fn wait_for_heartbeat(&self, timeout: Duration) -> Result<NodeStatus, CoreError> {
        let mut rx = self.inner.heartbeats.subscribe();
        wait_until(&mut rx, timeout, "heartbeat", |n| *n > 0).await?;
        Ok(self.status())
    }

    // ── Composite operations ─────────────────────────────────────────

    /// Inspect the current setup image (after loading `repeat` when it is
    /// non-zero) and wait for the node's `labelEnd`.
    ///
    /// Only a `labelEnd` that arrives after the inspect command was issued
    /// counts.
    pub async fn inspect(&self, repeat: u32, timeout: Duration) -> Result<(), CoreError> {
        let client = &self.inner.client;
        if repeat > 0 {
            client.set_repeat(repeat).await?;
        }

        let mut label_ends = self.inner.label_ends.subscribe();
        let baseline = *label_ends.borrow_and_update();

        client.inspect().await?;
        debug!(repeat, "waiting for label end");
        wait_until(&mut label_ends, timeout, "inspect", |n| *n > baseline).await?;
        Ok(())
    }

    /// Run sector detection and wait for the terminal `setupDetect`.
    ///
    /// A timeout leaves the node's state untouched; the caller may retry.
    pub async fn detect_sectors(&self, timeout: Duration) -> Result<SetupDetect, CoreError> {
        let client = &self.inner.client;
        client.get_detect().await?;

        let mut detect = self.inner.detect.subscribe();
        let baseline = detect.borrow_and_update().completed;
        self.inner.detect.send_modify(|p| p.partial.clear());

        client.detect().await?;
        let progress =
            wait_until(&mut detect, timeout, "detect sectors", |p| p.completed > baseline).await?;

        Ok(progress.last.unwrap_or(SetupDetect {
            terminal: true,
            detections: Vec::new(),
        }))
    }

    /// Stop the job and wait for the node to report Editing.
    ///
    /// A no-op when already Editing; refused without waiting when Idle.
    pub async fn switch_to_edit(&self, timeout: Duration) -> Result<(), CoreError> {
        match self.state() {
            DeviceState::Idle => return Err(CoreError::DeviceIdle),
            DeviceState::Editing => return Ok(()),
            DeviceState::Running | DeviceState::Paused => {}
        }

        self.inner.client.stop_job().await?;
        let mut status = self.inner.status.subscribe();
        wait_until(&mut status, timeout, "switch to edit", |s| {
            s.state == DeviceState::Editing
        })
        .await?;
        Ok(())
    }

    /// Put the loaded job into run mode and wait for the node to report
    /// Running.
    ///
    /// A no-op when already Running; refused without waiting when Idle or
    /// when no job name is known. The node must also report run-ready.
    pub async fn switch_to_run(&self, timeout: Duration) -> Result<(), CoreError> {
        match self.state() {
            DeviceState::Idle => return Err(CoreError::DeviceIdle),
            DeviceState::Running => return Ok(()),
            DeviceState::Editing | DeviceState::Paused => {}
        }
        let job = self.job_name().ok_or(CoreError::NoJobName)?;

        let client = &self.inner.client;
        client.is_run_ready().await?;
        client.run_job(&job).await?;
        client.start_job().await?;

        let mut status = self.inner.status.subscribe();
        wait_until(&mut status, timeout, "switch to run", |s| {
            s.state == DeviceState::Running
        })
        .await?;
        Ok(())
    }

    /// Report for `repeat`: the setup report while Editing, otherwise the
    /// run-mode repeat report. The repeat image is fetched too; a recycled
    /// image (`410 Gone`) is not an error.
    pub async fn get_report(&self, repeat: u32) -> Result<RepeatReport, CoreError> {
        let client = &self.inner.client;
        let report = if self.state() == DeviceState::Editing {
            client.get_setup_report().await?
        } else {
            client.get_repeat_report(repeat).await?
        };

        let image = match client.get_repeat_image(repeat).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_gone() => {
                debug!(repeat, "repeat image already recycled");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(RepeatReport {
            repeat,
            report,
            image,
        })
    }

    /// Read whatever the node has available.
    ///
    /// With `repeat == 0` the first available repeat is used: the run-mode
    /// list while Running, the editor history otherwise (Paused included).
    /// While Editing the repeat is inspected first. A Paused job has the
    /// consumed repeat removed and is resumed so printing can continue.
    pub async fn read(&self, repeat: u32) -> Result<ReadResult, CoreError> {
        let client = &self.inner.client;
        let mut repeat = repeat;

        if repeat == 0 {
            let running = self.state() == DeviceState::Running;
            repeat = match client.available_repeats(running).await {
                Ok(available) => available.first().unwrap_or(0),
                // An empty body means nothing is available yet.
                Err(labelval_api::Error::NotJson { .. }) => 0,
                Err(e) => return Err(e.into()),
            };
            debug!(repeat, running, "resolved available repeat");
        }

        if self.state() == DeviceState::Editing && repeat != 0 {
            self.inspect(repeat, self.timeouts().inspect).await?;
        }

        let report = self.get_report(repeat).await?;
        let job = client.get_job().await?;

        if self.state() == DeviceState::Paused {
            client.remove_repeat(repeat).await?;
            client.resume_job().await?;
        }

        Ok(ReadResult { report, job })
    }

    // ── Job maintenance ──────────────────────────────────────────────

    pub async fn job(&self) -> Result<Job, CoreError> {
        Ok(self.inner.client.get_job().await?)
    }

    /// Delete every sector of the loaded job. Stops at the first failure.
    /// Returns how many sectors were deleted.
    pub async fn delete_sectors(&self) -> Result<usize, CoreError> {
        let job = self.inner.client.get_job().await?;
        for sector in &job.sectors {
            self.inner.client.delete_sector(&sector.name).await?;
        }
        Ok(job.sectors.len())
    }

    pub async fn add_sector(&self, name: &str, sector_json: String) -> Result<(), CoreError> {
        Ok(self.inner.client.add_sector(name, sector_json).await?)
    }

    /// Build verify sectors from the last detection for `grading_standard`.
    pub fn sectors_from_detection(&self, grading_standard: &str) -> Vec<VerifySector> {
        self.last_detection()
            .map(|d| sectors::create_sectors(&d, grading_standard, &self.symbologies()))
            .unwrap_or_default()
    }

    pub async fn enable_print(&self, enabled: bool) -> Result<(), CoreError> {
        Ok(self.inner.client.print_enable(enabled).await?)
    }

    pub async fn devices(&self) -> Result<Devices, CoreError> {
        Ok(self.inner.client.get_devices().await?)
    }

    pub async fn calibration(&self) -> Result<serde_json::Value, CoreError> {
        Ok(self.inner.client.get_calibration().await?)
    }

    // ── Event path ───────────────────────────────────────────────────

    /// Apply one event to the controller's state.
    ///
    /// This is the callback the event stream drives; it is public so that
    /// events can be replayed from other sources. Must run inside a Tokio
    /// runtime: job-name fetches and takeover logouts are spawned.
    pub fn handle_event(&self, event: &InspectionEvent) {
        match event {
            InspectionEvent::Heartbeat(hb) => self.apply_heartbeat(hb),
            // Same normalization path as a heartbeat.
            InspectionEvent::StateChange(sc) => self.apply_heartbeat(&sc.as_heartbeat()),
            InspectionEvent::SetupCapture(n) => debug!(repeat = n.repeat, "setup capture"),
            InspectionEvent::SetupDetect(d) => self.apply_detect(d),
            InspectionEvent::LabelEnd(n) => {
                debug!(repeat = n.repeat, "label end");
                self.inner.label_ends.send_modify(|count| *count += 1);
            }
            InspectionEvent::SessionStateChange(s) => self.apply_session_change(s),
        }

        if let Some(observer) = self.inner.observer.load_full() {
            let status = self.status();
            observer.on_event(event, &status);
        }

        let _ = self.inner.events.send(Arc::new(event.clone()));
    }

    fn apply_heartbeat(&self, hb: &Heartbeat) {
        self.inner.heartbeats.send_modify(|n| *n += 1);

        let Some(state) = DeviceState::from_wire(&hb.state) else {
            warn!(state = %hb.state, "unrecognised node state");
            return;
        };

        let mut epoch = 0;
        let changed = self.inner.status.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            s.state = state;
            if state == DeviceState::Idle {
                s.job_name = None;
            }
            epoch = self.inner.state_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            true
        });

        if changed {
            info!(%state, "node state changed");
            if state != DeviceState::Idle {
                self.spawn_job_name_fetch(epoch);
            }
        }
    }

    fn spawn_job_name_fetch(&self, epoch: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            let name = match this.inner.client.get_job().await {
                Ok(job) => Some(job.name),
                Err(e) => {
                    debug!(error = %e, "job name fetch failed");
                    None
                }
            };
            this.inner.status.send_if_modified(|s| {
                if this.inner.state_epoch.load(Ordering::SeqCst) != epoch || s.job_name == name {
                    return false;
                }
                s.job_name = name;
                true
            });
        });
    }

    fn apply_detect(&self, detect: &SetupDetect) {
        self.inner.detect.send_modify(|p| {
            if !detect.terminal {
                p.partial.extend(detect.detections.iter().cloned());
                return;
            }
            let detections = if detect.detections.is_empty() {
                std::mem::take(&mut p.partial)
            } else {
                p.partial.clear();
                detect.detections.clone()
            };
            debug!(count = detections.len(), "sector detection finished");
            p.last = Some(SetupDetect {
                terminal: true,
                detections,
            });
            p.completed += 1;
        });
    }

    fn apply_session_change(&self, change: &SessionStateChange) {
        if !change.is_opened() {
            return;
        }
        let Some(level) = change.level() else {
            return;
        };
        let Some(session) = self.inner.session.load_full() else {
            return;
        };
        if !session.is_superseded_by(level, &change.token) {
            return;
        }

        warn!(%level, "session taken over by another client, logging out");
        self.inner.session.store(None);
        self.reset_status();
        let _ = self
            .inner
            .notices
            .send(Notice::SessionTakenOver { access_level: level });

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.inner.client.logout().await {
                debug!(error = %e, "logout after takeover failed");
            }
            this.inner.stream.stop().await;
        });
    }

    fn handle_fault(&self, fault: &StreamFault) {
        let _ = self.inner.notices.send(Notice::StreamFault(fault.clone()));
        if !fault.is_disconnect() {
            return;
        }

        warn!(error = %fault, "event stream lost");
        if self.inner.config.reconnect_on_fault && self.is_logged_in() {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.reconnect().await {
                    warn!(error = %e, "reconnect failed");
                    let _ = this.inner.notices.send(Notice::Status(e.status()));
                }
            });
        }
    }

    fn reset_status(&self) {
        self.inner.status.send_modify(|s| {
            self.inner.state_epoch.fetch_add(1, Ordering::SeqCst);
            s.state = DeviceState::Idle;
            s.job_name = None;
        });
    }

    fn register_handlers(&self) {
        let stream = &self.inner.stream;
        let weak = Arc::downgrade(&self.inner);

        stream.on_heartbeat(forward(&weak, |e: &Heartbeat| InspectionEvent::Heartbeat(e.clone())));
        stream.on_state_change(forward(&weak, |e: &StateChange| {
            InspectionEvent::StateChange(e.clone())
        }));
        stream.on_setup_capture(forward(&weak, |e: &RepeatNotice| {
            InspectionEvent::SetupCapture(e.clone())
        }));
        stream.on_setup_detect(forward(&weak, |e: &SetupDetect| {
            InspectionEvent::SetupDetect(e.clone())
        }));
        stream.on_label_end(forward(&weak, |e: &RepeatNotice| {
            InspectionEvent::LabelEnd(e.clone())
        }));
        stream.on_session_state_change(forward(&weak, |e: &SessionStateChange| {
            InspectionEvent::SessionStateChange(e.clone())
        }));
        stream.on_fault(move |fault| {
            if let Some(inner) = weak.upgrade() {
                DeviceController { inner }.handle_fault(fault);
            }
        });
    }
}

impl std::fmt::Debug for DeviceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceController")
            .field("node", &self.inner.config.endpoint)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

/// Stream handler that re-enters the controller, if it is still alive.
fn forward<T: 'static>(
    weak: &Weak<ControllerInner>,
    wrap: fn(&T) -> InspectionEvent,
) -> impl Fn(&T) + Send + Sync + 'static {
    let weak = weak.clone();
    move |payload| {
        if let Some(inner) = weak.upgrade() {
            DeviceController { inner }.handle_event(&wrap(payload));
        }
    }
}

/// Wait until `pred` holds for the watched value, or fail with a timeout
/// naming `operation`.
async fn wait_until<T: Clone>(
    rx: &mut watch::Receiver<T>,
    timeout: Duration,
    operation: &'static str,
    pred: impl FnMut(&T) -> bool,
) -> Result<T, CoreError> {
    match tokio::time::timeout(timeout, rx.wait_for(pred)).await {
        Ok(Ok(value)) => Ok(value.clone()),
        Ok(Err(_)) | Err(_) => Err(CoreError::Timeout { operation }),
    }
}

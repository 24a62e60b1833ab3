//! The viewer's event loop: one [`Session`] over one transport.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use rfb_core::{
    Credentials, DISCONNECT_TIMEOUT, Framebuffer, RfbError, Session, SessionEvent,
    StaticCredentials, Transport, TransportEvent,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::ViewerConfig;

pub struct Viewer {
    session: Session<Framebuffer>,
    connect_timeout: Duration,
    frame_limit: Option<u64>,
}

impl Viewer {
    pub fn new(
        transport: Box<dyn Transport>,
        config: &ViewerConfig,
        frame_limit: Option<u64>,
    ) -> Result<Self, RfbError> {
        let credentials = Box::new(StaticCredentials(config.credentials.clone()));
        let session = Session::new(
            transport,
            Framebuffer::new(),
            credentials,
            config.session.clone(),
        )?;
        Ok(Self {
            session,
            connect_timeout: Duration::from_millis(config.network.timeout_ms),
            frame_limit,
        })
    }

    pub fn session(&self) -> &Session<Framebuffer> {
        &self.session
    }

    pub fn connect(&mut self, address: &str) -> Result<(), RfbError> {
        self.session.connect(address)
    }

    /// Pump `events` until the session is disconnected. Ctrl-C, the frame
    /// limit and the connect timeout all end the session with a local
    /// disconnect. Returns whether it ended cleanly.
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> bool {
        let deadline = Instant::now() + self.connect_timeout;
        let mut interrupted = false;

        loop {
            while let Some(event) = self.session.next_event() {
                self.on_event(event);
            }
            if self.session.state().is_disconnected() {
                return self.session.clean_disconnect();
            }
            self.check_frame_limit();

            let connecting = self.session.state().is_connecting();
            let disconnecting = self.session.state().is_disconnecting();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.session.handle_transport_event(event),
                    None => self.session.handle_transport_event(TransportEvent::Close {
                        code: None,
                        reason: "transport dropped".into(),
                    }),
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    info!("interrupted, disconnecting");
                    interrupted = true;
                    self.session.disconnect();
                }
                _ = sleep_until(deadline), if connecting => {
                    error!(timeout = ?self.connect_timeout, "connection timed out");
                    self.session.disconnect();
                }
                _ = sleep(DISCONNECT_TIMEOUT), if disconnecting => {
                    self.session.disconnect_timed_out();
                }
            }
        }
    }

    fn check_frame_limit(&mut self) {
        let Some(limit) = self.frame_limit else {
            return;
        };
        if self.session.state().is_connected() && self.session.display().frames() >= limit {
            info!(frames = limit, "frame limit reached, disconnecting");
            self.session.disconnect();
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connect => info!(
                width = self.session.width(),
                height = self.session.height(),
                "connected"
            ),
            SessionEvent::Disconnect { clean } => info!(clean, "disconnected"),
            SessionEvent::DesktopName(name) => info!(%name, "desktop name"),
            SessionEvent::Bell => info!("bell"),
            SessionEvent::Clipboard(text) => info!(len = text.len(), "server clipboard"),
            SessionEvent::SecurityFailure { status, reason } => {
                error!(status, reason = reason.as_deref().unwrap_or(""), "security failure");
            }
            SessionEvent::CredentialsRequired(fields) => {
                error!(%fields, "server asked for credentials that are not configured");
                self.session.disconnect();
            }
            SessionEvent::Capabilities(caps) => debug!(power = caps.power, "capabilities"),
            SessionEvent::Cursor(cursor) => debug!(?cursor, "cursor"),
            SessionEvent::ResizeFailed(reason) => warn!(%reason, "resize failed"),
        }
    }

    /// Answer a credentials prompt from somewhere other than the config.
    pub fn send_credentials(&mut self, credentials: Credentials) {
        self.session.send_credentials(credentials);
    }

    /// Write the framebuffer as a PPM image.
    pub fn write_snapshot(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        self.session.display().write_ppm(BufWriter::new(file))?;
        info!(path = %path.display(), "snapshot written");
        Ok(())
    }
}

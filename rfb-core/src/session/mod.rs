//! The RFB session engine.
//!
//! A [`Session`] owns the [`ByteChannel`], the connection state machine and
//! every decoder. It never performs I/O on its own: the embedder feeds it
//! [`TransportEvent`]s and calls the control methods, and the session reacts
//! by writing to the transport, drawing on the [`Display`] and queueing
//! [`SessionEvent`]s.
//!
//! ```text
//!  TransportEvent ──► handle_transport_event ──► ByteChannel ──► Handshake / dispatch
//!                                                                      │
//!                        drain_events ◄── SessionEvent ◄───────────────┤
//!                                                Display ◄─────────────┘
//! ```

mod cursor;
mod dispatch;
mod events;

pub use events::{Capabilities, CursorImage, SessionEvent};

use std::collections::VecDeque;

use tracing::{debug, error, info, warn};

use crate::channel::ByteChannel;
use crate::clipboard::{self, ClipboardActions, ClipboardFormats};
use crate::config::{SessionConfig, check_level};
use crate::credentials::{CredentialProvider, CredentialStore, Credentials};
use crate::decoder::{Decoders, Rect};
use crate::display::Display;
use crate::encodings::preferred_encodings;
use crate::error::RfbError;
use crate::handshake::{Handshake, Progress, ServerInit};
use crate::message::{self, PixelFormat};
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportEvent};

/// Servers with this name mishandle 24-bit colour.
const LOW_COLOR_SERVER: &str = "Intel(r) AMT KVM";

const XK_CONTROL_L: u32 = 0xffe3;
const XK_ALT_L: u32 = 0xffe9;
const XK_DELETE: u32 = 0xffff;

/// XVP version required for the power operations.
const XVP_POWER_VERSION: u8 = 1;
const XVP_SHUTDOWN: u8 = 2;
const XVP_REBOOT: u8 = 3;
const XVP_RESET: u8 = 4;

/// Progress through the FramebufferUpdate being received.
#[derive(Debug, Default)]
struct UpdateProgress {
    /// Header read, rects outstanding.
    in_progress: bool,
    rects: u16,
    /// Header of the rect being decoded, once read.
    rect: Option<Rect>,
}

/// Optional protocol features the server has shown it supports.
#[derive(Debug, Default)]
struct ServerSupport {
    fence: bool,
    continuous_updates: bool,
    continuous_updates_enabled: bool,
    set_desktop_size: bool,
    qemu_ext_key_event: bool,
    xvp_version: u8,
    screen_id: u32,
    screen_flags: u32,
}

/// Extended clipboard negotiation.
#[derive(Debug, Default)]
struct ClipboardState {
    server_actions: ClipboardActions,
    server_formats: ClipboardFormats,
    /// Text announced with `notify`, waiting for a `request`.
    local_text: Option<String>,
}

/// One RFB client connection.
pub struct Session<D: Display> {
    config: SessionConfig,
    chan: ByteChannel,
    display: D,
    credentials: CredentialStore,
    state: ConnectionState,
    clean_disconnect: bool,
    events: VecDeque<SessionEvent>,

    fbu: UpdateProgress,
    decoders: Decoders,
    /// Waiting for the display to finish rendering.
    flushing: bool,

    fb_width: u16,
    fb_height: u16,
    fb_depth: u8,
    fb_name: String,

    support: ServerSupport,
    clipboard: ClipboardState,
    capabilities: Capabilities,
    /// Resize asked for before the server announced ExtendedDesktopSize.
    pending_resize: Option<(u16, u16)>,
}

impl<D: Display> Session<D> {
    pub fn new(
        transport: Box<dyn Transport>,
        display: D,
        credentials: Box<dyn CredentialProvider>,
        config: SessionConfig,
    ) -> Result<Self, RfbError> {
        config.validate()?;
        Ok(Self {
            chan: ByteChannel::new(transport, &config.channel),
            config,
            display,
            credentials: CredentialStore::new(credentials),
            state: ConnectionState::Idle,
            clean_disconnect: true,
            events: VecDeque::new(),
            fbu: UpdateProgress::default(),
            decoders: Decoders::new(),
            flushing: false,
            fb_width: 0,
            fb_height: 0,
            fb_depth: 24,
            fb_name: String::new(),
            support: ServerSupport::default(),
            clipboard: ClipboardState::default(),
            capabilities: Capabilities::default(),
            pending_resize: None,
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn channel(&self) -> &ByteChannel {
        &self.chan
    }

    pub fn width(&self) -> u16 {
        self.fb_width
    }

    pub fn height(&self) -> u16 {
        self.fb_height
    }

    /// Colour depth requested from the server (24, or 8 in low colour mode).
    pub fn depth(&self) -> u8 {
        self.fb_depth
    }

    pub fn desktop_name(&self) -> &str {
        &self.fb_name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether the session ended without a failure. Meaningful once
    /// disconnected.
    pub fn clean_disconnect(&self) -> bool {
        self.clean_disconnect
    }

    pub fn view_only(&self) -> bool {
        self.config.view_only
    }

    pub fn set_view_only(&mut self, view_only: bool) {
        self.config.view_only = view_only;
    }

    /// Take every event raised so far, oldest first.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start connecting to `url`. The handshake begins once the transport
    /// reports [`TransportEvent::Open`].
    pub fn connect(&mut self, url: &str) -> Result<(), RfbError> {
        let handshake = Handshake::new(self.config.shared, self.config.repeater_id.clone());
        self.state.begin_connect(handshake)?;
        info!(url, "connecting");
        if let Err(e) = self.chan.transport_mut().open(url) {
            self.fail(&format!("error when opening socket ({e})"));
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection. `Disconnect` is raised once the transport
    /// reports it closed, or on [`disconnect_timed_out`](Self::disconnect_timed_out).
    pub fn disconnect(&mut self) {
        if let Err(e) = self.begin_disconnect() {
            debug!("{e}");
        }
    }

    /// The transport never reported close after [`disconnect`](Self::disconnect).
    pub fn disconnect_timed_out(&mut self) {
        if self.state.is_disconnecting() {
            error!("disconnection timed out");
            self.set_disconnected();
        }
    }

    /// Feed one notification from the transport.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state.is_connecting() {
                    debug!("starting VNC handshake");
                } else {
                    let details = format!("unexpected server connection while {}", self.state);
                    self.fail(&details);
                }
            }
            TransportEvent::Message(data) => self.receive(&data),
            TransportEvent::Close { code, reason } => self.handle_close(code, &reason),
            TransportEvent::Error(e) => warn!(error = %e, "transport error"),
        }
    }

    /// Re-supply credentials and retry the suspended handshake step.
    pub fn send_credentials(&mut self, credentials: Credentials) {
        self.credentials.supply(credentials);
        if self.state.is_connecting() {
            self.process();
        }
    }

    /// The display finished rendering; resume processing.
    pub fn flush_complete(&mut self) {
        self.flushing = false;
        if self.state.is_connected() && (self.fbu.in_progress || self.chan.available() > 0) {
            self.process();
        }
    }

    fn handle_close(&mut self, code: Option<u16>, reason: &str) {
        let mut msg = String::new();
        if let Some(code) = code {
            msg = format!("(code: {code}");
            if !reason.is_empty() {
                msg.push_str(&format!(", reason: {reason}"));
            }
            msg.push(')');
        }
        debug!(%msg, "transport closed");

        if self.state.is_connecting() {
            self.fail(&format!("connection closed {msg}"));
        } else if self.state.is_connected() {
            // Server-initiated disconnect.
            if let Err(e) = self.begin_disconnect() {
                error!("{e}");
            }
            self.set_disconnected();
        } else if self.state.is_disconnecting() {
            self.set_disconnected();
        } else if self.state.is_disconnected() {
            self.fail(&format!("unexpected server disconnect when already disconnected {msg}"));
        } else {
            self.fail(&format!("unexpected server disconnect before connecting {msg}"));
        }
    }

    fn begin_disconnect(&mut self) -> Result<(), RfbError> {
        let connected_for = self.state.connected_duration();
        self.state.begin_disconnect()?;
        debug!(?connected_for, "closing transport");
        self.chan.transport_mut().close();
        Ok(())
    }

    fn set_disconnected(&mut self) {
        match self.state.finish_disconnect() {
            Ok(()) => self.disconnected(),
            Err(e) => error!("{e}"),
        }
    }

    fn disconnected(&mut self) {
        self.flushing = false;
        info!(clean = self.clean_disconnect, "disconnected");
        self.events.push_back(SessionEvent::Disconnect {
            clean: self.clean_disconnect,
        });
    }

    /// Log, mark the disconnect unclean and go straight to `disconnected`.
    fn fail(&mut self, details: &str) {
        match self.state {
            ConnectionState::Disconnecting => error!("failed when disconnecting: {details}"),
            ConnectionState::Connected { .. } => error!("failed while connected: {details}"),
            ConnectionState::Connecting(_) => error!("failed when connecting: {details}"),
            _ => error!("RFB failure: {details}"),
        }
        self.clean_disconnect = false;
        if matches!(self.state, ConnectionState::Idle) {
            if self.state.abandon().is_ok() {
                self.disconnected();
            }
            return;
        }
        if let Err(e) = self.begin_disconnect() {
            debug!("{e}");
        }
        self.set_disconnected();
    }

    // ── Inbound processing ───────────────────────────────────────

    fn receive(&mut self, data: &[u8]) {
        if data.is_empty() {
            warn!("received an empty message");
            return;
        }
        if self.state.is_disconnected() {
            error!("got data while disconnected");
            return;
        }
        if let Err(e) = self.chan.enqueue(data) {
            self.fail(&e.to_string());
            return;
        }
        self.process();
    }

    fn process(&mut self) {
        if let Err(e) = self.process_buffered() {
            self.fail(&e.to_string());
        }
        self.chan.reset_if_drained();
    }

    fn process_buffered(&mut self) -> Result<(), RfbError> {
        loop {
            if self.state.is_connected() {
                return self.process_messages();
            }
            let Some(handshake) = self.state.handshake_mut() else {
                return Ok(());
            };
            let progress = handshake.advance(&mut self.chan, &mut self.credentials, &mut self.events)?;
            match progress {
                Progress::NeedMore => return Ok(()),
                Progress::Ready(init) => self.finish_handshake(init)?,
            }
        }
    }

    fn process_messages(&mut self) -> Result<(), RfbError> {
        while !self.flushing && (self.fbu.in_progress || self.chan.available() > 0) {
            if !self.normal_msg()? {
                break;
            }
        }
        Ok(())
    }

    fn finish_handshake(&mut self, init: ServerInit) -> Result<(), RfbError> {
        info!(
            width = init.width,
            height = init.height,
            name = %init.name,
            pixel_format = %init.pixel_format,
            "screen"
        );
        self.set_desktop_name(init.name);
        self.resize(init.width, init.height)?;

        if self.fb_name == LOW_COLOR_SERVER {
            warn!("Intel AMT KVM only supports 8/16 bit depths, using low color mode");
            self.fb_depth = 8;
        }

        self.chan
            .queue(&message::set_pixel_format(&PixelFormat::true_color(self.fb_depth)))?;
        self.queue_encodings()?;
        self.chan.queue(&message::framebuffer_update_request(
            false,
            0,
            0,
            self.fb_width,
            self.fb_height,
        ))?;
        self.chan.flush()?;

        self.credentials.clear();
        self.state.complete_handshake()?;
        info!("connected");
        self.events.push_back(SessionEvent::Connect);
        Ok(())
    }

    fn queue_encodings(&mut self) -> Result<(), RfbError> {
        let encodings = preferred_encodings(
            self.fb_depth,
            self.config.quality_level,
            self.config.compression_level,
        );
        self.chan.queue(&message::set_encodings(&encodings))
    }

    fn set_desktop_name(&mut self, name: String) {
        self.fb_name = name.clone();
        self.events.push_back(SessionEvent::DesktopName(name));
    }

    fn resize(&mut self, width: u16, height: u16) -> Result<(), RfbError> {
        self.fb_width = width;
        self.fb_height = height;
        self.display.resize(width, height);
        self.update_continuous_updates()
    }

    fn update_continuous_updates(&mut self) -> Result<(), RfbError> {
        if !self.support.continuous_updates_enabled {
            return Ok(());
        }
        self.chan.send(&message::enable_continuous_updates(
            true,
            0,
            0,
            self.fb_width,
            self.fb_height,
        ))
    }

    // ── Control surface ──────────────────────────────────────────

    fn accepts_input(&self) -> bool {
        self.state.is_connected() && !self.config.view_only
    }

    /// Send a key. With a scancode and a server that supports QEMU
    /// extended key events the scancode travels too; otherwise a plain
    /// KeyEvent is sent, unless `keysym` is 0.
    pub fn send_key(&mut self, keysym: u32, scancode: Option<u32>, down: bool) -> Result<(), RfbError> {
        if !self.accepts_input() {
            return Ok(());
        }
        match scancode.filter(|&s| s != 0 && self.support.qemu_ext_key_event) {
            Some(scancode) => {
                debug!(keysym, scancode, down, "sending extended key");
                self.chan
                    .send(&message::qemu_extended_key_event(keysym, down, scancode))
            }
            None => {
                if keysym == 0 {
                    return Ok(());
                }
                debug!(keysym, down, "sending keysym");
                self.chan.send(&message::key_event(keysym, down))
            }
        }
    }

    /// Key down followed by key up.
    pub fn send_key_press(&mut self, keysym: u32, scancode: Option<u32>) -> Result<(), RfbError> {
        self.send_key(keysym, scancode, true)?;
        self.send_key(keysym, scancode, false)
    }

    pub fn send_ctrl_alt_del(&mut self) -> Result<(), RfbError> {
        if !self.accepts_input() {
            return Ok(());
        }
        info!("sending Ctrl-Alt-Del");
        let keys = [
            (XK_CONTROL_L, 0x1d),
            (XK_ALT_L, 0x38),
            (XK_DELETE, 0xe053),
        ];
        for (keysym, scancode) in keys {
            self.send_key(keysym, Some(scancode), true)?;
        }
        for (keysym, scancode) in keys.into_iter().rev() {
            self.send_key(keysym, Some(scancode), false)?;
        }
        Ok(())
    }

    pub fn send_pointer(&mut self, x: u16, y: u16, button_mask: u8) -> Result<(), RfbError> {
        if !self.accepts_input() {
            return Ok(());
        }
        self.chan.send(&message::pointer_event(x, y, button_mask))
    }

    pub fn machine_shutdown(&mut self) -> Result<(), RfbError> {
        self.xvp_op(XVP_POWER_VERSION, XVP_SHUTDOWN)
    }

    pub fn machine_reboot(&mut self) -> Result<(), RfbError> {
        self.xvp_op(XVP_POWER_VERSION, XVP_REBOOT)
    }

    pub fn machine_reset(&mut self) -> Result<(), RfbError> {
        self.xvp_op(XVP_POWER_VERSION, XVP_RESET)
    }

    fn xvp_op(&mut self, version: u8, op: u8) -> Result<(), RfbError> {
        if !self.state.is_connected() || self.support.xvp_version < version {
            return Ok(());
        }
        info!(op, version, "sending XVP operation");
        self.chan.send(&message::xvp_op(version, op))
    }

    /// Offer `text` to the server's clipboard.
    pub fn clipboard_paste(&mut self, text: &str) -> Result<(), RfbError> {
        if !self.accepts_input() {
            return Ok(());
        }
        if self.clipboard.server_formats.contains(ClipboardFormats::TEXT)
            && self.clipboard.server_actions.contains(ClipboardActions::NOTIFY)
        {
            self.clipboard.local_text = Some(text.to_string());
            let payload = clipboard::notify_payload(ClipboardFormats::TEXT);
            return self.chan.send(&message::client_cut_text(&payload, true));
        }

        let latin1: Vec<u8> = text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        self.chan.send(&message::client_cut_text(&latin1, false))
    }

    /// Ask the server to change the desktop size.
    pub fn request_resize(&mut self, width: u16, height: u16) -> Result<(), RfbError> {
        if self.config.view_only {
            return Ok(());
        }
        if !self.state.is_connected() || !self.support.set_desktop_size {
            debug!(width, height, "remembering resize until the server supports it");
            self.pending_resize = Some((width, height));
            return Ok(());
        }
        self.send_resize(width, height)
    }

    fn send_resize(&mut self, width: u16, height: u16) -> Result<(), RfbError> {
        debug!(width, height, "requesting new desktop size");
        self.chan.send(&message::set_desktop_size(
            width,
            height,
            self.support.screen_id,
            self.support.screen_flags,
        ))
    }

    pub fn set_quality_level(&mut self, level: u8) -> Result<(), RfbError> {
        check_level("quality_level", level)?;
        if self.config.quality_level == level {
            return Ok(());
        }
        self.config.quality_level = level;
        self.resend_encodings()
    }

    pub fn set_compression_level(&mut self, level: u8) -> Result<(), RfbError> {
        check_level("compression_level", level)?;
        if self.config.compression_level == level {
            return Ok(());
        }
        self.config.compression_level = level;
        self.resend_encodings()
    }

    fn resend_encodings(&mut self) -> Result<(), RfbError> {
        if !self.state.is_connected() {
            return Ok(());
        }
        self.queue_encodings()?;
        self.chan.flush()
    }
}

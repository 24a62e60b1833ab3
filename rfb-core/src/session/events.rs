//! Notifications raised by a [`Session`](crate::Session).

use crate::credentials::CredentialFields;

/// Everything the embedding application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake finished; the session is connected.
    Connect,
    /// The session reached `disconnected`.
    Disconnect { clean: bool },
    Bell,
    /// Clipboard text received from the server.
    Clipboard(String),
    DesktopName(String),
    /// The server rejected authentication.
    SecurityFailure { status: u32, reason: Option<String> },
    /// The handshake is waiting for these fields; answer with
    /// [`Session::send_credentials`](crate::Session::send_credentials).
    CredentialsRequired(CredentialFields),
    Capabilities(Capabilities),
    Cursor(CursorImage),
    /// The server refused a resize this client asked for.
    ResizeFailed(String),
}

/// Optional server features surfaced to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// XVP power operations are available.
    pub power: bool,
}

/// A cursor shape sent by the server, as straight RGBA.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct CursorImage {
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    pub width: u16,
    pub height: u16,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for CursorImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorImage")
            .field("hotspot", &(self.hotspot_x, self.hotspot_y))
            .field("size", &(self.width, self.height))
            .field("rgba_len", &self.rgba.len())
            .finish()
    }
}

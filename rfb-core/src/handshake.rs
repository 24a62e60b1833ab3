//! Connection setup: version exchange, security negotiation,
//! authentication and the ClientInit/ServerInit exchange.
//!
//! ```text
//!  ProtocolVersion ──► Security ──► Authentication ──► SecurityResult ──► ClientInit ──► ServerInit
//!        │ ▲              │          │  ▲      │             │
//!        └─┘ repeater     │          └──┘      │             │
//!                         ▼     (XVP → VNC,    ▼             ▼
//!                   SecurityReason  Tight sub-auth)    SecurityReason (3.8+)
//! ```
//!
//! Every step either completes and moves on, or leaves the channel exactly
//! as it found it (rewinding with a backtrack where it already read a
//! header) and reports that it needs more bytes.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info};

use crate::channel::ByteChannel;
use crate::cipher::vnc_des_response;
use crate::credentials::{CredentialFields, CredentialStore, Credentials};
use crate::error::RfbError;
use crate::message::{PixelFormat, SecurityType};
use crate::session::SessionEvent;

/// Length of the ProtocolVersion banner.
pub const BANNER_LEN: usize = 12;
/// Length of the repeater ID string, NUL-padded.
pub const REPEATER_ID_LEN: usize = 250;

/// VeNCrypt Plain subtype.
const VENCRYPT_PLAIN: u32 = 256;

/// Tight sub-authentication capabilities, matched by signature.
const TIGHT_SUB_AUTH: [(&str, SecurityType); 3] = [
    ("STDVNOAUTH__", SecurityType::None),
    ("STDVVNCAUTH_", SecurityType::VncAuth),
    ("TGHTULGNAUTH", SecurityType::TightUnixLogin),
];

// ── ProtocolVersion ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// Map the `xxx.yyy` part of a server banner. `None` for the repeater
    /// pseudo-version, `Err` for anything unknown.
    fn from_banner(version: &str) -> Result<Option<Self>, RfbError> {
        match version {
            "000.000" => Ok(None),
            "003.003" | "003.006" | "003.889" => Ok(Some(Self::V3_3)),
            "003.007" => Ok(Some(Self::V3_7)),
            "003.008" | "004.000" | "004.001" | "005.000" => Ok(Some(Self::V3_8)),
            other => Err(RfbError::UnsupportedVersion(other.to_string())),
        }
    }

    fn client_banner(self) -> &'static [u8; BANNER_LEN] {
        match self {
            Self::V3_3 => b"RFB 003.003\n",
            Self::V3_7 => b"RFB 003.007\n",
            Self::V3_8 => b"RFB 003.008\n",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V3_3 => write!(f, "3.3"),
            Self::V3_7 => write!(f, "3.7"),
            Self::V3_8 => write!(f, "3.8"),
        }
    }
}

// ── States ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    ProtocolVersion,
    Security,
    Authentication,
    SecurityResult,
    SecurityReason,
    ClientInit,
    ServerInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VeNCryptStep {
    Version,
    Ack,
    SubtypeCount,
    Subtypes(u8),
    Credentials,
}

/// What the server told us in ServerInit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

/// Result of driving the handshake with the bytes at hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Waiting for more bytes or for credentials.
    NeedMore,
    /// ServerInit has been read; the connection is ready.
    Ready(ServerInit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Wait,
}

// ── Handshake ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    state: HandshakeState,
    version: ProtocolVersion,
    scheme: SecurityType,
    /// Tight security is in use; also selects the extended ServerInit.
    tight: bool,
    vencrypt: VeNCryptStep,
    security_context: &'static str,
    security_status: u32,
    shared: bool,
    repeater_id: String,
}

impl Handshake {
    pub fn new(shared: bool, repeater_id: impl Into<String>) -> Self {
        Self {
            state: HandshakeState::ProtocolVersion,
            version: ProtocolVersion::V3_8,
            scheme: SecurityType::None,
            tight: false,
            vencrypt: VeNCryptStep::Version,
            security_context: "",
            security_status: 0,
            shared,
            repeater_id: repeater_id.into(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Negotiated version; meaningful once past `ProtocolVersion`.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Security scheme currently being negotiated.
    pub fn scheme(&self) -> SecurityType {
        self.scheme
    }

    /// Run as many steps as the buffered bytes allow.
    pub(crate) fn advance(
        &mut self,
        chan: &mut ByteChannel,
        creds: &mut CredentialStore,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Progress, RfbError> {
        loop {
            let step = match self.state {
                HandshakeState::ProtocolVersion => self.negotiate_version(chan)?,
                HandshakeState::Security => self.negotiate_security(chan)?,
                HandshakeState::Authentication => self.negotiate_authentication(chan, creds, events)?,
                HandshakeState::SecurityResult => self.handle_security_result(chan, events)?,
                HandshakeState::SecurityReason => self.handle_security_reason(chan, events)?,
                HandshakeState::ClientInit => {
                    chan.send(&[self.shared as u8])?;
                    self.state = HandshakeState::ServerInit;
                    Step::Continue
                }
                HandshakeState::ServerInit => match self.negotiate_server_init(chan)? {
                    Some(init) => return Ok(Progress::Ready(init)),
                    None => Step::Wait,
                },
            };
            if step == Step::Wait {
                return Ok(Progress::NeedMore);
            }
        }
    }

    // ── Version ──────────────────────────────────────────────────

    fn negotiate_version(&mut self, chan: &mut ByteChannel) -> Result<Step, RfbError> {
        if chan.wait_for(BANNER_LEN, 0)? {
            return Ok(Step::Wait);
        }
        let banner = chan.shift_string(BANNER_LEN)?;
        let server_version = banner.get(4..11).unwrap_or_default();

        let Some(version) = ProtocolVersion::from_banner(server_version)? else {
            let mut id = format!("ID:{}", self.repeater_id).into_bytes();
            id.resize(REPEATER_ID_LEN, 0);
            chan.send(&id)?;
            debug!("sent repeater ID");
            return Ok(Step::Continue);
        };

        self.version = version;
        chan.send(version.client_banner())?;
        info!(server = server_version, negotiated = %version, "protocol version");
        self.state = HandshakeState::Security;
        Ok(Step::Continue)
    }

    // ── Security ─────────────────────────────────────────────────

    fn negotiate_security(&mut self, chan: &mut ByteChannel) -> Result<Step, RfbError> {
        if self.version >= ProtocolVersion::V3_7 {
            if chan.wait_for(1, 0)? {
                return Ok(Step::Wait);
            }
            let count = chan.shift_u8()? as usize;
            if chan.wait_for(count, 1)? {
                return Ok(Step::Wait);
            }
            if count == 0 {
                self.security_failed("no security types", 1);
                return Ok(Step::Continue);
            }

            let offered = chan.shift_bytes(count)?.to_vec();
            debug!(types = ?offered, "server security types");
            let Some(chosen) = SecurityType::choose(&offered) else {
                return Err(RfbError::UnsupportedSecurity(offered));
            };
            chan.send(&[chosen.code() as u8])?;
            self.scheme = chosen;
        } else {
            if chan.wait_for(4, 0)? {
                return Ok(Step::Wait);
            }
            let code = chan.shift_u32()?;
            if code == 0 {
                self.security_failed("authentication scheme", 1);
                return Ok(Step::Continue);
            }
            self.scheme = SecurityType::from(code);
        }

        debug!(scheme = %self.scheme, "authenticating");
        self.state = HandshakeState::Authentication;
        Ok(Step::Continue)
    }

    fn security_failed(&mut self, context: &'static str, status: u32) {
        self.state = HandshakeState::SecurityReason;
        self.security_context = context;
        self.security_status = status;
    }

    fn handle_security_reason(
        &mut self,
        chan: &mut ByteChannel,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        if chan.wait_for(4, 0)? {
            return Ok(Step::Wait);
        }
        let len = chan.shift_u32()? as usize;
        let mut reason = None;
        if len > 0 {
            if chan.wait_for(len, 4)? {
                return Ok(Step::Wait);
            }
            reason = Some(chan.shift_utf8(len)?).filter(|r| !r.is_empty());
        }

        events.push_back(SessionEvent::SecurityFailure {
            status: self.security_status,
            reason: reason.clone(),
        });
        Err(RfbError::SecurityFailure {
            context: self.security_context,
            reason,
        })
    }

    fn handle_security_result(
        &mut self,
        chan: &mut ByteChannel,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        if chan.wait_for(4, 0)? {
            return Ok(Step::Wait);
        }
        let status = chan.shift_u32()?;
        if status == 0 {
            debug!("authentication OK");
            self.state = HandshakeState::ClientInit;
            return Ok(Step::Continue);
        }
        if self.version >= ProtocolVersion::V3_8 {
            self.security_failed("security result", status);
            return Ok(Step::Continue);
        }
        events.push_back(SessionEvent::SecurityFailure {
            status,
            reason: None,
        });
        Err(RfbError::SecurityFailure {
            context: "security result",
            reason: None,
        })
    }

    // ── Authentication ───────────────────────────────────────────

    fn negotiate_authentication(
        &mut self,
        chan: &mut ByteChannel,
        creds: &mut CredentialStore,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        match self.scheme {
            SecurityType::None => {
                self.state = if self.version >= ProtocolVersion::V3_8 {
                    HandshakeState::SecurityResult
                } else {
                    HandshakeState::ClientInit
                };
                Ok(Step::Continue)
            }
            SecurityType::Xvp => self.negotiate_xvp_auth(chan, creds, events),
            SecurityType::VncAuth => self.negotiate_vnc_auth(chan, creds, events),
            SecurityType::Tight => self.negotiate_tight_auth(chan),
            SecurityType::VeNCrypt => self.negotiate_vencrypt_auth(chan, creds, events),
            SecurityType::TightUnixLogin => self.negotiate_unix_auth(chan, creds, events),
            SecurityType::Other(code) => Err(RfbError::ProtocolViolation(format!(
                "unsupported auth scheme (scheme: {code})"
            ))),
        }
    }

    fn negotiate_xvp_auth(
        &mut self,
        chan: &mut ByteChannel,
        creds: &mut CredentialStore,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        let needed = CredentialFields::USERNAME | CredentialFields::PASSWORD | CredentialFields::TARGET;
        let Some(c) = require(creds, needed, events) else {
            return Ok(Step::Wait);
        };
        let username = c.username.as_deref().unwrap_or_default().as_bytes();
        let target = c.target.as_deref().unwrap_or_default().as_bytes();

        let mut msg = BytesMut::with_capacity(2 + username.len() + target.len());
        msg.put_u8(xvp_field_len("username", username)?);
        msg.put_u8(xvp_field_len("target", target)?);
        msg.put_slice(username);
        msg.put_slice(target);
        chan.send(&msg)?;

        self.scheme = SecurityType::VncAuth;
        Ok(Step::Continue)
    }

    fn negotiate_vnc_auth(
        &mut self,
        chan: &mut ByteChannel,
        creds: &mut CredentialStore,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        if chan.wait_for(16, 0)? {
            return Ok(Step::Wait);
        }
        let Some(c) = require(creds, CredentialFields::PASSWORD, events) else {
            return Ok(Step::Wait);
        };
        let password = c.password.clone().unwrap_or_default();

        let challenge = chan.shift_array::<16>()?;
        chan.send(&vnc_des_response(&password, &challenge))?;
        self.state = HandshakeState::SecurityResult;
        Ok(Step::Continue)
    }

    fn negotiate_unix_auth(
        &mut self,
        chan: &mut ByteChannel,
        creds: &mut CredentialStore,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        let needed = CredentialFields::USERNAME | CredentialFields::PASSWORD;
        let Some(c) = require(creds, needed, events) else {
            return Ok(Step::Wait);
        };
        chan.send(&user_password_message(c))?;
        self.state = HandshakeState::SecurityResult;
        Ok(Step::Continue)
    }

    fn negotiate_tight_auth(&mut self, chan: &mut ByteChannel) -> Result<Step, RfbError> {
        if !self.tight {
            if chan.wait_for(4, 0)? {
                return Ok(Step::Wait);
            }
            let tunnels = chan.shift_u32()? as usize;
            if tunnels > 0 && chan.wait_for(16 * tunnels, 4)? {
                return Ok(Step::Wait);
            }
            self.tight = true;
            if tunnels > 0 {
                negotiate_tight_tunnels(chan, tunnels)?;
            }
        }

        if chan.wait_for(4, 0)? {
            return Ok(Step::Wait);
        }
        let count = chan.shift_u32()? as usize;
        if count == 0 {
            // An empty list means no authentication.
            self.state = HandshakeState::SecurityResult;
            return Ok(Step::Continue);
        }
        if chan.wait_for(16 * count, 4)? {
            return Ok(Step::Wait);
        }

        let mut offered = Vec::with_capacity(count);
        for _ in 0..count {
            chan.skip(4)?; // capability code
            offered.push(chan.shift_string(12)?);
        }
        debug!(types = ?offered, "server Tight authentication types");

        let Some(chosen) = offered.iter().find_map(|sig| {
            TIGHT_SUB_AUTH
                .iter()
                .find(|(known, _)| known == sig)
                .map(|&(_, scheme)| scheme)
        }) else {
            return Err(RfbError::ProtocolViolation("no supported sub-auth types".into()));
        };

        chan.send(&chosen.code().to_be_bytes())?;
        debug!(scheme = %chosen, "selected Tight authentication type");
        match chosen {
            SecurityType::None => self.state = HandshakeState::SecurityResult,
            scheme => self.scheme = scheme,
        }
        Ok(Step::Continue)
    }

    fn negotiate_vencrypt_auth(
        &mut self,
        chan: &mut ByteChannel,
        creds: &mut CredentialStore,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Step, RfbError> {
        loop {
            match self.vencrypt {
                VeNCryptStep::Version => {
                    if chan.wait_for(2, 0)? {
                        return Ok(Step::Wait);
                    }
                    let major = chan.shift_u8()?;
                    let minor = chan.shift_u8()?;
                    if (major, minor) != (0, 2) {
                        return Err(RfbError::ProtocolViolation(format!(
                            "unsupported VeNCrypt version {major}.{minor}"
                        )));
                    }
                    chan.send(&[0, 2])?;
                    self.vencrypt = VeNCryptStep::Ack;
                }
                VeNCryptStep::Ack => {
                    if chan.wait_for(1, 0)? {
                        return Ok(Step::Wait);
                    }
                    let res = chan.shift_u8()?;
                    if res != 0 {
                        return Err(RfbError::ProtocolViolation(format!("VeNCrypt failure {res}")));
                    }
                    self.vencrypt = VeNCryptStep::SubtypeCount;
                }
                VeNCryptStep::SubtypeCount => {
                    if chan.wait_for(1, 0)? {
                        return Ok(Step::Wait);
                    }
                    let count = chan.shift_u8()?;
                    if count == 0 {
                        return Err(RfbError::ProtocolViolation("VeNCrypt subtypes empty".into()));
                    }
                    self.vencrypt = VeNCryptStep::Subtypes(count);
                }
                VeNCryptStep::Subtypes(count) => {
                    if chan.wait_for(4 * count as usize, 0)? {
                        return Ok(Step::Wait);
                    }
                    let mut subtypes = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        subtypes.push(chan.shift_u32()?);
                    }
                    if !subtypes.contains(&VENCRYPT_PLAIN) {
                        return Err(RfbError::ProtocolViolation(
                            "VeNCrypt Plain subtype not offered by server".into(),
                        ));
                    }
                    chan.send(&VENCRYPT_PLAIN.to_be_bytes())?;
                    self.vencrypt = VeNCryptStep::Credentials;
                }
                VeNCryptStep::Credentials => {
                    let needed = CredentialFields::USERNAME | CredentialFields::PASSWORD;
                    let Some(c) = require(creds, needed, events) else {
                        return Ok(Step::Wait);
                    };
                    chan.send(&user_password_message(c))?;
                    self.state = HandshakeState::SecurityResult;
                    return Ok(Step::Continue);
                }
            }
        }
    }

    // ── ServerInit ───────────────────────────────────────────────

    fn negotiate_server_init(&mut self, chan: &mut ByteChannel) -> Result<Option<ServerInit>, RfbError> {
        if chan.wait_for(24, 0)? {
            return Ok(None);
        }
        let width = chan.shift_u16()?;
        let height = chan.shift_u16()?;
        let pixel_format = PixelFormat::from_bytes(&chan.shift_array::<16>()?);
        let name_len = chan.shift_u32()? as usize;

        if chan.wait_for(name_len, 24)? {
            return Ok(None);
        }
        let name = chan.shift_utf8(name_len)?;

        if self.tight {
            if chan.wait_for(8, 24 + name_len)? {
                return Ok(None);
            }
            let server_messages = chan.shift_u16()? as usize;
            let client_messages = chan.shift_u16()? as usize;
            let encodings = chan.shift_u16()? as usize;
            chan.skip(2)?;

            // Capability records are not used.
            let total = (server_messages + client_messages + encodings) * 16;
            if chan.wait_for(total, 32 + name_len)? {
                return Ok(None);
            }
            chan.skip(total)?;
        }

        Ok(Some(ServerInit {
            width,
            height,
            pixel_format,
            name,
        }))
    }
}

/// Answer the tunnel capability list; only NOTUNNEL is acceptable.
fn negotiate_tight_tunnels(chan: &mut ByteChannel, count: usize) -> Result<(), RfbError> {
    let mut tunnels: HashMap<u32, (String, String)> = HashMap::with_capacity(count);
    for _ in 0..count {
        let code = chan.shift_u32()?;
        let vendor = chan.shift_string(4)?;
        let signature = chan.shift_string(8)?;
        tunnels.insert(code, (vendor, signature));
    }
    debug!(?tunnels, "server Tight tunnel types");

    // Siemens touch panels support NOTUNNEL without announcing it.
    if tunnels
        .get(&1)
        .is_some_and(|(v, s)| v == "SICR" && s == "SCHANNEL")
    {
        debug!("detected Siemens server, assuming NOTUNNEL support");
        tunnels.insert(0, ("TGHT".into(), "NOTUNNEL".into()));
    }

    match tunnels.get(&0) {
        Some((v, s)) if v == "TGHT" && s == "NOTUNNEL" => {
            chan.send(&0u32.to_be_bytes())?;
            Ok(())
        }
        Some(_) => Err(RfbError::ProtocolViolation(
            "client's tunnel type had the incorrect vendor or signature".into(),
        )),
        None => Err(RfbError::ProtocolViolation(
            "server wanted tunnels, but doesn't support the notunnel type".into(),
        )),
    }
}

/// Credentials from the store, or a credentials-required event.
fn require<'c>(
    creds: &'c mut CredentialStore,
    needed: CredentialFields,
    events: &mut VecDeque<SessionEvent>,
) -> Option<&'c Credentials> {
    let found = creds.require(needed);
    if found.is_none() {
        events.push_back(SessionEvent::CredentialsRequired(needed));
    }
    found
}

/// `u32 len(user), u32 len(pass), user, pass` in UTF-8.
/// XVP carries each field behind a single length byte.
fn xvp_field_len(field: &str, value: &[u8]) -> Result<u8, RfbError> {
    u8::try_from(value.len()).map_err(|_| {
        RfbError::InvalidArgument(format!(
            "XVP {field} is {} bytes, at most 255 fit",
            value.len()
        ))
    })
}

fn user_password_message(c: &Credentials) -> BytesMut {
    let user = c.username.as_deref().unwrap_or_default().as_bytes();
    let pass = c.password.as_deref().unwrap_or_default().as_bytes();
    let mut msg = BytesMut::with_capacity(8 + user.len() + pass.len());
    msg.put_u32(user.len() as u32);
    msg.put_u32(pass.len() as u32);
    msg.put_slice(user);
    msg.put_slice(pass);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::credentials::{NoCredentials, StaticCredentials};
    use crate::transport::{MemoryTransport, Transport};

    struct Harness {
        hs: Handshake,
        chan: ByteChannel,
        wire: MemoryTransport,
        creds: CredentialStore,
        events: VecDeque<SessionEvent>,
    }

    impl Harness {
        fn new(creds: CredentialStore) -> Self {
            let wire = MemoryTransport::new();
            let mut t = wire.clone();
            t.open("test").unwrap();
            Self {
                hs: Handshake::new(true, "1234"),
                chan: ByteChannel::new(Box::new(t), &ChannelConfig::default()),
                wire,
                creds,
                events: VecDeque::new(),
            }
        }

        fn feed(&mut self, bytes: &[u8]) -> Result<Progress, RfbError> {
            self.chan.enqueue(bytes).unwrap();
            self.hs.advance(&mut self.chan, &mut self.creds, &mut self.events)
        }
    }

    fn no_creds() -> CredentialStore {
        CredentialStore::new(Box::new(NoCredentials))
    }

    #[test]
    fn banner_versions() {
        assert_eq!(ProtocolVersion::from_banner("003.889").unwrap(), Some(ProtocolVersion::V3_3));
        assert_eq!(ProtocolVersion::from_banner("005.000").unwrap(), Some(ProtocolVersion::V3_8));
        assert_eq!(ProtocolVersion::from_banner("000.000").unwrap(), None);
        assert!(ProtocolVersion::from_banner("002.000").is_err());
    }

    #[test]
    fn newer_server_gets_3_8() {
        let mut h = Harness::new(no_creds());
        assert_eq!(h.feed(b"RFB 004.001\n").unwrap(), Progress::NeedMore);
        assert_eq!(h.wire.take_written(), b"RFB 003.008\n");
        assert_eq!(h.hs.state(), HandshakeState::Security);
    }

    #[test]
    fn repeater_banner_sends_padded_id() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 000.000\n").unwrap();
        let sent = h.wire.take_written();
        assert_eq!(sent.len(), REPEATER_ID_LEN);
        assert_eq!(&sent[..7], b"ID:1234");
        assert!(sent[7..].iter().all(|&b| b == 0));
        assert_eq!(h.hs.state(), HandshakeState::ProtocolVersion);
    }

    #[test]
    fn v3_3_none_skips_security_result() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.003\n").unwrap();
        h.wire.take_written();
        h.feed(&[0, 0, 0, 1]).unwrap();
        assert_eq!(h.hs.state(), HandshakeState::ServerInit);
        assert_eq!(h.wire.take_written(), vec![1]);
    }

    #[test]
    fn security_list_is_resumable() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n").unwrap();
        h.wire.take_written();
        h.feed(&[2, 2]).unwrap();
        assert_eq!(h.hs.state(), HandshakeState::Security);
        assert_eq!(h.chan.available(), 2);
        h.feed(&[1]).unwrap();
        assert_eq!(h.hs.scheme(), SecurityType::None);
        assert_eq!(h.wire.take_written(), vec![1]);
        assert_eq!(h.hs.state(), HandshakeState::SecurityResult);
    }

    #[test]
    fn vnc_auth_waits_for_password() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n\x01\x02").unwrap();
        h.wire.take_written();
        let challenge: Vec<u8> = (1..=16).collect();
        assert_eq!(h.feed(&challenge).unwrap(), Progress::NeedMore);
        assert_eq!(
            h.events.pop_back(),
            Some(SessionEvent::CredentialsRequired(CredentialFields::PASSWORD))
        );
        assert_eq!(h.chan.available(), 16);

        h.creds.supply(Credentials::password("password"));
        h.hs.advance(&mut h.chan, &mut h.creds, &mut h.events).unwrap();
        let sent = h.wire.take_written();
        assert_eq!(&sent[..4], &[0xab, 0xd2, 0x63, 0x95]);
        assert_eq!(h.hs.state(), HandshakeState::SecurityResult);
    }

    #[test]
    fn failed_result_reads_reason_on_3_8() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n\x01\x01").unwrap();
        let err = h.feed(&[0, 0, 0, 1, 0, 0, 0, 3, b'b', b'a', b'd']).unwrap_err();
        assert_eq!(
            err.to_string(),
            "security negotiation failed on security result (reason: bad)"
        );
        assert_eq!(
            h.events.pop_back(),
            Some(SessionEvent::SecurityFailure {
                status: 1,
                reason: Some("bad".into())
            })
        );
    }

    #[test]
    fn empty_type_list_reports_reason() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n").unwrap();
        let err = h.feed(&[0, 0, 0, 0, 2, b'n', b'o']).unwrap_err();
        assert!(matches!(
            err,
            RfbError::SecurityFailure { context: "no security types", .. }
        ));
    }

    #[test]
    fn unsupported_types_fail() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n").unwrap();
        let err = h.feed(&[2, 5, 6]).unwrap_err();
        assert!(matches!(err, RfbError::UnsupportedSecurity(t) if t == vec![5, 6]));
    }

    #[test]
    fn vencrypt_plain_flow() {
        let mut h = Harness::new(CredentialStore::new(Box::new(StaticCredentials(
            Credentials::user_password("al", "pw"),
        ))));
        h.feed(b"RFB 003.008\n\x01\x13").unwrap();
        assert_eq!(h.wire.take_written(), b"RFB 003.008\n\x13");

        h.feed(&[0, 2]).unwrap();
        assert_eq!(h.wire.take_written(), vec![0, 2]);
        h.feed(&[0, 2, 0, 0, 1, 0]).unwrap();
        h.feed(&[0, 0, 1, 3]).unwrap();
        let sent = h.wire.take_written();
        assert_eq!(&sent[..4], &[0, 0, 1, 0]);
        assert_eq!(&sent[4..], &[0, 0, 0, 2, 0, 0, 0, 2, b'a', b'l', b'p', b'w']);
        assert_eq!(h.hs.state(), HandshakeState::SecurityResult);
    }

    #[test]
    fn vencrypt_without_plain_fails() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n\x01\x13").unwrap();
        let err = h.feed(&[0, 2, 0, 1, 0, 0, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("Plain subtype"));
    }

    #[test]
    fn tight_siemens_tunnel_then_vnc_sub_auth() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n\x01\x10").unwrap();
        h.wire.take_written();

        let mut tunnels = vec![0, 0, 0, 1, 0, 0, 0, 1];
        tunnels.extend_from_slice(b"SICRSCHANNEL");
        h.feed(&tunnels).unwrap();
        assert_eq!(h.wire.take_written(), vec![0, 0, 0, 0]);

        let mut auth = vec![0, 0, 0, 2, 0, 0, 0, 9];
        auth.extend_from_slice(b"UNKNOWNAUTH_");
        auth.extend_from_slice(&[0, 0, 0, 2]);
        auth.extend_from_slice(b"STDVVNCAUTH_");
        h.feed(&auth).unwrap();
        assert_eq!(h.wire.take_written(), vec![0, 0, 0, 2]);
        assert_eq!(h.hs.scheme(), SecurityType::VncAuth);
        assert_eq!(h.hs.state(), HandshakeState::Authentication);
    }

    #[test]
    fn tight_without_notunnel_fails() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n\x01\x10").unwrap();
        let mut tunnels = vec![0, 0, 0, 1, 0, 0, 0, 7];
        tunnels.extend_from_slice(b"ABCDEFGHIJKL");
        assert!(h.feed(&tunnels).is_err());
    }

    #[test]
    fn xvp_sends_user_and_target_then_des() {
        let mut h = Harness::new(CredentialStore::new(Box::new(StaticCredentials(Credentials {
            username: Some("root".into()),
            password: Some("password".into()),
            target: Some("vm1".into()),
        }))));
        h.feed(b"RFB 003.008\n\x02\x02\x16").unwrap();
        let sent = h.wire.take_written();
        assert_eq!(&sent[12..], b"\x16\x04\x03rootvm1");
        assert_eq!(h.hs.scheme(), SecurityType::VncAuth);
    }

    #[test]
    fn xvp_rejects_overlong_target() {
        let mut h = Harness::new(CredentialStore::new(Box::new(StaticCredentials(Credentials {
            username: Some("root".into()),
            password: Some("password".into()),
            target: Some("v".repeat(256)),
        }))));
        let err = h.feed(b"RFB 003.008\n\x02\x02\x16").unwrap_err();
        assert!(matches!(err, RfbError::InvalidArgument(ref m) if m.contains("target")));
        // only the version and the chosen security type went out
        assert_eq!(h.wire.take_written(), b"RFB 003.008\n\x16");
    }

    #[test]
    fn tight_server_init_skips_capabilities() {
        let mut h = Harness::new(no_creds());
        h.feed(b"RFB 003.008\n\x01\x10").unwrap();
        h.feed(&[0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        h.feed(&[0, 0, 0, 0]).unwrap();
        assert_eq!(h.hs.state(), HandshakeState::ServerInit);

        let mut init = vec![0, 10, 0, 20];
        init.extend_from_slice(&[32, 24, 0, 1, 0, 255, 0, 255, 0, 255, 16, 8, 0, 0, 0, 0]);
        init.extend_from_slice(&[0, 0, 0, 1, b'x']);
        init.extend_from_slice(&[0, 1, 0, 0, 0, 1, 0, 0]);
        assert_eq!(h.feed(&init).unwrap(), Progress::NeedMore);
        assert_eq!(h.chan.available(), init.len());

        let progress = h.feed(&[0u8; 32]).unwrap();
        let Progress::Ready(server) = progress else {
            panic!("expected ServerInit, got {progress:?}");
        };
        assert_eq!((server.width, server.height), (10, 20));
        assert_eq!(server.name, "x");
        assert_eq!(server.pixel_format.depth, 24);
        assert_eq!(h.chan.available(), 0);
    }
}

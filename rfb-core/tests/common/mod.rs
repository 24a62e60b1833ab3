//! Scripted-server helpers shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use rfb_core::display::BYTES_PER_PIXEL;
use rfb_core::encodings::preferred_encodings;
use rfb_core::message::{self, PixelFormat};
use rfb_core::{
    Color, CredentialProvider, Display, Framebuffer, ImageKind, MemoryTransport, NoCredentials,
    Session, SessionConfig, SessionEvent, TransportEvent,
};

pub const WIDTH: u16 = 32;
pub const HEIGHT: u16 = 32;
pub const NAME: &str = "test desktop";

// ── Server side ──────────────────────────────────────────────────

pub fn server_init(width: u16, height: u16, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&[32, 24, 0, 1, 0, 255, 0, 255, 0, 255, 16, 8, 0, 0, 0, 0]);
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

/// RFB 3.8 with security type None, up to and including ServerInit.
pub fn none_handshake(width: u16, height: u16, name: &str) -> Vec<u8> {
    let mut out = b"RFB 003.008\n".to_vec();
    out.extend_from_slice(&[1, 1]);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&server_init(width, height, name));
    out
}

/// What the client sends right after ServerInit.
pub fn client_setup(depth: u8, width: u16, height: u16) -> Vec<u8> {
    let config = SessionConfig::default();
    let mut out = message::set_pixel_format(&PixelFormat::true_color(depth)).to_vec();
    out.extend_from_slice(&message::set_encodings(&preferred_encodings(
        depth,
        config.quality_level,
        config.compression_level,
    )));
    out.extend_from_slice(&message::framebuffer_update_request(false, 0, 0, width, height));
    out
}

/// Builds one FramebufferUpdate message.
pub struct Update {
    buf: Vec<u8>,
}

impl Update {
    pub fn new(rects: u16) -> Self {
        let mut buf = vec![0, 0];
        buf.extend_from_slice(&rects.to_be_bytes());
        Self { buf }
    }

    pub fn rect(mut self, x: u16, y: u16, w: u16, h: u16, encoding: i32, payload: &[u8]) -> Self {
        for v in [x, y, w, h] {
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
        self.buf.extend_from_slice(&encoding.to_be_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

pub fn solid(w: u16, h: u16, color: Color) -> Vec<u8> {
    color.repeat(w as usize * h as usize)
}

/// ServerCutText; a negative length marks an extended clipboard payload.
pub fn server_cut_text(data: &[u8], extended: bool) -> Vec<u8> {
    let len = data.len() as i32;
    let mut out = vec![3, 0, 0, 0];
    out.extend_from_slice(&(if extended { -len } else { len }).to_be_bytes());
    out.extend_from_slice(data);
    out
}

pub fn server_fence(flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![248, 0, 0, 0];
    out.extend_from_slice(&flags.to_be_bytes());
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    out
}

// ── Client side ──────────────────────────────────────────────────

pub fn feed<D: Display>(session: &mut Session<D>, bytes: &[u8]) {
    session.handle_transport_event(TransportEvent::Message(Bytes::copy_from_slice(bytes)));
}

/// A session whose transport has just opened.
pub fn opened_with<D: Display>(
    display: D,
    credentials: Box<dyn CredentialProvider>,
    config: SessionConfig,
) -> (Session<D>, MemoryTransport) {
    let wire = MemoryTransport::new();
    let mut session = Session::new(Box::new(wire.clone()), display, credentials, config)
        .expect("valid config");
    session.connect("vnc://test:5900").expect("connect");
    session.handle_transport_event(TransportEvent::Open);
    (session, wire)
}

pub fn opened() -> (Session<Framebuffer>, MemoryTransport) {
    opened_with(Framebuffer::new(), Box::new(NoCredentials), SessionConfig::default())
}

/// A connected session with the handshake traffic and events cleared.
pub fn connected_with<D: Display>(display: D, config: SessionConfig) -> (Session<D>, MemoryTransport) {
    let (mut session, wire) = opened_with(display, Box::new(NoCredentials), config);
    feed(&mut session, &none_handshake(WIDTH, HEIGHT, NAME));
    assert!(session.state().is_connected(), "handshake did not finish");
    wire.take_written();
    session.drain_events();
    (session, wire)
}

pub fn connected() -> (Session<Framebuffer>, MemoryTransport) {
    connected_with(Framebuffer::new(), SessionConfig::default())
}

pub fn incremental_request() -> Vec<u8> {
    message::framebuffer_update_request(true, 0, 0, WIDTH, HEIGHT).to_vec()
}

// ── Displays ─────────────────────────────────────────────────────

/// A framebuffer whose frames can be held "still rendering".
#[derive(Default)]
pub struct SlowDisplay {
    pub inner: Framebuffer,
    pub pending: bool,
    pub flushes: usize,
    pub images: Vec<(ImageKind, Vec<u8>)>,
}

impl Display for SlowDisplay {
    fn resize(&mut self, width: u16, height: u16) {
        self.inner.resize(width, height);
    }

    fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, color: Color) {
        self.inner.fill_rect(x, y, width, height, color);
    }

    fn blit_image(&mut self, x: u16, y: u16, width: u16, height: u16, data: &[u8]) {
        assert_eq!(data.len(), width as usize * height as usize * BYTES_PER_PIXEL);
        self.inner.blit_image(x, y, width, height, data);
    }

    fn copy_image(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16) {
        self.inner.copy_image(src_x, src_y, x, y, width, height);
    }

    fn start_tile(&mut self, x: u16, y: u16, width: u16, height: u16, background: Color) {
        self.inner.start_tile(x, y, width, height, background);
    }

    fn sub_tile(&mut self, x: u8, y: u8, width: u8, height: u8, color: Color) {
        self.inner.sub_tile(x, y, width, height, color);
    }

    fn finish_tile(&mut self) {
        self.inner.finish_tile();
    }

    fn image_rect(&mut self, x: u16, y: u16, width: u16, height: u16, kind: ImageKind, data: &[u8]) {
        self.images.push((kind, data.to_vec()));
        self.inner.image_rect(x, y, width, height, kind, data);
    }

    fn flip(&mut self) {
        self.inner.flip();
    }

    fn pending(&self) -> bool {
        self.pending
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// Pull every event, dropping `DesktopName` noise when asked.
pub fn events_without_name<D: Display>(session: &mut Session<D>) -> Vec<SessionEvent> {
    session
        .drain_events()
        .into_iter()
        .filter(|e| !matches!(e, SessionEvent::DesktopName(_)))
        .collect()
}

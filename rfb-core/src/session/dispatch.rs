//! Steady-state server message handling.
//!
//! Every handler returns `Ok(true)` once its message is fully consumed and
//! `Ok(false)` when it has to wait for more bytes, after rewinding the
//! channel to the start of whatever it could not finish.

use tracing::{debug, error, info, warn};

use super::cursor::{self, VMWARE_ALPHA, VMWARE_CLASSIC};
use super::{CursorImage, Session, SessionEvent};
use crate::clipboard::{self, ClipboardActions, ClipboardFormats, ExtendedClipboard};
use crate::decoder::{RECT_HEADER_LEN, Rect};
use crate::display::Display;
use crate::encodings::Encoding;
use crate::error::RfbError;
use crate::message::{self, FenceFlags, MAX_FENCE_PAYLOAD, ServerMessage};

/// ExtendedDesktopSize status codes for a resize this client requested.
fn resize_failure(status: u16) -> &'static str {
    match status {
        1 => "Resize is administratively prohibited",
        2 => "Out of resources",
        3 => "Invalid screen layout",
        _ => "Unknown reason",
    }
}

impl<D: Display> Session<D> {
    pub(super) fn normal_msg(&mut self) -> Result<bool, RfbError> {
        let msg_type = if self.fbu.in_progress {
            ServerMessage::FramebufferUpdate as u8
        } else {
            self.chan.shift_u8()?
        };

        let Ok(msg) = ServerMessage::try_from(msg_type) else {
            return Err(RfbError::ProtocolViolation(format!(
                "unexpected server message (type {msg_type})"
            )));
        };

        match msg {
            ServerMessage::FramebufferUpdate => {
                let done = self.framebuffer_update()?;
                if done && !self.support.continuous_updates_enabled {
                    self.chan.send(&message::framebuffer_update_request(
                        true,
                        0,
                        0,
                        self.fb_width,
                        self.fb_height,
                    ))?;
                }
                Ok(done)
            }
            ServerMessage::SetColorMapEntries => Err(RfbError::ProtocolViolation(
                "unexpected SetColorMapEntries message".into(),
            )),
            ServerMessage::Bell => {
                debug!("bell");
                self.events.push_back(SessionEvent::Bell);
                Ok(true)
            }
            ServerMessage::ServerCutText => self.handle_server_cut_text(),
            ServerMessage::EndOfContinuousUpdates => {
                let first = !self.support.continuous_updates;
                self.support.continuous_updates = true;
                self.support.continuous_updates_enabled = false;
                if first {
                    self.support.continuous_updates_enabled = true;
                    self.update_continuous_updates()?;
                    info!("enabling continuous updates");
                }
                Ok(true)
            }
            ServerMessage::ServerFence => self.handle_server_fence(),
            ServerMessage::Xvp => self.handle_xvp(),
        }
    }

    // ── FramebufferUpdate ────────────────────────────────────────

    fn framebuffer_update(&mut self) -> Result<bool, RfbError> {
        if !self.fbu.in_progress {
            if self.chan.wait_for(3, 1)? {
                return Ok(false);
            }
            self.chan.skip(1)?;
            self.fbu.rects = self.chan.shift_u16()?;
            self.fbu.in_progress = true;

            // Let the previous frame finish rendering first.
            if self.display.pending() {
                self.flushing = true;
                self.display.flush();
                return Ok(false);
            }
        }

        while self.fbu.rects > 0 {
            let rect = match self.fbu.rect {
                Some(rect) => rect,
                None => {
                    if self.chan.wait_for(RECT_HEADER_LEN, 0)? {
                        return Ok(false);
                    }
                    let rect = Rect::read(&mut self.chan)?;
                    self.fbu.rect = Some(rect);
                    rect
                }
            };

            if !self.handle_rect(&rect)? {
                return Ok(false);
            }

            self.fbu.rects -= 1;
            self.fbu.rect = None;
        }

        self.fbu.in_progress = false;
        self.display.flip();
        Ok(true)
    }

    fn handle_rect(&mut self, rect: &Rect) -> Result<bool, RfbError> {
        let encoding = Encoding::try_from(rect.encoding)
            .map_err(|_| RfbError::UnsupportedEncoding(rect.encoding))?;

        match encoding {
            Encoding::LastRect => {
                // Decremented to zero by the caller.
                self.fbu.rects = 1;
                Ok(true)
            }
            Encoding::VmwareCursor => self.handle_vmware_cursor(rect),
            Encoding::Cursor => self.handle_cursor(rect),
            Encoding::QemuExtendedKeyEvent => {
                self.support.qemu_ext_key_event = true;
                Ok(true)
            }
            Encoding::DesktopName => self.handle_desktop_name(),
            Encoding::DesktopSize => {
                self.resize(rect.width, rect.height)?;
                Ok(true)
            }
            Encoding::ExtendedDesktopSize => self.handle_extended_desktop_size(rect),
            encoding if encoding.is_pixel_data() => self.handle_data_rect(encoding, rect),
            // Ids only valid in SetEncodings, such as quality levels.
            _ => Err(RfbError::UnsupportedEncoding(rect.encoding)),
        }
    }

    fn handle_data_rect(&mut self, encoding: Encoding, rect: &Rect) -> Result<bool, RfbError> {
        let Some(decoder) = self.decoders.get_mut(encoding) else {
            return Err(RfbError::UnsupportedEncoding(rect.encoding));
        };
        decoder.decode_rect(rect, &mut self.chan, &mut self.display, self.fb_depth)
    }

    // ── Pseudo-encodings ─────────────────────────────────────────

    fn handle_vmware_cursor(&mut self, rect: &Rect) -> Result<bool, RfbError> {
        if self.chan.wait_for(2, 0)? {
            return Ok(false);
        }
        let cursor_type = self.chan.peek_u8()?;
        let pixels = rect.area();
        let len = match cursor_type {
            VMWARE_CLASSIC => pixels * 4 * 2,
            VMWARE_ALPHA => pixels * 4,
            other => {
                return Err(RfbError::Decode(format!(
                    "unsupported VMware cursor type {other}"
                )));
            }
        };
        if self.chan.wait_for(2 + len, 0)? {
            return Ok(false);
        }
        self.chan.skip(2)?;
        let data = self.chan.shift_bytes(len)?;
        let rgba = if cursor_type == VMWARE_CLASSIC {
            cursor::vmware_classic(data, pixels)
        } else {
            cursor::vmware_alpha(data)
        };
        self.update_cursor(rect, rgba);
        Ok(true)
    }

    fn handle_cursor(&mut self, rect: &Rect) -> Result<bool, RfbError> {
        let (w, h) = (rect.width as usize, rect.height as usize);
        let pixels_len = w * h * 4;
        let mask_len = w.div_ceil(8) * h;
        if self.chan.wait_for(pixels_len + mask_len, 0)? {
            return Ok(false);
        }
        let pixels = self.chan.shift_bytes(pixels_len)?.to_vec();
        let mask = self.chan.shift_bytes(mask_len)?;
        let rgba = cursor::rich_cursor(&pixels, mask, w, h);
        self.update_cursor(rect, rgba);
        Ok(true)
    }

    fn update_cursor(&mut self, rect: &Rect, rgba: Vec<u8>) {
        self.events.push_back(SessionEvent::Cursor(CursorImage {
            hotspot_x: rect.x,
            hotspot_y: rect.y,
            width: rect.width,
            height: rect.height,
            rgba,
        }));
    }

    fn handle_desktop_name(&mut self) -> Result<bool, RfbError> {
        if self.chan.wait_for(4, 0)? {
            return Ok(false);
        }
        let len = self.chan.shift_u32()? as usize;
        if self.chan.wait_for(len, 4)? {
            return Ok(false);
        }
        let name = self.chan.shift_utf8(len)?;
        self.set_desktop_name(name);
        Ok(true)
    }

    fn handle_extended_desktop_size(&mut self, rect: &Rect) -> Result<bool, RfbError> {
        if self.chan.wait_for(4, 0)? {
            return Ok(false);
        }
        let screens = self.chan.peek_u8()? as usize;
        if self.chan.wait_for(4 + screens * 16, 0)? {
            return Ok(false);
        }

        let first_update = !self.support.set_desktop_size;
        self.support.set_desktop_size = true;

        // number-of-screens, padding
        self.chan.skip(4)?;
        for i in 0..screens {
            if i == 0 {
                self.support.screen_id = self.chan.shift_u32()?;
                // x, y, width, height
                self.chan.skip(8)?;
                self.support.screen_flags = self.chan.shift_u32()?;
            } else {
                self.chan.skip(16)?;
            }
        }

        if first_update {
            if let Some((width, height)) = self.pending_resize.take() {
                self.send_resize(width, height)?;
            }
        }

        // x: who asked for the change (1 = this client); y: status
        if rect.x == 1 && rect.y != 0 {
            let reason = resize_failure(rect.y);
            warn!(reason, "server did not accept the resize request");
            self.events
                .push_back(SessionEvent::ResizeFailed(reason.to_string()));
        } else {
            self.resize(rect.width, rect.height)?;
        }
        Ok(true)
    }

    // ── ServerCutText ────────────────────────────────────────────

    fn handle_server_cut_text(&mut self) -> Result<bool, RfbError> {
        if self.chan.wait_for(7, 1)? {
            return Ok(false);
        }
        self.chan.skip(3)?;
        let len = self.chan.shift_i32()?;
        let size = len.unsigned_abs() as usize;
        if self.chan.wait_for(size, 8)? {
            return Ok(false);
        }

        if len >= 0 {
            let text = self.chan.shift_string(size)?;
            if !self.config.view_only {
                self.events.push_back(SessionEvent::Clipboard(text));
            }
            return Ok(true);
        }

        let payload = self.chan.shift_bytes(size)?.to_vec();
        self.handle_extended_clipboard(&payload)?;
        Ok(true)
    }

    fn handle_extended_clipboard(&mut self, payload: &[u8]) -> Result<(), RfbError> {
        let msg = ExtendedClipboard::parse(payload)?;

        if msg.actions.contains(ClipboardActions::CAPS) {
            let sizes = msg.caps_sizes();
            debug!(actions = ?msg.actions, ?sizes, "server clipboard capabilities");
            self.clipboard.server_formats = msg.formats;
            self.clipboard.server_actions = msg.actions;
            let caps = clipboard::caps_payload();
            return self.chan.send(&message::client_cut_text(&caps, true));
        }

        let known = [
            ClipboardActions::REQUEST,
            ClipboardActions::PEEK,
            ClipboardActions::NOTIFY,
            ClipboardActions::PROVIDE,
        ];
        if !known.contains(&msg.actions) {
            return Err(RfbError::ProtocolViolation(format!(
                "unexpected action in extended clipboard message: {:#x}",
                msg.actions.bits()
            )));
        }
        if self.config.view_only {
            return Ok(());
        }

        let server_actions = self.clipboard.server_actions;
        if msg.actions == ClipboardActions::REQUEST {
            if msg.formats.contains(ClipboardFormats::TEXT)
                && server_actions.contains(ClipboardActions::PROVIDE)
            {
                if let Some(text) = &self.clipboard.local_text {
                    let provide = clipboard::provide_payload(text)?;
                    self.chan.send(&message::client_cut_text(&provide, true))?;
                }
            }
        } else if msg.actions == ClipboardActions::PEEK {
            if server_actions.contains(ClipboardActions::NOTIFY) {
                let formats = if self.clipboard.local_text.is_some() {
                    ClipboardFormats::TEXT
                } else {
                    ClipboardFormats::empty()
                };
                let notify = clipboard::notify_payload(formats);
                self.chan.send(&message::client_cut_text(&notify, true))?;
            }
        } else if msg.actions == ClipboardActions::NOTIFY {
            if server_actions.contains(ClipboardActions::REQUEST)
                && msg.formats.contains(ClipboardFormats::TEXT)
            {
                let request = clipboard::request_payload(ClipboardFormats::TEXT);
                self.chan.send(&message::client_cut_text(&request, true))?;
            }
        } else if msg.formats.contains(ClipboardFormats::TEXT) {
            // provide: the server's clipboard replaces whatever was
            // announced locally.
            self.clipboard.local_text = None;
            if let Some(text) = msg.provided_text()? {
                self.events.push_back(SessionEvent::Clipboard(text));
            }
        }
        Ok(())
    }

    // ── ServerFence ──────────────────────────────────────────────

    fn handle_server_fence(&mut self) -> Result<bool, RfbError> {
        if self.chan.wait_for(8, 1)? {
            return Ok(false);
        }
        self.chan.skip(3)?;
        let flags = FenceFlags::from_bits_retain(self.chan.shift_u32()?);
        let len = self.chan.shift_u8()? as usize;
        if self.chan.wait_for(len, 9)? {
            return Ok(false);
        }

        if len > MAX_FENCE_PAYLOAD {
            warn!(len, "bad payload length in fence request");
        }
        let payload = self.chan.shift_bytes(len)?.to_vec();
        self.support.fence = true;

        if !flags.contains(FenceFlags::REQUEST) {
            return Err(RfbError::ProtocolViolation(
                "unexpected fence response".into(),
            ));
        }

        // Messages are handled in order, which satisfies both block flags.
        let reply = flags & (FenceFlags::BLOCK_BEFORE | FenceFlags::BLOCK_AFTER);
        self.chan.send(&message::client_fence(reply, &payload))?;
        Ok(true)
    }

    // ── XVP ──────────────────────────────────────────────────────

    fn handle_xvp(&mut self) -> Result<bool, RfbError> {
        if self.chan.wait_for(3, 1)? {
            return Ok(false);
        }
        self.chan.skip(1)?;
        let version = self.chan.shift_u8()?;
        let msg = self.chan.shift_u8()?;

        match msg {
            0 => error!("XVP operation failed"),
            1 => {
                self.support.xvp_version = version;
                info!(version, "XVP extensions enabled");
                self.capabilities.power = true;
                self.events
                    .push_back(SessionEvent::Capabilities(self.capabilities));
            }
            other => {
                return Err(RfbError::ProtocolViolation(format!(
                    "illegal server XVP message (msg: {other})"
                )));
            }
        }
        Ok(true)
    }
}

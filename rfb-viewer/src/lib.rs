//! # rfb-viewer: headless VNC viewer
//!
//! Connects to an RFB server over TCP with `rfb-core`, renders into an
//! in-memory framebuffer, logs what the server does and can save the
//! final frame as a PPM image.

pub mod app;
pub mod config;

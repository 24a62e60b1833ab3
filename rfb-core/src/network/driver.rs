use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::display::{Display, FlushSignal};
use crate::session::{Session, SessionEvent};
use crate::transport::TransportEvent;

/// How long a local disconnect waits for the transport to report close.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Feed transport events into `session` until it reaches `disconnected`,
/// handing every [`SessionEvent`] to `on_event` as it is raised.
///
/// Displays with a [`FlushSignal`] resume the session as soon as they finish
/// rendering, even when the server has nothing more to send.
///
/// `on_event` gets the session back so it can answer, for instance with
/// [`Session::send_credentials`] or [`Session::disconnect`]. Returns whether
/// the session ended cleanly.
pub async fn drive<D, F>(
    session: &mut Session<D>,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    mut on_event: F,
) -> bool
where
    D: Display,
    F: FnMut(&mut Session<D>, SessionEvent),
{
    loop {
        while let Some(event) = session.next_event() {
            on_event(session, event);
        }
        if session.state().is_disconnected() {
            return session.clean_disconnect();
        }

        let disconnecting = session.state().is_disconnecting();
        let signal = session.display().flush_signal();
        let rendering = signal.is_some() && session.display().pending();

        let next = tokio::select! {
            next = events.recv() => next,
            _ = flushed(signal), if rendering => {
                // Notifications may be stale; trust the display.
                if !session.display().pending() {
                    session.flush_complete();
                }
                continue;
            }
            _ = tokio::time::sleep(DISCONNECT_TIMEOUT), if disconnecting => {
                session.disconnect_timed_out();
                continue;
            }
        };

        match next {
            Some(event) => session.handle_transport_event(event),
            None => {
                debug!("transport event channel closed");
                session.handle_transport_event(TransportEvent::Close {
                    code: None,
                    reason: "transport dropped".into(),
                });
            }
        }

        if session.display().pending() {
            continue;
        }
        // Displays without asynchronous rendering are done as soon as the
        // update is applied.
        session.flush_complete();
    }
}

async fn flushed(signal: Option<FlushSignal>) {
    match signal {
        Some(signal) => signal.flushed().await,
        None => std::future::pending().await,
    }
}

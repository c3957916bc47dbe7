//! Test harness shared by the nrelay and chorus test suites
//!
//! [`MockTransport`] stands in for the network: every relay is a
//! [`MockRelay`] living in-process, answering `REQ`/`CLOSE`/`EVENT` frames
//! the way a scripted nostr relay would. Nothing here touches a socket, so
//! tests can run under tokio's paused clock.

mod events;
mod mock;

pub use events::{contact_list, event, metadata, note_id, pubkey, text_note};
pub use mock::{CapabilitiesBehavior, MockRelay, MockTransport, ReqBehavior};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests (only runs once even if called multiple times)
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("nrelay=debug".parse().unwrap())
                    .add_directive("chorus=debug".parse().unwrap()),
            )
            .with_test_writer()
            .init();
    });
}

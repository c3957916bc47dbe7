mod args;
mod logging;
mod storage;

use std::sync::Arc;

use chorus::{
    EventCache, Identity, MergePolicy, Notification, NotificationReceiver, Orchestrator,
};
use nrelay::{RelayDescriptor, RelayPool};
use tracing::{debug, error, info, warn};

use crate::args::Args;
use crate::storage::{DataPath, Settings};

const PREVIEW_CHARS: usize = 80;

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(PREVIEW_CHARS).collect();
    if out.len() < content.len() {
        out.push('…');
    }
    out
}

/// Stand-in presentation layer: every notification becomes a log line
async fn present(mut rx: NotificationReceiver, cache: Arc<EventCache>) {
    while let Some(notification) = rx.recv().await {
        match &notification {
            Notification::NewEvent(ev) | Notification::RefreshedEvent(ev) => {
                let author = cache
                    .get_profile(&ev.pubkey)
                    .map(|p| p.display_name().to_owned())
                    .unwrap_or_else(|| ev.pubkey.hex());
                info!(
                    "{} {} ({}): {}",
                    notification.name(),
                    author,
                    ev.extra.get("when").unwrap_or("?"),
                    preview(&ev.content)
                );
            }
            Notification::ProfileUpdated(profile) => {
                info!("profile-updated {} {}", profile.display_name(), profile.npub);
            }
            Notification::ContactsChanged(following) => {
                info!("contacts-changed, following {}", following.len());
            }
            Notification::RelayHealth(health) => match serde_json::to_string(health) {
                Ok(json) => info!("relay-health {json}"),
                Err(err) => error!("could not encode relay health: {err}"),
            },
            Notification::Heartbeat(at) => debug!("heartbeat {at}"),
        }
    }
}

fn identity(args: &mut Args, settings: &Settings) -> Identity {
    if let Some(signer) = args.signer.take() {
        return Identity::with_signer(Arc::new(signer));
    }
    match args.pubkey.or(settings.pubkey) {
        Some(pk) => Identity::read_only(pk),
        None => Identity::anonymous(),
    }
}

#[tokio::main]
async fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let (mut args, unrecognized) = Args::parse(&argv);

    let path = args
        .datapath
        .as_deref()
        .map(DataPath::new)
        .unwrap_or_default();
    let _log_guard = logging::setup_logging(&path, args.debug);

    for arg in &unrecognized {
        warn!("ignoring unrecognized argument {arg}");
    }

    let settings = Settings::load(&path).unwrap_or_else(|err| {
        error!("could not load settings, using defaults: {err}");
        Settings::default()
    });

    let relays: Vec<RelayDescriptor> = if args.relays.is_empty() {
        settings.relays.clone()
    } else {
        args.relays
            .iter()
            .map(|url| RelayDescriptor::read_write(url.as_str()))
            .collect()
    };

    let identity = identity(&mut args, &settings);
    match identity.pubkey {
        Some(pk) => info!("running as {}", pk.to_bech().unwrap_or_else(|| pk.hex())),
        None => warn!("no pubkey configured, the feed will stay empty"),
    }

    let pool = Arc::new(RelayPool::default());
    let connected = pool.add_all(relays).await;
    info!("{connected} of {} relays connected", pool.len());

    let cache = Arc::new(EventCache::new());
    let (tx, rx) = chorus::notification::channel();
    let presenter = tokio::spawn(present(rx, Arc::clone(&cache)));

    let orch = Arc::new(Orchestrator::new(
        pool,
        cache,
        identity,
        settings.feed.clone(),
        tx,
    ));

    let following = orch.refresh_contact_profiles().await;
    info!("following {} accounts", following.len());
    orch.refresh_feed(MergePolicy::WithReposts).await;
    orch.subscribe_feed();
    orch.health_snapshot();
    orch.start_maintenance();

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("could not listen for ctrl-c: {err}");
    }

    info!("shutting down");
    orch.shutdown();
    presenter.abort();
}

//! Connection setup for host and client
//!
//! The host advertises a WebSocket URL in its offer. The client answers
//! with a random ticket, which is the only path the host will accept.
//! Offers for one-way mode carry a key, a nonce and a relay slug; the
//! client then publishes its encrypted answer to the relay instead of
//! printing it.

use anyhow::{bail, Context, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use peertty_core::pty::{CommandSpec, NativeSpawner};
use peertty_core::relay::{self, HttpRelay, SLUG_LEN};
use peertty_core::session::{ClientOptions, ClientSession, HostOptions, HostSession};
use peertty_core::signaling::{self, SessionDescription};
use peertty_core::transport::websocket::{self, WsListener};
use peertty_core::SessionResult;

use crate::config::{HostSettings, Settings};

/// Length of the client's connection ticket
const TICKET_LEN: usize = 32;

/// Build the host's offer for `url`.
///
/// One-way offers are encrypted under fresh keys and name a relay slot.
pub fn build_offer(url: &str, one_way: bool) -> Result<SessionDescription> {
    let mut offer = SessionDescription::new(url);
    if one_way {
        offer.generate_keys();
        offer.encrypt().context("Failed to encrypt offer")?;
        offer.relay_slug = Some(relay::random_slug(SLUG_LEN));
    }
    Ok(offer)
}

/// Decode an offer token, decrypting it when it carries keys
pub fn open_offer(token: &str) -> Result<SessionDescription> {
    let mut offer = signaling::decode(token).context("Failed to decode offer")?;
    if offer.is_encrypted() {
        offer.decrypt().context("Failed to decrypt offer")?;
    }
    Ok(offer)
}

/// Build the answer carrying `ticket`.
///
/// An answer to an encrypted offer is sealed with the offer's keys, which
/// are then stripped so they never travel back. Answers routed through a
/// relay are always sealed, so an offer naming a relay slot without keys
/// is refused.
pub fn build_answer(offer: &SessionDescription, ticket: &str) -> Result<SessionDescription> {
    let answer = SessionDescription::new(ticket);
    if !offer.is_encrypted() {
        if offer.relay_slug.is_some() {
            bail!("Offer names a relay slot but carries no keys; refusing to publish the answer unencrypted");
        }
        return Ok(answer);
    }
    let mut sealed = answer.with_keys_from(offer);
    sealed.encrypt().context("Failed to encrypt answer")?;
    Ok(sealed.without_keys())
}

/// Decode the client's answer to `offer`
pub fn open_answer(token: &str, offer: &SessionDescription) -> Result<SessionDescription> {
    let answer = signaling::decode(token).context("Failed to decode answer")?;
    if !offer.is_encrypted() {
        return Ok(answer);
    }
    let mut answer = answer.with_keys_from(offer);
    answer.decrypt().context("Failed to decrypt answer")?;
    Ok(answer)
}

/// Warning to show when the session channel is not encrypted
fn plaintext_warning(url: &str) -> Option<&'static str> {
    if url.starts_with("ws://") {
        Some("Warning: the session channel is unencrypted; keystrokes and output can be read on the network.\n")
    } else {
        None
    }
}

/// Host name to put in the offer
fn advertise_host(host: &HostSettings) -> String {
    if let Some(advertise) = &host.advertise {
        return advertise.clone();
    }
    if let Ok(addr) = host.listen.parse::<SocketAddr>() {
        if !addr.ip().is_unspecified() {
            return addr.ip().to_string();
        }
    }
    match local_ip_address::local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::debug!("Could not detect local address: {}", e);
            "127.0.0.1".to_string()
        }
    }
}

/// Share a terminal: publish an offer, wait for the answer, serve the session
pub async fn run_host(settings: &Settings, one_way: bool) -> Result<SessionResult> {
    let command = CommandSpec::from_argv(&settings.host.command).context("No command configured")?;

    println!("Setting up a peertty connection.\n");
    if one_way {
        println!(
            "Warning: one-way connections rely on a third party ({}) to exchange connection data.\n",
            settings.relay.url
        );
    }

    let listener = WsListener::bind(&settings.host.listen, &advertise_host(&settings.host))
        .await
        .with_context(|| format!("Failed to listen on {}", settings.host.listen))?;
    if let Some(warning) = plaintext_warning(listener.url()) {
        println!("{warning}");
    }
    let offer = build_offer(listener.url(), one_way)?;
    let token = signaling::encode(&offer)?;

    println!("Connection ready. Here is your connection data:\n\n{token}\n");
    println!("Run `peertty connect <data>` on the other machine.\n");

    let answer = match &offer.relay_slug {
        Some(slug) => {
            let store = HttpRelay::new(settings.relay.url.clone());
            let slug = slug.clone();
            let interval = settings.relay.poll_interval();
            let timeout = settings.relay.timeout();
            tracing::debug!(%slug, "Waiting for answer on relay");
            let body = tokio::task::spawn_blocking(move || {
                relay::poll_until_available(&store, &slug, interval, timeout)
            })
            .await?
            .context("Failed to fetch answer from relay")?;
            open_answer(&body, &offer)?
        }
        None => {
            println!("When you have the answer, paste it below and hit enter:");
            let line = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                io::stdin().read_line(&mut line).map(|_| line)
            })
            .await?
            .context("Failed to read answer")?;
            open_answer(&line, &offer)?
        }
    };

    println!("Answer received, connecting...");
    let connection = listener.accept(&answer.sdp).await?;
    println!("Terminal session started:");

    let options = HostOptions {
        command,
        non_interactive: settings.host.non_interactive,
        strict_protocol: settings.protocol.strict,
    };
    let session = HostSession::new(options, connection.channel, Arc::new(NativeSpawner));
    Ok(session.run(connection.events).await)
}

/// Join a shared terminal from its offer token
pub async fn run_client(settings: &Settings, offer_token: &str) -> Result<SessionResult> {
    let offer = open_offer(offer_token)?;
    let ticket = relay::random_slug(TICKET_LEN);
    let answer = build_answer(&offer, &ticket)?;
    let token = signaling::encode(&answer)?;

    match &offer.relay_slug {
        Some(slug) => {
            let store = HttpRelay::new(settings.relay.url.clone());
            let slug = slug.clone();
            tokio::task::spawn_blocking(move || relay::publish(&store, &slug, &token))
                .await?
                .context("Failed to publish answer to relay")?;
            println!("Answer sent through the relay, connecting...");
        }
        None => {
            println!("Answer ready. Paste it into the host terminal:\n\n{token}\n");
        }
    }

    let connection = websocket::connect(&offer.sdp, &ticket)
        .await
        .with_context(|| format!("Failed to connect to {}", offer.sdp))?;

    let options = ClientOptions {
        interactive: true,
        strict_protocol: settings.protocol.strict,
    };
    let session = ClientSession::new(options, connection.channel);
    Ok(session.run(connection.events).await)
}

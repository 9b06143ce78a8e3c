//! Dialpad embed demo - runs the client against an in-process host.
//!
//! Performs the handshake an embedded app does on load, fetches the session
//! data, then subscribes to call state and prints one event.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dialpad_embed::{
    Client, ClientConfig, IdentityCheck, LoopbackHost, MpscTransport, SchedulerKind,
    SubscriptionCallback,
};
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "dialpad-embed")]
#[command(version)]
#[command(about = "Exercise the embedded-app protocol client against a loopback host")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scheduling policy (reject_conflict or queue)
    #[arg(long)]
    scheduler: Option<SchedulerKind>,

    /// Inbound client_uid check (strict or legacy)
    #[arg(long)]
    identity_check: Option<IdentityCheck>,

    /// Default request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(scheduler) = cli.scheduler {
        config.scheduler = scheduler;
    }
    if let Some(check) = cli.identity_check {
        config.identity_check = check;
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout_ms = ms;
    }

    log::info!(
        "Starting {} (scheduler={}, environment={})",
        config.client_uid,
        config.scheduler,
        dialpad_embed::env::Environment::current()
    );

    let (transport, outbound_rx) = MpscTransport::pair();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let host = LoopbackHost::new(config.host_origin.clone(), inbound_tx)
        .with_fixture("get/user", json!({ "id": 1, "display_name": "Demo User" }))
        .with_fixture("get/contact", json!({ "id": 42, "name": "Ada Lovelace" }))
        .with_fixture("get/call", json!({ "id": 7, "state": "connected" }));
    let _host_task = host.serve(outbound_rx);

    let mut client = Client::new(&config, Arc::new(transport));
    client.listen(inbound_rx);

    let init = client.init().await.context("Handshake failed")?;
    println!("init: {init}");

    let contact = client.get_current_contact();
    let user = client.get_current_user();
    let call = client.get_current_call();
    let (contact, user, call) = tokio::try_join!(contact, user, call)?;
    println!("contact: {contact}");
    println!("user: {user}");
    println!("call: {call}");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let on_call = SubscriptionCallback::new(move |content| {
        let _ = event_tx.send(content.clone());
    });
    client
        .on_call_state(&on_call)?
        .await
        .context("Subscription was not acknowledged")?;

    host.emit("on/call", &json!({ "id": 7, "state": "hangup" }));
    let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
        .await
        .context("No call event arrived")?;
    if let Some(event) = event {
        println!("call event: {event}");
    }

    client.off_call_state(&on_call)?.await?;

    let toast = client
        .send_toast(
            |reply| log::info!("Toast answered with status {:?}", reply.status_code),
            json!({ "text": "Demo finished" }),
        )
        .await?;
    println!("toast: {toast}");

    Ok(())
}

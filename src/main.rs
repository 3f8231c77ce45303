use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use axon::bus::EventBus;
use axon::cli::Cli;
use axon::config::Settings;
use axon::domain::RawEvent;
use axon::manager::SessionManager;
use axon::persistence::SessionRepository;
use axon::runtime::TransformEngine;

/// One line of raw-event input: an agent id plus the event itself
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngressRecord {
    agent_id: String,
    #[serde(flatten)]
    event: RawEvent,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;

    let storage = settings.storage.build().await?;
    let repository = Arc::new(SessionRepository::new(storage));
    let bus = EventBus::new(settings.bus.to_bus_config());
    let engine = Arc::new(TransformEngine::new());
    let manager = SessionManager::new(engine, bus.clone(), repository);

    info!(
        backend = ?settings.storage.backend,
        capacity = settings.bus.capacity,
        "axon runtime started, reading raw events from stdin"
    );

    // Emit every derived event as one JSON line on stdout
    let printer = bus
        .subscribe_all(|event| async move {
            println!("{}", event.to_wire_line()?);
            Ok(())
        })
        .await;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record: IngressRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed input line");
                continue;
            }
        };

        // First event for an agent opens and binds a session
        if manager.binding(&record.agent_id).await.is_none() {
            let session = manager.open_session(cli.template_id.as_str(), None).await?;
            manager
                .bind_agent(record.agent_id.as_str(), session.session_id.as_str())
                .await;
            info!(
                agent_id = %record.agent_id,
                session_id = %session.session_id,
                "opened session"
            );
        }

        manager.ingest(&record.agent_id, record.event).await;
    }

    // Let subscribers finish before reporting
    if !bus.drain(Duration::from_secs(5)).await {
        warn!("bus did not drain within 5s, some events may be undelivered");
    }
    printer.unsubscribe().await;

    let stats = bus.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped = stats.dropped,
        handler_failures = stats.handler_failures,
        "axon runtime finished"
    );

    Ok(())
}

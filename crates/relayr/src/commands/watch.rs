//! Reading stream handler.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use relayr_api::ConnectivityEvent;
use relayr_core::{CoreError, Reading};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;
use crate::simulator::Simulator;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Event {
    Reading(Reading),
    Connectivity { event: ConnectivityEvent },
    Error { message: String },
}

pub async fn handle(sim: &Simulator, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device = &sim.device;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let readings_tx = tx.clone();
    let errors_tx = tx.clone();
    device.subscribe_readings(
        move |_, reading| readings_tx.send(Event::Reading(reading.clone())).is_ok(),
        Some(Box::new(move |err: &CoreError| {
            let _ = errors_tx.send(Event::Error {
                message: err.to_string(),
            });
            false
        })),
    );
    if args.connectivity {
        device.subscribe_connectivity(
            move |_, event| {
                tx.send(Event::Connectivity {
                    event: event.clone(),
                })
                .is_ok()
            },
            None,
        );
    } else {
        drop(tx);
    }

    let mut seen = 0;
    while args.count.is_none_or(|count| seen < count) {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = event else { break };

        if let Event::Error { message } = &event {
            warn!(device = %device.id(), %message, "reading stream failed");
        }
        if matches!(event, Event::Reading(_)) {
            seen += 1;
        }
        output::emit(global.output, &event, render_text)?;
    }

    device.unsubscribe_all();
    Ok(())
}

fn render_text(event: &Event) -> String {
    match event {
        Event::Reading(r) => format!(
            "{}  {}{}  {}",
            r.received_at.format("%H:%M:%S%.3f"),
            r.path.as_deref().map(|p| format!("{p}/")).unwrap_or_default(),
            r.meaning,
            r.value,
        ),
        Event::Connectivity { event } => format!("connectivity: {event:?}"),
        Event::Error { message } => format!("error: {message}"),
    }
}

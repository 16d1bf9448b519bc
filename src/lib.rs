// Mars Round-Trip - Earth-Mars-Earth mission engine
// Library entry point: wires config, the broadcast loop and a JSON-lines bridge

pub mod clock;
pub mod config;
pub mod error;
pub mod mission;
pub mod physics_engine;
pub mod protocol;
pub mod state_manager;
pub mod transfer;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use config::SimulationConfig;
use error::ServerError;
use protocol::Reply;
use state_manager::{start_simulation_loop, Backpressure, MissionSimulation, SimulationHandle};

/// Serve one viewer over stdin/stdout until stdin closes.
pub async fn run() -> Result<(), ServerError> {
    let config = SimulationConfig::from_env()?;
    let simulation = MissionSimulation::new(&config)?;
    let (handle, loop_task) = start_simulation_loop(simulation, &config);

    let served = serve(
        handle,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    if let Err(e) = loop_task.await {
        log::error!("simulation loop panicked: {e}");
    }
    served
}

/// Bridge one viewer: command lines in from `input`, one JSON message per line
/// out to `output`, `init` first. EOF on `input` shuts the loop down; returns
/// once the loop's `shutdown` message has been written.
///
/// The viewer skips stale updates instead of being disconnected, so a slow
/// reader never ends the session.
pub async fn serve<R, W>(
    handle: SimulationHandle,
    input: R,
    mut output: W,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut subscription = handle.subscribe_with(Backpressure::SkipStale).await?;
    log::debug!("viewer subscribed as {}", subscription.id);
    let (reply_tx, mut reply_rx) = mpsc::channel::<Reply>(16);

    let writer = tokio::spawn(async move {
        if let Some(init) = subscription.recv().await {
            write_line(&mut output, &init).await?;
        }

        let mut replies_open = true;
        loop {
            // Runs until the loop drops the subscription, after its shutdown message
            tokio::select! {
                message = subscription.recv() => match message {
                    Some(message) => write_line(&mut output, &message).await?,
                    None => break,
                },
                reply = reply_rx.recv(), if replies_open => match reply {
                    Some(reply) => write_line(&mut output, &reply).await?,
                    None => replies_open = false,
                },
            }
        }
        Ok::<(), ServerError>(())
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle.submit(line).await?;
        if reply_tx.send(reply).await.is_err() {
            log::warn!("output closed, no longer accepting commands");
            break;
        }
    }

    log::info!("input closed, shutting down");
    handle.shutdown().await;
    drop(reply_tx);

    match writer.await {
        Ok(result) => result,
        Err(e) => {
            log::error!("output writer panicked: {e}");
            Ok(())
        }
    }
}

async fn write_line<W, T>(output: &mut W, message: &T) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

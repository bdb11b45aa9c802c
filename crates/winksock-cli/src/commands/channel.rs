//! Channel command implementations

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use winksock_client::{Channel, ChannelEvent, ChannelMode, ChannelState, ConnectionRegistry};

use crate::output::{format_data, format_signal, print_info, print_success, print_warning};

/// How long to wait for the server to confirm a close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a channel and wait for the server to accept it
async fn open(
    registry: &ConnectionRegistry,
    address: &str,
    mode: ChannelMode,
    token: Option<String>,
) -> Result<Channel> {
    let channel = Channel::new(registry);
    channel
        .connect(address, mode, token.map(Bytes::from))
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;

    channel
        .wait_open()
        .await
        .with_context(|| format!("Server did not open {}", address))?;

    let message = channel.message();
    if message.is_empty() {
        print_success(&format!("Opened {} ({})", channel.channel_id(), mode));
    } else {
        print_success(&format!(
            "Opened {} ({}): {}",
            channel.channel_id(),
            mode,
            message
        ));
    }

    Ok(channel)
}

/// Close a channel and wait for the server's END
async fn finish(channel: &Channel) -> Result<()> {
    channel.close(None).await.context("Failed to close channel")?;

    let mut state = channel.subscribe();
    let closed = tokio::time::timeout(
        CLOSE_TIMEOUT,
        state.wait_for(|s| *s == ChannelState::Disconnected),
    )
    .await;

    if closed.is_err() {
        print_warning("Server did not confirm close");
    }
    Ok(())
}

/// Print events from a channel until it closes, `count` events arrive, or Ctrl-C
pub async fn listen(
    registry: &ConnectionRegistry,
    address: &str,
    mode: ChannelMode,
    token: Option<String>,
    count: Option<usize>,
) -> Result<()> {
    let channel = open(registry, address, mode, token).await?;
    let mut received = 0usize;

    loop {
        if count.is_some_and(|n| received >= n) {
            return finish(&channel).await;
        }

        tokio::select! {
            event = channel.next_event() => match event.context("Channel closed with error")? {
                Some(ChannelEvent::Data(data)) => {
                    println!("{}", format_data(&data));
                    received += 1;
                }
                Some(ChannelEvent::Signal(signal)) => {
                    print_info(&format_signal(&signal));
                    received += 1;
                }
                None => {
                    match channel.take_end_signal() {
                        Some(signal) if !signal.payload().is_empty() => {
                            print_info(&format!("Channel ended: {}", signal.to_text()))
                        }
                        _ => print_info("Channel ended"),
                    }
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("Interrupted, closing channel");
                return finish(&channel).await;
            }
        }
    }
}

/// Send one DATA payload
pub async fn send(
    registry: &ConnectionRegistry,
    address: &str,
    message: &str,
    priority: u8,
    binary: bool,
    token: Option<String>,
) -> Result<()> {
    let channel = open(registry, address, ChannelMode::WRITE, token).await?;

    channel
        .write(Bytes::copy_from_slice(message.as_bytes()), priority, !binary)
        .await
        .context("Failed to send data")?;
    print_success(&format!("Sent {} bytes", message.len()));

    finish(&channel).await
}

/// Send one SIGNAL/EMIT payload
pub async fn emit(
    registry: &ConnectionRegistry,
    address: &str,
    message: &str,
    token: Option<String>,
) -> Result<()> {
    let channel = open(registry, address, ChannelMode::WRITEEMIT, token).await?;

    channel
        .emit(Bytes::copy_from_slice(message.as_bytes()))
        .await
        .context("Failed to emit signal")?;
    print_success("Signal emitted");

    finish(&channel).await
}

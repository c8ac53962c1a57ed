//! Line-echo client that survives server restarts.
//!
//! ```text
//! cargo run -p tether-connector --example tcp_reconnect -- 127.0.0.1 7000
//! ```
//!
//! Start a server with e.g. `ncat -lk 7000`, then kill and restart it; the
//! client logs `broken` / `fixed` and carries on.

use std::time::Duration;

use tether_connector::adapters::SelfHealingTcp;
use tether_connector::{Error, StateChange};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = tether_log::auto_init()?;

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().as_deref().unwrap_or("7000").parse()?;

    let socket = SelfHealingTcp::builder(host, port)
        .nodelay(true)
        .fix_retry_delay(Duration::from_secs(2))
        .recovery_delay(Duration::from_millis(500))
        .build();

    let _subscription = socket.subscribe(|event| {
        match event {
            StateChange::Broken => tracing::warn!("link lost, reconnecting"),
            StateChange::Fixed => tracing::info!("link restored"),
        }
        Ok(())
    })?;

    if let Err(error) = socket.connect().await {
        tracing::warn!(%error, "initial connect failed, retrying in background");
    }

    let mut buf = [0u8; 1024];
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {}
        }

        match socket.write_all(b"ping\n").await {
            Ok(()) => {}
            Err(error) if error.is_retryable() || matches!(error, Error::NotConnected) => continue,
            Err(error) => {
                tracing::warn!(%error, "write failed");
                continue;
            }
        }

        match tokio::time::timeout(Duration::from_millis(500), socket.read(&mut buf)).await {
            Ok(Ok(n)) => tracing::info!(reply = %String::from_utf8_lossy(&buf[..n]).trim_end(), "received"),
            Ok(Err(error)) => tracing::warn!(%error, "read failed"),
            Err(_) => tracing::debug!("no reply"),
        }
    }

    socket.close().await;
    Ok(())
}

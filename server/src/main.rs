#![warn(clippy::nursery, clippy::pedantic)]

// burnbin expiring paste service
// Copyright (C) 2024  The burnbin authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use burnbin_server::{create_app, sweeper, AppState, Config, Store};
use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burnbin_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let store = Store::open(&config.db_path, config.storage_timeout)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

    let (stop_sweeper, sweeper_stopped) = watch::channel(false);
    let sweeper = sweeper::spawn(store.clone(), config.sweep_interval, sweeper_stopped);

    let signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;
    let signals_handle = signals.handle();

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", listener.local_addr()?);

    let app = create_app(AppState::new(config, store));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(signals))
    .await?;

    signals_handle.close();
    stop_sweeper.send_replace(true);
    sweeper.await?;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        info!(signal, "Received signal, shutting down");
    }
}

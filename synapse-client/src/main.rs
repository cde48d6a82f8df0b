//! synapse-watch: follow live SynapseStrike resources from a terminal.
//!
//! Keeps the market status (and, with a session, the trader list) live and
//! logs every update and notification until interrupted.

use synapse_client::{AuthState, ClientConfig, TradingResources, WatchError};
use synapse_core::{MarketStatus, TraderInfo};
use synapse_sync::{Notification, NotificationLevel, Resource};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), WatchError> {
    init_logging()?;
    let config = ClientConfig::load()?;
    let resources = TradingResources::from_config(&config)?;
    tracing::info!(
        api = %config.api_base_url,
        signed_in = resources.client().has_session(),
        "synapse-watch started"
    );

    let mut notifications = resources.store().notifier().subscribe();
    let mut auth = resources.client().auth_state();
    let mut market = resources.market_status();
    let mut traders = resources.my_traders();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = market.changed() => {
                if !changed {
                    break;
                }
                report_market(&market);
            }
            changed = traders.changed(), if traders.is_enabled() => {
                if changed {
                    report_traders(&traders);
                }
            }
            received = notifications.recv() => match received {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notifications dropped");
                }
                Err(RecvError::Closed) => break,
            },
            result = auth.changed() => {
                if result.is_err() {
                    break;
                }
                if *auth.borrow_and_update() == AuthState::Expired {
                    tracing::warn!("session expired; set auth.token and restart to follow traders");
                    // Rebinding without a session yields a disabled resource.
                    traders = resources.my_traders();
                }
            }
            result = &mut shutdown => {
                result?;
                tracing::info!("shutting down");
                break;
            }
        }
    }

    let stats = resources.store().stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        fetches = stats.fetches,
        dedup_joins = stats.dedup_joins,
        "cache summary"
    );
    Ok(())
}

fn init_logging() -> Result<(), WatchError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("synapse_client=info,synapse_sync=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| WatchError::Logging(e.to_string()))
}

fn report_market(market: &Resource<MarketStatus>) {
    match (market.data(), market.error()) {
        (_, Some(err)) => tracing::warn!(error = %err, "market status unavailable"),
        (Some(status), None) => tracing::info!(
            open = status.is_open,
            time = %status.current_time,
            "market status"
        ),
        (None, None) => {}
    }
}

fn report_traders(traders: &Resource<Vec<TraderInfo>>) {
    let Some(list) = traders.data() else {
        return;
    };
    let running = list.iter().filter(|trader| trader.is_running).count();
    tracing::info!(total = list.len(), running, "traders");
    for trader in list.iter() {
        tracing::debug!(
            id = %trader.trader_id,
            name = %trader.trader_name,
            model = %trader.ai_model,
            running = trader.is_running,
            "trader"
        );
    }
}

fn log_notification(notification: &Notification) {
    let key = notification
        .key
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    match notification.level {
        NotificationLevel::Error => {
            tracing::error!(key = %key, action = ?notification.action, "{}", notification.message)
        }
        NotificationLevel::Warning => {
            tracing::warn!(key = %key, action = ?notification.action, "{}", notification.message)
        }
        NotificationLevel::Info | NotificationLevel::Success => {
            tracing::info!(key = %key, "{}", notification.message)
        }
    }
}

//! Feed Ingestors
//!
//! One task per stream. Each task only applies its updates to the
//! [`MarketContext`], in arrival order, and exits when the token is cancelled
//! or its sender goes away. Reconnects are the transport's business; to the
//! coordinator a dead stream only shows up as a stale feed.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{FeedKind, MarketContext};
use crate::metrics;
use crate::orders::OrderUpdate;
use crate::types::{AccountBalance, OrderBook, Position, Ticker};

/// A typed update that knows how to apply itself to the context.
#[async_trait]
pub trait FeedMessage: Send + 'static {
    const KIND: FeedKind;

    async fn apply(self, ctx: &MarketContext);
}

#[async_trait]
impl FeedMessage for OrderBook {
    const KIND: FeedKind = FeedKind::OrderBook;

    async fn apply(self, ctx: &MarketContext) {
        ctx.update_orderbook(self).await;
    }
}

#[async_trait]
impl FeedMessage for Ticker {
    const KIND: FeedKind = FeedKind::Ticker;

    async fn apply(self, ctx: &MarketContext) {
        ctx.update_ticker(self).await;
    }
}

#[async_trait]
impl FeedMessage for AccountBalance {
    const KIND: FeedKind = FeedKind::Account;

    async fn apply(self, ctx: &MarketContext) {
        ctx.update_balance(self).await;
    }
}

#[async_trait]
impl FeedMessage for Vec<Position> {
    const KIND: FeedKind = FeedKind::Positions;

    async fn apply(self, ctx: &MarketContext) {
        ctx.update_positions(self).await;
    }
}

#[async_trait]
impl FeedMessage for OrderUpdate {
    const KIND: FeedKind = FeedKind::Orders;

    async fn apply(self, ctx: &MarketContext) {
        // Regressions are already logged by the context
        if let Err(e) = ctx.upsert_order(self).await {
            debug!(error = %e, "Order update discarded");
        }
    }
}

/// Drains one stream into the context until cancelled or disconnected.
pub async fn run_ingestor<M: FeedMessage>(
    ctx: std::sync::Arc<MarketContext>,
    mut rx: mpsc::Receiver<M>,
    token: CancellationToken,
) -> FeedKind {
    let feed = M::KIND;
    debug!(feed = %feed, "Feed ingestor started");
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(feed = %feed, "Feed ingestor stopping");
                break;
            }
            msg = rx.recv() => match msg {
                Some(update) => {
                    update.apply(&ctx).await;
                    metrics::record_feed_update(feed.as_str());
                }
                None => {
                    warn!(feed = %feed, "Feed stream closed");
                    break;
                }
            }
        }
    }
    feed
}

/// Producer side of the five streams, handed to the transport.
#[derive(Debug, Clone)]
pub struct FeedSenders {
    pub orderbook: mpsc::Sender<OrderBook>,
    pub ticker: mpsc::Sender<Ticker>,
    pub account: mpsc::Sender<AccountBalance>,
    pub positions: mpsc::Sender<Vec<Position>>,
    pub orders: mpsc::Sender<OrderUpdate>,
}

/// Consumer side, handed to [`spawn_ingestors`].
#[derive(Debug)]
pub struct FeedChannels {
    pub orderbook: mpsc::Receiver<OrderBook>,
    pub ticker: mpsc::Receiver<Ticker>,
    pub account: mpsc::Receiver<AccountBalance>,
    pub positions: mpsc::Receiver<Vec<Position>>,
    pub orders: mpsc::Receiver<OrderUpdate>,
}

pub fn feed_channels(capacity: usize) -> (FeedSenders, FeedChannels) {
    let capacity = capacity.max(1);
    let (orderbook_tx, orderbook_rx) = mpsc::channel(capacity);
    let (ticker_tx, ticker_rx) = mpsc::channel(capacity);
    let (account_tx, account_rx) = mpsc::channel(capacity);
    let (positions_tx, positions_rx) = mpsc::channel(capacity);
    let (orders_tx, orders_rx) = mpsc::channel(capacity);
    (
        FeedSenders {
            orderbook: orderbook_tx,
            ticker: ticker_tx,
            account: account_tx,
            positions: positions_tx,
            orders: orders_tx,
        },
        FeedChannels {
            orderbook: orderbook_rx,
            ticker: ticker_rx,
            account: account_rx,
            positions: positions_rx,
            orders: orders_rx,
        },
    )
}

/// Spawns one ingestor per stream into `tasks`.
pub fn spawn_ingestors(
    ctx: &std::sync::Arc<MarketContext>,
    channels: FeedChannels,
    token: &CancellationToken,
    tasks: &mut JoinSet<FeedKind>,
) {
    tasks.spawn(run_ingestor(ctx.clone(), channels.orderbook, token.clone()));
    tasks.spawn(run_ingestor(ctx.clone(), channels.ticker, token.clone()));
    tasks.spawn(run_ingestor(ctx.clone(), channels.account, token.clone()));
    tasks.spawn(run_ingestor(ctx.clone(), channels.positions, token.clone()));
    tasks.spawn(run_ingestor(ctx.clone(), channels.orders, token.clone()));
}

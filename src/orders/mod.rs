//! Order Management Module
//!
//! Order lifecycle state machine, client order ids, in-flight guards and the
//! desired-vs-actual reconciler.
//!
//! # Architecture
//!
//! - `StrategyOrder` / `OrderState` - tracked orders and their monotonic lifecycle
//! - `ClientOrderIdGenerator` - unique, exchange-safe client ids
//! - `InFlightTracker` - one outstanding action per order
//! - `OrderReconciler` - turns a `StrategyDecision` into place/amend/cancel batches
//!
//! # Example
//!
//! ```ignore
//! use quoteforge::orders::{OrderReconciler, ReconcilerConfig};
//!
//! let reconciler = OrderReconciler::new(api, ctx.clone(), ReconcilerConfig::from_config(&config));
//! let report = reconciler.reconcile(&decision, &ctx.snapshot().await).await;
//! ```

mod id_gen;
mod reconciler;
mod tracker;
mod types;

pub use id_gen::ClientOrderIdGenerator;
pub use reconciler::{OrderAction, OrderReconciler, ReconcileReport, ReconcilerConfig};
pub use tracker::{InFlight, InFlightKind, InFlightTracker};
pub use types::{ClientOrderId, OrderState, OrderStateError, OrderUpdate, StrategyOrder};

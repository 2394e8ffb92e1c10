//! Core domain types for the pmm trading bot.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `Price`, `Size`: precision-safe decimal newtypes
//! - `MarketId`, `MarketSpec`: market identity and exchange constraints
//! - `Side`, `OrderRole`, `OpenOrder`: order vocabulary
//! - `Fill`: the persistent fill record
//! - `Event`, `EventBus`: structured event emission
//! - `TradingClient`: the abstract order-entry interface with classified errors

pub mod decimal;
pub mod error;
pub mod events;
pub mod execution;
pub mod fill;
pub mod market;
pub mod order;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use events::{Event, EventBus, EventKind};
pub use execution::{
    CancelAck, InFlightSlot, InFlightTable, SubmitError, SubmitErrorKind, SubmitOutcome,
    TradingClient,
};
pub use fill::Fill;
pub use market::{MarketId, MarketSpec};
pub use order::{ClientOrderId, OpenOrder, OrderId, OrderRole, Side};

//! FIFO lot matching and PnL derivation.
//!
//! Entering-side fills push lots; exiting-side fills pop from the head
//! and realize PnL against the lot's entry price. FIFO matches the
//! venue's own accounting, so the realized number here tracks what the
//! operator sees on the exchange.

use pmm_core::{Fill, MarketId, Price, Size};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

/// One open exposure fragment. `remaining` is always positive; `sign`
/// carries the direction. The cost basis is the entry price and is
/// never updated by later fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lot {
    pub remaining: Decimal,
    pub sign: i8,
    pub cost_basis: Price,
    pub ts_ms: i64,
}

/// One fill's contribution to realized PnL (fees already debited).
#[derive(Debug, Clone, PartialEq, Eq)]
struct RealizedEntry {
    ts_ms: i64,
    amount: Decimal,
}

#[derive(Debug, Default)]
struct MarketBook {
    lots: VecDeque<Lot>,
    realized: Vec<RealizedEntry>,
    realized_total: Decimal,
}

/// Per-market FIFO lot queues with realized/unrealized PnL derivation.
///
/// Deterministic: replaying a ledger prefix in append order reproduces
/// the live run's realized PnL, cost basis and lot queue exactly.
#[derive(Debug, Default)]
pub struct PnlCompositor {
    books: HashMap<MarketId, MarketBook>,
}

impl PnlCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from an ordered fill sequence (ledger replay).
    pub fn replay<'a>(fills: impl IntoIterator<Item = &'a Fill>) -> Self {
        let mut compositor = Self::new();
        for fill in fills {
            compositor.on_fill(fill);
        }
        compositor
    }

    /// Apply one fill; returns its realized-PnL contribution (fee
    /// debited, whether the fill opened or closed exposure).
    pub fn on_fill(&mut self, fill: &Fill) -> Decimal {
        let book = self.books.entry(fill.market.clone()).or_default();
        let mut realized = Decimal::ZERO;

        let signed = fill.signed_size().inner();
        let fill_sign: i8 = if signed.is_sign_negative() { -1 } else { 1 };
        let mut magnitude = signed.abs();

        while !magnitude.is_zero() {
            match book.lots.front_mut() {
                Some(head) if head.sign != fill_sign => {
                    // Opposite sign: this fill exits prior exposure.
                    let matched = magnitude.min(head.remaining);
                    let per_unit = (fill.price.inner() - head.cost_basis.inner())
                        * Decimal::from(head.sign);
                    realized += matched * per_unit;
                    head.remaining -= matched;
                    magnitude -= matched;
                    if head.remaining.is_zero() {
                        book.lots.pop_front();
                    }
                }
                _ => {
                    // Empty queue or same-sign head: the rest enters.
                    book.lots.push_back(Lot {
                        remaining: magnitude,
                        sign: fill_sign,
                        cost_basis: fill.price,
                        ts_ms: fill.ts_ms,
                    });
                    magnitude = Decimal::ZERO;
                }
            }
        }

        realized -= fill.fee;
        book.realized_total += realized;
        book.realized.push(RealizedEntry {
            ts_ms: fill.ts_ms,
            amount: realized,
        });
        realized
    }

    /// Total realized PnL for a market since the first fill.
    pub fn realized(&self, market: &MarketId) -> Decimal {
        self.books
            .get(market)
            .map(|b| b.realized_total)
            .unwrap_or_default()
    }

    /// Realized PnL from fills with `ts_ms` in `[start_ms, end_ms]`.
    /// Independent of boundary placement within the gap between two
    /// adjacent fills.
    pub fn realized_in_window(&self, market: &MarketId, start_ms: i64, end_ms: i64) -> Decimal {
        self.books
            .get(market)
            .map(|b| {
                b.realized
                    .iter()
                    .filter(|e| e.ts_ms >= start_ms && e.ts_ms <= end_ms)
                    .map(|e| e.amount)
                    .sum()
            })
            .unwrap_or_default()
    }

    /// Unrealized PnL at mid: sum over open lots of
    /// `remaining * (mid - cost_basis) * sign`.
    pub fn unrealized(&self, market: &MarketId, mid: Price) -> Decimal {
        self.books
            .get(market)
            .map(|b| {
                b.lots
                    .iter()
                    .map(|lot| {
                        lot.remaining
                            * (mid.inner() - lot.cost_basis.inner())
                            * Decimal::from(lot.sign)
                    })
                    .sum()
            })
            .unwrap_or_default()
    }

    /// Signed sum of the lot queue. Must equal the recorded inventory;
    /// drift is a reconciliation fault.
    pub fn lot_sum(&self, market: &MarketId) -> Size {
        Size::new(
            self.books
                .get(market)
                .map(|b| {
                    b.lots
                        .iter()
                        .map(|lot| lot.remaining * Decimal::from(lot.sign))
                        .sum()
                })
                .unwrap_or_default(),
        )
    }

    /// Size-weighted average entry price and signed size of the open
    /// queue.
    pub fn cost_basis(&self, market: &MarketId) -> (Price, Size) {
        let book = match self.books.get(market) {
            Some(b) if !b.lots.is_empty() => b,
            _ => return (Price::ZERO, Size::ZERO),
        };
        let total: Decimal = book.lots.iter().map(|l| l.remaining).sum();
        if total.is_zero() {
            return (Price::ZERO, Size::ZERO);
        }
        let weighted: Decimal = book
            .lots
            .iter()
            .map(|l| l.remaining * l.cost_basis.inner())
            .sum();
        (Price::new(weighted / total), self.lot_sum(market))
    }

    /// Open lots for a market, head first.
    pub fn lots(&self, market: &MarketId) -> Vec<Lot> {
        self.books
            .get(market)
            .map(|b| b.lots.iter().cloned().collect())
            .unwrap_or_default()
    }
}

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::types::{AckResult, CancelRef, Fill, GatewayAck, GatewayCmd, QuoteSide};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderState {
    PendingPlace,
    Resting,
    PendingCancel,
    Canceled,
    Executed,
}

/// Our record of one order at the venue. The internal id exists from the
/// moment of intent; the venue id arrives with the place ack.
#[derive(Clone, Debug)]
pub struct ManagedOrder {
    pub internal_id: u64,
    pub venue_id: Option<String>,
    pub ticker: String,
    pub quote_side: QuoteSide,
    /// Quote-space price (YES cents).
    pub price: i64,
    pub remaining_count: i64,
    pub state: OrderState,
}

impl ManagedOrder {
    fn in_flight(&self) -> bool {
        matches!(self.state, OrderState::PendingPlace | OrderState::PendingCancel)
    }
}

#[derive(Default)]
struct Slot {
    order: Option<ManagedOrder>,
    /// Latest desired state queued while a venue call is in flight.
    /// Some(None) means "cancel once the in-flight call resolves".
    queued: Option<Option<(i64, i64)>>,
}

/// The truth of what we have at the venue: at most one intended order per
/// (ticker, quote side), and at most one in-flight mutation per slot.
/// Rapid book updates coalesce into `queued` instead of producing
/// cancel/place storms.
#[derive(Default)]
pub struct OrderManager {
    slots: HashMap<(String, QuoteSide), Slot>,
    next_internal_id: u64,
}

impl OrderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff desired against current and emit at most one venue command.
    /// A replace is a cancel now and a place when the cancel resolves.
    pub fn reconcile(
        &mut self,
        ticker: &str,
        quote_side: QuoteSide,
        desired: Option<(i64, i64)>,
    ) -> Vec<GatewayCmd> {
        let slot = self
            .slots
            .entry((ticker.to_string(), quote_side))
            .or_default();

        if slot.order.as_ref().is_some_and(|o| o.in_flight()) {
            // Latest intent wins; no second call until the ack arrives.
            slot.queued = Some(desired);
            return Vec::new();
        }

        if slot.order.is_none() {
            let Some((price, size)) = desired else {
                return Vec::new();
            };
            self.next_internal_id += 1;
            let order = ManagedOrder {
                internal_id: self.next_internal_id,
                venue_id: None,
                ticker: ticker.to_string(),
                quote_side,
                price,
                remaining_count: size,
                state: OrderState::PendingPlace,
            };
            let cmd = GatewayCmd::Place {
                internal_id: order.internal_id,
                ticker: ticker.to_string(),
                quote_side,
                price,
                count: size,
            };
            slot.order = Some(order);
            return vec![cmd];
        }

        let Some(order) = slot.order.as_mut() else {
            return Vec::new();
        };
        match desired {
            None => vec![Self::start_cancel(order)],
            // Price tolerance is zero; a partial-filled size is left alone
            // rather than topped up.
            Some((price, _size)) if order.price == price => Vec::new(),
            Some(_) => {
                slot.queued = Some(desired);
                vec![Self::start_cancel(order)]
            }
        }
    }

    fn start_cancel(order: &mut ManagedOrder) -> GatewayCmd {
        order.state = OrderState::PendingCancel;
        GatewayCmd::Cancel {
            internal_id: order.internal_id,
            venue_id: order.venue_id.clone().unwrap_or_default(),
            ticker: order.ticker.clone(),
            quote_side: order.quote_side,
        }
    }

    /// Apply a gateway ack and drain any queued intent. Returns follow-up
    /// commands (the place half of a replace, or a re-queued cancel).
    pub fn on_ack(&mut self, ack: &GatewayAck) -> Vec<GatewayCmd> {
        let key = (ack.ticker.clone(), ack.quote_side);
        let Some(slot) = self.slots.get_mut(&key) else {
            return Vec::new();
        };
        if !slot
            .order
            .as_ref()
            .is_some_and(|o| o.internal_id == ack.internal_id)
        {
            debug!(
                ticker = %ack.ticker,
                internal_id = ack.internal_id,
                "stale gateway ack ignored"
            );
            return Vec::new();
        }

        match &ack.result {
            AckResult::Placed { venue_id } => {
                if let Some(order) = slot.order.as_mut() {
                    order.venue_id = Some(venue_id.clone());
                    order.state = OrderState::Resting;
                }
            }
            AckResult::PlaceFailed { reason, .. } => {
                warn!(ticker = %ack.ticker, side = ack.quote_side.as_str(), %reason, "place failed");
                slot.order = None;
            }
            AckResult::Canceled => {
                slot.order = None;
            }
            AckResult::CancelFailed { reason } => {
                // Order is believed still resting; a queued intent will
                // re-attempt on the next pass.
                warn!(ticker = %ack.ticker, side = ack.quote_side.as_str(), %reason, "cancel failed");
                if let Some(order) = slot.order.as_mut() {
                    order.state = OrderState::Resting;
                }
            }
        }

        match slot.queued.take() {
            Some(desired) => self.reconcile(&ack.ticker, ack.quote_side, desired),
            None => Vec::new(),
        }
    }

    /// Apply a venue fill to whichever order it belongs to. Fully filled
    /// orders leave the book as Executed.
    pub fn on_fill(&mut self, fill: &Fill) {
        for slot in self.slots.values_mut() {
            let Some(order) = &mut slot.order else {
                continue;
            };
            if order.venue_id.as_deref() == Some(fill.order_id.as_str()) {
                order.remaining_count -= fill.count;
                if order.remaining_count <= 0 {
                    order.state = OrderState::Executed;
                    slot.order = None;
                }
                return;
            }
        }
    }

    /// Cancel everything: resting orders become one cancel batch; slots with
    /// an in-flight call get a queued cancel instead.
    pub fn flatten(&mut self) -> Vec<CancelRef> {
        let mut batch = Vec::new();
        for ((ticker, quote_side), slot) in &mut self.slots {
            match &mut slot.order {
                Some(order) if order.in_flight() => {
                    slot.queued = Some(None);
                }
                Some(order) if order.state == OrderState::Resting => {
                    order.state = OrderState::PendingCancel;
                    batch.push(CancelRef {
                        internal_id: order.internal_id,
                        venue_id: order.venue_id.clone().unwrap_or_default(),
                        ticker: ticker.clone(),
                        quote_side: *quote_side,
                    });
                }
                _ => {}
            }
        }
        batch
    }

    /// Per-market teardown for remove_market; same semantics as flatten.
    pub fn cancel_market(&mut self, ticker: &str) -> Vec<CancelRef> {
        let mut batch = Vec::new();
        for ((slot_ticker, quote_side), slot) in &mut self.slots {
            if slot_ticker.as_str() != ticker {
                continue;
            }
            match &mut slot.order {
                Some(order) if order.in_flight() => {
                    slot.queued = Some(None);
                }
                Some(order) if order.state == OrderState::Resting => {
                    order.state = OrderState::PendingCancel;
                    batch.push(CancelRef {
                        internal_id: order.internal_id,
                        venue_id: order.venue_id.clone().unwrap_or_default(),
                        ticker: slot_ticker.clone(),
                        quote_side: *quote_side,
                    });
                }
                _ => {}
            }
        }
        batch
    }

    pub fn active_order_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| {
                s.order
                    .as_ref()
                    .is_some_and(|o| matches!(o.state, OrderState::PendingPlace | OrderState::Resting))
            })
            .count()
    }

    /// True while any slot still has an order in flight (shutdown drain).
    pub fn has_in_flight(&self) -> bool {
        self.slots
            .values()
            .any(|s| s.order.as_ref().is_some_and(|o| o.in_flight()))
    }

    pub fn order_for(&self, ticker: &str, quote_side: QuoteSide) -> Option<&ManagedOrder> {
        self.slots
            .get(&(ticker.to_string(), quote_side))
            .and_then(|s| s.order.as_ref())
    }
}

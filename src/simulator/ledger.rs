//! Arena of per-order results.
//!
//! Registering an order yields an [`OrderHandle`], the only way to write that
//! order's record. The handle is neither `Clone` nor `Copy`; the lifecycle
//! driver owns it until it moves it into a termination request, after which
//! the termination worker is the sole writer.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::simulator::state::{OrderResult, OrderState};

#[derive(Debug)]
pub struct OrderHandle {
    slot: usize,
}

impl OrderHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Debug, Default)]
pub struct OrderLedger {
    records: Mutex<Vec<OrderResult>>,
}

impl OrderLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn register(&self, record: OrderResult) -> OrderHandle {
        let mut records = self.lock();
        records.push(record);
        OrderHandle {
            slot: records.len() - 1,
        }
    }

    /// Mutates the record owned by `handle`.
    pub(crate) fn update<R>(&self, handle: &OrderHandle, apply: impl FnOnce(&mut OrderResult) -> R) -> R {
        let mut records = self.lock();
        apply(&mut records[handle.slot])
    }

    /// Slot of the record registered for `order_number`, if any.
    pub fn find(&self, order_number: &str) -> Option<usize> {
        self.lock()
            .iter()
            .rposition(|record| record.order_number == order_number)
    }

    /// Writes to a slot whose handle was lost when its holder unwound.
    /// Records already handed off or finished are left untouched and `None`
    /// is returned.
    pub(crate) fn recover<R>(
        &self,
        slot: usize,
        apply: impl FnOnce(&mut OrderResult) -> R,
    ) -> Option<R> {
        let mut records = self.lock();
        let record = records.get_mut(slot)?;
        if record.state.is_terminal() || record.state.is_pending_termination() {
            return None;
        }
        Some(apply(record))
    }

    pub fn get(&self, slot: usize) -> Option<OrderResult> {
        self.lock().get(slot).cloned()
    }

    pub fn state(&self, slot: usize) -> Option<OrderState> {
        self.lock().get(slot).map(|record| record.state)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<OrderResult> {
        self.lock().clone()
    }

    pub fn state_counts(&self) -> BTreeMap<OrderState, usize> {
        let mut counts = BTreeMap::new();
        for record in self.lock().iter() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OrderResult>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coordinate, LineGeometry};
    use crate::payload::{OrderPayload, OrderType};
    use chrono::Utc;
    use serde_json::Map;

    fn payload(number: &str) -> OrderPayload {
        OrderPayload {
            order_number: number.to_string(),
            order_type: OrderType::Activate,
            location: String::new(),
            poc_order: String::new(),
            timestamp: Utc::now(),
            custom_fields: Map::new(),
            geometry: LineGeometry::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.1, 0.0)])
                .expect("geometry"),
        }
    }

    #[test]
    fn handles_address_their_own_records() {
        let ledger = OrderLedger::with_capacity(2);
        let first = ledger.register(OrderResult::created(
            &payload("A"),
            1,
            "r-a".to_string(),
            Utc::now(),
        ));
        let second = ledger.register(OrderResult::created(
            &payload("B"),
            1,
            "r-b".to_string(),
            Utc::now(),
        ));

        ledger
            .update(&second, |record| record.transition(OrderState::Accepted))
            .expect("accept");

        assert_eq!(ledger.state(first.slot()), Some(OrderState::Created));
        assert_eq!(ledger.state(second.slot()), Some(OrderState::Accepted));
        assert_eq!(ledger.len(), 2);

        let counts = ledger.state_counts();
        assert_eq!(counts.get(&OrderState::Created), Some(&1));
        assert_eq!(counts.get(&OrderState::Accepted), Some(&1));
    }

    #[test]
    fn recovery_skips_records_already_handed_off() {
        let ledger = OrderLedger::default();
        let live = ledger.register(OrderResult::created(
            &payload("A"),
            1,
            "r-a".to_string(),
            Utc::now(),
        ));
        let handed_off = ledger.register(OrderResult::created(
            &payload("B"),
            1,
            "r-b".to_string(),
            Utc::now(),
        ));
        ledger
            .update(&handed_off, |record| {
                record.transition(OrderState::Accepted)?;
                record.transition(OrderState::Activated)?;
                record.transition(OrderState::PendingEnd)
            })
            .expect("hand off");

        assert_eq!(ledger.find("A"), Some(live.slot()));
        assert_eq!(ledger.find("missing"), None);

        let recovered = ledger
            .recover(live.slot(), |record| {
                record.complete(OrderState::Failed, Some("boom".to_string()))
            })
            .expect("live record is recoverable");
        assert!(recovered.is_ok());
        assert_eq!(ledger.state(live.slot()), Some(OrderState::Failed));

        assert!(ledger
            .recover(handed_off.slot(), |record| record.complete(OrderState::Failed, None))
            .is_none());
        assert_eq!(ledger.state(handed_off.slot()), Some(OrderState::PendingEnd));
    }
}

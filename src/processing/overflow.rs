//! # Counter Overflow Tracking
//!
//! Daily and weekly counters are 15 and 27 bits wide and wrap silently. The
//! number of wraps seen so far is the device's overflow ratio for that
//! aggregation mode, stored by the record store. A full total is
//!
//! ```text
//! ratio * 2^bits * multiplier + multiplied_counter
//! ```
//!
//! A wrap is detected when a later message carries a smaller multiplied
//! counter than an earlier one. Each wrap is registered against the id of
//! the message that revealed it, so processing that message again does not
//! advance the ratio twice.
//!
//! Ratios are read as of a message's event time. The advanced ratio applies
//! from the event time of the message that revealed the wrap, so the earlier
//! reference keeps its old ratio even when the wrap was registered by an
//! aborted earlier pass.

use crate::error::TelemetryError;
use crate::protocol::{AggregationMode, Message, OverflowRatios};
use crate::store::{OverflowReset, RecordLookup, TelemetrySink, WrapEvent};
use chrono::{DateTime, Utc};
use log::{debug, info};

/// Full total for a counter that has wrapped `ratio` times
pub fn full_total(counter_multiplied: u64, multiplier: u64, ratio: u64, mode: AggregationMode) -> u64 {
    if ratio == 0 {
        return counter_multiplied;
    }
    let overflow_point = (1u64 << mode.counter_bits()) * ratio * multiplier;
    overflow_point + counter_multiplied
}

/// True when `later` reports a smaller counter than `earlier`
pub fn is_wrap(later: &Message, earlier: &Message) -> Result<bool, TelemetryError> {
    Ok(later.counter_multiplied()? < earlier.counter_multiplied()?)
}

/// Result of comparing a message against an earlier reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapCheck {
    NoWrap,
    /// A new wrap was registered; the stored ratio is now `ratio`
    Registered { ratio: u64 },
    /// The wrap was already registered by an earlier pass over this message
    AlreadyRegistered,
}

/// Reads and advances overflow ratios through the store collaborators
pub struct OverflowTracker<'a> {
    lookup: &'a dyn RecordLookup,
    sink: &'a dyn TelemetrySink,
}

impl<'a> OverflowTracker<'a> {
    pub fn new(lookup: &'a dyn RecordLookup, sink: &'a dyn TelemetrySink) -> Self {
        Self { lookup, sink }
    }

    /// Ratio in force at `at`
    pub fn ratio(
        &self,
        device_id: &str,
        mode: AggregationMode,
        at: DateTime<Utc>,
    ) -> Result<u64, TelemetryError> {
        self.lookup.overflow_ratio(device_id, mode, at)
    }

    /// Full total of `msg` under the ratio in force at its event time
    pub fn full_total(&self, msg: &Message, mode: AggregationMode) -> Result<u64, TelemetryError> {
        let ratio = self.ratio(msg.device_id(), mode, msg.event_time())?;
        Ok(full_total(
            msg.counter_multiplied()?,
            msg.multiplier()?,
            ratio,
            mode,
        ))
    }

    /// Compare `msg` with an earlier message and register a wrap if one occurred
    pub fn check_wrap(
        &self,
        msg: &Message,
        earlier: &Message,
        mode: AggregationMode,
    ) -> Result<WrapCheck, TelemetryError> {
        if !is_wrap(msg, earlier)? {
            return Ok(WrapCheck::NoWrap);
        }

        let device_id = msg.device_id();
        info!(
            "{device_id}: {mode} counter wrap detected between #{} and #{}",
            earlier.incoming_id(),
            msg.incoming_id()
        );

        if self
            .lookup
            .is_wrap_registered(device_id, msg.incoming_id(), mode)?
        {
            debug!("{device_id}: wrap at #{} already registered", msg.incoming_id());
            return Ok(WrapCheck::AlreadyRegistered);
        }

        let ratio = self.ratio(device_id, mode, msg.event_time())? + 1;
        self.sink
            .update_overflow_ratio(device_id, mode, ratio, msg.event_time())?;
        self.sink.register_wrap(&WrapEvent {
            device_id: device_id.to_string(),
            incoming_id: msg.incoming_id(),
            mode,
            event_time: msg.event_time(),
        })?;
        Ok(WrapCheck::Registered { ratio })
    }

    /// Overwrite stored ratios when an absolute counter report disagrees with them.
    ///
    /// Returns the new ratios if a reset was registered.
    pub fn reconcile_absolute(
        &self,
        msg: &Message,
        absolute_total: u64,
    ) -> Result<Option<OverflowRatios>, TelemetryError> {
        let device_id = msg.device_id();
        let ratios = OverflowRatios::from_absolute_total(absolute_total);

        let mut consistent = true;
        for mode in AggregationMode::ALL {
            if ratios.get(mode) != self.ratio(device_id, mode, msg.event_time())? {
                consistent = false;
                break;
            }
        }
        if consistent {
            return Ok(None);
        }

        info!(
            "{device_id}: resetting overflow ratios to day={} week={} from total {absolute_total}",
            ratios.day, ratios.week
        );
        for mode in AggregationMode::ALL {
            self.sink.update_overflow_ratio(
                device_id,
                mode,
                ratios.get(mode),
                msg.event_time(),
            )?;
        }
        self.sink.register_overflow_reset(&OverflowReset {
            device_id: device_id.to_string(),
            incoming_id: msg.incoming_id(),
            event_time: msg.event_time(),
            absolute_total,
            ratios,
        })?;
        Ok(Some(ratios))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_total_without_wraps() {
        assert_eq!(full_total(1000, 10, 0, AggregationMode::Day), 1000);
    }

    #[test]
    fn test_full_total_with_wraps() {
        assert_eq!(
            full_total(1000, 10, 1, AggregationMode::Day),
            (1 << 15) * 10 + 1000
        );
        assert_eq!(
            full_total(50, 1, 2, AggregationMode::Week),
            (1 << 27) * 2 + 50
        );
    }
}

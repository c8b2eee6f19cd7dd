//! Reference-message lookups for consumption deltas and wrap checks.

use crate::config::ProcessingConfig;
use crate::constants::{SECS_PER_DAY, SECS_PER_WEEK};
use crate::error::TelemetryError;
use crate::protocol::{AggregationMode, Message, MessageType, RawRecord};
use crate::store::{MessageQuery, RecordLookup, TimeRange};
use log::debug;
use std::collections::BTreeMap;

pub struct Correlator<'a> {
    lookup: &'a dyn RecordLookup,
    config: &'a ProcessingConfig,
}

/// Decode candidate records, dropping any whose payload no longer parses
fn decode_all(records: Vec<RawRecord>) -> impl Iterator<Item = Message> {
    records
        .into_iter()
        .filter_map(|record| Message::from_record(record).ok())
}

impl<'a> Correlator<'a> {
    pub fn new(lookup: &'a dyn RecordLookup, config: &'a ProcessingConfig) -> Self {
        Self { lookup, config }
    }

    fn query(
        &self,
        msg: &Message,
        types: Vec<MessageType>,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<RawRecord>, TelemetryError> {
        self.lookup.find_messages(&MessageQuery {
            device_id: msg.device_id().to_string(),
            types,
            range,
            newest_first: true,
            limit: Some(limit),
        })
    }

    /// Newest message of the same type one period earlier, within the tolerant window.
    ///
    /// A manual message carrying a calibration command also counts as a
    /// reference, since it reports an authoritative total.
    pub fn previous_message(
        &self,
        msg: &Message,
        mode: AggregationMode,
    ) -> Result<Option<Message>, TelemetryError> {
        let window = match mode {
            AggregationMode::Day => self.config.daily_previous_window,
            AggregationMode::Week => self.config.weekly_previous_window,
        };
        let own_type = msg.message_type();
        let candidates = self.query(
            msg,
            vec![own_type, MessageType::Manual],
            window.range_before(msg.event_time()),
            self.config.previous_search_limit,
        )?;

        for candidate in decode_all(candidates) {
            match candidate.message_type() {
                t if t == own_type => return Ok(Some(candidate)),
                MessageType::Manual => {
                    let command = candidate.manual_fields()?.command;
                    if self.config.is_calibration_command(command) {
                        return Ok(Some(candidate));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Newest same-type message between one and `pre_previous_max_slots` slots back
    pub fn pre_previous_message(&self, msg: &Message) -> Result<Option<Message>, TelemetryError> {
        let found = self.query(
            msg,
            vec![msg.message_type()],
            self.config.pre_previous_range(msg.event_time()),
            1,
        )?;
        Ok(decode_all(found).next())
    }

    /// Newest message of `message_type` strictly before `msg`, regardless of gap
    pub fn last_message(
        &self,
        msg: &Message,
        message_type: MessageType,
    ) -> Result<Option<Message>, TelemetryError> {
        let found = self.query(
            msg,
            vec![message_type],
            TimeRange::before(msg.event_time()),
            1,
        )?;
        Ok(decode_all(found).next())
    }

    /// Partially processed daily messages of the week ending at `msg`, keyed by day index.
    ///
    /// Day 6 is the day before `msg`, day 0 a week earlier. Indexes outside
    /// 0..7 are kept so the caller can report them.
    pub fn partially_processed_daily(
        &self,
        msg: &Message,
    ) -> Result<BTreeMap<i64, Message>, TelemetryError> {
        let range = self.config.partial_daily_range(msg.event_time());
        let records = self.lookup.find_unprocessed_daily(msg.device_id(), &range)?;

        let mut by_day = BTreeMap::new();
        for daily in decode_all(records) {
            let gap = (msg.event_time() - daily.event_time()).num_seconds();
            let index = ((SECS_PER_WEEK - gap) as f64 / SECS_PER_DAY as f64).round() as i64;
            debug!(
                "{}: partial daily #{} maps to week day {index}",
                msg.device_id(),
                daily.incoming_id()
            );
            by_day.insert(index, daily);
        }
        Ok(by_day)
    }
}

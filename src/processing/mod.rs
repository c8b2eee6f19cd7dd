//! # Message Processing
//!
//! Wrap tracking ([`overflow`]), consumption reconstruction
//! ([`reconstruct`]), reference lookups ([`correlate`]) and the per-device
//! pipeline that ties them together ([`processor`]).

pub mod correlate;
pub mod overflow;
pub mod processor;
pub mod reconstruct;

pub use correlate::Correlator;
pub use overflow::{full_total, is_wrap, OverflowTracker, WrapCheck};
pub use processor::{MessageOutcome, MessageReport, Processor, RunSummary};
pub use reconstruct::{reconstruct, round_to_hour, walk_back_totals};

//! # Water5 Protocol Decoding
//!
//! Bit-level access to hex payloads ([`bits`]), message classification and
//! fragment stitching ([`message`]), and per-type field extraction
//! ([`fields`]).

pub mod bits;
pub mod fields;
pub mod message;

pub use bits::{BitDecoder, Endianness};
pub use fields::{
    decode_voltage, AggregationMode, DailyFields, DecodedMessage, ExtInfoFields, InfoFields,
    ManualFields, OverflowRatios, ResetFields, WeeklyFields,
};
pub use message::{classify, Message, MessageType, RawRecord};

//! Water5 Protocol Constants
//!
//! Bit layout, type nibbles and timing constants of the Water5 daily/weekly
//! telemetry protocol. Bit offsets count from the first payload bit, MSB first.

/// Bit holding the daily/non-daily discriminator (0 = daily)
pub const DAILY_FLAG_BIT: usize = 7;

/// Window of the message type nibble
pub const TYPE_NIBBLE_START: usize = 0;
pub const TYPE_NIBBLE_LEN: usize = 4;

/// Type nibble values for non-daily messages
pub const TYPE_NIBBLE_WEEKLY: u64 = 7;
pub const TYPE_NIBBLE_INFO: u64 = 6;
pub const TYPE_NIBBLE_MANUAL: u64 = 5;
pub const TYPE_NIBBLE_RESET: u64 = 4;
pub const TYPE_NIBBLE_EXTINFO: u64 = 8;

/// Weekly multiplier flag window; value 1 selects the x10 multiplier
pub const WEEKLY_MULTIPLIER_FLAG_START: usize = 4;
pub const WEEKLY_MULTIPLIER_FLAG_LEN: usize = 4;

/// Counter widths per aggregation mode
pub const DAY_COUNTER_BITS: u32 = 15;
pub const WEEK_COUNTER_BITS: u32 = 27;

/// Coarse counters are reported in tens of impulses
pub const COARSE_MULTIPLIER: u64 = 10;

/// Daily counter window (value is shifted right by one)
pub const DAILY_COUNTER_START: usize = 0;
pub const DAILY_COUNTER_LEN: usize = 16;

/// Weekly counter: low 24 bits plus 3 high bits from the tail of the daily-rate field
pub const WEEKLY_COUNTER_LOW_START: usize = 8;
pub const WEEKLY_COUNTER_LOW_LEN: usize = 24;
pub const WEEKLY_COUNTER_HIGH_BITS: usize = 3;

/// Full 32-bit counter used by info, manual, reset messages
pub const FULL_COUNTER_START: usize = 8;
pub const FULL_COUNTER_LEN: usize = 32;

/// Hourly rates of a daily message: 24 x 2 bits
pub const HOURLY_RATES_START: usize = 16;
pub const HOURLY_RATES_LEN: usize = 48;
pub const HOURLY_RATE_BITS: usize = 2;
pub const HOURS_PER_DAY: usize = 24;

/// Daily rates of a weekly message: 7 x 3 bits
pub const DAILY_RATES_START: usize = 32;
pub const DAILY_RATES_LEN: usize = 24;
pub const DAILY_RATE_BITS: usize = 3;
pub const DAYS_PER_WEEK: usize = 7;

/// Weekly voltage byte
pub const WEEKLY_VOLTAGE_START: usize = 56;

/// Filler byte of early firmware revisions
pub const SPARE_BYTE_FILLER: u64 = 0xAA;

/// Seconds per hour / day / week
pub const SECS_PER_HOUR: i64 = 3_600;
pub const SECS_PER_DAY: i64 = 86_400;
pub const SECS_PER_WEEK: i64 = 604_800;

/// Iterator nibble modulus
pub const ITERATOR_MODULUS: i32 = 16;

/// Residual correction step of the consumption reconstructor
pub const RESIDUAL_STEP: f64 = 0.01;

/// Max-consumption value meaning "not reported"
pub const NOT_REPORTED_MAX_CONSUMPTION: u8 = 170;

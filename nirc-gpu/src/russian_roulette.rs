//! Bits of `RR_OPTION_BITS`, the single value through which the path-tracing
//! kernel learns which survival-probability strategy is active.
//!
//! Exactly one survival bit is set (or none, for the default decaying
//! probability); when a survival bit is set, exactly one contribution bit is
//! set; when [`RR_SURVIVAL_ADRRS`] is set, exactly one measurement bit is set.

pub const RR_SURVIVAL_EXPECTED_CONTRIBUTION: u32 = 1 << 0;
pub const RR_SURVIVAL_ADRRS: u32 = 1 << 1;

pub const RR_CONTRIB_HASH_CACHE: u32 = 1 << 2;
pub const RR_CONTRIB_NEURAL_CACHE: u32 = 1 << 3;

pub const RR_MEASUREMENT_REFERENCE: u32 = 1 << 4;
pub const RR_MEASUREMENT_HASH_CACHE: u32 = 1 << 5;
pub const RR_MEASUREMENT_NEURAL_CACHE: u32 = 1 << 6;

pub const RR_SURVIVAL_MASK: u32 =
    RR_SURVIVAL_EXPECTED_CONTRIBUTION | RR_SURVIVAL_ADRRS;

pub const RR_CONTRIB_MASK: u32 =
    RR_CONTRIB_HASH_CACHE | RR_CONTRIB_NEURAL_CACHE;

pub const RR_MEASUREMENT_MASK: u32 = RR_MEASUREMENT_REFERENCE
    | RR_MEASUREMENT_HASH_CACHE
    | RR_MEASUREMENT_NEURAL_CACHE;

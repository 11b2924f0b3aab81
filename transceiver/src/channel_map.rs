//! Physical to Logical Channel Mapping
//!
//! The filterbanks split the wideband stream into `MCHANS` equally spaced
//! physical slots. Physical slot `k` sits at `-k * spacing` from the wideband
//! center, so slot 3 is `+spacing` and slot 1 is `-spacing`. Depending on the
//! number of active carriers a fixed subset of the slots is used, and the
//! hardware center is shifted by a whole number of spacings so that logical
//! channel 0 lands on its requested frequency.

/// Number of physical channels produced by the filterbanks
pub const MCHANS: usize = 4;

/// Logical channel that owns the hardware synthesizer and gain
pub const REFERENCE_CHANNEL: usize = 0;

/// Whether `chan` controls the shared RF front end
pub fn is_reference_channel(chan: usize) -> bool {
    chan == REFERENCE_CHANNEL
}

/// Logical channel carried by physical slot `pchan` with `chans` active
/// carriers, or `None` if the slot is unused or the count is unsupported.
pub fn logical_channel(pchan: usize, chans: usize) -> Option<usize> {
    match (chans, pchan) {
        (1, 0) => Some(0),
        (2, 0) => Some(0),
        (2, 3) => Some(1),
        (3, 1) => Some(0),
        (3, 0) => Some(1),
        (3, 3) => Some(2),
        _ => None,
    }
}

/// Hardware center offset in carrier spacings for `chans` active carriers
pub fn frequency_shift(chans: usize) -> Option<i32> {
    match chans {
        1 | 2 => Some(0),
        3 => Some(1),
        _ => None,
    }
}

/// Physical slots enabled for `chans` active carriers
pub fn active_slots(chans: usize) -> Option<[bool; MCHANS]> {
    match chans {
        1 => Some([true, false, false, false]),
        2 => Some([true, false, false, true]),
        3 => Some([true, true, false, true]),
        _ => None,
    }
}

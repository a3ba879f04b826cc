// SPDX-License-Identifier: AGPL-3.0-only

//! Buffer-policy and dispatch constants with their justification.
//!
//! Everything tunable about the communicator's memory behavior lives here;
//! no ad-hoc magic numbers in the engines.

/// Hysteresis factor for growing communication buffers.
///
/// Buffers grow to 1.5× the requested length so a sequence of slowly
/// increasing message sizes triggers O(log) reallocations, and never
/// shrink. 2× would waste memory on large halos; 1.1× reallocates on
/// nearly every growth step.
pub const BUFFACTOR: f64 = 1.5;

/// Minimum length (in f64 slots) of a freshly allocated comm buffer or
/// send list. Small enough to be free, large enough that tiny test systems
/// never reallocate.
pub const BUFMIN: usize = 1000;

/// Extra slots appended to the send buffer beyond its nominal capacity.
///
/// `exchange` packs one variable-width record *before* checking capacity;
/// the reserve absorbs that record so the capacity check can stay at the
/// top of the loop. Must be at least the widest exchange record.
pub const BUFEXTRA: usize = 1000;

/// Open-bound sentinel for first-hop slab boundaries.
///
/// A particle wrapped across the global box can land slightly outside the
/// strict cutghost band through round-off; the first hop in each dimension
/// therefore uses ±BIG instead of the sub-box face, so such a particle is
/// still shipped. Later hops use the sub-box midpoint.
pub const BIG: f64 = 1.0e20;

/// Minimum particle count before pack/unpack loops dispatch through rayon.
///
/// Below this the per-task overhead exceeds the copy cost (measured on the
/// 3-wide position codec; reverse/border codecs are wider and only gain).
pub const PAR_DISPATCH_MIN: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffactor_grows() {
        assert!(BUFFACTOR > 1.0);
    }

    #[test]
    fn bufextra_covers_widest_exchange_record() {
        // exchange record: length slot + x(3) + v(3) + tag + species + mask
        assert!(BUFEXTRA >= 10);
    }

    #[test]
    fn big_exceeds_any_plausible_box() {
        assert!(BIG > 1.0e12);
    }
}

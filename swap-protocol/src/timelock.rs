//! Relative deadlines for both escrows.
//!
//! All offsets count seconds from the deployment of the escrow on that side.
//! The two sides are deployed at different times, so the same schedule maps
//! to different absolute deadlines on each ledger.

use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::data_structures::{Side, Timestamp, Window};
use crate::error::{Result, SwapError};

/// The seven raw offsets, in packing order.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLockOffsets {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl TimeLockOffsets {
    fn fields(&self) -> [u32; 7] {
        [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
            self.dst_withdrawal,
            self.dst_public_withdrawal,
            self.dst_cancellation,
        ]
    }

    fn from_fields(f: [u32; 7]) -> Self {
        TimeLockOffsets {
            src_withdrawal: f[0],
            src_public_withdrawal: f[1],
            src_cancellation: f[2],
            src_public_cancellation: f[3],
            dst_withdrawal: f[4],
            dst_public_withdrawal: f[5],
            dst_cancellation: f[6],
        }
    }
}

/// Offsets of one side. The destination leg has no public cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SideOffsets {
    pub withdrawal: u32,
    pub public_withdrawal: u32,
    pub cancellation: u32,
    pub public_cancellation: Option<u32>,
}

/// Validated time-lock schedule: within each side
/// `withdrawal <= public_withdrawal <= cancellation (<= public_cancellation)`.
/// Zero offsets are allowed.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeLockOffsets", into = "TimeLockOffsets")]
pub struct TimeLockSchedule {
    offsets: TimeLockOffsets,
}

impl TryFrom<TimeLockOffsets> for TimeLockSchedule {
    type Error = SwapError;

    fn try_from(offsets: TimeLockOffsets) -> Result<Self> {
        TimeLockSchedule::new(offsets)
    }
}

impl From<TimeLockSchedule> for TimeLockOffsets {
    fn from(schedule: TimeLockSchedule) -> Self {
        schedule.offsets
    }
}

const FIELD_BITS: usize = 32;

impl TimeLockSchedule {
    pub fn new(offsets: TimeLockOffsets) -> Result<Self> {
        let schedule = TimeLockSchedule { offsets };
        schedule.check_side(Side::Src)?;
        schedule.check_side(Side::Dst)?;
        Ok(schedule)
    }

    fn check_side(&self, side: Side) -> Result<()> {
        let windows: Vec<(Window, u32)> = Window::ALL
            .iter()
            .filter_map(|w| self.offset(side, *w).ok().map(|o| (*w, o)))
            .collect();
        for pair in windows.windows(2) {
            let (earlier, earlier_offset) = pair[0];
            let (later, later_offset) = pair[1];
            if earlier_offset > later_offset {
                return Err(SwapError::NonMonotonicWindow {
                    side,
                    earlier,
                    earlier_offset,
                    later,
                    later_offset,
                });
            }
        }
        Ok(())
    }

    pub fn offsets(&self) -> &TimeLockOffsets {
        &self.offsets
    }

    pub fn offset(&self, side: Side, window: Window) -> Result<u32> {
        let o = &self.offsets;
        match (side, window) {
            (Side::Src, Window::Withdrawal) => Ok(o.src_withdrawal),
            (Side::Src, Window::PublicWithdrawal) => Ok(o.src_public_withdrawal),
            (Side::Src, Window::Cancellation) => Ok(o.src_cancellation),
            (Side::Src, Window::PublicCancellation) => Ok(o.src_public_cancellation),
            (Side::Dst, Window::Withdrawal) => Ok(o.dst_withdrawal),
            (Side::Dst, Window::PublicWithdrawal) => Ok(o.dst_public_withdrawal),
            (Side::Dst, Window::Cancellation) => Ok(o.dst_cancellation),
            (Side::Dst, Window::PublicCancellation) => {
                Err(SwapError::UnsupportedWindow { side, window })
            }
        }
    }

    pub fn side_offsets(&self, side: Side) -> SideOffsets {
        let o = &self.offsets;
        match side {
            Side::Src => SideOffsets {
                withdrawal: o.src_withdrawal,
                public_withdrawal: o.src_public_withdrawal,
                cancellation: o.src_cancellation,
                public_cancellation: Some(o.src_public_cancellation),
            },
            Side::Dst => SideOffsets {
                withdrawal: o.dst_withdrawal,
                public_withdrawal: o.dst_public_withdrawal,
                cancellation: o.dst_cancellation,
                public_cancellation: None,
            },
        }
    }

    /// Absolute timestamp at which `window` opens on `side`.
    pub fn deadline(&self, side: Side, window: Window, deployed_at: Timestamp) -> Result<Timestamp> {
        Ok(deployed_at + u64::from(self.offset(side, window)?))
    }

    /// True once `window` is open. Monotonic in `now`. A window the side does
    /// not have never opens.
    pub fn elapsed(&self, side: Side, window: Window, deployed_at: Timestamp, now: Timestamp) -> bool {
        match self.offset(side, window) {
            Ok(offset) => now >= deployed_at && now - deployed_at >= u64::from(offset),
            Err(_) => false,
        }
    }

    /// Seconds until `window` opens, zero if it already has.
    pub fn remaining(&self, side: Side, window: Window, deployed_at: Timestamp, now: Timestamp) -> Result<u64> {
        Ok(self.deadline(side, window, deployed_at)?.saturating_sub(now))
    }

    /// One 256-bit word: `deployed_at` in bits 0..32, then the seven offsets
    /// in table order, 32 bits each. A `deployed_at` past `u32::MAX` has no
    /// slot and is rejected rather than truncated, so two deployments 2^32
    /// seconds apart never share a word.
    pub fn pack(&self, deployed_at: Timestamp) -> Result<U256> {
        let stamp = u32::try_from(deployed_at)
            .map_err(|_| SwapError::DeploymentTimeOverflow { deployed_at })?;
        Ok(self.pack_offsets() | U256::from(stamp))
    }

    /// The offsets alone, deployment slot left zero. This is the form an
    /// order commits to.
    pub fn pack_offsets(&self) -> U256 {
        let mut word = U256::zero();
        for (i, field) in self.offsets.fields().iter().enumerate() {
            word |= U256::from(*field) << (FIELD_BITS * (i + 1));
        }
        word
    }

    /// Inverse of [`pack`](Self::pack); re-validates the offsets.
    pub fn unpack(word: U256) -> Result<(Self, Timestamp)> {
        let field = |i: usize| (word >> (FIELD_BITS * i)).low_u32();
        let deployed_at = Timestamp::from(field(0));
        let mut fields = [0u32; 7];
        for (i, f) in fields.iter_mut().enumerate() {
            *f = field(i + 1);
        }
        let schedule = TimeLockSchedule::new(TimeLockOffsets::from_fields(fields))?;
        Ok((schedule, deployed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The schedule used by the demo flow: 10s finality lock, 2m private
    // withdrawal on the source side.
    fn demo_offsets() -> TimeLockOffsets {
        TimeLockOffsets {
            src_withdrawal: 10,
            src_public_withdrawal: 120,
            src_cancellation: 121,
            src_public_cancellation: 122,
            dst_withdrawal: 10,
            dst_public_withdrawal: 100,
            dst_cancellation: 101,
        }
    }

    #[test]
    fn accepts_monotonic_and_zero_offsets() {
        assert!(TimeLockSchedule::new(demo_offsets()).is_ok());
        assert!(TimeLockSchedule::new(TimeLockOffsets::default()).is_ok());
    }

    #[test]
    fn rejects_non_monotonic_src() {
        let mut o = demo_offsets();
        o.src_cancellation = 5;
        let err = TimeLockSchedule::new(o).unwrap_err();
        assert_eq!(
            err,
            SwapError::NonMonotonicWindow {
                side: Side::Src,
                earlier: Window::PublicWithdrawal,
                earlier_offset: 120,
                later: Window::Cancellation,
                later_offset: 5,
            }
        );
    }

    #[test]
    fn rejects_non_monotonic_dst() {
        let mut o = demo_offsets();
        o.dst_public_withdrawal = 200;
        assert!(matches!(
            TimeLockSchedule::new(o),
            Err(SwapError::NonMonotonicWindow { side: Side::Dst, .. })
        ));
    }

    #[test]
    fn dst_has_no_public_cancellation() {
        let s = TimeLockSchedule::new(demo_offsets()).unwrap();
        assert_eq!(
            s.offset(Side::Dst, Window::PublicCancellation).unwrap_err(),
            SwapError::UnsupportedWindow {
                side: Side::Dst,
                window: Window::PublicCancellation
            }
        );
        assert!(!s.elapsed(Side::Dst, Window::PublicCancellation, 0, u64::from(u32::MAX)));
        assert_eq!(s.side_offsets(Side::Dst).public_cancellation, None);
        assert_eq!(s.side_offsets(Side::Src).public_cancellation, Some(122));
    }

    #[test]
    fn pack_unpack_round_trip() {
        let s = TimeLockSchedule::new(demo_offsets()).unwrap();
        let deployed_at = 1_700_000_000;
        let word = s.pack(deployed_at).unwrap();
        assert_eq!(word.low_u32(), deployed_at as u32);
        assert_eq!(TimeLockSchedule::unpack(word).unwrap(), (s, deployed_at));

        let max = TimeLockSchedule::new(TimeLockOffsets::from_fields([u32::MAX; 7])).unwrap();
        assert_eq!(
            TimeLockSchedule::unpack(max.pack(u64::from(u32::MAX)).unwrap()).unwrap(),
            (max, u64::from(u32::MAX))
        );
    }

    #[test]
    fn deployment_time_past_slot_is_rejected() {
        let s = TimeLockSchedule::new(demo_offsets()).unwrap();
        let beyond = u64::from(u32::MAX) + 1;
        assert_eq!(
            s.pack(beyond).unwrap_err(),
            SwapError::DeploymentTimeOverflow { deployed_at: beyond }
        );
        // would alias deployed_at = 7 under truncation
        assert!(s.pack(beyond + 7).is_err());
        assert_eq!(s.pack(0).unwrap(), s.pack_offsets());
    }

    #[test]
    fn unpack_validates() {
        // src_withdrawal = 5, src_public_withdrawal = 1
        let word = (U256::from(5u32) << 32) | (U256::from(1u32) << 64);
        assert!(TimeLockSchedule::unpack(word).is_err());
    }

    #[test]
    fn elapsed_is_monotonic() {
        let s = TimeLockSchedule::new(demo_offsets()).unwrap();
        let deployed_at = 1_000;
        for side in [Side::Src, Side::Dst] {
            for window in Window::ALL {
                let mut seen_open = false;
                for now in 900..1_300 {
                    let open = s.elapsed(side, window, deployed_at, now);
                    assert!(!(seen_open && !open), "{side} {window} closed again at {now}");
                    seen_open |= open;
                }
            }
        }
    }

    #[test]
    fn elapsed_boundaries() {
        let s = TimeLockSchedule::new(demo_offsets()).unwrap();
        assert!(!s.elapsed(Side::Src, Window::Withdrawal, 100, 109));
        assert!(s.elapsed(Side::Src, Window::Withdrawal, 100, 110));
        assert_eq!(s.remaining(Side::Src, Window::Withdrawal, 100, 105).unwrap(), 5);
        assert_eq!(s.remaining(Side::Src, Window::Withdrawal, 100, 500).unwrap(), 0);
        assert_eq!(s.deadline(Side::Src, Window::Cancellation, 100).unwrap(), 221);

        // zero offset still requires deployment to have happened
        let zero = TimeLockSchedule::new(TimeLockOffsets::default()).unwrap();
        assert!(!zero.elapsed(Side::Src, Window::Withdrawal, 100, 99));
        assert!(zero.elapsed(Side::Src, Window::Withdrawal, 100, 100));
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let s = TimeLockSchedule::new(demo_offsets()).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        let back: TimeLockSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);

        let mut bad = demo_offsets();
        bad.dst_withdrawal = 1_000;
        let json = serde_json::to_string(&bad).unwrap();
        assert!(serde_json::from_str::<TimeLockSchedule>(&json).is_err());
    }
}

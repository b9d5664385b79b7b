//! Control Source contract and the shared CC table that MIDI/OSC input threads write into.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::argument::Argument;

/// Anything that can answer "what is controller `cc` right now?" in [0, 1].
///
/// `None` means the value is unavailable (no device, channel filtered out, never received).
/// Callers treat it as a steady 0.
pub trait ControlSource: Send + Sync {
    fn sample(&self, cc: u8) -> Option<f32>;
}

/// Read a sample, degrading a missing value to 0.
pub fn sample_or_zero(source: &dyn ControlSource, cc: u8) -> f32 {
    source.sample(cc).unwrap_or(0.0)
}

/// Which MIDI channel(s) feed the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelFilter {
    /// `'*'`: latest value from any channel.
    #[default]
    Any,
    /// Zero-based channel 0..15.
    Channel(u8),
}

impl ChannelFilter {
    /// Accepts `*`, or a channel number. 1..16 are treated as one-based, 0 as already zero-based.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s == "*" {
            return Some(ChannelFilter::Any);
        }
        s.parse::<u8>().ok().and_then(Self::from_number)
    }

    pub fn from_number(ch: u8) -> Option<Self> {
        match ch {
            0 => Some(ChannelFilter::Channel(0)),
            1..=16 => Some(ChannelFilter::Channel(ch - 1)),
            _ => None,
        }
    }

    fn admits(self, ch: u8) -> bool {
        match self {
            ChannelFilter::Any => true,
            ChannelFilter::Channel(c) => c == ch,
        }
    }
}

#[derive(Debug, Default)]
struct CcState {
    filter: ChannelFilter,
    /// Latest value per controller from admitted channels.
    values: HashMap<u8, f32>,
}

/// Shared latest-value table, cheap to clone. Input threads write, the tick and frame clocks read.
#[derive(Debug, Clone, Default)]
pub struct ControlTable {
    inner: Arc<Mutex<CcState>>,
}

impl ControlTable {
    pub fn new(filter: ChannelFilter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CcState {
                filter,
                values: HashMap::new(),
            })),
        }
    }

    pub fn filter(&self) -> ChannelFilter {
        self.inner.lock().map(|s| s.filter).unwrap_or_default()
    }

    pub fn set_filter(&self, filter: ChannelFilter) {
        if let Ok(mut s) = self.inner.lock() {
            if s.filter != filter {
                s.filter = filter;
                s.values.clear();
            }
        }
    }

    /// Store a raw MIDI CC value (0..127). Returns false when the channel is filtered out.
    pub fn set_cc(&self, ch: u8, cc: u8, val_0_127: u8) -> bool {
        self.set_normalized(ch, cc, val_0_127.min(127) as f32 / 127.0)
    }

    /// Store an already-normalized value, clamped to [0, 1].
    pub fn set_normalized(&self, ch: u8, cc: u8, x01: f32) -> bool {
        let Ok(mut s) = self.inner.lock() else {
            return false;
        };
        if !s.filter.admits(ch) || cc > 127 {
            return false;
        }
        let x = if x01.is_finite() { x01.clamp(0.0, 1.0) } else { 0.0 };
        s.values.insert(cc, x);
        true
    }

    /// Forget every value, e.g. after the input device went away.
    pub fn clear(&self) {
        if let Ok(mut s) = self.inner.lock() {
            s.values.clear();
        }
    }

    /// Live accessor for one controller, usable as an operator argument.
    pub fn cc(&self, cc: u8) -> CcHandle {
        CcHandle {
            table: self.clone(),
            cc,
            lo: 0.0,
            hi: 1.0,
        }
    }
}

impl ControlSource for ControlTable {
    fn sample(&self, cc: u8) -> Option<f32> {
        self.inner.lock().ok()?.values.get(&cc).copied()
    }
}

/// `cc(n)`: reads the table on every call; no caching.
#[derive(Debug, Clone)]
pub struct CcHandle {
    table: ControlTable,
    cc: u8,
    lo: f32,
    hi: f32,
}

impl CcHandle {
    /// Map the [0, 1] sample linearly onto `[lo, hi]`.
    pub fn range(mut self, lo: f32, hi: f32) -> Self {
        self.lo = lo;
        self.hi = hi;
        self
    }

    pub fn value(&self) -> f32 {
        let x = sample_or_zero(&self.table, self.cc);
        self.lo + (self.hi - self.lo) * x
    }
}

impl From<CcHandle> for Argument {
    fn from(h: CcHandle) -> Self {
        Argument::dynamic(move || h.value() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::resolve;

    #[test]
    fn absent_values_read_as_zero() {
        let t = ControlTable::new(ChannelFilter::Any);
        assert_eq!(t.sample(4), None);
        assert_eq!(t.cc(4).value(), 0.0);
    }

    #[test]
    fn cc_values_are_normalized() {
        let t = ControlTable::new(ChannelFilter::Any);
        assert!(t.set_cc(3, 4, 127));
        assert_eq!(t.sample(4), Some(1.0));
        t.set_cc(9, 4, 0);
        assert_eq!(t.sample(4), Some(0.0));
    }

    #[test]
    fn channel_filter_drops_other_channels() {
        let t = ControlTable::new(ChannelFilter::parse("2").unwrap());
        assert!(!t.set_cc(0, 5, 100));
        assert!(t.set_cc(1, 5, 127));
        assert_eq!(t.sample(5), Some(1.0));
    }

    #[test]
    fn channel_parse_accepts_wildcard_and_one_based() {
        assert_eq!(ChannelFilter::parse("*"), Some(ChannelFilter::Any));
        assert_eq!(ChannelFilter::parse("16"), Some(ChannelFilter::Channel(15)));
        assert_eq!(ChannelFilter::parse("17"), None);
        assert_eq!(ChannelFilter::parse("x"), None);
    }

    #[test]
    fn ranged_handle_is_a_live_argument() {
        let t = ControlTable::new(ChannelFilter::Any);
        let arg: Argument = t.cc(5).range(3.0, 10.0).into();
        assert_eq!(resolve(&arg), Ok(3.0));

        t.set_normalized(0, 5, 0.5);
        assert_eq!(resolve(&arg), Ok(6.5));
    }

    #[test]
    fn clear_degrades_to_zero() {
        let t = ControlTable::new(ChannelFilter::Any);
        t.set_normalized(0, 6, 0.9);
        t.clear();
        assert_eq!(sample_or_zero(&t, 6), 0.0);
    }
}

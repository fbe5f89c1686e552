use std::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};

/// A contiguous range of channels from low to high, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelRange {
    first: i32,
    last: i32,
}

impl ChannelRange {
    /// Constructs a new `ChannelRange`; the ends may be given in either order.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::data::channel_range::ChannelRange;
    /// let region = ChannelRange::new(80, 20);
    /// assert_eq!(region.first(), 20);
    /// assert_eq!(region.last(), 80);
    /// assert_eq!(region.width(), 61);
    /// ```
    pub fn new(end1: i32, end2: i32) -> Self {
        ChannelRange {
            first: end1.min(end2),
            last: end1.max(end2),
        }
    }

    pub fn first(&self) -> i32 {
        self.first
    }

    pub fn last(&self) -> i32 {
        self.last
    }

    /// Number of channels in the range.
    pub fn width(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    /// Whether a (fractional) channel lies inside the range, ends included.
    pub fn contains(&self, channel: f64) -> bool {
        channel >= self.first as f64 && channel <= self.last as f64
    }

    /// Whether `self` lies inside `other`.
    pub fn within(&self, other: &ChannelRange) -> bool {
        other.first <= self.first && other.last >= self.last
    }

    /// Channel midpoint as used for the initial width guess: integer
    /// division of `first + last + 1` by two.
    pub fn midpoint(&self) -> i32 {
        (self.first + self.last + 1) / 2
    }

    /// Iterator over every channel in the range.
    pub fn channels(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last
    }

    /// Offset of `channel` from the start of the range.
    pub fn offset(&self, channel: i32) -> usize {
        (channel - self.first) as usize
    }
}

impl Display for ChannelRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "channelRange[first = {} last = {}]", self.first, self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_inclusive() {
        let region = ChannelRange::new(10, 20);
        assert!(region.contains(10.0));
        assert!(region.contains(20.0));
        assert!(!region.contains(20.01));
        assert!(!region.contains(9.99));
    }

    #[test]
    fn test_midpoint_uses_integer_division() {
        assert_eq!(ChannelRange::new(20, 80).midpoint(), 50);
        assert_eq!(ChannelRange::new(20, 81).midpoint(), 51);
    }

    #[test]
    fn test_within() {
        let outer = ChannelRange::new(0, 100);
        assert!(ChannelRange::new(10, 20).within(&outer));
        assert!(!ChannelRange::new(90, 101).within(&outer));
    }
}

use std::fmt::{Debug, Display};

use gt_registers::MAX_LANES;

/// A set of lane indices of one compute unit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaneSet(u8);

const ALL_BITS: u8 = (1 << MAX_LANES) - 1;

impl LaneSet {
    pub const EMPTY: LaneSet = LaneSet(0);
    pub const ALL: LaneSet = LaneSet(ALL_BITS);

    /// Lanes `0..count`, capped at the number of lanes of a compute unit.
    pub fn first(count: u8) -> LaneSet {
        let count = usize::from(count).min(MAX_LANES);
        LaneSet(((1u16 << count) - 1) as u8)
    }

    pub fn single(lane: u8) -> LaneSet {
        let mut set = LaneSet::EMPTY;
        set.insert(lane);
        set
    }

    /// Lane 0 in bit 0. Bits beyond the lane count are ignored.
    pub fn from_bits(bits: u8) -> LaneSet {
        LaneSet(bits & ALL_BITS)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, lane: u8) -> bool {
        usize::from(lane) < MAX_LANES && self.0 & (1 << lane) != 0
    }

    pub fn insert(&mut self, lane: u8) {
        if usize::from(lane) < MAX_LANES {
            self.0 |= 1 << lane;
        }
    }

    pub fn remove(&mut self, lane: u8) {
        if usize::from(lane) < MAX_LANES {
            self.0 &= !(1 << lane);
        }
    }

    pub fn union(self, other: LaneSet) -> LaneSet {
        LaneSet(self.0 | other.0)
    }

    pub fn intersection(self, other: LaneSet) -> LaneSet {
        LaneSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..MAX_LANES as u8).filter(move |lane| self.contains(*lane))
    }
}

impl FromIterator<u8> for LaneSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = LaneSet::EMPTY;
        for lane in iter {
            set.insert(lane);
        }
        set
    }
}

impl Display for LaneSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, lane) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", lane)?;
        }
        write!(f, "}}")
    }
}

impl Debug for LaneSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LaneSet{}", self)
    }
}

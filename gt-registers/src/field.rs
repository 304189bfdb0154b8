/// A contiguous bitfield inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(offset: u8, width: u8) -> Field {
        Field { offset, width }
    }

    pub const fn bit(offset: u8) -> Field {
        Field { offset, width: 1 }
    }

    /// Largest value that fits into the field.
    pub const fn max_value(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// The field's bits, in place.
    pub const fn mask(&self) -> u32 {
        self.max_value() << self.offset
    }

    /// Replace the field's bits in `word` with `value`. Bits of `value` that do not fit are dropped.
    pub const fn insert(&self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.offset) & self.mask())
    }

    pub const fn extract(&self, word: u32) -> u32 {
        (word & self.mask()) >> self.offset
    }
}

/// Current level and edge-detected transitions of one status signal.
///
/// The edge detectors are sticky: they stay set until the status is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Triad {
    pub live: bool,
    pub falling: bool,
    pub rising: bool,
}

impl Triad {
    pub fn has_edges(&self) -> bool {
        self.falling || self.rising
    }
}

/// Bit positions of a [`Triad`].
///
/// Cores without edge detectors only expose the live bit. Their edges always decode as clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriadBits {
    pub live: u8,
    pub falling: Option<u8>,
    pub rising: Option<u8>,
}

impl TriadBits {
    pub const fn live_only(live: u8) -> TriadBits {
        TriadBits {
            live,
            falling: None,
            rising: None,
        }
    }

    /// Live bit at `base`, falling edge at `base + 1` and rising edge at `base + 2`.
    pub const fn triad(base: u8) -> TriadBits {
        TriadBits {
            live: base,
            falling: Some(base + 1),
            rising: Some(base + 2),
        }
    }

    pub fn decode(&self, word: u32) -> Triad {
        let is_set = |bit: u8| word & (1 << bit) != 0;
        Triad {
            live: is_set(self.live),
            falling: self.falling.is_some_and(is_set),
            rising: self.rising.is_some_and(is_set),
        }
    }

    /// Encode a triad. Edges that have no bit position are dropped.
    pub fn encode(&self, triad: Triad) -> u32 {
        let mut word = 0;
        if triad.live {
            word |= 1 << self.live;
        }
        if let (true, Some(bit)) = (triad.falling, self.falling) {
            word |= 1 << bit;
        }
        if let (true, Some(bit)) = (triad.rising, self.rising) {
            word |= 1 << bit;
        }
        word
    }
}

/// A group of four consecutive per-lane flags starting at `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneBits {
    pub base: u8,
}

impl LaneBits {
    pub const fn new(base: u8) -> LaneBits {
        LaneBits { base }
    }

    pub const fn bit(&self, lane: u8) -> u32 {
        1 << (self.base + lane)
    }

    pub const fn mask(&self) -> u32 {
        0xF << self.base
    }

    pub const fn is_set(&self, word: u32, lane: u8) -> bool {
        word & self.bit(lane) != 0
    }

    /// Flags of all four lanes, lane 0 in bit 0.
    pub const fn lanes(&self, word: u32) -> u8 {
        ((word & self.mask()) >> self.base) as u8
    }
}

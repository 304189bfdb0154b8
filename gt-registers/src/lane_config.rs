//! Lane configuration register layouts.
//!
//! Each lane owns one 32-bit configuration register. The fields are the same for every
//! core family, but offsets and widths differ, and some families leave fields out entirely.
//! A missing field is written as zero and decodes as its default.
use crate::field::Field;

/// Numeric lane configuration, as written to hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneWord {
    /// Loopback code: 0 disabled, 1 near-end PCS, 2 near-end PMA, 4 far-end PCS, 6 far-end PMA.
    pub loopback: u8,
    pub rx_lpm: bool,
    pub rx_polarity: bool,
    pub tx_polarity: bool,
    pub tx_post_emph: u8,
    pub tx_main_cursor: u8,
    pub tx_pre_emph: u8,
    pub tx_diffctrl: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfigLayout {
    pub loopback: Option<Field>,
    pub rx_lpm: Option<Field>,
    pub rx_polarity: Option<Field>,
    pub tx_polarity: Option<Field>,
    pub tx_post_emph: Option<Field>,
    pub tx_main_cursor: Option<Field>,
    pub tx_pre_emph: Option<Field>,
    pub tx_diffctrl: Option<Field>,
}

impl LaneConfigLayout {
    /// `loopback[30:28] | rx_lpm[24] | tx_polarity[22] | post[21:17] | main[16:10] | pre[9:5] | diff[4:0]`
    pub const GT_PRBS: LaneConfigLayout = LaneConfigLayout {
        loopback: Some(Field::new(28, 3)),
        rx_lpm: Some(Field::bit(24)),
        rx_polarity: None,
        tx_polarity: Some(Field::bit(22)),
        tx_post_emph: Some(Field::new(17, 5)),
        tx_main_cursor: Some(Field::new(10, 7)),
        tx_pre_emph: Some(Field::new(5, 5)),
        tx_diffctrl: Some(Field::new(0, 5)),
    };

    /// `rx_lpm[24] | tx_polarity[22] | post[21:17] | pre[9:5] | diff[4:0]`
    pub const GT_LPBK: LaneConfigLayout = LaneConfigLayout {
        loopback: None,
        rx_lpm: Some(Field::bit(24)),
        rx_polarity: None,
        tx_polarity: Some(Field::bit(22)),
        tx_post_emph: Some(Field::new(17, 5)),
        tx_main_cursor: None,
        tx_pre_emph: Some(Field::new(5, 5)),
        tx_diffctrl: Some(Field::new(0, 5)),
    };

    /// `loopback[31:29] | rx_lpm[26] | rx_polarity[25] | tx_polarity[24] | post[23:18] | main[17:11] | pre[10:5] | diff[4:0]`
    pub const MULTI_GT: LaneConfigLayout = LaneConfigLayout {
        loopback: Some(Field::new(29, 3)),
        rx_lpm: Some(Field::bit(26)),
        rx_polarity: Some(Field::bit(25)),
        tx_polarity: Some(Field::bit(24)),
        tx_post_emph: Some(Field::new(18, 6)),
        tx_main_cursor: Some(Field::new(11, 7)),
        tx_pre_emph: Some(Field::new(5, 6)),
        tx_diffctrl: Some(Field::new(0, 5)),
    };

    pub fn pack(&self, lane: &LaneWord) -> u32 {
        fn put(word: u32, field: Option<Field>, value: u32) -> u32 {
            match field {
                Some(field) => field.insert(word, value),
                None => word,
            }
        }

        let mut word = 0;
        word = put(word, self.loopback, lane.loopback.into());
        word = put(word, self.rx_lpm, lane.rx_lpm.into());
        word = put(word, self.rx_polarity, lane.rx_polarity.into());
        word = put(word, self.tx_polarity, lane.tx_polarity.into());
        word = put(word, self.tx_post_emph, lane.tx_post_emph.into());
        word = put(word, self.tx_main_cursor, lane.tx_main_cursor.into());
        word = put(word, self.tx_pre_emph, lane.tx_pre_emph.into());
        put(word, self.tx_diffctrl, lane.tx_diffctrl.into())
    }

    pub fn unpack(&self, word: u32) -> LaneWord {
        let get = |field: Option<Field>| field.map_or(0, |field| field.extract(word));
        LaneWord {
            loopback: get(self.loopback) as u8,
            rx_lpm: get(self.rx_lpm) != 0,
            rx_polarity: get(self.rx_polarity) != 0,
            tx_polarity: get(self.tx_polarity) != 0,
            tx_post_emph: get(self.tx_post_emph) as u8,
            tx_main_cursor: get(self.tx_main_cursor) as u8,
            tx_pre_emph: get(self.tx_pre_emph) as u8,
            tx_diffctrl: get(self.tx_diffctrl) as u8,
        }
    }
}

//! LZMA probability models.
//!
//! LZMA uses context-dependent probability models for:
//! - Literal encoding (context = previous byte + position)
//! - Match length encoding
//! - Distance encoding
//! - State machine transitions
//!
//! The same [`LzmaModel`] drives the encoder and the verification decoder.
//! It also carries the coder state and the four rep distances, so one clone
//! is a complete snapshot to roll back to when a chunk is stored raw.

use crate::range_coder::PROB_INIT;

/// Literal context bits (default: 3).
pub const LC_DEFAULT: u32 = 3;

/// Literal position bits (default: 0).
pub const LP_DEFAULT: u32 = 0;

/// Position bits (default: 2).
pub const PB_DEFAULT: u32 = 2;

/// Largest value for each of lc, lp and pb.
pub const LCLPPB_MAX: u32 = 4;

/// Largest lc + lp an LZMA2 stream may use.
pub const LCLP_MAX: u32 = 4;

/// Maximum number of position states.
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;

/// Number of rep distances.
pub const REPS: usize = 4;

/// Number of bits for low length coding.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of bits for mid length coding.
pub const LEN_MID_BITS: u32 = 3;
/// Number of bits for high length coding.
pub const LEN_HIGH_BITS: u32 = 8;

/// Number of low length symbols.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Number of mid length symbols.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Number of high length symbols.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;
/// Number of length symbols in total.
pub const LEN_SYMBOLS_TOTAL: usize = LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + LEN_HIGH_SYMBOLS;

/// Minimum match length.
pub const MATCH_LEN_MIN: usize = 2;

/// Maximum match length.
pub const MATCH_LEN_MAX: usize = MATCH_LEN_MIN + LEN_SYMBOLS_TOTAL - 1;

/// Number of length states selecting a distance slot model.
pub const LEN_TO_DIST_STATES: usize = 4;

/// Bits in a distance slot.
pub const DIST_SLOT_BITS: u32 = 6;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 1 << DIST_SLOT_BITS;

/// Number of alignment bits for distance encoding.
pub const DIST_ALIGN_BITS: u32 = 4;
/// Size of alignment table.
pub const DIST_ALIGN_SIZE: usize = 1 << DIST_ALIGN_BITS;
/// Mask for the alignment bits.
pub const DIST_ALIGN_MASK: u32 = DIST_ALIGN_SIZE as u32 - 1;

/// First slot with footer bits.
pub const START_POS_MODEL_INDEX: usize = 4;

/// First slot whose footer uses direct bits.
pub const END_POS_MODEL_INDEX: usize = 14;

/// Number of full distance symbols.
pub const FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX >> 1);

/// Footer probabilities shared by slots 4-13. The reverse bit tree starts at
/// index 1, so one slot more than the footer count.
pub const FOOTER_PROBS: usize = FULL_DISTANCES - END_POS_MODEL_INDEX + 1;

/// Start of the footer tree of `slot` inside [`DistanceModel::special`].
#[inline]
pub fn footer_offset(slot: u32, base: u32) -> usize {
    (base - slot) as usize
}

/// Probabilities per literal coder.
pub const LITERAL_CODER_SIZE: usize = 0x300;

const LITERAL_NEXT: [u8; NUM_STATES] = [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];

/// LZMA state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(u8);

impl State {
    /// Literal following a match.
    pub const LIT_AFTER_MATCH: State = State(4);
    /// Literal following a rep.
    pub const LIT_AFTER_REP: State = State(5);
    /// Match following a literal.
    pub const MATCH_AFTER_LIT: State = State(7);
    /// Rep following a literal.
    pub const REP_AFTER_LIT: State = State(8);

    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get state value.
    #[inline]
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// Check if state represents a literal.
    #[inline]
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// State after a literal.
    #[inline]
    pub fn after_literal(self) -> Self {
        Self(LITERAL_NEXT[self.0 as usize])
    }

    /// State after a match.
    #[inline]
    pub fn after_match(self) -> Self {
        Self(if self.0 < 7 { 7 } else { 10 })
    }

    /// State after a long rep.
    #[inline]
    pub fn after_rep(self) -> Self {
        Self(if self.0 < 7 { 8 } else { 11 })
    }

    /// State after a short rep.
    #[inline]
    pub fn after_short_rep(self) -> Self {
        Self(if self.0 < 7 { 9 } else { 11 })
    }
}

/// Slot of a zero-based distance.
#[inline]
pub fn dist_slot(dist: u32) -> u32 {
    if dist < START_POS_MODEL_INDEX as u32 {
        return dist;
    }
    let n = 31 - dist.leading_zeros();
    (n << 1) | ((dist >> (n - 1)) & 1)
}

/// Distance model selector for a match length.
#[inline]
pub fn len_to_dist_state(len: usize) -> usize {
    (len - MATCH_LEN_MIN).min(LEN_TO_DIST_STATES - 1)
}

/// LZMA properties (lc, lp, pb).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProperties {
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits.
    pub lp: u32,
    /// Position bits.
    pub pb: u32,
}

impl LzmaProperties {
    /// Create new properties.
    pub fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self { lc, lp, pb }
    }

    /// Parse an LZMA2 property byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let byte = byte as u32;
        if byte >= 9 * 5 * 5 {
            return None;
        }
        let pb = byte / 45;
        let remaining = byte - pb * 45;
        let lp = remaining / 9;
        let lc = remaining - lp * 9;

        if lc + lp > LCLP_MAX {
            return None;
        }

        Some(Self { lc, lp, pb })
    }

    /// Encode to property byte.
    pub fn to_byte(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }

    /// Get number of literal states.
    pub fn num_lit_states(&self) -> usize {
        1 << (self.lc + self.lp)
    }

    /// Get number of position states.
    pub fn num_pos_states(&self) -> usize {
        1 << self.pb
    }
}

impl Default for LzmaProperties {
    fn default() -> Self {
        Self {
            lc: LC_DEFAULT,
            lp: LP_DEFAULT,
            pb: PB_DEFAULT,
        }
    }
}

/// Length model. Always sized for the largest pb.
#[derive(Debug, Clone)]
pub struct LengthModel {
    /// Choice bit (low vs mid+high).
    pub choice: u16,
    /// Choice2 bit (mid vs high).
    pub choice2: u16,
    /// Low length probabilities (per position state).
    pub low: [[u16; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
    /// Mid length probabilities (per position state).
    pub mid: [[u16; LEN_MID_SYMBOLS]; POS_STATES_MAX],
    /// High length probabilities (shared).
    pub high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthModel {
    /// Create a new length model.
    pub fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
            mid: [[PROB_INIT; LEN_MID_SYMBOLS]; POS_STATES_MAX],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    /// Reset the model.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for LengthModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Literal model.
#[derive(Debug, Clone)]
pub struct LiteralModel {
    /// Probability table for each literal state.
    pub probs: Vec<[u16; LITERAL_CODER_SIZE]>,
}

impl LiteralModel {
    /// Create a new literal model.
    pub fn new(num_lit_states: usize) -> Self {
        Self {
            probs: vec![[PROB_INIT; LITERAL_CODER_SIZE]; num_lit_states],
        }
    }

    /// Reset the model, resizing for a new lc + lp.
    pub fn reset(&mut self, num_lit_states: usize) {
        self.probs.resize(num_lit_states, [PROB_INIT; LITERAL_CODER_SIZE]);
        for state in &mut self.probs {
            state.fill(PROB_INIT);
        }
    }

    /// Get the literal state index.
    #[inline]
    pub fn get_state(pos: usize, prev_byte: u8, lc: u32, lit_pos_mask: usize) -> usize {
        ((pos & lit_pos_mask) << lc) + ((prev_byte as usize) >> (8 - lc))
    }
}

/// Distance slot model.
#[derive(Debug, Clone)]
pub struct DistanceModel {
    /// Distance slot probabilities (per length state).
    pub slot: [[u16; DIST_SLOTS]; LEN_TO_DIST_STATES],
    /// Footer probabilities for slots 4-13, addressed through [`footer_offset`].
    pub special: [u16; FOOTER_PROBS],
    /// Alignment probabilities.
    pub align: [u16; DIST_ALIGN_SIZE],
}

impl DistanceModel {
    /// Create a new distance model.
    pub fn new() -> Self {
        Self {
            slot: [[PROB_INIT; DIST_SLOTS]; LEN_TO_DIST_STATES],
            special: [PROB_INIT; FOOTER_PROBS],
            align: [PROB_INIT; DIST_ALIGN_SIZE],
        }
    }

    /// Reset the model.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete LZMA model: coder state, rep distances and all probability tables.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    /// LZMA properties.
    pub props: LzmaProperties,

    /// Current state.
    pub state: State,
    /// Most recently used distances, zero-based.
    pub reps: [u32; REPS],

    /// Is-match probabilities.
    pub is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Is-rep probabilities.
    pub is_rep: [u16; NUM_STATES],
    /// Is-rep0 probabilities.
    pub is_rep0: [u16; NUM_STATES],
    /// Is-rep1 probabilities.
    pub is_rep1: [u16; NUM_STATES],
    /// Is-rep2 probabilities.
    pub is_rep2: [u16; NUM_STATES],
    /// Is-rep0-long probabilities.
    pub is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],

    /// Match length model.
    pub match_len: LengthModel,
    /// Rep match length model.
    pub rep_len: LengthModel,

    /// Literal model.
    pub literal: LiteralModel,

    /// Distance model.
    pub distance: DistanceModel,
}

impl LzmaModel {
    /// Create a new LZMA model with the given properties.
    pub fn new(props: LzmaProperties) -> Self {
        Self {
            props,
            state: State::new(),
            reps: [0; REPS],
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep0: [PROB_INIT; NUM_STATES],
            is_rep1: [PROB_INIT; NUM_STATES],
            is_rep2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            match_len: LengthModel::new(),
            rep_len: LengthModel::new(),
            literal: LiteralModel::new(props.num_lit_states()),
            distance: DistanceModel::new(),
        }
    }

    /// Reset state, reps and all probabilities.
    pub fn reset(&mut self) {
        self.state = State::new();
        self.reps = [0; REPS];
        for state in &mut self.is_match {
            state.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep0.fill(PROB_INIT);
        self.is_rep1.fill(PROB_INIT);
        self.is_rep2.fill(PROB_INIT);
        for state in &mut self.is_rep0_long {
            state.fill(PROB_INIT);
        }
        self.match_len.reset();
        self.rep_len.reset();
        self.literal.reset(self.props.num_lit_states());
        self.distance.reset();
    }

    /// Reset with new properties.
    pub fn reset_with(&mut self, props: LzmaProperties) {
        self.props = props;
        self.reset();
    }

    /// Overwrite this model with `other`, reusing the literal allocation.
    pub fn copy_from(&mut self, other: &LzmaModel) {
        self.props = other.props;
        self.state = other.state;
        self.reps = other.reps;
        self.is_match = other.is_match;
        self.is_rep = other.is_rep;
        self.is_rep0 = other.is_rep0;
        self.is_rep1 = other.is_rep1;
        self.is_rep2 = other.is_rep2;
        self.is_rep0_long = other.is_rep0_long;
        self.match_len.clone_from(&other.match_len);
        self.rep_len.clone_from(&other.rep_len);
        self.literal.probs.clone_from(&other.literal.probs);
        self.distance.clone_from(&other.distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = State::new();
        assert!(state.is_literal());

        state = state.after_match();
        assert!(!state.is_literal());
        assert_eq!(state.value(), 7);

        state = state.after_literal();
        assert_eq!(state, State::LIT_AFTER_MATCH);

        assert_eq!(State(10).after_literal().value(), 4);
        assert_eq!(State(11).after_literal().value(), 5);
        assert_eq!(State(3).after_rep(), State::REP_AFTER_LIT);
        assert_eq!(State(8).after_short_rep().value(), 11);
    }

    #[test]
    fn test_dist_slot() {
        assert_eq!(dist_slot(0), 0);
        assert_eq!(dist_slot(3), 3);
        assert_eq!(dist_slot(4), 4);
        assert_eq!(dist_slot(5), 4);
        assert_eq!(dist_slot(6), 5);
        assert_eq!(dist_slot(127), 13);
        assert_eq!(dist_slot(128), 14);
        assert_eq!(dist_slot(u32::MAX), 63);
    }

    #[test]
    fn test_properties_encoding() {
        let props = LzmaProperties::new(3, 0, 2);
        let byte = props.to_byte();
        assert_eq!(byte, 93);
        let decoded = LzmaProperties::from_byte(byte).unwrap();
        assert_eq!(decoded, props);

        // lc + lp above 4 is not valid in LZMA2.
        assert!(LzmaProperties::from_byte(LzmaProperties::new(4, 1, 0).to_byte()).is_none());
        assert!(LzmaProperties::from_byte(225).is_none());
    }

    #[test]
    fn test_literal_state_index() {
        assert_eq!(LiteralModel::get_state(7, 0xFF, 3, 0), 7);
        assert_eq!(LiteralModel::get_state(5, 0x80, 0, 3), 1);
        assert_eq!(LiteralModel::get_state(1, 0xE0, 2, 1), (1 << 2) + 3);
    }

    #[test]
    fn test_copy_from_restores_snapshot() {
        let mut model = LzmaModel::new(LzmaProperties::default());
        let snapshot = model.clone();
        model.is_match[3][1] = 17;
        model.literal.probs[2][40] = 99;
        model.reps = [1, 2, 3, 4];
        model.state = State::MATCH_AFTER_LIT;

        model.copy_from(&snapshot);
        assert_eq!(model.is_match[3][1], PROB_INIT);
        assert_eq!(model.literal.probs[2][40], PROB_INIT);
        assert_eq!(model.reps, [0; REPS]);
        assert_eq!(model.state, State::new());
    }
}

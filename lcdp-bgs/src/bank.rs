//! Per-pixel word storage.
//!
//! All words live in two flat arenas: one `Vec` of bookkeeping records and
//! one `Vec<i16>` holding every difference code back to back. A separate
//! pair of arenas memoizes the last observed descriptor of every pixel,
//! which is what the refresh policy copies from.

use lcdp_bgs_types::NeighborhoodPattern;

/// Bookkeeping of one stored word.
///
/// Frame counters start at 1, so a zeroed record reads as unseeded:
/// `observed_since == 0` marks a slot that has never held a real
/// observation and can never match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Word {
    /// Center color at the time the word was stored.
    pub color: [u8; 3],
    /// Frame index at which this word entered the bank.
    pub observed_since: u32,
    /// Frame index of the most recent match.
    pub last_matched: u32,
    /// How many times this word has matched an incoming descriptor.
    pub match_count: u32,
}

/// The word banks of every pixel of one model instance.
pub struct WordBank {
    words_no: usize,
    code_len: usize,
    meta: Vec<Word>,
    codes: Vec<i16>,
    last_color: Vec<[u8; 3]>,
    last_code: Vec<i16>,
}

impl std::fmt::Debug for WordBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordBank")
            .field("words_no", &self.words_no)
            .field("code_len", &self.code_len)
            .field("pixels", &self.last_color.len())
            .finish_non_exhaustive()
    }
}

impl WordBank {
    /// Allocate zeroed (unseeded) banks for `n_pixels` pixels.
    pub fn new(n_pixels: usize, words_no: usize, pattern: NeighborhoodPattern) -> Self {
        let code_len = pattern.code_len();
        Self {
            words_no,
            code_len,
            meta: vec![Word::default(); n_pixels * words_no],
            codes: vec![0; n_pixels * words_no * code_len],
            last_color: vec![[0; 3]; n_pixels],
            last_code: vec![0; n_pixels * code_len],
        }
    }

    /// Words stored per pixel.
    pub fn words_no(&self) -> usize {
        self.words_no
    }

    /// Length of one difference code.
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// Bookkeeping of one slot.
    pub fn word(&self, pix: usize, slot: usize) -> &Word {
        &self.meta[pix * self.words_no + slot]
    }

    pub fn word_mut(&mut self, pix: usize, slot: usize) -> &mut Word {
        &mut self.meta[pix * self.words_no + slot]
    }

    /// Difference code of one slot.
    pub fn code(&self, pix: usize, slot: usize) -> &[i16] {
        let start = (pix * self.words_no + slot) * self.code_len;
        &self.codes[start..start + self.code_len]
    }

    /// The seeded slots of one pixel, in slot order.
    pub fn words(&self, pix: usize) -> impl Iterator<Item = (usize, &Word)> {
        self.meta[pix * self.words_no..][..self.words_no]
            .iter()
            .enumerate()
            .filter(|(_, w)| w.observed_since != 0)
    }

    /// Number of seeded slots of one pixel.
    pub fn seeded_count(&self, pix: usize) -> usize {
        self.words(pix).count()
    }

    /// Replace one slot with a fresh observation. Atomic at slot
    /// granularity: the slot is complete afterwards, no partial state.
    pub fn replace(&mut self, pix: usize, slot: usize, color: [u8; 3], code: &[i16], now: u32) {
        debug_assert_eq!(code.len(), self.code_len);
        let start = (pix * self.words_no + slot) * self.code_len;
        self.codes[start..start + self.code_len].copy_from_slice(code);
        self.meta[pix * self.words_no + slot] = Word {
            color,
            observed_since: now,
            last_matched: now,
            match_count: 0,
        };
    }

    /// Memoize the descriptor observed at `pix` this frame.
    pub fn store_last_observed(&mut self, pix: usize, color: [u8; 3], code: &[i16]) {
        debug_assert_eq!(code.len(), self.code_len);
        self.last_color[pix] = color;
        self.last_code[pix * self.code_len..][..self.code_len].copy_from_slice(code);
    }

    /// The descriptor last observed at `pix`.
    pub fn last_observed(&self, pix: usize) -> ([u8; 3], &[i16]) {
        (
            self.last_color[pix],
            &self.last_code[pix * self.code_len..][..self.code_len],
        )
    }

    /// Copy the descriptor last observed at `src_pix` into slot `slot` of
    /// `dst_pix`.
    pub fn adopt_last_observed(&mut self, src_pix: usize, dst_pix: usize, slot: usize, now: u32) {
        let code_start = src_pix * self.code_len;
        let dst_start = (dst_pix * self.words_no + slot) * self.code_len;
        // arenas are separate vectors, so the borrow of one does not
        // alias the other
        self.codes[dst_start..dst_start + self.code_len]
            .copy_from_slice(&self.last_code[code_start..code_start + self.code_len]);
        self.meta[dst_pix * self.words_no + slot] = Word {
            color: self.last_color[src_pix],
            observed_since: now,
            last_matched: now,
            match_count: 0,
        };
    }
}

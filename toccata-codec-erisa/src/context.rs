// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The block coding context: bitstream cursor, adaptive huffman ("ERINA") trees and the
//! adaptive arithmetic ("ERISA") coder with its probability models.
//!
//! Both coders are adaptive and order-1: a bank of 257 models/trees is indexed by the
//! previously emitted byte. Zero bytes are followed by a run length, itself coded with a
//! dedicated length tree or model.

use toccata_core::errors::{decode_error, Result};

pub const HUFFMAN_ESCAPE: i32 = 0x7fff_ffff;
const CODE_FLAG: u32 = 0x8000_0000;
const HUFFMAN_NULL: u16 = 0x8000;
const HUFFMAN_MAX: u32 = 0x4000;
const HUFFMAN_ROOT: usize = 0x200;

const TOTAL_LIMIT: u32 = 0x2000;
const SYMBOL_SORTS: usize = 0x101;
const ESCAPE_SYMBOL: i16 = -1;

/// Decode of a gamma code head byte: pairs of (value, bit count), -1 marking heads that need
/// the slow path.
const GAMMA_CODE_LOOKUP: [i8; 512] = [
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    8, 6, 8, 6, 8, 6, 8, 6, 16, 8, -1, -1, 17, 8, -1, -1,
    9, 6, 9, 6, 9, 6, 9, 6, 18, 8, -1, -1, 19, 8, -1, -1,
    5, 4, 5, 4, 5, 4, 5, 4, 5, 4, 5, 4, 5, 4, 5, 4,
    5, 4, 5, 4, 5, 4, 5, 4, 5, 4, 5, 4, 5, 4, 5, 4,
    10, 6, 10, 6, 10, 6, 10, 6, 20, 8, -1, -1, 21, 8, -1, -1,
    11, 6, 11, 6, 11, 6, 11, 6, 22, 8, -1, -1, 23, 8, -1, -1,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2,
    6, 4, 6, 4, 6, 4, 6, 4, 6, 4, 6, 4, 6, 4, 6, 4,
    6, 4, 6, 4, 6, 4, 6, 4, 6, 4, 6, 4, 6, 4, 6, 4,
    12, 6, 12, 6, 12, 6, 12, 6, 24, 8, -1, -1, 25, 8, -1, -1,
    13, 6, 13, 6, 13, 6, 13, 6, 26, 8, -1, -1, 27, 8, -1, -1,
    7, 4, 7, 4, 7, 4, 7, 4, 7, 4, 7, 4, 7, 4, 7, 4,
    7, 4, 7, 4, 7, 4, 7, 4, 7, 4, 7, 4, 7, 4, 7, 4,
    14, 6, 14, 6, 14, 6, 14, 6, 28, 8, -1, -1, 29, 8, -1, -1,
    15, 6, 15, 6, 15, 6, 15, 6, 30, 8, -1, -1, 31, 8, -1, -1,
];

/// A big-endian bit cursor over an attached packet buffer, prefetching 32 bits at a time.
#[derive(Default)]
pub struct BitCursor {
    buf: Vec<u8>,
    pos: usize,
    int_buf: u32,
    int_buf_count: i32,
}

impl BitCursor {
    /// Attaches a new packet, dropping any unconsumed bits.
    pub fn attach(&mut self, buf: Vec<u8>) {
        self.buf = buf;
        self.pos = 0;
        self.int_buf_count = 0;
    }

    /// Drops buffered bits so the next read starts on the next 32-bit boundary of the packet.
    pub fn flush(&mut self) {
        self.int_buf_count = 0;
    }

    fn prefetch(&mut self) -> bool {
        if self.int_buf_count != 0 {
            return true;
        }
        if self.pos >= self.buf.len() {
            return false;
        }

        let left = self.buf.len() - self.pos;
        let mut value = 0u32;
        for i in 0..left.min(4) {
            value |= u32::from(self.buf[self.pos + i]) << (24 - 8 * i);
        }
        self.pos += left.min(4);

        self.int_buf = value;
        self.int_buf_count = 32;
        true
    }

    /// Returns the next bit as 0 or -1, or 1 once the packet is exhausted.
    pub fn get_bit(&mut self) -> i32 {
        if !self.prefetch() {
            return 1;
        }

        let value = (self.int_buf as i32) >> 31;
        self.int_buf_count -= 1;
        self.int_buf <<= 1;
        value
    }

    /// Reads up-to 32 bits, most-significant first. Exhaustion truncates the read.
    pub fn get_bits(&mut self, mut n: i32) -> u32 {
        let mut code = 0u32;
        while n != 0 {
            if !self.prefetch() {
                break;
            }

            let take = n.min(self.int_buf_count);
            code = (code << take) | (self.int_buf >> (32 - take));
            n -= take;
            self.int_buf_count -= take;
            self.int_buf <<= take;
        }
        code
    }

    /// Decodes one gamma-coded value, or 0 on a broken stream.
    pub fn get_gamma_code(&mut self) -> i32 {
        if !self.prefetch() {
            return 0;
        }

        self.int_buf_count -= 1;
        let head = self.int_buf;
        self.int_buf <<= 1;
        if head & 0x8000_0000 == 0 {
            return 1;
        }

        if !self.prefetch() {
            return 0;
        }

        // Fast path: resolve short codes by their leading byte.
        if (!self.int_buf & 0x5500_0000) != 0 && self.int_buf_count >= 8 {
            let i = ((self.int_buf >> 24) << 1) as usize;
            let code = i32::from(GAMMA_CODE_LOOKUP[i]);
            let bit_count = i32::from(GAMMA_CODE_LOOKUP[i + 1]);

            if bit_count > self.int_buf_count || code <= 0 {
                return 0;
            }

            self.int_buf_count -= bit_count;
            self.int_buf <<= bit_count;
            return code;
        }

        let mut code: i32 = 0;
        let mut base: i32 = 2;
        loop {
            if self.int_buf_count >= 2 {
                let buf = self.int_buf;
                self.int_buf <<= 2;
                code = (code << 1) | (buf >> 31) as i32;
                self.int_buf_count -= 2;
                if buf & 0x4000_0000 == 0 {
                    return code + base;
                }
                base <<= 1;
            }
            else {
                if !self.prefetch() {
                    return 0;
                }
                code = (code << 1) | (self.int_buf >> 31) as i32;
                self.int_buf_count -= 1;
                self.int_buf <<= 1;

                if !self.prefetch() {
                    return 0;
                }
                let buf = self.int_buf;
                self.int_buf_count -= 1;
                self.int_buf <<= 1;
                if buf & 0x8000_0000 == 0 {
                    return code + base;
                }
                base <<= 1;
            }
        }
    }
}

#[derive(Clone, Copy, Default)]
struct HuffmanNode {
    weight: u16,
    parent: u16,
    child_code: u32,
}

/// One adaptive huffman tree, stored as an arena of nodes growing down from the root at index
/// 0x200. Leaves carry their symbol in  with the high bit set.
#[derive(Clone)]
pub struct HuffmanTree {
    nodes: [HuffmanNode; HUFFMAN_ROOT + 1],
    sym_lookup: [u16; 256],
    escape: u16,
    tree_pointer: i32,
}

impl Default for HuffmanTree {
    fn default() -> Self {
        let mut tree = HuffmanTree {
            nodes: [HuffmanNode::default(); HUFFMAN_ROOT + 1],
            sym_lookup: [HUFFMAN_NULL; 256],
            escape: HUFFMAN_NULL,
            tree_pointer: HUFFMAN_ROOT as i32,
        };
        tree.nodes[HUFFMAN_ROOT].weight = 0;
        tree.nodes[HUFFMAN_ROOT].parent = HUFFMAN_NULL;
        tree.nodes[HUFFMAN_ROOT].child_code = u32::from(HUFFMAN_NULL);
        tree
    }
}

impl HuffmanTree {
    fn recount(&mut self, parent: usize) {
        let child = self.nodes[parent].child_code as usize;
        self.nodes[parent].weight = self.nodes[child].weight + self.nodes[child + 1].weight;
    }

    /// Re-links an entry's children or symbol lookups to a new index.
    fn relink(&mut self, entry: usize, to: usize) {
        if self.nodes[entry].child_code & CODE_FLAG == 0 {
            let child = self.nodes[entry].child_code as usize;
            self.nodes[child].parent = to as u16;
            self.nodes[child + 1].parent = to as u16;
        }
        else {
            let code = (self.nodes[entry].child_code & !CODE_FLAG) as i32;
            if code != HUFFMAN_ESCAPE {
                self.sym_lookup[(code & 0xff) as usize] = to as u16;
            }
            else {
                self.escape = to as u16;
            }
        }
    }

    /// Bubbles an entry up the sibling order until weights are sorted again.
    fn normalize(&mut self, mut entry: usize) {
        while entry < HUFFMAN_ROOT {
            let mut swap = entry + 1;
            let weight = self.nodes[entry].weight;
            while swap < HUFFMAN_ROOT {
                if self.nodes[swap].weight >= weight {
                    break;
                }
                swap += 1;
            }
            swap -= 1;
            if entry == swap {
                entry = usize::from(self.nodes[entry].parent);
                self.recount(entry);
                continue;
            }

            self.relink(entry, swap);
            self.relink(swap, entry);

            let entry_parent = self.nodes[entry].parent;
            let swap_parent = self.nodes[swap].parent;
            self.nodes.swap(entry, swap);
            self.nodes[swap].parent = swap_parent;
            self.nodes[entry].parent = entry_parent;

            self.recount(usize::from(swap_parent));
            entry = usize::from(swap_parent);
        }
    }

    /// Adds a newly-seen symbol, splitting the lowest-weight node, or replacing the least
    /// occurring symbol when the arena is full.
    fn add_new_entry(&mut self, new_code: i32) {
        if self.tree_pointer > 0 {
            self.tree_pointer -= 2;
            let i = self.tree_pointer as usize;

            self.nodes[i].weight = 1;
            self.nodes[i].child_code = CODE_FLAG | new_code as u32;
            self.sym_lookup[(new_code & 0xff) as usize] = i as u16;

            if self.nodes[HUFFMAN_ROOT].child_code != u32::from(HUFFMAN_NULL) {
                // Split the lowest node: it moves to i+1 and pairs with the new leaf under a
                // fresh parent at i+2.
                self.nodes[i + 1] = self.nodes[i + 2];

                if self.nodes[i + 1].child_code & CODE_FLAG != 0 {
                    let code = (self.nodes[i + 1].child_code & !CODE_FLAG) as i32;
                    if code != HUFFMAN_ESCAPE {
                        self.sym_lookup[(code & 0xff) as usize] = (i + 1) as u16;
                    }
                    else {
                        self.escape = (i + 1) as u16;
                    }
                }

                self.nodes[i + 2].weight = self.nodes[i].weight + self.nodes[i + 1].weight;
                self.nodes[i + 2].parent = self.nodes[i + 1].parent;
                self.nodes[i + 2].child_code = i as u32;

                self.nodes[i].parent = (i + 2) as u16;
                self.nodes[i + 1].parent = (i + 2) as u16;

                self.normalize(i + 2);
            }
            else {
                // First symbol: seed the tree with the leaf and the escape.
                self.nodes[i].parent = HUFFMAN_ROOT as u16;

                self.escape = (i + 1) as u16;
                self.nodes[i + 1].weight = 1;
                self.nodes[i + 1].parent = HUFFMAN_ROOT as u16;
                self.nodes[i + 1].child_code = CODE_FLAG | HUFFMAN_ESCAPE as u32;

                self.nodes[HUFFMAN_ROOT].weight = 2;
                self.nodes[HUFFMAN_ROOT].child_code = i as u32;
            }
        }
        else {
            // Arena exhausted: replace the least occurring symbol.
            let i = self.tree_pointer as usize;
            let entry = if self.nodes[i].child_code == CODE_FLAG | HUFFMAN_ESCAPE as u32 {
                i + 1
            }
            else {
                i
            };
            self.nodes[entry].child_code = CODE_FLAG | new_code as u32;
        }
    }

    /// Halves all leaf weights and rebuilds the internal tree bottom-up.
    fn half_and_rebuild(&mut self) {
        // Compact the leaves to the top of the arena, halving their weights.
        let mut next_entry = HUFFMAN_ROOT;
        let mut i = HUFFMAN_ROOT as i32 - 1;
        while i >= self.tree_pointer {
            if self.nodes[i as usize].child_code & CODE_FLAG != 0 {
                self.nodes[i as usize].weight = (self.nodes[i as usize].weight + 1) >> 1;
                self.nodes[next_entry] = self.nodes[i as usize];
                next_entry -= 1;
            }
            i -= 1;
        }
        let mut next_entry = next_entry + 1;

        // Pair the two smallest entries repeatedly, inserting each parent into the sorted
        // remainder.
        let mut i = self.tree_pointer as usize;
        loop {
            self.nodes[i] = self.nodes[next_entry];
            self.nodes[i + 1] = self.nodes[next_entry + 1];
            next_entry += 2;

            self.relink(i, i);
            self.relink(i + 1, i + 1);

            let weight = self.nodes[i].weight + self.nodes[i + 1].weight;

            if next_entry <= HUFFMAN_ROOT {
                let mut j = next_entry;
                loop {
                    if weight <= self.nodes[j].weight {
                        self.nodes[j - 1].weight = weight;
                        self.nodes[j - 1].child_code = i as u32;
                        break;
                    }
                    self.nodes[j - 1] = self.nodes[j];
                    j += 1;
                    if j > HUFFMAN_ROOT {
                        self.nodes[HUFFMAN_ROOT].weight = weight;
                        self.nodes[HUFFMAN_ROOT].child_code = i as u32;
                        break;
                    }
                }
                next_entry -= 1;
            }
            else {
                self.nodes[HUFFMAN_ROOT].weight = weight;
                self.nodes[HUFFMAN_ROOT].parent = HUFFMAN_NULL;
                self.nodes[HUFFMAN_ROOT].child_code = i as u32;
                self.nodes[i].parent = HUFFMAN_ROOT as u16;
                self.nodes[i + 1].parent = HUFFMAN_ROOT as u16;
                break;
            }

            i += 2;
        }
    }

    fn increase_occured(&mut self, entry: usize) {
        self.nodes[entry].weight += 1;
        self.normalize(entry);

        if u32::from(self.nodes[HUFFMAN_ROOT].weight) >= HUFFMAN_MAX {
            self.half_and_rebuild();
        }
    }

    /// The root weight, exposed for consistency checks.
    pub fn root_weight(&self) -> u32 {
        u32::from(self.nodes[HUFFMAN_ROOT].weight)
    }
}

#[derive(Clone, Copy)]
struct CodeSymbol {
    occured: u16,
    symbol: i16,
}

/// An adaptive order-0 probability model: a table of (count, symbol) kept sorted by count,
/// with the total capped at 0x2000.
#[derive(Clone)]
pub struct ProbModel {
    total_count: u32,
    symbol_sorts: u32,
    sym_table: [CodeSymbol; SYMBOL_SORTS],
}

impl Default for ProbModel {
    fn default() -> Self {
        let mut model = ProbModel {
            total_count: SYMBOL_SORTS as u32,
            symbol_sorts: SYMBOL_SORTS as u32,
            sym_table: [CodeSymbol { occured: 1, symbol: 0 }; SYMBOL_SORTS],
        };
        for i in 0..0x100 {
            model.sym_table[i].symbol = i as i16;
        }
        model.sym_table[0x100].symbol = ESCAPE_SYMBOL;
        model
    }
}

impl ProbModel {
    fn half_occured_count(&mut self) {
        self.total_count = 0;
        for i in 0..self.symbol_sorts as usize {
            self.sym_table[i].occured = (self.sym_table[i].occured + 1) >> 1;
            self.total_count += u32::from(self.sym_table[i].occured);
        }
    }

    /// Counts a decoded symbol, bubbling it toward the front to keep the table sorted.
    fn increase_symbol(&mut self, mut index: usize) {
        self.sym_table[index].occured += 1;
        let symbol = self.sym_table[index];

        while index > 0 {
            if self.sym_table[index - 1].occured >= symbol.occured {
                break;
            }
            self.sym_table[index] = self.sym_table[index - 1];
            index -= 1;
        }
        self.sym_table[index] = symbol;

        self.total_count += 1;
        if self.total_count >= TOTAL_LIMIT {
            self.half_occured_count();
        }
    }

    /// Sum of all symbol counts, exposed for consistency checks.
    pub fn check_total(&self) -> (u32, u32) {
        let sum = self.sym_table[..self.symbol_sorts as usize]
            .iter()
            .map(|s| u32::from(s.occured))
            .sum();
        (self.total_count, sum)
    }
}

/// Arithmetic coder registers.
#[derive(Default)]
struct ArithRegs {
    code_register: u32,
    augend_register: u32,
    post_bit_count: i32,
}

/// Decodes one symbol index against a model, renormalizing the registers. Returns a negative
/// index on a broken stream.
fn decode_erisa_index(bits: &mut BitCursor, regs: &mut ArithRegs, model: &ProbModel) -> i32 {
    let acc = regs.code_register * model.total_count / regs.augend_register;
    if acc >= TOTAL_LIMIT {
        return -1;
    }

    let mut index = 0usize;
    let mut acc = acc as u16;
    let mut fs: u16 = 0;
    let mut occured: u16;
    loop {
        occured = model.sym_table[index].occured;
        if acc < occured {
            break;
        }
        acc -= occured;
        fs += occured;
        index += 1;
        if index as u32 >= model.symbol_sorts {
            return -1;
        }
    }

    regs.code_register -=
        (regs.augend_register * u32::from(fs) + model.total_count - 1) / model.total_count;
    regs.augend_register = regs.augend_register * u32::from(occured) / model.total_count;

    if regs.augend_register == 0 {
        return -1;
    }

    // Renormalize: shift in stream bits; a long run of exhausted-stream bits means the packet
    // was corrupt.
    while regs.augend_register & 0x8000 == 0 {
        let mut next_bit = bits.get_bit();
        if next_bit == 1 {
            regs.post_bit_count += 1;
            if regs.post_bit_count >= 256 {
                return -1;
            }
            next_bit = 0;
        }
        regs.code_register = (regs.code_register << 1) | (next_bit as u32 & 0x01);
        regs.augend_register <<= 1;
    }

    regs.code_register &= 0xffff;

    index as i32
}

/// Which symbol coder the context is prepared for.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Coder {
    None,
    Erina,
    Erisa,
}

/// The full decode context for one stream.
pub struct MioContext {
    bits: BitCursor,
    coder: Coder,
    /// Pending zero-run length.
    length: u32,

    /* ERINA (huffman) state */
    erina_order0: bool,
    trees: Vec<HuffmanTree>,
    last_tree: usize,

    /* ERISA (arithmetic) state */
    regs: ArithRegs,
    models: Vec<ProbModel>,
    phrase_len_prob: ProbModel,
    phrase_index_prob: ProbModel,
    run_len_prob: ProbModel,
    last_prob: usize,
}

impl Default for MioContext {
    fn default() -> Self {
        MioContext {
            bits: BitCursor::default(),
            coder: Coder::None,
            length: 0,
            erina_order0: false,
            trees: Vec::new(),
            last_tree: 0,
            regs: ArithRegs::default(),
            models: Vec::new(),
            phrase_len_prob: ProbModel::default(),
            phrase_index_prob: ProbModel::default(),
            run_len_prob: ProbModel::default(),
            last_prob: 0,
        }
    }
}

impl MioContext {
    pub fn new() -> MioContext {
        MioContext::default()
    }

    /// Attaches a packet's bytes as the input bitstream.
    pub fn attach(&mut self, buf: Vec<u8>) {
        self.bits.attach(buf);
    }

    /// Drops buffered bits (called between packets).
    pub fn flush(&mut self) {
        self.bits.flush();
    }

    pub fn get_bit(&mut self) -> i32 {
        self.bits.get_bit()
    }

    pub fn get_bits(&mut self, n: i32) -> u32 {
        self.bits.get_bits(n)
    }

    /// Resets all huffman trees for a keyframe. Order-1 keeps 257 trees indexed by the
    /// previous byte.
    pub fn prepare_erina(&mut self, order1: bool) {
        self.erina_order0 = !order1;
        self.length = 0;
        self.trees = vec![HuffmanTree::default(); SYMBOL_SORTS];
        self.last_tree = 0;
        self.coder = Coder::Erina;
    }

    /// Resets all probability models and primes the registers for a keyframe.
    pub fn prepare_erisa(&mut self) {
        self.models = vec![ProbModel::default(); SYMBOL_SORTS];
        self.phrase_len_prob = ProbModel::default();
        self.phrase_index_prob = ProbModel::default();
        self.run_len_prob = ProbModel::default();
        self.last_prob = 0;
        self.initialize_erisa();
        self.coder = Coder::Erisa;
    }

    /// Re-primes the registers at a non-key packet boundary, keeping the adapted models.
    pub fn initialize_erisa(&mut self) {
        self.length = 0;
        self.regs.code_register = self.bits.get_bits(32);
        self.regs.augend_register = 0xffff;
        self.regs.post_bit_count = 0;
    }

    /// True when a keyframe has prepared a symbol coder.
    pub fn is_prepared(&self) -> bool {
        self.coder != Coder::None
    }

    /// Reads one huffman symbol from a tree, adapting weights and adding escaped symbols.
    fn get_huffman(&mut self, tree_index: usize, escape_gamma: bool) -> i32 {
        let erina_order0 = self.erina_order0;
        let bits = &mut self.bits;
        let tree = &mut self.trees[tree_index];

        if tree.escape != HUFFMAN_NULL {
            let mut entry = HUFFMAN_ROOT;
            let mut child = tree.nodes[HUFFMAN_ROOT].child_code;

            loop {
                if !bits.prefetch() {
                    return HUFFMAN_ESCAPE;
                }

                entry = child as usize + (bits.int_buf >> 31) as usize;
                bits.int_buf_count -= 1;
                bits.int_buf <<= 1;
                child = tree.nodes[entry].child_code;

                if child & CODE_FLAG != 0 {
                    break;
                }
            }

            if !erina_order0 || u32::from(tree.nodes[HUFFMAN_ROOT].weight) < HUFFMAN_MAX - 1 {
                tree.increase_occured(entry);
            }

            let code = (child & !CODE_FLAG) as i32;
            if code != HUFFMAN_ESCAPE {
                return code;
            }
        }

        let code = if escape_gamma {
            let code = bits.get_gamma_code();
            if code == -1 {
                return HUFFMAN_ESCAPE;
            }
            code
        }
        else {
            bits.get_bits(8) as i32
        };
        self.trees[tree_index].add_new_entry(code);

        code
    }

    /// Decodes  huffman-coded bytes, handling zero runs. Returns the count
    /// actually produced.
    fn decode_erina_bytes(&mut self, dst: &mut [i8]) -> usize {
        let mut tree = self.last_tree;
        let mut i = 0usize;

        if self.length > 0 {
            let length = (self.length as usize).min(dst.len());
            self.length -= length as u32;
            for _ in 0..length {
                dst[i] = 0;
                i += 1;
            }
        }

        while i < dst.len() {
            let symbol = self.get_huffman(tree, false);
            if symbol == HUFFMAN_ESCAPE {
                break;
            }
            dst[i] = symbol as u8 as i8;
            i += 1;

            if symbol == 0 {
                let length = self.get_huffman(0x100, true);
                if length == HUFFMAN_ESCAPE {
                    break;
                }
                let length = length - 1;
                if length > 0 {
                    let mut length = length as u32;
                    self.length = length;
                    if i as u32 + length > dst.len() as u32 {
                        length = (dst.len() - i) as u32;
                    }
                    self.length -= length;
                    for _ in 0..length {
                        dst[i] = 0;
                        i += 1;
                    }
                }
            }
            tree = (symbol & 0xff) as usize;
        }
        self.last_tree = tree;

        i
    }

    /// Decodes one symbol against an explicit model kind.
    fn decode_erisa_in(&mut self, which: Probs) -> Option<i16> {
        let MioContext {
            bits, regs, models, phrase_len_prob, phrase_index_prob, run_len_prob, ..
        } = self;
        let model = match which {
            Probs::Table(index) => &mut models[index],
            Probs::PhraseLen => phrase_len_prob,
            Probs::PhraseIndex => phrase_index_prob,
            Probs::RunLen => run_len_prob,
        };

        let index = decode_erisa_index(bits, regs, model);
        if index < 0 {
            return None;
        }
        let symbol = model.sym_table[index as usize].symbol;
        model.increase_symbol(index as usize);
        Some(symbol)
    }

    /// Decodes  arithmetic-coded bytes, handling zero runs.
    fn decode_erisa_bytes(&mut self, dst: &mut [i8]) -> usize {
        let mut prob = self.last_prob;
        let mut i = 0usize;

        while i < dst.len() {
            if self.length > 0 {
                let current = (dst.len() - i).min(self.length as usize);
                self.length -= current as u32;
                for _ in 0..current {
                    dst[i] = 0;
                    i += 1;
                }
                continue;
            }

            let symbol = match self.decode_erisa_in(Probs::Table(prob)) {
                Some(symbol) => symbol,
                None => break,
            };
            dst[i] = symbol as i8;
            i += 1;

            if symbol == 0 {
                match self.decode_erisa_in(Probs::RunLen) {
                    Some(length) => self.length = length as u16 as u32,
                    None => break,
                }
            }

            prob = (symbol & 0xff) as usize;
        }
        self.last_prob = prob;

        i
    }

    /// Decodes bytes with whichever coder the last keyframe prepared.
    pub fn decode_symbol_bytes(&mut self, dst: &mut [i8]) -> Result<()> {
        let produced = match self.coder {
            Coder::Erina => self.decode_erina_bytes(dst),
            Coder::Erisa => self.decode_erisa_bytes(dst),
            Coder::None => return decode_error("erisa: packet before keyframe"),
        };
        if produced < dst.len() {
            return decode_error("erisa: symbol stream exhausted");
        }
        Ok(())
    }

    /// Decodes 16-bit words (arithmetic architecture only): escapes select a two-model
    /// phrase-coded wide value, zeros carry run lengths.
    pub fn decode_erisa_words(&mut self, dst: &mut [i16]) -> Result<()> {
        if self.coder != Coder::Erisa {
            return decode_error("erisa: packet before keyframe");
        }

        let mut prob = self.last_prob;
        let mut i = 0usize;

        'outer: while i < dst.len() {
            if self.length > 0 {
                let current = (dst.len() - i).min(self.length as usize);
                self.length -= current as u32;
                for _ in 0..current {
                    dst[i] = 0;
                    i += 1;
                }
                continue;
            }

            let symbol = match self.decode_erisa_in(Probs::Table(prob)) {
                Some(symbol) => symbol,
                None => break,
            };

            if symbol == ESCAPE_SYMBOL {
                let high = match self.decode_erisa_in(Probs::PhraseIndex) {
                    Some(value) => value,
                    None => break 'outer,
                };
                let low = match self.decode_erisa_in(Probs::PhraseLen) {
                    Some(value) => value,
                    None => break 'outer,
                };
                dst[i] = ((high as i32) << 8 | (low as i32 & 0xff)) as i16;
                i += 1;
                prob = 0x100;
            }
            else {
                dst[i] = symbol as i8 as i16;
                i += 1;
                prob = (symbol & 0xff) as usize;

                if symbol == 0 {
                    match self.decode_erisa_in(Probs::RunLen) {
                        Some(length) => self.length = length as u16 as u32,
                        None => break,
                    }
                }
            }
        }
        self.last_prob = prob;

        if i < dst.len() {
            return decode_error("erisa: symbol stream exhausted");
        }
        Ok(())
    }

    /// Consistency probe used by tests: the run-length model state.
    #[cfg(test)]
    fn run_len_model(&self) -> &ProbModel {
        &self.run_len_prob
    }
}

#[derive(Clone, Copy)]
enum Probs {
    Table(usize),
    PhraseLen,
    PhraseIndex,
    RunLen,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes a gamma code the way the decoder expects it: 0 for one, else a flag bit
    /// followed by (bit, continue) pairs.
    fn put_gamma(bits: &mut Vec<bool>, value: u32) {
        assert!(value >= 1);
        if value == 1 {
            bits.push(false);
            return;
        }
        let k = 31 - value.leading_zeros();
        let code = value - (1 << k);
        bits.push(true);
        for i in (0..k).rev() {
            bits.push(code & (1 << i) != 0);
            bits.push(i != 0);
        }
    }

    fn pack_msb(bits: &[bool]) -> Vec<u8> {
        let mut out = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        out
    }

    #[test]
    fn verify_gamma_codes_roundtrip() {
        for value in 1..200u32 {
            let mut bits = Vec::new();
            put_gamma(&mut bits, value);
            let mut cursor = BitCursor::default();
            cursor.attach(pack_msb(&bits));
            assert_eq!(cursor.get_gamma_code(), value as i32, "value {}", value);
        }
    }

    #[test]
    fn verify_get_bits_msb_first() {
        let mut cursor = BitCursor::default();
        cursor.attach(vec![0xa5, 0x5a, 0xff, 0x00, 0x12]);
        assert_eq!(cursor.get_bits(4), 0xa);
        assert_eq!(cursor.get_bits(8), 0x55);
        assert_eq!(cursor.get_bits(12), 0xaff);
        // Spans the 32-bit prefetch boundary.
        assert_eq!(cursor.get_bits(16), 0x0012);
    }

    #[test]
    fn verify_erina_literals_via_escape() {
        // With empty trees every symbol escapes to an 8-bit literal.
        let mut context = MioContext::new();
        context.prepare_erina(true);
        context.attach(vec![0x41, 0x42]);

        let mut dst = [0i8; 2];
        context.decode_symbol_bytes(&mut dst).unwrap();
        assert_eq!(dst, [0x41, 0x42]);
    }

    #[test]
    fn verify_erina_zero_run() {
        // A zero literal is followed by a gamma-coded run length (3 -> bits 1,1,0).
        let mut bits = Vec::new();
        for _ in 0..8 {
            bits.push(false);
        }
        put_gamma(&mut bits, 3);

        let mut context = MioContext::new();
        context.prepare_erina(true);
        context.attach(pack_msb(&bits));

        let mut dst = [1i8; 3];
        context.decode_symbol_bytes(&mut dst).unwrap();
        assert_eq!(dst, [0, 0, 0]);
    }

    #[test]
    fn verify_erina_repeated_symbols_adapt() {
        // The same byte twice under order-1: both escape (fresh per-symbol trees), then the
        // trees carry weight.
        let mut context = MioContext::new();
        context.prepare_erina(true);
        context.attach(vec![0x41, 0x41, 0x00]);

        let mut dst = [0i8; 2];
        context.decode_symbol_bytes(&mut dst).unwrap();
        assert_eq!(dst, [0x41, 0x41]);
        assert!(context.trees[0].root_weight() < HUFFMAN_MAX);
        assert!(context.trees[0x41].root_weight() < HUFFMAN_MAX);
    }

    #[test]
    fn verify_unprepared_context_rejects_packets() {
        let mut context = MioContext::new();
        context.attach(vec![0u8; 16]);
        let mut dst = [0i8; 4];
        assert!(context.decode_symbol_bytes(&mut dst).is_err());
    }

    #[test]
    fn verify_erisa_model_counts_stay_consistent() {
        // Feed an arbitrary bitstream; whatever symbols come out, the model invariants must
        // hold: sum(occured) == total_count < 0x2000.
        let mut context = MioContext::new();
        context.attach((0..64u8).map(|i| i.wrapping_mul(37)).collect());
        context.prepare_erisa();

        let mut dst = [0i8; 16];
        let _ = context.decode_erisa_bytes(&mut dst);

        for model in context.models.iter().chain([&context.run_len_prob]) {
            let (total, sum) = model.check_total();
            assert_eq!(total, sum);
            assert!(total < TOTAL_LIMIT);
        }
        let (total, _) = context.run_len_model().check_total();
        assert!(total >= SYMBOL_SORTS as u32);
    }

    #[test]
    fn verify_erisa_uniform_model_first_decode() {
        // With the initial uniform model the first decoded index equals
        // code * 257 / 0xffff for a fresh 32-bit code register, and the model grows by one.
        let mut context = MioContext::new();
        context.attach(vec![0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00]);
        context.prepare_erisa();

        let mut dst = [0i8; 1];
        let produced = context.decode_erisa_bytes(&mut dst);
        assert_eq!(produced, 1);

        let (total, sum) = context.models[0].check_total();
        assert_eq!(total, sum);
        assert_eq!(total, SYMBOL_SORTS as u32 + 1);
    }
}

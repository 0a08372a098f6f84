//! The default VCDIFF instruction code table (RFC 3284 Appendix)
//!
//! 256 entries, each naming up to two half-instructions. Packing two
//! instructions per opcode lets common ADD+COPY and COPY+ADD pairs collapse
//! to a single instruction byte.

/// Kind of half-instruction named by a code table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstKind {
    /// Not present — only the first half-instruction applies.
    Noop,
    /// Append `size` literal bytes from the data section.
    Add,
    /// Repeat one byte from the data section `size` times.
    Run,
    /// Copy `size` bytes from the address `mode` resolves to.
    Copy,
}

/// One decoded half-instruction: a kind, a size (`0` means "read a
/// variable-length size from the instruction section"), and — for `Copy` —
/// the address mode.
#[derive(Debug, Clone, Copy)]
pub struct HalfInstruction {
    /// Which operation this half-instruction performs
    pub kind: InstKind,
    /// Fixed size, or `0` if the size is encoded separately
    pub size: u8,
    /// Address mode (only meaningful when `kind == Copy`)
    pub mode: u8,
}

const NOOP: HalfInstruction = HalfInstruction {
    kind: InstKind::Noop,
    size: 0,
    mode: 0,
};

/// One code table row: up to two half-instructions.
#[derive(Debug, Clone, Copy)]
pub struct CodeEntry {
    /// First half-instruction (always present)
    pub first: HalfInstruction,
    /// Second half-instruction (`Noop` if this opcode names only one)
    pub second: HalfInstruction,
}

/// Build the default code table (RFC 3284 Appendix).
///
/// Custom code tables are a format feature this decoder does not support;
/// every parsed patch is checked against this one table.
pub fn default_code_table() -> [CodeEntry; 256] {
    let mut table = [CodeEntry {
        first: NOOP,
        second: NOOP,
    }; 256];

    table[0] = CodeEntry {
        first: HalfInstruction {
            kind: InstKind::Run,
            size: 0,
            mode: 0,
        },
        second: NOOP,
    };

    for idx in 1u16..=18 {
        let size = (idx - 1) as u8;
        table[idx as usize] = CodeEntry {
            first: HalfInstruction {
                kind: InstKind::Add,
                size,
                mode: 0,
            },
            second: NOOP,
        };
    }

    for idx in 19u16..=162 {
        let offset = idx - 19;
        let mode = (offset / 16) as u8;
        let size = if offset % 16 == 0 { 0 } else { (3 + offset % 16) as u8 };
        table[idx as usize] = CodeEntry {
            first: HalfInstruction {
                kind: InstKind::Copy,
                size,
                mode,
            },
            second: NOOP,
        };
    }

    for idx in 163u16..=234 {
        let offset = idx - 163;
        let add_size = (1 + (offset / 3) % 4) as u8;
        let copy_size = (4 + offset % 3) as u8;
        let mode = (offset / 12) as u8;
        table[idx as usize] = CodeEntry {
            first: HalfInstruction {
                kind: InstKind::Add,
                size: add_size,
                mode: 0,
            },
            second: HalfInstruction {
                kind: InstKind::Copy,
                size: copy_size,
                mode,
            },
        };
    }

    for idx in 235u16..=246 {
        let offset = idx - 235;
        let add_size = (1 + offset % 4) as u8;
        let mode = (offset / 4) as u8;
        table[idx as usize] = CodeEntry {
            first: HalfInstruction {
                kind: InstKind::Add,
                size: add_size,
                mode: 0,
            },
            second: HalfInstruction {
                kind: InstKind::Copy,
                size: 4,
                mode,
            },
        };
    }

    for idx in 247u16..=255 {
        let mode = (idx - 247) as u8;
        table[idx as usize] = CodeEntry {
            first: HalfInstruction {
                kind: InstKind::Copy,
                size: 4,
                mode,
            },
            second: HalfInstruction {
                kind: InstKind::Add,
                size: 1,
                mode: 0,
            },
        };
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_zero_is_variable_length_run() {
        let table = default_code_table();
        assert_eq!(table[0].first.kind, InstKind::Run);
        assert_eq!(table[0].first.size, 0);
        assert_eq!(table[0].second.kind, InstKind::Noop);
    }

    #[test]
    fn entry_one_is_variable_length_add() {
        let table = default_code_table();
        assert_eq!(table[1].first.kind, InstKind::Add);
        assert_eq!(table[1].first.size, 0);
    }

    #[test]
    fn last_entry_is_copy_then_add() {
        let table = default_code_table();
        assert_eq!(table[255].first.kind, InstKind::Copy);
        assert_eq!(table[255].first.mode, 8);
        assert_eq!(table[255].second.kind, InstKind::Add);
        assert_eq!(table[255].second.size, 1);
    }
}

// ARM32 operand model: memory operands with their six addressing modes, the
// flexible second operand (rotated 8-bit immediate or shifted register), and
// shift kinds. The immediate encoders here are the source of truth for what
// the lowering may put into an instruction; anything else must go through a
// scratch register.

//! Memory operands and the flexible second operand.

use std::fmt;

use crate::ir::Type;

use super::{type_attrs, Reg};

/// Register shift kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

impl ShiftKind {
    pub fn name(self) -> &'static str {
        match self {
            ShiftKind::Lsl => "lsl",
            ShiftKind::Lsr => "lsr",
            ShiftKind::Asr => "asr",
            ShiftKind::Ror => "ror",
            ShiftKind::Rrx => "rrx",
        }
    }

    pub fn encoding(self) -> u32 {
        match self {
            ShiftKind::Lsl => 0,
            ShiftKind::Lsr => 1,
            ShiftKind::Asr => 2,
            ShiftKind::Ror | ShiftKind::Rrx => 3,
        }
    }
}

/// Addressing modes of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Offset,
    PreIndex,
    PostIndex,
    NegOffset,
    NegPreIndex,
    NegPostIndex,
}

impl AddrMode {
    pub fn is_negative(self) -> bool {
        matches!(self, AddrMode::NegOffset | AddrMode::NegPreIndex | AddrMode::NegPostIndex)
    }

    pub fn writes_back(self) -> bool {
        matches!(self, AddrMode::PreIndex | AddrMode::NegPreIndex)
    }

    pub fn is_post_indexed(self) -> bool {
        matches!(self, AddrMode::PostIndex | AddrMode::NegPostIndex)
    }
}

/// Offset part of a memory operand: an immediate, or an index register with an
/// optional immediate shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOffset {
    Imm(i32),
    Reg { index: Reg, shift: ShiftKind, amount: u8 },
}

/// A memory operand: base register plus offset, under an addressing mode.
/// The accessed type selects the mnemonic suffix and the offset budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub ty: Type,
    pub base: Reg,
    pub offset: MemOffset,
    pub mode: AddrMode,
}

impl MemOperand {
    pub fn base_offset(ty: Type, base: Reg, offset: i32) -> Self {
        Self { ty, base, offset: MemOffset::Imm(offset), mode: AddrMode::Offset }
    }

    /// Whether `offset` fits the immediate offset field for accesses of type
    /// `ty`. Offsets are encoded sign-magnitude, so the check is on the
    /// absolute value against the type's bit budget; sign-extending and
    /// zero-extending loads have different budgets.
    pub fn can_hold_offset(ty: Type, sign_ext: bool, offset: i32) -> bool {
        let attrs = type_attrs(ty);
        let bits = if sign_ext { attrs.sext_offset_bits } else { attrs.zext_offset_bits };
        if bits == 0 {
            return offset == 0;
        }
        offset.unsigned_abs() < (1u32 << bits)
    }
}

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.mode.is_negative() { "-" } else { "" };
        if self.mode.is_post_indexed() {
            write!(f, "[{}], ", self.base)?;
            return match self.offset {
                MemOffset::Imm(imm) => write!(f, "#{sign}{imm}"),
                MemOffset::Reg { index, shift, amount } => {
                    if amount == 0 {
                        write!(f, "{sign}{index}")
                    } else {
                        write!(f, "{sign}{index}, {} #{amount}", shift.name())
                    }
                }
            };
        }
        write!(f, "[{}", self.base)?;
        match self.offset {
            MemOffset::Imm(0) => {}
            MemOffset::Imm(imm) => write!(f, ", #{sign}{imm}")?,
            MemOffset::Reg { index, shift, amount } => {
                write!(f, ", {sign}{index}")?;
                if amount != 0 {
                    write!(f, ", {} #{amount}", shift.name())?;
                }
            }
        }
        write!(f, "]")?;
        if self.mode.writes_back() {
            write!(f, "!")?;
        }
        Ok(())
    }
}

/// The rotated-immediate form of the flexible second operand: an 8-bit value
/// rotated right by twice `rotate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexImm {
    pub imm8: u32,
    pub rotate: u32,
}

impl FlexImm {
    /// Find an encoding for `value`, trying rotation 0 first for the common
    /// small immediates. Returns the first representation found.
    pub fn from_value(value: u32) -> Option<FlexImm> {
        if value <= 0xFF {
            return Some(FlexImm { imm8: value, rotate: 0 });
        }
        for rotate in 1..16u32 {
            let imm8 = value.rotate_left(2 * rotate);
            if imm8 <= 0xFF {
                return Some(FlexImm { imm8, rotate });
            }
        }
        None
    }

    /// The immediate this encoding denotes.
    pub fn value(self) -> u32 {
        self.imm8.rotate_right(2 * self.rotate)
    }

    /// The 12-bit operand field.
    pub fn encoding(self) -> u32 {
        (self.rotate << 8) | self.imm8
    }
}

/// Shift amount of a register flexible operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftAmount {
    Imm(u8),
    Reg(Reg),
}

/// The flexible second operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexOp2 {
    Imm(FlexImm),
    Reg { reg: Reg, shift: ShiftKind, amount: ShiftAmount },
}

impl FlexOp2 {
    /// A plain register operand.
    pub fn reg(reg: Reg) -> FlexOp2 {
        FlexOp2::Reg { reg, shift: ShiftKind::Lsl, amount: ShiftAmount::Imm(0) }
    }

    pub fn imm(value: u32) -> Option<FlexOp2> {
        FlexImm::from_value(value).map(FlexOp2::Imm)
    }
}

impl fmt::Display for FlexOp2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FlexOp2::Imm(imm) => write!(f, "#{}", imm.value()),
            FlexOp2::Reg { reg, shift: _, amount: ShiftAmount::Imm(0) } => write!(f, "{reg}"),
            FlexOp2::Reg { reg, shift, amount: ShiftAmount::Imm(n) } => {
                write!(f, "{reg}, {} #{n}", shift.name())
            }
            FlexOp2::Reg { reg, shift, amount: ShiftAmount::Reg(amount) } => {
                write!(f, "{reg}, {} {amount}", shift.name())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flex_imm_round_trip() {
        for value in [0u32, 1, 0xFF, 0x100, 0xFF00, 0x3FC, 0xC000_003F, 0xF000_000F] {
            let imm = FlexImm::from_value(value)
                .unwrap_or_else(|| panic!("{value:#x} should be encodable"));
            assert_eq!(imm.value(), value, "round trip failed for {value:#x}");
            assert!(imm.imm8 <= 0xFF);
            assert!(imm.rotate < 16);
        }
    }

    #[test]
    fn test_flex_imm_rejects_unencodable() {
        assert!(FlexImm::from_value(0x101).is_none());
        assert!(FlexImm::from_value(0x1234_5678).is_none());
        assert!(FlexImm::from_value(0xFFFF).is_none());
    }

    #[test]
    fn test_small_values_use_rotation_zero() {
        let imm = FlexImm::from_value(0xE0).unwrap();
        assert_eq!(imm.rotate, 0);
        assert_eq!(imm.imm8, 0xE0);
    }

    #[test]
    fn test_offset_budgets() {
        // ldr/str on i32 have a 12-bit budget.
        assert!(MemOperand::can_hold_offset(Type::I32, false, 4095));
        assert!(MemOperand::can_hold_offset(Type::I32, false, -4095));
        assert!(!MemOperand::can_hold_offset(Type::I32, false, 4096));
        // ldrsh is limited to 8 bits.
        assert!(MemOperand::can_hold_offset(Type::I16, true, 255));
        assert!(!MemOperand::can_hold_offset(Type::I16, true, 256));
        // Sign-extending byte loads have a narrower budget than ldrb.
        assert!(MemOperand::can_hold_offset(Type::I8, false, 1000));
        assert!(!MemOperand::can_hold_offset(Type::I8, true, 1000));
        // Vector types take no immediate offset at all.
        assert!(MemOperand::can_hold_offset(Type::V4I32, false, 0));
        assert!(!MemOperand::can_hold_offset(Type::V4I32, false, 4));
    }

    #[test]
    fn test_mem_operand_display() {
        let mem = MemOperand::base_offset(Type::I32, Reg::FP, -8);
        assert_eq!(mem.to_string(), "[fp, #-8]");
        let mem = MemOperand::base_offset(Type::I32, Reg::R0, 0);
        assert_eq!(mem.to_string(), "[r0]");
        let pre = MemOperand {
            ty: Type::I32,
            base: Reg::SP,
            offset: MemOffset::Imm(4),
            mode: AddrMode::PreIndex,
        };
        assert_eq!(pre.to_string(), "[sp, #4]!");
        let idx = MemOperand {
            ty: Type::I32,
            base: Reg::R1,
            offset: MemOffset::Reg { index: Reg::R2, shift: ShiftKind::Lsl, amount: 2 },
            mode: AddrMode::NegOffset,
        };
        assert_eq!(idx.to_string(), "[r1, -r2, lsl #2]");
    }
}

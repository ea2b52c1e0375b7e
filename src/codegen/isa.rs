//! Operand and mnemonic types for the target's two-operand instruction set.
//!
//! Grounded on `cc/assembler.py`'s `Reg`/`Offset`/`Deref`/`Push`/`Pop`
//! operand hierarchy and its `emit_*` mnemonic methods.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    A,
    B,
    C,
    X,
    Y,
    Z,
    I,
    J,
    Sp,
    Pc,
    Ex,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reg::A => "A",
            Reg::B => "B",
            Reg::C => "C",
            Reg::X => "X",
            Reg::Y => "Y",
            Reg::Z => "Z",
            Reg::I => "I",
            Reg::J => "J",
            Reg::Sp => "SP",
            Reg::Pc => "PC",
            Reg::Ex => "EX",
        };
        write!(f, "{}", s)
    }
}

/// The general-purpose scratch pool used by the linear register allocator,
/// in allocation order (grounded on `cc/translator.py`'s `[I,Z,Y,X,C,B,A]`
/// — allocated last-to-first so `A`/`B`/`C` are freed up first for reg-call
/// argument passing and return values).
pub const SCRATCH_POOL: [Reg; 7] = [Reg::I, Reg::Z, Reg::Y, Reg::X, Reg::C, Reg::B, Reg::A];

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(Reg),
    /// A literal or symbolic constant, e.g. `5` or a label name.
    Literal(String),
    /// `reg + offset`, rendered as `reg`, `reg + n`, or `reg - n`.
    Offset(Reg, i32),
    Deref(Box<Operand>),
    Push,
    Pop,
}

impl Operand {
    pub fn offset(reg: Reg, offset: i32) -> Operand {
        if offset == 0 {
            Operand::Reg(reg)
        } else {
            Operand::Offset(reg, offset)
        }
    }

    pub fn deref(inner: Operand) -> Operand {
        Operand::Deref(Box::new(inner))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Literal(s) => write!(f, "{}", s),
            Operand::Offset(r, off) => {
                if *off < 0 {
                    write!(f, "{} - {}", r, -off)
                } else {
                    write!(f, "{} + {}", r, off)
                }
            }
            Operand::Deref(inner) => write!(f, "[{}]", inner),
            Operand::Push => write!(f, "PUSH"),
            Operand::Pop => write!(f, "POP"),
        }
    }
}

/// Two-operand mnemonics of the target ISA. Grounded 1:1 on `cc/assembler.py`'s
/// `emit_*` method names and spec.md's instruction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinMnemonic {
    Set,
    Add,
    Sub,
    Mul,
    Mli,
    Div,
    Dvi,
    Mod,
    Mdi,
    And,
    Bor,
    Xor,
    Shr,
    Asr,
    Shl,
    Ifb,
    Ifc,
    Ife,
    Ifn,
    Ifg,
    Ifa,
    Ifl,
    Ifu,
    Adx,
    Sbx,
    Sti,
    Std,
}

impl fmt::Display for BinMnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinMnemonic::Set => "SET",
            BinMnemonic::Add => "ADD",
            BinMnemonic::Sub => "SUB",
            BinMnemonic::Mul => "MUL",
            BinMnemonic::Mli => "MLI",
            BinMnemonic::Div => "DIV",
            BinMnemonic::Dvi => "DVI",
            BinMnemonic::Mod => "MOD",
            BinMnemonic::Mdi => "MDI",
            BinMnemonic::And => "AND",
            BinMnemonic::Bor => "BOR",
            BinMnemonic::Xor => "XOR",
            BinMnemonic::Shr => "SHR",
            BinMnemonic::Asr => "ASR",
            BinMnemonic::Shl => "SHL",
            BinMnemonic::Ifb => "IFB",
            BinMnemonic::Ifc => "IFC",
            BinMnemonic::Ife => "IFE",
            BinMnemonic::Ifn => "IFN",
            BinMnemonic::Ifg => "IFG",
            BinMnemonic::Ifa => "IFA",
            BinMnemonic::Ifl => "IFL",
            BinMnemonic::Ifu => "IFU",
            BinMnemonic::Adx => "ADX",
            BinMnemonic::Sbx => "SBX",
            BinMnemonic::Sti => "STI",
            BinMnemonic::Std => "STD",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnMnemonic {
    Jsr,
    Int,
    Iag,
    Ias,
    Rfi,
    Iaq,
    Hwn,
    Hwq,
    Hwi,
}

impl fmt::Display for UnMnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnMnemonic::Jsr => "JSR",
            UnMnemonic::Int => "INT",
            UnMnemonic::Iag => "IAG",
            UnMnemonic::Ias => "IAS",
            UnMnemonic::Rfi => "RFI",
            UnMnemonic::Iaq => "IAQ",
            UnMnemonic::Hwn => "HWN",
            UnMnemonic::Hwq => "HWQ",
            UnMnemonic::Hwi => "HWI",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_zero_collapses_to_bare_reg() {
        assert_eq!(Operand::offset(Reg::X, 0), Operand::Reg(Reg::X));
    }

    #[test]
    fn offset_display_matches_assembler_convention() {
        assert_eq!(Operand::offset(Reg::X, 4).to_string(), "X + 4");
        assert_eq!(Operand::offset(Reg::X, -4).to_string(), "X - 4");
    }

    #[test]
    fn deref_wraps_in_brackets() {
        assert_eq!(Operand::deref(Operand::Reg(Reg::J)).to_string(), "[J]");
    }
}

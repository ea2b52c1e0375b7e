//! Type model for the C subset.
//!
//! A closed variant set: integers (width, signedness), pointers, arrays,
//! functions (with calling convention), and void. See spec §3.

use std::fmt;

/// Calling convention carried on a function type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// All arguments pushed right-to-left; caller cleans; return in `A`.
    StackCall,
    /// First three arguments in `A, B, C`; remainder on the stack; caller cleans.
    RegCall,
}

impl Default for CallConv {
    fn default() -> Self {
        CallConv::StackCall
    }
}

/// A function's full signature, independent of its definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncSig {
    pub ret: Box<Type>,
    pub params: Vec<Type>,
    pub callconv: CallConv,
}

/// Value categories. Two types are equal iff structurally equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int { bits: u16, signed: bool },
    Ptr(Box<Type>),
    Array { elem: Box<Type>, len: Option<u32> },
    Func(FuncSig),
    Void,
}

impl Type {
    pub fn int16(signed: bool) -> Type {
        Type::Int { bits: 16, signed }
    }

    pub fn ptr(pointee: Type) -> Type {
        Type::Ptr(Box::new(pointee))
    }

    pub fn func(ret: Type, params: Vec<Type>, callconv: CallConv) -> Type {
        Type::Func(FuncSig {
            ret: Box::new(ret),
            params,
            callconv,
        })
    }

    /// Word size of this type on the target machine, or an error for `Void`.
    pub fn sizeof(&self) -> Result<u32, String> {
        match self {
            Type::Int { bits, .. } => Ok((*bits as u32) / 16),
            Type::Ptr(_) => Ok(1),
            Type::Func(_) => Ok(1),
            Type::Array { elem, len } => {
                let len = len.ok_or_else(|| "sizeof: incomplete array type".to_string())?;
                Ok(len * elem.sizeof()?)
            }
            Type::Void => Err("sizeof(void) is invalid".to_string()),
        }
    }

    /// `Int` and `Ptr` are the only "complete scalars" usable in most contexts.
    pub fn is_complete_scalar(&self) -> bool {
        matches!(self, Type::Int { .. } | Type::Ptr(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int { .. })
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncSig> {
        match self {
            Type::Func(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int { bits: 16, signed: true } => write!(f, "int"),
            Type::Int { bits: 16, signed: false } => write!(f, "unsigned int"),
            Type::Int { bits, signed } => write!(f, "{}int{}", if *signed { "" } else { "u" }, bits),
            Type::Ptr(t) => write!(f, "{}*", t),
            Type::Array { elem, len: Some(n) } => write!(f, "{}[{}]", elem, n),
            Type::Array { elem, len: None } => write!(f, "{}[]", elem),
            Type::Func(sig) => {
                let params: Vec<String> = sig.params.iter().map(|p| p.to_string()).collect();
                write!(f, "{} (*)({})", sig.ret, params.join(", "))
            }
            Type::Void => write!(f, "void"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizeof_int_is_one_word() {
        assert_eq!(Type::int16(true).sizeof(), Ok(1));
    }

    #[test]
    fn sizeof_ptr_and_func_is_one_word() {
        assert_eq!(Type::ptr(Type::int16(true)).sizeof(), Ok(1));
        assert_eq!(
            Type::func(Type::Void, vec![], CallConv::StackCall).sizeof(),
            Ok(1)
        );
    }

    #[test]
    fn sizeof_array_multiplies_elem_by_len() {
        let arr = Type::Array {
            elem: Box::new(Type::int16(true)),
            len: Some(4),
        };
        assert_eq!(arr.sizeof(), Ok(4));
    }

    #[test]
    fn sizeof_void_is_error() {
        assert!(Type::Void.sizeof().is_err());
    }

    #[test]
    fn structural_equality() {
        assert_eq!(Type::int16(true), Type::int16(true));
        assert_ne!(Type::int16(true), Type::int16(false));
        assert_eq!(
            Type::ptr(Type::int16(false)),
            Type::ptr(Type::int16(false))
        );
        assert_ne!(Type::ptr(Type::int16(false)), Type::ptr(Type::int16(true)));
    }
}

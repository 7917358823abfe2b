//! Core scalar kinds used by the flat calling convention.

use std::fmt;

/// A core WebAssembly value type.
///
/// Flat values themselves are carried as raw 64-bit patterns (`u64`): `i32`
/// and `f32` values occupy the low 32 bits, zero-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlatType {
    I32,
    I64,
    F32,
    F64,
}

impl FlatType {
    fn rank(self) -> u8 {
        match self {
            FlatType::I32 => 0,
            FlatType::I64 => 1,
            FlatType::F32 => 2,
            FlatType::F64 => 3,
        }
    }

    /// Bit width of the slot.
    pub fn bits(self) -> u32 {
        match self {
            FlatType::I32 | FlatType::F32 => 32,
            FlatType::I64 | FlatType::F64 => 64,
        }
    }

    /// Promote two slot kinds to one that can carry either.
    ///
    /// The higher of the two wins (`f64 > f32 > i64 > i32`), except that an
    /// `f32` slot cannot carry 64 bits, so `f32` joined with `i64` widens to
    /// `f64`.
    pub fn join(self, other: FlatType) -> FlatType {
        let (lo, hi) = if self.rank() <= other.rank() {
            (self, other)
        } else {
            (other, self)
        };
        if hi == FlatType::F32 && lo.bits() > hi.bits() {
            FlatType::F64
        } else {
            hi
        }
    }
}

impl fmt::Display for FlatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlatType::I32 => "i32",
            FlatType::I64 => "i64",
            FlatType::F32 => "f32",
            FlatType::F64 => "f64",
        })
    }
}

/// Element-wise join of `case` into the running variant payload shape,
/// extending it when the case is wider.
pub fn join_into(acc: &mut Vec<FlatType>, case: &[FlatType]) {
    for (i, ty) in case.iter().enumerate() {
        match acc.get_mut(i) {
            Some(slot) => *slot = slot.join(*ty),
            None => acc.push(*ty),
        }
    }
}

/// Keep only the bits a slot of kind `ty` can carry.
#[inline]
pub fn truncate_bits(ty: FlatType, bits: u64) -> u64 {
    match ty.bits() {
        32 => bits & 0xffff_ffff,
        _ => bits,
    }
}

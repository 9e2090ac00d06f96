use colored::Colorize;

use crate::middle::primitive::PrimitiveKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntegerWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntegerWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntegerWidth::W8 => 8,
            IntegerWidth::W16 => 16,
            IntegerWidth::W32 => 32,
            IntegerWidth::W64 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

impl FloatWidth {
    pub fn bits(self) -> u32 {
        match self {
            FloatWidth::F32 => 32,
            FloatWidth::F64 => 64,
        }
    }
}

/// The closed set of value types. There are no composite types, pointers or
/// arrays, every value fits in a single machine register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Integral { width: IntegerWidth, signed: bool },
    Floating(FloatWidth),
    Boolean,
}

/// Which register file a value of some type lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueClass {
    General,
    Float,
}

impl Type {
    pub const S32: Type = Type::int(IntegerWidth::W32, true);
    pub const S64: Type = Type::int(IntegerWidth::W64, true);
    pub const F32: Type = Type::Floating(FloatWidth::F32);
    pub const F64: Type = Type::Floating(FloatWidth::F64);

    pub const fn int(width: IntegerWidth, signed: bool) -> Self {
        Type::Integral { width, signed }
    }

    /// Width of the type in bits
    pub fn size(self) -> u32 {
        match self {
            Type::Integral { width, .. } => width.bits(),
            Type::Floating(width) => width.bits(),
            Type::Boolean => 8,
        }
    }

    pub fn bytes(self) -> u32 {
        self.size() / 8
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Type::Floating(_))
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, Type::Boolean)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Type::Integral { signed: true, .. })
    }

    pub fn class(self) -> ValueClass {
        match self {
            Type::Integral { .. } | Type::Boolean => ValueClass::General,
            Type::Floating(_) => ValueClass::Float,
        }
    }

    pub fn colored(&self) -> colored::ColoredString {
        format!("@{}", PrimitiveKind::from(*self)).yellow()
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.colored())
    }
}

use strum::{EnumIter, EnumString};

use crate::middle::ty::{FloatWidth, IntegerWidth, Type};

/// Spelling of every type that can be written in source code (without the
/// leading `@`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveKind {
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
}

impl From<PrimitiveKind> for Type {
    fn from(value: PrimitiveKind) -> Self {
        match value {
            PrimitiveKind::S8 => Type::int(IntegerWidth::W8, true),
            PrimitiveKind::S16 => Type::int(IntegerWidth::W16, true),
            PrimitiveKind::S32 => Type::int(IntegerWidth::W32, true),
            PrimitiveKind::S64 => Type::int(IntegerWidth::W64, true),
            PrimitiveKind::U8 => Type::int(IntegerWidth::W8, false),
            PrimitiveKind::U16 => Type::int(IntegerWidth::W16, false),
            PrimitiveKind::U32 => Type::int(IntegerWidth::W32, false),
            PrimitiveKind::U64 => Type::int(IntegerWidth::W64, false),
            PrimitiveKind::F32 => Type::Floating(FloatWidth::F32),
            PrimitiveKind::F64 => Type::Floating(FloatWidth::F64),
            PrimitiveKind::Bool => Type::Boolean,
        }
    }
}

impl From<Type> for PrimitiveKind {
    fn from(value: Type) -> Self {
        match value {
            Type::Integral { width, signed } => match (width, signed) {
                (IntegerWidth::W8, true) => PrimitiveKind::S8,
                (IntegerWidth::W16, true) => PrimitiveKind::S16,
                (IntegerWidth::W32, true) => PrimitiveKind::S32,
                (IntegerWidth::W64, true) => PrimitiveKind::S64,
                (IntegerWidth::W8, false) => PrimitiveKind::U8,
                (IntegerWidth::W16, false) => PrimitiveKind::U16,
                (IntegerWidth::W32, false) => PrimitiveKind::U32,
                (IntegerWidth::W64, false) => PrimitiveKind::U64,
            },
            Type::Floating(FloatWidth::F32) => PrimitiveKind::F32,
            Type::Floating(FloatWidth::F64) => PrimitiveKind::F64,
            Type::Boolean => PrimitiveKind::Bool,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_primitive_survives_conversion_through_type() {
        for primitive in PrimitiveKind::iter() {
            let ty = Type::from(primitive);
            assert_eq!(PrimitiveKind::from(ty), primitive);
            assert_eq!(primitive.to_string().parse::<PrimitiveKind>(), Ok(primitive));
        }
    }

    #[test]
    fn unknown_spelling_is_rejected() {
        assert!("i32".parse::<PrimitiveKind>().is_err());
        assert!("S32".parse::<PrimitiveKind>().is_err());
    }
}

//! Builtin-function dispatch.
//!
//! Every builtin maps to one of: an instruction in the imported
//! `GLSL.std.450` extended set, a core SPIR-V opcode, or a hand-written
//! special lowering. GLSL450 and core entries carry one opcode per operand
//! class (float / signed / unsigned / bool); a missing slot means the builtin
//! cannot be applied to operands of that class.

use std::collections::HashMap;

use rspirv::dr::Builder;
use rspirv::spirv::{Op, Word};

use crate::ir::Type;

/// `GLSL.std.450` extended instruction numbers.
pub mod glsl {
    pub const ROUND: u32 = 1;
    pub const ROUND_EVEN: u32 = 2;
    pub const TRUNC: u32 = 3;
    pub const F_ABS: u32 = 4;
    pub const S_ABS: u32 = 5;
    pub const F_SIGN: u32 = 6;
    pub const S_SIGN: u32 = 7;
    pub const FLOOR: u32 = 8;
    pub const CEIL: u32 = 9;
    pub const FRACT: u32 = 10;
    pub const RADIANS: u32 = 11;
    pub const DEGREES: u32 = 12;
    pub const SIN: u32 = 13;
    pub const COS: u32 = 14;
    pub const TAN: u32 = 15;
    pub const ASIN: u32 = 16;
    pub const ACOS: u32 = 17;
    pub const ATAN: u32 = 18;
    pub const SINH: u32 = 19;
    pub const COSH: u32 = 20;
    pub const TANH: u32 = 21;
    pub const ASINH: u32 = 22;
    pub const ACOSH: u32 = 23;
    pub const ATANH: u32 = 24;
    pub const ATAN2: u32 = 25;
    pub const POW: u32 = 26;
    pub const EXP: u32 = 27;
    pub const LOG: u32 = 28;
    pub const EXP2: u32 = 29;
    pub const LOG2: u32 = 30;
    pub const SQRT: u32 = 31;
    pub const INVERSE_SQRT: u32 = 32;
    pub const DETERMINANT: u32 = 33;
    pub const MATRIX_INVERSE: u32 = 34;
    pub const F_MIN: u32 = 37;
    pub const U_MIN: u32 = 38;
    pub const S_MIN: u32 = 39;
    pub const F_MAX: u32 = 40;
    pub const U_MAX: u32 = 41;
    pub const S_MAX: u32 = 42;
    pub const F_CLAMP: u32 = 43;
    pub const U_CLAMP: u32 = 44;
    pub const S_CLAMP: u32 = 45;
    pub const F_MIX: u32 = 46;
    pub const STEP: u32 = 48;
    pub const SMOOTH_STEP: u32 = 49;
    pub const FMA: u32 = 50;
    pub const FREXP: u32 = 51;
    pub const LDEXP: u32 = 53;
    pub const PACK_SNORM_4X8: u32 = 54;
    pub const PACK_UNORM_4X8: u32 = 55;
    pub const PACK_SNORM_2X16: u32 = 56;
    pub const PACK_UNORM_2X16: u32 = 57;
    pub const PACK_HALF_2X16: u32 = 58;
    pub const PACK_DOUBLE_2X32: u32 = 59;
    pub const UNPACK_SNORM_2X16: u32 = 60;
    pub const UNPACK_UNORM_2X16: u32 = 61;
    pub const UNPACK_HALF_2X16: u32 = 62;
    pub const UNPACK_SNORM_4X8: u32 = 63;
    pub const UNPACK_UNORM_4X8: u32 = 64;
    pub const UNPACK_DOUBLE_2X32: u32 = 65;
    pub const LENGTH: u32 = 66;
    pub const DISTANCE: u32 = 67;
    pub const CROSS: u32 = 68;
    pub const NORMALIZE: u32 = 69;
    pub const FACE_FORWARD: u32 = 70;
    pub const REFLECT: u32 = 71;
    pub const REFRACT: u32 = 72;
    pub const FIND_I_LSB: u32 = 73;
    pub const FIND_S_MSB: u32 = 74;
    pub const FIND_U_MSB: u32 = 75;
}

/// Component class of the first argument, used to pick the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarClass {
    Float,
    Signed,
    Unsigned,
    Bool,
}

/// Class of a scalar or vector operand; matrices and the rest have none and
/// take dedicated lowering paths.
pub fn scalar_class(ty: &Type) -> Option<ScalarClass> {
    if ty.is_float() {
        Some(ScalarClass::Float)
    } else if ty.is_signed() {
        Some(ScalarClass::Signed)
    } else if ty.is_unsigned() {
        Some(ScalarClass::Unsigned)
    } else if ty.is_bool() {
        Some(ScalarClass::Bool)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialIntrinsic {
    /// `atan(y)` is `Atan`, `atan(y, x)` is `Atan2`.
    Atan,
    Texture,
    Texture2D,
    TextureProj,
}

#[derive(Debug, Clone, Copy)]
pub enum Intrinsic {
    GlslStd450 {
        if_float: Option<u32>,
        if_signed: Option<u32>,
        if_unsigned: Option<u32>,
        if_bool: Option<u32>,
    },
    Core {
        if_float: Option<Op>,
        if_signed: Option<Op>,
        if_unsigned: Option<Op>,
        if_bool: Option<Op>,
    },
    Special(SpecialIntrinsic),
    /// Recognised name with no lowering; calling it is a fatal error.
    Unsupported,
}

impl Intrinsic {
    fn all_glsl(op: u32) -> Intrinsic {
        Intrinsic::GlslStd450 {
            if_float: Some(op),
            if_signed: Some(op),
            if_unsigned: Some(op),
            if_bool: Some(op),
        }
    }

    fn by_type_glsl(if_float: u32, if_signed: u32, if_unsigned: u32) -> Intrinsic {
        Intrinsic::GlslStd450 {
            if_float: Some(if_float),
            if_signed: Some(if_signed),
            if_unsigned: Some(if_unsigned),
            if_bool: None,
        }
    }

    pub fn glsl_for(&self, class: ScalarClass) -> Option<u32> {
        match self {
            Intrinsic::GlslStd450 {
                if_float,
                if_signed,
                if_unsigned,
                if_bool,
            } => match class {
                ScalarClass::Float => *if_float,
                ScalarClass::Signed => *if_signed,
                ScalarClass::Unsigned => *if_unsigned,
                ScalarClass::Bool => *if_bool,
            },
            _ => None,
        }
    }

    pub fn core_for(&self, class: ScalarClass) -> Option<Op> {
        match self {
            Intrinsic::Core {
                if_float,
                if_signed,
                if_unsigned,
                if_bool,
            } => match class {
                ScalarClass::Float => *if_float,
                ScalarClass::Signed => *if_signed,
                ScalarClass::Unsigned => *if_unsigned,
                ScalarClass::Bool => *if_bool,
            },
            _ => None,
        }
    }
}

pub struct IntrinsicManager {
    table: HashMap<&'static str, Intrinsic>,
    glsl_ext: Option<Word>,
}

impl Default for IntrinsicManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IntrinsicManager {
    pub fn new() -> Self {
        use Intrinsic::{Core, Special};

        let mut table = HashMap::new();

        table.insert("round", Intrinsic::all_glsl(glsl::ROUND));
        table.insert("roundEven", Intrinsic::all_glsl(glsl::ROUND_EVEN));
        table.insert("trunc", Intrinsic::all_glsl(glsl::TRUNC));
        table.insert("abs", Intrinsic::by_type_glsl(glsl::F_ABS, glsl::S_ABS, glsl::S_ABS));
        table.insert("sign", Intrinsic::by_type_glsl(glsl::F_SIGN, glsl::S_SIGN, glsl::S_SIGN));
        table.insert("floor", Intrinsic::all_glsl(glsl::FLOOR));
        table.insert("ceil", Intrinsic::all_glsl(glsl::CEIL));
        table.insert("fract", Intrinsic::all_glsl(glsl::FRACT));
        table.insert("radians", Intrinsic::all_glsl(glsl::RADIANS));
        table.insert("degrees", Intrinsic::all_glsl(glsl::DEGREES));
        table.insert("sin", Intrinsic::all_glsl(glsl::SIN));
        table.insert("cos", Intrinsic::all_glsl(glsl::COS));
        table.insert("tan", Intrinsic::all_glsl(glsl::TAN));
        table.insert("asin", Intrinsic::all_glsl(glsl::ASIN));
        table.insert("acos", Intrinsic::all_glsl(glsl::ACOS));
        table.insert("atan", Special(SpecialIntrinsic::Atan));
        table.insert("sinh", Intrinsic::all_glsl(glsl::SINH));
        table.insert("cosh", Intrinsic::all_glsl(glsl::COSH));
        table.insert("tanh", Intrinsic::all_glsl(glsl::TANH));
        table.insert("asinh", Intrinsic::all_glsl(glsl::ASINH));
        table.insert("acosh", Intrinsic::all_glsl(glsl::ACOSH));
        table.insert("atanh", Intrinsic::all_glsl(glsl::ATANH));
        table.insert("pow", Intrinsic::all_glsl(glsl::POW));
        table.insert("exp", Intrinsic::all_glsl(glsl::EXP));
        table.insert("log", Intrinsic::all_glsl(glsl::LOG));
        table.insert("exp2", Intrinsic::all_glsl(glsl::EXP2));
        table.insert("log2", Intrinsic::all_glsl(glsl::LOG2));
        table.insert("sqrt", Intrinsic::all_glsl(glsl::SQRT));
        table.insert("inversesqrt", Intrinsic::all_glsl(glsl::INVERSE_SQRT));
        table.insert("determinant", Intrinsic::all_glsl(glsl::DETERMINANT));
        table.insert("matrixInverse", Intrinsic::all_glsl(glsl::MATRIX_INVERSE));
        table.insert(
            "mod",
            Core {
                if_float: Some(Op::FMod),
                if_signed: Some(Op::SMod),
                if_unsigned: Some(Op::UMod),
                if_bool: None,
            },
        );
        table.insert("min", Intrinsic::by_type_glsl(glsl::F_MIN, glsl::S_MIN, glsl::U_MIN));
        table.insert("max", Intrinsic::by_type_glsl(glsl::F_MAX, glsl::S_MAX, glsl::U_MAX));
        table.insert(
            "clamp",
            Intrinsic::by_type_glsl(glsl::F_CLAMP, glsl::S_CLAMP, glsl::U_CLAMP),
        );
        table.insert(
            "dot",
            Core {
                if_float: Some(Op::Dot),
                if_signed: None,
                if_unsigned: None,
                if_bool: None,
            },
        );
        table.insert("mix", Intrinsic::all_glsl(glsl::F_MIX));
        table.insert("step", Intrinsic::all_glsl(glsl::STEP));
        table.insert("smoothstep", Intrinsic::all_glsl(glsl::SMOOTH_STEP));
        table.insert("fma", Intrinsic::all_glsl(glsl::FMA));
        table.insert("frexp", Intrinsic::all_glsl(glsl::FREXP));
        table.insert("ldexp", Intrinsic::all_glsl(glsl::LDEXP));

        table.insert("packSnorm4x8", Intrinsic::all_glsl(glsl::PACK_SNORM_4X8));
        table.insert("unpackSnorm4x8", Intrinsic::all_glsl(glsl::UNPACK_SNORM_4X8));
        table.insert("packUnorm4x8", Intrinsic::all_glsl(glsl::PACK_UNORM_4X8));
        table.insert("unpackUnorm4x8", Intrinsic::all_glsl(glsl::UNPACK_UNORM_4X8));
        table.insert("packSnorm2x16", Intrinsic::all_glsl(glsl::PACK_SNORM_2X16));
        table.insert("unpackSnorm2x16", Intrinsic::all_glsl(glsl::UNPACK_SNORM_2X16));
        table.insert("packUnorm2x16", Intrinsic::all_glsl(glsl::PACK_UNORM_2X16));
        table.insert("unpackUnorm2x16", Intrinsic::all_glsl(glsl::UNPACK_UNORM_2X16));
        table.insert("packHalf2x16", Intrinsic::all_glsl(glsl::PACK_HALF_2X16));
        table.insert("unpackHalf2x16", Intrinsic::all_glsl(glsl::UNPACK_HALF_2X16));
        table.insert("packDouble2x32", Intrinsic::all_glsl(glsl::PACK_DOUBLE_2X32));
        table.insert("unpackDouble2x32", Intrinsic::all_glsl(glsl::UNPACK_DOUBLE_2X32));

        table.insert("length", Intrinsic::all_glsl(glsl::LENGTH));
        table.insert("distance", Intrinsic::all_glsl(glsl::DISTANCE));
        table.insert("cross", Intrinsic::all_glsl(glsl::CROSS));
        table.insert("normalize", Intrinsic::all_glsl(glsl::NORMALIZE));
        table.insert("faceForward", Intrinsic::all_glsl(glsl::FACE_FORWARD));
        table.insert("reflect", Intrinsic::all_glsl(glsl::REFLECT));
        table.insert("refract", Intrinsic::all_glsl(glsl::REFRACT));
        table.insert("findLSB", Intrinsic::all_glsl(glsl::FIND_I_LSB));
        table.insert(
            "findMSB",
            Intrinsic::by_type_glsl(glsl::FIND_S_MSB, glsl::FIND_S_MSB, glsl::FIND_U_MSB),
        );
        table.insert(
            "dFdx",
            Core {
                if_float: Some(Op::DPdx),
                if_signed: None,
                if_unsigned: None,
                if_bool: None,
            },
        );
        table.insert(
            "dFdy",
            Core {
                if_float: Some(Op::DPdy),
                if_signed: None,
                if_unsigned: None,
                if_bool: None,
            },
        );
        table.insert("texture", Special(SpecialIntrinsic::Texture));
        table.insert("texture2D", Special(SpecialIntrinsic::Texture2D));
        table.insert("textureProj", Special(SpecialIntrinsic::TextureProj));

        table.insert(
            "any",
            Core {
                if_float: None,
                if_signed: None,
                if_unsigned: None,
                if_bool: Some(Op::Any),
            },
        );
        table.insert(
            "all",
            Core {
                if_float: None,
                if_signed: None,
                if_unsigned: None,
                if_bool: Some(Op::All),
            },
        );
        table.insert(
            "equal",
            Core {
                if_float: Some(Op::FOrdEqual),
                if_signed: Some(Op::IEqual),
                if_unsigned: Some(Op::IEqual),
                if_bool: Some(Op::LogicalEqual),
            },
        );
        table.insert(
            "notEqual",
            Core {
                if_float: Some(Op::FOrdNotEqual),
                if_signed: Some(Op::INotEqual),
                if_unsigned: Some(Op::INotEqual),
                if_bool: Some(Op::LogicalNotEqual),
            },
        );
        table.insert(
            "lessThan",
            Core {
                if_float: Some(Op::FOrdLessThan),
                if_signed: Some(Op::SLessThan),
                if_unsigned: Some(Op::ULessThan),
                if_bool: None,
            },
        );
        table.insert(
            "lessThanEqual",
            Core {
                if_float: Some(Op::FOrdLessThanEqual),
                if_signed: Some(Op::SLessThanEqual),
                if_unsigned: Some(Op::ULessThanEqual),
                if_bool: None,
            },
        );
        table.insert(
            "greaterThan",
            Core {
                if_float: Some(Op::FOrdGreaterThan),
                if_signed: Some(Op::SGreaterThan),
                if_unsigned: Some(Op::UGreaterThan),
                if_bool: None,
            },
        );
        table.insert(
            "greaterThanEqual",
            Core {
                if_float: Some(Op::FOrdGreaterThanEqual),
                if_signed: Some(Op::SGreaterThanEqual),
                if_unsigned: Some(Op::UGreaterThanEqual),
                if_bool: None,
            },
        );

        table.insert("interpolateAtCentroid", Intrinsic::Unsupported);
        table.insert("interpolateAtSample", Intrinsic::Unsupported);
        table.insert("interpolateAtOffset", Intrinsic::Unsupported);

        IntrinsicManager {
            table,
            glsl_ext: None,
        }
    }

    /// Import the `GLSL.std.450` extended instruction set; must run before
    /// any intrinsic call is lowered.
    pub fn import_ext_inst(&mut self, builder: &mut Builder) {
        self.glsl_ext = Some(builder.ext_inst_import("GLSL.std.450"));
    }

    pub fn glsl_ext(&self) -> Option<Word> {
        self.glsl_ext
    }

    pub fn is_intrinsic(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Intrinsic> {
        self.table.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types;

    #[test]
    fn test_table_lookup() {
        let manager = IntrinsicManager::new();
        assert!(manager.is_intrinsic("sin"));
        assert!(manager.is_intrinsic("packHalf2x16"));
        assert!(manager.is_intrinsic("greaterThanEqual"));
        assert!(!manager.is_intrinsic("frobnicate"));
    }

    #[test]
    fn test_class_selection() {
        let manager = IntrinsicManager::new();
        let abs = manager.get("abs").unwrap();
        assert_eq!(abs.glsl_for(ScalarClass::Float), Some(glsl::F_ABS));
        assert_eq!(abs.glsl_for(ScalarClass::Signed), Some(glsl::S_ABS));
        assert_eq!(abs.glsl_for(ScalarClass::Bool), None);

        let less = manager.get("lessThan").unwrap();
        assert_eq!(less.core_for(ScalarClass::Float), Some(Op::FOrdLessThan));
        assert_eq!(less.core_for(ScalarClass::Unsigned), Some(Op::ULessThan));
        assert_eq!(less.core_for(ScalarClass::Bool), None);
    }

    #[test]
    fn test_scalar_class_unwraps_vectors() {
        assert_eq!(scalar_class(&types::vec(3)), Some(ScalarClass::Float));
        assert_eq!(scalar_class(&types::ivec(2)), Some(ScalarClass::Signed));
        assert_eq!(scalar_class(&types::boolean()), Some(ScalarClass::Bool));
        assert_eq!(scalar_class(&types::mat(4, 4)), None);
    }

    #[test]
    fn test_interpolate_at_is_recognised_but_unsupported() {
        let manager = IntrinsicManager::new();
        assert!(matches!(
            manager.get("interpolateAtCentroid"),
            Some(Intrinsic::Unsupported)
        ));
    }
}

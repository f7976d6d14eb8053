//! Typed, resolved intermediate representation consumed by the SPIR-V backend.
//!
//! The frontend (lexer, parser, name resolution, type checking) is a separate
//! component; by the time a [`Program`] reaches the code generator every
//! expression carries its resolved [`Type`] and every reference points at the
//! declaring [`Variable`] or [`FunctionDeclaration`].

use std::rc::Rc;

use bitflags::bitflags;
use rspirv::spirv;

/// Unique identity of a declared variable, assigned by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub u32);

/// Unique identity of a function declaration, assigned by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub kind: ProgramKind,
    pub elements: Vec<ProgramElement>,
}

#[derive(Debug, Clone)]
pub enum ProgramElement {
    Function(FunctionDefinition),
    /// An interface block: a struct-typed global with `Block` semantics.
    InterfaceBlock(Rc<Variable>),
    GlobalVars(Vec<VarDecl>),
    Extension(String),
}

#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    pub id: FunctionId,
    pub name: String,
    pub return_type: Type,
    pub parameters: Vec<Rc<Variable>>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub decl: Rc<FunctionDeclaration>,
    pub body: Statement,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub ty: Type,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub var: Rc<Variable>,
    pub init: Option<Expression>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModifierFlags: u32 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
        const UNIFORM = 1 << 2;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub flags: ModifierFlags,
    pub layout: Layout,
}

impl Modifiers {
    pub fn is_in(&self) -> bool {
        self.flags.contains(ModifierFlags::IN)
    }

    pub fn is_out(&self) -> bool {
        self.flags.contains(ModifierFlags::OUT)
    }

    pub fn is_uniform(&self) -> bool {
        self.flags.contains(ModifierFlags::UNIFORM)
    }
}

/// Layout qualifiers carried by globals, parameters, and struct fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Layout {
    pub location: Option<u32>,
    pub binding: Option<u32>,
    pub index: Option<u32>,
    pub descriptor_set: Option<u32>,
    pub builtin: Option<spirv::BuiltIn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub layout: Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Scalar,
    Vector,
    Matrix,
    Array,
    Struct,
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int,
    UInt,
    Float,
    Double,
    Vector {
        component: Box<Type>,
        columns: u32,
    },
    Matrix {
        component: Box<Type>,
        columns: u32,
        rows: u32,
    },
    /// Fixed-size array. A `count` of zero denotes a runtime-sized array,
    /// which the backend rejects.
    Array {
        element: Box<Type>,
        count: u32,
    },
    Struct {
        name: String,
        fields: Vec<Field>,
    },
    Sampler {
        dimensions: spirv::Dim,
        is_depth: bool,
        is_arrayed: bool,
        is_multisampled: bool,
        is_sampled: bool,
    },
}

fn align_to(offset: u32, alignment: u32) -> u32 {
    let rem = offset % alignment;
    if rem == 0 {
        offset
    } else {
        offset + alignment - rem
    }
}

/// Byte offset of each field of a struct, std140 style: align before each
/// member, advance by its size, and realign after aggregate members.
pub fn field_offsets(fields: &[Field]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut offset = 0;
    for field in fields {
        let alignment = field.ty.alignment();
        offset = align_to(offset, alignment);
        offsets.push(offset);
        offset += field.ty.size();
        if matches!(field.ty.kind(), TypeKind::Array | TypeKind::Struct) {
            offset = align_to(offset, alignment);
        }
    }
    offsets
}

impl Type {
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Void => TypeKind::Void,
            Type::Bool | Type::Int | Type::UInt | Type::Float | Type::Double => TypeKind::Scalar,
            Type::Vector { .. } => TypeKind::Vector,
            Type::Matrix { .. } => TypeKind::Matrix,
            Type::Array { .. } => TypeKind::Array,
            Type::Struct { .. } => TypeKind::Struct,
            Type::Sampler { .. } => TypeKind::Sampler,
        }
    }

    /// Component type of a vector or matrix, element type of an array.
    pub fn component_type(&self) -> Option<&Type> {
        match self {
            Type::Vector { component, .. } | Type::Matrix { component, .. } => Some(component),
            Type::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Vector width, matrix column count, or array length. Scalars report 1.
    pub fn columns(&self) -> u32 {
        match self {
            Type::Vector { columns, .. } | Type::Matrix { columns, .. } => *columns,
            Type::Array { count, .. } => *count,
            _ => 1,
        }
    }

    pub fn rows(&self) -> u32 {
        match self {
            Type::Matrix { rows, .. } => *rows,
            _ => 1,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Type::Int | Type::UInt | Type::Float | Type::Double)
    }

    pub fn is_float(&self) -> bool {
        match self {
            Type::Vector { component, .. } => component.is_float(),
            Type::Float | Type::Double => true,
            _ => false,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self {
            Type::Vector { component, .. } => component.is_signed(),
            Type::Int => true,
            _ => false,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        match self {
            Type::Vector { component, .. } => component.is_unsigned(),
            Type::UInt => true,
            _ => false,
        }
    }

    pub fn is_bool(&self) -> bool {
        match self {
            Type::Vector { component, .. } => component.is_bool(),
            Type::Bool => true,
            _ => false,
        }
    }

    /// Size in bytes under the std140-flavoured layout rules.
    pub fn size(&self) -> u32 {
        match self {
            Type::Void | Type::Sampler { .. } => 0,
            Type::Bool | Type::Int | Type::UInt | Type::Float => 4,
            Type::Double => 8,
            Type::Vector { component, columns } => component.size() * columns,
            Type::Matrix { columns, .. } => self.stride() * columns,
            Type::Array { count, .. } => self.stride() * count,
            Type::Struct { fields, .. } => {
                let end = match (field_offsets(fields).last(), fields.last()) {
                    (Some(offset), Some(field)) => offset + field.ty.size(),
                    _ => 0,
                };
                align_to(end, self.alignment())
            }
        }
    }

    /// Required base alignment in bytes.
    pub fn alignment(&self) -> u32 {
        match self {
            Type::Void | Type::Sampler { .. } => 1,
            Type::Bool | Type::Int | Type::UInt | Type::Float => 4,
            Type::Double => 8,
            Type::Vector { component, columns } => {
                if *columns == 2 {
                    2 * component.alignment()
                } else {
                    4 * component.alignment()
                }
            }
            Type::Matrix { .. } => self.stride(),
            Type::Array { element, .. } => align_to(element.alignment(), 16),
            Type::Struct { fields, .. } => {
                let max = fields.iter().map(|f| f.ty.alignment()).max().unwrap_or(4);
                align_to(max, 16)
            }
        }
    }

    /// Distance in bytes between consecutive array elements or matrix columns.
    pub fn stride(&self) -> u32 {
        match self {
            Type::Matrix { component, rows, .. } => {
                let column = Type::Vector {
                    component: component.clone(),
                    columns: *rows,
                };
                align_to(column.alignment(), 16)
            }
            Type::Array { element, .. } => {
                let alignment = align_to(element.alignment(), 16);
                align_to(element.size(), alignment)
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    // Recognised but rejected by the backend.
    Shl,
    Shr,
    BitAndAssign,
    BitOrAssign,
    BitXorAssign,
}

impl BinaryOp {
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            BinaryOp::Assign
                | BinaryOp::AddAssign
                | BinaryOp::SubAssign
                | BinaryOp::MulAssign
                | BinaryOp::DivAssign
                | BinaryOp::BitAndAssign
                | BinaryOp::BitOrAssign
                | BinaryOp::BitXorAssign
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Plus,
    Neg,
    Not,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

static TYPE_BOOL: Type = Type::Bool;

#[derive(Debug, Clone)]
pub enum Expression {
    BoolLiteral {
        value: bool,
    },
    /// `ty` is `Int` or `UInt`.
    IntLiteral {
        value: i64,
        ty: Type,
    },
    /// `ty` is `Float` or `Double`.
    FloatLiteral {
        value: f64,
        ty: Type,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        ty: Type,
    },
    Constructor {
        ty: Type,
        arguments: Vec<Expression>,
    },
    FieldAccess {
        base: Box<Expression>,
        field_index: u32,
        ty: Type,
    },
    Call {
        function: Rc<FunctionDeclaration>,
        arguments: Vec<Expression>,
        ty: Type,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expression>,
        ty: Type,
    },
    Postfix {
        op: PostfixOp,
        operand: Box<Expression>,
        ty: Type,
    },
    Swizzle {
        base: Box<Expression>,
        components: Vec<u32>,
        ty: Type,
    },
    VariableRef {
        var: Rc<Variable>,
    },
    Ternary {
        test: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
        ty: Type,
    },
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
        ty: Type,
    },
}

impl Expression {
    pub fn ty(&self) -> &Type {
        match self {
            Expression::BoolLiteral { .. } => &TYPE_BOOL,
            Expression::IntLiteral { ty, .. }
            | Expression::FloatLiteral { ty, .. }
            | Expression::Binary { ty, .. }
            | Expression::Constructor { ty, .. }
            | Expression::FieldAccess { ty, .. }
            | Expression::Call { ty, .. }
            | Expression::Prefix { ty, .. }
            | Expression::Postfix { ty, .. }
            | Expression::Swizzle { ty, .. }
            | Expression::Ternary { ty, .. }
            | Expression::Index { ty, .. } => ty,
            Expression::VariableRef { var } => &var.ty,
        }
    }

    /// Literals are constant, as are constructors whose arguments all are.
    pub fn is_constant(&self) -> bool {
        match self {
            Expression::BoolLiteral { .. }
            | Expression::IntLiteral { .. }
            | Expression::FloatLiteral { .. } => true,
            Expression::Constructor { arguments, .. } => {
                arguments.iter().all(Expression::is_constant)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Block(Vec<Statement>),
    Expression(Expression),
    VarDecls(Vec<VarDecl>),
    If {
        test: Expression,
        if_true: Box<Statement>,
        if_false: Option<Box<Statement>>,
    },
    For {
        initializer: Option<Box<Statement>>,
        test: Expression,
        next: Option<Expression>,
        body: Box<Statement>,
    },
    Return(Option<Expression>),
    Break,
    Continue,
    Discard,
}

/// Shorthand constructors for common types.
pub mod types {
    use super::Type;

    pub fn float() -> Type {
        Type::Float
    }

    pub fn int() -> Type {
        Type::Int
    }

    pub fn uint() -> Type {
        Type::UInt
    }

    pub fn boolean() -> Type {
        Type::Bool
    }

    pub fn vec(n: u32) -> Type {
        Type::Vector {
            component: Box::new(Type::Float),
            columns: n,
        }
    }

    pub fn ivec(n: u32) -> Type {
        Type::Vector {
            component: Box::new(Type::Int),
            columns: n,
        }
    }

    pub fn bvec(n: u32) -> Type {
        Type::Vector {
            component: Box::new(Type::Bool),
            columns: n,
        }
    }

    pub fn mat(columns: u32, rows: u32) -> Type {
        Type::Matrix {
            component: Box::new(Type::Float),
            columns,
            rows,
        }
    }

    pub fn array(element: Type, count: u32) -> Type {
        Type::Array {
            element: Box::new(element),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_layout() {
        assert_eq!(types::vec(2).size(), 8);
        assert_eq!(types::vec(2).alignment(), 8);
        assert_eq!(types::vec(3).size(), 12);
        assert_eq!(types::vec(3).alignment(), 16);
        assert_eq!(types::vec(4).size(), 16);
        assert_eq!(types::vec(4).alignment(), 16);
    }

    #[test]
    fn test_matrix_layout() {
        let m = types::mat(4, 4);
        assert_eq!(m.stride(), 16);
        assert_eq!(m.size(), 64);
        let m23 = types::mat(2, 3);
        // vec3 columns are padded out to 16 bytes.
        assert_eq!(m23.stride(), 16);
        assert_eq!(m23.size(), 32);
    }

    #[test]
    fn test_array_stride_is_rounded() {
        let a = types::array(Type::Float, 3);
        assert_eq!(a.stride(), 16);
        assert_eq!(a.size(), 48);
    }

    #[test]
    fn test_struct_offsets_realign_after_aggregate() {
        let fields = vec![
            Field {
                name: "a".to_string(),
                ty: Type::Float,
                layout: Layout::default(),
            },
            Field {
                name: "b".to_string(),
                ty: types::vec(3),
                layout: Layout::default(),
            },
            Field {
                name: "c".to_string(),
                ty: types::array(Type::Float, 2),
                layout: Layout::default(),
            },
            Field {
                name: "d".to_string(),
                ty: Type::Float,
                layout: Layout::default(),
            },
        ];
        let offsets = field_offsets(&fields);
        assert_eq!(offsets, vec![0, 16, 32, 64]);
    }

    #[test]
    fn test_expression_types() {
        let e = Expression::IntLiteral {
            value: 3,
            ty: Type::Int,
        };
        assert_eq!(*e.ty(), Type::Int);
        assert!(e.is_constant());

        let ctor = Expression::Constructor {
            ty: types::vec(2),
            arguments: vec![
                Expression::FloatLiteral {
                    value: 1.0,
                    ty: Type::Float,
                },
                Expression::FloatLiteral {
                    value: 2.0,
                    ty: Type::Float,
                },
            ],
        };
        assert!(ctor.is_constant());
    }
}

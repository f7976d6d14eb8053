//! End-to-end emission tests: build IR programs by hand, generate a module,
//! parse it back, and inspect the instruction stream.

use std::rc::Rc;

use lux_core::codegen::CodeGenerator;
use lux_core::error::CodegenError;
use lux_core::ir::{
    types, BinaryOp, Expression, FunctionDeclaration, FunctionDefinition, FunctionId, Layout,
    ModifierFlags, Modifiers, PostfixOp, Program, ProgramElement, ProgramKind, Statement, Type,
    VarDecl, Variable, VariableId,
};
use lux_core::validate::validate_words;

use rspirv::binary::parse_bytes;
use rspirv::dr::{Loader, Module, Operand};
use rspirv::spirv::{Dim, ExecutionMode, ExecutionModel, Op, StorageClass, Word};

// ---------------------------------------------------------------------------
// IR construction helpers
// ---------------------------------------------------------------------------

fn var(id: u32, name: &str, ty: Type) -> Rc<Variable> {
    Rc::new(Variable {
        id: VariableId(id),
        name: name.to_string(),
        ty,
        modifiers: Modifiers::default(),
    })
}

fn global_var(id: u32, name: &str, ty: Type, flags: ModifierFlags, location: Option<u32>) -> Rc<Variable> {
    Rc::new(Variable {
        id: VariableId(id),
        name: name.to_string(),
        ty,
        modifiers: Modifiers {
            flags,
            layout: Layout {
                location,
                ..Layout::default()
            },
        },
    })
}

fn out_param(id: u32, name: &str, ty: Type) -> Rc<Variable> {
    Rc::new(Variable {
        id: VariableId(id),
        name: name.to_string(),
        ty,
        modifiers: Modifiers {
            flags: ModifierFlags::OUT,
            layout: Layout::default(),
        },
    })
}

fn fn_decl(id: u32, name: &str, ret: Type, params: Vec<Rc<Variable>>) -> Rc<FunctionDeclaration> {
    Rc::new(FunctionDeclaration {
        id: FunctionId(id),
        name: name.to_string(),
        return_type: ret,
        parameters: params,
    })
}

fn int_lit(value: i64) -> Expression {
    Expression::IntLiteral {
        value,
        ty: Type::Int,
    }
}

fn float_lit(value: f64) -> Expression {
    Expression::FloatLiteral {
        value,
        ty: Type::Float,
    }
}

fn var_ref(v: &Rc<Variable>) -> Expression {
    Expression::VariableRef { var: Rc::clone(v) }
}

fn decl_stmt(v: &Rc<Variable>, init: Option<Expression>) -> Statement {
    Statement::VarDecls(vec![VarDecl {
        var: Rc::clone(v),
        init,
    }])
}

fn main_with_body(body: Vec<Statement>) -> ProgramElement {
    ProgramElement::Function(FunctionDefinition {
        decl: fn_decl(0, "main", Type::Void, vec![]),
        body: Statement::Block(body),
    })
}

fn fragment_program(elements: Vec<ProgramElement>) -> Program {
    Program {
        kind: ProgramKind::Fragment,
        elements,
    }
}

// ---------------------------------------------------------------------------
// Module inspection helpers
// ---------------------------------------------------------------------------

fn emit(program: &Program) -> Vec<u32> {
    let _ = env_logger::builder().is_test(true).try_init();
    let words = CodeGenerator::new().generate(program).expect("generation failed");
    validate_words(&words).expect("emitted module failed validation");
    words
}

fn parse(words: &[u32]) -> Module {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let mut loader = Loader::new();
    parse_bytes(&bytes, &mut loader).expect("emitted module failed to parse");
    loader.module()
}

/// All instructions inside function bodies, in emission order.
fn body_ops(module: &Module) -> Vec<Op> {
    let mut ops = Vec::new();
    for function in &module.functions {
        for block in &function.blocks {
            for inst in &block.instructions {
                ops.push(inst.class.opcode);
            }
        }
    }
    ops
}

fn count_op(module: &Module, op: Op) -> usize {
    body_ops(module).iter().filter(|&&o| o == op).count()
}

fn find_function<'a>(module: &'a Module, name: &str) -> &'a rspirv::dr::Function {
    for inst in &module.debug_names {
        if inst.class.opcode != Op::Name {
            continue;
        }
        let Operand::IdRef(target) = inst.operands[0] else {
            continue;
        };
        let Operand::LiteralString(s) = &inst.operands[1] else {
            continue;
        };
        if s != name {
            continue;
        }
        if let Some(function) = module
            .functions
            .iter()
            .find(|f| f.def.as_ref().and_then(|d| d.result_id) == Some(target))
        {
            return function;
        }
    }
    panic!("function '{}' not found", name);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_empty_fragment_main() {
    let program = fragment_program(vec![main_with_body(vec![])]);
    let words = emit(&program);
    assert_eq!(words[0], rspirv::spirv::MAGIC_NUMBER);

    let module = parse(&words);
    assert_eq!(module.entry_points.len(), 1);
    let entry = &module.entry_points[0];
    assert_eq!(
        entry.operands[0],
        Operand::ExecutionModel(ExecutionModel::Fragment)
    );
    assert_eq!(entry.operands[2], Operand::LiteralString("main".to_string()));
    // No interface variables.
    assert_eq!(entry.operands.len(), 3);

    assert_eq!(module.execution_modes.len(), 1);
    assert_eq!(
        module.execution_modes[0].operands[1],
        Operand::ExecutionMode(ExecutionMode::OriginUpperLeft)
    );

    assert_eq!(module.functions.len(), 1);
    assert_eq!(count_op(&module, Op::Return), 1);
}

#[test]
fn test_vertex_program_has_no_origin_mode() {
    let program = Program {
        kind: ProgramKind::Vertex,
        elements: vec![main_with_body(vec![])],
    };
    let module = parse(&emit(&program));
    assert_eq!(
        module.entry_points[0].operands[0],
        Operand::ExecutionModel(ExecutionModel::Vertex)
    );
    assert!(module.execution_modes.is_empty());
}

#[test]
fn test_float_constructor_from_int() {
    let program = fragment_program(vec![main_with_body(vec![Statement::Expression(
        Expression::Constructor {
            ty: Type::Float,
            arguments: vec![int_lit(3)],
        },
    )])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::ConvertSToF), 1);
    // The int literal 3 must exist as an OpConstant.
    assert!(module.types_global_values.iter().any(|inst| {
        inst.class.opcode == Op::Constant
            && inst.operands.first() == Some(&Operand::LiteralBit32(3))
    }));
}

#[test]
fn test_short_circuit_and_uses_phi() {
    let a = var(1, "a", Type::Bool);
    let b = var(2, "b", Type::Bool);
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(&a, Some(Expression::BoolLiteral { value: true })),
        decl_stmt(&b, Some(Expression::BoolLiteral { value: false })),
        Statement::Expression(Expression::Binary {
            op: BinaryOp::LogicalAnd,
            left: Box::new(var_ref(&a)),
            right: Box::new(var_ref(&b)),
            ty: Type::Bool,
        }),
    ])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::SelectionMerge), 1);
    assert_eq!(count_op(&module, Op::BranchConditional), 1);
    assert_eq!(count_op(&module, Op::Phi), 1);
    // The short-circuit constant for && is false.
    assert!(module
        .types_global_values
        .iter()
        .any(|inst| inst.class.opcode == Op::ConstantFalse));
}

#[test]
fn test_out_parameter_direct_pointer() {
    // void set(out float x) { x = 1.0; }  main: float y; set(y);
    let x = out_param(1, "x", Type::Float);
    let set_decl = fn_decl(1, "set", Type::Void, vec![Rc::clone(&x)]);
    let y = var(2, "y", Type::Float);
    let program = fragment_program(vec![
        ProgramElement::Function(FunctionDefinition {
            decl: Rc::clone(&set_decl),
            body: Statement::Block(vec![Statement::Expression(Expression::Binary {
                op: BinaryOp::Assign,
                left: Box::new(var_ref(&x)),
                right: Box::new(float_lit(1.0)),
                ty: Type::Float,
            })]),
        }),
        main_with_body(vec![
            decl_stmt(&y, None),
            Statement::Expression(Expression::Call {
                function: Rc::clone(&set_decl),
                arguments: vec![var_ref(&y)],
                ty: Type::Void,
            }),
        ]),
    ]);
    let module = parse(&emit(&program));

    let main = find_function(&module, "main");
    // The argument l-value has a pointer, so it is passed directly: the only
    // OpVariable in main is y itself.
    let variables: Vec<Word> = main.blocks[0]
        .instructions
        .iter()
        .filter(|i| i.class.opcode == Op::Variable)
        .map(|i| i.result_id.unwrap())
        .collect();
    assert_eq!(variables.len(), 1);
    let call = main.blocks[0]
        .instructions
        .iter()
        .find(|i| i.class.opcode == Op::FunctionCall)
        .expect("no call emitted");
    // One pointer operand per parameter, and it is y's pointer.
    assert_eq!(call.operands.len(), 2);
    assert_eq!(call.operands[1], Operand::IdRef(variables[0]));
}

#[test]
fn test_out_parameter_swizzle_writeback() {
    // void set2(out vec2 x) { ... }  main: vec3 v; set2(v.xy);
    let x = out_param(1, "x", types::vec(2));
    let set_decl = fn_decl(1, "set2", Type::Void, vec![Rc::clone(&x)]);
    let v = var(2, "v", types::vec(3));
    let program = fragment_program(vec![
        ProgramElement::Function(FunctionDefinition {
            decl: Rc::clone(&set_decl),
            body: Statement::Block(vec![]),
        }),
        main_with_body(vec![
            decl_stmt(
                &v,
                Some(Expression::Constructor {
                    ty: types::vec(3),
                    arguments: vec![float_lit(0.0), float_lit(0.0), float_lit(0.0)],
                }),
            ),
            Statement::Expression(Expression::Call {
                function: Rc::clone(&set_decl),
                arguments: vec![Expression::Swizzle {
                    base: Box::new(var_ref(&v)),
                    components: vec![0, 1],
                    ty: types::vec(2),
                }],
                ty: Type::Void,
            }),
        ]),
    ]);
    let module = parse(&emit(&program));
    let main = find_function(&module, "main");

    // v plus the marshalling temp.
    assert_eq!(
        main.blocks[0]
            .instructions
            .iter()
            .filter(|i| i.class.opcode == Op::Variable)
            .count(),
        2
    );
    let ops: Vec<Op> = main.blocks[0]
        .instructions
        .iter()
        .map(|i| i.class.opcode)
        .collect();
    let call_at = ops.iter().position(|&o| o == Op::FunctionCall).unwrap();
    // After the call: load the temp, shuffle it into v, store v.
    assert!(ops[call_at + 1..].contains(&Op::Load));
    assert!(ops[call_at + 1..].contains(&Op::VectorShuffle));
    assert!(ops[call_at + 1..].contains(&Op::Store));
}

#[test]
fn test_matrix_times_vector() {
    let m = var(1, "m", types::mat(4, 4));
    let v = var(2, "v", types::vec(4));
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(&m, None),
        decl_stmt(&v, None),
        Statement::Expression(Expression::Binary {
            op: BinaryOp::Mul,
            left: Box::new(var_ref(&m)),
            right: Box::new(var_ref(&v)),
            ty: types::vec(4),
        }),
    ])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::MatrixTimesVector), 1);
    assert_eq!(count_op(&module, Op::FMul), 0);
}

#[test]
fn test_scalar_vector_promotion() {
    let v = var(1, "v", types::vec(3));
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(&v, None),
        Statement::Expression(Expression::Binary {
            op: BinaryOp::Mul,
            left: Box::new(var_ref(&v)),
            right: Box::new(float_lit(2.0)),
            ty: types::vec(3),
        }),
    ])]);
    let module = parse(&emit(&program));
    // The scalar is broadcast into a vec3 and multiplied componentwise.
    assert_eq!(count_op(&module, Op::CompositeConstruct), 1);
    assert_eq!(count_op(&module, Op::FMul), 1);
}

#[test]
fn test_for_loop_with_break() {
    let i = var(1, "i", Type::Int);
    let program = fragment_program(vec![main_with_body(vec![Statement::For {
        initializer: Some(Box::new(decl_stmt(&i, Some(int_lit(0))))),
        test: Expression::Binary {
            op: BinaryOp::Lt,
            left: Box::new(var_ref(&i)),
            right: Box::new(int_lit(10)),
            ty: Type::Bool,
        },
        next: Some(Expression::Postfix {
            op: PostfixOp::Inc,
            operand: Box::new(var_ref(&i)),
            ty: Type::Int,
        }),
        body: Box::new(Statement::Block(vec![Statement::Break])),
    }])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::LoopMerge), 1);

    let main = find_function(&module, "main");
    let merge_inst = main
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .find(|i| i.class.opcode == Op::LoopMerge)
        .unwrap();
    let merge_label = match merge_inst.operands[0] {
        Operand::IdRef(w) => w,
        _ => unreachable!(),
    };
    let continue_label = match merge_inst.operands[1] {
        Operand::IdRef(w) => w,
        _ => unreachable!(),
    };

    // The break branches straight to the loop's merge block.
    let break_branches = main
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .filter(|i| {
            i.class.opcode == Op::Branch && i.operands[0] == Operand::IdRef(merge_label)
        })
        .count();
    assert_eq!(break_branches, 1);

    // The continue target is the update block, which loops back to the header.
    let continue_block = main
        .blocks
        .iter()
        .find(|b| b.label.as_ref().and_then(|l| l.result_id) == Some(continue_label))
        .expect("continue block missing");
    assert_eq!(
        continue_block.instructions.last().unwrap().class.opcode,
        Op::Branch
    );
}

#[test]
fn test_swizzle_store_emits_merge_mask() {
    // vec3 v; vec2 u; v.xz = u.xy;  selects (u.x, v.y, u.y) = lanes (3,1,4).
    let v = var(1, "v", types::vec(3));
    let u = var(2, "u", types::vec(2));
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(&v, None),
        decl_stmt(&u, None),
        Statement::Expression(Expression::Binary {
            op: BinaryOp::Assign,
            left: Box::new(Expression::Swizzle {
                base: Box::new(var_ref(&v)),
                components: vec![0, 2],
                ty: types::vec(2),
            }),
            right: Box::new(Expression::Swizzle {
                base: Box::new(var_ref(&u)),
                components: vec![0, 1],
                ty: types::vec(2),
            }),
            ty: types::vec(2),
        }),
    ])]);
    let module = parse(&emit(&program));
    let found = module.functions.iter().any(|f| {
        f.blocks.iter().any(|b| {
            b.instructions.iter().any(|i| {
                i.class.opcode == Op::VectorShuffle
                    && i.operands[2..]
                        == [
                            Operand::LiteralBit32(3),
                            Operand::LiteralBit32(1),
                            Operand::LiteralBit32(4),
                        ]
            })
        })
    });
    assert!(found, "no shuffle with the merge mask (3, 1, 4)");
}

#[test]
fn test_single_component_swizzle_store_uses_access_chain() {
    let v = var(1, "v", types::vec(3));
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(&v, None),
        Statement::Expression(Expression::Binary {
            op: BinaryOp::Assign,
            left: Box::new(Expression::Swizzle {
                base: Box::new(var_ref(&v)),
                components: vec![1],
                ty: Type::Float,
            }),
            right: Box::new(float_lit(1.0)),
            ty: Type::Float,
        }),
    ])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::AccessChain), 1);
    assert_eq!(count_op(&module, Op::VectorShuffle), 0);
}

#[test]
fn test_ternary_lowers_to_temp_variable() {
    let x = var(1, "x", Type::Int);
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(&x, Some(int_lit(1))),
        Statement::Expression(Expression::Ternary {
            test: Expression::BoolLiteral { value: true }.into(),
            if_true: Box::new(var_ref(&x)),
            if_false: Box::new(int_lit(0)),
            ty: Type::Int,
        }),
    ])]);
    let module = parse(&emit(&program));
    // Temp-variable form, not OpPhi and not OpSelect.
    assert_eq!(count_op(&module, Op::Phi), 0);
    assert_eq!(count_op(&module, Op::Select), 0);
    assert_eq!(count_op(&module, Op::SelectionMerge), 1);
    assert!(count_op(&module, Op::Store) >= 2);
    // x plus the ternary temp.
    let main = find_function(&module, "main");
    assert_eq!(
        main.blocks[0]
            .instructions
            .iter()
            .filter(|i| i.class.opcode == Op::Variable)
            .count(),
        2
    );
}

#[test]
fn test_constant_ternary_uses_select() {
    let program = fragment_program(vec![main_with_body(vec![Statement::Expression(
        Expression::Ternary {
            test: Expression::BoolLiteral { value: true }.into(),
            if_true: Box::new(int_lit(1)),
            if_false: Box::new(int_lit(2)),
            ty: Type::Int,
        },
    )])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::Select), 1);
    assert_eq!(count_op(&module, Op::SelectionMerge), 0);
}

#[test]
fn test_global_initializer_runs_at_main_start() {
    let g = var(1, "g", Type::Float);
    let program = fragment_program(vec![
        ProgramElement::GlobalVars(vec![VarDecl {
            var: Rc::clone(&g),
            init: Some(float_lit(2.5)),
        }]),
        main_with_body(vec![]),
    ]);
    let module = parse(&emit(&program));

    let global = module
        .types_global_values
        .iter()
        .find(|i| {
            i.class.opcode == Op::Variable
                && i.operands.first() == Some(&Operand::StorageClass(StorageClass::Private))
        })
        .expect("no private global emitted");
    let global_id = global.result_id.unwrap();

    let main = find_function(&module, "main");
    let first = &main.blocks[0].instructions[0];
    assert_eq!(first.class.opcode, Op::Store);
    assert_eq!(first.operands[0], Operand::IdRef(global_id));
}

#[test]
fn test_interface_variables_and_block_layout() {
    let position = global_var(1, "position", types::vec(4), ModifierFlags::IN, Some(0));
    let color = global_var(2, "color", types::vec(4), ModifierFlags::OUT, Some(0));
    let block = Rc::new(Variable {
        id: VariableId(3),
        name: "Globals".to_string(),
        ty: Type::Struct {
            name: "Globals".to_string(),
            fields: vec![
                lux_core::ir::Field {
                    name: "transform".to_string(),
                    ty: types::mat(4, 4),
                    layout: Layout::default(),
                },
                lux_core::ir::Field {
                    name: "tint".to_string(),
                    ty: types::vec(4),
                    layout: Layout::default(),
                },
            ],
        },
        modifiers: Modifiers {
            flags: ModifierFlags::UNIFORM,
            layout: Layout {
                binding: Some(0),
                descriptor_set: Some(0),
                ..Layout::default()
            },
        },
    });
    let program = fragment_program(vec![
        ProgramElement::InterfaceBlock(block),
        ProgramElement::GlobalVars(vec![
            VarDecl {
                var: position,
                init: None,
            },
            VarDecl {
                var: color,
                init: None,
            },
        ]),
        main_with_body(vec![]),
    ]);
    let module = parse(&emit(&program));

    // Entry point lists exactly the two in/out globals, not the block.
    assert_eq!(module.entry_points[0].operands.len(), 5);

    let has_decoration = |d: rspirv::spirv::Decoration| {
        module.annotations.iter().any(|i| {
            i.operands.contains(&Operand::Decoration(d))
        })
    };
    assert!(has_decoration(rspirv::spirv::Decoration::Block));
    assert!(has_decoration(rspirv::spirv::Decoration::Binding));
    assert!(has_decoration(rspirv::spirv::Decoration::DescriptorSet));
    assert!(has_decoration(rspirv::spirv::Decoration::Location));
    assert!(has_decoration(rspirv::spirv::Decoration::ColMajor));
    assert!(has_decoration(rspirv::spirv::Decoration::MatrixStride));

    // Member offsets: mat4 at 0, vec4 right after at 64.
    let offsets: Vec<u32> = module
        .annotations
        .iter()
        .filter(|i| {
            i.class.opcode == Op::MemberDecorate
                && i.operands.get(2) == Some(&Operand::Decoration(rspirv::spirv::Decoration::Offset))
        })
        .map(|i| match i.operands[3] {
            Operand::LiteralBit32(o) => o,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(offsets, vec![0, 64]);
}

#[test]
fn test_texture_sampling() {
    let sampler_ty = Type::Sampler {
        dimensions: Dim::Dim2D,
        is_depth: false,
        is_arrayed: false,
        is_multisampled: false,
        is_sampled: true,
    };
    let s = Rc::new(Variable {
        id: VariableId(1),
        name: "tex".to_string(),
        ty: sampler_ty.clone(),
        modifiers: Modifiers {
            flags: ModifierFlags::UNIFORM,
            layout: Layout {
                binding: Some(0),
                ..Layout::default()
            },
        },
    });
    // texture() is an intrinsic: its declaration never appears as a program
    // element, so the call falls through to intrinsic dispatch.
    let texture_decl = fn_decl(99, "texture", types::vec(4), vec![]);
    let uv = Expression::Constructor {
        ty: types::vec(2),
        arguments: vec![float_lit(0.5), float_lit(0.5)],
    };
    let program = fragment_program(vec![
        ProgramElement::GlobalVars(vec![VarDecl {
            var: Rc::clone(&s),
            init: None,
        }]),
        main_with_body(vec![Statement::Expression(Expression::Call {
            function: texture_decl,
            arguments: vec![var_ref(&s), uv],
            ty: types::vec(4),
        })]),
    ]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::ImageSampleImplicitLod), 1);
    assert!(module
        .types_global_values
        .iter()
        .any(|i| i.class.opcode == Op::TypeSampledImage));
    // Samplers live in UniformConstant storage.
    assert!(module.types_global_values.iter().any(|i| {
        i.class.opcode == Op::Variable
            && i.operands.first() == Some(&Operand::StorageClass(StorageClass::UniformConstant))
    }));
}

#[test]
fn test_intrinsic_ext_inst_call() {
    // sqrt(2.0) lowers to an OpExtInst against GLSL.std.450.
    let sqrt_decl = fn_decl(99, "sqrt", Type::Float, vec![]);
    let program = fragment_program(vec![main_with_body(vec![Statement::Expression(
        Expression::Call {
            function: sqrt_decl,
            arguments: vec![float_lit(2.0)],
            ty: Type::Float,
        },
    )])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::ExtInst), 1);
    assert_eq!(module.ext_inst_imports.len(), 1);
    assert_eq!(
        module.ext_inst_imports[0].operands[0],
        Operand::LiteralString("GLSL.std.450".to_string())
    );
}

#[test]
fn test_forward_function_reference() {
    // main calls a helper that appears later in the element list.
    let helper_decl = fn_decl(1, "helper", Type::Float, vec![]);
    let program = fragment_program(vec![
        main_with_body(vec![Statement::Expression(Expression::Call {
            function: Rc::clone(&helper_decl),
            arguments: vec![],
            ty: Type::Float,
        })]),
        ProgramElement::Function(FunctionDefinition {
            decl: helper_decl,
            body: Statement::Block(vec![Statement::Return(Some(float_lit(1.0)))]),
        }),
    ]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::FunctionCall), 1);
    assert_eq!(count_op(&module, Op::ReturnValue), 1);
    assert_eq!(module.functions.len(), 2);
}

#[test]
fn test_emission_is_deterministic() {
    let v = var(1, "v", types::vec(4));
    let program = fragment_program(vec![main_with_body(vec![
        decl_stmt(
            &v,
            Some(Expression::Constructor {
                ty: types::vec(4),
                arguments: vec![float_lit(1.0)],
            }),
        ),
        Statement::Expression(Expression::Binary {
            op: BinaryOp::MulAssign,
            left: Box::new(var_ref(&v)),
            right: Box::new(float_lit(0.5)),
            ty: types::vec(4),
        }),
    ])]);
    let first = CodeGenerator::new().generate(&program).unwrap();
    let second = CodeGenerator::new().generate(&program).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_vector_broadcast_constructor() {
    // A single-scalar vector constructor broadcasts the argument.
    let program = fragment_program(vec![main_with_body(vec![Statement::Expression(
        Expression::Constructor {
            ty: types::vec(3),
            arguments: vec![float_lit(1.0)],
        },
    )])]);
    let module = parse(&emit(&program));
    // All-constant arguments produce an OpConstantComposite with the scalar
    // repeated per lane.
    let composite = module
        .types_global_values
        .iter()
        .find(|i| i.class.opcode == Op::ConstantComposite)
        .expect("no constant composite");
    assert_eq!(composite.operands.len(), 3);
    assert_eq!(composite.operands[0], composite.operands[1]);
    assert_eq!(composite.operands[1], composite.operands[2]);
}

#[test]
fn test_discard_statement() {
    let program = fragment_program(vec![main_with_body(vec![Statement::Discard])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::Kill), 1);
    // The discard terminates the entry block; no OpReturn follows in it.
    let main = find_function(&module, "main");
    assert_eq!(main.blocks.len(), 1);
}

#[test]
fn test_runtime_sized_array_is_rejected() {
    let a = var(1, "a", types::array(Type::Float, 0));
    let program = fragment_program(vec![main_with_body(vec![decl_stmt(&a, None)])]);
    let err = CodeGenerator::new().generate(&program).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported(_)));
}

#[test]
fn test_shift_operator_is_rejected() {
    let program = fragment_program(vec![main_with_body(vec![Statement::Expression(
        Expression::Binary {
            op: BinaryOp::Shl,
            left: Box::new(int_lit(1)),
            right: Box::new(int_lit(2)),
            ty: Type::Int,
        },
    )])]);
    let err = CodeGenerator::new().generate(&program).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported(_)));
}

#[test]
fn test_missing_main_is_rejected() {
    let program = fragment_program(vec![]);
    let err = CodeGenerator::new().generate(&program).unwrap_err();
    assert!(matches!(err, CodegenError::MissingMain));
}

#[test]
fn test_matrix_constructor_from_scalar_is_diagonal() {
    // mat2(1.0): two column constructs plus the final matrix construct.
    let program = fragment_program(vec![main_with_body(vec![Statement::Expression(
        Expression::Constructor {
            ty: types::mat(2, 2),
            arguments: vec![float_lit(1.0)],
        },
    )])]);
    let module = parse(&emit(&program));
    assert_eq!(count_op(&module, Op::CompositeConstruct), 3);
}

#[test]
fn test_source_extension_element() {
    let program = fragment_program(vec![
        ProgramElement::Extension("GL_EXT_example".to_string()),
        main_with_body(vec![]),
    ]);
    let module = parse(&emit(&program));
    assert!(module.debug_string_source.iter().any(|i| {
        i.class.opcode == Op::SourceExtension
            && i.operands[0] == Operand::LiteralString("GL_EXT_example".to_string())
    }));
}

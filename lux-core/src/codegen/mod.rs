//! Lowering from the typed IR to a SPIR-V module.
//!
//! The generator is single-threaded and single-use: construct one, feed it a
//! [`Program`], get back the assembled words. The rspirv builder owns section
//! ordering and type/constant deduplication. Everything else lives here: IR
//! type caching, the current-block slot, break/continue targets, l-values,
//! operator and intrinsic selection, and structured control flow.

mod global;
mod intrinsics;
mod lvalue;
mod scope;

use std::collections::HashMap;
use std::mem;

use log::debug;
use rspirv::binary::Assemble;
use rspirv::dr::{Builder, InsertPoint, Instruction, Operand};
use rspirv::spirv::{
    self, AddressingModel, Capability, Decoration, ExecutionMode, ExecutionModel, FunctionControl,
    ImageFormat, ImageOperands, LoopControl, MemoryModel, SelectionControl, StorageClass, Word,
};

use crate::error::{CodegenError, Result};
use crate::ir::{
    field_offsets, BinaryOp, Expression, Field, FunctionDeclaration, FunctionDefinition,
    PostfixOp, PrefixOp, Program, ProgramElement, ProgramKind, Statement, Type, TypeKind, VarDecl,
    Variable,
};

use self::global::GlobalBuilder;
pub use self::intrinsics::{glsl, Intrinsic, IntrinsicManager, ScalarClass, SpecialIntrinsic};
use self::intrinsics::scalar_class;
use self::lvalue::LValue;
use self::scope::{Environment, VarBinding};

/// A SPIR-V value: its result ID together with the ID of its type.
#[derive(Debug, Clone, Copy)]
pub struct Value {
    pub id: Word,
    pub type_id: Word,
}

/// Key for caching pointer types by storage class and pointee type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PtrKey {
    sc: StorageClass,
    ty: Word,
}

/// Emitter for a binary instruction of the form `op %type %lhs %rhs`.
type BinEmit =
    fn(&mut Builder, Word, Option<Word>, Word, Word) -> std::result::Result<Word, rspirv::dr::Error>;

pub struct CodeGenerator<'p> {
    builder: Builder,
    env: Environment,
    globals: GlobalBuilder,
    intrinsics: IntrinsicManager,
    type_cache: HashMap<Type, Word>,
    ptr_cache: HashMap<PtrKey, Word>,

    /// Label of the block currently receiving instructions; `None` once a
    /// terminator has been emitted.
    current_block: Option<Word>,
    break_target: Vec<Word>,
    continue_target: Vec<Word>,
    /// Function-scope `OpVariable`s queued for insertion at the head of the
    /// current function's entry block.
    pending_variables: Vec<(Word, Word)>,
    function_entry_block_index: Option<usize>,
    /// Global initializer expressions, evaluated and stored at the top of
    /// `main`.
    deferred_global_inits: Vec<(Word, &'p Expression)>,

    void_type: Word,
    bool_type: Word,
    int_type: Word,
    uint_type: Word,
    float_type: Word,
}

impl Default for CodeGenerator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> CodeGenerator<'p> {
    pub fn new() -> Self {
        Self::with_capabilities(Vec::new())
    }

    /// A generator whose module declares `Shader` plus the given extra
    /// capabilities.
    pub fn with_capabilities(extra: Vec<Capability>) -> Self {
        let mut builder = Builder::new();
        builder.set_version(1, 0);
        builder.capability(Capability::Shader);
        for cap in extra {
            if cap != Capability::Shader {
                builder.capability(cap);
            }
        }

        let mut intrinsics = IntrinsicManager::new();
        intrinsics.import_ext_inst(&mut builder);
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        let void_type = builder.type_void();
        let bool_type = builder.type_bool();
        let int_type = builder.type_int(32, 1);
        let uint_type = builder.type_int(32, 0);
        let float_type = builder.type_float(32);

        CodeGenerator {
            builder,
            env: Environment::new(),
            globals: GlobalBuilder::new(),
            intrinsics,
            type_cache: HashMap::new(),
            ptr_cache: HashMap::new(),
            current_block: None,
            break_target: Vec::new(),
            continue_target: Vec::new(),
            pending_variables: Vec::new(),
            function_entry_block_index: None,
            deferred_global_inits: Vec::new(),
            void_type,
            bool_type,
            int_type,
            uint_type,
            float_type,
        }
    }

    /// Lower a whole program and assemble the module.
    pub fn generate(mut self, program: &'p Program) -> Result<Vec<u32>> {
        // Reserve IDs for every function first so calls can reference
        // functions defined later in the program.
        for element in &program.elements {
            if let ProgramElement::Function(def) = element {
                let id = self.builder.id();
                self.env.define_function(def.decl.id, id);
            }
        }

        for element in &program.elements {
            if let ProgramElement::InterfaceBlock(var) = element {
                self.generate_interface_block(var)?;
            }
        }
        for element in &program.elements {
            if let ProgramElement::GlobalVars(decls) = element {
                self.generate_global_vars(decls)?;
            }
        }
        for element in &program.elements {
            if let ProgramElement::Function(def) = element {
                self.generate_function(def)?;
            }
        }

        let mut main = None;
        for element in &program.elements {
            if let ProgramElement::Function(def) = element {
                if def.decl.name == "main" {
                    main = Some(def);
                }
            }
        }
        let main = main.ok_or(CodegenError::MissingMain)?;
        let main_id = self
            .env
            .lookup_function(main.decl.id)
            .ok_or(CodegenError::MissingMain)?;

        let execution_model = match program.kind {
            ProgramKind::Vertex => ExecutionModel::Vertex,
            ProgramKind::Fragment => ExecutionModel::Fragment,
        };
        let interface = self.globals.interface_variables().to_vec();
        debug!(
            "entry point 'main' ({:?}), {} interface variables",
            execution_model,
            interface.len()
        );
        self.builder
            .entry_point(execution_model, main_id, "main", interface);
        if program.kind == ProgramKind::Fragment {
            self.builder
                .execution_mode(main_id, ExecutionMode::OriginUpperLeft, vec![]);
        }

        for element in &program.elements {
            if let ProgramElement::Extension(name) = element {
                self.builder.source_extension(name.clone());
            }
        }

        Ok(self.builder.module().assemble())
    }

    // ---------------------------------------------------------------------
    // Globals
    // ---------------------------------------------------------------------

    fn generate_interface_block(&mut self, var: &Variable) -> Result<()> {
        let type_id = self.get_type(&var.ty)?;
        self.builder.decorate(type_id, Decoration::Block, vec![]);
        let storage_class = GlobalBuilder::storage_class_for_block(&var.modifiers);
        let pointer_type = self.ptr_of(storage_class, type_id);
        let id = self
            .globals
            .create_global(&mut self.builder, var, pointer_type, storage_class, None);
        self.env.define_global(
            var.id,
            VarBinding {
                pointer: id,
                type_id,
                storage_class,
            },
        );
        Ok(())
    }

    fn generate_global_vars(&mut self, decls: &'p [VarDecl]) -> Result<()> {
        for decl in decls {
            let var = &decl.var;
            let storage_class = GlobalBuilder::storage_class_for_global(&var.modifiers, &var.ty);
            let type_id = self.get_type(&var.ty)?;
            let pointer_type = self.ptr_of(storage_class, type_id);
            let id = self
                .globals
                .create_global(&mut self.builder, var, pointer_type, storage_class, None);
            self.env.define_global(
                var.id,
                VarBinding {
                    pointer: id,
                    type_id,
                    storage_class,
                },
            );
            if let Some(init) = &decl.init {
                self.deferred_global_inits.push((id, init));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Functions
    // ---------------------------------------------------------------------

    fn generate_function(&mut self, def: &'p FunctionDefinition) -> Result<()> {
        let decl = &def.decl;
        let function_id = self
            .env
            .lookup_function(decl.id)
            .ok_or_else(|| CodegenError::SpirvError(format!("function '{}' was not registered", decl.name)))?;
        let return_type = self.get_type(&decl.return_type)?;
        let function_type = self.get_function_type(decl)?;

        self.builder
            .begin_function(return_type, Some(function_id), FunctionControl::NONE, function_type)?;
        self.builder.name(function_id, decl.name.clone());

        // Parameters are pointerized; each parameter already is a
        // Function-storage pointer and binds directly.
        for param in &decl.parameters {
            let param_type = self.get_type(&param.ty)?;
            let pointer_type = self.ptr_of(StorageClass::Function, param_type);
            let param_id = self.builder.function_parameter(pointer_type)?;
            self.builder.name(param_id, param.name.clone());
            self.env.define_local(
                param.id,
                VarBinding {
                    pointer: param_id,
                    type_id: param_type,
                    storage_class: StorageClass::Function,
                },
            );
        }

        let entry = self.builder.begin_block(None)?;
        self.current_block = Some(entry);
        self.function_entry_block_index = self.builder.selected_block();
        self.pending_variables.clear();

        if decl.name == "main" {
            let inits = mem::take(&mut self.deferred_global_inits);
            for (pointer, init) in inits {
                let value = self.generate_expression(init)?;
                self.builder.store(pointer, value.id, None, vec![])?;
            }
        }

        self.generate_statement(&def.body)?;
        self.emit_pending_variables_at_entry_block()?;

        if self.current_block.is_some() {
            self.builder.ret()?;
            self.current_block = None;
        }
        self.builder.end_function()?;
        self.env.clear_locals();
        self.function_entry_block_index = None;
        Ok(())
    }

    /// The function type with every parameter pointerized to storage class
    /// Function, `out` or not: some drivers miscompile by-value parameters
    /// inside loops, so arguments are always passed through pointers.
    fn get_function_type(&mut self, decl: &FunctionDeclaration) -> Result<Word> {
        let return_type = self.get_type(&decl.return_type)?;
        let mut parameter_types = Vec::with_capacity(decl.parameters.len());
        for param in &decl.parameters {
            let ty = self.get_type(&param.ty)?;
            parameter_types.push(self.ptr_of(StorageClass::Function, ty));
        }
        Ok(self.builder.type_function(return_type, parameter_types))
    }

    /// Move the queued `OpVariable`s to the head of the entry block, where
    /// SPIR-V requires them.
    fn emit_pending_variables_at_entry_block(&mut self) -> Result<()> {
        let current_block_index = self.builder.selected_block();
        let entry_block_index = self
            .function_entry_block_index
            .ok_or_else(|| CodegenError::SpirvError("no entry block to receive variables".to_string()))?;
        self.builder.select_block(Some(entry_block_index))?;

        // Inserting at the beginning, so reverse to keep allocation order.
        for (var_id, type_id) in self.pending_variables.drain(..).rev() {
            let inst = Instruction::new(
                spirv::Op::Variable,
                Some(type_id),
                Some(var_id),
                vec![Operand::StorageClass(StorageClass::Function)],
            );
            self.builder.insert_into_block(InsertPoint::Begin, inst)?;
        }

        self.builder.select_block(current_block_index)?;
        Ok(())
    }

    /// Allocate the ID of a function-scope variable; the `OpVariable` itself
    /// is emitted into the entry block when the function is finished.
    fn allocate_function_variable(&mut self, pointer_type: Word) -> Word {
        let id = self.builder.id();
        self.pending_variables.push((id, pointer_type));
        id
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn generate_statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Block(statements) => {
                self.env.push_scope();
                for statement in statements {
                    self.generate_statement(statement)?;
                }
                self.env.pop_scope();
                Ok(())
            }
            Statement::Expression(expr) => {
                self.generate_expression(expr)?;
                Ok(())
            }
            Statement::VarDecls(decls) => {
                for decl in decls {
                    let type_id = self.get_type(&decl.var.ty)?;
                    let pointer_type = self.ptr_of(StorageClass::Function, type_id);
                    let id = self.allocate_function_variable(pointer_type);
                    self.builder.name(id, decl.var.name.clone());
                    self.env.define_local(
                        decl.var.id,
                        VarBinding {
                            pointer: id,
                            type_id,
                            storage_class: StorageClass::Function,
                        },
                    );
                    if let Some(init) = &decl.init {
                        let value = self.generate_expression(init)?;
                        self.builder.store(id, value.id, None, vec![])?;
                    }
                }
                Ok(())
            }
            Statement::Return(expr) => {
                match expr {
                    Some(expr) => {
                        let value = self.generate_expression(expr)?;
                        self.builder.ret_value(value.id)?;
                    }
                    None => self.builder.ret()?,
                }
                self.current_block = None;
                Ok(())
            }
            Statement::If {
                test,
                if_true,
                if_false,
            } => self.generate_if(test, if_true, if_false.as_deref()),
            Statement::For {
                initializer,
                test,
                next,
                body,
            } => self.generate_for(initializer.as_deref(), test, next.as_ref(), body),
            Statement::Break => {
                let target = *self
                    .break_target
                    .last()
                    .ok_or_else(|| CodegenError::SpirvError("break outside of a loop".to_string()))?;
                self.branch_to(target)
            }
            Statement::Continue => {
                let target = *self
                    .continue_target
                    .last()
                    .ok_or_else(|| CodegenError::SpirvError("continue outside of a loop".to_string()))?;
                self.branch_to(target)
            }
            Statement::Discard => {
                self.builder.kill()?;
                self.current_block = None;
                Ok(())
            }
        }
    }

    fn generate_if(
        &mut self,
        test: &Expression,
        if_true: &Statement,
        if_false: Option<&Statement>,
    ) -> Result<()> {
        let test = self.generate_expression(test)?;
        let true_label = self.builder.id();
        let false_label = self.builder.id();
        if let Some(if_false) = if_false {
            let end_label = self.builder.id();
            self.builder
                .selection_merge(end_label, SelectionControl::NONE)?;
            self.builder
                .branch_conditional(test.id, true_label, false_label, vec![])?;
            self.current_block = None;

            self.begin_labeled_block(true_label)?;
            self.generate_statement(if_true)?;
            if self.current_block.is_some() {
                self.branch_to(end_label)?;
            }
            self.begin_labeled_block(false_label)?;
            self.generate_statement(if_false)?;
            if self.current_block.is_some() {
                self.branch_to(end_label)?;
            }
            self.begin_labeled_block(end_label)
        } else {
            self.builder
                .selection_merge(false_label, SelectionControl::NONE)?;
            self.builder
                .branch_conditional(test.id, true_label, false_label, vec![])?;
            self.current_block = None;

            self.begin_labeled_block(true_label)?;
            self.generate_statement(if_true)?;
            if self.current_block.is_some() {
                self.branch_to(false_label)?;
            }
            self.begin_labeled_block(false_label)
        }
    }

    fn generate_for(
        &mut self,
        initializer: Option<&Statement>,
        test: &Expression,
        next: Option<&Expression>,
        body: &Statement,
    ) -> Result<()> {
        if let Some(initializer) = initializer {
            self.generate_statement(initializer)?;
        }
        let header = self.builder.id();
        let start = self.builder.id();
        let body_label = self.builder.id();
        let next_label = self.builder.id();
        self.continue_target.push(next_label);
        let end = self.builder.id();
        self.break_target.push(end);

        self.branch_to(header)?;
        self.begin_labeled_block(header)?;
        self.builder
            .loop_merge(end, next_label, LoopControl::NONE, vec![])?;
        self.branch_to(start)?;

        self.begin_labeled_block(start)?;
        let test = self.generate_expression(test)?;
        self.builder
            .branch_conditional(test.id, body_label, end, vec![])?;
        self.current_block = None;

        self.begin_labeled_block(body_label)?;
        self.generate_statement(body)?;
        if self.current_block.is_some() {
            self.branch_to(next_label)?;
        }

        self.begin_labeled_block(next_label)?;
        if let Some(next) = next {
            self.generate_expression(next)?;
        }
        self.branch_to(header)?;

        self.begin_labeled_block(end)?;
        self.break_target.pop();
        self.continue_target.pop();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    pub(crate) fn generate_expression(&mut self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::BoolLiteral { value } => {
                let id = self.bool_constant(*value);
                Ok(Value {
                    id,
                    type_id: self.bool_type,
                })
            }
            Expression::IntLiteral { value, ty } => {
                let type_id = match ty {
                    Type::UInt => self.uint_type,
                    _ => self.int_type,
                };
                let id = self.builder.constant_bit32(type_id, *value as u32);
                Ok(Value { id, type_id })
            }
            Expression::FloatLiteral { value, ty } => match ty {
                Type::Double => {
                    let type_id = self.get_type(&Type::Double)?;
                    let id = self.builder.constant_bit64(type_id, value.to_bits());
                    Ok(Value { id, type_id })
                }
                _ => {
                    let id = self
                        .builder
                        .constant_bit32(self.float_type, (*value as f32).to_bits());
                    Ok(Value {
                        id,
                        type_id: self.float_type,
                    })
                }
            },
            Expression::VariableRef { var } => {
                let binding = self
                    .env
                    .lookup(var.id)
                    .ok_or_else(|| CodegenError::UndefinedVariable(var.name.clone()))?;
                let id = self
                    .builder
                    .load(binding.type_id, None, binding.pointer, None, vec![])?;
                Ok(Value {
                    id,
                    type_id: binding.type_id,
                })
            }
            Expression::FieldAccess { .. } | Expression::Index { .. } => {
                let lv = self.get_lvalue(expr)?;
                self.lvalue_load(&lv)
            }
            Expression::Swizzle {
                base,
                components,
                ty,
            } => {
                let base = self.generate_expression(base)?;
                let type_id = self.get_type(ty)?;
                let id = if components.len() == 1 {
                    self.builder
                        .composite_extract(type_id, None, base.id, vec![components[0]])?
                } else {
                    self.builder.vector_shuffle(
                        type_id,
                        None,
                        base.id,
                        base.id,
                        components.clone(),
                    )?
                };
                Ok(Value { id, type_id })
            }
            Expression::Binary {
                op,
                left,
                right,
                ty,
            } => self.generate_binary(*op, left, right, ty),
            Expression::Constructor { ty, arguments } => self.generate_constructor(ty, arguments),
            Expression::Call {
                function,
                arguments,
                ty,
            } => self.generate_call(function, arguments, ty),
            Expression::Prefix { op, operand, ty } => self.generate_prefix(*op, operand, ty),
            Expression::Postfix { op, operand, ty } => self.generate_postfix(*op, operand, ty),
            Expression::Ternary {
                test,
                if_true,
                if_false,
                ty,
            } => self.generate_ternary(test, if_true, if_false, ty),
        }
    }

    fn generate_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        ty: &Type,
    ) -> Result<Value> {
        match op {
            BinaryOp::Assign => {
                let rhs = self.generate_expression(right)?;
                let lv = self.get_lvalue(left)?;
                self.lvalue_store(&lv, rhs.id)?;
                return Ok(rhs);
            }
            BinaryOp::LogicalAnd => return self.generate_logical_and(left, right),
            BinaryOp::LogicalOr => return self.generate_logical_or(left, right),
            BinaryOp::Shl | BinaryOp::Shr => {
                return Err(CodegenError::Unsupported("shift operators".to_string()));
            }
            BinaryOp::BitAndAssign | BinaryOp::BitOrAssign | BinaryOp::BitXorAssign => {
                return Err(CodegenError::Unsupported(
                    "bitwise compound assignment".to_string(),
                ));
            }
            _ => {}
        }

        let result_type = self.get_type(ty)?;
        let mut lvalue = None;
        let mut lhs = if op.is_assignment() {
            let lv = self.get_lvalue(left)?;
            let loaded = self.lvalue_load(&lv)?;
            lvalue = Some(lv);
            loaded.id
        } else {
            self.generate_expression(left)?.id
        };
        let mut rhs = self.generate_expression(right)?.id;

        let left_ty = left.ty();
        let right_ty = right.ty();

        // Mismatched shapes need promotion or a dedicated matrix opcode.
        let operand_ty = if left_ty != right_ty {
            if left_ty.kind() == TypeKind::Vector && right_ty.is_number() {
                rhs = self.broadcast_scalar(result_type, ty.columns(), rhs)?;
                right_ty
            } else if right_ty.kind() == TypeKind::Vector && left_ty.is_number() {
                lhs = self.broadcast_scalar(result_type, ty.columns(), lhs)?;
                left_ty
            } else if left_ty.kind() == TypeKind::Matrix {
                let id = match right_ty.kind() {
                    TypeKind::Matrix => {
                        self.builder.matrix_times_matrix(result_type, None, lhs, rhs)?
                    }
                    TypeKind::Vector => {
                        self.builder.matrix_times_vector(result_type, None, lhs, rhs)?
                    }
                    TypeKind::Scalar => {
                        self.builder.matrix_times_scalar(result_type, None, lhs, rhs)?
                    }
                    _ => {
                        return Err(CodegenError::SpirvError(
                            "invalid right operand for matrix arithmetic".to_string(),
                        ));
                    }
                };
                return self.finish_matrix_multiply(op, lvalue, id, result_type);
            } else if right_ty.kind() == TypeKind::Matrix {
                let id = match left_ty.kind() {
                    TypeKind::Vector => {
                        self.builder.vector_times_matrix(result_type, None, lhs, rhs)?
                    }
                    // scalar * matrix: same opcode as matrix * scalar with the
                    // operands swapped
                    TypeKind::Scalar => {
                        self.builder.matrix_times_scalar(result_type, None, rhs, lhs)?
                    }
                    _ => {
                        return Err(CodegenError::SpirvError(
                            "invalid left operand for matrix arithmetic".to_string(),
                        ));
                    }
                };
                return self.finish_matrix_multiply(op, lvalue, id, result_type);
            } else {
                return Err(CodegenError::SpirvError(format!(
                    "mismatched operand types for '{:?}'",
                    op
                )));
            }
        } else {
            left_ty
        };

        let value = match op {
            BinaryOp::Eq => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_ord_equal as BinEmit),
                Some(Builder::i_equal as BinEmit),
                Some(Builder::i_equal as BinEmit),
                Some(Builder::logical_equal as BinEmit),
                "==",
            )?,
            BinaryOp::Ne => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_ord_not_equal as BinEmit),
                Some(Builder::i_not_equal as BinEmit),
                Some(Builder::i_not_equal as BinEmit),
                Some(Builder::logical_not_equal as BinEmit),
                "!=",
            )?,
            BinaryOp::Lt => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_ord_less_than as BinEmit),
                Some(Builder::s_less_than as BinEmit),
                Some(Builder::u_less_than as BinEmit),
                None,
                "<",
            )?,
            BinaryOp::Le => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_ord_less_than_equal as BinEmit),
                Some(Builder::s_less_than_equal as BinEmit),
                Some(Builder::u_less_than_equal as BinEmit),
                None,
                "<=",
            )?,
            BinaryOp::Gt => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_ord_greater_than as BinEmit),
                Some(Builder::s_greater_than as BinEmit),
                Some(Builder::u_greater_than as BinEmit),
                None,
                ">",
            )?,
            BinaryOp::Ge => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_ord_greater_than_equal as BinEmit),
                Some(Builder::s_greater_than_equal as BinEmit),
                Some(Builder::u_greater_than_equal as BinEmit),
                None,
                ">=",
            )?,
            BinaryOp::Add | BinaryOp::AddAssign => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_add as BinEmit),
                Some(Builder::i_add as BinEmit),
                Some(Builder::i_add as BinEmit),
                None,
                "+",
            )?,
            BinaryOp::Sub | BinaryOp::SubAssign => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_sub as BinEmit),
                Some(Builder::i_sub as BinEmit),
                Some(Builder::i_sub as BinEmit),
                None,
                "-",
            )?,
            BinaryOp::Mul | BinaryOp::MulAssign => {
                if left_ty.kind() == TypeKind::Matrix && right_ty.kind() == TypeKind::Matrix {
                    let id = self.builder.matrix_times_matrix(result_type, None, lhs, rhs)?;
                    Value {
                        id,
                        type_id: result_type,
                    }
                } else {
                    self.emit_binary_op(
                        result_type,
                        operand_ty,
                        lhs,
                        rhs,
                        Some(Builder::f_mul as BinEmit),
                        Some(Builder::i_mul as BinEmit),
                        Some(Builder::i_mul as BinEmit),
                        None,
                        "*",
                    )?
                }
            }
            BinaryOp::Div | BinaryOp::DivAssign => self.emit_binary_op(
                result_type,
                operand_ty,
                lhs,
                rhs,
                Some(Builder::f_div as BinEmit),
                Some(Builder::s_div as BinEmit),
                Some(Builder::u_div as BinEmit),
                None,
                "/",
            )?,
            _ => {
                return Err(CodegenError::SpirvError(format!(
                    "unsupported binary operator {:?}",
                    op
                )));
            }
        };

        if matches!(
            op,
            BinaryOp::AddAssign | BinaryOp::SubAssign | BinaryOp::MulAssign | BinaryOp::DivAssign
        ) {
            let lv = lvalue.ok_or_else(|| {
                CodegenError::SpirvError("compound assignment without assignable target".to_string())
            })?;
            self.lvalue_store(&lv, value.id)?;
        }
        Ok(value)
    }

    fn finish_matrix_multiply(
        &mut self,
        op: BinaryOp,
        lvalue: Option<LValue>,
        id: Word,
        result_type: Word,
    ) -> Result<Value> {
        match op {
            BinaryOp::Mul => {}
            BinaryOp::MulAssign => {
                let lv = lvalue.ok_or_else(|| {
                    CodegenError::SpirvError(
                        "compound assignment without assignable target".to_string(),
                    )
                })?;
                self.lvalue_store(&lv, id)?;
            }
            _ => {
                return Err(CodegenError::SpirvError(format!(
                    "operator {:?} cannot combine matrix operands",
                    op
                )));
            }
        }
        Ok(Value {
            id,
            type_id: result_type,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_binary_op(
        &mut self,
        result_type: Word,
        operand_ty: &Type,
        lhs: Word,
        rhs: Word,
        if_float: Option<BinEmit>,
        if_signed: Option<BinEmit>,
        if_unsigned: Option<BinEmit>,
        if_bool: Option<BinEmit>,
        op_name: &str,
    ) -> Result<Value> {
        let class = scalar_class(operand_ty).ok_or_else(|| {
            CodegenError::SpirvError(format!("cannot apply '{}' to {:?}", op_name, operand_ty))
        })?;
        let emit = match class {
            ScalarClass::Float => if_float,
            ScalarClass::Signed => if_signed,
            ScalarClass::Unsigned => if_unsigned,
            ScalarClass::Bool => if_bool,
        }
        .ok_or_else(|| {
            CodegenError::SpirvError(format!(
                "operator '{}' has no lowering for operands of type {:?}",
                op_name, operand_ty
            ))
        })?;
        let id = emit(&mut self.builder, result_type, None, lhs, rhs)?;
        Ok(Value {
            id,
            type_id: result_type,
        })
    }

    fn generate_logical_and(&mut self, left: &Expression, right: &Expression) -> Result<Value> {
        let short_circuit = self.bool_constant(false);
        let lhs = self.generate_expression(left)?;
        let lhs_block = self.require_block()?;
        let rhs_label = self.builder.id();
        let end_label = self.builder.id();
        self.builder
            .selection_merge(end_label, SelectionControl::NONE)?;
        self.builder
            .branch_conditional(lhs.id, rhs_label, end_label, vec![])?;
        self.current_block = None;

        self.begin_labeled_block(rhs_label)?;
        let rhs = self.generate_expression(right)?;
        let rhs_block = self.require_block()?;
        self.branch_to(end_label)?;

        self.begin_labeled_block(end_label)?;
        let id = self.builder.phi(
            self.bool_type,
            None,
            vec![(short_circuit, lhs_block), (rhs.id, rhs_block)],
        )?;
        Ok(Value {
            id,
            type_id: self.bool_type,
        })
    }

    fn generate_logical_or(&mut self, left: &Expression, right: &Expression) -> Result<Value> {
        let short_circuit = self.bool_constant(true);
        let lhs = self.generate_expression(left)?;
        let lhs_block = self.require_block()?;
        let rhs_label = self.builder.id();
        let end_label = self.builder.id();
        self.builder
            .selection_merge(end_label, SelectionControl::NONE)?;
        self.builder
            .branch_conditional(lhs.id, end_label, rhs_label, vec![])?;
        self.current_block = None;

        self.begin_labeled_block(rhs_label)?;
        let rhs = self.generate_expression(right)?;
        let rhs_block = self.require_block()?;
        self.branch_to(end_label)?;

        self.begin_labeled_block(end_label)?;
        let id = self.builder.phi(
            self.bool_type,
            None,
            vec![(short_circuit, lhs_block), (rhs.id, rhs_block)],
        )?;
        Ok(Value {
            id,
            type_id: self.bool_type,
        })
    }

    fn generate_ternary(
        &mut self,
        test: &Expression,
        if_true: &Expression,
        if_false: &Expression,
        ty: &Type,
    ) -> Result<Value> {
        let test = self.generate_expression(test)?;
        let type_id = self.get_type(ty)?;
        if if_true.is_constant() && if_false.is_constant() {
            let true_value = self.generate_expression(if_true)?;
            let false_value = self.generate_expression(if_false)?;
            let id = self
                .builder
                .select(type_id, None, test.id, true_value.id, false_value.id)?;
            return Ok(Value { id, type_id });
        }

        // A temp variable with two stores and a load after the merge; OpPhi
        // here crashes some mobile drivers.
        let pointer_type = self.ptr_of(StorageClass::Function, type_id);
        let var = self.allocate_function_variable(pointer_type);
        let true_label = self.builder.id();
        let false_label = self.builder.id();
        let end_label = self.builder.id();
        self.builder
            .selection_merge(end_label, SelectionControl::NONE)?;
        self.builder
            .branch_conditional(test.id, true_label, false_label, vec![])?;
        self.current_block = None;

        self.begin_labeled_block(true_label)?;
        let true_value = self.generate_expression(if_true)?;
        self.builder.store(var, true_value.id, None, vec![])?;
        self.branch_to(end_label)?;

        self.begin_labeled_block(false_label)?;
        let false_value = self.generate_expression(if_false)?;
        self.builder.store(var, false_value.id, None, vec![])?;
        self.branch_to(end_label)?;

        self.begin_labeled_block(end_label)?;
        let id = self.builder.load(type_id, None, var, None, vec![])?;
        Ok(Value { id, type_id })
    }

    fn generate_prefix(&mut self, op: PrefixOp, operand: &Expression, ty: &Type) -> Result<Value> {
        match op {
            PrefixOp::Plus => self.generate_expression(operand),
            PrefixOp::Neg => {
                let type_id = self.get_type(ty)?;
                let value = self.generate_expression(operand)?;
                let id = if ty.is_float() {
                    self.builder.f_negate(type_id, None, value.id)?
                } else if ty.is_signed() {
                    self.builder.s_negate(type_id, None, value.id)?
                } else {
                    return Err(CodegenError::SpirvError(format!(
                        "cannot negate operand of type {:?}",
                        ty
                    )));
                };
                Ok(Value { id, type_id })
            }
            PrefixOp::Not => {
                let type_id = self.get_type(ty)?;
                let value = self.generate_expression(operand)?;
                let id = self.builder.logical_not(type_id, None, value.id)?;
                Ok(Value { id, type_id })
            }
            PrefixOp::Inc | PrefixOp::Dec => {
                let type_id = self.get_type(ty)?;
                let lv = self.get_lvalue(operand)?;
                let loaded = self.lvalue_load(&lv)?;
                let one = self.literal_one(ty)?;
                let value = if op == PrefixOp::Inc {
                    self.emit_binary_op(
                        type_id,
                        ty,
                        loaded.id,
                        one.id,
                        Some(Builder::f_add as BinEmit),
                        Some(Builder::i_add as BinEmit),
                        Some(Builder::i_add as BinEmit),
                        None,
                        "++",
                    )?
                } else {
                    self.emit_binary_op(
                        type_id,
                        ty,
                        loaded.id,
                        one.id,
                        Some(Builder::f_sub as BinEmit),
                        Some(Builder::i_sub as BinEmit),
                        Some(Builder::i_sub as BinEmit),
                        None,
                        "--",
                    )?
                };
                self.lvalue_store(&lv, value.id)?;
                Ok(value)
            }
        }
    }

    /// Postfix increment and decrement return the value observed before the
    /// update.
    fn generate_postfix(&mut self, op: PostfixOp, operand: &Expression, ty: &Type) -> Result<Value> {
        let type_id = self.get_type(ty)?;
        let lv = self.get_lvalue(operand)?;
        let original = self.lvalue_load(&lv)?;
        let one = self.literal_one(ty)?;
        let updated = match op {
            PostfixOp::Inc => self.emit_binary_op(
                type_id,
                ty,
                original.id,
                one.id,
                Some(Builder::f_add as BinEmit),
                Some(Builder::i_add as BinEmit),
                Some(Builder::i_add as BinEmit),
                None,
                "++",
            )?,
            PostfixOp::Dec => self.emit_binary_op(
                type_id,
                ty,
                original.id,
                one.id,
                Some(Builder::f_sub as BinEmit),
                Some(Builder::i_sub as BinEmit),
                Some(Builder::i_sub as BinEmit),
                None,
                "--",
            )?,
        };
        self.lvalue_store(&lv, updated.id)?;
        Ok(original)
    }

    // ---------------------------------------------------------------------
    // Constructors
    // ---------------------------------------------------------------------

    fn generate_constructor(&mut self, ty: &Type, arguments: &[Expression]) -> Result<Value> {
        match ty {
            Type::Float => self.generate_float_constructor(arguments),
            Type::Int => self.generate_int_constructor(arguments),
            Type::Vector { .. } => self.generate_vector_constructor(ty, arguments),
            Type::Matrix { .. } => self.generate_matrix_constructor(ty, arguments),
            _ => Err(CodegenError::SpirvError(format!(
                "unsupported constructor for {:?}",
                ty
            ))),
        }
    }

    fn generate_float_constructor(&mut self, arguments: &[Expression]) -> Result<Value> {
        let [argument] = arguments else {
            return Err(CodegenError::SpirvError(
                "float constructor takes exactly one argument".to_string(),
            ));
        };
        let value = self.generate_expression(argument)?;
        let type_id = self.float_type;
        let id = match argument.ty() {
            Type::Int => self.builder.convert_s_to_f(type_id, None, value.id)?,
            Type::UInt => self.builder.convert_u_to_f(type_id, None, value.id)?,
            Type::Float => return Ok(value),
            other => {
                return Err(CodegenError::SpirvError(format!(
                    "cannot construct float from {:?}",
                    other
                )));
            }
        };
        Ok(Value { id, type_id })
    }

    fn generate_int_constructor(&mut self, arguments: &[Expression]) -> Result<Value> {
        let [argument] = arguments else {
            return Err(CodegenError::SpirvError(
                "int constructor takes exactly one argument".to_string(),
            ));
        };
        let value = self.generate_expression(argument)?;
        let type_id = self.int_type;
        let id = match argument.ty() {
            Type::Float => self.builder.convert_f_to_s(type_id, None, value.id)?,
            Type::UInt => self.builder.sat_convert_u_to_s(type_id, None, value.id)?,
            Type::Int => return Ok(value),
            other => {
                return Err(CodegenError::SpirvError(format!(
                    "cannot construct int from {:?}",
                    other
                )));
            }
        };
        Ok(Value { id, type_id })
    }

    fn generate_vector_constructor(&mut self, ty: &Type, arguments: &[Expression]) -> Result<Value> {
        let columns = ty.columns();
        let type_id = self.get_type(ty)?;
        let constant = arguments.iter().all(Expression::is_constant);

        let mut ids = Vec::with_capacity(arguments.len());
        for argument in arguments {
            ids.push(self.generate_expression(argument)?.id);
        }

        if constant {
            // A single constant argument broadcasts across every component.
            let elements = if ids.len() == 1 {
                vec![ids[0]; columns as usize]
            } else {
                ids
            };
            let id = self.builder.constant_composite(type_id, elements);
            return Ok(Value { id, type_id });
        }

        let id = if ids.len() == 1 && arguments[0].ty().kind() == TypeKind::Scalar {
            self.builder
                .composite_construct(type_id, None, vec![ids[0]; columns as usize])?
        } else {
            self.builder.composite_construct(type_id, None, ids)?
        };
        Ok(Value { id, type_id })
    }

    fn generate_matrix_constructor(&mut self, ty: &Type, arguments: &[Expression]) -> Result<Value> {
        let Type::Matrix {
            component,
            columns,
            rows,
        } = ty
        else {
            return Err(CodegenError::SpirvError(
                "matrix constructor on non-matrix type".to_string(),
            ));
        };

        let mut ids = Vec::with_capacity(arguments.len());
        for argument in arguments {
            ids.push(self.generate_expression(argument)?.id);
        }

        let type_id = self.get_type(ty)?;
        let column_type = Type::Vector {
            component: component.clone(),
            columns: *rows,
        };
        let column_type_id = self.get_type(&column_type)?;

        let column_ids = if ids.len() == 1 && arguments[0].ty().kind() == TypeKind::Scalar {
            // Single scalar: the argument on the diagonal, zero elsewhere.
            let zero = self.builder.constant_bit32(self.float_type, 0f32.to_bits());
            let mut column_ids = Vec::with_capacity(*columns as usize);
            for column in 0..*columns {
                let mut elements = Vec::with_capacity(*rows as usize);
                for row in 0..*rows {
                    elements.push(if row == column { ids[0] } else { zero });
                }
                column_ids.push(self.builder.composite_construct(column_type_id, None, elements)?);
            }
            column_ids
        } else {
            // Vectors become columns directly; a run of scalars fills one.
            let mut column_ids = Vec::with_capacity(*columns as usize);
            let mut current: Vec<Word> = Vec::new();
            for (argument, &id) in arguments.iter().zip(&ids) {
                match argument.ty().kind() {
                    TypeKind::Vector => {
                        if !current.is_empty() {
                            return Err(CodegenError::SpirvError(
                                "matrix constructor arguments straddle a column".to_string(),
                            ));
                        }
                        column_ids.push(id);
                    }
                    TypeKind::Scalar => {
                        current.push(id);
                        if current.len() == *rows as usize {
                            column_ids.push(self.builder.composite_construct(
                                column_type_id,
                                None,
                                mem::take(&mut current),
                            )?);
                        }
                    }
                    _ => {
                        return Err(CodegenError::SpirvError(
                            "matrix constructor arguments must be scalars or vectors".to_string(),
                        ));
                    }
                }
            }
            if !current.is_empty() || column_ids.len() != *columns as usize {
                return Err(CodegenError::SpirvError(
                    "matrix constructor has the wrong number of components".to_string(),
                ));
            }
            column_ids
        };

        let id = self.builder.composite_construct(type_id, None, column_ids)?;
        Ok(Value { id, type_id })
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    fn generate_call(
        &mut self,
        function: &FunctionDeclaration,
        arguments: &[Expression],
        ty: &Type,
    ) -> Result<Value> {
        let Some(function_word) = self.env.lookup_function(function.id) else {
            return self.generate_intrinsic_call(function, arguments, ty);
        };

        if function.parameters.len() != arguments.len() {
            return Err(CodegenError::SpirvError(format!(
                "call to '{}' passes {} arguments for {} parameters",
                function.name,
                arguments.len(),
                function.parameters.len()
            )));
        }

        // Every argument travels as a Function-storage pointer. Out-arguments
        // without an addressable pointer (swizzles) round-trip through a temp
        // and are written back after the call.
        let mut writebacks: Vec<(Word, Word, LValue)> = Vec::new();
        let mut argument_ids = Vec::with_capacity(arguments.len());
        for (param, argument) in function.parameters.iter().zip(arguments) {
            let argument_type = self.get_type(argument.ty())?;
            let pointer_type = self.ptr_of(StorageClass::Function, argument_type);
            if param.modifiers.is_out() {
                let lv = self.get_lvalue(argument)?;
                if let Some(pointer) = lv.pointer() {
                    argument_ids.push(pointer);
                    continue;
                }
                let value = self.lvalue_load(&lv)?;
                let tmp = self.allocate_function_variable(pointer_type);
                self.builder.store(tmp, value.id, None, vec![])?;
                writebacks.push((tmp, argument_type, lv));
                argument_ids.push(tmp);
            } else {
                let value = self.generate_expression(argument)?;
                let tmp = self.allocate_function_variable(pointer_type);
                self.builder.store(tmp, value.id, None, vec![])?;
                argument_ids.push(tmp);
            }
        }

        let result_type = self.get_type(ty)?;
        let id = self
            .builder
            .function_call(result_type, None, function_word, argument_ids)?;

        for (tmp, argument_type, lv) in writebacks {
            let loaded = self.builder.load(argument_type, None, tmp, None, vec![])?;
            self.lvalue_store(&lv, loaded)?;
        }

        Ok(Value {
            id,
            type_id: result_type,
        })
    }

    fn generate_intrinsic_call(
        &mut self,
        function: &FunctionDeclaration,
        arguments: &[Expression],
        ty: &Type,
    ) -> Result<Value> {
        let intrinsic = *self.intrinsics.get(&function.name).ok_or_else(|| {
            CodegenError::SpirvError(format!("unknown function '{}'", function.name))
        })?;

        match intrinsic {
            Intrinsic::Special(kind) => self.generate_special_intrinsic(kind, arguments, ty),
            Intrinsic::Unsupported => Err(CodegenError::Unsupported(format!(
                "intrinsic '{}'",
                function.name
            ))),
            Intrinsic::GlslStd450 { .. } => {
                let (class, ids, result_type) =
                    self.prepare_intrinsic_args(&function.name, arguments, ty)?;
                let instruction = intrinsic.glsl_for(class).ok_or_else(|| {
                    CodegenError::SpirvError(format!(
                        "intrinsic '{}' cannot operate on {:?}",
                        function.name,
                        arguments[0].ty()
                    ))
                })?;
                let id = self.emit_ext_inst(result_type, instruction, &ids)?;
                Ok(Value {
                    id,
                    type_id: result_type,
                })
            }
            Intrinsic::Core { .. } => {
                let (class, ids, result_type) =
                    self.prepare_intrinsic_args(&function.name, arguments, ty)?;
                let op = intrinsic.core_for(class).ok_or_else(|| {
                    CodegenError::SpirvError(format!(
                        "intrinsic '{}' cannot operate on {:?}",
                        function.name,
                        arguments[0].ty()
                    ))
                })?;
                let id = self.emit_core_instruction(op, result_type, &ids)?;
                Ok(Value {
                    id,
                    type_id: result_type,
                })
            }
        }
    }

    /// Operand class of the first argument, lowered argument IDs, and the
    /// result type ID of a table-driven intrinsic call.
    fn prepare_intrinsic_args(
        &mut self,
        name: &str,
        arguments: &[Expression],
        ty: &Type,
    ) -> Result<(ScalarClass, Vec<Word>, Word)> {
        let first = arguments.first().ok_or_else(|| {
            CodegenError::SpirvError(format!("intrinsic '{}' requires at least one argument", name))
        })?;
        // Matrix intrinsics (determinant, matrixInverse) dispatch on their
        // component class.
        let class_ty = match first.ty() {
            Type::Matrix { component, .. } => component.as_ref(),
            other => other,
        };
        let class = scalar_class(class_ty).ok_or_else(|| {
            CodegenError::SpirvError(format!(
                "intrinsic '{}' cannot operate on {:?}",
                name,
                first.ty()
            ))
        })?;
        let mut ids = Vec::with_capacity(arguments.len());
        for argument in arguments {
            ids.push(self.generate_expression(argument)?.id);
        }
        let result_type = self.get_type(ty)?;
        Ok((class, ids, result_type))
    }

    fn generate_special_intrinsic(
        &mut self,
        kind: SpecialIntrinsic,
        arguments: &[Expression],
        ty: &Type,
    ) -> Result<Value> {
        let result_type = self.get_type(ty)?;
        match kind {
            SpecialIntrinsic::Atan => {
                let mut ids = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    ids.push(self.generate_expression(argument)?.id);
                }
                let instruction = if ids.len() == 2 { glsl::ATAN2 } else { glsl::ATAN };
                let id = self.emit_ext_inst(result_type, instruction, &ids)?;
                Ok(Value {
                    id,
                    type_id: result_type,
                })
            }
            SpecialIntrinsic::Texture | SpecialIntrinsic::TextureProj => {
                if arguments.len() < 2 {
                    return Err(CodegenError::SpirvError(
                        "texture sampling requires a sampler and coordinates".to_string(),
                    ));
                }
                let sampler = self.generate_expression(&arguments[0])?;
                let coordinate = self.generate_expression(&arguments[1])?;
                let bias = match arguments.get(2) {
                    Some(argument) => Some(self.generate_expression(argument)?),
                    None => None,
                };
                let (operands, params) = match bias {
                    Some(bias) => (
                        Some(ImageOperands::BIAS),
                        vec![Operand::IdRef(bias.id)],
                    ),
                    None => (None, vec![]),
                };
                let id = if kind == SpecialIntrinsic::Texture {
                    self.builder.image_sample_implicit_lod(
                        result_type,
                        None,
                        sampler.id,
                        coordinate.id,
                        operands,
                        params,
                    )?
                } else {
                    self.builder.image_sample_proj_implicit_lod(
                        result_type,
                        None,
                        sampler.id,
                        coordinate.id,
                        operands,
                        params,
                    )?
                };
                Ok(Value {
                    id,
                    type_id: result_type,
                })
            }
            SpecialIntrinsic::Texture2D => {
                if arguments.len() != 2 {
                    return Err(CodegenError::SpirvError(
                        "texture2D requires a sampler and coordinates".to_string(),
                    ));
                }
                let sampler = self.generate_expression(&arguments[0])?;
                let coordinate = self.generate_expression(&arguments[1])?;
                let id = self.builder.image_sample_implicit_lod(
                    result_type,
                    None,
                    sampler.id,
                    coordinate.id,
                    None,
                    vec![],
                )?;
                Ok(Value {
                    id,
                    type_id: result_type,
                })
            }
        }
    }

    fn emit_ext_inst(&mut self, result_type: Word, instruction: u32, args: &[Word]) -> Result<Word> {
        let set = self.intrinsics.glsl_ext().ok_or_else(|| {
            CodegenError::SpirvError("GLSL.std.450 instruction set was not imported".to_string())
        })?;
        let operands: Vec<Operand> = args.iter().map(|&id| Operand::IdRef(id)).collect();
        Ok(self
            .builder
            .ext_inst(result_type, None, set, instruction, operands)?)
    }

    /// Append a core instruction of the shape `op %type %args…` to the
    /// current block.
    fn emit_core_instruction(
        &mut self,
        op: spirv::Op,
        result_type: Word,
        args: &[Word],
    ) -> Result<Word> {
        let id = self.builder.id();
        let operands: Vec<Operand> = args.iter().map(|&a| Operand::IdRef(a)).collect();
        let inst = Instruction::new(op, Some(result_type), Some(id), operands);
        self.builder.insert_into_block(InsertPoint::End, inst)?;
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Types and constants
    // ---------------------------------------------------------------------

    fn get_type(&mut self, ty: &Type) -> Result<Word> {
        if let Some(&id) = self.type_cache.get(ty) {
            return Ok(id);
        }
        let id = match ty {
            Type::Void => self.void_type,
            Type::Bool => self.bool_type,
            Type::Int => self.int_type,
            Type::UInt => self.uint_type,
            Type::Float => self.float_type,
            Type::Double => self.builder.type_float(64),
            Type::Vector { component, columns } => {
                let component = self.get_type(component)?;
                self.builder.type_vector(component, *columns)
            }
            Type::Matrix {
                component,
                columns,
                rows,
            } => {
                let column = Type::Vector {
                    component: component.clone(),
                    columns: *rows,
                };
                let column_id = self.get_type(&column)?;
                self.builder.type_matrix(column_id, *columns)
            }
            Type::Array { element, count } => {
                if *count == 0 {
                    return Err(CodegenError::Unsupported(
                        "runtime-sized arrays".to_string(),
                    ));
                }
                let element_id = self.get_type(element)?;
                let length = self.int_constant(*count as i64);
                let id = self.builder.type_array(element_id, length);
                self.builder.decorate(
                    id,
                    Decoration::ArrayStride,
                    vec![Operand::LiteralBit32(ty.stride())],
                );
                id
            }
            Type::Struct { name, fields } => self.get_struct_type(name, fields)?,
            Type::Sampler {
                dimensions,
                is_depth,
                is_arrayed,
                is_multisampled,
                is_sampled,
            } => {
                let image = self.builder.type_image(
                    self.float_type,
                    *dimensions,
                    *is_depth as u32,
                    *is_arrayed as u32,
                    *is_multisampled as u32,
                    if *is_sampled { 1 } else { 2 },
                    ImageFormat::Unknown,
                    None,
                );
                self.builder.type_sampled_image(image)
            }
        };
        self.type_cache.insert(ty.clone(), id);
        Ok(id)
    }

    fn get_struct_type(&mut self, name: &str, fields: &[Field]) -> Result<Word> {
        // Resolve member types up front so no declaration lands mid-struct.
        let mut member_types = Vec::with_capacity(fields.len());
        for field in fields {
            member_types.push(self.get_type(&field.ty)?);
        }
        let id = self.builder.type_struct(member_types);
        self.builder.name(id, name.to_string());

        let offsets = field_offsets(fields);
        for (index, field) in fields.iter().enumerate() {
            let member = index as u32;
            self.builder.member_name(id, member, field.name.clone());
            GlobalBuilder::write_member_layout(&mut self.builder, id, member, &field.layout);
            if field.layout.builtin.is_none() {
                self.builder.member_decorate(
                    id,
                    member,
                    Decoration::Offset,
                    vec![Operand::LiteralBit32(offsets[index])],
                );
            }
            if let Type::Matrix { .. } = field.ty {
                self.builder
                    .member_decorate(id, member, Decoration::ColMajor, vec![]);
                self.builder.member_decorate(
                    id,
                    member,
                    Decoration::MatrixStride,
                    vec![Operand::LiteralBit32(field.ty.stride())],
                );
            }
        }
        Ok(id)
    }

    fn ptr_of(&mut self, sc: StorageClass, ty: Word) -> Word {
        let key = PtrKey { sc, ty };
        *self
            .ptr_cache
            .entry(key)
            .or_insert_with(|| self.builder.type_pointer(None, sc, ty))
    }

    fn int_constant(&mut self, value: i64) -> Word {
        self.builder.constant_bit32(self.int_type, value as u32)
    }

    fn bool_constant(&mut self, value: bool) -> Word {
        if value {
            self.builder.constant_true(self.bool_type)
        } else {
            self.builder.constant_false(self.bool_type)
        }
    }

    fn literal_one(&mut self, ty: &Type) -> Result<Value> {
        match ty {
            Type::Int => Ok(Value {
                id: self.int_constant(1),
                type_id: self.int_type,
            }),
            Type::Float => Ok(Value {
                id: self.builder.constant_bit32(self.float_type, 1f32.to_bits()),
                type_id: self.float_type,
            }),
            _ => Err(CodegenError::SpirvError(format!(
                "no unit literal for type {:?}",
                ty
            ))),
        }
    }

    /// Broadcast a scalar across the components of a vector type.
    fn broadcast_scalar(&mut self, vector_type: Word, columns: u32, scalar: Word) -> Result<Word> {
        Ok(self.builder.composite_construct(
            vector_type,
            None,
            vec![scalar; columns as usize],
        )?)
    }

    // ---------------------------------------------------------------------
    // Block bookkeeping
    // ---------------------------------------------------------------------

    fn begin_labeled_block(&mut self, label: Word) -> Result<()> {
        self.builder.begin_block(Some(label))?;
        self.current_block = Some(label);
        Ok(())
    }

    fn branch_to(&mut self, target: Word) -> Result<()> {
        self.builder.branch(target)?;
        self.current_block = None;
        Ok(())
    }

    fn require_block(&self) -> Result<Word> {
        self.current_block
            .ok_or_else(|| CodegenError::SpirvError("no current block".to_string()))
    }
}

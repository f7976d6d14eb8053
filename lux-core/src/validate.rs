//! Structural checks over an assembled module.
//!
//! The binary is parsed back into a `rspirv` data representation and walked
//! for the invariants the emitter promises: unique result IDs, defined
//! operands, merge instructions ahead of conditional branches, exactly one
//! terminator per block, function-scope variables at the head of the entry
//! block, and access chains whose pointer type agrees with their base.

use std::collections::{HashMap, HashSet};

use rspirv::binary::parse_bytes;
use rspirv::dr::{Instruction, Loader, Module, Operand};
use rspirv::spirv::{Op, StorageClass, Word};

use crate::error::{CodegenError, Result};

pub fn validate_words(words: &[u32]) -> Result<()> {
    let module = parse_module(words)?;
    let instructions = all_instructions(&module);
    check_unique_result_ids(&instructions)?;
    check_operands_are_defined(&instructions)?;
    check_block_structure(&module)?;
    check_variables_lead_entry_blocks(&module)?;
    check_access_chain_storage_classes(&instructions)?;
    Ok(())
}

fn parse_module(words: &[u32]) -> Result<Module> {
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    let mut loader = Loader::new();
    parse_bytes(&bytes, &mut loader)
        .map_err(|e| CodegenError::Validation(format!("failed to parse module: {:?}", e)))?;
    Ok(loader.module())
}

fn all_instructions(module: &Module) -> Vec<&Instruction> {
    let mut instructions = Vec::new();
    instructions.extend(module.capabilities.iter());
    instructions.extend(module.extensions.iter());
    instructions.extend(module.ext_inst_imports.iter());
    instructions.extend(module.memory_model.iter());
    instructions.extend(module.entry_points.iter());
    instructions.extend(module.execution_modes.iter());
    instructions.extend(module.debug_string_source.iter());
    instructions.extend(module.debug_names.iter());
    instructions.extend(module.debug_module_processed.iter());
    instructions.extend(module.annotations.iter());
    instructions.extend(module.types_global_values.iter());
    for function in &module.functions {
        instructions.extend(function.def.iter());
        instructions.extend(function.parameters.iter());
        for block in &function.blocks {
            instructions.extend(block.label.iter());
            instructions.extend(block.instructions.iter());
        }
        instructions.extend(function.end.iter());
    }
    instructions
}

fn is_terminator(op: Op) -> bool {
    matches!(
        op,
        Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable
    )
}

fn check_unique_result_ids(instructions: &[&Instruction]) -> Result<()> {
    let mut seen = HashSet::new();
    for inst in instructions {
        if let Some(id) = inst.result_id {
            if !seen.insert(id) {
                return Err(CodegenError::Validation(format!(
                    "result ID %{} is defined more than once",
                    id
                )));
            }
        }
    }
    Ok(())
}

fn check_operands_are_defined(instructions: &[&Instruction]) -> Result<()> {
    let defined: HashSet<Word> = instructions.iter().filter_map(|i| i.result_id).collect();
    for inst in instructions {
        if let Some(ty) = inst.result_type {
            if !defined.contains(&ty) {
                return Err(CodegenError::Validation(format!(
                    "{:?} references undefined type %{}",
                    inst.class.opcode, ty
                )));
            }
        }
        for operand in &inst.operands {
            if let Operand::IdRef(id) = operand {
                if !defined.contains(id) {
                    return Err(CodegenError::Validation(format!(
                        "{:?} references undefined ID %{}",
                        inst.class.opcode, id
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Every block carries exactly one terminator, as its last instruction, and
/// every conditional branch is announced by a merge instruction: either
/// immediately before it, or in the loop header that branches to the block
/// holding the loop's condition.
fn check_block_structure(module: &Module) -> Result<()> {
    for function in &module.functions {
        // Condition blocks of loops: targets of the branch that follows an
        // OpLoopMerge.
        let mut loop_condition_blocks = HashSet::new();
        for block in &function.blocks {
            let has_loop_merge = block
                .instructions
                .iter()
                .any(|i| i.class.opcode == Op::LoopMerge);
            if !has_loop_merge {
                continue;
            }
            if let Some(last) = block.instructions.last() {
                if last.class.opcode == Op::Branch {
                    if let Some(Operand::IdRef(target)) = last.operands.first() {
                        loop_condition_blocks.insert(*target);
                    }
                }
            }
        }

        for block in &function.blocks {
            let Some(last) = block.instructions.last() else {
                return Err(CodegenError::Validation("empty block".to_string()));
            };
            if !is_terminator(last.class.opcode) {
                return Err(CodegenError::Validation(format!(
                    "block does not end with a terminator, found {:?}",
                    last.class.opcode
                )));
            }
            for inst in &block.instructions[..block.instructions.len() - 1] {
                if is_terminator(inst.class.opcode) {
                    return Err(CodegenError::Validation(format!(
                        "instruction after terminator {:?}",
                        inst.class.opcode
                    )));
                }
            }
            let label = block.label.as_ref().and_then(|l| l.result_id);
            for (index, inst) in block.instructions.iter().enumerate() {
                if matches!(inst.class.opcode, Op::BranchConditional | Op::Switch) {
                    let merged = index > 0
                        && matches!(
                            block.instructions[index - 1].class.opcode,
                            Op::SelectionMerge | Op::LoopMerge
                        );
                    let in_loop_condition =
                        label.is_some_and(|l| loop_condition_blocks.contains(&l));
                    if !merged && !in_loop_condition {
                        return Err(CodegenError::Validation(format!(
                            "{:?} without a governing merge instruction",
                            inst.class.opcode
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Function-storage variables may only appear at the head of the entry block.
fn check_variables_lead_entry_blocks(module: &Module) -> Result<()> {
    for function in &module.functions {
        for (block_index, block) in function.blocks.iter().enumerate() {
            let mut in_prologue = block_index == 0;
            for inst in &block.instructions {
                if inst.class.opcode == Op::Variable {
                    if !in_prologue {
                        return Err(CodegenError::Validation(
                            "OpVariable outside the entry block prologue".to_string(),
                        ));
                    }
                } else {
                    in_prologue = false;
                }
            }
        }
    }
    Ok(())
}

/// An access chain's pointer type must carry the storage class of the
/// pointer it digs into.
fn check_access_chain_storage_classes(instructions: &[&Instruction]) -> Result<()> {
    let by_id: HashMap<Word, &Instruction> = instructions
        .iter()
        .filter_map(|inst| inst.result_id.map(|id| (id, *inst)))
        .collect();

    let storage_class_of = |pointer_type: Word| -> Option<StorageClass> {
        let inst = by_id.get(&pointer_type)?;
        if inst.class.opcode != Op::TypePointer {
            return None;
        }
        match inst.operands.first() {
            Some(Operand::StorageClass(sc)) => Some(*sc),
            _ => None,
        }
    };

    for inst in instructions {
        if !matches!(inst.class.opcode, Op::AccessChain | Op::InBoundsAccessChain) {
            continue;
        }
        let result_class = inst
            .result_type
            .and_then(storage_class_of)
            .ok_or_else(|| {
                CodegenError::Validation("access chain result is not a pointer".to_string())
            })?;
        let base_class = match inst.operands.first() {
            Some(Operand::IdRef(base)) => by_id
                .get(base)
                .and_then(|def| def.result_type)
                .and_then(storage_class_of),
            _ => None,
        }
        .ok_or_else(|| {
            CodegenError::Validation("access chain base is not a pointer".to_string())
        })?;
        if result_class != base_class {
            return Err(CodegenError::Validation(format!(
                "access chain changes storage class from {:?} to {:?}",
                base_class, result_class
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rspirv::binary::Assemble;
    use rspirv::dr::Builder;
    use rspirv::spirv::{
        AddressingModel, Capability, FunctionControl, MemoryModel, SelectionControl,
    };

    fn minimal_module() -> Builder {
        let mut builder = Builder::new();
        builder.set_version(1, 0);
        builder.capability(Capability::Shader);
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        builder
    }

    #[test]
    fn test_accepts_well_formed_module() {
        let mut builder = minimal_module();
        let void = builder.type_void();
        let fn_ty = builder.type_function(void, vec![]);
        builder
            .begin_function(void, None, FunctionControl::NONE, fn_ty)
            .unwrap();
        builder.begin_block(None).unwrap();
        builder.ret().unwrap();
        builder.end_function().unwrap();
        let words = builder.module().assemble();
        validate_words(&words).unwrap();
    }

    #[test]
    fn test_rejects_unmerged_conditional_branch() {
        let mut builder = minimal_module();
        let void = builder.type_void();
        let bool_ty = builder.type_bool();
        let cond = builder.constant_true(bool_ty);
        let fn_ty = builder.type_function(void, vec![]);
        builder
            .begin_function(void, None, FunctionControl::NONE, fn_ty)
            .unwrap();
        builder.begin_block(None).unwrap();
        let then_label = builder.id();
        let merge_label = builder.id();
        builder
            .branch_conditional(cond, then_label, merge_label, vec![])
            .unwrap();
        builder.begin_block(Some(then_label)).unwrap();
        builder.branch(merge_label).unwrap();
        builder.begin_block(Some(merge_label)).unwrap();
        builder.ret().unwrap();
        builder.end_function().unwrap();
        let words = builder.module().assemble();
        assert!(validate_words(&words).is_err());
    }

    #[test]
    fn test_accepts_conditional_branch_with_merge() {
        let mut builder = minimal_module();
        let void = builder.type_void();
        let bool_ty = builder.type_bool();
        let cond = builder.constant_true(bool_ty);
        let fn_ty = builder.type_function(void, vec![]);
        builder
            .begin_function(void, None, FunctionControl::NONE, fn_ty)
            .unwrap();
        builder.begin_block(None).unwrap();
        let then_label = builder.id();
        let merge_label = builder.id();
        builder
            .selection_merge(merge_label, SelectionControl::NONE)
            .unwrap();
        builder
            .branch_conditional(cond, then_label, merge_label, vec![])
            .unwrap();
        builder.begin_block(Some(then_label)).unwrap();
        builder.branch(merge_label).unwrap();
        builder.begin_block(Some(merge_label)).unwrap();
        builder.ret().unwrap();
        builder.end_function().unwrap();
        let words = builder.module().assemble();
        validate_words(&words).unwrap();
    }
}

//! L-values: addressable storage locations.
//!
//! Most l-values resolve to a single typed pointer (a variable or an access
//! chain into a composite). Multi-component swizzles have no pointer of their
//! own; reads and writes go through the base vector with `OpVectorShuffle`.

use rspirv::spirv::{StorageClass, Word};

use crate::error::{CodegenError, Result};
use crate::ir::Expression;

use super::{CodeGenerator, Value};

#[derive(Debug)]
pub enum LValue {
    Pointer {
        pointer: Word,
        type_id: Word,
    },
    Swizzle {
        vec_pointer: Word,
        components: Vec<u32>,
        base_type_id: Word,
        swizzle_type_id: Word,
        base_columns: u32,
    },
}

impl LValue {
    /// The pointer behind this l-value, if a single one exists.
    pub fn pointer(&self) -> Option<Word> {
        match self {
            LValue::Pointer { pointer, .. } => Some(*pointer),
            LValue::Swizzle { .. } => None,
        }
    }
}

/// Shuffle mask for writing through a swizzle. The virtual vector is the
/// concatenation `(base, value)`; component `i` of the result selects the
/// written lane `j + base_columns` when `i` appears at position `j` of the
/// swizzle mask, and the preserved lane `i` otherwise. For `v.xz = u.xy`
/// over a vec3 this yields `(3, 1, 4)`.
pub(super) fn swizzle_store_mask(base_columns: u32, components: &[u32]) -> Vec<u32> {
    let mut mask = Vec::with_capacity(base_columns as usize);
    for i in 0..base_columns {
        let mut offset = i;
        for (j, &component) in components.iter().enumerate() {
            if component == i {
                offset = j as u32 + base_columns;
                break;
            }
        }
        mask.push(offset);
    }
    mask
}

impl<'p> CodeGenerator<'p> {
    pub(super) fn get_lvalue(&mut self, expr: &Expression) -> Result<LValue> {
        match expr {
            Expression::VariableRef { var } => {
                let binding = self
                    .env
                    .lookup(var.id)
                    .ok_or_else(|| CodegenError::UndefinedVariable(var.name.clone()))?;
                Ok(LValue::Pointer {
                    pointer: binding.pointer,
                    type_id: binding.type_id,
                })
            }
            Expression::Index { ty, .. } | Expression::FieldAccess { ty, .. } => {
                let storage_class = self.root_storage_class(expr);
                let chain = self.get_access_chain(expr)?;
                let type_id = self.get_type(ty)?;
                let pointer_type = self.ptr_of(storage_class, type_id);
                let pointer =
                    self.builder
                        .access_chain(pointer_type, None, chain[0], chain[1..].to_vec())?;
                Ok(LValue::Pointer { pointer, type_id })
            }
            Expression::Swizzle {
                base,
                components,
                ty,
            } => {
                let base_lv = self.get_lvalue(base)?;
                let base_pointer = base_lv.pointer().ok_or_else(|| {
                    CodegenError::SpirvError("swizzle base has no addressable pointer".to_string())
                })?;
                if components.len() == 1 {
                    // A single component is an ordinary access chain.
                    let storage_class = self.root_storage_class(base);
                    let type_id = self.get_type(ty)?;
                    let pointer_type = self.ptr_of(storage_class, type_id);
                    let index = self.int_constant(components[0] as i64);
                    let pointer =
                        self.builder
                            .access_chain(pointer_type, None, base_pointer, vec![index])?;
                    Ok(LValue::Pointer { pointer, type_id })
                } else {
                    Ok(LValue::Swizzle {
                        vec_pointer: base_pointer,
                        components: components.clone(),
                        base_type_id: self.get_type(base.ty())?,
                        swizzle_type_id: self.get_type(ty)?,
                        base_columns: base.ty().columns(),
                    })
                }
            }
            _ => {
                // Not actually an l-value; call-site marshalling still needs
                // a pointer, so park the value in a temp variable.
                let type_id = self.get_type(expr.ty())?;
                let pointer_type = self.ptr_of(StorageClass::Function, type_id);
                let pointer = self.allocate_function_variable(pointer_type);
                let value = self.generate_expression(expr)?;
                self.builder.store(pointer, value.id, None, vec![])?;
                Ok(LValue::Pointer { pointer, type_id })
            }
        }
    }

    /// Collect the root pointer and the index IDs of an access chain:
    /// lowered index expressions for `a[i]`, int literals for `s.field`.
    fn get_access_chain(&mut self, expr: &Expression) -> Result<Vec<Word>> {
        match expr {
            Expression::Index { base, index, .. } => {
                let mut chain = self.get_access_chain(base)?;
                let index = self.generate_expression(index)?;
                chain.push(index.id);
                Ok(chain)
            }
            Expression::FieldAccess {
                base, field_index, ..
            } => {
                let mut chain = self.get_access_chain(base)?;
                let index = self.int_constant(*field_index as i64);
                chain.push(index);
                Ok(chain)
            }
            _ => {
                let lv = self.get_lvalue(expr)?;
                let pointer = lv.pointer().ok_or_else(|| {
                    CodegenError::SpirvError(
                        "access chain root has no addressable pointer".to_string(),
                    )
                })?;
                Ok(vec![pointer])
            }
        }
    }

    /// Storage class of the variable at the root of an l-value expression.
    /// The access chain's pointer type must agree with it.
    fn root_storage_class(&self, expr: &Expression) -> StorageClass {
        match expr {
            Expression::VariableRef { var } => self
                .env
                .lookup(var.id)
                .map(|binding| binding.storage_class)
                .unwrap_or(StorageClass::Function),
            Expression::Index { base, .. }
            | Expression::FieldAccess { base, .. }
            | Expression::Swizzle { base, .. } => self.root_storage_class(base),
            _ => StorageClass::Function,
        }
    }

    pub(super) fn lvalue_load(&mut self, lv: &LValue) -> Result<Value> {
        match lv {
            LValue::Pointer { pointer, type_id } => {
                let id = self.builder.load(*type_id, None, *pointer, None, vec![])?;
                Ok(Value {
                    id,
                    type_id: *type_id,
                })
            }
            LValue::Swizzle {
                vec_pointer,
                components,
                base_type_id,
                swizzle_type_id,
                ..
            } => {
                let base = self
                    .builder
                    .load(*base_type_id, None, *vec_pointer, None, vec![])?;
                let id = self.builder.vector_shuffle(
                    *swizzle_type_id,
                    None,
                    base,
                    base,
                    components.clone(),
                )?;
                Ok(Value {
                    id,
                    type_id: *swizzle_type_id,
                })
            }
        }
    }

    pub(super) fn lvalue_store(&mut self, lv: &LValue, value: Word) -> Result<()> {
        match lv {
            LValue::Pointer { pointer, .. } => {
                self.builder.store(*pointer, value, None, vec![])?;
                Ok(())
            }
            LValue::Swizzle {
                vec_pointer,
                components,
                base_type_id,
                base_columns,
                ..
            } => {
                // Read-modify-write: shuffle the written lanes into a fresh
                // full-width vector, then store it back.
                let base = self
                    .builder
                    .load(*base_type_id, None, *vec_pointer, None, vec![])?;
                let mask = swizzle_store_mask(*base_columns, components);
                let shuffled =
                    self.builder
                        .vector_shuffle(*base_type_id, None, base, value, mask)?;
                self.builder.store(*vec_pointer, shuffled, None, vec![])?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::swizzle_store_mask;

    #[test]
    fn test_store_mask_selects_written_lanes() {
        // v.xz = u.xy over a vec3: result is (u.x, v.y, u.y).
        assert_eq!(swizzle_store_mask(3, &[0, 2]), vec![3, 1, 4]);
    }

    #[test]
    fn test_store_mask_full_overwrite() {
        assert_eq!(swizzle_store_mask(2, &[0, 1]), vec![2, 3]);
        // Reversed swizzle writes lanes crosswise.
        assert_eq!(swizzle_store_mask(2, &[1, 0]), vec![3, 2]);
    }

    #[test]
    fn test_store_mask_preserves_untouched_lanes() {
        assert_eq!(swizzle_store_mask(4, &[3]), vec![0, 1, 2, 4]);
    }
}

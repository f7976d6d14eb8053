//! Module-scope variable handling: storage class selection, layout
//! decorations, and the entry-point interface list.

use log::debug;
use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{Decoration, StorageClass, Word};

use crate::ir::{Layout, Modifiers, Type, TypeKind, Variable};

#[derive(Debug, Default)]
pub struct GlobalBuilder {
    /// Every global with an `in` or `out` modifier, in declaration order.
    /// These are listed on `OpEntryPoint`.
    interface_variables: Vec<Word>,
}

impl GlobalBuilder {
    pub fn new() -> Self {
        GlobalBuilder {
            interface_variables: Vec::new(),
        }
    }

    /// Storage class of a module-scope variable. Samplers land in
    /// UniformConstant; plain globals without qualifiers are Private.
    pub fn storage_class_for_global(modifiers: &Modifiers, ty: &Type) -> StorageClass {
        if modifiers.is_in() {
            StorageClass::Input
        } else if modifiers.is_out() {
            StorageClass::Output
        } else if modifiers.is_uniform() {
            if ty.kind() == TypeKind::Sampler {
                StorageClass::UniformConstant
            } else {
                StorageClass::Uniform
            }
        } else {
            StorageClass::Private
        }
    }

    /// Storage class of an interface block variable. Blocks default to
    /// Uniform when no direction qualifier is present.
    pub fn storage_class_for_block(modifiers: &Modifiers) -> StorageClass {
        if modifiers.is_in() {
            StorageClass::Input
        } else if modifiers.is_out() {
            StorageClass::Output
        } else {
            StorageClass::Uniform
        }
    }

    /// Emit the `OpVariable` for a global, name it, decorate its layout, and
    /// record it in the interface list when the entry point must declare it.
    pub fn create_global(
        &mut self,
        builder: &mut Builder,
        var: &Variable,
        pointer_type: Word,
        storage_class: StorageClass,
        initializer: Option<Word>,
    ) -> Word {
        let id = builder.variable(pointer_type, None, storage_class, initializer);
        builder.name(id, var.name.clone());
        Self::write_layout(builder, id, &var.modifiers.layout);
        if var.modifiers.is_in() || var.modifiers.is_out() {
            self.interface_variables.push(id);
        }
        debug!(
            "global '{}' -> %{} ({:?})",
            var.name, id, storage_class
        );
        id
    }

    pub fn write_layout(builder: &mut Builder, target: Word, layout: &Layout) {
        if let Some(location) = layout.location {
            builder.decorate(
                target,
                Decoration::Location,
                vec![Operand::LiteralBit32(location)],
            );
        }
        if let Some(binding) = layout.binding {
            builder.decorate(
                target,
                Decoration::Binding,
                vec![Operand::LiteralBit32(binding)],
            );
        }
        if let Some(index) = layout.index {
            builder.decorate(target, Decoration::Index, vec![Operand::LiteralBit32(index)]);
        }
        if let Some(set) = layout.descriptor_set {
            builder.decorate(
                target,
                Decoration::DescriptorSet,
                vec![Operand::LiteralBit32(set)],
            );
        }
        if let Some(builtin) = layout.builtin {
            builder.decorate(target, Decoration::BuiltIn, vec![Operand::BuiltIn(builtin)]);
        }
    }

    pub fn write_member_layout(builder: &mut Builder, target: Word, member: u32, layout: &Layout) {
        if let Some(location) = layout.location {
            builder.member_decorate(
                target,
                member,
                Decoration::Location,
                vec![Operand::LiteralBit32(location)],
            );
        }
        if let Some(binding) = layout.binding {
            builder.member_decorate(
                target,
                member,
                Decoration::Binding,
                vec![Operand::LiteralBit32(binding)],
            );
        }
        if let Some(index) = layout.index {
            builder.member_decorate(
                target,
                member,
                Decoration::Index,
                vec![Operand::LiteralBit32(index)],
            );
        }
        if let Some(set) = layout.descriptor_set {
            builder.member_decorate(
                target,
                member,
                Decoration::DescriptorSet,
                vec![Operand::LiteralBit32(set)],
            );
        }
        if let Some(builtin) = layout.builtin {
            builder.member_decorate(
                target,
                member,
                Decoration::BuiltIn,
                vec![Operand::BuiltIn(builtin)],
            );
        }
    }

    pub fn interface_variables(&self) -> &[Word] {
        &self.interface_variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{types, ModifierFlags};
    use rspirv::spirv::Dim;

    fn modifiers(flags: ModifierFlags) -> Modifiers {
        Modifiers {
            flags,
            layout: Layout::default(),
        }
    }

    #[test]
    fn test_global_storage_classes() {
        assert_eq!(
            GlobalBuilder::storage_class_for_global(&modifiers(ModifierFlags::IN), &types::vec(4)),
            StorageClass::Input
        );
        assert_eq!(
            GlobalBuilder::storage_class_for_global(&modifiers(ModifierFlags::OUT), &types::vec(4)),
            StorageClass::Output
        );
        assert_eq!(
            GlobalBuilder::storage_class_for_global(
                &modifiers(ModifierFlags::UNIFORM),
                &types::mat(4, 4)
            ),
            StorageClass::Uniform
        );
        assert_eq!(
            GlobalBuilder::storage_class_for_global(&modifiers(ModifierFlags::empty()), &types::float()),
            StorageClass::Private
        );
    }

    #[test]
    fn test_sampler_is_uniform_constant() {
        let sampler = Type::Sampler {
            dimensions: Dim::Dim2D,
            is_depth: false,
            is_arrayed: false,
            is_multisampled: false,
            is_sampled: true,
        };
        assert_eq!(
            GlobalBuilder::storage_class_for_global(&modifiers(ModifierFlags::UNIFORM), &sampler),
            StorageClass::UniformConstant
        );
    }

    #[test]
    fn test_block_defaults_to_uniform() {
        assert_eq!(
            GlobalBuilder::storage_class_for_block(&modifiers(ModifierFlags::empty())),
            StorageClass::Uniform
        );
        assert_eq!(
            GlobalBuilder::storage_class_for_block(&modifiers(ModifierFlags::OUT)),
            StorageClass::Output
        );
    }
}

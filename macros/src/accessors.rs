use crate::field_parser::FieldDef;
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

pub fn getter_def(field: &FieldDef) -> TokenStream {
    let name = &field.name;
    let key = name.to_string();
    let tpe = &field.tpe;
    quote! {
        pub fn #name(&self) -> Result<#tpe, ::protobit::AppError> {
            <#tpe as ::protobit::FromValue>::from_value(self.entity.get(#key)?)
        }
    }
}

pub fn setter_def(field: &FieldDef) -> TokenStream {
    let fn_name = format_ident!("set_{}", field.name);
    let key = field.name.to_string();
    let tpe = &field.tpe;
    quote! {
        pub fn #fn_name(&mut self, value: #tpe) -> Result<(), ::protobit::AppError> {
            self.entity.set(#key, ::protobit::Value::from(value))
        }
    }
}

pub fn deleter_def(field: &FieldDef) -> TokenStream {
    let fn_name = format_ident!("delete_{}", field.name);
    let key = field.name.to_string();
    quote! {
        pub fn #fn_name(&mut self) -> Result<(), ::protobit::AppError> {
            self.entity.delete(#key)
        }
    }
}

pub fn constructor_defs(struct_ident: &Ident) -> TokenStream {
    quote! {
        pub fn construct<K: Into<String>>(
            values: impl IntoIterator<Item = (K, ::protobit::Value)>,
        ) -> Result<Self, ::protobit::AppError> {
            let class = <Self as ::protobit::Persistable>::class()?;
            Ok(#struct_ident { entity: ::protobit::Entity::construct(&class, values)? })
        }

        pub fn proto() -> Result<Self, ::protobit::AppError> {
            let class = <Self as ::protobit::Persistable>::class()?;
            Ok(#struct_ident { entity: ::protobit::Entity::proto(&class) })
        }
    }
}

pub fn persistable_impl(struct_ident: &Ident) -> TokenStream {
    quote! {
        impl ::protobit::Persistable for #struct_ident {
            fn class() -> Result<::protobit::Arc<::protobit::Class>, ::protobit::AppError> {
                static CLASS: ::protobit::once_cell::sync::OnceCell<::protobit::Arc<::protobit::Class>> =
                    ::protobit::once_cell::sync::OnceCell::new();
                CLASS.get_or_try_init(#struct_ident::declare).cloned()
            }

            fn from_entity(entity: ::protobit::Entity) -> Result<Self, ::protobit::AppError> {
                if entity.class().name() != stringify!(#struct_ident) {
                    return Err(::protobit::AppError::InvalidArgument(format!(
                        "{} entity cannot become a {}",
                        entity.class().name(),
                        stringify!(#struct_ident)
                    )));
                }
                Ok(#struct_ident { entity })
            }

            fn entity(&self) -> &::protobit::Entity {
                &self.entity
            }

            fn entity_mut(&mut self) -> &mut ::protobit::Entity {
                &mut self.entity
            }

            fn into_entity(self) -> ::protobit::Entity {
                self.entity
            }
        }
    }
}

extern crate proc_macro;
mod accessors;
mod declare;
mod field_parser;
mod macro_utils;

use crate::field_parser::ClassArgs;
use proc_macro::TokenStream;
use proc_macro_error::proc_macro_error;
use quote::quote;
use syn::{parse_macro_input, parse_quote, ItemStruct};

/// Turns a struct of annotated attributes into a persistable class.
///
/// ```ignore
/// #[prototype(cache_ttl = 60)]
/// pub struct Widget {
///     #[assert(min = 0, max = 100, default = 0)]
///     pub count: i64,
///     pub tags: Vec<String>,
/// }
/// ```
///
/// The struct is replaced by a wrapper around `protobit::Entity` with `count()`, `set_count()` and
/// `delete_count()` accessors, a lazily declared class and a `Persistable` implementation. The class
/// is registered so that `Store::create_registered_tables` creates its tables.
#[proc_macro_attribute]
#[proc_macro_error]
pub fn prototype(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = ClassArgs::default();
    let arg_parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with arg_parser);
    let input = parse_macro_input!(item as ItemStruct);
    let struct_ident = &input.ident;
    let vis = &input.vis;

    let fields = match field_parser::get_field_defs(&input) {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };
    let declare = match declare::declare_def(struct_ident, &args, &fields) {
        Ok(declare) => declare,
        Err(e) => return e.to_compile_error().into(),
    };
    let getters = fields.iter().map(accessors::getter_def);
    let setters = fields.iter().map(accessors::setter_def);
    let deleters = fields.iter().map(accessors::deleter_def);
    let constructors = accessors::constructor_defs(struct_ident);
    let persistable = accessors::persistable_impl(struct_ident);

    let mut attrs = input.attrs.clone();
    attrs.retain(|a| !a.path().is_ident("derive"));
    attrs.insert(0, parse_quote! { #[derive(Clone, Debug, PartialEq)] });

    let stream = quote! {
        #(#attrs)*
        #vis struct #struct_ident {
            entity: ::protobit::Entity,
        }

        impl #struct_ident {
            #declare
            #constructors
            #(#getters)*
            #(#setters)*
            #(#deleters)*
        }

        #persistable

        ::protobit::inventory::submit! {
            ::protobit::ClassInfo {
                name: stringify!(#struct_ident),
                declare: <#struct_ident as ::protobit::Persistable>::class,
            }
        }
    };

    macro_utils::submit_struct_to_stream(stream, "prototype", struct_ident, ".rs")
}

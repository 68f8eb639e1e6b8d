use crate::field_parser::{AssertRule, ClassArgs, FieldDef};
use proc_macro2::{Ident, TokenStream};
use quote::quote;

fn kind_tokens(kind: &syn::LitStr) -> syn::Result<TokenStream> {
    let variant = match kind.value().as_str() {
        "str" | "string" => quote!(Str),
        "text" => quote!(Text),
        "int" | "integer" => quote!(Int),
        "float" => quote!(Float),
        "bool" | "boolean" => quote!(Bool),
        "datetime" => quote!(DateTime),
        "id" | "guid" => quote!(Id),
        "any" => quote!(Any),
        other => return Err(syn::Error::new(kind.span(), format!("`{other}` is not a scalar kind"))),
    };
    Ok(quote!(::protobit::Kind::#variant))
}

fn rule_call(rule: &AssertRule) -> syn::Result<TokenStream> {
    Ok(match rule {
        AssertRule::Kind(kind) => {
            let kind = kind_tokens(kind)?;
            quote!(.kind(#kind))
        }
        AssertRule::Optional => quote!(.optional()),
        AssertRule::Default(expr) => quote!(.default(#expr)),
        AssertRule::Allowed(syn::Expr::Array(array)) => {
            let elems = array.elems.iter();
            quote!(.allowed(vec![#(::protobit::Value::from(#elems)),*]))
        }
        AssertRule::Allowed(expr) => quote!(.allowed(#expr)),
        AssertRule::AllowedFn(expr) => quote!(.allowed_fn(#expr)),
        AssertRule::Min(expr) => quote!(.min((#expr) as f64)),
        AssertRule::Max(expr) => quote!(.max((#expr) as f64)),
        AssertRule::Size(expr) => quote!(.size((#expr) as i64)),
        AssertRule::MinSize(expr) => quote!(.min_size((#expr) as i64)),
        AssertRule::MaxSize(expr) => quote!(.max_size((#expr) as i64)),
        AssertRule::Regex(pattern) => quote!(.regex(#pattern)),
        AssertRule::Unique => quote!(.unique()),
        AssertRule::UniqueWith(syn::Expr::Array(array)) => {
            let peers = array.elems.iter();
            quote!(.unique_with(&[#(#peers),*]))
        }
        AssertRule::UniqueWith(expr) => quote!(.unique_with(&[#expr])),
        AssertRule::Serial => quote!(.serial()),
        AssertRule::ColumnType(ty) => quote!(.column_type(#ty)),
        AssertRule::SqlValue(expr) => quote!(.sql_value(#expr)),
        AssertRule::SqlInsert(expr) => quote!(.sql_insert(#expr)),
        AssertRule::SqlUpdate(expr) => quote!(.sql_update(#expr)),
        AssertRule::OnDelete(option) => quote!(.on_delete(#option)),
        AssertRule::OnUpdate(option) => quote!(.on_update(#option)),
        AssertRule::Description(text) => quote!(.description(#text)),
    })
}

fn attribute_call(field: &FieldDef) -> syn::Result<TokenStream> {
    let name = field.name.to_string();
    let tpe = &field.tpe;
    let rules = field.rules.iter().map(rule_call).collect::<syn::Result<Vec<_>>>()?;
    Ok(quote! {
        .attribute(#name, <#tpe as ::protobit::Asserted>::assertion() #(#rules)*)
    })
}

fn class_calls(args: &ClassArgs) -> syn::Result<Vec<TokenStream>> {
    let mut calls = Vec::new();
    if let Some(table) = &args.table {
        calls.push(quote!(.table(#table)));
    }
    if let Some(database) = &args.database {
        calls.push(quote!(.database(#database)));
    }
    if let Some(primary_key) = &args.primary_key {
        calls.push(quote!(.primary_key(#primary_key)));
    }
    if let Some(engine) = &args.engine {
        let dialect = match engine.value().as_str() {
            "sqlite" => quote!(Sqlite),
            "mysql" => quote!(Mysql),
            other => return Err(syn::Error::new(engine.span(), format!("unknown engine `{other}`"))),
        };
        calls.push(quote!(.engine(::protobit::Dialect::#dialect)));
    }
    if let Some(ttl) = &args.cache_ttl {
        calls.push(quote!(.cache_ttl(::protobit::Duration::from_secs(#ttl))));
    }
    if let Some(relational) = &args.relational {
        calls.push(quote!(.relational(#relational)));
    }
    if args.flat_file {
        calls.push(quote!(.flat_file(true)));
    }
    if args.history {
        calls.push(quote!(.history(true)));
    }
    match &args.round_robin {
        Some(Some(capacity)) => calls.push(quote!(.round_robin(#capacity))),
        Some(None) => calls.push(quote!(.round_robin(::protobit::class::DEFAULT_ROUND_ROBIN_CAPACITY))),
        None => {}
    }
    if args.abstract_class {
        calls.push(quote!(.abstract_class()));
    }
    Ok(calls)
}

/// `declare()` building the class from the struct options and field assertions.
pub fn declare_def(struct_ident: &Ident, args: &ClassArgs, fields: &[FieldDef]) -> syn::Result<TokenStream> {
    let class_calls = class_calls(args)?;
    let attribute_calls = fields.iter().map(attribute_call).collect::<syn::Result<Vec<_>>>()?;
    Ok(quote! {
        pub fn declare() -> Result<::protobit::Arc<::protobit::Class>, ::protobit::AppError> {
            ::protobit::Class::builder(stringify!(#struct_ident))
                #(#class_calls)*
                #(#attribute_calls)*
                .build()
        }
    })
}

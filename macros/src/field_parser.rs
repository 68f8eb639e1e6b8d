use proc_macro2::Ident;
use syn::meta::ParseNestedMeta;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::token::Comma;
use syn::{Expr, Fields, ItemStruct, LitBool, LitInt, LitStr, Type};

/// Struct-level options of `#[prototype(...)]`.
#[derive(Default)]
pub struct ClassArgs {
    pub table: Option<LitStr>,
    pub database: Option<LitStr>,
    pub primary_key: Option<LitStr>,
    pub engine: Option<LitStr>,
    pub cache_ttl: Option<LitInt>,
    pub relational: Option<LitBool>,
    pub flat_file: bool,
    pub history: bool,
    pub round_robin: Option<Option<LitInt>>,
    pub abstract_class: bool,
}

impl ClassArgs {
    pub fn parse(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("table") {
            self.table = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("database") {
            self.database = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("primary_key") {
            self.primary_key = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("engine") {
            self.engine = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("cache_ttl") {
            self.cache_ttl = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("relational") {
            self.relational = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("flat_file") {
            self.flat_file = true;
        } else if meta.path.is_ident("history") {
            self.history = true;
        } else if meta.path.is_ident("round_robin") {
            self.round_robin = Some(if meta.input.peek(syn::Token![=]) { Some(meta.value()?.parse()?) } else { None });
        } else if meta.path.is_ident("abstract_class") {
            self.abstract_class = true;
        } else {
            return Err(meta.error(
                "expected one of table, database, primary_key, engine, cache_ttl, relational, flat_file, history, round_robin, abstract_class",
            ));
        }
        Ok(())
    }
}

/// One rule inside `#[assert(...)]`.
pub enum AssertRule {
    Kind(LitStr),
    Optional,
    Default(Expr),
    Allowed(Expr),
    AllowedFn(Expr),
    Min(Expr),
    Max(Expr),
    Size(Expr),
    MinSize(Expr),
    MaxSize(Expr),
    Regex(LitStr),
    Unique,
    UniqueWith(Expr),
    Serial,
    ColumnType(LitStr),
    SqlValue(LitStr),
    SqlInsert(LitStr),
    SqlUpdate(LitStr),
    OnDelete(LitStr),
    OnUpdate(LitStr),
    Description(LitStr),
}

pub struct FieldDef {
    pub name: Ident,
    pub tpe: Type,
    pub rules: Vec<AssertRule>,
}

fn parse_rule(meta: &ParseNestedMeta) -> syn::Result<AssertRule> {
    let path = &meta.path;
    if path.is_ident("optional") {
        return Ok(AssertRule::Optional);
    } else if path.is_ident("unique") {
        return Ok(AssertRule::Unique);
    } else if path.is_ident("serial") {
        return Ok(AssertRule::Serial);
    }
    let value = meta.value()?;
    let rule = if path.is_ident("kind") {
        AssertRule::Kind(value.parse()?)
    } else if path.is_ident("default") {
        AssertRule::Default(value.parse()?)
    } else if path.is_ident("allowed") {
        AssertRule::Allowed(value.parse()?)
    } else if path.is_ident("allowed_fn") {
        AssertRule::AllowedFn(value.parse()?)
    } else if path.is_ident("min") {
        AssertRule::Min(value.parse()?)
    } else if path.is_ident("max") {
        AssertRule::Max(value.parse()?)
    } else if path.is_ident("size") {
        AssertRule::Size(value.parse()?)
    } else if path.is_ident("min_size") {
        AssertRule::MinSize(value.parse()?)
    } else if path.is_ident("max_size") {
        AssertRule::MaxSize(value.parse()?)
    } else if path.is_ident("regex") {
        AssertRule::Regex(value.parse()?)
    } else if path.is_ident("unique_with") {
        AssertRule::UniqueWith(value.parse()?)
    } else if path.is_ident("column_type") {
        AssertRule::ColumnType(value.parse()?)
    } else if path.is_ident("sql_value") {
        AssertRule::SqlValue(value.parse()?)
    } else if path.is_ident("sql_insert") {
        AssertRule::SqlInsert(value.parse()?)
    } else if path.is_ident("sql_update") {
        AssertRule::SqlUpdate(value.parse()?)
    } else if path.is_ident("on_delete") {
        AssertRule::OnDelete(value.parse()?)
    } else if path.is_ident("on_update") {
        AssertRule::OnUpdate(value.parse()?)
    } else if path.is_ident("description") {
        AssertRule::Description(value.parse()?)
    } else {
        return Err(meta.error("unknown assertion rule"));
    };
    Ok(rule)
}

pub fn get_named_fields(ast: &ItemStruct) -> Result<Punctuated<syn::Field, Comma>, syn::Error> {
    match &ast.fields {
        Fields::Named(named) => Ok(named.named.clone()),
        _ => Err(syn::Error::new(ast.span(), "`#[prototype]` only supports structs with named fields.")),
    }
}

fn parse_field(field: &syn::Field) -> Result<FieldDef, syn::Error> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new(field.span(), "Unnamed fields not supported"))?;
    let mut rules = Vec::new();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("assert")) {
        attr.parse_nested_meta(|meta| {
            rules.push(parse_rule(&meta)?);
            Ok(())
        })?;
    }
    Ok(FieldDef { name, tpe: field.ty.clone(), rules })
}

pub fn get_field_defs(ast: &ItemStruct) -> Result<Vec<FieldDef>, syn::Error> {
    let fields = get_named_fields(ast)?;
    let defs = fields.iter().map(parse_field).collect::<Result<Vec<_>, _>>()?;
    for (i, def) in defs.iter().enumerate() {
        if defs[..i].iter().any(|d| d.name == def.name) {
            return Err(syn::Error::new(def.name.span(), "Duplicate attribute"));
        }
    }
    Ok(defs)
}

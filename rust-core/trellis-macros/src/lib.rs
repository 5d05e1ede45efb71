//! # Trellis Macros
//!
//! Procedural macros for the Trellis framework.
//!
//! `#[derive(Injectable)]` generates the constructor the service container
//! uses to autowire a struct, replacing runtime constructor inspection with
//! code generated at compile time.
//!
//! ## Field rules
//!
//! - `Arc<T>`: resolved recursively (binding first, then autowiring)
//! - `#[inject(bound)] Arc<T>`: resolved from an explicit binding only,
//!   which is how `Arc<dyn Trait>` dependencies are declared
//! - `#[inject(default)]`: filled with `Default::default()`
//! - anything else: resolution fails with `UnresolvableDependency`
//!
//! A struct-level `#[inject(singleton)]` caches the autowired instance.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{
    parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, GenericArgument,
    PathArguments, Type,
};

/// Derive `trellis_core::container::Injectable`
///
/// # Usage
///
/// ```ignore
/// #[derive(Injectable)]
/// #[inject(singleton)]
/// struct UserService {
///     db: Arc<Database>,
///     #[inject(bound)]
///     mailer: Arc<dyn Mailer>,
///     #[inject(default)]
///     retries: u32,
/// }
/// ```
#[proc_macro_derive(Injectable, attributes(inject))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct InjectOptions {
    singleton: bool,
    bound: bool,
    default: bool,
}

fn parse_options(attrs: &[Attribute]) -> syn::Result<InjectOptions> {
    let mut options = InjectOptions::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("inject")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("singleton") {
                options.singleton = true;
            } else if meta.path.is_ident("bound") {
                options.bound = true;
            } else if meta.path.is_ident("default") {
                options.default = true;
            } else {
                return Err(meta.error("expected `singleton`, `bound` or `default`"));
            }
            Ok(())
        })?;
    }
    Ok(options)
}

/// Inner type of `Arc<T>`, if the field is one
fn arc_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Arc" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}

enum FieldPlan {
    Resolve(TokenStream2),
    Unresolvable { name: String, ty: String },
}

fn plan_field(name: &str, ty: &Type, attrs: &[Attribute]) -> syn::Result<FieldPlan> {
    let options = parse_options(attrs)?;
    if options.singleton {
        return Err(syn::Error::new(
            ty.span(),
            "`singleton` applies to the struct, not to a field",
        ));
    }
    if options.default {
        return Ok(FieldPlan::Resolve(
            quote! { ::core::default::Default::default() },
        ));
    }
    match arc_inner(ty) {
        Some(inner) if options.bound => Ok(FieldPlan::Resolve(quote! { resolver.get::<#inner>()? })),
        Some(inner) => Ok(FieldPlan::Resolve(quote! { resolver.resolve::<#inner>()? })),
        None if options.bound => Err(syn::Error::new(
            ty.span(),
            "`bound` fields must be declared as `Arc<T>`",
        )),
        None => Ok(FieldPlan::Unresolvable {
            name: name.to_string(),
            ty: ty.to_token_stream().to_string(),
        }),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "Injectable cannot be derived for generic types",
        ));
    }
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            input.span(),
            "Injectable can only be derived for structs",
        ));
    };

    let ident = &input.ident;
    let lifetime = if parse_options(&input.attrs)?.singleton {
        quote! { ::trellis_core::container::Lifetime::Singleton }
    } else {
        quote! { ::trellis_core::container::Lifetime::Transient }
    };

    let mut plans = Vec::new();
    for (index, field) in data.fields.iter().enumerate() {
        let name = field
            .ident
            .as_ref()
            .map_or_else(|| index.to_string(), ToString::to_string);
        plans.push(plan_field(&name, &field.ty, &field.attrs)?);
    }

    let body = if let Some(FieldPlan::Unresolvable { name, ty }) = plans
        .iter()
        .find(|p| matches!(p, FieldPlan::Unresolvable { .. }))
    {
        let reason = format!("`{ty}` is not an injectable service");
        quote! {
            ::core::result::Result::Err(resolver.unresolvable::<Self>(#name, #reason))
        }
    } else {
        let values = plans.iter().filter_map(|p| match p {
            FieldPlan::Resolve(tokens) => Some(tokens),
            FieldPlan::Unresolvable { .. } => None,
        });
        let construct = match &data.fields {
            Fields::Named(named) => {
                let names = named.named.iter().map(|f| &f.ident);
                quote! { Self { #(#names: #values),* } }
            }
            Fields::Unnamed(_) => quote! { Self ( #(#values),* ) },
            Fields::Unit => quote! { Self },
        };
        quote! { ::core::result::Result::Ok(#construct) }
    };

    Ok(quote! {
        impl ::trellis_core::container::Injectable for #ident {
            const LIFETIME: ::trellis_core::container::Lifetime = #lifetime;

            #[allow(unused_variables)]
            fn construct(
                resolver: &mut ::trellis_core::container::Resolver<'_>,
            ) -> ::trellis_core::Result<Self> {
                #body
            }
        }
    })
}

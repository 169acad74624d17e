//! jobpool Macros
//!
//! `#[job]` registers a function in the job registry so any worker process
//! running the same binary can look it up by id.
//!
//! ```ignore
//! #[jobpool::job]
//! fn square(args: &JobArgs) -> anyhow::Result<i64> {
//!     let x = args.int(0)?;
//!     Ok(x * x)
//! }
//!
//! #[jobpool::job(id = "sort.insertion")]
//! fn insertion_sort(args: &JobArgs) -> anyhow::Result<Vec<i64>> { ... }
//! ```
//!
//! The function takes `&JobArgs` and returns `anyhow::Result<T>` for any
//! `T: Into<Value>`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, ReturnType, parse_macro_input};

mod attr {
    use syn::meta::ParseNestedMeta;

    /// Get the attribute name as a string
    pub fn name(meta: &ParseNestedMeta) -> String {
        meta.path
            .get_ident()
            .map(|i| i.to_string())
            .unwrap_or_default()
    }

    /// Parse a string literal attribute: `attr = "value"`
    pub fn string(meta: &ParseNestedMeta) -> syn::Result<String> {
        let value: syn::LitStr = meta.value()?.parse()?;
        Ok(value.value())
    }

    /// Create an unknown attribute error
    pub fn unknown(meta: &ParseNestedMeta, name: &str) -> syn::Error {
        meta.error(format!("unknown attribute: {}", name))
    }
}

/// Register a job function
#[proc_macro_attribute]
pub fn job(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = TokenStream2::from(args);
    let func = parse_macro_input!(item as ItemFn);

    job_impl(args, func)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

#[derive(Default)]
struct JobConfig {
    id: Option<String>,
    description: Option<String>,
}

fn job_impl(args: TokenStream2, func: ItemFn) -> Result<TokenStream2, syn::Error> {
    validate_signature(&func)?;
    let config = parse_job_config(args)?;

    let fn_name = &func.sig.ident;
    let fn_name_str = fn_name.to_string();
    let wrapper_name = format_ident!("_jobpool_runner_{}", fn_name);

    let id = config.id.unwrap_or_else(|| fn_name_str.clone());
    if id.trim().is_empty() {
        return Err(syn::Error::new_spanned(&func.sig.ident, "job id must not be empty"));
    }
    let description = config
        .description
        .or_else(|| doc_summary(&func.attrs))
        .unwrap_or_default();

    Ok(quote! {
        #func

        #[doc(hidden)]
        #[allow(non_snake_case)]
        fn #wrapper_name(
            args: &::jobpool::JobArgs,
        ) -> ::jobpool::internal::anyhow::Result<::jobpool::Value> {
            #fn_name(args).map(::core::convert::Into::into)
        }

        ::jobpool::internal::inventory::submit! {
            ::jobpool::JobDef {
                id: #id,
                name: #fn_name_str,
                description: #description,
                runner_fn: #wrapper_name,
                file: file!(),
                line: line!(),
                module_path: module_path!(),
            }
        }
    })
}

fn parse_job_config(args: TokenStream2) -> Result<JobConfig, syn::Error> {
    let mut config = JobConfig::default();
    if args.is_empty() {
        return Ok(config);
    }

    let parser = syn::meta::parser(|meta| {
        let name = attr::name(&meta);
        match name.as_str() {
            "id" => config.id = Some(attr::string(&meta)?),
            "description" => config.description = Some(attr::string(&meta)?),
            _ => return Err(attr::unknown(&meta, &name)),
        }
        Ok(())
    });

    syn::parse::Parser::parse2(parser, args)?;
    Ok(config)
}

fn validate_signature(func: &ItemFn) -> syn::Result<()> {
    if func.sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            func.sig.asyncness,
            "jobpool: job functions cannot be async",
        ));
    }
    if !func.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.generics,
            "jobpool: job functions cannot be generic",
        ));
    }
    if func.sig.inputs.len() != 1 || matches!(func.sig.inputs.first(), Some(FnArg::Receiver(_))) {
        return Err(syn::Error::new_spanned(
            &func.sig,
            "jobpool: job function must take exactly one argument: `&JobArgs`",
        ));
    }
    if matches!(func.sig.output, ReturnType::Default) {
        return Err(syn::Error::new_spanned(
            &func.sig,
            "jobpool: job function must return `anyhow::Result<T>` where `T: Into<Value>`",
        ));
    }
    Ok(())
}

/// First non-empty line of the `///` docs
fn doc_summary(attrs: &[syn::Attribute]) -> Option<String> {
    attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            syn::Meta::NameValue(nv) => match &nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(s),
                    ..
                }) => Some(s.value().trim().to_string()),
                _ => None,
            },
            _ => None,
        })
        .find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_default_config() {
        let config = parse_job_config(TokenStream2::new()).unwrap();
        assert!(config.id.is_none());
        assert!(config.description.is_none());
    }

    #[test]
    fn test_custom_id() {
        let config = parse_job_config(quote! { id = "sort.quick", description = "qs" }).unwrap();
        assert_eq!(config.id.as_deref(), Some("sort.quick"));
        assert_eq!(config.description.as_deref(), Some("qs"));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        assert!(parse_job_config(quote! { timeout = "5s" }).is_err());
    }

    #[test]
    fn test_signature_checks() {
        let ok: ItemFn = parse_quote! {
            fn square(args: &JobArgs) -> anyhow::Result<i64> { Ok(0) }
        };
        assert!(validate_signature(&ok).is_ok());

        let no_args: ItemFn = parse_quote! { fn f() -> anyhow::Result<i64> { Ok(0) } };
        assert!(validate_signature(&no_args).is_err());

        let no_ret: ItemFn = parse_quote! { fn f(args: &JobArgs) {} };
        assert!(validate_signature(&no_ret).is_err());

        let asynchronous: ItemFn = parse_quote! {
            async fn f(args: &JobArgs) -> anyhow::Result<i64> { Ok(0) }
        };
        assert!(validate_signature(&asynchronous).is_err());
    }

    #[test]
    fn test_doc_summary() {
        let func: ItemFn = parse_quote! {
            ///
            /// Square an integer.
            /// More detail here.
            fn square(args: &JobArgs) -> anyhow::Result<i64> { Ok(0) }
        };
        assert_eq!(doc_summary(&func.attrs).as_deref(), Some("Square an integer."));
    }

    #[test]
    fn test_expansion_registers_wrapper() {
        let func: ItemFn = parse_quote! {
            fn square(args: &JobArgs) -> anyhow::Result<i64> { Ok(0) }
        };
        let expanded = job_impl(TokenStream2::new(), func).unwrap().to_string();
        assert!(expanded.contains("_jobpool_runner_square"));
        assert!(expanded.contains("inventory :: submit"));
        assert!(expanded.contains("\"square\""));
    }
}

use proc_macro::TokenStream;
use proc_macro2::{Delimiter, Group, TokenTree};
use quote::quote;
use syn::ItemFn;
use syn::parse::{Parse, ParseStream};

/// Parsed `#[progress(message = ..., finished = ...)]` arguments.
struct ProgressArgs {
    message: syn::Expr,
    finished: Option<syn::Expr>,
}

impl Parse for ProgressArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut message = None;
        let mut finished = None;

        while !input.is_empty() {
            let key: syn::Ident = input.parse()?;
            input.parse::<syn::Token![=]>()?;
            let value: syn::Expr = input.parse()?;

            match key.to_string().as_str() {
                "message" => message = Some(value),
                "finished" => finished = Some(value),
                other => {
                    return Err(syn::Error::new(
                        key.span(),
                        format!("unsupported progress argument `{other}`"),
                    ));
                }
            }

            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }

        let message = message.ok_or_else(|| input.error("`message` is required"))?;
        Ok(Self { message, finished })
    }
}

pub fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match syn::parse::<ProgressArgs>(attr) {
        Ok(args) => args,
        Err(error) => return error.to_compile_error().into(),
    };
    let mut func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(error) => return error.to_compile_error().into(),
    };

    mark_span_as_progress(&mut func);

    let message = &args.message;
    let set_finished = args.finished.as_ref().map(|finished| {
        quote!(__span.pb_set_finish_message(&#finished);)
    });

    let body = std::mem::take(&mut func.block.stmts);
    func.block = syn::parse_quote!({
        {
            use tracing_indicatif::span_ext::IndicatifSpanExt as _;
            let __span = tracing::Span::current();
            __span.pb_set_message(&#message);
            #set_finished
        }
        #(#body)*
    });

    quote!(#func).into()
}

/// Adds `progress = true` to the function's `#[instrument]` fields, adding
/// the attribute when the function has none.
fn mark_span_as_progress(func: &mut ItemFn) {
    let existing = func
        .attrs
        .iter_mut()
        .find(|attr| attr.path().is_ident("instrument"));

    let Some(attr) = existing else {
        func.attrs
            .push(syn::parse_quote!(#[tracing::instrument(fields(progress = true))]));
        return;
    };

    let tokens = match &attr.meta {
        syn::Meta::List(list) => with_progress_field(list.tokens.clone()),
        _ => quote!(fields(progress = true)),
    };
    *attr = syn::parse_quote!(#[instrument(#tokens)]);
}

fn with_progress_field(tokens: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    let mut output: Vec<TokenTree> = Vec::new();
    let mut injected = false;
    let mut trees = tokens.into_iter().peekable();

    while let Some(tree) = trees.next() {
        let is_fields = matches!(&tree, TokenTree::Ident(ident) if ident == "fields");
        let next_is_paren = matches!(
            trees.peek(),
            Some(TokenTree::Group(group)) if group.delimiter() == Delimiter::Parenthesis
        );
        output.push(tree);

        if is_fields
            && next_is_paren
            && let Some(TokenTree::Group(group)) = trees.next()
        {
            let inner = group.stream();
            let fields = if inner.is_empty() {
                quote!(progress = true)
            } else {
                quote!(#inner, progress = true)
            };
            output.push(TokenTree::Group(Group::new(Delimiter::Parenthesis, fields)));
            injected = true;
        }
    }

    let rebuilt: proc_macro2::TokenStream = output.into_iter().collect();
    if injected {
        rebuilt
    } else if rebuilt.is_empty() {
        quote!(fields(progress = true))
    } else {
        quote!(#rebuilt, fields(progress = true))
    }
}

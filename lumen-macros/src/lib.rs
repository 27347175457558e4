use proc_macro::TokenStream;
use proc_macro_error::{abort, proc_macro_error};
use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemStruct, LitStr};

/// Register a component type under a string key.
///
/// The type must implement `Default` and `lumen::comp::Component`.
///
/// ```ignore
/// #[lumen::component("film::accum")]
/// #[derive(Default)]
/// pub struct AccumFilm { .. }
/// ```
#[proc_macro_attribute]
#[proc_macro_error]
pub fn component(attr: TokenStream, item: TokenStream) -> TokenStream {
    let key = syn::parse::<LitStr>(attr)
        .unwrap_or_else(|e| abort!(e.span(), "Expected a string key, e.g. #[component(\"film::accum\")]: {}", e));
    if key.value().is_empty() {
        abort!(key, "Component key must not be empty");
    }

    let input = parse_macro_input!(item as ItemStruct);
    if !input.generics.params.is_empty() {
        abort!(input.generics, "Generic components cannot be registered");
    }

    let name = &input.ident;
    let upper = name.to_string().to_uppercase();
    let create_fn = format_ident!("__lumen_create_{}", upper.to_lowercase());
    let registration = format_ident!("__LUMEN_COMPONENT_{}", upper);

    let expanded = quote! {
        #input

        #[doc(hidden)]
        fn #create_fn() -> ::std::boxed::Box<dyn ::lumen::comp::Component> {
            ::std::boxed::Box::new(<#name as ::std::default::Default>::default())
        }

        // Register the component with the global registry
        #[doc(hidden)]
        #[::lumen::linkme::distributed_slice(::lumen::comp::COMPONENTS)]
        #[linkme(crate = ::lumen::linkme)]
        static #registration: ::lumen::comp::ComponentRegistration = ::lumen::comp::ComponentRegistration {
            key: #key,
            create: #create_fn,
        };
    };

    TokenStream::from(expanded)
}

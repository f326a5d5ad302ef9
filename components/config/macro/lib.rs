/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, Fields, Ident};
use synstructure::decl_derive;

decl_derive!([FerryPreferences] => ferry_preferences_derive);

/// A derive macro that adds string-based getter and setter for each field of this struct
/// (enums and other types are not supported). Each field must be convertible into a
/// `PrefValue` with `into()` and back with `try_into()`.
fn ferry_preferences_derive(input: synstructure::Structure) -> TokenStream {
    let ast = input.ast();

    let Data::Struct(ref data) = ast.data else {
        return quote!(compile_error!("FerryPreferences can only be derived for structs"));
    };
    let Fields::Named(ref named_fields) = data.fields else {
        return quote!(compile_error!("FerryPreferences requires named fields"));
    };

    let fields: Vec<(&Ident, &syn::Type)> = named_fields
        .named
        .iter()
        .filter_map(|field| field.ident.as_ref().map(|name| (name, &field.ty)))
        .collect();

    let mut exists_match_cases = quote!();
    let mut get_match_cases = quote!();
    let mut set_match_cases = quote!();
    let mut type_of_match_cases = quote!();
    let mut comparisons = quote!();
    let mut all_fields = quote!();
    for (name, ty) in fields {
        exists_match_cases.extend(quote!(stringify!(#name) => true,));
        get_match_cases.extend(quote!(stringify!(#name) => Some(self.#name.clone().into()),));
        set_match_cases.extend(quote!(
            stringify!(#name) => {
                self.#name = value
                    .try_into()
                    .map_err(|_| PrefError::TypeMismatch(stringify!(#name)))?;
            },
        ));
        type_of_match_cases.extend(quote!(stringify!(#name) => Some(std::any::type_name::<#ty>()),));
        comparisons.extend(quote!(
            if self.#name != other.#name {
                changes.push((stringify!(#name), self.#name.clone().into()));
            }
        ));
        all_fields.extend(quote!(stringify!(#name),));
    }

    let structure_name = &ast.ident;
    quote! {
        impl #structure_name {
            pub fn exists(name: &str) -> bool {
                match name {
                    #exists_match_cases
                    _ => false,
                }
            }

            pub fn get_value(&self, name: &str) -> Option<PrefValue> {
                match name {
                    #get_match_cases
                    _ => None,
                }
            }

            pub fn set_value(&mut self, name: &str, value: PrefValue) -> Result<(), PrefError> {
                match name {
                    #set_match_cases
                    _ => return Err(PrefError::NoSuchPref(name.to_owned())),
                }
                Ok(())
            }

            pub fn type_of(name: &str) -> Option<&'static str> {
                match name {
                    #type_of_match_cases
                    _ => None,
                }
            }

            /// The fields of `self` that differ from `other`, with `self`'s values.
            pub fn diff(&self, other: &Self) -> Vec<(&'static str, PrefValue)> {
                let mut changes = vec![];
                #comparisons
                changes
            }

            pub fn all_fields() -> Vec<&'static str> {
                vec![
                    #all_fields
                ]
            }
        }
    }
}

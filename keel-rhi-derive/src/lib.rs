#![allow(non_snake_case)]

use proc_macro::TokenStream;
use quote::{quote, ToTokens};
use syn::{
    parse_macro_input, spanned::Spanned, Data, DeriveInput, Fields, Lit, Meta, PathArguments, Type, TypeArray,
    TypePath,
};

/// Injects `pub(crate) device: ash::Device` into a Vulkan object struct and implements the
/// crate-sealed `DeviceObject` trait for it. Only meaningful inside `keel-rhi`.
#[proc_macro_attribute]
pub fn DeviceObject(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as syn::ItemStruct);
    let ident = input.ident.clone();
    let generics = input.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut output_struct = input.clone();

    let syn::Fields::Named(fields_named) = &mut output_struct.fields else {
        return syn::Error::new(output_struct.span(), "DeviceObject only supports structs with named fields")
            .to_compile_error()
            .into();
    };

    if fields_named.named.iter().any(|f| f.ident.as_ref().is_some_and(|id| id == "device")) {
        return syn::Error::new(
            fields_named.span(),
            "DeviceObject: struct already has a `device` field; the macro injects `pub(crate) device: ash::Device`",
        )
        .to_compile_error()
        .into();
    }

    let device_field: syn::Field = syn::parse_quote! {
        pub(crate) device: ::ash::Device
    };
    fields_named.named.push(device_field);

    let expanded = quote! {
        #output_struct

        impl #impl_generics crate::vulkan::sealed::Sealed for #ident #ty_generics #where_clause {}

        impl #impl_generics crate::vulkan::DeviceObject for #ident #ty_generics #where_clause {
            #[inline]
            fn device(&self) -> &::ash::Device { &self.device }
        }
    };

    expanded.into()
}

/// Implements `keel_rhi::VertexLayout` for a `#[repr(C)]` struct: one interleaved binding,
/// one attribute per field in declaration order.
#[proc_macro_derive(VertexLayout)]
pub fn derive_vertex_layout(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let ident = input.ident.clone();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    if !has_repr_c(&input.attrs) {
        return syn::Error::new(
            input.span(),
            "VertexLayout requires #[repr(C)] on the vertex struct to ensure stable field offsets",
        )
        .to_compile_error()
        .into();
    }

    let fields = match input.data {
        Data::Struct(s) => match s.fields {
            Fields::Named(named) => named.named,
            Fields::Unnamed(_) | Fields::Unit => {
                return syn::Error::new(ident.span(), "VertexLayout only supports structs with named fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "VertexLayout only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let mut attr_inits = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        let Some(field_ident) = &field.ident else {
            return syn::Error::new(field.span(), "expected named field").to_compile_error().into();
        };

        let fmt = match vertex_format_for_type(&field.ty) {
            Ok(ts) => ts,
            Err(e) => return e.to_compile_error().into(),
        };

        let location = i as u32;
        attr_inits.push(quote! {
            ::keel_rhi::VertexAttribute {
                location: #location,
                binding: 0u32,
                format: #fmt,
                offset: ::keel_rhi::memoffset::offset_of!(Self, #field_ident) as u32,
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics ::keel_rhi::VertexLayout for #ident #ty_generics #where_clause {
            fn vertex_input() -> ::keel_rhi::VertexInput {
                let binding = ::keel_rhi::VertexInputBinding {
                    stride: ::core::mem::size_of::<Self>() as u32,
                };
                ::keel_rhi::VertexInput {
                    attributes: ::core::iter::IntoIterator::into_iter([#(#attr_inits),*]).collect(),
                    bindings: ::core::iter::once(binding).collect(),
                }
            }
        }
    };

    expanded.into()
}

fn has_repr_c(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().filter(|attr| attr.path().is_ident("repr")).any(|attr| {
        attr.parse_args_with(syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated)
            .is_ok_and(|meta| meta.iter().any(|m| matches!(m, Meta::Path(p) if p.is_ident("C"))))
    })
}

fn vertex_format_for_type(ty: &Type) -> Result<proc_macro2::TokenStream, syn::Error> {
    // Arrays like [f32; 3]
    if let Type::Array(TypeArray { elem, len, .. }) = ty {
        let n = match len {
            syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
                Lit::Int(li) => li.base10_parse::<usize>().ok(),
                _ => None,
            },
            _ => None,
        }
        .ok_or_else(|| syn::Error::new(ty.span(), "array length must be an integer literal"))?;

        return vertex_format_for_scalar_array(elem.as_ref(), n);
    }

    // Scalars like f32 / u32 / i32
    if let Type::Path(TypePath { path, .. }) = ty {
        if let Some(ident) = path.get_ident() {
            return match ident.to_string().as_str() {
                "f32" => Ok(quote!(::keel_rhi::VertexFormat::Float1)),
                "u32" => Ok(quote!(::keel_rhi::VertexFormat::UInt1)),
                "i32" => Ok(quote!(::keel_rhi::VertexFormat::Int1)),
                _ => Err(syn::Error::new(ty.span(), format!("unsupported vertex field type `{ident}`"))),
            };
        }

        if let Some(seg) = path.segments.last() {
            if matches!(seg.arguments, PathArguments::AngleBracketed(_)) {
                return Err(syn::Error::new(
                    ty.span(),
                    "unsupported generic vertex field type; use primitives or arrays like [f32; N]",
                ));
            }
        }
    }

    Err(syn::Error::new(
        ty.span(),
        format!("unsupported vertex field type `{}`", ty.to_token_stream()),
    ))
}

fn vertex_format_for_scalar_array(elem: &Type, n: usize) -> Result<proc_macro2::TokenStream, syn::Error> {
    let scalar = if let Type::Path(TypePath { path, .. }) = elem {
        path.get_ident().map(|i| i.to_string())
    } else {
        None
    }
    .ok_or_else(|| syn::Error::new(elem.span(), "array element type must be a primitive"))?;

    match (scalar.as_str(), n) {
        ("f32", 1) => Ok(quote!(::keel_rhi::VertexFormat::Float1)),
        ("f32", 2) => Ok(quote!(::keel_rhi::VertexFormat::Float2)),
        ("f32", 3) => Ok(quote!(::keel_rhi::VertexFormat::Float3)),
        ("f32", 4) => Ok(quote!(::keel_rhi::VertexFormat::Float4)),

        ("u32", 2) => Ok(quote!(::keel_rhi::VertexFormat::UInt2)),
        ("u32", 3) => Ok(quote!(::keel_rhi::VertexFormat::UInt3)),
        ("u32", 4) => Ok(quote!(::keel_rhi::VertexFormat::UInt4)),

        ("i32", 2) => Ok(quote!(::keel_rhi::VertexFormat::Int2)),
        ("i32", 3) => Ok(quote!(::keel_rhi::VertexFormat::Int3)),
        ("i32", 4) => Ok(quote!(::keel_rhi::VertexFormat::Int4)),

        // Normalized bytes, typically vertex colors.
        ("u8", 4) => Ok(quote!(::keel_rhi::VertexFormat::UByte4Norm)),
        ("i8", 4) => Ok(quote!(::keel_rhi::VertexFormat::Byte4Norm)),

        _ => Err(syn::Error::new(
            elem.span(),
            format!("unsupported vertex array type `[{scalar}; {n}]` (supported: f32/u32/i32 with N=2..4, u8/i8 with N=4)"),
        )),
    }
}

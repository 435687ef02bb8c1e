//! Generates the `access.Access` client and server stubs.
//!
//! The messages are plain prost structs in `src/proto.rs`, so the service is
//! described with the manual builder and no `protoc` is needed at build time.
//! `proto/access.proto` documents the same contract for non-Rust callers.

use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, input: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type("crate::proto::AuthorizeReply")
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("Access")
        .package("access")
        .method(unary("authorize_token", "AuthorizeToken", "AuthorizeTokenRequest"))
        .method(unary("authorize", "Authorize", "AuthorizeRequest"))
        .build();

    Builder::new().compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}

//! Wire types for the `access.Access` gRPC service

/// Authorization query carrying a bearer token
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthorizeTokenRequest {
    /// Management token identifying the caller
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
    /// Resource being accessed
    #[prost(string, tag = "2")]
    pub resource: ::prost::alloc::string::String,
    /// Action being performed
    #[prost(string, tag = "3")]
    pub action: ::prost::alloc::string::String,
}

/// Authorization query carrying an explicit subject
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthorizeRequest {
    /// Subject identity, usually `user_customer`
    #[prost(string, tag = "1")]
    pub subject: ::prost::alloc::string::String,
    /// Resource being accessed
    #[prost(string, tag = "2")]
    pub resource: ::prost::alloc::string::String,
    /// Action being performed
    #[prost(string, tag = "3")]
    pub action: ::prost::alloc::string::String,
}

/// Verdict for either query
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AuthorizeReply {
    #[prost(bool, tag = "1")]
    pub authorized: bool,
}

include!(concat!(env!("OUT_DIR"), "/access.Access.rs"));

/// Fully qualified gRPC service name
pub const SERVICE_NAME: &str = "access.Access";

/// Route of the standard gRPC health check
pub const HEALTH_CHECK_METHOD: &str = "/grpc.health.v1.Health/Check";

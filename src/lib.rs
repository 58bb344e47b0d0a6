pub mod auth;
pub mod blobstore;
pub mod grpc;
pub mod hashutil;
pub mod maintainer;
pub mod metastore;
pub mod paths;
pub mod rest;
pub mod server;
pub mod settings;
pub mod waitqueue;

/// Generated protobuf/gRPC types for both service surfaces.
pub mod pb {
    pub mod flex {
        tonic::include_proto!("flex");
    }
    pub mod flexlet {
        tonic::include_proto!("flexlet");
    }
}

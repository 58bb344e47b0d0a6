//! RPC surfaces: client-facing (`flex.FlexService`) and worker-facing
//! (`flexlet.FlexletService`), sharing one MetaStore and one BlobStore.

pub mod client_service;
pub mod flexlet_service;

pub use client_service::FlexServiceImpl;
pub use flexlet_service::FlexletServiceImpl;

use tonic::Status;

use crate::blobstore::BlobStoreError;
use crate::metastore::MetaStoreError;

/// Maps store errors onto the RPC status taxonomy. Transient database
/// faults surface as Internal with the operation-annotated message intact.
pub(crate) fn store_status(err: MetaStoreError) -> Status {
    match &err {
        e if e.is_not_found() => Status::not_found(err.to_string()),
        MetaStoreError::InvalidHash(_) => Status::invalid_argument(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

pub(crate) fn blob_status(err: BlobStoreError) -> Status {
    match &err {
        BlobStoreError::NotFound(_) => Status::not_found(err.to_string()),
        BlobStoreError::InvalidUrl(_) | BlobStoreError::UnsupportedScheme(_) => {
            Status::invalid_argument(err.to_string())
        }
        _ => Status::internal(err.to_string()),
    }
}

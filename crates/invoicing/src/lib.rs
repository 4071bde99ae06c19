//! Invoicing domain module.
//!
//! Fiscal invoice records as they enter a loading order, their identities, and
//! the identity resolver that keeps duplicates out of the aggregate. Pure
//! deterministic logic (no IO, no storage).

pub mod access_key;
pub mod invoice;
pub mod resolver;

pub use access_key::AccessKey;
pub use invoice::{
    DedupKey, IngestionChannel, InvoiceCandidate, InvoiceIdentity, InvoiceRecord, InvoiceRef,
    OperationMetadata,
};
pub use resolver::{
    Admission, AdmissionRejection, BatchAdmission, DuplicateInvoice, DuplicateOf, IdentityResolver,
};

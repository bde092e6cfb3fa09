//! EIP-712 hashing, signature verification, and the matching signer.

pub mod eip712;
pub mod signer;
pub mod verifier;

pub use eip712::{TokenDomain, signing_hash, struct_hash};
pub use signer::{AuthorizationSigner, DEV_PRIVATE_KEY, DEV_SIGNER_ADDRESS, SignerError};
pub use verifier::{RawSignature, SignatureCheck, SignatureError};

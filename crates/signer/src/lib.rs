//! Credential signers.
//!
//! Every credential kind produces a chain-verifiable signature array for a
//! transaction hash through [`CredentialSigner`]. WebAuthn is the involved
//! one: the authenticator's DER signature and raw buffers are re-encoded as
//! field elements for the on-chain verifier (see [`encoding`]).

pub mod authenticator;
pub mod encoding;
pub mod error;
pub mod hasher;
pub mod key;
pub mod signer;
pub mod stark;
pub mod typed_data;
pub mod verify;
pub mod wallet;
pub mod webauthn;

pub use authenticator::{Assertion, AssertionRequest, Authenticator, MockAuthenticator, MockBehavior};
pub use encoding::{format_assertion, pack_words, parse_der_signature, split_u256, SignerTypeTag};
pub use error::SignerError;
pub use hasher::{chain_id_felt, ChainHasher, MockHasher, StarknetHasher};
pub use key::{derive_password_key, KeySigner, MockCurve, StarkCurve, PASSWORD_KDF_ROUNDS};
pub use signer::{build_signer, CredentialSigner, SignerContext};
pub use stark::StarknetCurve;
pub use typed_data::typed_data_hash;
pub use verify::{decode_signature, verify_assertion, DecodedSignature};
pub use wallet::{ExternalWallet, MockWallet, WalletSigner};
pub use webauthn::WebauthnSigner;

//! Cryptographic building blocks for the signer: the MAC capability and the
//! secret key material it is keyed with. Keeping the two apart means the
//! signer never touches raw hash code directly.

pub mod mac;
pub mod secret;

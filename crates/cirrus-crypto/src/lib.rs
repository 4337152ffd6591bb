//! cirrus-crypto: client-side cryptography for the Cirrus drive engine
//!
//! Authentication: SRP-6a over the RFC 5054 2048-bit group, so the password
//! never leaves the client.
//!
//! Key hierarchy (envelope encryption, each level wrapped by the one above):
//! ```text
//! Derived Key (Argon2id from password)
//!   └── User Key (X25519 + Ed25519, locked with the derived key)
//!       └── Share key packet (hybrid-encrypted to the user key)
//!           └── Share Session Key → unlocks Share Node Key
//!               └── Folder key packet (sealed with parent session key)
//!                   └── Folder Session Key → unlocks Folder Node Key
//!                       └── File key packet → File Session Key → File Node Key
//!                           └── Content Key (hybrid-encrypted to the file key)
//! ```
//!
//! Symmetric layers use XChaCha20-Poly1305; names of files are sealed with the
//! parent session key, all other names are encrypted to the node's own key.

pub mod content;
pub mod encoding;
pub mod hybrid;
pub mod kdf;
pub mod keypair;
pub mod names;
pub mod packet;
pub mod recovery;
pub mod session;
pub mod srp;

pub use content::{decrypt_block, encrypt_block, generate_content_key, ContentKey};
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use keypair::{NodeKeyPair, NodePublicKey};
pub use packet::KeyPacket;
pub use recovery::{generate_recovery_phrase, recovery_phrase_to_key};
pub use session::{generate_session_key, SessionKey};
pub use srp::{Registration, SrpClient, SrpError, SrpGroup, SrpServer};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

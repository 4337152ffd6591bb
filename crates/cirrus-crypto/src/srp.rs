//! SRP-6a password authentication over the RFC 5054 2048-bit group
//!
//! The client proves it knows the password without sending it. Both sides
//! end up with the same 256-bit key K, and each proves it to the other:
//!
//! ```text
//! client                                  server
//!   A = g^a                    ──A──▶
//!                              ◀─salt,B── B = k·v + g^b
//!   u = H(A‖B)                             u = H(A‖B)
//!   S = (B − k·g^x)^(a + u·x)              S = (A·v^u)^b
//!   K = H(S), M1 = H(A‖B‖K)    ──M1──▶     check M1
//!   check M2                   ◀──M2──     M2 = H(A‖M1‖K)
//! ```
//!
//! All group elements are left-padded to the modulus width before hashing.
//! H is SHA-256 and x = H(salt ‖ H(identity ":" password)).

use num_bigint_dig::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::session::SessionKey;

const N_2048_HEX: &str = concat!(
    "AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC3192943DB56050",
    "A37329CBB4A099ED8193E0757767A13DD52312AB4B03310DCD7F48A9DA04FD50",
    "E8083969EDB767B0CF6095179A163AB3661A05FBD5FAAAE82918A9962F0B93B8",
    "55F97993EC975EEAA80D740ADBF4FF747359D041D5C33EA71D281E446B14773B",
    "CA97B43A23FB801676BD207A436C6481F1D2B9078717461A5B9D32E688F87748",
    "544523B524B0D57D5EA77A2775D2ECFA032CFBDBF52FB3786160279004E57AE6",
    "AF874E7303CE53299CCC041C7BC308D82A5698F3A8D0C38271AE35F8E9DBFBB6",
    "94B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F9E4AFF73",
);

/// Bits drawn for each ephemeral exponent
const EXPONENT_BITS: usize = 256;

/// Exponents shorter than this are redrawn
const MIN_EXPONENT_BITS: usize = 240;

const SMALL_PRIMES: [u32; 8] = [2, 3, 5, 7, 11, 13, 17, 19];

const MAX_EXPONENT_ATTEMPTS: usize = 1000;

/// Salt size for new registrations
pub const SALT_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SrpError {
    #[error("password must not be empty")]
    EmptyPassword,

    #[error("identity must not be empty")]
    EmptyIdentity,

    #[error("salt must not be empty")]
    EmptySalt,

    #[error("server public value is outside the group")]
    InvalidServerPublic,

    #[error("client public value is outside the group")]
    InvalidClientPublic,

    #[error("scrambling parameter u is zero")]
    ZeroScrambler,

    #[error("{0} called out of order")]
    OutOfOrder(&'static str),

    #[error("invalid group parameters")]
    InvalidGroup,

    #[error("could not draw a usable ephemeral exponent")]
    WeakRandomness,

    #[error("client proof does not match")]
    BadClientProof,
}

/// Group parameters: safe prime N, generator g and multiplier k = H(N ‖ PAD(g)).
#[derive(Clone)]
pub struct SrpGroup {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    n_len: usize,
}

impl SrpGroup {
    /// The RFC 5054 2048-bit group with g = 2.
    pub fn rfc5054_2048() -> Result<Self, SrpError> {
        let n = BigUint::parse_bytes(N_2048_HEX.as_bytes(), 16).ok_or(SrpError::InvalidGroup)?;
        Self::new(n, BigUint::from(2u32))
    }

    pub fn new(n: BigUint, g: BigUint) -> Result<Self, SrpError> {
        if n <= BigUint::one() || g.is_zero() || g >= n {
            return Err(SrpError::InvalidGroup);
        }
        let n_len = n.to_bytes_be().len();
        let mut group = Self {
            n,
            g,
            k: BigUint::zero(),
            n_len,
        };
        let n_bytes = group.n.to_bytes_be();
        let g_padded = group.pad(&group.g);
        let k = BigUint::from_bytes_be(&hash(&[&n_bytes, &g_padded])) % &group.n;
        if k.is_zero() {
            return Err(SrpError::InvalidGroup);
        }
        group.k = k;
        Ok(group)
    }

    /// Modulus width in bytes; every public value is this long on the wire.
    pub fn byte_len(&self) -> usize {
        self.n_len
    }

    pub fn multiplier(&self) -> &BigUint {
        &self.k
    }

    fn pad(&self, value: &BigUint) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        if bytes.len() >= self.n_len {
            return bytes;
        }
        let mut out = vec![0u8; self.n_len - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }

    fn pow_g(&self, exp: &BigUint) -> BigUint {
        self.g.modpow(exp, &self.n)
    }

    /// Parse a peer's public value, rejecting anything ≡ 0 or ≥ N.
    fn parse_public(&self, bytes: &[u8]) -> Option<BigUint> {
        let value = BigUint::from_bytes_be(bytes);
        if value.is_zero() || value >= self.n || (&value % &self.n).is_zero() {
            return None;
        }
        Some(value)
    }

    fn scrambler(&self, a_pub: &BigUint, b_pub: &BigUint) -> Result<BigUint, SrpError> {
        let u = BigUint::from_bytes_be(&hash(&[&self.pad(a_pub), &self.pad(b_pub)]));
        if u.is_zero() {
            return Err(SrpError::ZeroScrambler);
        }
        Ok(u)
    }

    fn private_x(&self, identity: &str, password: &str, salt: &[u8]) -> Zeroizing<BigUint> {
        let inner = Zeroizing::new(hash(&[identity.as_bytes(), b":", password.as_bytes()]));
        Zeroizing::new(BigUint::from_bytes_be(&hash(&[salt, inner.as_slice()])))
    }

    fn session_key(&self, s: &BigUint) -> Zeroizing<[u8; 32]> {
        let padded = Zeroizing::new(self.pad(s));
        Zeroizing::new(hash(&[padded.as_slice()]))
    }

    /// Draw a random exponent, rejecting low-entropy or small-prime-divisible values.
    fn ephemeral_exponent(&self) -> Result<Zeroizing<BigUint>, SrpError> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_EXPONENT_ATTEMPTS {
            let candidate = Zeroizing::new(rng.gen_biguint(EXPONENT_BITS));
            if candidate.bits() < MIN_EXPONENT_BITS || *candidate >= self.n {
                continue;
            }
            if SMALL_PRIMES
                .iter()
                .any(|p| (&*candidate % *p).is_zero())
            {
                continue;
            }
            return Ok(candidate);
        }
        Err(SrpError::WeakRandomness)
    }
}

impl std::fmt::Debug for SrpGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpGroup")
            .field("bits", &self.n.bits())
            .field("g", &self.g)
            .finish()
    }
}

fn hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Salt and verifier sent to the server once, at sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
}

/// Where the client is in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpState {
    Idle,
    AuthStarted,
    ChallengeProcessed,
}

enum ClientState {
    Idle,
    AuthStarted {
        a: Zeroizing<BigUint>,
        a_pub: BigUint,
    },
    ChallengeProcessed {
        a_pub: BigUint,
        m1: [u8; 32],
        key: Zeroizing<[u8; 32]>,
    },
}

pub struct SrpClient {
    group: SrpGroup,
    identity: String,
    state: ClientState,
}

impl SrpClient {
    pub fn new(group: SrpGroup, identity: &str) -> Result<Self, SrpError> {
        if identity.is_empty() {
            return Err(SrpError::EmptyIdentity);
        }
        Ok(Self {
            group,
            identity: identity.to_string(),
            state: ClientState::Idle,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SrpState {
        match self.state {
            ClientState::Idle => SrpState::Idle,
            ClientState::AuthStarted { .. } => SrpState::AuthStarted,
            ClientState::ChallengeProcessed { .. } => SrpState::ChallengeProcessed,
        }
    }

    /// Fresh salt and verifier v = g^x for sign-up.
    pub fn generate_registration_credentials(
        &self,
        password: &SecretString,
    ) -> Result<Registration, SrpError> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let verifier = self.compute_verifier(&salt, password)?;
        Ok(Registration { salt, verifier })
    }

    /// Verifier for a known salt, padded to the group width.
    pub fn compute_verifier(
        &self,
        salt: &[u8],
        password: &SecretString,
    ) -> Result<Vec<u8>, SrpError> {
        if password.expose_secret().is_empty() {
            return Err(SrpError::EmptyPassword);
        }
        if salt.is_empty() {
            return Err(SrpError::EmptySalt);
        }
        let x = self
            .group
            .private_x(&self.identity, password.expose_secret(), salt);
        Ok(self.group.pad(&self.group.pow_g(&x)))
    }

    /// Draw the ephemeral a and return A = g^a, padded.
    ///
    /// Restarting from any state discards the previous attempt.
    pub fn start_authentication(&mut self) -> Result<Vec<u8>, SrpError> {
        self.reset();
        let a = self.group.ephemeral_exponent()?;
        let a_pub = self.group.pow_g(&a);
        let out = self.group.pad(&a_pub);
        self.state = ClientState::AuthStarted { a, a_pub };
        Ok(out)
    }

    /// Answer the server's challenge with the client proof M1.
    ///
    /// Any error returns the client to `Idle` with secrets dropped.
    pub fn process_challenge(
        &mut self,
        salt: &[u8],
        server_public: &[u8],
        password: &SecretString,
    ) -> Result<Vec<u8>, SrpError> {
        let (a, a_pub) = match std::mem::replace(&mut self.state, ClientState::Idle) {
            ClientState::AuthStarted { a, a_pub } => (a, a_pub),
            other => {
                self.state = other;
                return Err(SrpError::OutOfOrder("process_challenge"));
            }
        };

        if password.expose_secret().is_empty() {
            return Err(SrpError::EmptyPassword);
        }
        if salt.is_empty() {
            return Err(SrpError::EmptySalt);
        }

        let group = &self.group;
        let b_pub = group
            .parse_public(server_public)
            .ok_or(SrpError::InvalidServerPublic)?;
        let u = group.scrambler(&a_pub, &b_pub)?;
        let x = group.private_x(&self.identity, password.expose_secret(), salt);

        // B − k·g^x, kept nonnegative: B < N and k·g^x mod N < N
        let kv = (&group.k * group.pow_g(&x)) % &group.n;
        let base = Zeroizing::new((&b_pub + &group.n - kv) % &group.n);
        let exp = Zeroizing::new(&*a + &u * &*x);
        let s = Zeroizing::new(base.modpow(&exp, &group.n));
        let key = group.session_key(&s);

        let m1 = hash(&[&group.pad(&a_pub), &group.pad(&b_pub), key.as_slice()]);
        self.state = ClientState::ChallengeProcessed { a_pub, m1, key };
        Ok(m1.to_vec())
    }

    /// Check the server proof M2 in constant time.
    ///
    /// Returns the shared key on success and `None` on a mismatch. The client
    /// returns to `Idle` either way and keeps no copy of the key.
    pub fn verify_server(&mut self, server_proof: &[u8]) -> Result<Option<SessionKey>, SrpError> {
        let (a_pub, m1, key) = match std::mem::replace(&mut self.state, ClientState::Idle) {
            ClientState::ChallengeProcessed { a_pub, m1, key } => (a_pub, m1, key),
            other => {
                self.state = other;
                return Err(SrpError::OutOfOrder("verify_server"));
            }
        };

        let expected = hash(&[&self.group.pad(&a_pub), &m1, key.as_slice()]);
        let ok: bool = expected.as_slice().ct_eq(server_proof).into();
        Ok(ok.then(|| SessionKey::from_bytes(*key)))
    }

    /// Drop all ephemeral secrets and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = ClientState::Idle;
    }
}

impl std::fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpClient")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Verifier side of the exchange, one instance per login attempt.
pub struct SrpServer {
    group: SrpGroup,
    v: BigUint,
    b: Zeroizing<BigUint>,
    b_pub: BigUint,
}

impl SrpServer {
    pub fn new(group: SrpGroup, verifier: &[u8]) -> Result<Self, SrpError> {
        let v = BigUint::from_bytes_be(verifier);
        if v.is_zero() || v >= group.n {
            return Err(SrpError::InvalidGroup);
        }
        for _ in 0..MAX_EXPONENT_ATTEMPTS {
            let b = group.ephemeral_exponent()?;
            let b_pub = (&group.k * &v + group.pow_g(&b)) % &group.n;
            if b_pub.is_zero() {
                continue;
            }
            return Ok(Self { group, v, b, b_pub });
        }
        Err(SrpError::WeakRandomness)
    }

    pub fn server_public(&self) -> Vec<u8> {
        self.group.pad(&self.b_pub)
    }

    /// Check the client proof and return `(M2, K)`.
    pub fn verify_client(
        &self,
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<(Vec<u8>, SessionKey), SrpError> {
        let group = &self.group;
        let a_pub = group
            .parse_public(client_public)
            .ok_or(SrpError::InvalidClientPublic)?;
        let u = group.scrambler(&a_pub, &self.b_pub)?;

        let base = Zeroizing::new((&a_pub * self.v.modpow(&u, &group.n)) % &group.n);
        let s = Zeroizing::new(base.modpow(&self.b, &group.n));
        let key = group.session_key(&s);

        let a_padded = group.pad(&a_pub);
        let expected = hash(&[&a_padded, &group.pad(&self.b_pub), key.as_slice()]);
        if !bool::from(expected.as_slice().ct_eq(client_proof)) {
            return Err(SrpError::BadClientProof);
        }

        let m2 = hash(&[&a_padded, &expected, key.as_slice()]);
        Ok((m2.to_vec(), SessionKey::from_bytes(*key)))
    }
}

//! Password login over SRP-6a.

use cirrus_core::remote::AuthApi;
use cirrus_core::{DriveError, DriveResult};
use cirrus_crypto::encoding::{b64_decode, b64_encode};
use cirrus_crypto::{SessionKey, SrpClient, SrpError, SrpGroup};
use secrecy::SecretString;
use tracing::{info, warn};

/// A verified login: the server's session id and the shared SRP key.
pub struct AuthSession {
    pub session_id: String,
    shared_key: SessionKey,
}

impl AuthSession {
    pub fn shared_key(&self) -> &SessionKey {
        &self.shared_key
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("session_id", &self.session_id)
            .field("shared_key", &"[REDACTED]")
            .finish()
    }
}

fn protocol(e: SrpError) -> DriveError {
    DriveError::Protocol(e.to_string())
}

fn decode(field: &str, value: &str) -> DriveResult<Vec<u8>> {
    b64_decode(value).map_err(|e| DriveError::Protocol(format!("{field}: {e}")))
}

/// Run the full SRP exchange against `api`.
///
/// Every failure path drops the client, and with it the ephemeral secret
/// and any derived key.
pub async fn authenticate(
    api: &dyn AuthApi,
    identity: &str,
    password: &SecretString,
) -> DriveResult<AuthSession> {
    let group = SrpGroup::rfc5054_2048().map_err(protocol)?;
    let mut client = SrpClient::new(group, identity).map_err(protocol)?;

    let info = api.auth_info(identity).await?;
    let client_public = client.start_authentication().map_err(protocol)?;
    let salt = decode("salt", &info.salt)?;
    let server_public = decode("serverPublic", &info.server_public)?;
    let client_proof = client
        .process_challenge(&salt, &server_public, password)
        .map_err(protocol)?;

    let response = api
        .authenticate(
            &info.session_id,
            &b64_encode(&client_public),
            &b64_encode(&client_proof),
        )
        .await
        .inspect_err(|e| warn!(identity, error = %e, "server rejected login"))?;

    let server_proof = decode("serverProof", &response.server_proof)?;
    let Some(shared_key) = client.verify_server(&server_proof).map_err(protocol)? else {
        warn!(identity, "server proof mismatch");
        return Err(DriveError::Protocol(
            "server could not prove knowledge of the verifier".into(),
        ));
    };

    info!(identity, session_id = %response.session_id, "authenticated");
    Ok(AuthSession {
        session_id: response.session_id,
        shared_key,
    })
}

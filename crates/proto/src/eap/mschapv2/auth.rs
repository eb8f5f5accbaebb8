//! MSCHAPv2 authentication primitives (RFC 2759 Section 8, RFC 3079
//! Section 3.4)
//!
//! Pure functions over usernames, passwords and challenges. Usernames are
//! ASCII; passwords are hashed in their UTF-16LE encoding.

use crate::ike::{Error, Result};
use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use md4::Md4;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Authenticator/peer challenge length
pub const CHALLENGE_LEN: usize = 16;
/// NT-Response length
pub const NT_RESPONSE_LEN: usize = 24;
/// Password hash length
pub const PASSWORD_HASH_LEN: usize = 16;
/// Length of the "S=..." authenticator response string
pub const AUTHENTICATOR_RESPONSE_LEN: usize = 42;
/// Exported MSK/EMSK length
pub const SESSION_KEY_LEN: usize = 64;

const MAGIC_SERVER_TO_CLIENT: &[u8] = b"Magic server to client signing constant";
const MAGIC_PAD: &[u8] = b"Pad to make it do more than one iteration";

const MAGIC_MASTER_KEY: &[u8] = b"This is the MPPE Master Key";
const MAGIC_CLIENT_SEND: &[u8] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";
const MAGIC_CLIENT_RECEIVE: &[u8] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";

const SHS_PAD1: [u8; 40] = [0x00; 40];
const SHS_PAD2: [u8; 40] = [0xF2; 40];

/// Encode a username for hashing; rejects non-ASCII.
pub fn username_to_bytes(username: &str) -> Result<Vec<u8>> {
    if !username.is_ascii() {
        return Err(Error::InvalidParameter(
            "MSCHAPv2 username must be ASCII".into(),
        ));
    }
    Ok(username.as_bytes().to_vec())
}

/// Encode a password as UTF-16LE for hashing.
pub fn password_to_bytes(password: &str) -> Vec<u8> {
    password
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// NtPasswordHash: MD4 over the UTF-16LE password (RFC 2759 Section 8.3).
pub fn nt_password_hash(password: &str) -> [u8; PASSWORD_HASH_LEN] {
    let mut hasher = Md4::new();
    hasher.update(password_to_bytes(password));
    hasher.finalize().into()
}

/// HashNtPasswordHash: MD4 over a password hash (RFC 2759 Section 8.4).
pub fn hash_nt_password_hash(
    password_hash: &[u8; PASSWORD_HASH_LEN],
) -> [u8; PASSWORD_HASH_LEN] {
    let mut hasher = Md4::new();
    hasher.update(password_hash);
    hasher.finalize().into()
}

/// ChallengeHash: first 8 bytes of SHA-1 over peer challenge, authenticator
/// challenge and the bare username (RFC 2759 Section 8.2).
///
/// Any prepended `DOMAIN\` portion of the username is excluded.
pub fn challenge_hash(
    peer_challenge: &[u8; CHALLENGE_LEN],
    authenticator_challenge: &[u8; CHALLENGE_LEN],
    username: &str,
) -> Result<[u8; 8]> {
    let bare = username.rsplit('\\').next().unwrap_or(username);

    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(authenticator_challenge);
    hasher.update(username_to_bytes(bare)?);

    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    Ok(out)
}

/// Expand a 7-byte key to an 8-byte DES key by spreading the 56 key bits
/// across the high 7 bits of each output byte. DES ignores the parity bit.
fn expand_des_key(key7: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    let mut next = 0u8;
    for i in 0..7 {
        out[i] = (key7[i] >> i) | next | 1;
        next = key7[i] << (7 - i);
    }
    out[7] = next | 1;
    out
}

fn des_encrypt_block(key7: &[u8], block: &[u8; 8]) -> [u8; 8] {
    let key = expand_des_key(key7);
    let cipher = Des::new_from_slice(&key).expect("DES key is 8 bytes");
    let mut out = (*block).into();
    cipher.encrypt_block(&mut out);
    out.into()
}

/// ChallengeResponse: three DES-ECB encryptions of the 8-byte challenge
/// under keys carved from the zero-padded password hash (RFC 2759
/// Section 8.5).
pub fn challenge_response(
    challenge: &[u8; 8],
    password_hash: &[u8; PASSWORD_HASH_LEN],
) -> [u8; NT_RESPONSE_LEN] {
    let mut z_password_hash = [0u8; 21];
    z_password_hash[..PASSWORD_HASH_LEN].copy_from_slice(password_hash);

    let mut response = [0u8; NT_RESPONSE_LEN];
    for i in 0..3 {
        let block = des_encrypt_block(&z_password_hash[i * 7..(i + 1) * 7], challenge);
        response[i * 8..(i + 1) * 8].copy_from_slice(&block);
    }
    response
}

/// GenerateNtResponse (RFC 2759 Section 8.1).
pub fn generate_nt_response(
    authenticator_challenge: &[u8; CHALLENGE_LEN],
    peer_challenge: &[u8; CHALLENGE_LEN],
    username: &str,
    password: &str,
) -> Result<[u8; NT_RESPONSE_LEN]> {
    let challenge = challenge_hash(peer_challenge, authenticator_challenge, username)?;
    let password_hash = nt_password_hash(password);
    Ok(challenge_response(&challenge, &password_hash))
}

/// GenerateAuthenticatorResponse (RFC 2759 Section 8.7).
///
/// Returns the 42-character `"S=<40 uppercase hex>"` string the server
/// must present in its Success request.
pub fn generate_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
    peer_challenge: &[u8; CHALLENGE_LEN],
    authenticator_challenge: &[u8; CHALLENGE_LEN],
    username: &str,
) -> Result<String> {
    let password_hash = nt_password_hash(password);
    let password_hash_hash = hash_nt_password_hash(&password_hash);

    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MAGIC_SERVER_TO_CLIENT);
    let digest = hasher.finalize();

    let challenge = challenge_hash(peer_challenge, authenticator_challenge, username)?;

    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(challenge);
    hasher.update(MAGIC_PAD);
    let response = hasher.finalize();

    Ok(format!("S={}", hex::encode_upper(response)))
}

/// CheckAuthenticatorResponse: recompute and compare in constant time.
pub fn check_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
    peer_challenge: &[u8; CHALLENGE_LEN],
    authenticator_challenge: &[u8; CHALLENGE_LEN],
    username: &str,
    received_response: &str,
) -> Result<bool> {
    let expected = generate_authenticator_response(
        password,
        nt_response,
        peer_challenge,
        authenticator_challenge,
        username,
    )?;

    let expected = expected.as_bytes();
    let received = received_response.as_bytes();
    if expected.len() != received.len() {
        return Ok(false);
    }
    Ok(expected.ct_eq(received).unwrap_u8() == 1)
}

fn get_master_key(
    password_hash_hash: &[u8; PASSWORD_HASH_LEN],
    nt_response: &[u8; NT_RESPONSE_LEN],
) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MAGIC_MASTER_KEY);

    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn get_asymmetric_start_key(master_key: &[u8; 16], magic: &[u8]) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(master_key);
    hasher.update(SHS_PAD1);
    hasher.update(magic);
    hasher.update(SHS_PAD2);

    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// Derive the exported MSK and EMSK (draft-kamath Section 4, RFC 3079
/// Section 3.4).
///
/// MSK = MasterReceiveKey ‖ MasterSendKey ‖ 32 zero bytes; the EMSK is all
/// zeroes.
pub fn derive_session_keys(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
) -> (Vec<u8>, Vec<u8>) {
    let password_hash = nt_password_hash(password);
    let password_hash_hash = hash_nt_password_hash(&password_hash);
    let master_key = get_master_key(&password_hash_hash, nt_response);

    let receive_key = get_asymmetric_start_key(&master_key, MAGIC_CLIENT_RECEIVE);
    let send_key = get_asymmetric_start_key(&master_key, MAGIC_CLIENT_SEND);

    let mut msk = Vec::with_capacity(SESSION_KEY_LEN);
    msk.extend_from_slice(&receive_key);
    msk.extend_from_slice(&send_key);
    msk.resize(SESSION_KEY_LEN, 0);

    (msk, vec![0u8; SESSION_KEY_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from RFC 2759 Section 9.2
    const USERNAME: &str = "User";
    const PASSWORD: &str = "clientPass";

    fn auth_challenge() -> [u8; 16] {
        hex::decode("5B5D7C7D7B3F2F3E3C2C602132262628")
            .unwrap()
            .try_into()
            .unwrap()
    }

    fn peer_challenge() -> [u8; 16] {
        hex::decode("21402324255E262A28295F2B3A337C7E")
            .unwrap()
            .try_into()
            .unwrap()
    }

    fn nt_response() -> [u8; 24] {
        hex::decode("82309ECD8D708B5EA08FAA3981CD83544233114A3D85D6DF")
            .unwrap()
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_username_to_bytes() {
        assert_eq!(username_to_bytes(USERNAME).unwrap(), b"User".to_vec());
        assert!(username_to_bytes("Üser").is_err());
    }

    #[test]
    fn test_password_to_bytes() {
        assert_eq!(
            password_to_bytes(PASSWORD),
            hex::decode("63006C00690065006E0074005000610073007300").unwrap()
        );
    }

    #[test]
    fn test_nt_password_hash() {
        assert_eq!(
            nt_password_hash(PASSWORD).to_vec(),
            hex::decode("44EBBA8D5312B8D611474411F56989AE").unwrap()
        );
    }

    #[test]
    fn test_hash_nt_password_hash() {
        let hash = nt_password_hash(PASSWORD);
        assert_eq!(
            hash_nt_password_hash(&hash).to_vec(),
            hex::decode("41C00C584BD2D91C4017A2A12FA59F3F").unwrap()
        );
    }

    #[test]
    fn test_challenge_hash() {
        let challenge =
            challenge_hash(&peer_challenge(), &auth_challenge(), USERNAME).unwrap();
        assert_eq!(challenge.to_vec(), hex::decode("D02E4386BCE91226").unwrap());
    }

    #[test]
    fn test_challenge_hash_strips_domain() {
        let bare = challenge_hash(&peer_challenge(), &auth_challenge(), USERNAME).unwrap();
        let domained =
            challenge_hash(&peer_challenge(), &auth_challenge(), "BIGCO\\User").unwrap();
        assert_eq!(bare, domained);
    }

    #[test]
    fn test_challenge_response() {
        let challenge: [u8; 8] = hex::decode("D02E4386BCE91226").unwrap().try_into().unwrap();
        let password_hash = nt_password_hash(PASSWORD);
        assert_eq!(
            challenge_response(&challenge, &password_hash),
            nt_response()
        );
    }

    #[test]
    fn test_generate_nt_response() {
        let response =
            generate_nt_response(&auth_challenge(), &peer_challenge(), USERNAME, PASSWORD)
                .unwrap();
        assert_eq!(response, nt_response());
    }

    #[test]
    fn test_generate_authenticator_response() {
        let response = generate_authenticator_response(
            PASSWORD,
            &nt_response(),
            &peer_challenge(),
            &auth_challenge(),
            USERNAME,
        )
        .unwrap();
        assert_eq!(response, "S=407A5589115FD0D6209F510FE9C04566932CDA56");
    }

    #[test]
    fn test_check_authenticator_response() {
        assert!(check_authenticator_response(
            PASSWORD,
            &nt_response(),
            &peer_challenge(),
            &auth_challenge(),
            USERNAME,
            "S=407A5589115FD0D6209F510FE9C04566932CDA56",
        )
        .unwrap());

        assert!(!check_authenticator_response(
            PASSWORD,
            &nt_response(),
            &peer_challenge(),
            &auth_challenge(),
            USERNAME,
            "S=407A5589115FD0D6209F510FE9C04566932CDA57",
        )
        .unwrap());

        // Wrong length never matches
        assert!(!check_authenticator_response(
            PASSWORD,
            &nt_response(),
            &peer_challenge(),
            &auth_challenge(),
            USERNAME,
            "S=SHORT",
        )
        .unwrap());
    }

    #[test]
    fn test_session_keys() {
        let (msk, emsk) = derive_session_keys(PASSWORD, &nt_response());
        assert_eq!(msk.len(), SESSION_KEY_LEN);
        assert_eq!(emsk, vec![0u8; SESSION_KEY_LEN]);

        // Padding occupies the second half of the MSK
        assert_eq!(&msk[32..], &[0u8; 32]);
        assert_ne!(&msk[..16], &msk[16..32]);
    }
}

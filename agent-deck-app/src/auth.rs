use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey};
use agent_deck_policy::{Allowlist, AllowlistEntry};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const AUTH_BANNER: &str = "deck-auth v1";
const MAX_RESPONSE_BYTES: usize = 512;

/// Key-based authentication: the server challenges with a random nonce,
/// the client answers `<user> <base64 signature over the nonce>`, and the
/// signature is checked against the allowlist entry whose user matches.
/// Any failure closes the connection with no session and no audit entry.
pub async fn authenticate<S>(stream: &mut S, allowlist: &Allowlist) -> Result<AllowlistEntry>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce: [u8; 32] = rand::random();
    let challenge = format!("{AUTH_BANNER} {}\n", BASE64.encode(nonce));
    stream
        .write_all(challenge.as_bytes())
        .await
        .context("failed to send challenge")?;

    let line = read_line_bounded(stream, MAX_RESPONSE_BYTES)
        .await
        .context("failed to read auth response")?;
    let (user, signature_b64) = line
        .trim()
        .split_once(' ')
        .context("malformed auth response")?;

    let entry = allowlist
        .lookup(user)
        .with_context(|| format!("unknown user '{user}'"))?;

    let signature_bytes = BASE64
        .decode(signature_b64)
        .context("signature is not valid base64")?;
    let signature =
        Signature::from_slice(&signature_bytes).context("signature has wrong length")?;

    entry
        .verifying_key()
        .context("allowlist key unusable")?
        .verify_strict(&nonce, &signature)
        .context("signature verification failed")?;

    Ok(entry.clone())
}

/// Client-side half of the handshake: turns a received challenge line into
/// the response line. Used by tests and by out-of-tree clients.
pub fn answer_challenge(user: &str, key: &SigningKey, challenge_line: &str) -> Result<String> {
    let rest = challenge_line
        .trim()
        .strip_prefix(AUTH_BANNER)
        .context("unexpected challenge banner")?;
    let nonce = BASE64
        .decode(rest.trim())
        .context("challenge nonce is not valid base64")?;
    if nonce.len() != 32 {
        bail!("challenge nonce has wrong length");
    }
    let signature = key.sign(&nonce);
    Ok(format!("{user} {}\n", BASE64.encode(signature.to_bytes())))
}

async fn read_line_bounded<S: AsyncRead + Unpin>(stream: &mut S, max: usize) -> Result<String> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            bail!("connection closed during handshake");
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > max {
            bail!("auth response too long");
        }
    }
    String::from_utf8(line).context("auth response is not UTF-8")
}

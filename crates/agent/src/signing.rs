use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

use agent_protocol::{codec, CommandFrame, COMMAND_TAG};

/// Oldest accepted message age before replay protection rejects it.
pub const MAX_MESSAGE_AGE_SECS: i64 = 300;
/// Tolerated forward clock skew.
pub const MAX_CLOCK_SKEW_SECS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed command frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message signature is missing")]
    MissingSignature,
    #[error("message timestamp is missing")]
    MissingTimestamp,
    #[error("message nonce is missing")]
    MissingNonce,
    #[error("invalid timestamp format: {0}")]
    BadTimestamp(#[from] chrono::ParseError),
    #[error("message timestamp is in the future")]
    MessageFromFuture,
    #[error("message has expired (replay protection)")]
    MessageExpired,
    #[error("message signature is invalid")]
    InvalidSignature,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("public key is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("public key must decode to {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
    #[error("public key is not a valid Ed25519 point")]
    Invalid(#[from] ed25519_dalek::SignatureError),
}

/// Verifies detached Ed25519 signatures on command frames. Without a
/// configured public key the verifier is disabled and parses commands
/// without verification; that is an operator decision for local testing,
/// not a fallback taken on failure.
pub struct Verifier {
    key: Option<VerifyingKey>,
}

impl Verifier {
    pub fn new(public_key_base64: Option<&str>) -> Result<Self, KeyError> {
        let Some(encoded) = public_key_base64.filter(|key| !key.is_empty()) else {
            return Ok(Self { key: None });
        };

        let bytes = BASE64.decode(encoded)?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Length { expected: 32, got: len })?;
        let key = VerifyingKey::from_bytes(&bytes)?;
        Ok(Self { key: Some(key) })
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn verify_command(&self, data: &[u8]) -> Result<CommandFrame, VerifyError> {
        let cmd = codec::parse_command(data)?;

        let Some(key) = &self.key else {
            return Ok(cmd);
        };

        if cmd.signature.is_empty() {
            return Err(VerifyError::MissingSignature);
        }
        if cmd.timestamp.is_empty() {
            return Err(VerifyError::MissingTimestamp);
        }
        if cmd.nonce.is_empty() {
            return Err(VerifyError::MissingNonce);
        }

        validate_timestamp(&cmd.timestamp, Utc::now())?;

        let signature = BASE64
            .decode(&cmd.signature)
            .map_err(|_| VerifyError::InvalidSignature)?;
        let signature: [u8; 64] = signature
            .as_slice()
            .try_into()
            .map_err(|_| VerifyError::InvalidSignature)?;
        let signature = Signature::from_bytes(&signature);

        let canonical = canonical_message(&cmd);
        key.verify(canonical.as_bytes(), &signature)
            .map_err(|_| VerifyError::InvalidSignature)?;

        Ok(cmd)
    }
}

fn validate_timestamp(timestamp: &str, now: DateTime<Utc>) -> Result<(), VerifyError> {
    let message_time = DateTime::parse_from_rfc3339(timestamp)?.with_timezone(&Utc);
    let age = now.signed_duration_since(message_time);

    if age < Duration::seconds(-MAX_CLOCK_SKEW_SECS) {
        return Err(VerifyError::MessageFromFuture);
    }
    if age > Duration::seconds(MAX_MESSAGE_AGE_SECS) {
        return Err(VerifyError::MessageExpired);
    }
    Ok(())
}

/// Deterministic byte string signed by the orchestrator. Built from sorted
/// `key=value` lines so the result is independent of JSON key ordering and
/// whitespace; any mutation of a signed field changes the canonical bytes.
pub fn canonical_message(cmd: &CommandFrame) -> String {
    let mut parts = vec![
        format!("command={}", cmd.command),
        format!("id={}", cmd.id),
        format!("nonce={}", cmd.nonce),
        format!("timestamp={}", cmd.timestamp),
        format!("type={COMMAND_TAG}"),
    ];

    if let Some(dir) = cmd.working_dir.as_deref().filter(|dir| !dir.is_empty()) {
        parts.push(format!("working_dir={dir}"));
    }
    if cmd.timeout > 0 {
        parts.push(format!("timeout={}", cmd.timeout));
    }
    for (name, value) in &cmd.env {
        parts.push(format!("env.{name}={value}"));
    }

    parts.sort();
    parts.join("\n")
}

/// Signing counterpart, kept for key tooling and tests.
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn from_base64(private_key_base64: &str) -> Result<Self, KeyError> {
        let bytes = BASE64.decode(private_key_base64)?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Length { expected: 32, got: len })?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.key.verifying_key().to_bytes())
    }

    pub fn sign_command(&self, cmd: &mut CommandFrame) {
        let canonical = canonical_message(cmd);
        let signature = self.key.sign(canonical.as_bytes());
        cmd.signature = BASE64.encode(signature.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn signer() -> Signer {
        Signer::new(SigningKey::from_bytes(&rand::random::<[u8; 32]>()))
    }

    fn verifier_for(signer: &Signer) -> Verifier {
        Verifier::new(Some(&signer.public_key_base64())).expect("verifier")
    }

    fn signed_command(signer: &Signer) -> CommandFrame {
        let mut cmd = CommandFrame {
            id: "c1".to_string(),
            command: "echo hi".to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: 0,
            timestamp: Utc::now().to_rfc3339(),
            nonce: "n1".to_string(),
            signature: String::new(),
        };
        signer.sign_command(&mut cmd);
        cmd
    }

    #[test]
    fn accepts_valid_signature() {
        let signer = signer();
        let cmd = signed_command(&signer);
        let raw = serde_json::json!({
            "type": "command",
            "id": cmd.id,
            "command": cmd.command,
            "timestamp": cmd.timestamp,
            "nonce": cmd.nonce,
            "signature": cmd.signature,
        });
        let verified = verifier_for(&signer)
            .verify_command(raw.to_string().as_bytes())
            .expect("verify");
        assert_eq!(verified.command, "echo hi");
    }

    #[test]
    fn rejects_mutated_command_body() {
        let signer = signer();
        let cmd = signed_command(&signer);
        let raw = serde_json::json!({
            "type": "command",
            "id": cmd.id,
            "command": "rm -rf /",
            "timestamp": cmd.timestamp,
            "nonce": cmd.nonce,
            "signature": cmd.signature,
        });
        let err = verifier_for(&signer)
            .verify_command(raw.to_string().as_bytes())
            .expect_err("must reject");
        assert!(matches!(err, VerifyError::InvalidSignature));
    }

    #[test]
    fn rejects_mutated_env() {
        let signer = signer();
        let mut cmd = signed_command(&signer);
        cmd.env
            .insert("LD_AUDIT".to_string(), "/tmp/evil.so".to_string());
        let raw = serde_json::to_vec(&cmd).expect("serialize");
        let err = verifier_for(&signer)
            .verify_command(&raw)
            .expect_err("must reject");
        assert!(matches!(err, VerifyError::InvalidSignature));
    }

    #[test]
    fn missing_fields_have_distinct_errors() {
        let signer = signer();
        let verifier = verifier_for(&signer);
        let mut cmd = signed_command(&signer);

        let mut unsigned = cmd.clone();
        unsigned.signature = String::new();
        let raw = serde_json::to_vec(&unsigned).expect("serialize");
        assert!(matches!(
            verifier.verify_command(&raw),
            Err(VerifyError::MissingSignature)
        ));

        cmd.timestamp = String::new();
        let raw = serde_json::to_vec(&cmd).expect("serialize");
        assert!(matches!(
            verifier.verify_command(&raw),
            Err(VerifyError::MissingTimestamp)
        ));

        cmd.timestamp = Utc::now().to_rfc3339();
        cmd.nonce = String::new();
        let raw = serde_json::to_vec(&cmd).expect("serialize");
        assert!(matches!(
            verifier.verify_command(&raw),
            Err(VerifyError::MissingNonce)
        ));
    }

    #[test]
    fn timestamp_window_boundaries() {
        let now = Utc::now();
        let ok_past = (now - Duration::seconds(MAX_MESSAGE_AGE_SECS - 1)).to_rfc3339();
        let expired = (now - Duration::seconds(MAX_MESSAGE_AGE_SECS + 1)).to_rfc3339();
        let ok_future = (now + Duration::seconds(MAX_CLOCK_SKEW_SECS - 1)).to_rfc3339();
        let from_future = (now + Duration::seconds(MAX_CLOCK_SKEW_SECS + 2)).to_rfc3339();

        assert!(validate_timestamp(&ok_past, now).is_ok());
        assert!(matches!(
            validate_timestamp(&expired, now),
            Err(VerifyError::MessageExpired)
        ));
        assert!(validate_timestamp(&ok_future, now).is_ok());
        assert!(matches!(
            validate_timestamp(&from_future, now),
            Err(VerifyError::MessageFromFuture)
        ));
    }

    #[test]
    fn canonical_message_is_order_independent() {
        let mut cmd = CommandFrame {
            id: "c1".to_string(),
            command: "ls".to_string(),
            working_dir: Some("/srv/app".to_string()),
            env: BTreeMap::new(),
            timeout: 60,
            timestamp: "2026-01-13T17:52:46Z".to_string(),
            nonce: "n".to_string(),
            signature: String::new(),
        };
        cmd.env.insert("B_VAR".to_string(), "2".to_string());
        cmd.env.insert("A_VAR".to_string(), "1".to_string());
        let first = canonical_message(&cmd);

        // Re-insert in the opposite order; the canonical bytes must not move.
        let mut reordered = cmd.clone();
        reordered.env.clear();
        reordered.env.insert("A_VAR".to_string(), "1".to_string());
        reordered.env.insert("B_VAR".to_string(), "2".to_string());
        assert_eq!(first, canonical_message(&reordered));

        assert!(first.contains("env.A_VAR=1"));
        assert!(first.contains("working_dir=/srv/app"));
        assert!(first.contains("timeout=60"));
    }

    #[test]
    fn disabled_verifier_parses_without_checking() {
        let verifier = Verifier::new(None).expect("verifier");
        assert!(!verifier.is_enabled());
        let cmd = verifier
            .verify_command(br#"{"type":"command","id":"c1","command":"ls"}"#)
            .expect("parse");
        assert_eq!(cmd.command, "ls");
    }

    #[test]
    fn garbage_signature_is_invalid() {
        let signer = signer();
        let mut cmd = signed_command(&signer);
        cmd.signature = "AAAA".to_string();
        let raw = serde_json::to_vec(&cmd).expect("serialize");
        assert!(matches!(
            verifier_for(&signer).verify_command(&raw),
            Err(VerifyError::InvalidSignature)
        ));
    }
}

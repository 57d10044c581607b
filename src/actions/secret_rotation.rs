use async_trait::async_trait;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::{Action, ExecutionContext, ExecutionResult, RevealedSecret};
use crate::errors::AppError;
use crate::models::payload::SecretRotationDetails;

pub const GENERATED_FORMAT: &str = "base64_32_bytes";

const SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct SecretRotationParams {
    #[serde(default)]
    pub secret_name: String,
}

/// Rotates one of the platform's signing/encryption secrets.
///
/// The new value is generated at execution time and returned once. Only its
/// SHA-256 fingerprint is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretRotation;

/// Canonical secret name and the env var that carries it.
pub fn normalize_secret_name(raw: &str) -> Result<(&'static str, &'static str), AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "jwt" | "jwt_secret" | "jwt_signing" => Ok(("jwt", "JWT_SECRETS")),
        "data_encryption" | "data_encryption_key" | "encryption" | "data_key" => {
            Ok(("data_encryption", "DATA_ENCRYPTION_KEYS"))
        }
        _ => Err(AppError::InvalidSecretName(raw.trim().to_string())),
    }
}

/// 32 random bytes from the OS RNG: (standard base64, hex SHA-256 of the raw bytes).
pub fn generate_secret() -> (RevealedSecret, String) {
    let mut raw = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut raw);
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    let fingerprint = hex::encode(Sha256::digest(raw));
    raw.zeroize();
    (RevealedSecret::new(encoded), fingerprint)
}

fn operator_instructions(secret_name: &str, env_var: &str) -> Vec<String> {
    let mut steps = vec![
        format!(
            "Update the backend environment variable {} to start with this new secret (keep previous secrets for a grace window).",
            env_var
        ),
        "Redeploy the API service so the new environment configuration takes effect.".to_string(),
        format!(
            "After the grace window, remove old secrets from {} and redeploy again.",
            env_var
        ),
    ];
    if secret_name == "data_encryption" {
        steps.push(
            "Plan a controlled re-encryption job before removing old encryption keys.".to_string(),
        );
    }
    steps
}

#[async_trait]
impl Action for SecretRotation {
    type Params = SecretRotationParams;
    type Details = SecretRotationDetails;

    async fn validate_create(&self, params: Self::Params) -> Result<Self::Details, AppError> {
        let (secret_name, env_var) = normalize_secret_name(&params.secret_name)?;
        Ok(SecretRotationDetails {
            secret_name: secret_name.to_string(),
            env_var: env_var.to_string(),
            generated_format: None,
            generated_fingerprint: None,
        })
    }

    fn target_key(&self, details: &Self::Details) -> String {
        details.secret_name.clone()
    }

    fn confirmation_phrase(&self, details: &Self::Details) -> String {
        format!("ROTATE {}", details.secret_name.to_uppercase())
    }

    async fn execute(
        &self,
        details: &mut Self::Details,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionResult, AppError> {
        // Rows written outside this service may still carry an alias.
        let (secret_name, env_var) = normalize_secret_name(&details.secret_name)?;
        let (secret, fingerprint) = generate_secret();

        details.secret_name = secret_name.to_string();
        details.env_var = env_var.to_string();
        details.generated_format = Some(GENERATED_FORMAT.to_string());
        details.generated_fingerprint = Some(fingerprint.clone());

        tracing::info!(
            secret_name,
            fingerprint = %fingerprint,
            "generated rotated secret"
        );

        Ok(ExecutionResult::SecretRotated {
            secret_name: secret_name.to_string(),
            env_var: env_var.to_string(),
            generated_format: GENERATED_FORMAT.to_string(),
            generated_secret: secret,
            fingerprint,
            instructions: operator_instructions(secret_name, env_var),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_aliases_normalize() {
        for alias in ["jwt", "JWT_SECRET", " jwt_signing "] {
            assert_eq!(normalize_secret_name(alias).unwrap(), ("jwt", "JWT_SECRETS"));
        }
        for alias in ["data_encryption", "DATA_ENCRYPTION_KEY", "encryption", "data_key"] {
            assert_eq!(
                normalize_secret_name(alias).unwrap(),
                ("data_encryption", "DATA_ENCRYPTION_KEYS")
            );
        }
        assert!(matches!(
            normalize_secret_name("stripe_key"),
            Err(AppError::InvalidSecretName(_))
        ));
    }

    #[test]
    fn test_generated_secret_shape() {
        let (secret, fingerprint) = generate_secret();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(secret.expose())
            .unwrap();
        assert_eq!(raw.len(), SECRET_LEN);
        assert_eq!(fingerprint, hex::encode(Sha256::digest(&raw)));
        assert_eq!(fingerprint.len(), 64);

        let (other, _) = generate_secret();
        assert_ne!(secret, other);
    }

    #[tokio::test]
    async fn test_phrase_uses_canonical_name() {
        let d = SecretRotation
            .validate_create(SecretRotationParams {
                secret_name: "Encryption".into(),
            })
            .await
            .unwrap();
        assert_eq!(SecretRotation.target_key(&d), "data_encryption");
        assert_eq!(SecretRotation.confirmation_phrase(&d), "ROTATE DATA_ENCRYPTION");
        assert!(SecretRotation.cooldown(&d).is_none());
    }

    #[tokio::test]
    async fn test_execute_records_fingerprint_only() {
        let mut d = SecretRotation
            .validate_create(SecretRotationParams {
                secret_name: "data_key".into(),
            })
            .await
            .unwrap();
        let store = MemoryStore::new();
        let ctx = ExecutionContext {
            actor: "ops-2",
            now: Utc::now(),
            effects: &store,
        };
        let result = SecretRotation.execute(&mut d, &ctx).await.unwrap();
        match result {
            ExecutionResult::SecretRotated {
                generated_secret,
                fingerprint,
                instructions,
                ..
            } => {
                assert_eq!(d.generated_fingerprint.as_deref(), Some(fingerprint.as_str()));
                assert_eq!(d.generated_format.as_deref(), Some(GENERATED_FORMAT));
                let stored = serde_json::to_string(&d).unwrap();
                assert!(!stored.contains(generated_secret.expose()));
                assert_eq!(instructions.len(), 4);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

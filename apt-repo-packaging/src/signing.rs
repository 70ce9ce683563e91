// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PGP signing and verification of `Release` manifests.

A distribution's `Release` file is published two ways: clear-signed as `InRelease`, and
alongside a detached signature as `Release` + `Release.gpg`. Both signatures are produced
from the same secret key and self-verified immediately after signing, mirroring the
import/sign/verify lifecycle of the GPG-backed reference implementation this crate's
[SigningKeys] type replaces.
*/

use crate::error::{PackagingError, Result, SigningOperation};
use pgp::composed::{
    CleartextSignedMessage, Deserializable, SignedPublicKey, SignedSecretKey, StandaloneSignature,
};
use pgp::crypto::hash::HashAlgorithm;
use std::io::Cursor;

/// A loaded PGP secret/public key pair used to sign repository metadata.
///
/// Constructed once at server startup (see the reference implementation's
/// `RepositorySigner.initialize()`) and then reused for every rebuild.
pub struct SigningKeys {
    secret_key: SignedSecretKey,
    public_key: SignedPublicKey,
    passphrase: String,
}

impl SigningKeys {
    /// Load an ASCII-armored secret key and derive its public key, verifying both parse and
    /// self-verify cleanly before the key is accepted for use.
    pub fn load(armored_secret_key: &str, passphrase: impl Into<String>) -> Result<Self> {
        let (secret_key, _headers) = SignedSecretKey::from_string(armored_secret_key)
            .map_err(|e| PackagingError::Signing {
                operation: SigningOperation::Import,
                detail: e.to_string(),
            })?;
        secret_key.verify().map_err(|e| PackagingError::Signing {
            operation: SigningOperation::Import,
            detail: e.to_string(),
        })?;

        let public_key = secret_key.public_key().sign(&secret_key, || String::new())?;
        public_key.verify().map_err(|e| PackagingError::Signing {
            operation: SigningOperation::Import,
            detail: e.to_string(),
        })?;

        Ok(Self {
            secret_key,
            public_key,
            passphrase: passphrase.into(),
        })
    }

    /// The fingerprint of the loaded secret key, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.secret_key.fingerprint())
    }

    /// The key id clients should be told to trust (`SignWith:` in the reference implementation).
    pub fn key_id_hex(&self) -> String {
        hex::encode(self.secret_key.key_id())
    }

    /// ASCII-armored public key, suitable for publishing alongside the repository.
    pub fn armored_public_key(&self) -> Result<String> {
        Ok(self.public_key.to_armored_string(None.into())?)
    }

    /// Produce the `InRelease` clear-signed document for `release_contents`, self-verifying the
    /// signature before returning it.
    pub fn clearsign(&self, release_contents: &str) -> Result<String> {
        let message = CleartextSignedMessage::sign(
            Cursor::new(release_contents.as_bytes()),
            &self.secret_key,
            || self.passphrase.clone(),
        )
        .map_err(|e| PackagingError::Signing {
            operation: SigningOperation::Sign,
            detail: e.to_string(),
        })?;

        message.verify(&self.public_key).map_err(|e| PackagingError::Signing {
            operation: SigningOperation::Verify,
            detail: e.to_string(),
        })?;

        Ok(message.to_armored_string(None.into())?)
    }

    /// Produce the detached `Release.gpg` signature over `release_contents`, self-verifying it
    /// before returning it.
    pub fn detach_sign(&self, release_contents: &str) -> Result<String> {
        let signature = StandaloneSignature::sign(
            Cursor::new(release_contents.as_bytes()),
            &self.secret_key,
            HashAlgorithm::SHA2_256,
            || self.passphrase.clone(),
        )
        .map_err(|e| PackagingError::Signing {
            operation: SigningOperation::Sign,
            detail: e.to_string(),
        })?;

        signature
            .verify(&self.public_key, release_contents.as_bytes())
            .map_err(|e| PackagingError::Signing {
                operation: SigningOperation::Verify,
                detail: e.to_string(),
            })?;

        Ok(signature.to_armored_string(None.into())?)
    }
}

/// Verify a clear-signed `InRelease` document against `public_key`, returning the embedded text.
///
/// Exposed primarily for tests and for any tooling that wants to validate a published
/// repository without holding the private key.
pub fn verify_clearsigned(armored: &str, public_key: &SignedPublicKey) -> Result<String> {
    let (message, _headers) =
        CleartextSignedMessage::from_string(armored).map_err(|e| PackagingError::Signing {
            operation: SigningOperation::Verify,
            detail: e.to_string(),
        })?;
    message.verify(public_key).map_err(|e| PackagingError::Signing {
        operation: SigningOperation::Verify,
        detail: e.to_string(),
    })?;
    Ok(message.text().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use debian_packaging_test_support::generate_test_key;

    mod debian_packaging_test_support {
        use pgp::composed::{KeyType, SecretKeyParamsBuilder};
        use pgp::crypto::sym::SymmetricKeyAlgorithm;
        use pgp::types::CompressionAlgorithm;
        use smallvec::smallvec;

        /// Generate a small, fast (for tests only) RSA key pair and return it armored.
        pub fn generate_test_key() -> (String, String) {
            let mut builder = SecretKeyParamsBuilder::default();
            builder
                .key_type(KeyType::Rsa(2048))
                .can_sign(true)
                .can_create_certificates(false)
                .primary_user_id("Test Key <test@example.com>".into())
                .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
                .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB]);
            let params = builder.build().expect("valid key params");
            let secret_key = params.generate().expect("key generation");
            let signed_secret = secret_key.sign(|| String::new()).expect("self sign");
            let armored = signed_secret.to_armored_string(None.into()).expect("armor");
            (armored, String::new())
        }
    }

    #[test]
    fn clearsign_round_trips() {
        let (armored_secret, passphrase) = generate_test_key();
        let keys = SigningKeys::load(&armored_secret, passphrase).unwrap();

        let clearsigned = keys.clearsign("Codename: trixie\n").unwrap();
        assert!(clearsigned.starts_with("-----BEGIN PGP SIGNED MESSAGE-----"));

        let recovered = verify_clearsigned(&clearsigned, &keys.public_key).unwrap();
        assert_eq!(recovered, "Codename: trixie\n");
    }

    #[test]
    fn detach_sign_round_trips() {
        let (armored_secret, passphrase) = generate_test_key();
        let keys = SigningKeys::load(&armored_secret, passphrase).unwrap();

        let detached = keys.detach_sign("Codename: trixie\n").unwrap();
        assert!(detached.starts_with("-----BEGIN PGP SIGNATURE-----"));

        let (signature, _headers) = StandaloneSignature::from_string(&detached).unwrap();
        signature
            .verify(&keys.public_key, "Codename: trixie\n".as_bytes())
            .unwrap();
    }

    #[test]
    fn detach_sign_rejects_tampered_content() {
        let (armored_secret, passphrase) = generate_test_key();
        let keys = SigningKeys::load(&armored_secret, passphrase).unwrap();

        let detached = keys.detach_sign("Codename: trixie\n").unwrap();
        let (signature, _headers) = StandaloneSignature::from_string(&detached).unwrap();
        assert!(signature
            .verify(&keys.public_key, "Codename: forky\n".as_bytes())
            .is_err());
    }
}

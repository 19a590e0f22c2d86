//! Shared fixtures for unit tests.
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    transport::{clone_request, HttpRequest, HttpResponse},
    HttpTransport,
};

/// Transport that answers with queued responses and records every request.
/// Fails with a transport error once the queue is empty.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub(crate) fn push(&self, response: HttpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn push_status(&self, status: u16, body: &str) -> &Self {
        let response = http::Response::builder()
            .status(status)
            .body(body.as_bytes().to_vec())
            .unwrap();
        self.push(response)
    }

    /// Queue a token endpoint response issuing `access_token`.
    pub(crate) fn push_token(&self, access_token: &str) -> &Self {
        let body = serde_json::json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 3600
        });
        self.push_status(200, &body.to_string())
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(clone_request)
            .collect()
    }

    /// Bodies of all recorded requests as text.
    pub(crate) fn bodies(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| String::from_utf8(r.body().clone()).unwrap())
            .collect()
    }

    /// `Authorization` headers of all recorded requests.
    pub(crate) fn authorization_headers(&self) -> Vec<Option<String>> {
        self.requests()
            .iter()
            .map(|r| {
                r.headers()
                    .get(http::header::AUTHORIZATION)
                    .map(|h| h.to_str().unwrap().to_string())
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.responses.lock().unwrap().pop_front();
        response.ok_or_else(|| {
            Error::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no scripted response left",
            ))
        })
    }
}

/// Write `contents` to a uniquely named file in the temp directory.
pub(crate) fn write_temp_file(name: &str, contents: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = std::env::temp_dir().join(format!(
        "oauth2-middleware-{}-{nanos}-{name}",
        std::process::id()
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

#[cfg(feature = "jwt-bearer")]
pub(crate) use keys::*;

#[cfg(feature = "jwt-bearer")]
mod keys {
    use std::sync::OnceLock;

    use pkcs8::{pkcs5::pbes2, EncodePrivateKey, EncodePublicKey, LineEnding, PrivateKeyInfo};
    use rand::Rng;
    use rsa::RsaPrivateKey;

    pub(crate) const PASSPHRASE: &str = "testpassword";

    /// A freshly generated RSA key pair in PEM form.
    pub(crate) struct TestKey {
        pub(crate) private_pem: String,
        pub(crate) encrypted_pem: String,
        pub(crate) public_pem: String,
    }

    impl TestKey {
        fn generate() -> Self {
            let mut rng = rand::thread_rng();
            let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();

            let private_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();

            // PBKDF2 instead of the default scrypt keeps decryption fast in tests.
            let salt: [u8; 16] = rng.gen();
            let iv: [u8; 16] = rng.gen();
            let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &salt, &iv).unwrap();
            let der = key.to_pkcs8_der().unwrap();
            let encrypted_pem = PrivateKeyInfo::try_from(der.as_bytes())
                .unwrap()
                .encrypt_with_params(params, PASSPHRASE)
                .unwrap()
                .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
                .unwrap()
                .to_string();

            let public_pem = key
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .unwrap();

            Self {
                private_pem,
                encrypted_pem,
                public_pem,
            }
        }
    }

    pub(crate) fn test_key() -> &'static TestKey {
        static KEY: OnceLock<TestKey> = OnceLock::new();
        KEY.get_or_init(TestKey::generate)
    }

    /// A second key pair, unrelated to [`test_key`].
    pub(crate) fn other_test_key() -> &'static TestKey {
        static KEY: OnceLock<TestKey> = OnceLock::new();
        KEY.get_or_init(TestKey::generate)
    }
}

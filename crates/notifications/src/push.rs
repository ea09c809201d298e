//! Web Push delivery: VAPID authentication (RFC 8292) and `aes128gcm`
//! payload encryption (RFC 8291) of messages sent to browser push services.

use super::{DeliveryOutcome, PushDelivery, PushPayload};
use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use ring::{aead, agreement, hkdf};

/// Record size advertised in the `aes128gcm` header. Payloads are always
/// encrypted as a single record, so this bounds the payload size.
const RECORD_SIZE: u32 = 4096;
/// Length of an uncompressed P-256 public key.
const P256_PUBLIC_KEY_LEN: usize = 65;
/// Length of a P-256 private scalar.
const P256_PRIVATE_KEY_LEN: usize = 32;
/// Length of the user agent's authentication secret.
const AUTH_SECRET_LEN: usize = 16;
/// Salt, record size, key id length and key id which precede the record.
const HEADER_LEN: usize = 16 + 4 + 1 + P256_PUBLIC_KEY_LEN;
/// Largest plaintext whose encrypted body fits within RECORD_SIZE,
/// after the header, the padding delimiter and the AEAD tag.
const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - HEADER_LEN - 1 - 16;
/// Lifetime of VAPID JWTs. Push services reject tokens valid for over 24h.
const VAPID_TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// PKCS#8 v1 framing of a P-256 ECPrivateKey, around its scalar and public key.
const P256_PKCS8_PREFIX: &[u8] = &[
    0x30, 0x81, 0x87, 0x02, 0x01, 0x00, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d,
    0x02, 0x01, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x04, 0x6d, 0x30,
    0x6b, 0x02, 0x01, 0x01, 0x04, 0x20,
];
const P256_PKCS8_PUBLIC_KEY_TAG: &[u8] = &[0xa1, 0x44, 0x03, 0x42, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum VapidError {
    #[error("invalid base64url encoding of VAPID {field} key")]
    Encoding {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("VAPID key pair was rejected: {0}")]
    Rejected(String),
    #[error("VAPID subject must be a mailto: or https: URI (got {0:?})")]
    Subject(String),
}

/// EncryptError separates unusable subscription keys from failures
/// to encrypt a particular message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum EncryptError {
    #[error("{0}")]
    Keys(String),
    #[error(transparent)]
    Message(#[from] anyhow::Error),
}

/// VapidKeys identify this application server to browser push services.
pub struct VapidKeys {
    encoding_key: jsonwebtoken::EncodingKey,
    public_key: Vec<u8>,
    subject: String,
}

impl std::fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key", &self.public_key())
            .field("subject", &self.subject)
            .finish()
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

impl VapidKeys {
    /// Load keys in the encoding used by web-push tooling: a base64url
    /// uncompressed public point, and a base64url raw private scalar.
    pub fn from_base64(
        public_key: &str,
        private_key: &str,
        subject: &str,
    ) -> Result<Self, VapidError> {
        let public_key = decode_base64url(public_key).map_err(|source| VapidError::Encoding {
            field: "public",
            source,
        })?;
        let private_key = decode_base64url(private_key).map_err(|source| VapidError::Encoding {
            field: "private",
            source,
        })?;

        if public_key.len() != P256_PUBLIC_KEY_LEN {
            return Err(VapidError::Rejected(format!(
                "public key must be {P256_PUBLIC_KEY_LEN} bytes (got {})",
                public_key.len()
            )));
        }
        if private_key.len() != P256_PRIVATE_KEY_LEN {
            return Err(VapidError::Rejected(format!(
                "private key must be {P256_PRIVATE_KEY_LEN} bytes (got {})",
                private_key.len()
            )));
        }

        let pkcs8 = [
            P256_PKCS8_PREFIX,
            &private_key,
            P256_PKCS8_PUBLIC_KEY_TAG,
            &public_key,
        ]
        .concat();

        Self::from_pkcs8(&pkcs8, subject)
    }

    /// Load keys from a PKCS#8 v1 or v2 document.
    pub fn from_pkcs8(pkcs8: &[u8], subject: &str) -> Result<Self, VapidError> {
        if !subject.starts_with("mailto:") && !subject.starts_with("https:") {
            return Err(VapidError::Subject(subject.to_string()));
        }

        // Parsing checks that the private and public keys belong together.
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &SystemRandom::new())
                .map_err(|err| VapidError::Rejected(format!("{err:?}")))?;

        Ok(Self {
            encoding_key: jsonwebtoken::EncodingKey::from_ec_der(pkcs8),
            public_key: key_pair.public_key().as_ref().to_vec(),
            subject: subject.to_string(),
        })
    }

    /// Base64url public key, as passed to `PushManager.subscribe()`
    /// as the `applicationServerKey`.
    pub fn public_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.public_key)
    }

    /// Build the `Authorization` header value for a request to `endpoint`.
    pub fn authorization(
        &self,
        endpoint: &url::Url,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let claims = VapidClaims {
            aud: endpoint.origin().ascii_serialization(),
            exp: now.timestamp() + VAPID_TOKEN_LIFETIME_SECS,
            sub: self.subject.clone(),
        };
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256),
            &claims,
            &self.encoding_key,
        )
        .context("signing VAPID token")?;

        Ok(format!("vapid t={token}, k={}", self.public_key()))
    }
}

/// Check that subscription keys decode to a P-256 public key and
/// a 16-byte authentication secret.
pub fn check_subscription_keys(p256dh: &str, auth: &str) -> anyhow::Result<()> {
    decode_subscription_keys(p256dh, auth).map(|_| ())
}

fn decode_subscription_keys(p256dh: &str, auth: &str) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    let p256dh = decode_base64url(p256dh).context("p256dh is not valid base64url")?;
    let auth = decode_base64url(auth).context("auth is not valid base64url")?;

    if p256dh.len() != P256_PUBLIC_KEY_LEN || p256dh[0] != 0x04 {
        anyhow::bail!("p256dh is not an uncompressed P-256 public key");
    }
    if auth.len() != AUTH_SECRET_LEN {
        anyhow::bail!("auth secret must be {AUTH_SECRET_LEN} bytes (got {})", auth.len());
    }
    Ok((p256dh, auth))
}

/// Serialize `payload`, shortening its body until the encrypted
/// message fits within a single record.
fn fit_payload(payload: &PushPayload) -> anyhow::Result<Vec<u8>> {
    const ELLIPSIS: &str = "\u{2026}";

    let mut plaintext = serde_json::to_vec(payload)?;
    if plaintext.len() <= MAX_PLAINTEXT_LEN {
        return Ok(plaintext);
    }

    let mut payload = payload.clone();
    while plaintext.len() > MAX_PLAINTEXT_LEN && !payload.body.is_empty() {
        let excess = plaintext.len() - MAX_PLAINTEXT_LEN + ELLIPSIS.len();
        let mut end = payload
            .body
            .trim_end_matches(ELLIPSIS)
            .len()
            .saturating_sub(excess);
        while !payload.body.is_char_boundary(end) {
            end -= 1;
        }

        payload.body.truncate(end);
        if end != 0 {
            payload.body.push_str(ELLIPSIS);
        }
        plaintext = serde_json::to_vec(&payload)?;
    }

    if plaintext.len() > MAX_PLAINTEXT_LEN {
        anyhow::bail!("push payload of {} bytes is too large", plaintext.len());
    }
    Ok(plaintext)
}

/// PushNotificationService sends PushPayloads to browser push services.
pub struct PushNotificationService {
    client: reqwest::Client,
    vapid: VapidKeys,
    ttl: std::time::Duration,
    rng: SystemRandom,
}

impl PushNotificationService {
    pub fn new(vapid: VapidKeys) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building push HTTP client")?;

        Ok(Self {
            client,
            vapid,
            ttl: std::time::Duration::from_secs(24 * 60 * 60),
            rng: SystemRandom::new(),
        })
    }

    /// Set how long push services should hold an undelivered message.
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn try_deliver(
        &self,
        subscription: &models::PushSubscription,
        payload: &PushPayload,
    ) -> Result<reqwest::StatusCode, DeliveryOutcome> {
        let invalid = |reason: String| DeliveryOutcome::Invalid { reason };
        let failed = |reason: String| DeliveryOutcome::Failed { reason };

        let endpoint = url::Url::parse(&subscription.endpoint)
            .map_err(|err| invalid(format!("invalid endpoint: {err}")))?;
        let (ua_public, auth_secret) =
            decode_subscription_keys(&subscription.p256dh, &subscription.auth)
                .map_err(|err| invalid(format!("{err:#}")))?;

        // Past this point, failures concern this message and not the subscription.
        let plaintext = fit_payload(payload).map_err(|err| failed(format!("{err:#}")))?;
        let body = encrypt(&ua_public, &auth_secret, &plaintext, &self.rng).map_err(|err| {
            match err {
                EncryptError::Keys(reason) => invalid(reason),
                EncryptError::Message(err) => failed(format!("{err:#}")),
            }
        })?;
        let authorization = self
            .vapid
            .authorization(&endpoint, Utc::now())
            .map_err(|err| failed(format!("{err:#}")))?;

        let response = self
            .client
            .post(endpoint)
            .header("TTL", self.ttl.as_secs().to_string())
            .header("Urgency", "normal")
            .header(reqwest::header::CONTENT_ENCODING, "aes128gcm")
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::AUTHORIZATION, authorization)
            .body(body)
            .send()
            .await
            .map_err(|err| failed(format!("push request failed: {err}")))?;

        Ok(response.status())
    }
}

#[async_trait::async_trait]
impl PushDelivery for PushNotificationService {
    fn public_key(&self) -> String {
        self.vapid.public_key()
    }

    #[tracing::instrument(skip_all, fields(subscription = %subscription.id))]
    async fn deliver(
        &self,
        subscription: &models::PushSubscription,
        payload: &PushPayload,
    ) -> DeliveryOutcome {
        let status = match self.try_deliver(subscription, payload).await {
            Ok(status) => status,
            Err(outcome) => return outcome,
        };

        match status.as_u16() {
            200..=299 => DeliveryOutcome::Delivered,
            403 | 404 | 410 => DeliveryOutcome::Gone {
                status: status.as_u16(),
            },
            _ => DeliveryOutcome::Failed {
                reason: format!("push service responded with {status}"),
            },
        }
    }
}

/// Encrypt `plaintext` for the user agent holding `ua_public` and `auth_secret`,
/// returning an `aes128gcm` message body.
pub(crate) fn encrypt(
    ua_public: &[u8],
    auth_secret: &[u8],
    plaintext: &[u8],
    rng: &dyn SecureRandom,
) -> Result<Vec<u8>, EncryptError> {
    if ua_public.len() != P256_PUBLIC_KEY_LEN {
        return Err(EncryptError::Keys(
            "p256dh is not an uncompressed P-256 public key".to_string(),
        ));
    }
    if auth_secret.len() != AUTH_SECRET_LEN {
        let reason = format!("auth secret must be {AUTH_SECRET_LEN} bytes");
        return Err(EncryptError::Keys(reason));
    }
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        let err = anyhow::anyhow!("push payload of {} bytes is too large", plaintext.len());
        return Err(err.into());
    }

    let mut salt = [0u8; 16];
    rng.fill(&mut salt)
        .map_err(|_| anyhow::anyhow!("failed to generate salt"))?;

    let as_private = agreement::EphemeralPrivateKey::generate(&agreement::ECDH_P256, rng)
        .map_err(|_| anyhow::anyhow!("failed to generate ephemeral key"))?;
    let as_public = as_private
        .compute_public_key()
        .map_err(|_| anyhow::anyhow!("failed to compute ephemeral public key"))?;

    let ecdh_secret = agreement::agree_ephemeral(
        as_private,
        &agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, ua_public),
        |secret| secret.to_vec(),
    )
    .map_err(|_| EncryptError::Keys("key agreement with p256dh failed".to_string()))?;

    let (cek, nonce) = derive_content_keys(
        &ecdh_secret,
        auth_secret,
        &salt,
        ua_public,
        as_public.as_ref(),
    )?;

    let mut record = Vec::with_capacity(plaintext.len() + 17);
    record.extend_from_slice(plaintext);
    record.push(0x02); // Delimiter of the last (and only) record.

    let key = aead::LessSafeKey::new(
        aead::UnboundKey::new(&aead::AES_128_GCM, &cek)
            .map_err(|_| anyhow::anyhow!("invalid content encryption key"))?,
    );
    key.seal_in_place_append_tag(
        aead::Nonce::assume_unique_for_key(nonce),
        aead::Aad::empty(),
        &mut record,
    )
    .map_err(|_| anyhow::anyhow!("failed to encrypt push payload"))?;

    let mut body = Vec::with_capacity(HEADER_LEN + record.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(as_public.as_ref().len() as u8);
    body.extend_from_slice(as_public.as_ref());
    body.extend_from_slice(&record);

    Ok(body)
}

/// Derive the content encryption key and nonce of a message.
/// Both parties run the same derivation, from their own view of the key exchange.
fn derive_content_keys(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    salt: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
) -> anyhow::Result<([u8; 16], [u8; 12])> {
    let mut ikm = [0u8; 32];
    hkdf_fill(
        auth_secret,
        ecdh_secret,
        &[b"WebPush: info\0", ua_public, as_public],
        &mut ikm,
    )?;

    let mut cek = [0u8; 16];
    hkdf_fill(salt, &ikm, &[b"Content-Encoding: aes128gcm\0"], &mut cek)?;

    let mut nonce = [0u8; 12];
    hkdf_fill(salt, &ikm, &[b"Content-Encoding: nonce\0"], &mut nonce)?;

    Ok((cek, nonce))
}

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

fn hkdf_fill(salt: &[u8], ikm: &[u8], info: &[&[u8]], out: &mut [u8]) -> anyhow::Result<()> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(ikm);
    prk.expand(info, OkmLen(out.len()))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| anyhow::anyhow!("HKDF expansion failed"))
}

/// Decode base64url, tolerating padding and the standard alphabet
/// which some browsers and key generators emit.
fn decode_base64url(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = s
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();

    URL_SAFE_NO_PAD.decode(normalized)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_vapid_keys() -> VapidKeys {
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &SystemRandom::new())
                .unwrap();
        VapidKeys::from_pkcs8(pkcs8.as_ref(), "mailto:stages@example.com").unwrap()
    }

    struct UserAgent {
        private: agreement::EphemeralPrivateKey,
        public: Vec<u8>,
        auth: [u8; 16],
    }

    impl UserAgent {
        fn new() -> Self {
            let rng = SystemRandom::new();
            let private =
                agreement::EphemeralPrivateKey::generate(&agreement::ECDH_P256, &rng).unwrap();
            let public = private.compute_public_key().unwrap().as_ref().to_vec();
            let mut auth = [0u8; 16];
            rng.fill(&mut auth).unwrap();
            Self {
                private,
                public,
                auth,
            }
        }

        fn subscription(&self, endpoint: &str) -> models::PushSubscription {
            models::PushSubscription {
                id: uuid::Uuid::new_v4(),
                user_id: uuid::Uuid::new_v4(),
                endpoint: endpoint.to_string(),
                p256dh: URL_SAFE_NO_PAD.encode(&self.public),
                auth: URL_SAFE_NO_PAD.encode(self.auth),
                user_agent: None,
                is_active: true,
                failure_reason: None,
                created_at: Utc::now(),
                last_used_at: None,
            }
        }

        // Decrypt as a browser would, returning the padded record plaintext.
        fn decrypt(self, body: &[u8]) -> Vec<u8> {
            let salt = &body[..16];
            let record_size = u32::from_be_bytes(body[16..20].try_into().unwrap());
            assert_eq!(record_size, RECORD_SIZE);
            let id_len = body[20] as usize;
            let as_public = &body[21..21 + id_len];
            let mut record = body[21 + id_len..].to_vec();

            let ecdh_secret = agreement::agree_ephemeral(
                self.private,
                &agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, as_public),
                |secret| secret.to_vec(),
            )
            .unwrap();
            let (cek, nonce) =
                derive_content_keys(&ecdh_secret, &self.auth, salt, &self.public, as_public)
                    .unwrap();

            let key =
                aead::LessSafeKey::new(aead::UnboundKey::new(&aead::AES_128_GCM, &cek).unwrap());
            let plaintext = key
                .open_in_place(
                    aead::Nonce::assume_unique_for_key(nonce),
                    aead::Aad::empty(),
                    &mut record,
                )
                .unwrap();
            plaintext.to_vec()
        }
    }

    #[test]
    fn test_encrypted_payload_is_readable_by_user_agent() {
        let ua = UserAgent::new();
        let body = encrypt(
            &ua.public.clone(),
            &ua.auth.clone(),
            br#"{"title":"Bonjour"}"#,
            &SystemRandom::new(),
        )
        .unwrap();

        assert_eq!(body[20] as usize, P256_PUBLIC_KEY_LEN);
        let plaintext = ua.decrypt(&body);
        assert_eq!(plaintext, b"{\"title\":\"Bonjour\"}\x02".to_vec());
    }

    #[test]
    fn test_encrypt_rejects_bad_inputs() {
        let ua = UserAgent::new();
        let rng = SystemRandom::new();

        let err = encrypt(&ua.public[..33], &ua.auth, b"x", &rng).unwrap_err();
        assert_eq!(err.to_string(), "p256dh is not an uncompressed P-256 public key");

        let err = encrypt(&ua.public, &ua.auth[..8], b"x", &rng).unwrap_err();
        assert_eq!(err.to_string(), "auth secret must be 16 bytes");

        let err = encrypt(&ua.public, &ua.auth, &[b'x'; 4080], &rng).unwrap_err();
        assert_eq!(err.to_string(), "push payload of 4080 bytes is too large");
        assert!(matches!(err, EncryptError::Message(_)));

        // Well-formed, but not a point on the curve.
        let mut off_curve = ua.public.clone();
        off_curve[64] ^= 0x01;
        let err = encrypt(&off_curve, &ua.auth, b"x", &rng).unwrap_err();
        assert!(matches!(err, EncryptError::Keys(_)), "{err}");
    }

    #[test]
    fn test_long_bodies_are_shortened_to_fit() {
        let mut payload = PushPayload {
            title: "Nouvelle offre".to_string(),
            body: "é".repeat(2000),
            url: None,
            notification_id: uuid::Uuid::new_v4(),
            tag: None,
        };

        let plaintext = fit_payload(&payload).unwrap();
        assert!(plaintext.len() <= MAX_PLAINTEXT_LEN);

        let fitted: PushPayload = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(fitted.title, payload.title);
        assert!(fitted.body.ends_with('…'));
        assert!(payload.body.starts_with(fitted.body.trim_end_matches('…')));

        // Escaped characters take more room serialized than in memory.
        payload.body = "\"".repeat(3000);
        let fitted: PushPayload = serde_json::from_slice(&fit_payload(&payload).unwrap()).unwrap();
        assert!(fitted.body.len() < 2000);

        // Bodies which already fit are untouched.
        payload.body = "Bravo !".to_string();
        assert_eq!(fit_payload(&payload).unwrap(), serde_json::to_vec(&payload).unwrap());

        // A title alone may not fit.
        payload.title = "x".repeat(5000);
        let err = fit_payload(&payload).unwrap_err();
        assert!(err.to_string().ends_with("bytes is too large"), "{err}");
    }

    fn verify_vapid_header(keys: &VapidKeys, header: &str, audience: &str) -> VapidClaims {
        let (token, key) = header
            .strip_prefix("vapid t=")
            .unwrap()
            .split_once(", k=")
            .unwrap();
        assert_eq!(key, keys.public_key());

        let public = URL_SAFE_NO_PAD.decode(key).unwrap();
        let decoding_key = jsonwebtoken::DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(&public[1..33]),
            &URL_SAFE_NO_PAD.encode(&public[33..]),
        )
        .unwrap();

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::ES256);
        validation.set_audience(&[audience]);
        jsonwebtoken::decode::<VapidClaims>(token, &decoding_key, &validation)
            .expect("token verifies")
            .claims
    }

    #[test]
    fn test_vapid_authorization_is_a_verifiable_es256_token() {
        let keys = test_vapid_keys();
        let endpoint = url::Url::parse("https://fcm.googleapis.com/fcm/send/abc123").unwrap();
        let now = Utc::now();

        let header = keys.authorization(&endpoint, now).unwrap();
        let claims = verify_vapid_header(&keys, &header, "https://fcm.googleapis.com");

        assert_eq!(claims.exp, now.timestamp() + VAPID_TOKEN_LIFETIME_SECS);
        assert_eq!(claims.sub, "mailto:stages@example.com");
    }

    #[test]
    fn test_vapid_keys_from_raw_base64() {
        // Split a generated document into the raw scalar and public point
        // that web-push tooling hands out.
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &SystemRandom::new())
                .unwrap();
        let pkcs8 = pkcs8.as_ref();
        let scalar_at = P256_PKCS8_PREFIX.len();
        let public_at = scalar_at + P256_PRIVATE_KEY_LEN + P256_PKCS8_PUBLIC_KEY_TAG.len();
        let private = URL_SAFE_NO_PAD.encode(&pkcs8[scalar_at..scalar_at + P256_PRIVATE_KEY_LEN]);
        let public = URL_SAFE_NO_PAD.encode(&pkcs8[public_at..]);

        let keys = VapidKeys::from_base64(&public, &private, "https://stages.example.com").unwrap();
        assert_eq!(keys.public_key(), public);

        let endpoint =
            url::Url::parse("https://updates.push.services.mozilla.com/wpush/v2/x").unwrap();
        let header = keys.authorization(&endpoint, Utc::now()).unwrap();
        let claims =
            verify_vapid_header(&keys, &header, "https://updates.push.services.mozilla.com");
        assert_eq!(claims.sub, "https://stages.example.com");

        assert!(matches!(
            VapidKeys::from_base64(&public, &URL_SAFE_NO_PAD.encode([1u8; 16]), "mailto:a@b.c"),
            Err(VapidError::Rejected(_))
        ));
    }

    #[test]
    fn test_vapid_subject_and_key_validation() {
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &SystemRandom::new())
                .unwrap();
        assert!(matches!(
            VapidKeys::from_pkcs8(pkcs8.as_ref(), "stages@example.com"),
            Err(VapidError::Subject(_))
        ));
        assert!(matches!(
            VapidKeys::from_base64("not base64!", "AAAA", "mailto:a@b.c"),
            Err(VapidError::Encoding { field: "public", .. })
        ));

        let public = test_vapid_keys().public_key();
        assert!(matches!(
            VapidKeys::from_base64(&public, &URL_SAFE_NO_PAD.encode([1u8; 32]), "mailto:a@b.c"),
            Err(VapidError::Rejected(_))
        ));
    }

    #[test]
    fn test_subscription_key_checks() {
        let ua = UserAgent::new();
        let sub = ua.subscription("https://push.example.com/x");
        check_subscription_keys(&sub.p256dh, &sub.auth).unwrap();

        // Padded standard-alphabet encodings are accepted too.
        let padded = base64::engine::general_purpose::STANDARD.encode(&ua.public);
        check_subscription_keys(&padded, &sub.auth).unwrap();

        let err = check_subscription_keys(&sub.p256dh, "AAAA").unwrap_err();
        assert_eq!(err.to_string(), "auth secret must be 16 bytes (got 3)");
        let err = check_subscription_keys("AAAA", &sub.auth).unwrap_err();
        assert_eq!(
            err.to_string(),
            "p256dh is not an uncompressed P-256 public key"
        );
    }

    #[tokio::test]
    async fn test_delivery_outcomes() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/ok"))
            .and(header("content-encoding", "aes128gcm"))
            .and(header("ttl", "86400"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let service = PushNotificationService::new(test_vapid_keys()).unwrap();
        let payload = PushPayload {
            title: "Candidature acceptée".to_string(),
            body: "Bravo !".to_string(),
            url: Some("/student/applications".to_string()),
            notification_id: uuid::Uuid::new_v4(),
            tag: None,
        };
        let ua = UserAgent::new();

        let outcome = |p: &str| ua.subscription(&format!("{}{p}", server.uri()));

        assert_eq!(
            service.deliver(&outcome("/ok"), &payload).await,
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            service.deliver(&outcome("/gone"), &payload).await,
            DeliveryOutcome::Gone { status: 410 }
        );
        assert_eq!(
            service.deliver(&outcome("/forbidden"), &payload).await,
            DeliveryOutcome::Gone { status: 403 }
        );
        assert_eq!(
            service.deliver(&outcome("/busy"), &payload).await,
            DeliveryOutcome::Failed {
                reason: "push service responded with 503 Service Unavailable".to_string()
            }
        );

        let mut bad_keys = outcome("/ok");
        bad_keys.auth = "AAAA".to_string();
        assert!(matches!(
            service.deliver(&bad_keys, &payload).await,
            DeliveryOutcome::Invalid { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_payloads_keep_the_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let service = PushNotificationService::new(test_vapid_keys()).unwrap();
        let mut payload = PushPayload {
            title: "Annonce".to_string(),
            body: "é".repeat(2000),
            url: None,
            notification_id: uuid::Uuid::new_v4(),
            tag: None,
        };

        // A long body is shortened and delivered.
        let ua = UserAgent::new();
        let subscription = ua.subscription(&format!("{}/ok", server.uri()));
        assert_eq!(
            service.deliver(&subscription, &payload).await,
            DeliveryOutcome::Delivered
        );

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].body.len() <= RECORD_SIZE as usize);

        let mut plaintext = ua.decrypt(&requests[0].body);
        assert_eq!(plaintext.pop(), Some(0x02));
        let received: PushPayload = serde_json::from_slice(&plaintext).unwrap();
        assert!(received.body.ends_with('…'));

        // A payload which cannot fit fails without deactivating the subscription.
        payload.title = "é".repeat(3000);
        let outcome = service.deliver(&subscription, &payload).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }), "{outcome:?}");
        assert_eq!(outcome.deactivation_reason(), None);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}

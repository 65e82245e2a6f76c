//! TLS 1.3 key schedule (RFC 8446 §7.1).
//!
//! ```text
//!                      0
//!                      |
//! early_secret = Extract(0, PSK or 0)
//!                      |
//!              +-- Derive-Secret("ext binder" | "res binder", "")
//!              +-- Derive-Secret("c e traffic", ClientHello)
//!              +-- Derive-Secret("e exp master", ClientHello)
//!                      |
//!               Derive-Secret("derived", "")
//!                      |
//! handshake_secret = Extract(derived, ECDHE)
//!                      |
//!              +-- Derive-Secret("c hs traffic", CH..SH)
//!              +-- Derive-Secret("s hs traffic", CH..SH)
//!                      |
//!               Derive-Secret("derived", "")
//!                      |
//! master_secret = Extract(derived, 0)
//!                      |
//!              +-- Derive-Secret("c ap traffic", CH..server Finished)
//!              +-- Derive-Secret("s ap traffic", CH..server Finished)
//!              +-- Derive-Secret("exp master",   CH..server Finished)
//!              +-- Derive-Secret("res master",   CH..client Finished)
//! ```
//!
//! HMAC (Finished MACs, PSK binders) is computed as
//! `HKDF-Extract(salt=key, ikm=message)`, which is HMAC by construction.

use crate::error::{CryptoError, Error};
use crate::tls::cipher::{HashAlg, SuiteHkdf, MAX_HASH_LEN};
use zeroize::Zeroize;

/// A derived secret. Zeroized on drop.
#[derive(Clone)]
pub struct Secret {
    bytes: [u8; MAX_HASH_LEN],
    len: usize,
}

impl Secret {
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: [0u8; MAX_HASH_LEN],
            len,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_HASH_LEN];
        bytes[..data.len()].copy_from_slice(data);
        Self {
            bytes,
            len: data.len(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl core::fmt::Debug for Secret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        write!(f, "Secret({} bytes)", self.len)
    }
}

/// HKDF-Expand-Label (RFC 8446 §7.1).
///
/// The HkdfLabel info structure is
///   uint16 length
///   opaque label<7..255> = "tls13 " + label
///   opaque context<0..255>
pub fn hkdf_expand_label(
    hkdf: SuiteHkdf,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    let prefix = b"tls13 ";
    let full_label_len = prefix.len() + label.len();
    let info_len = 2 + 1 + full_label_len + 1 + context.len();

    // Stack buffer; every label in this crate fits with room to spare.
    let mut info = [0u8; 128];
    if info_len > info.len() {
        return Err(CryptoError::HkdfFailure.into());
    }

    let out_len = out.len() as u16;
    info[0] = (out_len >> 8) as u8;
    info[1] = out_len as u8;
    info[2] = full_label_len as u8;
    info[3..3 + prefix.len()].copy_from_slice(prefix);
    info[3 + prefix.len()..3 + full_label_len].copy_from_slice(label);
    info[3 + full_label_len] = context.len() as u8;
    info[4 + full_label_len..4 + full_label_len + context.len()].copy_from_slice(context);

    hkdf.expand(secret, &info[..info_len], out)
}

/// Derive-Secret(secret, label, transcript_hash) — the transcript hash
/// is already computed by the caller.
pub fn derive_secret(
    hkdf: SuiteHkdf,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Secret, Error> {
    let mut out = Secret::zeroed(hkdf.hash_len());
    hkdf_expand_label(
        hkdf,
        secret,
        label,
        transcript_hash,
        &mut out.bytes[..out.len],
    )?;
    Ok(out)
}

/// HMAC via HKDF-Extract.
pub fn hmac(hkdf: SuiteHkdf, key: &[u8], message: &[u8]) -> Secret {
    let mut out = Secret::zeroed(hkdf.hash_len());
    let mut prk = [0u8; MAX_HASH_LEN];
    let len = hkdf.extract(key, message, &mut prk);
    out.bytes[..len].copy_from_slice(&prk[..len]);
    out.len = len;
    prk.zeroize();
    out
}

/// Where the ladder currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Early,
    Handshake,
    Master,
}

/// The HKDF ladder for one connection.
pub struct KeySchedule {
    hkdf: SuiteHkdf,
    secret: Secret,
    stage: Stage,
    empty_hash: [u8; MAX_HASH_LEN],
}

impl KeySchedule {
    /// Initialize with the early secret: `Extract(0, PSK or 0)`.
    pub fn new(alg: HashAlg, psk: Option<&[u8]>) -> Self {
        let hkdf = SuiteHkdf::new(alg);
        let hash_len = alg.output_len();
        let zeros = [0u8; MAX_HASH_LEN];

        let mut secret = Secret::zeroed(hash_len);
        let ikm = psk.unwrap_or(&zeros[..hash_len]);
        let mut prk = [0u8; MAX_HASH_LEN];
        hkdf.extract(&zeros[..hash_len], ikm, &mut prk);
        secret.bytes[..hash_len].copy_from_slice(&prk[..hash_len]);
        prk.zeroize();

        let mut empty_hash = [0u8; MAX_HASH_LEN];
        alg.hash(b"", &mut empty_hash);

        Self {
            hkdf,
            secret,
            stage: Stage::Early,
            empty_hash,
        }
    }

    pub fn alg(&self) -> HashAlg {
        self.hkdf.alg()
    }

    pub fn hash_len(&self) -> usize {
        self.hkdf.hash_len()
    }

    fn empty_hash(&self) -> &[u8] {
        &self.empty_hash[..self.hash_len()]
    }

    /// Binder key: Derive-Secret(early, "ext binder" | "res binder", "").
    pub fn binder_key(&self, external: bool) -> Result<Secret, Error> {
        debug_assert_eq!(self.stage, Stage::Early);
        let label: &[u8] = if external { b"ext binder" } else { b"res binder" };
        derive_secret(self.hkdf, self.secret.as_slice(), label, self.empty_hash())
    }

    /// Derive-Secret(early, "c e traffic", ClientHello).
    pub fn client_early_traffic_secret(&self, transcript_hash: &[u8]) -> Result<Secret, Error> {
        debug_assert_eq!(self.stage, Stage::Early);
        derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"c e traffic",
            transcript_hash,
        )
    }

    /// Derive-Secret(early, "e exp master", ClientHello).
    pub fn early_exporter_master_secret(&self, transcript_hash: &[u8]) -> Result<Secret, Error> {
        debug_assert_eq!(self.stage, Stage::Early);
        derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"e exp master",
            transcript_hash,
        )
    }

    /// Advance: handshake_secret = Extract(Derive-Secret(., "derived", ""), ECDHE).
    pub fn into_handshake(&mut self, ecdhe: &[u8]) -> Result<(), Error> {
        debug_assert_eq!(self.stage, Stage::Early);
        let derived = derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"derived",
            self.empty_hash(),
        )?;

        let mut prk = [0u8; MAX_HASH_LEN];
        let len = self.hkdf.extract(derived.as_slice(), ecdhe, &mut prk);
        self.secret.bytes[..len].copy_from_slice(&prk[..len]);
        self.secret.len = len;
        prk.zeroize();
        self.stage = Stage::Handshake;
        Ok(())
    }

    /// (client_hs_traffic, server_hs_traffic) over Transcript(CH..SH).
    pub fn handshake_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Secret, Secret), Error> {
        debug_assert_eq!(self.stage, Stage::Handshake);
        let client = derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"c hs traffic",
            transcript_hash,
        )?;
        let server = derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"s hs traffic",
            transcript_hash,
        )?;
        Ok((client, server))
    }

    /// Advance: master_secret = Extract(Derive-Secret(., "derived", ""), 0).
    pub fn into_master(&mut self) -> Result<(), Error> {
        debug_assert_eq!(self.stage, Stage::Handshake);
        let derived = derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"derived",
            self.empty_hash(),
        )?;

        let zeros = [0u8; MAX_HASH_LEN];
        let mut prk = [0u8; MAX_HASH_LEN];
        let len = self
            .hkdf
            .extract(derived.as_slice(), &zeros[..self.hash_len()], &mut prk);
        self.secret.bytes[..len].copy_from_slice(&prk[..len]);
        self.secret.len = len;
        prk.zeroize();
        self.stage = Stage::Master;
        Ok(())
    }

    /// (client_ap_traffic, server_ap_traffic) over Transcript(CH..server Finished).
    pub fn app_traffic_secrets(&self, transcript_hash: &[u8]) -> Result<(Secret, Secret), Error> {
        debug_assert_eq!(self.stage, Stage::Master);
        let client = derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"c ap traffic",
            transcript_hash,
        )?;
        let server = derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"s ap traffic",
            transcript_hash,
        )?;
        Ok((client, server))
    }

    /// Derive-Secret(master, "exp master", CH..server Finished).
    pub fn exporter_master_secret(&self, transcript_hash: &[u8]) -> Result<Secret, Error> {
        debug_assert_eq!(self.stage, Stage::Master);
        derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"exp master",
            transcript_hash,
        )
    }

    /// Derive-Secret(master, "res master", CH..client Finished).
    pub fn resumption_master_secret(&self, transcript_hash: &[u8]) -> Result<Secret, Error> {
        debug_assert_eq!(self.stage, Stage::Master);
        derive_secret(
            self.hkdf,
            self.secret.as_slice(),
            b"res master",
            transcript_hash,
        )
    }
}

/// Expand a traffic secret into (write_key, write_iv).
pub fn traffic_key_iv(
    hkdf: SuiteHkdf,
    secret: &[u8],
    key_len: usize,
) -> Result<([u8; 32], [u8; 12]), Error> {
    let mut key = [0u8; 32];
    let mut iv = [0u8; 12];
    hkdf_expand_label(hkdf, secret, b"key", &[], &mut key[..key_len])?;
    hkdf_expand_label(hkdf, secret, b"iv", &[], &mut iv)?;
    Ok((key, iv))
}

/// finished_key = HKDF-Expand-Label(traffic_secret, "finished", "", Hash.length).
pub fn finished_key(hkdf: SuiteHkdf, traffic_secret: &[u8]) -> Result<Secret, Error> {
    let mut out = Secret::zeroed(hkdf.hash_len());
    let len = out.len;
    hkdf_expand_label(
        hkdf,
        traffic_secret,
        b"finished",
        &[],
        &mut out.bytes[..len],
    )?;
    Ok(out)
}

/// verify_data = HMAC(finished_key, transcript_hash).
pub fn finished_verify_data(hkdf: SuiteHkdf, fin_key: &[u8], transcript_hash: &[u8]) -> Secret {
    hmac(hkdf, fin_key, transcript_hash)
}

/// Next-generation traffic secret for KeyUpdate:
/// HKDF-Expand-Label(current, "traffic upd", "", Hash.length).
pub fn update_traffic_secret(hkdf: SuiteHkdf, current: &[u8]) -> Result<Secret, Error> {
    let mut out = Secret::zeroed(hkdf.hash_len());
    let len = out.len;
    hkdf_expand_label(hkdf, current, b"traffic upd", &[], &mut out.bytes[..len])?;
    Ok(out)
}

/// Resumption PSK from a NewSessionTicket nonce:
/// HKDF-Expand-Label(resumption_master, "resumption", nonce, Hash.length).
pub fn resumption_psk(hkdf: SuiteHkdf, res_master: &[u8], nonce: &[u8]) -> Result<Secret, Error> {
    let mut out = Secret::zeroed(hkdf.hash_len());
    let len = out.len;
    hkdf_expand_label(hkdf, res_master, b"resumption", nonce, &mut out.bytes[..len])?;
    Ok(out)
}

/// RFC 8446 §7.5 exporter interface.
pub fn export_keying_material(
    hkdf: SuiteHkdf,
    exporter_master: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    let mut empty_hash = [0u8; MAX_HASH_LEN];
    let empty_len = hkdf.alg().hash(b"", &mut empty_hash);
    let secret = derive_secret(hkdf, exporter_master, label, &empty_hash[..empty_len])?;

    let mut ctx_hash = [0u8; MAX_HASH_LEN];
    let ctx_len = hkdf.alg().hash(context, &mut ctx_hash);
    hkdf_expand_label(hkdf, secret.as_slice(), b"exporter", &ctx_hash[..ctx_len], out)
}

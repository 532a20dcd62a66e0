//! WirePact 身份令牌的签发与验证
//!
//! 令牌是 RS256 签名的 JWT。头部的 `x5c` 携带 [叶子证书, 根证书]（DER base64），
//! `x5t` 携带叶子证书 DER 的 SHA-256 指纹（base64）。验证方不需要预共享密钥：
//! 它从证书链中取出签名公钥，再把证书链锚定到自己信任的根证书上。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use openssl::asn1::Asn1Time;
use openssl::memcmp;
use openssl::sha::sha256;
use openssl::x509::{X509Ref, X509VerifyResult, X509};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::store::KeyMaterial;
use wirepact_common::{DenyKind, Error, IdentityClaims, Result, WIREPACT_AUDIENCE};

/// 身份令牌签发器
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    key_material: Arc<KeyMaterial>,
    issuer: String,
}

impl TokenIssuer {
    /// 创建新的签发器
    pub fn new(key_material: Arc<KeyMaterial>, issuer: &str) -> Self {
        Self {
            key_material,
            issuer: issuer.to_string(),
        }
    }

    /// 为用户标识签发令牌
    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.issue_at(user_id, Utc::now())
    }

    /// 以指定时间为签发时间签发令牌
    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = IdentityClaims::for_subject(&self.issuer, user_id, now);
        let (chain, thumbprint) = self.key_material.chain_and_thumbprint();

        let mut header = Header::new(Algorithm::RS256);
        header.x5c = Some(chain.to_vec());
        header.x5t = Some(thumbprint.to_string());

        encode(&header, &claims, self.key_material.encoding_key())
            .map_err(|e| Error::Signing(format!("无法为用户 {} 签名令牌: {}", user_id, e)))
    }
}

/// 解码后的证书链条目
struct ChainEntry {
    der: Vec<u8>,
    certificate: X509,
}

/// 身份令牌验证器
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    key_material: Arc<KeyMaterial>,
}

impl TokenVerifier {
    /// 创建新的验证器
    pub fn new(key_material: Arc<KeyMaterial>) -> Self {
        Self { key_material }
    }

    /// 验证令牌，成功时返回用户标识
    pub fn verify(&self, token: &str) -> std::result::Result<String, DenyKind> {
        self.verify_at(token, Utc::now())
    }

    /// 以指定时间为当前时间验证令牌
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<String, DenyKind> {
        let header = decode_header(token).map_err(|e| {
            debug!("无法解析令牌头部: {}", e);
            DenyKind::Malformed
        })?;

        let chain = match header.x5c.as_deref() {
            Some(chain) if chain.len() >= 2 => decode_chain(chain)?,
            _ => {
                debug!("令牌头部缺少完整的 x5c 证书链");
                return Err(DenyKind::Malformed);
            }
        };

        let thumbprint = header
            .x5t
            .as_deref()
            .and_then(|t| STANDARD.decode(t).ok())
            .ok_or(DenyKind::Malformed)?;
        let expected = sha256(&chain[0].der);
        if thumbprint.len() != expected.len() || !memcmp::eq(&thumbprint, &expected) {
            debug!("令牌指纹与证书不一致");
            return Err(DenyKind::ThumbprintMismatch);
        }

        let claims = verify_signature(token, &chain[0].certificate)?;

        self.verify_trust(&chain)?;
        if claims.aud != WIREPACT_AUDIENCE {
            debug!("令牌受众 {} 不属于 WirePact 信任域", claims.aud);
            return Err(DenyKind::UntrustedIssuer);
        }

        if !claims.is_valid_at(now) || !within_validity(&chain[0].certificate, now) {
            debug!("令牌已过期或尚未生效: iat={} exp={}", claims.iat, claims.exp);
            return Err(DenyKind::Expired);
        }

        if claims.sub.is_empty() {
            return Err(DenyKind::Malformed);
        }

        Ok(claims.sub)
    }

    /// 每个证书都必须由下一个证书签发，末尾证书必须是或者由受信任的根证书签发
    fn verify_trust(&self, chain: &[ChainEntry]) -> std::result::Result<(), DenyKind> {
        for pair in chain.windows(2) {
            if !issued_by(&pair[0].certificate, &pair[1].certificate) {
                debug!("证书链不连续");
                return Err(DenyKind::UntrustedIssuer);
            }
        }

        let root = self.key_material.trusted_root();
        let root_der = root.to_der().map_err(|_| DenyKind::UntrustedIssuer)?;
        let terminal = chain.last().ok_or(DenyKind::Malformed)?;

        if terminal.der == root_der || issued_by(&terminal.certificate, root) {
            Ok(())
        } else {
            debug!("证书链没有终止于受信任的根证书");
            Err(DenyKind::UntrustedIssuer)
        }
    }
}

fn decode_chain(chain: &[String]) -> std::result::Result<Vec<ChainEntry>, DenyKind> {
    chain
        .iter()
        .map(|encoded| {
            let der = STANDARD.decode(encoded).map_err(|_| DenyKind::Malformed)?;
            let certificate = X509::from_der(&der).map_err(|_| DenyKind::Malformed)?;
            Ok(ChainEntry { der, certificate })
        })
        .collect()
}

fn verify_signature(token: &str, leaf: &X509) -> std::result::Result<IdentityClaims, DenyKind> {
    let rsa = leaf
        .public_key()
        .and_then(|key| key.rsa())
        .map_err(|_| DenyKind::BadSignature)?;
    let key = DecodingKey::from_rsa_raw_components(&rsa.n().to_vec(), &rsa.e().to_vec());

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<IdentityClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat => DenyKind::BadSignature,
            _ => {
                debug!("无法解析令牌: {}", e);
                DenyKind::Malformed
            }
        })
}

fn issued_by(child: &X509Ref, parent: &X509Ref) -> bool {
    if parent.issued(child) != X509VerifyResult::OK {
        return false;
    }
    parent
        .public_key()
        .and_then(|key| child.verify(&key))
        .unwrap_or(false)
}

fn within_validity(certificate: &X509Ref, now: DateTime<Utc>) -> bool {
    let Ok(now) = Asn1Time::from_unix(now.timestamp() as _) else {
        return false;
    };
    let started = matches!(
        certificate.not_before().compare(&now),
        Ok(Ordering::Less | Ordering::Equal)
    );
    let not_ended = matches!(
        certificate.not_after().compare(&now),
        Ok(Ordering::Greater | Ordering::Equal)
    );
    started && not_ended
}

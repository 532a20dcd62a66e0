//! 测试工具
//!
//! 提供一个临时的自签名 CA，用于签发测试用的叶子证书和 [`KeyMaterial`]。
//! 通过 `testutil` 特性开放给其他 crate 的测试，生产构建中不包含。
//!
//! ```toml
//! [dev-dependencies]
//! wirepact-pki = { path = "../wirepact-pki", features = ["testutil"] }
//! ```
//!
//! 这里的函数在失败时直接 panic。

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509NameRef, X509Req, X509};

use crate::store::{KeyMaterial, KeyStore, RSA_KEY_BITS};

/// 测试用 CA
pub struct TestCa {
    key: PKey<Private>,
    certificate: X509,
}

impl TestCa {
    /// 创建自签名 CA
    pub fn new(common_name: &str) -> Self {
        let key = generate_key();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "WirePact PKI")
            .unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        let name = name.build();

        let mut builder = certificate_builder(&name, &name, &key, 3650);
        add_ca_extensions(&mut builder);
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            certificate: builder.build(),
        }
    }

    /// 创建由本 CA 签发的中间 CA
    pub fn intermediate(&self, common_name: &str) -> TestCa {
        let key = generate_key();
        let name = subject(common_name);

        let mut builder = certificate_builder(&name, self.certificate.subject_name(), &key, 3650);
        add_ca_extensions(&mut builder);
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();

        TestCa {
            key,
            certificate: builder.build(),
        }
    }

    /// CA 证书（PEM）
    pub fn certificate_pem(&self) -> Vec<u8> {
        self.certificate.to_pem().unwrap()
    }

    /// CA 证书
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// 签发 PEM 编码的 CSR，返回 PEM 编码的证书
    pub fn sign_csr_pem(&self, csr_pem: &[u8]) -> Vec<u8> {
        let csr = X509Req::from_pem(csr_pem).unwrap();
        let public_key = csr.public_key().unwrap();
        self.sign(csr.subject_name(), &public_key, 365).to_pem().unwrap()
    }

    /// 为给定公钥签发叶子证书
    pub fn sign<T: openssl::pkey::HasPublic>(
        &self,
        subject: &X509NameRef,
        public_key: &PKeyRef<T>,
        days: u32,
    ) -> X509 {
        let mut builder = certificate_builder(
            subject,
            self.certificate.subject_name(),
            public_key,
            days,
        );
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    /// 生成私钥并直接签发有效期为 `days` 天的叶子证书
    pub fn issue_leaf(&self, common_name: &str, days: u32) -> (PKey<Private>, X509) {
        let key = generate_key();
        let certificate = self.sign(&subject(common_name), &key, days);
        (key, certificate)
    }

    /// 生成私钥、走一遍 CSR 流程并返回完整的密钥材料
    pub fn issue_key_material(&self, common_name: &str) -> KeyMaterial {
        let key = generate_key();
        let csr = KeyStore::new(".", common_name).create_csr(&key).unwrap();
        let certificate = X509::from_pem(&self.sign_csr_pem(&csr)).unwrap();
        KeyMaterial::from_parts(key, certificate, self.certificate.clone()).unwrap()
    }
}

/// 生成 RSA 私钥
pub fn generate_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(RSA_KEY_BITS).unwrap()).unwrap()
}

fn subject(common_name: &str) -> X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    name.build()
}

fn add_ca_extensions(builder: &mut X509Builder) {
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
}

fn certificate_builder<T: openssl::pkey::HasPublic>(
    subject: &X509NameRef,
    issuer: &X509NameRef,
    public_key: &PKeyRef<T>,
    days: u32,
) -> X509Builder {
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(public_key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(days).unwrap())
        .unwrap();
    builder
}

//! 证书与密钥存储
//!
//! 启动时按以下顺序引导密钥材料，任何一步失败都是致命的：
//!
//! 1. 根证书：本地 `ca.crt` 存在则加载，否则从 PKI 获取并原样保存
//! 2. 私钥：本地 `cert.key` 存在则加载，否则生成 RSA 2048 并保存
//! 3. 叶子证书：本地 `cert.crt` 存在则加载，否则用私钥创建 CSR，
//!    提交给 PKI 并保存返回的证书
//!
//! 引导完成后 [`KeyMaterial`] 不可变，可在并发请求间无锁共享。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::EncodingKey;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::sha::sha256;
use openssl::x509::{X509NameBuilder, X509Ref, X509ReqBuilder, X509VerifyResult, X509};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::issuance::IssuanceClient;
use wirepact_common::{Error, Result};

/// 根证书文件名
pub const CA_FILENAME: &str = "ca.crt";
/// 叶子证书文件名
pub const CERT_FILENAME: &str = "cert.crt";
/// 私钥文件名
pub const KEY_FILENAME: &str = "cert.key";

/// 新生成私钥的长度
pub const RSA_KEY_BITS: u32 = 2048;

/// CSR 主题中的组织名
const CSR_ORGANIZATIONS: [&str; 2] = ["WirePact PKI", "K8s Basic Auth Translator"];

fn pki_error(context: &'static str) -> impl FnOnce(ErrorStack) -> Error {
    move |e| Error::Pki(format!("{}: {}", context, e))
}

/// 翻译器的密钥材料
///
/// 不变量：叶子证书的公钥与私钥匹配，且叶子证书由根证书签发。
pub struct KeyMaterial {
    private_key: PKey<Private>,
    certificate: X509,
    root: X509,
    /// [叶子证书 DER base64, 根证书 DER base64]
    chain: Vec<String>,
    /// base64(SHA-256(叶子证书 DER))
    thumbprint: String,
    encoding_key: EncodingKey,
}

impl KeyMaterial {
    /// 从已解析的私钥和证书构造，并校验不变量
    pub fn from_parts(private_key: PKey<Private>, certificate: X509, root: X509) -> Result<Self> {
        let certificate_key = certificate
            .public_key()
            .map_err(pki_error("无法读取叶子证书公钥"))?;
        if !certificate_key.public_eq(&private_key) {
            return Err(Error::Pki("叶子证书与私钥不匹配".to_string()));
        }

        let root_key = root.public_key().map_err(pki_error("无法读取根证书公钥"))?;
        let signed_by_root = root.issued(&certificate) == X509VerifyResult::OK
            && certificate
                .verify(&root_key)
                .map_err(pki_error("无法校验叶子证书签名"))?;
        if !signed_by_root {
            return Err(Error::Pki("叶子证书不是由根证书签发的".to_string()));
        }

        let leaf_der = certificate
            .to_der()
            .map_err(pki_error("无法编码叶子证书"))?;
        let root_der = root.to_der().map_err(pki_error("无法编码根证书"))?;
        let chain = vec![STANDARD.encode(&leaf_der), STANDARD.encode(&root_der)];
        let thumbprint = STANDARD.encode(sha256(&leaf_der));

        let rsa_der = private_key
            .rsa()
            .and_then(|rsa| rsa.private_key_to_der())
            .map_err(pki_error("私钥不是 RSA 密钥"))?;
        let encoding_key = EncodingKey::from_rsa_der(&rsa_der);

        Ok(Self {
            private_key,
            certificate,
            root,
            chain,
            thumbprint,
            encoding_key,
        })
    }

    /// 私钥
    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    /// 本地叶子证书
    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// 令牌头部使用的证书链和指纹
    pub fn chain_and_thumbprint(&self) -> (&[String], &str) {
        (&self.chain, &self.thumbprint)
    }

    /// 受信任的根证书
    pub fn trusted_root(&self) -> &X509Ref {
        &self.root
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

/// 本地密钥材料存储
#[derive(Debug, Clone)]
pub struct KeyStore {
    /// 存放 ca.crt / cert.crt / cert.key 的目录
    dir: PathBuf,
    /// CSR 主题的通用名
    common_name: String,
}

impl KeyStore {
    /// 创建新的存储
    pub fn new(dir: impl Into<PathBuf>, common_name: &str) -> Self {
        Self {
            dir: dir.into(),
            common_name: common_name.to_string(),
        }
    }

    /// 存储目录
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 三个文件是否都已存在
    pub fn is_complete(&self) -> bool {
        [CA_FILENAME, KEY_FILENAME, CERT_FILENAME]
            .iter()
            .all(|name| self.dir.join(name).exists())
    }

    /// 引导密钥材料
    pub async fn bootstrap<C>(&self, client: &C) -> Result<KeyMaterial>
    where
        C: IssuanceClient + ?Sized,
    {
        tokio::fs::create_dir_all(&self.dir).await?;

        let root = self.load_or_fetch_root(client).await?;
        let private_key = self.load_or_generate_key().await?;
        let material = self
            .load_or_request_certificate(client, private_key, root)
            .await?;

        info!(
            "成功加载密钥材料，证书主题 {:?}，签发者 {:?}",
            material.certificate.subject_name(),
            material.certificate.issuer_name()
        );
        Ok(material)
    }

    /// 只从本地文件加载密钥材料，不访问 PKI
    pub async fn load(&self) -> Result<KeyMaterial> {
        let root = read_certificate(&self.dir.join(CA_FILENAME), "无法解析根证书").await?;
        let key_pem = tokio::fs::read(self.dir.join(KEY_FILENAME)).await?;
        let private_key = PKey::private_key_from_pem(&key_pem).map_err(pki_error("无法解析私钥"))?;
        let certificate = read_certificate(&self.dir.join(CERT_FILENAME), "无法解析叶子证书").await?;

        KeyMaterial::from_parts(private_key, certificate, root)
            .map_err(|e| Error::Bootstrap(e.to_string()))
    }

    async fn load_or_fetch_root<C>(&self, client: &C) -> Result<X509>
    where
        C: IssuanceClient + ?Sized,
    {
        let path = self.dir.join(CA_FILENAME);
        if path.exists() {
            return read_certificate(&path, "无法解析根证书").await;
        }

        debug!("未找到根证书，从 PKI 下载");
        let pem = client.fetch_root_certificate().await?;
        let root = X509::from_pem(&pem).map_err(pki_error("PKI 返回的根证书无法解析"))?;
        tokio::fs::write(&path, &pem).await?;
        info!("成功下载根证书，主题 {:?}", root.subject_name());
        Ok(root)
    }

    async fn load_or_generate_key(&self) -> Result<PKey<Private>> {
        let path = self.dir.join(KEY_FILENAME);
        if path.exists() {
            let pem = tokio::fs::read(&path).await?;
            debug!("从 {:?} 加载私钥，长度 {} 字节", path, pem.len());
            return PKey::private_key_from_pem(&pem).map_err(pki_error("无法解析私钥"));
        }

        debug!("私钥不存在，生成新的 RSA {} 密钥", RSA_KEY_BITS);
        let rsa = Rsa::generate(RSA_KEY_BITS).map_err(pki_error("无法生成私钥"))?;
        let pem = rsa
            .private_key_to_pem()
            .map_err(pki_error("无法编码私钥"))?;
        write_private_key(&path, &pem).await?;

        PKey::from_rsa(rsa).map_err(pki_error("无法转换私钥"))
    }

    /// 叶子证书只有在与私钥匹配且由根证书签发时才会写入磁盘
    async fn load_or_request_certificate<C>(
        &self,
        client: &C,
        private_key: PKey<Private>,
        root: X509,
    ) -> Result<KeyMaterial>
    where
        C: IssuanceClient + ?Sized,
    {
        let path = self.dir.join(CERT_FILENAME);
        if path.exists() {
            let certificate = read_certificate(&path, "无法解析叶子证书").await?;
            return KeyMaterial::from_parts(private_key, certificate, root)
                .map_err(|e| Error::Bootstrap(e.to_string()));
        }

        debug!("证书不存在，创建 CSR 并向 PKI 申请证书");
        let csr = self.create_csr(&private_key)?;
        let pem = client.sign_csr(&csr).await?;
        let certificate = X509::from_pem(&pem).map_err(pki_error("PKI 返回的叶子证书无法解析"))?;
        let material = KeyMaterial::from_parts(private_key, certificate, root)
            .map_err(|e| Error::Bootstrap(e.to_string()))?;

        tokio::fs::write(&path, &pem).await?;
        Ok(material)
    }

    /// 创建 PEM 编码的 PKCS#10 CSR
    pub fn create_csr(&self, private_key: &PKeyRef<Private>) -> Result<Vec<u8>> {
        build_csr(&self.common_name, private_key).map_err(pki_error("无法创建 CSR"))
    }
}

fn build_csr(
    common_name: &str,
    private_key: &PKeyRef<Private>,
) -> std::result::Result<Vec<u8>, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    for organization in CSR_ORGANIZATIONS {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
    }
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(private_key)?;
    builder.sign(private_key, MessageDigest::sha256())?;
    builder.build().to_pem()
}

async fn read_certificate(path: &Path, context: &'static str) -> Result<X509> {
    let pem = tokio::fs::read(path).await?;
    X509::from_pem(&pem).map_err(pki_error(context))
}

/// 私钥文件在创建时即为 0600
async fn write_private_key(path: &Path, pem: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(pem).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::MockIssuanceClient;
    use crate::testutil::TestCa;
    use openssl::x509::X509Req;
    use std::sync::Arc;

    fn mock_pki(ca: Arc<TestCa>) -> MockIssuanceClient {
        let mut client = MockIssuanceClient::new();
        let root_pem = ca.certificate_pem();
        client
            .expect_fetch_root_certificate()
            .times(1)
            .returning(move || Ok(root_pem.clone()));
        client
            .expect_sign_csr()
            .times(1)
            .returning(move |csr| Ok(ca.sign_csr_pem(csr)));
        client
    }

    #[tokio::test]
    async fn test_bootstrap_persists_and_reuses_material() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(TestCa::new("WirePact Test CA"));
        let store = KeyStore::new(dir.path(), "k8s basic auth translator");

        // 首次引导：下载根证书，生成私钥，提交一次 CSR
        let first = store.bootstrap(&mock_pki(ca.clone())).await.unwrap();
        assert!(store.is_complete());

        // 再次引导：不应产生任何网络调用
        let mut offline = MockIssuanceClient::new();
        offline.expect_fetch_root_certificate().times(0);
        offline.expect_sign_csr().times(0);
        let second = store.bootstrap(&offline).await.unwrap();

        assert_eq!(first.chain_and_thumbprint(), second.chain_and_thumbprint());
        assert!(first
            .private_key()
            .public_eq(second.private_key()));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_pki_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockIssuanceClient::new();
        client
            .expect_fetch_root_certificate()
            .returning(|| Err(Error::Network("connection refused".to_string())));

        let store = KeyStore::new(dir.path(), "translator");
        let result = store.bootstrap(&client).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert!(!dir.path().join(CA_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_unparsable_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CA_FILENAME), b"not a certificate").unwrap();

        let client = MockIssuanceClient::new();
        let store = KeyStore::new(dir.path(), "translator");
        assert!(matches!(
            store.bootstrap(&client).await,
            Err(Error::Pki(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_certificate_from_foreign_ca() {
        let dir = tempfile::tempdir().unwrap();
        let trusted = TestCa::new("Trusted CA");
        let foreign = Arc::new(TestCa::new("Foreign CA"));

        std::fs::write(dir.path().join(CA_FILENAME), trusted.certificate_pem()).unwrap();
        let mut client = MockIssuanceClient::new();
        client
            .expect_sign_csr()
            .returning(move |csr| Ok(foreign.sign_csr_pem(csr)));

        let store = KeyStore::new(dir.path(), "translator");
        assert!(matches!(
            store.bootstrap(&client).await,
            Err(Error::Bootstrap(_))
        ));
        assert!(!dir.path().join(CERT_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_bad_pki_response_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(TestCa::new("WirePact Test CA"));
        let store = KeyStore::new(dir.path(), "translator");

        let mut broken = MockIssuanceClient::new();
        let root_pem = ca.certificate_pem();
        broken
            .expect_fetch_root_certificate()
            .times(1)
            .returning(move || Ok(root_pem.clone()));
        broken
            .expect_sign_csr()
            .times(1)
            .returning(|_| Ok(b"<html>oops</html>".to_vec()));
        assert!(matches!(store.bootstrap(&broken).await, Err(Error::Pki(_))));
        assert!(!dir.path().join(CERT_FILENAME).exists());

        // 根证书和私钥已保存，恢复后只需要再提交一次 CSR
        let mut recovered = MockIssuanceClient::new();
        recovered.expect_fetch_root_certificate().times(0);
        recovered
            .expect_sign_csr()
            .times(1)
            .returning(move |csr| Ok(ca.sign_csr_pem(csr)));
        store.bootstrap(&recovered).await.unwrap();
        assert!(store.is_complete());
    }

    #[tokio::test]
    async fn test_unparsable_root_from_pki_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockIssuanceClient::new();
        client
            .expect_fetch_root_certificate()
            .returning(|| Ok(b"<html>maintenance</html>".to_vec()));

        let store = KeyStore::new(dir.path(), "translator");
        assert!(matches!(store.bootstrap(&client).await, Err(Error::Pki(_))));
        assert!(!dir.path().join(CA_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_load_reads_persisted_material_only() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(TestCa::new("WirePact Test CA"));
        let store = KeyStore::new(dir.path(), "translator");
        assert!(matches!(store.load().await, Err(Error::Io(_))));

        let bootstrapped = store.bootstrap(&mock_pki(ca)).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(
            bootstrapped.chain_and_thumbprint(),
            loaded.chain_and_thumbprint()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(TestCa::new("WirePact Test CA"));
        KeyStore::new(dir.path(), "translator")
            .bootstrap(&mock_pki(ca))
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join(KEY_FILENAME))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_csr_subject_and_signature() {
        let key = PKey::from_rsa(Rsa::generate(RSA_KEY_BITS).unwrap()).unwrap();
        let store = KeyStore::new(".", "k8s basic auth translator");
        let csr = X509Req::from_pem(&store.create_csr(&key).unwrap()).unwrap();

        assert!(csr.verify(&key).unwrap());
        let organizations: Vec<String> = csr
            .subject_name()
            .entries_by_nid(Nid::ORGANIZATIONNAME)
            .map(|e| e.data().as_utf8().unwrap().to_string())
            .collect();
        assert_eq!(organizations, vec!["WirePact PKI", "K8s Basic Auth Translator"]);
    }

    #[test]
    fn test_key_material_rejects_mismatched_key() {
        let ca = TestCa::new("WirePact Test CA");
        let material = ca.issue_key_material("translator");
        let other_key = PKey::from_rsa(Rsa::generate(RSA_KEY_BITS).unwrap()).unwrap();

        let result = KeyMaterial::from_parts(
            other_key,
            material.certificate().to_owned(),
            material.trusted_root().to_owned(),
        );
        assert!(matches!(result, Err(Error::Pki(_))));
    }

    #[test]
    fn test_thumbprint_matches_leaf_der() {
        let ca = TestCa::new("WirePact Test CA");
        let material = ca.issue_key_material("translator");
        let (chain, thumbprint) = material.chain_and_thumbprint();

        assert_eq!(chain.len(), 2);
        let leaf_der = STANDARD.decode(&chain[0]).unwrap();
        assert_eq!(STANDARD.encode(sha256(&leaf_der)), thumbprint);
        assert_eq!(
            STANDARD.decode(&chain[1]).unwrap(),
            material.trusted_root().to_der().unwrap()
        );
    }
}

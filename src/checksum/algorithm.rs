//! Checksum algorithm identity and the builtin factories.

use digest::DynDigest;

/// `(name, file-extension)` plus a factory for a fresh streaming digest.
/// Names are the stable identifiers callers configure with (`"SHA-1"`,
/// `"SHA-256"`, ...); the extension is the lowercase name with separators
/// stripped, matching the sidecar file naming convention (`x.jar.sha1`).
#[derive(Clone)]
pub struct ChecksumAlgorithm {
    name: &'static str,
    extension: String,
    factory: fn() -> Box<dyn DynDigest + Send>,
}

impl ChecksumAlgorithm {
    pub fn new(name: &'static str, factory: fn() -> Box<dyn DynDigest + Send>) -> Self {
        let extension = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Self {
            name,
            extension,
            factory,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn new_digest(&self) -> Box<dyn DynDigest + Send> {
        (self.factory)()
    }
}

impl PartialEq for ChecksumAlgorithm {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(other.name)
    }
}

impl Eq for ChecksumAlgorithm {}

impl std::hash::Hash for ChecksumAlgorithm {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.to_ascii_uppercase().hash(state);
    }
}

impl std::fmt::Debug for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumAlgorithm")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .finish()
    }
}

fn new_sha1() -> Box<dyn DynDigest + Send> {
    Box::new(sha1::Sha1::default())
}

fn new_sha256() -> Box<dyn DynDigest + Send> {
    Box::new(sha2::Sha256::default())
}

fn new_sha512() -> Box<dyn DynDigest + Send> {
    Box::new(sha2::Sha512::default())
}

fn new_md5() -> Box<dyn DynDigest + Send> {
    Box::new(md5::Md5::default())
}

pub fn sha1_algorithm() -> ChecksumAlgorithm {
    ChecksumAlgorithm::new("SHA-1", new_sha1)
}

pub fn sha256_algorithm() -> ChecksumAlgorithm {
    ChecksumAlgorithm::new("SHA-256", new_sha256)
}

pub fn sha512_algorithm() -> ChecksumAlgorithm {
    ChecksumAlgorithm::new("SHA-512", new_sha512)
}

pub fn md5_algorithm() -> ChecksumAlgorithm {
    ChecksumAlgorithm::new("MD5", new_md5)
}

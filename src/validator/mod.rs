//! Component C: the checksum validator. Compares the bytes just
//! transferred against every available expected checksum, in strict
//! precedence order (`PROVIDED` > `REMOTE_INCLUDED` > `REMOTE_EXTERNAL`),
//! deferring the accept/tolerate/fail decision to a [`policy::ChecksumPolicy`].

pub mod policy;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::checksum::{CalcError, ChecksumAlgorithm, ChecksumKind};
use crate::error::{ChecksumFailure, ConnectorError};
use policy::ChecksumPolicy;

/// Result of fetching one `REMOTE_EXTERNAL` sidecar.
pub enum FetchOutcome {
    Found(String),
    NotFound,
}

/// Fetches a sidecar checksum file's contents over the wire. Kept separate
/// from [`crate::transport::Transporter`] so a caller can fetch checksums
/// through a different path than artifact bytes (e.g. a cache lookup).
pub trait ChecksumFetcher: Send + Sync {
    fn fetch(&self, location: &str) -> Result<FetchOutcome, anyhow::Error>;
}

/// A trusted, purely-local source of expected checksums (e.g. a lockfile).
/// Consulted before any remote value, per the `PROVIDED` kind's precedence.
pub trait ProvidedChecksumsSource: Send + Sync {
    fn provided_checksum(&self, resource_uri: &str, algorithm: &str) -> Option<String>;
}

/// Post-transfer hook for the downloaded bytes, run after checksum
/// validation succeeds and before the atomic rename. The default is a no-op;
/// callers needing e.g. signature verification or decompression supply their
/// own.
pub trait FileProcessor: Send + Sync {
    fn process(&self, path: &Path) -> Result<(), anyhow::Error>;
}

pub struct DefaultFileProcessor;

impl FileProcessor for DefaultFileProcessor {
    fn process(&self, _path: &Path) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

pub struct ChecksumValidatorConfig {
    pub policy: Arc<dyn ChecksumPolicy>,
    pub fetcher: Option<Arc<dyn ChecksumFetcher>>,
    pub provided: Option<Arc<dyn ProvidedChecksumsSource>>,
}

/// Owns one resource's validation session: which algorithms matter, where
/// their external sidecars live, and which values have been confirmed and
/// are awaiting `commit`.
pub struct ChecksumValidator {
    resource_uri: String,
    algorithms: Vec<ChecksumAlgorithm>,
    sidecar_locations: BTreeMap<String, String>,
    cfg: ChecksumValidatorConfig,
    staged: BTreeMap<String, String>,
    external_cache: BTreeMap<String, Option<String>>,
    tolerated: Vec<ChecksumFailure>,
    closed: bool,
}

impl ChecksumValidator {
    pub fn new(
        resource_uri: impl Into<String>,
        algorithms: Vec<ChecksumAlgorithm>,
        sidecar_locations: Vec<(ChecksumAlgorithm, String)>,
        cfg: ChecksumValidatorConfig,
    ) -> Self {
        let sidecar_locations = sidecar_locations
            .into_iter()
            .map(|(algo, loc)| (algo.name().to_string(), loc))
            .collect();
        Self {
            resource_uri: resource_uri.into(),
            algorithms,
            sidecar_locations,
            cfg,
            staged: BTreeMap::new(),
            external_cache: BTreeMap::new(),
            tolerated: Vec::new(),
            closed: false,
        }
    }

    /// Mismatches tolerated by the policy during the most recent `validate`
    /// call (cleared by `retry`).
    pub fn tolerated(&self) -> &[ChecksumFailure] {
        &self.tolerated
    }

    /// Compares `computed` (the calculator's per-algorithm output for the
    /// bytes just transferred) against every available expected checksum in
    /// strict precedence order: `PROVIDED`, if configured, is checked on its
    /// own and any accept there returns immediately without ever looking at
    /// `REMOTE_INCLUDED` or `REMOTE_EXTERNAL`; otherwise a non-empty
    /// `REMOTE_INCLUDED` set is checked the same way; otherwise, if any
    /// `REMOTE_EXTERNAL` sidecar locations are configured, those are fetched
    /// and checked, and the policy's `on_no_more_checksums` fires unless that
    /// sweep itself ended in an accept.
    ///
    /// Stages a confirmed value for [`Self::commit`] the moment a source
    /// matches; a tolerated mismatch is never staged.
    pub fn validate(
        &mut self,
        computed: &BTreeMap<String, Result<String, CalcError>>,
        remote_included: &BTreeMap<String, String>,
    ) -> Result<(), ConnectorError> {
        if self.closed {
            return Err(ConnectorError::Closed);
        }

        if self.cfg.provided.is_some() {
            let provided_map = self.build_provided_map();
            if self.validate_set(computed, ChecksumKind::Provided, &provided_map)? {
                return Ok(());
            }
        } else if !remote_included.is_empty() {
            if self.validate_set(computed, ChecksumKind::RemoteIncluded, remote_included)? {
                return Ok(());
            }
        } else if !self.sidecar_locations.is_empty() {
            if self.validate_external(computed)? {
                return Ok(());
            }
            if let Err(failure) = self.cfg.policy.on_no_more_checksums() {
                return Err(ConnectorError::ChecksumMismatch {
                    algorithm: "*".to_string(),
                    kind: ChecksumKind::RemoteExternal,
                    expected: failure.expected,
                    actual: failure.actual,
                    retry_worthy: failure.retry_worthy,
                });
            }
        }

        Ok(())
    }

    /// Gives the policy a last chance to tolerate a failure that `validate`
    /// raised; `true` lets the transfer succeed without running `commit`.
    pub fn handle(&self, failure: &ChecksumFailure) -> bool {
        self.cfg.policy.on_transfer_checksum_failure(failure)
    }

    fn build_provided_map(&self) -> BTreeMap<String, String> {
        let Some(provided) = &self.cfg.provided else {
            return BTreeMap::new();
        };
        self.algorithms
            .iter()
            .filter_map(|algo| {
                provided
                    .provided_checksum(&self.resource_uri, algo.name())
                    .map(|v| (algo.name().to_string(), v))
            })
            .collect()
    }

    /// Walks one kind's expected-value map against `computed`, staging and
    /// reacting to each match/mismatch in turn. Returns `Ok(true)` the
    /// instant the policy accepts, terminating validation entirely;
    /// `Ok(false)` once the whole map has been inspected without an accept.
    fn validate_set(
        &mut self,
        computed: &BTreeMap<String, Result<String, CalcError>>,
        kind: ChecksumKind,
        expected_map: &BTreeMap<String, String>,
    ) -> Result<bool, ConnectorError> {
        for (name, expected) in expected_map {
            let Some(Ok(actual)) = computed.get(name) else {
                continue;
            };
            if !self.algorithms.iter().any(|a| a.name() == name) {
                continue;
            }

            if expected.eq_ignore_ascii_case(actual) {
                self.staged.insert(name.clone(), actual.clone());
                if self.cfg.policy.on_match(kind, name) {
                    return Ok(true);
                }
            } else if let Err(failure) = self.cfg.policy.on_mismatch(kind, name, expected, actual)
            {
                return Err(ConnectorError::ChecksumMismatch {
                    algorithm: name.clone(),
                    kind,
                    expected: failure.expected,
                    actual: failure.actual,
                    retry_worthy: failure.retry_worthy,
                });
            } else {
                self.tolerated.push(ChecksumFailure {
                    expected: expected.clone(),
                    actual: actual.clone(),
                    retry_worthy: false,
                });
            }
        }
        Ok(false)
    }

    /// Fetches and checks every configured `REMOTE_EXTERNAL` sidecar in turn.
    /// A fetch error (or a calculator error for that algorithm) is handed to
    /// `policy.on_error` and skipped rather than aborting the sweep.
    fn validate_external(
        &mut self,
        computed: &BTreeMap<String, Result<String, CalcError>>,
    ) -> Result<bool, ConnectorError> {
        let names: Vec<String> = self.sidecar_locations.keys().cloned().collect();
        for name in names {
            let actual = match computed.get(&name) {
                Some(Ok(v)) => v.clone(),
                Some(Err(e)) => {
                    self.cfg.policy.on_error(
                        ChecksumKind::RemoteExternal,
                        &name,
                        &ChecksumFailure {
                            expected: String::new(),
                            actual: e.to_string(),
                            retry_worthy: false,
                        },
                    );
                    continue;
                }
                None => continue,
            };

            let Some(expected) = self.fetch_external(&name) else {
                continue;
            };

            if expected.eq_ignore_ascii_case(&actual) {
                self.staged.insert(name.clone(), actual.clone());
                if self
                    .cfg
                    .policy
                    .on_match(ChecksumKind::RemoteExternal, &name)
                {
                    return Ok(true);
                }
            } else if let Err(failure) = self.cfg.policy.on_mismatch(
                ChecksumKind::RemoteExternal,
                &name,
                &expected,
                &actual,
            ) {
                return Err(ConnectorError::ChecksumMismatch {
                    algorithm: name,
                    kind: ChecksumKind::RemoteExternal,
                    expected: failure.expected,
                    actual: failure.actual,
                    retry_worthy: failure.retry_worthy,
                });
            } else {
                self.tolerated.push(ChecksumFailure {
                    expected,
                    actual,
                    retry_worthy: false,
                });
            }
        }
        Ok(false)
    }

    /// Fetches one `REMOTE_EXTERNAL` sidecar, caching the result (including a
    /// `None` miss) for the rest of this validation. A fetch error is
    /// reported to the policy via `on_error` and treated as "no value" rather
    /// than propagated — a transient sidecar fetch failure must not fail an
    /// otherwise-valid transfer.
    fn fetch_external(&mut self, algorithm_name: &str) -> Option<String> {
        if let Some(cached) = self.external_cache.get(algorithm_name) {
            return cached.clone();
        }
        let value = match (&self.cfg.fetcher, self.sidecar_locations.get(algorithm_name)) {
            (Some(fetcher), Some(location)) => match fetcher.fetch(location) {
                Ok(FetchOutcome::Found(v)) => Some(v.trim().to_string()),
                Ok(FetchOutcome::NotFound) => None,
                Err(e) => {
                    self.cfg.policy.on_error(
                        ChecksumKind::RemoteExternal,
                        algorithm_name,
                        &ChecksumFailure {
                            expected: String::new(),
                            actual: e.to_string(),
                            retry_worthy: false,
                        },
                    );
                    None
                }
            },
            _ => None,
        };
        self.external_cache
            .insert(algorithm_name.to_string(), value.clone());
        value
    }

    /// Writes one sidecar file per staged (confirmed) algorithm next to
    /// `final_path`. Never writes a sidecar for an algorithm that never
    /// matched, including one that was only ever tolerated-mismatched.
    pub fn commit(&self, final_path: &Path) -> std::io::Result<()> {
        for algorithm in &self.algorithms {
            let Some(value) = self.staged.get(algorithm.name()) else {
                continue;
            };
            let sidecar = append_extension(final_path, algorithm.extension());
            std::fs::write(sidecar, value)?;
        }
        Ok(())
    }

    /// Resets staged matches and the external-fetch cache ahead of a retry
    /// attempt against freshly re-downloaded bytes, and notifies the policy.
    pub fn retry(&mut self) {
        self.cfg.policy.on_transfer_retry();
        self.staged.clear();
        self.external_cache.clear();
        self.tolerated.clear();
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

fn append_extension(path: &Path, ext: &str) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    std::path::PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{md5_algorithm, sha1_algorithm};

    struct FixedProvided(BTreeMap<(String, String), String>);

    impl ProvidedChecksumsSource for FixedProvided {
        fn provided_checksum(&self, resource_uri: &str, algorithm: &str) -> Option<String> {
            self.0
                .get(&(resource_uri.to_string(), algorithm.to_string()))
                .cloned()
        }
    }

    fn ok(v: &str) -> Result<String, CalcError> {
        Ok(v.to_string())
    }

    fn cfg_strict() -> ChecksumValidatorConfig {
        ChecksumValidatorConfig {
            policy: Arc::new(policy::StrictChecksumPolicy),
            fetcher: None,
            provided: None,
        }
    }

    // S4 — accept on first match (PROVIDED short-circuits REMOTE_INCLUDED).
    #[test]
    fn s4_accept_on_first_match() {
        let mut provided = BTreeMap::new();
        provided.insert(
            ("x.jar".to_string(), "SHA-1".to_string()),
            "2ef7bde608ce5404e97d5f042f95f89f1c232871".to_string(),
        );
        let cfg = ChecksumValidatorConfig {
            policy: Arc::new(policy::StrictChecksumPolicy),
            fetcher: None,
            provided: Some(Arc::new(FixedProvided(provided))),
        };
        let mut validator = ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg);

        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        // A deliberately wrong REMOTE_INCLUDED value must never be reached.
        let mut remote_included = BTreeMap::new();
        remote_included.insert("SHA-1".to_string(), "deadbeef".to_string());

        assert!(validator.validate(&computed, &remote_included).is_ok());
    }

    // S5 — fail on first mismatch under a strict policy.
    #[test]
    fn s5_fail_on_first_mismatch() {
        let mut provided = BTreeMap::new();
        provided.insert(("x.jar".to_string(), "SHA-1".to_string()), "deadbeef".to_string());
        let cfg = ChecksumValidatorConfig {
            policy: Arc::new(policy::StrictChecksumPolicy),
            fetcher: None,
            provided: Some(Arc::new(FixedProvided(provided))),
        };
        let mut validator = ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg);

        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );

        let err = validator.validate(&computed, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConnectorError::ChecksumMismatch { .. }));
    }

    // S6 — REMOTE_INCLUDED precedes REMOTE_EXTERNAL.
    #[test]
    fn s6_remote_included_precedes_external() {
        struct PanicFetcher;
        impl ChecksumFetcher for PanicFetcher {
            fn fetch(&self, _location: &str) -> Result<FetchOutcome, anyhow::Error> {
                panic!("external fetch must not be reached when remote-included already matched");
            }
        }
        let cfg = ChecksumValidatorConfig {
            policy: Arc::new(policy::StrictChecksumPolicy),
            fetcher: Some(Arc::new(PanicFetcher)),
            provided: None,
        };
        let mut validator = ChecksumValidator::new(
            "x.jar",
            vec![sha1_algorithm()],
            vec![(sha1_algorithm(), "x.jar.sha1".to_string())],
            cfg,
        );

        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        let mut remote_included = BTreeMap::new();
        remote_included.insert(
            "SHA-1".to_string(),
            "2ef7bde608ce5404e97d5f042f95f89f1c232871".to_string(),
        );

        assert!(validator.validate(&computed, &remote_included).is_ok());
    }

    // S7 — commit writes sidecars only for staged (confirmed) algorithms.
    #[test]
    fn s7_commit_writes_confirmed_sidecars_only() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("x.jar");
        std::fs::write(&final_path, b"Hello World!").unwrap();

        let mut provided = BTreeMap::new();
        provided.insert(
            ("x.jar".to_string(), "SHA-1".to_string()),
            "2ef7bde608ce5404e97d5f042f95f89f1c232871".to_string(),
        );
        // MD5 has no expected value from any source: never staged.
        let cfg = ChecksumValidatorConfig {
            policy: Arc::new(policy::StrictChecksumPolicy),
            fetcher: None,
            provided: Some(Arc::new(FixedProvided(provided))),
        };
        let mut validator = ChecksumValidator::new(
            "x.jar",
            vec![sha1_algorithm(), md5_algorithm()],
            vec![],
            cfg,
        );

        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        computed.insert("MD5".to_string(), ok("ed076287532e86365e841e92bfc50d8c"));

        validator.validate(&computed, &BTreeMap::new()).unwrap();
        validator.commit(&final_path).unwrap();

        let mut sha1_path = final_path.clone().into_os_string();
        sha1_path.push(".sha1");
        assert!(std::path::Path::new(&sha1_path).exists());
        let mut md5_path = final_path.clone().into_os_string();
        md5_path.push(".md5");
        assert!(!std::path::Path::new(&md5_path).exists());
    }

    #[test]
    fn no_checksums_at_all_is_tolerated() {
        let mut validator =
            ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg_strict());
        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        assert!(validator.validate(&computed, &BTreeMap::new()).is_ok());
    }

    #[test]
    fn warn_policy_stages_nothing_on_tolerated_mismatch() {
        let mut provided = BTreeMap::new();
        provided.insert(("x.jar".to_string(), "SHA-1".to_string()), "deadbeef".to_string());
        let cfg = ChecksumValidatorConfig {
            policy: Arc::new(policy::WarnChecksumPolicy),
            fetcher: None,
            provided: Some(Arc::new(FixedProvided(provided))),
        };
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("x.jar");
        std::fs::write(&final_path, b"Hello World!").unwrap();

        let mut validator = ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg);
        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        assert!(validator.validate(&computed, &BTreeMap::new()).is_ok());
        validator.commit(&final_path).unwrap();

        let mut sha1_path = final_path.clone().into_os_string();
        sha1_path.push(".sha1");
        assert!(!std::path::Path::new(&sha1_path).exists());
    }

    /// S6 variant: a policy that keeps inspecting even after every checksum
    /// matches must still see `on_no_more_checksums` fire once the
    /// REMOTE_EXTERNAL sweep finishes without ever accepting.
    #[test]
    fn inspect_all_policy_reaches_no_more_checksums_despite_matches() {
        struct InspectAllPolicy {
            no_more_calls: std::sync::atomic::AtomicUsize,
        }
        impl ChecksumPolicy for InspectAllPolicy {
            fn on_match(&self, _kind: ChecksumKind, _algorithm: &str) -> bool {
                false
            }
            fn on_mismatch(
                &self,
                _kind: ChecksumKind,
                _algorithm: &str,
                expected: &str,
                actual: &str,
            ) -> Result<(), ChecksumFailure> {
                Err(ChecksumFailure {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                    retry_worthy: false,
                })
            }
            fn on_error(&self, _kind: ChecksumKind, _algorithm: &str, _failure: &ChecksumFailure) {}
            fn on_no_more_checksums(&self) -> Result<(), ChecksumFailure> {
                self.no_more_calls
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
            fn on_transfer_retry(&self) {}
            fn on_transfer_checksum_failure(&self, _failure: &ChecksumFailure) -> bool {
                false
            }
        }

        struct FixedFetcher(BTreeMap<String, String>);
        impl ChecksumFetcher for FixedFetcher {
            fn fetch(&self, location: &str) -> Result<FetchOutcome, anyhow::Error> {
                match self.0.get(location) {
                    Some(v) => Ok(FetchOutcome::Found(v.clone())),
                    None => Ok(FetchOutcome::NotFound),
                }
            }
        }

        let policy = Arc::new(InspectAllPolicy {
            no_more_calls: std::sync::atomic::AtomicUsize::new(0),
        });

        let mut sidecars = BTreeMap::new();
        sidecars.insert(
            "x.jar.sha1".to_string(),
            "2ef7bde608ce5404e97d5f042f95f89f1c232871".to_string(),
        );
        sidecars.insert(
            "x.jar.md5".to_string(),
            "ed076287532e86365e841e92bfc50d8c".to_string(),
        );

        let cfg = ChecksumValidatorConfig {
            policy: Arc::clone(&policy) as Arc<dyn ChecksumPolicy>,
            fetcher: Some(Arc::new(FixedFetcher(sidecars))),
            provided: None,
        };
        let mut validator = ChecksumValidator::new(
            "x.jar",
            vec![sha1_algorithm(), md5_algorithm()],
            vec![
                (sha1_algorithm(), "x.jar.sha1".to_string()),
                (md5_algorithm(), "x.jar.md5".to_string()),
            ],
            cfg,
        );

        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        computed.insert("MD5".to_string(), ok("ed076287532e86365e841e92bfc50d8c"));

        assert!(validator.validate(&computed, &BTreeMap::new()).is_ok());
        assert_eq!(
            policy.no_more_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn handle_delegates_to_policy_transfer_checksum_failure() {
        let strict = ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg_strict());
        let warn = ChecksumValidator::new(
            "x.jar",
            vec![sha1_algorithm()],
            vec![],
            ChecksumValidatorConfig {
                policy: Arc::new(policy::WarnChecksumPolicy),
                fetcher: None,
                provided: None,
            },
        );
        let failure = ChecksumFailure {
            expected: "a".to_string(),
            actual: "b".to_string(),
            retry_worthy: true,
        };
        assert!(!strict.handle(&failure));
        assert!(warn.handle(&failure));
    }

    #[test]
    fn retry_clears_staged_state_and_notifies_policy() {
        let mut provided = BTreeMap::new();
        provided.insert(
            ("x.jar".to_string(), "SHA-1".to_string()),
            "2ef7bde608ce5404e97d5f042f95f89f1c232871".to_string(),
        );
        let cfg = ChecksumValidatorConfig {
            policy: Arc::new(policy::StrictChecksumPolicy),
            fetcher: None,
            provided: Some(Arc::new(FixedProvided(provided))),
        };
        let mut validator = ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg);

        let mut computed = BTreeMap::new();
        computed.insert(
            "SHA-1".to_string(),
            ok("2ef7bde608ce5404e97d5f042f95f89f1c232871"),
        );
        validator.validate(&computed, &BTreeMap::new()).unwrap();
        assert!(!validator.staged.is_empty());

        validator.retry();
        assert!(validator.staged.is_empty());
        assert!(validator.tolerated().is_empty());
    }

    #[test]
    fn closed_validator_rejects_further_validation() {
        let mut validator =
            ChecksumValidator::new("x.jar", vec![sha1_algorithm()], vec![], cfg_strict());
        validator.close();
        let computed = BTreeMap::new();
        assert!(matches!(
            validator.validate(&computed, &BTreeMap::new()),
            Err(ConnectorError::Closed)
        ));
    }
}

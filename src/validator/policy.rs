//! Pluggable checksum acceptance policy. Mirrors the match/mismatch/silence
//! callbacks a real repository connector offers: strict (fail closed) and
//! warn (fail open, log and move on) are the two built-in behaviors: most
//! deployments pick one of these two rather than writing a custom policy.

use crate::checksum::ChecksumKind;
use crate::error::ChecksumFailure;

/// Decides whether a checksum agreement or disagreement is decisive, and
/// whether a raised failure can still be tolerated at the transfer level.
///
/// A policy never sees raw bytes, only the already-computed digests; it is
/// pure decision logic, open for callers to implement their own (e.g. a
/// policy that only enforces PROVIDED checksums and ignores remote ones).
pub trait ChecksumPolicy: Send + Sync {
    /// `true` accepts this checksum and stops evaluating every remaining
    /// checksum source for the whole validation; `false` keeps inspecting
    /// the rest.
    fn on_match(&self, kind: ChecksumKind, algorithm: &str) -> bool;

    /// Returning `Err` raises the failure, aborting validation with it;
    /// returning `Ok` tolerates this particular disagreement and moves on
    /// to the next checksum source.
    fn on_mismatch(
        &self,
        kind: ChecksumKind,
        algorithm: &str,
        expected: &str,
        actual: &str,
    ) -> Result<(), ChecksumFailure>;

    /// A checksum source (a REMOTE_EXTERNAL fetch, most often) errored
    /// rather than produced a value to compare against. Always records and
    /// continues; there is no abort path here.
    fn on_error(&self, kind: ChecksumKind, algorithm: &str, failure: &ChecksumFailure);

    /// Called once per `validate` call when the REMOTE_EXTERNAL sweep ran
    /// and did not end in an accepted match, regardless of how many
    /// checksums were seen along the way.
    fn on_no_more_checksums(&self) -> Result<(), ChecksumFailure>;

    /// A transfer is about to be retried after a tolerated-for-retry
    /// checksum mismatch.
    fn on_transfer_retry(&self);

    /// Last chance to tolerate a raised checksum failure at the transfer
    /// level, after retries are exhausted (or not worth spending). `true`
    /// lets the transfer succeed without committing any sidecar.
    fn on_transfer_checksum_failure(&self, failure: &ChecksumFailure) -> bool;
}

/// Fails closed: the first match wins and stops further checking; the first
/// mismatch is fatal; a resource with no checksums at all is tolerated
/// (nothing to contradict), matching the distilled spec's checksum-present
/// invariant rather than a blanket require-some-checksum rule.
pub struct StrictChecksumPolicy;

impl ChecksumPolicy for StrictChecksumPolicy {
    fn on_match(&self, _kind: ChecksumKind, _algorithm: &str) -> bool {
        true
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
            retry_worthy: true,
        })
    }

    fn on_error(&self, kind: ChecksumKind, algorithm: &str, failure: &ChecksumFailure) {
        tracing::warn!(?kind, algorithm, error = %failure.actual, "checksum source errored, skipping");
    }

    fn on_no_more_checksums(&self) -> Result<(), ChecksumFailure> {
        Ok(())
    }

    fn on_transfer_retry(&self) {
        tracing::info!("retrying transfer after a checksum mismatch");
    }

    fn on_transfer_checksum_failure(&self, _failure: &ChecksumFailure) -> bool {
        false
    }
}

/// Fails open: mismatches are logged by the caller and tolerated rather than
/// aborting the transfer, and a confirmed sidecar is never written for a
/// tolerated mismatch (invariant: a `.sha1` file on disk always matched at
/// some point).
pub struct WarnChecksumPolicy;

impl ChecksumPolicy for WarnChecksumPolicy {
    fn on_match(&self, _kind: ChecksumKind, _algorithm: &str) -> bool {
        true
    }

    fn on_mismatch(
        &self,
        kind: ChecksumKind,
        algorithm: &str,
        expected: &str,
        actual: &str,
    ) -> Result<(), ChecksumFailure> {
        tracing::warn!(?kind, algorithm, expected, actual, "checksum mismatch tolerated");
        Ok(())
    }

    fn on_error(&self, kind: ChecksumKind, algorithm: &str, failure: &ChecksumFailure) {
        tracing::warn!(?kind, algorithm, error = %failure.actual, "checksum source errored, skipping");
    }

    fn on_no_more_checksums(&self) -> Result<(), ChecksumFailure> {
        Ok(())
    }

    fn on_transfer_retry(&self) {
        tracing::info!("retrying transfer after a checksum mismatch");
    }

    fn on_transfer_checksum_failure(&self, _failure: &ChecksumFailure) -> bool {
        true
    }
}

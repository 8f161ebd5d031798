// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for artifact fingerprinting.

use super::*;
use proptest::prelude::*;

#[test]
fn equal_payloads_have_equal_fingerprints() {
    let a = Rendered::new(b"{\"listeners\":[]}".to_vec());
    let b = Rendered::new(b"{\"listeners\":[]}".to_vec());
    assert_eq!(a.fingerprint, b.fingerprint);
}

#[test]
fn different_payloads_have_different_fingerprints() {
    let a = Rendered::new(b"{\"listeners\":[]}".to_vec());
    let b = Rendered::new(b"{\"listeners\":[1]}".to_vec());
    assert_ne!(a.fingerprint, b.fingerprint);
}

#[test]
fn hex_is_64_chars_and_short_is_prefix() {
    let fp = Fingerprint::of(b"payload");
    let hex = fp.to_hex();
    assert_eq!(hex.len(), 64);
    assert!(hex.starts_with(&fp.short()));
    assert_eq!(fp.short().len(), 12);
}

#[test]
fn artifact_round_trips_rendered() {
    let rendered = Rendered::new(b"opaque bytes".to_vec());
    let artifact = ConfigArtifact::new(&rendered, "/tmp/envoy-rev0.json".into());
    let back = artifact.to_rendered();
    assert_eq!(back, rendered);
    assert_eq!(back.fingerprint, artifact.fingerprint);
}

#[test]
fn transient_classification() {
    assert!(RenderError::Transient("upstream timeout".into()).is_transient());
    assert!(!RenderError::Permanent("bad schema".into()).is_transient());
}

proptest! {
    #[test]
    fn fingerprint_is_deterministic(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(Fingerprint::of(&payload), Fingerprint::of(&payload));
    }

    #[test]
    fn rendered_fingerprint_matches_payload(
        rendered in crate::test_support::strategies::arb_rendered(),
    ) {
        prop_assert_eq!(rendered.fingerprint, Fingerprint::of(&rendered.payload));
    }
}

//! Credential verification timing.
//!
//! Verification hashes the presented token and compares the digest against
//! every stored digest in fixed time. The groups below present tokens whose
//! digests differ from the stored one at the first byte, the middle and the
//! last byte; the three timings should be indistinguishable.
//!
//! Run with: `cargo bench --bench verify_benchmark`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use custos::credentials::{CredentialRecord, CredentialVerifier, Role, TokenDigest};

/// Build a verifier whose primary digest is exactly `stored`.
fn verifier_with_digest(stored: &TokenDigest) -> CredentialVerifier {
    CredentialVerifier::new(vec![
        CredentialRecord {
            role: Role::Primary,
            digest: stored.clone(),
        },
        CredentialRecord {
            role: Role::Emergency,
            digest: TokenDigest::of_token("emergency"),
        },
        CredentialRecord {
            role: Role::Setup,
            digest: TokenDigest::of_token("setup"),
        },
    ])
    .unwrap()
}

/// Find a token whose digest agrees with `target` on the first `prefix`
/// hex characters and differs on the next one.
fn token_diverging_at(target: &str, prefix: usize) -> String {
    (0u64..)
        .map(|n| format!("probe-{n}"))
        .find(|t| {
            let hex = TokenDigest::of_token(t).to_hex();
            hex[..prefix] == target[..prefix] && hex.as_bytes()[prefix] != target.as_bytes()[prefix]
        })
        .unwrap()
}

fn bench_verify(c: &mut Criterion) {
    let stored = TokenDigest::of_token("primary");
    let verifier = verifier_with_digest(&stored);
    let target = stored.to_hex();

    let mut group = c.benchmark_group("verify");
    group.bench_function("match", |b| {
        b.iter(|| verifier.verify(black_box("primary")))
    });

    // Brute-forcing a long shared prefix is expensive; a few hex characters
    // are enough to separate "first byte" from "later byte" cases.
    for (name, prefix) in [("differs_at_0", 0), ("differs_at_2", 2), ("differs_at_4", 4)] {
        let probe = token_diverging_at(&target, prefix);
        group.bench_function(name, |b| b.iter(|| verifier.verify(black_box(&probe))));
    }
    group.bench_function("empty", |b| b.iter(|| verifier.verify(black_box(""))));
    group.finish();
}

criterion_group!(benches, bench_verify);
criterion_main!(benches);

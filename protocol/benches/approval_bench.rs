// Hot-path benchmarks for the VIGIL protocol.
//
// Covers operation canonicalization and hashing, card envelope creation and
// verification, the sealed/legacy encryption tiers, and the approval codec.
// These are the operations that run once per steward per round; the relay
// round-trip dwarfs them all, but regressions here still matter for nodes
// fanning out to large federations.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use vigil_protocol::approval::{
    decode_request, encode_request, ApprovalRequest, TransitPolicy,
};
use vigil_protocol::card::{CardSigningOperation, SigningPurpose};
use vigil_protocol::config;
use vigil_protocol::crypto::keys::StewardKeypair;
use vigil_protocol::identity::StewardId;
use vigil_protocol::operation::{operation_hash, Operation, OperationType};
use vigil_protocol::transport::{open, seal, EncryptionTier, MessagingKeypair};

fn sample_operation() -> Operation {
    let actor = StewardId::from_public_key(&StewardKeypair::generate().public_key());
    Operation::new(
        OperationType::Payment,
        250_000,
        "acct-992817",
        "Q3 infrastructure invoice",
        actor,
    )
    .expect("valid operation")
}

fn bench_operation_hash(c: &mut Criterion) {
    let op = sample_operation();
    c.bench_function("operation/hash", |b| {
        b.iter(|| operation_hash(&op).unwrap());
    });
}

fn bench_canonical_bytes(c: &mut Criterion) {
    let op = sample_operation();
    c.bench_function("operation/canonical_bytes", |b| {
        b.iter(|| op.canonical_bytes());
    });
}

fn bench_card_envelope(c: &mut Criterion) {
    let keypair = StewardKeypair::generate();
    let payload = [0x42u8; 32];

    c.bench_function("card/sign_envelope", |b| {
        b.iter(|| {
            let msg =
                CardSigningOperation::signed_message(&payload, SigningPurpose::GuardianApproval, 7);
            keypair.sign(&msg)
        });
    });

    let msg = CardSigningOperation::signed_message(&payload, SigningPurpose::GuardianApproval, 7);
    let envelope = CardSigningOperation {
        payload_hash: payload,
        purpose: SigningPurpose::GuardianApproval,
        counter: 7,
        card_pubkey: keypair.public_key(),
        signature: keypair.sign(&msg),
    };
    c.bench_function("card/verify_envelope", |b| {
        b.iter(|| envelope.signature_valid());
    });
}

fn bench_tiers(c: &mut Criterion) {
    let recipient = MessagingKeypair::generate();
    let payload = vec![0xA5u8; 256];

    let mut group = c.benchmark_group("tier/seal");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    for tier in [EncryptionTier::Sealed, EncryptionTier::Legacy] {
        group.bench_with_input(
            BenchmarkId::from_parameter(tier),
            &tier,
            |b, &tier| {
                b.iter(|| seal(tier, &recipient.public_key(), &payload).unwrap());
            },
        );
    }
    group.finish();

    let mut group = c.benchmark_group("tier/open");
    for tier in [EncryptionTier::Sealed, EncryptionTier::Legacy] {
        let envelope = seal(tier, &recipient.public_key(), &payload).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(tier),
            &envelope,
            |b, envelope| {
                b.iter(|| open(tier, &recipient, envelope).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let op = sample_operation();
    let policy = TransitPolicy::for_operation(&op);
    let request = ApprovalRequest {
        operation_hash: operation_hash(&op).unwrap(),
        requester: StewardId::from_public_key(&StewardKeypair::generate().public_key()),
        nonce: [0x17u8; 32],
        expires_at: config::now_ms() + config::APPROVAL_DEADLINE_MS,
        threshold_required: 2,
        eligible_count: 3,
        op_type: OperationType::Payment,
    };

    c.bench_function("codec/encode_request_scanned", |b| {
        b.iter(|| encode_request(&request, &policy).unwrap());
    });

    let bytes = encode_request(&request, &policy).unwrap();
    c.bench_function("codec/decode_request", |b| {
        b.iter(|| decode_request(&bytes).unwrap());
    });
}

criterion_group!(
    benches,
    bench_operation_hash,
    bench_canonical_bytes,
    bench_card_envelope,
    bench_tiers,
    bench_codec,
);
criterion_main!(benches);

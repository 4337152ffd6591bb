use cirrus_crypto::hybrid::{decrypt_with, encrypt_to};
use cirrus_crypto::{
    decrypt_block, encrypt_block, generate_content_key, generate_session_key, KeyPacket,
    NodeKeyPair, SrpClient, SrpGroup, SrpServer,
};
use secrecy::SecretString;

fn main() {
    divan::main();
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_block(bencher: divan::Bencher, size: usize) {
    let key = generate_content_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_block(divan::black_box(&key), 0, "rev", divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_block(bencher: divan::Bencher, size: usize) {
    let key = generate_content_key();
    let encrypted = encrypt_block(&key, 0, "rev", &make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt_block(divan::black_box(&key), 0, "rev", divan::black_box(&encrypted)).unwrap());
}

#[divan::bench]
fn bench_keypair_unlock(bencher: divan::Bencher) {
    let pair = NodeKeyPair::generate();
    let key = generate_session_key();
    let locked = pair.lock(key.as_bytes()).unwrap();
    bencher.bench(|| NodeKeyPair::unlock(divan::black_box(&locked), key.as_bytes()).unwrap());
}

#[divan::bench]
fn bench_hybrid_roundtrip(bencher: divan::Bencher) {
    let pair = NodeKeyPair::generate();
    let public = pair.public();
    bencher.bench(|| {
        let msg = encrypt_to(&public, divan::black_box(b"folder name")).unwrap();
        decrypt_with(&pair, &msg).unwrap()
    });
}

#[divan::bench]
fn bench_key_packet_unwrap(bencher: divan::Bencher) {
    let parent = generate_session_key();
    let packet = KeyPacket::new(&generate_session_key(), Some("parent"), "file", 0);
    let wrapped = packet.wrap_with_session(&parent).unwrap();
    bencher.bench(|| KeyPacket::unwrap_with_session(divan::black_box(&wrapped), &parent).unwrap());
}

#[divan::bench(sample_count = 10)]
fn bench_srp_exchange(bencher: divan::Bencher) {
    let group = SrpGroup::rfc5054_2048().unwrap();
    let password = SecretString::from("benchmark-password");
    let registration = SrpClient::new(group.clone(), "bench@x.com")
        .unwrap()
        .generate_registration_credentials(&password)
        .unwrap();

    bencher.bench(|| {
        let mut client = SrpClient::new(group.clone(), "bench@x.com").unwrap();
        let server = SrpServer::new(group.clone(), &registration.verifier).unwrap();
        let a_pub = client.start_authentication().unwrap();
        let m1 = client
            .process_challenge(&registration.salt, &server.server_public(), &password)
            .unwrap();
        let (m2, _) = server.verify_client(&a_pub, &m1).unwrap();
        client.verify_server(&m2).unwrap().is_some()
    });
}

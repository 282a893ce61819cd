use secrecy::SecretString;
use unseal_core::Scheme;
use unseal_crypto::securetar::{EnvelopeVersion, SecureTarReader};
use unseal_crypto::testing::seal;
use unseal_crypto::derive_key_for_scheme;

const PASS: &str = "ABCD-1234-EFGH-5678-IJKL-9012-MNOP";

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench]
fn bench_derive_key() {
    derive_key_for_scheme(divan::black_box(&SecretString::from(PASS)), Scheme::Aes128).unwrap();
}

#[divan::bench(args = [65536, 1048576, 16777216])]
fn bench_stream_decrypt(bencher: divan::Bencher, size: usize) {
    let key = derive_key_for_scheme(&SecretString::from(PASS), Scheme::Aes128).unwrap();
    let sealed = seal(&make_data(size), PASS, [3u8; 16], EnvelopeVersion::V2).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut reader =
                SecureTarReader::new(divan::black_box(sealed.as_slice()), &key, "bench").unwrap();
            std::io::copy(&mut reader, &mut std::io::sink()).unwrap()
        });
}

fn main() {
    divan::main();
}

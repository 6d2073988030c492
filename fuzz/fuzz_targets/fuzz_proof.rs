#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use custody_core::{verify_proof, Error, ProofStatement, PublicKey};

// Generator point G, uncompressed
const ATTESTATION_KEY: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

#[derive(Debug, Arbitrary)]
struct Input {
    message: String,
    signature: String,
    recovery: u8,
}

fuzz_target!(|input: Input| {
    let _ = ProofStatement::decode(&input.message);

    let key = PublicKey::from_hex(ATTESTATION_KEY).unwrap();
    match verify_proof(&input.signature, input.recovery, &input.message, &key) {
        Ok(_) | Err(Error::InvalidSignatureEncoding(_)) => {}
        Err(e) => panic!("unexpected error: {}", e),
    }
});

#![no_main]

use std::sync::OnceLock;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use custody_core::{decrypt, EncryptedEnvelope, Error, KeyPath, Origin, PurposeKeyNode, RootSeed};

#[derive(Debug, Arbitrary)]
struct Input {
    iv: Vec<u8>,
    ephem_public_key: Vec<u8>,
    ciphertext: Vec<u8>,
    mac: Vec<u8>,
}

fn node() -> &'static PurposeKeyNode {
    static NODE: OnceLock<PurposeKeyNode> = OnceLock::new();
    NODE.get_or_init(|| {
        let root = RootSeed::from_entropy(&[0x5Au8; 32]).unwrap();
        let origin = Origin::new("fuzz:origin").unwrap();
        PurposeKeyNode::setup(&root, &origin, "auto").unwrap()
    })
}

fuzz_target!(|input: Input| {
    let envelope = EncryptedEnvelope {
        iv: input.iv,
        ephem_public_key: input.ephem_public_key,
        ciphertext: input.ciphertext,
        mac: input.mac,
    };

    // Forged envelopes only ever fail authentication
    match decrypt(node(), &KeyPath::default(), &envelope) {
        Ok(_) | Err(Error::DecryptionFailed) => {}
        Err(e) => panic!("unexpected error: {}", e),
    }
});

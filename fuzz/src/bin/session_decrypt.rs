#[macro_use]
extern crate afl;
use cohort::{
    AccountId, DeviceAddress, EncryptOptions, Envelope, KeyTransport, MemoryDirectory, Messenger,
    MessengerConfig, Payload, RatchetMessage, RecipientKey, TrustState,
};
use std::sync::Arc;

/// An attacker holding a session with the victim, who then sends arbitrary bytes.
fn established() -> (Messenger, DeviceAddress) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Setup failed");
    let directory = MemoryDirectory::new();
    let device = |account: &str| {
        Messenger::with_memory_store(
            DeviceAddress::new(account, 1),
            MessengerConfig::default(),
            Arc::new(directory.clone()),
        )
        .expect("Setup failed")
    };

    // The victim
    let alice = device("alice@example.org");
    // The attacker
    let mallory = device("mallory@example.org");

    runtime.block_on(async {
        alice.publish_bundle().await.expect("Setup failed");
        mallory.publish_bundle().await.expect("Setup failed");
        mallory
            .decide_trust(alice.local(), TrustState::Trusted)
            .expect("Setup failed");

        let first = mallory
            .encrypt_to(
                &AccountId::from("alice@example.org"),
                b"hello",
                &EncryptOptions::default(),
            )
            .await
            .expect("Setup failed");
        alice
            .decrypt(mallory.local(), &first.envelope)
            .into_result()
            .expect("Setup failed");
    });

    let attacker = mallory.local().clone();
    (alice, attacker)
}

fn main() {
    let (alice, mallory) = established();

    fuzz!(|data: &[u8]| {
        let split = data.len().min(64);
        let (header, body) = data.split_at(split);
        let Ok(message) = RatchetMessage::from_bytes(body) else {
            return;
        };
        let mut nonce = [0u8; 12];
        let take = header.len().min(12);
        nonce[..take].copy_from_slice(&header[..take]);

        let envelope = Envelope {
            sender: mallory.clone(),
            keys: vec![RecipientKey {
                recipient: alice.local().clone(),
                transport: KeyTransport {
                    pre_key: None,
                    message,
                },
            }],
            payload: Payload {
                nonce,
                ciphertext: header.to_vec(),
            },
            hints: Default::default(),
        };
        let _ = alice.decrypt(&mallory, &envelope);
    });
}

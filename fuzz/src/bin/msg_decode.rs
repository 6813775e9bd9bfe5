#[macro_use]
extern crate afl;
use cohort::RatchetMessage;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(message) = RatchetMessage::from_bytes(data) {
            assert_eq!(message.to_bytes(), data);
        }
    });
}

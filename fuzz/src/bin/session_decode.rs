#[macro_use]
extern crate afl;
use cohort::{Session, SessionRecord};

fn main() {
    fuzz!(|data: &[u8]| {
        let _ = Session::deserialize(data);
        let _ = SessionRecord::deserialize(data);
    });
}

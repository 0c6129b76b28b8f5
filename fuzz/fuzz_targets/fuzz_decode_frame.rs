#![no_main]

use authconn::protocol::decode::{decode_data_frame, decode_sasl_frame};
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fn drain<T>(data: &[u8], decode: fn(&BytesMut) -> std::io::Result<(T, usize)>) {
    let mut buf = BytesMut::from(data);

    // Several frames may arrive in one TCP segment
    while !buf.is_empty() {
        match decode(&buf) {
            Ok((_, consumed)) => {
                assert!(consumed > 0 && consumed <= buf.len());
                let _ = buf.split_to(consumed);
            }
            Err(_) => break,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    drain(data, decode_sasl_frame);
    drain(data, decode_data_frame);
});

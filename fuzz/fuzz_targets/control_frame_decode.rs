#![no_main]

use libfuzzer_sys::fuzz_target;
use rct_protocol::{decode_command_bytes, decode_command_frame, encode_command_frame, ProtocolError};

fuzz_target!(|data: &[u8]| {
    match decode_command_bytes(data) {
        Ok(command) => {
            let encoded = encode_command_frame(command);
            assert_eq!(decode_command_frame(&encoded), Ok(command));
        }
        Err(ProtocolError::InvalidUtf8) => {
            assert!(std::str::from_utf8(data).is_err());
        }
        Err(ProtocolError::UnknownFrame(reported)) => {
            assert!(reported.chars().count() <= 64 + 3);
        }
    }
});

//! Fuzz target: `decode_command` and `decode_chunk`
//!
//! Arbitrary bytes as a command envelope must decode to a command or a
//! typed error, never a panic. A decoded command must survive a trip
//! through the host encoder unchanged.
//!
//! cargo fuzz run fuzz_command_decoder

#![no_main]

use codeloader::rpc::codec::{ChunkPayload, decode_chunk, decode_command, encode_command};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(cmd) = decode_command(data) {
        let again = decode_command(&encode_command(&cmd));
        assert_eq!(again, Ok(cmd));
    }

    if let Ok(text) = core::str::from_utf8(data) {
        let _ = decode_chunk(ChunkPayload::Encoded(text.into()));
    }
});

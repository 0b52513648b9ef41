//! Fuzz target: `SerialLineDecoder::feed`
//!
//! Drives arbitrary byte sequences into the serial line decoder, split
//! at a data-chosen stride, and asserts that the partial line never
//! grows past the configured limit.
//!
//! cargo fuzz run fuzz_serial_lines

#![no_main]

use codeloader::rpc::frame::SerialLineDecoder;
use libfuzzer_sys::fuzz_target;

const MAX_LINE: usize = 256;

fuzz_target!(|data: &[u8]| {
    let Some((&stride, stream)) = data.split_first() else {
        return;
    };
    let stride = usize::from(stride).max(1);

    let mut decoder = SerialLineDecoder::new(500, MAX_LINE);
    for (i, piece) in stream.chunks(stride).enumerate() {
        decoder.feed(piece, (i as u64) * 100);
        assert!(decoder.pending_len() <= MAX_LINE, "partial line over limit");
        while decoder.next_frame().is_some() {}
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    decoder.feed(stream, 0);
});

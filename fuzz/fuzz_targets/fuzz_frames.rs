//! Fuzz target for reply and event parsing.
//!
//! Tests that arbitrary server output doesn't cause panics in any parser
//! that sees data from the socket.

#![no_main]

use libfuzzer_sys::fuzz_target;
use querybot::codec::{self, ReplyStatus};
use querybot::directory::parse_client_list;
use querybot::event::{self, TextMessage};

fuzz_target!(|data: &[u8]| {
    let _ = codec::reply_complete(data);
    let mut buffer = data.to_vec();
    let _ = codec::take_event_lines(&mut buffer);
    let _ = codec::take_complete_text(&mut buffer);

    let text = String::from_utf8_lossy(data);

    let _ = codec::parse_keyvalue_blob(&text);
    let _ = codec::decode_field_value(&text);
    let _ = ReplyStatus::parse(&text);
    let _ = parse_client_list(&text);
    let _ = TextMessage::parse(&text);
    let _ = event::route(&text, Some("1"));
});

use crate::network::build_framed_packet;

/// Command byte of the packet telling a client why it was disconnected.
pub const KICK_CMD: u8 = 0x0A;

/// Builds the kick notice: 0xAA-framed, cmd=0x0A, followed by the UTF-8
/// message text.
pub fn build_kick_message(text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.push(KICK_CMD);
    payload.extend_from_slice(text.as_bytes());
    build_framed_packet(&payload)
}

/// Extracts the message text from a kick notice, if `pkt` is one.
pub fn parse_kick_message(pkt: &[u8]) -> Option<String> {
    if pkt.len() < 4 || pkt[0] != 0xAA || pkt[3] != KICK_CMD {
        return None;
    }
    let payload_len = u16::from_be_bytes([pkt[1], pkt[2]]) as usize;
    if pkt.len() < payload_len + 3 {
        return None;
    }
    std::str::from_utf8(&pkt[4..payload_len + 3]).ok().map(str::to_string)
}

use sha1::{Digest, Sha1};

const WS_MAGIC_CONST: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "Sec-WebSocket-Key:";

fn sha1(msg: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(msg);
    hasher.finalize().into()
}

/// Finds the `Sec-WebSocket-Key` header in raw HTTP upgrade text.
///
/// The header name match is exact and case-sensitive; a connection still
/// awaiting its handshake calls this on every inbound chunk until a key
/// turns up.
pub fn extract_key(message: &str) -> Option<&str> {
    message
        .lines()
        .find_map(|line| line.strip_prefix(KEY_HEADER))
        .map(str::trim)
}

pub fn generate_accept_key(key: &str) -> String {
    let concatenated = [key.as_bytes(), WS_MAGIC_CONST].concat();
    let hash = sha1(&concatenated);
    base64::encode(&hash)
}

/// Builds the complete 101 Switching Protocols response for `key`.
pub fn build_accept_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        generate_accept_key(key)
    )
}

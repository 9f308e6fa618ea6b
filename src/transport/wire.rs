//! Routing prefix handling for raw multipart messages.
//!
//! ```text
//! [ident_0, …, ident_n, "<IDS|MSG>", signature, header, parent, metadata, content, buffers…]
//!  └──── identities ──┘  delimiter                └──────────── message parts ──────────┘
//! ```

/// Separates routing identities from the message.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Splits `frames` at the delimiter into `(identities, rest)`.
///
/// `rest` starts with the signature. Without a delimiter, everything is `rest`.
pub fn split_identities(mut frames: Vec<Vec<u8>>) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    match frames.iter().position(|f| f.as_slice() == DELIMITER) {
        Some(idx) => {
            let rest = frames.split_off(idx + 1);
            frames.truncate(idx);
            (frames, rest)
        }
        None => (Vec::new(), frames),
    }
}

/// Strips identities, delimiter and signature, leaving the message parts.
///
/// Frames without a delimiter are already bare message parts and are returned unchanged.
pub fn strip_routing(frames: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    if !frames.iter().any(|f| f.as_slice() == DELIMITER) {
        return frames;
    }
    let (_, mut rest) = split_identities(frames);
    if !rest.is_empty() {
        rest.remove(0);
    }
    rest
}

/// Prefixes message parts with the delimiter and a signature frame.
pub fn with_routing(signature: Vec<u8>, parts: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(parts.len() + 2);
    frames.push(DELIMITER.to_vec());
    frames.push(signature);
    frames.extend(parts);
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> Vec<Vec<u8>> {
        vec![b"h".to_vec(), b"p".to_vec(), b"m".to_vec(), b"c".to_vec()]
    }

    #[test]
    fn strips_identities_and_signature() {
        let mut frames = vec![b"id-a".to_vec(), b"id-b".to_vec()];
        frames.extend(with_routing(b"sig".to_vec(), parts()));

        let (ids, rest) = split_identities(frames.clone());
        assert_eq!(ids, vec![b"id-a".to_vec(), b"id-b".to_vec()]);
        assert_eq!(rest[0], b"sig".to_vec());

        assert_eq!(strip_routing(frames), parts());
    }

    #[test]
    fn bare_parts_pass_through() {
        let mut with_buffer = parts();
        with_buffer.push(b"buf".to_vec());
        assert_eq!(strip_routing(with_buffer.clone()), with_buffer);
    }
}

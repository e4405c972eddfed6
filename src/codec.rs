use crate::error::Error;
use crate::frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads a single logical message off the wire, transparently reassembling any
/// fragmented (Continuation) frames.
///
/// A Ping or Pong observed while a fragmented data message is in progress is returned
/// immediately as its own result, abandoning the in-progress reassembly rather than
/// buffering around it — this is a stated conformance gap, not a bug (see `SPEC_FULL.md`
/// §9): a fragmented message interrupted by a control frame cannot be resumed by this
/// codec. Every call starts from a clean slate; the codec carries no state across calls.
pub async fn decode_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
    max_message_size: usize,
) -> Result<(OpCode, Vec<u8>), Error> {
    let first = read_frame(reader, max_frame_size).await?;

    match first.opcode {
        OpCode::Close => Ok((OpCode::Close, first.payload)),
        OpCode::Ping | OpCode::Pong => Ok((first.opcode, first.payload)),
        OpCode::Continuation => Err(Error::InvalidContinuationFrame),
        OpCode::Text | OpCode::Binary => {
            if first.fin {
                return Ok((first.opcode, first.payload));
            }

            let message_opcode = first.opcode;
            let mut buffer = first.payload;

            loop {
                let next = read_frame(reader, max_frame_size).await?;
                match next.opcode {
                    OpCode::Close => return Ok((OpCode::Close, next.payload)),
                    OpCode::Ping | OpCode::Pong => return Ok((next.opcode, next.payload)),
                    OpCode::Text | OpCode::Binary => return Err(Error::InvalidFrameFragmentation),
                    OpCode::Continuation => {
                        buffer.extend_from_slice(&next.payload);
                        if buffer.len() > max_message_size {
                            return Err(Error::MaxMessageSize);
                        }
                        if next.fin {
                            return Ok((message_opcode, buffer));
                        }
                    }
                }
            }
        }
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_size: usize) -> Result<Frame, Error> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = (header[0] & 0b1000_0000) != 0;
    let opcode = OpCode::from(header[0] & 0b0000_1111)?;

    let rsv = header[0] & 0b0111_0000;
    if rsv != 0 {
        return Err(Error::RSVNotZero);
    }

    if !fin && opcode.is_control() {
        return Err(Error::ControlFramesFragmented);
    }

    let masked = (header[1] & 0b1000_0000) != 0;
    let mut length = (header[1] & 0b0111_1111) as u64;

    if length > MAX_CONTROL_PAYLOAD_LEN as u64 && opcode.is_control() {
        return Err(Error::ControlFramePayloadSize);
    }

    if length == 126 {
        let mut extended = [0u8; 2];
        reader.read_exact(&mut extended).await?;
        length = u16::from_be_bytes(extended) as u64;
    } else if length == 127 {
        let mut extended = [0u8; 8];
        reader.read_exact(&mut extended).await?;
        if extended[0] & 0x80 != 0 {
            return Err(Error::InvalidPayloadLength);
        }
        length = u64::from_be_bytes(extended);
    }

    if length > max_frame_size as u64 {
        return Err(Error::MaxFrameSize);
    }

    // Per RFC 6455 §5.1, every frame sent from a client to a server MUST be masked.
    if !masked {
        return Err(Error::UnmaskedClientFrame);
    }

    let mut mask = [0u8; 4];
    reader.read_exact(&mut mask).await?;

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame::new(fin, opcode, payload))
}

/// Encodes a single, unfragmented, unmasked frame. Server-to-client frames must never be
/// masked (RFC 6455 §5.1); this path never sets the mask bit.
pub fn encode_frame(payload: &[u8], opcode: OpCode) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | opcode.as_u8());

    let len = payload.len();
    if len <= 125 {
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(payload);
    out
}

pub fn encode_text(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload, OpCode::Text)
}

pub fn encode_binary(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload, OpCode::Binary)
}

pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload, OpCode::Pong)
}

pub fn encode_close(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload, OpCode::Close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MAX_FRAME: usize = 16 << 20;
    const MAX_MESSAGE: usize = 64 << 20;

    fn mask_payload(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect()
    }

    fn masked_frame(fin: bool, opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut out = vec![(fin as u8) << 7 | opcode.as_u8()];
        let len = payload.len();
        if len <= 125 {
            out.push(0x80 | len as u8);
        } else if len <= 0xFFFF {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&mask);
        out.extend_from_slice(&mask_payload(payload, mask));
        out
    }

    #[tokio::test]
    async fn decode_of_masked_client_frame_round_trips_for_various_lengths() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        for len in [0usize, 125, 126, 65535, 65536] {
            let payload = vec![0x41u8; len];
            let wire = masked_frame(true, OpCode::Text, &payload, mask);
            let mut cursor = Cursor::new(wire);
            let (opcode, decoded) = decode_message(&mut cursor, MAX_FRAME, MAX_MESSAGE).await.unwrap();
            assert_eq!(opcode, OpCode::Text);
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn encode_text_and_binary_produce_decodable_unmasked_frames() {
        for payload in [b"".to_vec(), b"hi".to_vec()] {
            let encoded = encode_text(&payload);
            assert_eq!(encoded[0], 0x80 | OpCode::Text.as_u8());
            assert_eq!(encoded[1] as usize & 0x7F, payload.len());
            assert_eq!(&encoded[2..], &payload[..]);

            let encoded = encode_binary(&payload);
            assert_eq!(encoded[0], 0x80 | OpCode::Binary.as_u8());
        }
    }

    #[tokio::test]
    async fn fragmented_message_reassembles_in_order() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let mut wire = Vec::new();
        wire.extend(masked_frame(false, OpCode::Binary, &[0xAA, 0xBB], mask));
        wire.extend(masked_frame(true, OpCode::Continuation, &[0xCC], mask));

        let mut cursor = Cursor::new(wire);
        let (opcode, payload) = decode_message(&mut cursor, MAX_FRAME, MAX_MESSAGE).await.unwrap();
        assert_eq!(opcode, OpCode::Binary);
        assert_eq!(payload, vec![0xAA, 0xBB, 0xCC]);
    }

    #[tokio::test]
    async fn thousand_fragment_message_reassembles() {
        let mask = [1, 2, 3, 4];
        let mut wire = Vec::new();
        let mut expected = Vec::new();
        wire.extend(masked_frame(false, OpCode::Text, &[0], mask));
        expected.push(0);
        for i in 1..1000 {
            let fin = i == 999;
            let byte = (i % 256) as u8;
            wire.extend(masked_frame(fin, OpCode::Continuation, &[byte], mask));
            expected.push(byte);
        }

        let mut cursor = Cursor::new(wire);
        let (opcode, payload) = decode_message(&mut cursor, MAX_FRAME, MAX_MESSAGE).await.unwrap();
        assert_eq!(opcode, OpCode::Text);
        assert_eq!(payload, expected);
    }

    #[tokio::test]
    async fn oversized_64_bit_length_is_rejected() {
        let mut wire = vec![0x82u8, 0xFF];
        wire.extend_from_slice(&[0x80, 0, 0, 0, 0, 0, 0, 0]);
        let mut cursor = Cursor::new(wire);
        let result = decode_message(&mut cursor, MAX_FRAME, MAX_MESSAGE).await;
        assert!(matches!(result, Err(Error::InvalidPayloadLength)));
    }

    #[tokio::test]
    async fn unmasked_client_frame_is_rejected() {
        let wire = vec![0x81u8, 0x02, b'h', b'i'];
        let mut cursor = Cursor::new(wire);
        let result = decode_message(&mut cursor, MAX_FRAME, MAX_MESSAGE).await;
        assert!(matches!(result, Err(Error::UnmaskedClientFrame)));
    }

    #[tokio::test]
    async fn nonzero_rsv_bits_are_rejected() {
        let mask = [0, 0, 0, 0];
        let mut wire = vec![0xC1u8]; // fin + RSV1 + Text
        wire.push(0x80); // masked, len 0
        wire.extend_from_slice(&mask);
        let mut cursor = Cursor::new(wire);
        let result = decode_message(&mut cursor, MAX_FRAME, MAX_MESSAGE).await;
        assert!(matches!(result, Err(Error::RSVNotZero)));
    }

    #[test]
    fn close_ping_pong_encode_helpers_set_fin_and_opcode() {
        assert_eq!(encode_close(&[])[0], 0x80 | OpCode::Close.as_u8());
        assert_eq!(encode_pong(&[1])[0], 0x80 | OpCode::Pong.as_u8());
        assert_eq!(encode_binary(&[1])[0], 0x80 | OpCode::Binary.as_u8());
    }

    #[test]
    fn encode_never_sets_mask_bit() {
        let frame = encode_text(b"payload");
        assert_eq!(frame[1] & 0x80, 0);
    }
}

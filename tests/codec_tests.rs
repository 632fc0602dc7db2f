//! Frame codec properties: round-trips, the truncation error taxonomy,
//! trailing-byte rejection, and the session/connect-id presence rules.

use voicelink::core::protocol::{
    BinaryProtocol, CompressionMethod, HeaderSize, Message, MessageFlags, MessageType,
    ProtocolError, ProtocolVersion, Serialization, events, gzip_compress,
};

fn codec() -> BinaryProtocol {
    BinaryProtocol::new()
}

fn message(
    msg_type: MessageType,
    flags: MessageFlags,
    event: Option<i32>,
    session_id: Option<&str>,
    connect_id: Option<&str>,
    sequence: Option<i32>,
    error_code: Option<u32>,
    payload: &[u8],
) -> Message {
    Message {
        msg_type,
        flags,
        event,
        session_id: session_id.map(str::to_owned),
        connect_id: connect_id.map(str::to_owned),
        sequence,
        error_code,
        payload: payload.to_vec(),
    }
}

/// Valid messages covering every sub-field combination the presence rules
/// allow.
fn valid_messages() -> Vec<Message> {
    let with_event = MessageFlags::WITH_EVENT;
    vec![
        // Connection-level client requests: event but no session id.
        message(
            MessageType::FullClient,
            with_event,
            Some(events::START_CONNECTION),
            None,
            None,
            None,
            None,
            b"{}",
        ),
        message(
            MessageType::FullClient,
            with_event,
            Some(events::FINISH_CONNECTION),
            None,
            None,
            None,
            None,
            b"{}",
        ),
        // Session-level request with session id and JSON payload.
        message(
            MessageType::FullClient,
            with_event,
            Some(events::START_SESSION),
            Some("s-1"),
            None,
            None,
            None,
            br#"{"tts":{}}"#,
        ),
        // Audio upstream, raw payload.
        message(
            MessageType::AudioOnlyClient,
            with_event,
            Some(events::TASK_REQUEST),
            Some("s-1"),
            None,
            None,
            None,
            &[0x01, 0x02, 0x03, 0x04],
        ),
        // Audio upstream with a positive sequence.
        message(
            MessageType::AudioOnlyClient,
            with_event.union(MessageFlags::POSITIVE_SEQ),
            Some(events::TASK_REQUEST),
            Some("s-1"),
            None,
            Some(17),
            None,
            &[0xAA; 320],
        ),
        // Audio downstream with a negative (final) sequence and no event.
        message(
            MessageType::AudioOnlyServer,
            MessageFlags::NEGATIVE_SEQ,
            None,
            None,
            None,
            Some(-5),
            None,
            &[0x00; 64],
        ),
        // Connection acknowledgement: connect id, no session id.
        message(
            MessageType::FullServer,
            with_event,
            Some(events::CONNECTION_STARTED),
            None,
            Some("c-abc"),
            None,
            None,
            b"{}",
        ),
        // Session acknowledgement with a payload.
        message(
            MessageType::FullServer,
            with_event,
            Some(events::SESSION_STARTED),
            Some("s-1"),
            None,
            None,
            None,
            br#"{"dialog_id":"d-42"}"#,
        ),
        // Server error without event flag.
        message(
            MessageType::Error,
            MessageFlags::NO_SEQ,
            None,
            None,
            None,
            None,
            Some(45_000_081),
            b"session not found",
        ),
        // Server error that still carries an event and session id.
        message(
            MessageType::Error,
            with_event,
            Some(events::SESSION_FAILED),
            Some("s-1"),
            None,
            None,
            Some(55_000_002),
            b"internal",
        ),
        // Front-end result.
        message(
            MessageType::FrontEndResultServer,
            with_event,
            Some(events::ASR_INFO),
            Some("s-1"),
            None,
            None,
            None,
            br#"{"text":"hello"}"#,
        ),
        // Empty payload, last-no-seq group (no sequence on the wire).
        message(
            MessageType::FullServer,
            with_event.union(MessageFlags::LAST_NO_SEQ),
            Some(events::SESSION_FINISHED),
            Some("s-1"),
            None,
            None,
            None,
            b"",
        ),
    ]
}

#[test]
fn decode_inverts_encode_for_all_valid_messages() {
    let codec = codec();
    for original in valid_messages() {
        let frame = codec.encode(&original).unwrap();
        let decoded = codec
            .decode(&frame)
            .unwrap_or_else(|e| panic!("decode failed for {original:?}: {e}"));
        assert_eq!(decoded, original);
    }
}

#[test]
fn encode_inverts_decode_for_all_valid_frames() {
    let codec = codec();
    for original in valid_messages() {
        let frame = codec.encode(&original).unwrap();
        let reencoded = codec.encode(&codec.decode(&frame).unwrap()).unwrap();
        assert_eq!(reencoded, frame);
    }
}

#[test]
fn round_trips_hold_for_every_codec_configuration() {
    let versions = [
        ProtocolVersion::V1,
        ProtocolVersion::V2,
        ProtocolVersion::V3,
        ProtocolVersion::V4,
    ];
    let header_sizes = [
        HeaderSize::Bytes4,
        HeaderSize::Bytes8,
        HeaderSize::Bytes12,
        HeaderSize::Bytes16,
    ];
    let serializations = [
        Serialization::Raw,
        Serialization::Json,
        Serialization::Thrift,
        Serialization::Custom,
    ];
    let original = message(
        MessageType::FullClient,
        MessageFlags::WITH_EVENT,
        Some(events::SAY_HELLO),
        Some("s-1"),
        None,
        None,
        None,
        br#"{"content":"hi"}"#,
    );
    for version in versions {
        for header_size in header_sizes {
            for serialization in serializations {
                let mut protocol = BinaryProtocol::new();
                protocol.set_version(version);
                protocol.set_header_size(header_size);
                protocol.set_serialization(serialization);
                let frame = protocol.encode(&original).unwrap();
                assert_eq!(protocol.decode(&frame).unwrap(), original);
            }
        }
    }
}

#[test]
fn truncation_points_name_the_missing_sub_field() {
    let codec = codec();
    // Header: 4 bytes. Sequence: 4. Event: 4. Session id: 4 + 3.
    // Payload: 4 + 2.
    let original = message(
        MessageType::AudioOnlyClient,
        MessageFlags::WITH_EVENT.union(MessageFlags::POSITIVE_SEQ),
        Some(events::TASK_REQUEST),
        Some("s-1"),
        None,
        Some(3),
        None,
        &[0xAB, 0xCD],
    );
    let frame = codec.encode(&original).unwrap();
    assert_eq!(frame.len(), 4 + 4 + 4 + 4 + 3 + 4 + 2);

    let expectations: Vec<(usize, ProtocolError)> = vec![
        (0, ProtocolError::TruncatedHeader),
        (1, ProtocolError::TruncatedHeader),
        (3, ProtocolError::TruncatedHeader),
        (4, ProtocolError::TruncatedField("sequence")),
        (7, ProtocolError::TruncatedField("sequence")),
        (8, ProtocolError::TruncatedField("event")),
        (11, ProtocolError::TruncatedField("event")),
        (12, ProtocolError::TruncatedField("session id size")),
        (15, ProtocolError::TruncatedField("session id size")),
        (16, ProtocolError::TruncatedField("session id")),
        (18, ProtocolError::TruncatedField("session id")),
        (19, ProtocolError::TruncatedField("payload size")),
        (22, ProtocolError::TruncatedField("payload size")),
        (23, ProtocolError::TruncatedField("payload")),
        (24, ProtocolError::TruncatedField("payload")),
    ];
    for (len, expected) in expectations {
        assert_eq!(
            codec.decode(&frame[..len]),
            Err(expected.clone()),
            "truncated at {len}"
        );
    }
}

#[test]
fn error_frame_truncations_name_the_error_code() {
    let codec = codec();
    let original = message(
        MessageType::Error,
        MessageFlags::NO_SEQ,
        None,
        None,
        None,
        None,
        Some(9),
        b"x",
    );
    let frame = codec.encode(&original).unwrap();
    assert_eq!(
        codec.decode(&frame[..6]),
        Err(ProtocolError::TruncatedField("error code"))
    );
}

#[test]
fn connect_id_truncations_are_named() {
    let codec = codec();
    let original = message(
        MessageType::FullServer,
        MessageFlags::WITH_EVENT,
        Some(events::CONNECTION_STARTED),
        None,
        Some("c-abc"),
        None,
        None,
        b"{}",
    );
    let frame = codec.encode(&original).unwrap();
    // Header 4 + event 4 + connect id size 4 + body 5 + payload size 4 + 2.
    assert_eq!(
        codec.decode(&frame[..10]),
        Err(ProtocolError::TruncatedField("connect id size"))
    );
    assert_eq!(
        codec.decode(&frame[..14]),
        Err(ProtocolError::TruncatedField("connect id"))
    );
}

#[test]
fn trailing_garbage_is_rejected() {
    let codec = codec();
    for original in valid_messages() {
        let mut frame = codec.encode(&original).unwrap();
        frame.push(0x00);
        assert_eq!(codec.decode(&frame), Err(ProtocolError::RedundantBytes(1)));

        let mut frame = codec.encode(&original).unwrap();
        frame.extend_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(codec.decode(&frame), Err(ProtocolError::RedundantBytes(5)));
    }
}

#[test]
fn session_id_is_omitted_for_connection_level_events() {
    let codec = codec();
    for event in [1, 2, 50, 51, 52] {
        let connect_id = events::carries_connect_id(event).then_some("c-1");
        let msg = message(
            MessageType::FullServer,
            MessageFlags::WITH_EVENT,
            Some(event),
            Some("must-not-appear"),
            connect_id,
            None,
            None,
            b"",
        );
        let frame = codec.encode(&msg).unwrap();
        // Header + event + optional connect id (4 + 3) + payload length.
        let connect_len = if connect_id.is_some() { 7 } else { 0 };
        assert_eq!(frame.len(), 4 + 4 + connect_len + 4, "event {event}");
        assert_eq!(codec.decode(&frame).unwrap().session_id, None);
    }
}

#[test]
fn session_id_is_present_for_all_other_events() {
    let codec = codec();
    for event in [100, 102, 150, 152, 153, 200, 300, 350, 450, 459, 500] {
        let msg = message(
            MessageType::FullServer,
            MessageFlags::WITH_EVENT,
            Some(event),
            Some("s-9"),
            None,
            None,
            None,
            b"",
        );
        let frame = codec.encode(&msg).unwrap();
        assert_eq!(frame.len(), 4 + 4 + 4 + 3 + 4, "event {event}");
        assert_eq!(codec.decode(&frame).unwrap().session_id.as_deref(), Some("s-9"));
    }
}

#[test]
fn connect_id_is_present_only_for_connection_acks() {
    let codec = codec();
    for event in [50, 51, 52] {
        let msg = message(
            MessageType::FullServer,
            MessageFlags::WITH_EVENT,
            Some(event),
            None,
            Some("c-7"),
            None,
            None,
            b"",
        );
        let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.connect_id.as_deref(), Some("c-7"), "event {event}");
    }
    for event in [1, 2, 100, 150, 300] {
        let session_id = (!events::omits_session_id(event)).then_some("s-1");
        let msg = message(
            MessageType::FullClient,
            MessageFlags::WITH_EVENT,
            Some(event),
            session_id,
            Some("ignored"),
            None,
            None,
            b"",
        );
        let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.connect_id, None, "event {event}");
    }
}

#[test]
fn start_connection_frame_matches_the_documented_bytes() {
    let frame = codec()
        .encode(&message(
            MessageType::FullClient,
            MessageFlags::WITH_EVENT,
            Some(events::START_CONNECTION),
            None,
            None,
            None,
            None,
            b"{}",
        ))
        .unwrap();
    let mut expected = vec![0x11, 0x14, 0x10, 0x00];
    expected.extend_from_slice(&1i32.to_be_bytes());
    expected.extend_from_slice(&2u32.to_be_bytes());
    expected.extend_from_slice(b"{}");
    assert_eq!(frame, expected);
}

#[test]
fn compressed_round_trip_keeps_the_wire_form_stable() {
    let mut protocol = BinaryProtocol::new();
    protocol.set_compression(CompressionMethod::Gzip, Some(gzip_compress));
    let original = message(
        MessageType::FullClient,
        MessageFlags::WITH_EVENT,
        Some(events::SAY_HELLO),
        Some("s-1"),
        None,
        None,
        None,
        &[7u8; 1000],
    );
    let frame = protocol.encode(&original).unwrap();
    let decoded = protocol.decode(&frame).unwrap();
    // The decoder hands back the compressed payload untouched; re-encoding
    // it through a compression-free codec reproduces the frame.
    let mut plain = BinaryProtocol::new();
    plain.set_compression(CompressionMethod::Gzip, None);
    assert_eq!(plain.encode(&decoded).unwrap(), frame);
}

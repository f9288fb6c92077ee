#[cfg(test)]
mod tests {
    use crate::codec::{encode, Decoder};
    use crate::stream::{write_frame, FrameReader, StreamError};
    use pgrelay_core::{Message, QueryResult, Response};
    use serde_json::{json, Map, Value};
    use tokio::io::AsyncWriteExt;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::new("select current_user"),
            Message::new("select $1, $2").with_params(vec![json!(1), json!("dos")]),
            Message::new("select 'ünïcødé'").with_address("stub://other"),
        ]
    }

    #[test]
    fn every_split_point_decodes_the_same() {
        for msg in sample_messages() {
            let wire = encode(&msg).expect("encode");
            let mut whole = Decoder::<Message>::new();
            let expected = whole.feed(&wire).frames;
            assert_eq!(expected, vec![msg.clone()]);
            for k in 1..wire.len() {
                let mut decoder = Decoder::<Message>::new();
                let mut frames = decoder.feed(&wire[..k]).frames;
                frames.extend(decoder.feed(&wire[k..]).frames);
                assert_eq!(frames, expected, "split at {k}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_decodes_a_stream_of_frames() {
        let mut wire = Vec::new();
        for msg in sample_messages() {
            wire.extend_from_slice(&encode(&msg).expect("encode"));
        }
        let mut decoder = Decoder::<Message>::new();
        let mut frames = Vec::new();
        for byte in &wire {
            let feed = decoder.feed(std::slice::from_ref(byte));
            assert!(feed.error.is_none());
            frames.extend(feed.frames);
        }
        assert_eq!(frames, sample_messages());
    }

    #[test]
    fn responses_roundtrip() {
        let mut row = Map::new();
        row.insert("current_user".into(), json!("test"));
        let ok = Response::from(QueryResult::from_rows(vec![row]));
        let err = Response::error("Could not run query");
        for response in [ok, err] {
            let wire = encode(&response).expect("encode");
            let mut decoder = Decoder::<Response>::new();
            assert_eq!(decoder.feed(&wire).frames, vec![response]);
        }
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            for msg in sample_messages() {
                write_frame(&mut client, &msg).await.expect("write");
            }
        });
        let mut reader = FrameReader::<Message>::default();
        for expected in sample_messages() {
            let got = reader.read_frame(&mut server).await.expect("read");
            assert_eq!(got, expected);
        }
        writer.await.expect("writer");
        let closed = reader.read_frame(&mut server).await;
        assert!(matches!(closed, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncated() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"10\n{\"qu").await.expect("write");
        drop(client);
        let mut reader = FrameReader::<Value>::default();
        let result = reader.read_frame(&mut server).await;
        assert!(matches!(result, Err(StreamError::Truncated)));
    }

    #[tokio::test]
    async fn decode_error_follows_earlier_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut wire = encode(&json!({"a": 1})).expect("encode").to_vec();
        wire.extend_from_slice(b"nope\n");
        client.write_all(&wire).await.expect("write");
        let mut reader = FrameReader::<Value>::default();
        assert_eq!(reader.read_frame(&mut server).await.expect("frame"), json!({"a": 1}));
        assert!(matches!(
            reader.read_frame(&mut server).await,
            Err(StreamError::Frame(_))
        ));
    }
}

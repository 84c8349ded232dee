// smartpixl-record: Length-prefixed pipe frame codec
// Frame layout: 4-byte big-endian payload length, then UTF-8 JSON payload

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RecordError, RecordResult};
use crate::record::TrackingRecord;

/// Frames above this are protocol errors, not real records
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Encode one record as a wire frame
pub fn encode_frame(record: &TrackingRecord) -> RecordResult<Vec<u8>> {
    let payload = serde_json::to_vec(record)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(RecordError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one framed record to the pipe
pub async fn write_frame<W>(writer: &mut W, record: &TrackingRecord) -> RecordResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(record)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read one framed record from the pipe.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary. A JSON
/// error leaves the stream aligned on the next frame (the payload was fully
/// consumed); a length or IO error means the stream is desynchronized and
/// the caller must drop the connection.
pub async fn read_frame<R>(reader: &mut R) -> RecordResult<Option<TrackingRecord>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(RecordError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(RecordError::FrameTooLarge(len as usize));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    let record = serde_json::from_slice(&payload)?;
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(company: i64, pixel: i64) -> TrackingRecord {
        TrackingRecord {
            company_id: company,
            pixel_id: pixel,
            received_at: Utc::now(),
            ip_address: "203.0.113.9".to_string(),
            forwarded_chain: Vec::new(),
            proxy_depth: 0,
            request_path: format!("/{company}/{pixel}"),
            query_string: String::new(),
            user_agent: "test".to_string(),
            referer: String::new(),
            headers_json: "{}".to_string(),
            fingerprint_hash: 1,
            datacenter: None,
            behaviour: Default::default(),
            geo: None,
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let sent = record(42, 7);
        write_frame(&mut client, &sent).await.unwrap();
        drop(client);

        let received = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(sent, received);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multiple_frames_keep_order() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        for pixel in 1..=5 {
            write_frame(&mut client, &record(1, pixel)).await.unwrap();
        }
        drop(client);

        for pixel in 1..=5 {
            let got = read_frame(&mut server).await.unwrap().unwrap();
            assert_eq!(got.pixel_id, pixel);
        }
    }

    #[tokio::test]
    async fn test_oversized_length_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(&(MAX_FRAME_LEN + 1).to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, RecordError::FrameTooLarge(_)));
        assert!(err.desyncs_stream());
    }

    #[tokio::test]
    async fn test_bad_payload_keeps_stream_aligned() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let garbage = b"not json at all";
        client
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client.write_all(garbage).await.unwrap();
        write_frame(&mut client, &record(9, 9)).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, RecordError::Serialization(_)));
        assert!(!err.desyncs_stream());

        // The next frame parses cleanly
        let good = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(good.company_id, 9);
    }
}

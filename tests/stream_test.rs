//! File stream tests through a pooled client
//!
//! Segments are served by an in-memory provider behind a real pool, retry
//! client and header cache.

mod common;

use aes::Aes192;
use aes::Block;
use aes::cipher::{BlockEncrypt, KeyInit};
use common::{MockFactory, MockProvider, encode_file, pattern};
use nntp_stream::stream::{read_full, read_to_end};
use nntp_stream::yenc::{self, PartSpec};
use nntp_stream::{
    AesDecoderStream, ByteStream, ConnectionPool, HeaderCachingClient, MultiConnectionClient, NntpClient,
    NntpError, NzbFileStream, PoolConfig, RequestContext, SeekableStream, StreamOptions,
};
use std::sync::Arc;

type Stack = HeaderCachingClient<Arc<MultiConnectionClient<MockFactory>>>;

fn stack(provider: &Arc<MockProvider>, connections: usize) -> Arc<Stack> {
    let pool = ConnectionPool::with_own_gate(
        MockFactory::new(provider.clone()),
        PoolConfig::new("mock", connections),
        80,
    );
    Arc::new(HeaderCachingClient::new(
        Arc::new(MultiConnectionClient::new(pool, 1)),
        1024,
    ))
}

fn buffered() -> StreamOptions {
    StreamOptions {
        buffer_segments: 4,
        connections: 3,
    }
}

#[tokio::test]
async fn test_reads_whole_file_buffered_and_unbuffered() {
    let data = pattern(50_000);
    let (ids, bodies) = encode_file("part", &data, 3_000);
    let provider = MockProvider::new();
    provider.insert_file(&ids, &bodies);
    let client = stack(&provider, 4);
    let ctx = RequestContext::new();

    for options in [StreamOptions::unbuffered(), buffered()] {
        let mut stream = NzbFileStream::open(client.clone(), ids.clone(), None, options, &ctx)
            .await
            .unwrap();
        assert_eq!(stream.len(), data.len() as u64);
        assert_eq!(read_to_end(&mut stream).await.unwrap(), data);
    }
}

#[tokio::test]
async fn test_seek_reads_match_source_everywhere() {
    let data = pattern(40_000);
    let (ids, bodies) = encode_file("part", &data, 2_500);
    let provider = MockProvider::new();
    provider.insert_file(&ids, &bodies);
    let client = stack(&provider, 4);
    let ctx = RequestContext::new();

    let mut stream = NzbFileStream::new(client.clone(), ids, data.len() as u64, buffered(), &ctx);
    let mut buf = vec![0u8; 700];
    for offset in [0usize, 2_499, 2_500, 17_321, 39_500, 1_000, 25_000] {
        stream.seek(offset as u64).await.unwrap();
        let n = read_full(&mut stream, &mut buf).await.unwrap();
        let end = (offset + buf.len()).min(data.len());
        assert_eq!(n, end - offset, "at {}", offset);
        assert_eq!(&buf[..n], &data[offset..end], "at {}", offset);
        assert_eq!(stream.position(), end as u64);
    }

    // Seeking to the same spot twice reads the same bytes
    stream.seek(12_345).await.unwrap();
    let first = read_full(&mut stream, &mut buf).await.unwrap();
    let first = buf[..first].to_vec();
    stream.seek(12_345).await.unwrap();
    let n = read_full(&mut stream, &mut buf).await.unwrap();
    assert_eq!(&buf[..n], &first[..]);

    // Header lookups for seeks are cached
    assert!(client.cached_headers() > 0);
}

#[tokio::test]
async fn test_seek_past_end_clamps() {
    let data = pattern(5_000);
    let (ids, bodies) = encode_file("part", &data, 1_000);
    let provider = MockProvider::new();
    provider.insert_file(&ids, &bodies);
    let client = stack(&provider, 2);

    let mut stream =
        NzbFileStream::new(client, ids, 5_000, StreamOptions::unbuffered(), &RequestContext::new());
    stream.seek(9_999).await.unwrap();
    assert_eq!(stream.position(), 5_000);
    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_gap_between_segments_is_corrupt() {
    // Segment 1 claims bytes 150..250 while segment 0 ends at 100
    let provider = MockProvider::new();
    let layout: [(u64, &[u8]); 3] = [(0, &[1u8; 100]), (150, &[2u8; 100]), (250, &[3u8; 50])];
    let mut ids = Vec::new();
    for (i, (offset, data)) in layout.iter().enumerate() {
        let part = PartSpec {
            number: i as u32 + 1,
            total: 3,
            offset: *offset,
            file_size: 300,
        };
        let id = format!("gap{}", i);
        provider.insert(&id, yenc::encode(data, "gap.bin", 128, Some(part)).unwrap());
        ids.push(id);
    }
    let client = stack(&provider, 2);
    let ctx = RequestContext::new();

    let mut stream = NzbFileStream::new(client.clone(), ids.clone(), 300, StreamOptions::unbuffered(), &ctx);
    let err = read_to_end(&mut stream).await.unwrap_err();
    assert!(matches!(err, NntpError::CorruptMetadata(_)), "{:?}", err);
    assert!(!err.is_retryable());

    let mut stream = NzbFileStream::new(client, ids, 300, buffered(), &ctx);
    stream.seek(120).await.unwrap();
    let mut buf = [0u8; 10];
    let err = stream.read(&mut buf).await.unwrap_err();
    assert!(err.is_integrity_error());
}

#[tokio::test]
async fn test_missing_segment_surfaces_not_found() {
    let data = pattern(10_000);
    let (ids, bodies) = encode_file("part", &data, 1_000);
    let provider = MockProvider::new();
    for (i, (id, body)) in ids.iter().zip(&bodies).enumerate() {
        if i != 6 {
            provider.insert(id, body.clone());
        }
    }
    let client = stack(&provider, 3);
    let mut stream =
        NzbFileStream::new(client, ids, 10_000, buffered(), &RequestContext::new());

    let mut buf = vec![0u8; 6_000];
    assert_eq!(read_full(&mut stream, &mut buf).await.unwrap(), 6_000);
    let err = read_full(&mut stream, &mut buf).await.unwrap_err();
    assert!(err.is_article_not_found());
}

#[tokio::test]
async fn test_cancelled_stream_stops() {
    let data = pattern(4_000);
    let (ids, bodies) = encode_file("part", &data, 1_000);
    let provider = MockProvider::new();
    provider.insert_file(&ids, &bodies);
    let client = stack(&provider, 2);

    let ctx = RequestContext::new();
    let mut stream = NzbFileStream::new(client, ids, 4_000, buffered(), &ctx);
    let mut buf = [0u8; 100];
    stream.read(&mut buf).await.unwrap();

    ctx.cancellation().cancel();
    let err = read_to_end(&mut stream).await.unwrap_err();
    assert!(err.is_cancelled());
}

fn encrypt_cbc(key: &[u8], iv: [u8; 16], plain: &[u8]) -> Vec<u8> {
    let cipher = Aes192::new_from_slice(key).unwrap();
    let mut chain = iv;
    let mut out = Vec::with_capacity(plain.len());
    for chunk in plain.chunks(16) {
        let mut block = Block::clone_from_slice(chunk);
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        cipher.encrypt_block(&mut block);
        chain.copy_from_slice(&block);
        out.extend_from_slice(&block);
    }
    out
}

#[tokio::test]
async fn test_aes_over_segmented_file() {
    let key = [7u8; 24];
    let iv = [3u8; 16];
    let plain = pattern(16 * 1_000);
    let cipher = encrypt_cbc(&key, iv, &plain);
    let (ids, bodies) = encode_file("enc", &cipher, 1_500);
    let provider = MockProvider::new();
    provider.insert_file(&ids, &bodies);
    let client = stack(&provider, 3);

    let file = NzbFileStream::open(client, ids, None, buffered(), &RequestContext::new())
        .await
        .unwrap();
    let mut stream = AesDecoderStream::new(file, &key, iv).unwrap();
    assert_eq!(stream.len(), plain.len() as u64);
    assert_eq!(read_to_end(&mut stream).await.unwrap(), plain);

    let mut buf = [0u8; 100];
    for offset in [0usize, 15, 16, 1_499, 1_500, 9_001, 15_950] {
        stream.seek(offset as u64).await.unwrap();
        let n = read_full(&mut stream, &mut buf).await.unwrap();
        let end = (offset + buf.len()).min(plain.len());
        assert_eq!(&buf[..n], &plain[offset..end], "at {}", offset);
    }
}

#[tokio::test]
async fn test_header_cache_answers_repeat_lookups() {
    let data = pattern(3_000);
    let (ids, bodies) = encode_file("part", &data, 1_000);
    let provider = MockProvider::new();
    provider.insert_file(&ids, &bodies);
    let client = stack(&provider, 1);
    let ctx = RequestContext::new();

    let first = client.yenc_header(&ids[1], &ctx).await.unwrap();
    let commands = provider.commands();
    let second = client.yenc_header(&ids[1], &ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.commands(), commands);
    assert_eq!(first.part_offset, 1_000);
}

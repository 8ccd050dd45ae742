//! AES-CBC decryption over a seekable ciphertext stream

use super::{ByteStream, SeekableStream, read_full};
use crate::error::{NntpError, Result};
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use async_trait::async_trait;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Blocks decrypted per inner read
const CHUNK_BLOCKS: usize = 4096;

enum Cipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| NntpError::Other(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            n => Err(NntpError::Other(format!("invalid AES key length {}", n))),
        }
    }

    fn decrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// Plaintext view of an AES-CBC encrypted stream (no padding removal)
///
/// Random access works because CBC decryption of block `n` only needs the
/// ciphertext of block `n - 1`: a seek reads that block as the chaining
/// value and discards the bytes of the target block before the offset.
///
/// # Errors
///
/// Construction fails with [`NntpError::InvalidCiphertextLength`] when the
/// ciphertext is not a whole number of blocks.
pub struct AesDecoderStream<S> {
    inner: S,
    cipher: Cipher,
    iv: [u8; BLOCK_SIZE],
    /// Chaining value for the next block read from `inner`
    chain: [u8; BLOCK_SIZE],
    /// Decrypted bytes not yet returned
    plain: Vec<u8>,
    plain_pos: usize,
    pos: u64,
    /// Whether `inner` and `chain` match `pos`
    positioned: bool,
}

impl<S: SeekableStream> AesDecoderStream<S> {
    /// Decrypt `inner` with `key` (16, 24 or 32 bytes) and `iv`
    pub fn new(inner: S, key: &[u8], iv: [u8; BLOCK_SIZE]) -> Result<Self> {
        if inner.len() % BLOCK_SIZE as u64 != 0 {
            return Err(NntpError::InvalidCiphertextLength(inner.len()));
        }
        Ok(Self {
            inner,
            cipher: Cipher::new(key)?,
            iv,
            chain: iv,
            plain: Vec::new(),
            plain_pos: 0,
            pos: 0,
            positioned: false,
        })
    }

    /// Reposition `inner` on the block holding `pos` and drop the bytes of
    /// that block before `pos`
    async fn reposition(&mut self) -> Result<()> {
        let block_size = BLOCK_SIZE as u64;
        let block_start = self.pos - self.pos % block_size;

        if block_start == 0 {
            self.chain = self.iv;
            self.inner.seek(0).await?;
        } else {
            self.inner.seek(block_start - block_size).await?;
            let mut previous = [0u8; BLOCK_SIZE];
            if read_full(&mut self.inner, &mut previous).await? != BLOCK_SIZE {
                return Err(NntpError::CorruptMetadata(format!(
                    "ciphertext ended before block at {}",
                    block_start
                )));
            }
            self.chain = previous;
        }

        self.plain.clear();
        self.plain_pos = 0;
        self.positioned = true;

        let skip = (self.pos - block_start) as usize;
        if skip > 0 {
            self.fill().await?;
            self.plain_pos = skip.min(self.plain.len());
        }
        Ok(())
    }

    /// Decrypt the next chunk of whole blocks into `plain`
    async fn fill(&mut self) -> Result<()> {
        let remaining = self.inner.len() - self.inner.position();
        let want = (CHUNK_BLOCKS * BLOCK_SIZE).min(remaining.min(usize::MAX as u64) as usize);
        let mut data = vec![0u8; want];
        let n = read_full(&mut self.inner, &mut data).await?;
        if n % BLOCK_SIZE != 0 {
            return Err(NntpError::InvalidCiphertextLength(self.inner.position()));
        }
        data.truncate(n);

        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let mut ciphertext = [0u8; BLOCK_SIZE];
            ciphertext.copy_from_slice(chunk);

            let block = Block::from_mut_slice(chunk);
            self.cipher.decrypt_block(block);
            for (b, c) in chunk.iter_mut().zip(self.chain.iter()) {
                *b ^= c;
            }
            self.chain = ciphertext;
        }

        self.plain = data;
        self.plain_pos = 0;
        Ok(())
    }
}

#[async_trait]
impl<S: SeekableStream> ByteStream for AesDecoderStream<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pos >= self.inner.len() || buf.is_empty() {
            return Ok(0);
        }
        if !self.positioned {
            self.reposition().await?;
        }
        if self.plain_pos == self.plain.len() {
            self.fill().await?;
            if self.plain.is_empty() {
                return Err(NntpError::CorruptMetadata(format!(
                    "ciphertext ended at {} of {}",
                    self.pos,
                    self.inner.len()
                )));
            }
        }

        let n = buf.len().min(self.plain.len() - self.plain_pos);
        buf[..n].copy_from_slice(&self.plain[self.plain_pos..self.plain_pos + n]);
        self.plain_pos += n;
        self.pos += n as u64;
        Ok(n)
    }
}

#[async_trait]
impl<S: SeekableStream> SeekableStream for AesDecoderStream<S> {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = offset.min(self.inner.len());
        if offset != self.pos {
            self.pos = offset;
            self.positioned = false;
        }
        Ok(())
    }
}

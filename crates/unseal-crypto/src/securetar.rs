//! Streaming SecureTar decryption
//!
//! Encrypted member format (binary):
//! ```text
//! v2:      [16 bytes: "SecureTar\x02" + 6 zero bytes][8 bytes: plaintext size, BE]
//!          [8 bytes: reserved][16 bytes: salt][N bytes: AES-128-CBC ciphertext]
//! legacy:  [16 bytes: salt][N bytes: AES-128-CBC ciphertext]
//! ```
//!
//! The IV is derived from the key and the salt (see `kdf`). The plaintext is
//! PKCS#7 padded. The format carries no MAC, so the reader verifies what it
//! can: block alignment, padding, and the declared plaintext size. Anything
//! past that (gzip CRC, tar checksums) is verified by whoever consumes the
//! plaintext stream.

use std::io::{self, Read};

use aes::Aes128;
use cbc::cipher::{generic_array::GenericArray, BlockDecryptMut, KeyIvInit};
use zeroize::Zeroize;

use unseal_core::{UnsealError, UnsealResult};

use crate::kdf::DerivedKey;
use crate::{BLOCK_SIZE, SALT_SIZE};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Magic prefix shared by all versioned envelope headers
pub const MAGIC_PREFIX: &[u8; 9] = b"SecureTar";

/// Full v2 magic (prefix, version byte, zero padding to 16 bytes)
pub const MAGIC_V2: &[u8; 16] = b"SecureTar\x02\x00\x00\x00\x00\x00\x00";

/// Size of the v2 header: magic + plaintext size + reserved + salt
pub const V2_HEADER_SIZE: usize = 16 + 8 + 8 + SALT_SIZE;

/// Ciphertext is pulled from the underlying reader this many bytes at a time.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeVersion {
    /// Salt only, no magic
    Legacy,
    /// Magic, plaintext size, reserved bytes, salt
    V2,
}

/// Parsed envelope header of one encrypted member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub version: EnvelopeVersion,
    /// Declared plaintext size (v2 only)
    pub plaintext_size: Option<u64>,
    pub salt: [u8; SALT_SIZE],
}

impl EnvelopeHeader {
    /// Read the header from the start of an encrypted member.
    pub fn read_from<R: Read>(reader: &mut R, member: &str) -> UnsealResult<Self> {
        let mut head = [0u8; 16];
        read_header_bytes(reader, &mut head, member)?;

        if !head.starts_with(MAGIC_PREFIX) {
            return Ok(Self {
                version: EnvelopeVersion::Legacy,
                plaintext_size: None,
                salt: head,
            });
        }

        if &head != MAGIC_V2 {
            return Err(UnsealError::UnsupportedScheme(format!(
                "SecureTar envelope version {} in {member}",
                head[MAGIC_PREFIX.len()]
            )));
        }

        let mut size = [0u8; 8];
        read_header_bytes(reader, &mut size, member)?;
        let mut reserved = [0u8; 8];
        read_header_bytes(reader, &mut reserved, member)?;
        let mut salt = [0u8; SALT_SIZE];
        read_header_bytes(reader, &mut salt, member)?;

        Ok(Self {
            version: EnvelopeVersion::V2,
            plaintext_size: Some(u64::from_be_bytes(size)),
            salt,
        })
    }
}

fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8], member: &str) -> UnsealResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            UnsealError::authentication(member, "envelope header is truncated")
        }
        _ => UnsealError::Io(e),
    })
}

#[derive(Debug)]
enum State {
    Streaming,
    Finished,
    Failed(String),
}

/// `Read` adapter turning an encrypted member into its plaintext stream.
///
/// Ciphertext is consumed `CHUNK_SIZE` bytes at a time and decrypted block by
/// block. The last decrypted block is withheld until the underlying reader is
/// exhausted so its padding can be checked and stripped. After the first
/// integrity fault the reader is poisoned and never yields plaintext again.
pub struct SecureTarReader<R> {
    inner: R,
    member: String,
    header: EnvelopeHeader,
    cipher: Aes128CbcDec,
    buf: Box<[u8]>,
    carry: Vec<u8>,
    plain: Vec<u8>,
    pos: usize,
    held: Option<[u8; BLOCK_SIZE]>,
    produced: u64,
    state: State,
}

impl<R: Read> SecureTarReader<R> {
    /// Parse the envelope header from `inner` and set up decryption with `key`.
    ///
    /// `member` names the encrypted member in error messages.
    pub fn new(mut inner: R, key: &DerivedKey, member: &str) -> UnsealResult<Self> {
        let header = EnvelopeHeader::read_from(&mut inner, member)?;
        let mut iv = key.member_iv(&header.salt);
        let cipher = Aes128CbcDec::new(
            GenericArray::from_slice(key.as_bytes()),
            GenericArray::from_slice(&iv),
        );
        iv.zeroize();

        tracing::debug!(
            member,
            version = ?header.version,
            plaintext_size = ?header.plaintext_size,
            "opened encrypted member"
        );

        Ok(Self {
            inner,
            member: member.to_string(),
            header,
            cipher,
            buf: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            carry: Vec::with_capacity(BLOCK_SIZE),
            plain: Vec::with_capacity(CHUNK_SIZE),
            pos: 0,
            held: None,
            produced: 0,
            state: State::Streaming,
        })
    }

    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// The integrity fault that stopped this reader, if any.
    pub fn fault(&self) -> Option<&str> {
        match &self.state {
            State::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Plaintext bytes decrypted so far (including bytes not yet read out).
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn fail(&mut self, reason: &str) -> io::Error {
        self.plain.clear();
        self.pos = 0;
        if let Some(mut block) = self.held.take() {
            block.zeroize();
        }
        self.state = State::Failed(reason.to_string());
        fault_error(&self.member, reason)
    }

    /// Pull one chunk of ciphertext and decrypt every whole block in it.
    fn fill(&mut self) -> io::Result<()> {
        let n = loop {
            match self.inner.read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            return self.finish();
        }

        self.carry.extend_from_slice(&self.buf[..n]);
        let whole = self.carry.len() - self.carry.len() % BLOCK_SIZE;
        for block in self.carry[..whole].chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
            let mut decrypted = [0u8; BLOCK_SIZE];
            decrypted.copy_from_slice(block);
            if let Some(previous) = self.held.replace(decrypted) {
                self.plain.extend_from_slice(&previous);
                self.produced += BLOCK_SIZE as u64;
            }
        }
        self.carry.drain(..whole);
        Ok(())
    }

    /// End of ciphertext: verify alignment and padding, release the final block.
    fn finish(&mut self) -> io::Result<()> {
        if !self.carry.is_empty() {
            return Err(self.fail("ciphertext is not a whole number of blocks"));
        }
        let Some(mut last) = self.held.take() else {
            return Err(self.fail("ciphertext is empty"));
        };

        let pad = last[BLOCK_SIZE - 1] as usize;
        let padding_ok = (1..=BLOCK_SIZE).contains(&pad)
            && last[BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad);
        if !padding_ok {
            last.zeroize();
            return Err(self.fail("invalid padding"));
        }

        let tail = BLOCK_SIZE - pad;
        self.plain.extend_from_slice(&last[..tail]);
        self.produced += tail as u64;
        last.zeroize();

        if let Some(expected) = self.header.plaintext_size {
            if expected != self.produced {
                let reason = format!(
                    "plaintext size {} does not match declared size {expected}",
                    self.produced
                );
                return Err(self.fail(&reason));
            }
        }

        tracing::debug!(member = %self.member, bytes = self.produced, "member decrypted");
        self.state = State::Finished;
        Ok(())
    }
}

impl<R: Read> Read for SecureTarReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.plain.len() {
                let n = out.len().min(self.plain.len() - self.pos);
                out[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match &self.state {
                State::Finished => return Ok(0),
                State::Failed(reason) => return Err(fault_error(&self.member, reason)),
                State::Streaming => {}
            }
            self.plain.clear();
            self.pos = 0;
            self.fill()?;
        }
    }
}

fn fault_error(member: &str, reason: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        UnsealError::authentication(member, reason),
    )
}

/// Reason of the integrity fault behind `err`, if a `SecureTarReader` raised it.
///
/// Walks the error chain, so faults re-wrapped by downstream decoders (gzip,
/// tar) are still found. Errors that did not originate in the reader give `None`.
pub fn fault_reason(err: &io::Error) -> Option<String> {
    let mut node: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = node {
        if let Some(UnsealError::AuthenticationFailed { reason, .. }) =
            current.downcast_ref::<UnsealError>()
        {
            return Some(reason.clone());
        }
        node = match current.downcast_ref::<io::Error>() {
            Some(io_err) => io_err
                .get_ref()
                .map(|inner| inner as &(dyn std::error::Error + 'static)),
            None => current.source(),
        };
    }
    None
}

/// Decrypt a whole encrypted member held in memory.
pub fn decrypt(ciphertext: &[u8], key: &DerivedKey, member: &str) -> UnsealResult<Vec<u8>> {
    let mut reader = SecureTarReader::new(ciphertext, key, member)?;
    let mut plaintext = Vec::new();
    if let Err(e) = reader.read_to_end(&mut plaintext) {
        plaintext.zeroize();
        return Err(match fault_reason(&e) {
            Some(reason) => UnsealError::authentication(member, reason),
            None => UnsealError::Io(e),
        });
    }
    Ok(plaintext)
}

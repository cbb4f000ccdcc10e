//! A seekable, random-access encrypt/decrypt filter over a byte stream,
//! with its cipher state kept counter-aligned to absolute byte position.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, error};

use crate::cipher::apply_keystream;
use crate::error::{CipherStructuralKind, CryptoError, Result};
use crate::metadata::EncryptMetadata;
use crate::vault::MasterKeyVault;

/// A byte source a [`Cryptor`] can be bound to.
///
/// Plain readers (network bodies, pipes) only implement [`Read`]; seekable
/// sources additionally expose themselves through [`as_seek`] so
/// [`Cryptor::seek`] can reposition them. The default implementation
/// reports no seek support; override it wherever `Self: Seek`.
///
/// [`as_seek`]: CryptorSource::as_seek
pub trait CryptorSource: Read + Send {
    /// Expose this source as seekable, if it is.
    fn as_seek(&mut self) -> Option<&mut dyn Seek> {
        None
    }
}

impl CryptorSource for std::fs::File {
    fn as_seek(&mut self) -> Option<&mut dyn Seek> {
        Some(self)
    }
}

impl<T: AsRef<[u8]> + Send> CryptorSource for std::io::Cursor<T> {
    fn as_seek(&mut self) -> Option<&mut dyn Seek> {
        Some(self)
    }
}

/// Random-access AES-256-CTR filter over an encrypted byte stream.
///
/// The keystream for any given byte is computed directly from its absolute
/// position (`counter_offset + pos`) rather than from cipher state carried
/// forward block by block, so a `seek` needs no replay from the start of
/// the stream to stay counter-aligned.
pub struct Cryptor {
    key: [u8; 32],
    iv: [u8; 16],
    source: Option<Box<dyn CryptorSource>>,
    counter_offset: u64,
    pos: u64,
    size: i64,
    eof: bool,
}

impl Cryptor {
    /// Bind a cryptor to `metadata`, unwrapping its file key under `vault`
    /// if necessary. No byte source is attached yet; call
    /// [`set_source`](Self::set_source) before reading or seeking.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`EncryptMetadata::file_key`].
    pub fn from_metadata(metadata: &mut EncryptMetadata, vault: &dyn MasterKeyVault) -> Result<Self> {
        let key = metadata.file_key(vault)?;
        Ok(Self {
            key,
            iv: metadata.iv,
            source: None,
            counter_offset: 0,
            pos: 0,
            size: -1,
            eof: false,
        })
    }

    /// Bind the encrypted byte source this cryptor reads from and seeks
    /// within, resetting the cursor.
    ///
    /// `counter_offset` is the absolute byte position of the encrypted
    /// object at which `source` begins; `size` is the object's total
    /// encrypted length, or `-1` if unknown (a later `SeekFrom::End` then
    /// fails).
    pub fn set_source(&mut self, source: Box<dyn CryptorSource>, size: i64, counter_offset: u64) {
        self.source = Some(source);
        self.counter_offset = counter_offset;
        self.pos = 0;
        self.size = size;
        self.eof = false;
    }

    /// Current absolute byte position within the encrypted object.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.counter_offset + self.pos
    }

    /// Whether the most recent `read` reached the end of the source.
    #[must_use]
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Read encrypted bytes from the source into `buf`, applying the
    /// keystream in place (AES-CTR is its own inverse, so this serves both
    /// encryption and decryption), and return the number of bytes read.
    ///
    /// # Errors
    ///
    /// Fails with [`CipherStructuralKind::MissingSource`] if no source has
    /// been bound, or passes through the source's I/O error after applying
    /// the cipher to whatever bytes were read before the failure.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let position = self.position();
        let source = self
            .source
            .as_mut()
            .ok_or(CryptoError::Structural(CipherStructuralKind::MissingSource))?;
        let read = source.read(buf)?;
        if read == 0 {
            self.eof = true;
            return Ok(0);
        }
        apply_keystream(&self.key, self.iv, position, &mut buf[..read]);
        self.pos += read as u64;
        Ok(read)
    }

    /// Reposition the cursor to a new absolute byte offset within the
    /// encrypted object, reinitializing the cipher for that position.
    ///
    /// # Errors
    ///
    /// Fails, leaving the cursor unchanged, if no source is bound, the
    /// source does not support seeking, `SeekFrom::End` is requested
    /// without a known size, or the resulting position would fall before
    /// the start of the bound source's window.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let current_absolute = self.position();
        let target: i128 = match pos {
            SeekFrom::Start(n) => i128::from(self.counter_offset) + i128::from(n),
            SeekFrom::Current(delta) => i128::from(current_absolute) + i128::from(delta),
            SeekFrom::End(delta) => {
                if self.size < 0 {
                    return Err(CryptoError::Structural(
                        CipherStructuralKind::MissingSizeForSeekFromEnd,
                    ));
                }
                i128::from(self.size) + i128::from(delta)
            }
        };

        if target < i128::from(self.counter_offset) {
            error!(target = %target, counter_offset = self.counter_offset, "seek target precedes the source window");
            return Err(CryptoError::Structural(CipherStructuralKind::NegativePosition));
        }
        let target = u64::try_from(target)
            .map_err(|_| CryptoError::Structural(CipherStructuralKind::NegativePosition))?;
        let within_source = target - self.counter_offset;

        let source = self.source.as_mut().ok_or_else(|| {
            error!("seek attempted with no source bound");
            CryptoError::Structural(CipherStructuralKind::MissingSource)
        })?;
        let seekable = source.as_seek().ok_or_else(|| {
            error!("seek attempted on a non-seekable source");
            CryptoError::Structural(CipherStructuralKind::NotSeekable)
        })?;
        seekable.seek(SeekFrom::Start(within_source))?;

        self.pos = within_source;
        self.eof = false;
        debug!(target, within_source, "seek realigned cipher position");
        Ok(target)
    }

    /// Release the bound source. A cryptor with no source behaves as if
    /// freshly constructed from [`from_metadata`](Self::from_metadata):
    /// `read`/`seek` fail with [`CipherStructuralKind::MissingSource`]
    /// until [`set_source`](Self::set_source) is called again.
    pub fn close(&mut self) {
        self.source = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FixedVault([u8; 32]);

    impl MasterKeyVault for FixedVault {
        fn get_master_key(&self) -> Result<[u8; 32]> {
            Ok(self.0)
        }
    }

    fn cryptor_with_plaintext(key: [u8; 32], iv: [u8; 16], plaintext: &[u8]) -> (Cryptor, Vec<u8>) {
        let mut ciphertext = plaintext.to_vec();
        apply_keystream(&key, iv, 0, &mut ciphertext);
        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv,
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new(key)),
        };
        let cryptor = Cryptor::from_metadata(&mut metadata, &FixedVault(key)).unwrap();
        (cryptor, ciphertext)
    }

    #[test]
    fn read_without_a_source_is_a_structural_error() {
        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv: [0u8; 16],
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new([0u8; 32])),
        };
        let mut cryptor = Cryptor::from_metadata(&mut metadata, &FixedVault([0u8; 32])).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            cryptor.read(&mut buf),
            Err(CryptoError::Structural(CipherStructuralKind::MissingSource))
        ));
    }

    #[test]
    fn round_trip_over_a_plain_stream_recovers_the_plaintext() {
        let key = [0x5A; 32];
        let iv = [0x01; 16];
        let plaintext: Vec<u8> = (0..256u16).map(|b| b as u8).collect();
        let (mut cryptor, ciphertext) = cryptor_with_plaintext(key, iv, &plaintext);

        cryptor.set_source(Box::new(Cursor::new(ciphertext)), plaintext.len() as i64, 0);
        let mut decrypted = vec![0u8; plaintext.len()];
        let mut read_so_far = 0;
        while read_so_far < decrypted.len() {
            let n = cryptor.read(&mut decrypted[read_so_far..]).unwrap();
            assert!(n > 0, "did not expect EOF before consuming the whole buffer");
            read_so_far += n;
        }
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn seek_then_read_matches_the_corresponding_slice_of_a_full_decrypt() {
        let key = [0x9C; 32];
        let iv = [0x44; 16];
        let size = 10 * 1024 * 1024;
        let plaintext = vec![0u8; size];
        let (mut reference_cryptor, ciphertext) = cryptor_with_plaintext(key, iv, &plaintext);

        reference_cryptor.set_source(Box::new(Cursor::new(ciphertext.clone())), size as i64, 0);
        let offset = 1_048_577usize;
        let mut discard = vec![0u8; offset];
        let mut consumed = 0;
        while consumed < discard.len() {
            let n = reference_cryptor.read(&mut discard[consumed..]).unwrap();
            consumed += n;
        }
        let mut reference_tail = vec![0u8; 100];
        let mut consumed = 0;
        while consumed < reference_tail.len() {
            let n = reference_cryptor.read(&mut reference_tail[consumed..]).unwrap();
            consumed += n;
        }

        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv,
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new(key)),
        };
        let mut seeking_cryptor =
            Cryptor::from_metadata(&mut metadata, &FixedVault(key)).unwrap();
        seeking_cryptor.set_source(Box::new(Cursor::new(ciphertext)), size as i64, 0);
        seeking_cryptor.seek(SeekFrom::Start(offset as u64)).unwrap();
        let mut seeked_tail = vec![0u8; 100];
        let mut consumed = 0;
        while consumed < seeked_tail.len() {
            let n = seeking_cryptor.read(&mut seeked_tail[consumed..]).unwrap();
            consumed += n;
        }

        assert_eq!(seeked_tail, reference_tail);
        assert!(seeked_tail.iter().all(|&b| b == 0));
    }

    #[test]
    fn seek_associativity_matches_a_direct_read_at_the_target_offset() {
        let key = [0x17; 32];
        let iv = [0x2E; 16];
        let plaintext: Vec<u8> = (0..4096u32).map(|n| (n % 251) as u8).collect();
        let (mut cryptor, ciphertext) = cryptor_with_plaintext(key, iv, &plaintext);

        cryptor.set_source(Box::new(Cursor::new(ciphertext.clone())), plaintext.len() as i64, 0);
        let mut first_chunk = vec![0u8; 30];
        let mut n = 0;
        while n < first_chunk.len() {
            n += cryptor.read(&mut first_chunk[n..]).unwrap();
        }
        cryptor.seek(SeekFrom::Start(500)).unwrap();
        let mut second_chunk = vec![0u8; 40];
        let mut n = 0;
        while n < second_chunk.len() {
            n += cryptor.read(&mut second_chunk[n..]).unwrap();
        }

        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv,
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new(key)),
        };
        let mut direct = Cryptor::from_metadata(&mut metadata, &FixedVault(key)).unwrap();
        direct.set_source(Box::new(Cursor::new(ciphertext)), plaintext.len() as i64, 0);
        direct.seek(SeekFrom::Start(500)).unwrap();
        let mut direct_chunk = vec![0u8; 40];
        let mut n = 0;
        while n < direct_chunk.len() {
            n += direct.read(&mut direct_chunk[n..]).unwrap();
        }

        assert_eq!(second_chunk, direct_chunk);
        assert_eq!(&second_chunk, &plaintext[500..540]);
    }

    #[test]
    fn seek_from_end_without_known_size_fails() {
        let key = [0x01; 32];
        let iv = [0x02; 16];
        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv,
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new(key)),
        };
        let mut cryptor = Cryptor::from_metadata(&mut metadata, &FixedVault(key)).unwrap();
        cryptor.set_source(Box::new(Cursor::new(vec![0u8; 16])), -1, 0);
        assert!(matches!(
            cryptor.seek(SeekFrom::End(-1)),
            Err(CryptoError::Structural(
                CipherStructuralKind::MissingSizeForSeekFromEnd
            ))
        ));
    }

    #[test]
    fn seek_before_the_source_window_is_rejected() {
        let key = [0x01; 32];
        let iv = [0x02; 16];
        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv,
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new(key)),
        };
        let mut cryptor = Cryptor::from_metadata(&mut metadata, &FixedVault(key)).unwrap();
        cryptor.set_source(Box::new(Cursor::new(vec![0u8; 16])), 16, 100);
        assert!(matches!(
            cryptor.seek(SeekFrom::Current(-50)),
            Err(CryptoError::Structural(CipherStructuralKind::NegativePosition))
        ));
    }

    #[test]
    fn non_seekable_source_rejects_seek() {
        struct OneShotReader(Vec<u8>);
        impl Read for OneShotReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(self.0.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0.drain(..n);
                Ok(n)
            }
        }
        impl CryptorSource for OneShotReader {}

        let key = [0x01; 32];
        let iv = [0x02; 16];
        let mut metadata = EncryptMetadata {
            algorithm: crate::metadata::ALGORITHM.to_string(),
            iv,
            key: Vec::new(),
            key_plaintext: Some(zeroize::Zeroizing::new(key)),
        };
        let mut cryptor = Cryptor::from_metadata(&mut metadata, &FixedVault(key)).unwrap();
        cryptor.set_source(Box::new(OneShotReader(vec![0u8; 16])), 16, 0);
        assert!(matches!(
            cryptor.seek(SeekFrom::Start(4)),
            Err(CryptoError::Structural(CipherStructuralKind::NotSeekable))
        ));
    }
}

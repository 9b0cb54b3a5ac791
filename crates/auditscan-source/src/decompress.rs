use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use serde::Deserialize;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How object bytes are decoded before scanning
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Gzip if the stream starts with the gzip magic bytes, plain otherwise
    #[default]
    Auto,
    Gzip,
    None,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gzip" | "gz" => Ok(Self::Gzip),
            "none" | "plain" => Ok(Self::None),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Gzip => "gzip",
            Self::None => "none",
        })
    }
}

/// Decoding reader that picks its codec on the first read.
///
/// Nothing is read from the inner stream until the scan producer starts
/// pulling, so constructing one never blocks.
pub struct Decoder<R> {
    state: DecoderState<R>,
}

enum DecoderState<R> {
    Pending(BufReader<R>, Compression),
    Plain(BufReader<R>),
    Gzip(Box<MultiGzDecoder<BufReader<R>>>),
    Failed,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R, compression: Compression) -> Self {
        Self {
            state: DecoderState::Pending(BufReader::new(reader), compression),
        }
    }

    fn resolve(&mut self) -> io::Result<()> {
        // sniff in place so a failed read leaves the decoder pending
        let gzip = match &mut self.state {
            DecoderState::Pending(_, Compression::Gzip) => true,
            DecoderState::Pending(_, Compression::None) => false,
            DecoderState::Pending(reader, Compression::Auto) => {
                reader.fill_buf()?.starts_with(&GZIP_MAGIC)
            }
            _ => return Ok(()),
        };

        let DecoderState::Pending(reader, _) =
            std::mem::replace(&mut self.state, DecoderState::Failed)
        else {
            return Ok(());
        };
        self.state = if gzip {
            DecoderState::Gzip(Box::new(MultiGzDecoder::new(reader)))
        } else {
            DecoderState::Plain(reader)
        };
        Ok(())
    }
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.resolve()?;
        match &mut self.state {
            DecoderState::Plain(reader) => reader.read(buf),
            DecoderState::Gzip(decoder) => decoder.read(buf),
            DecoderState::Pending(..) | DecoderState::Failed => Err(io::Error::other(
                "decoder failed to initialize",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as Level;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Level::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode(data: Vec<u8>, compression: Compression) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        Decoder::new(Cursor::new(data), compression).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_auto_detects_gzip() {
        let text = b"line one\nline two\n";
        assert_eq!(decode(gzip(text), Compression::Auto).unwrap(), text);
    }

    #[test]
    fn test_auto_passes_plain_text_through() {
        let text = b"{\"kind\":\"Event\"}\n";
        assert_eq!(decode(text.to_vec(), Compression::Auto).unwrap(), text);
    }

    #[test]
    fn test_multi_member_gzip() {
        let mut data = gzip(b"first\n");
        data.extend(gzip(b"second\n"));
        assert_eq!(decode(data, Compression::Gzip).unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn test_none_keeps_compressed_bytes() {
        let data = gzip(b"abc");
        assert_eq!(decode(data.clone(), Compression::None).unwrap(), data);
    }

    #[test]
    fn test_forced_gzip_on_plain_text_is_read_error() {
        assert!(decode(b"not gzip at all\n".to_vec(), Compression::Gzip).is_err());
    }

    /// Fails the first read with `Interrupted`, then serves `data`
    struct InterruptedOnce {
        interrupted: bool,
        data: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::ErrorKind::Interrupted.into());
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn test_interrupted_sniff_is_retried() {
        let text = b"line one\nline two\n";
        let reader = InterruptedOnce {
            interrupted: false,
            data: Cursor::new(gzip(text)),
        };
        let mut decoder = Decoder::new(reader, Compression::Auto);

        let mut buf = [0u8; 64];
        let err = decoder.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);

        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!("GZ".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("auto".parse::<Compression>().unwrap(), Compression::Auto);
        assert!("zstd".parse::<Compression>().is_err());
    }
}

use std::fs;
use std::io;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::TcgaError;

/// Check that a downloaded archive is a readable gzip stream before handing
/// it on. A truncated download fails here instead of inside external tools.
pub fn validate_gzip(path: &Path) -> Result<(), TcgaError> {
    let file = fs::File::open(path)
        .map_err(|err| TcgaError::Filesystem(format!("open archive {}: {err}", path.display())))?;
    let mut decoder = GzDecoder::new(file);
    io::copy(&mut decoder, &mut io::sink())
        .map_err(|err| TcgaError::Filesystem(format!("corrupt gzip {}: {err}", path.display())))?;
    Ok(())
}

/// Decompress a `.tar.gz` bundle to the sibling `.tar` the external unpack
/// tooling consumes.
pub fn gunzip_file(source: &Path, destination: &Path) -> Result<(), TcgaError> {
    let file = fs::File::open(source).map_err(|err| {
        TcgaError::Filesystem(format!("open archive {}: {err}", source.display()))
    })?;
    let mut decoder = GzDecoder::new(file);
    let mut output = fs::File::create(destination)
        .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut output)
        .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn write_gzip(path: &Path, content: &[u8]) {
        let file = fs::File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn validate_and_gunzip_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bundle.tar.gz");
        write_gzip(&archive, b"tar payload");

        validate_gzip(&archive).unwrap();

        let unpacked = temp.path().join("bundle.tar");
        gunzip_file(&archive, &unpacked).unwrap();
        assert_eq!(fs::read(&unpacked).unwrap(), b"tar payload");
    }

    #[test]
    fn truncated_archive_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bundle.tar.gz");
        fs::write(&archive, b"not gzip at all").unwrap();
        assert!(validate_gzip(&archive).is_err());
    }
}

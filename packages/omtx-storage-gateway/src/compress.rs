//! Per-artifact compression policy.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use omtx_types::paths::ArtifactKind;

/// Whether this artifact kind is worth gzipping. Metadata is small and
/// frequently re-read by the API for display, so it stays uncompressed;
/// results and structures are large and write-once.
pub fn should_compress(kind: ArtifactKind) -> bool {
    !matches!(kind, ArtifactKind::Metadata)
}

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_excluded_from_compression() {
        assert!(!should_compress(ArtifactKind::Metadata));
        assert!(should_compress(ArtifactKind::Results));
        assert!(should_compress(ArtifactKind::Structure));
    }

    #[test]
    fn gzip_round_trips_through_flate2_decoder() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let payload = b"{\"hello\":\"world\"}".to_vec();
        let compressed = gzip(&payload).unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }
}

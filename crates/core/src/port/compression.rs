// Payload Compression Port
//
// The envelope only records whether the payload is compressed; the
// algorithm and text encoding belong to the adapter.

/// Compress/expand envelope payloads
pub trait PayloadCompression: Send + Sync {
    fn compress(&self, payload: &str) -> Result<String, String>;

    fn decompress(&self, payload: &str) -> Result<String, String>;
}

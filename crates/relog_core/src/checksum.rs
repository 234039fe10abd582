//! Adler-32 rolling checksum for region payloads.

/// Largest prime below 2^16.
const MOD_ADLER: u32 = 65_521;

/// Bytes that can be summed before the accumulators must be reduced.
const NMAX: usize = 5_552;

/// Incremental Adler-32.
///
/// Regions checksum the payloads of all their records as one stream, so the
/// packer feeds payloads in one at a time.
#[derive(Debug, Clone, Copy)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Adler32 {
    /// Creates a checksum over the empty stream.
    #[must_use]
    pub const fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    /// Feeds more bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(NMAX) {
            for &byte in chunk {
                self.a += u32::from(byte);
                self.b += self.a;
            }
            self.a %= MOD_ADLER;
            self.b %= MOD_ADLER;
        }
    }

    /// Returns the checksum of everything fed so far.
    #[must_use]
    pub const fn finish(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// Computes the Adler-32 checksum of one buffer.
#[must_use]
pub fn adler32(data: &[u8]) -> u32 {
    let mut checksum = Adler32::new();
    checksum.update(data);
    checksum.finish()
}

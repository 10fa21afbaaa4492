// CRC-16/CCITT (poly 0x1021, init 0xFFFF, MSB first) for EPC and EPB post-data,
// CRC-32 (IEEE) through crc32fast.

const CRC16_POLY: u16 = 0x1021;

static CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-16, for checksums over non-contiguous spans.
#[derive(Debug, Clone, Copy)]
pub struct Crc16(u16);

impl Default for Crc16 {
    fn default() -> Self {
        Self(0xFFFF)
    }
}

impl Crc16 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.0 = (self.0 << 8) ^ CRC16_TABLE[usize::from((self.0 >> 8) as u8 ^ b)];
        }
        self
    }

    pub fn finish(&self) -> u16 {
        self.0
    }
}

pub fn crc16(bytes: &[u8]) -> u16 {
    Crc16::new().update(bytes).finish()
}

pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_values() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"JPEG 2000 wireless";
        let mut crc = Crc16::new();
        crc.update(&data[..5]).update(&data[5..]);
        assert_eq!(crc.finish(), crc16(data));
    }
}

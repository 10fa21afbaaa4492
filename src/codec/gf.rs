// GF(256) arithmetic with the primitive polynomial x^8 + x^4 + x^3 + x^2 + 1.

const PRIMITIVE_POLY: u16 = 0x11D;

struct GfTables {
    exp: [u8; 512],
    log: [u8; 256],
}

static GF_TABLES: GfTables = build_tables();

const fn build_tables() -> GfTables {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= PRIMITIVE_POLY;
        }
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    GfTables { exp, log }
}

#[inline]
pub(crate) fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF_TABLES.exp[GF_TABLES.log[a as usize] as usize + GF_TABLES.log[b as usize] as usize]
}

#[inline]
pub(crate) fn div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0);
    if a == 0 {
        return 0;
    }
    GF_TABLES.exp[GF_TABLES.log[a as usize] as usize + 255 - GF_TABLES.log[b as usize] as usize]
}

/// α^power
#[inline]
pub(crate) fn alpha_pow(power: usize) -> u8 {
    GF_TABLES.exp[power % 255]
}

/// Evaluates a polynomial stored lowest degree first.
pub(crate) fn eval_low_first(poly: &[u8], x: u8) -> u8 {
    poly.iter().rev().fold(0, |acc, &c| mul(acc, x) ^ c)
}

/// Evaluates a polynomial stored highest degree first.
pub(crate) fn eval_high_first(poly: &[u8], x: u8) -> u8 {
    poly.iter().fold(0, |acc, &c| mul(acc, x) ^ c)
}

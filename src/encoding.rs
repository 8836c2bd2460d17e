use base64::alphabet::{self, Alphabet};
use base64::engine::general_purpose::{self, GeneralPurpose};
use base64::Engine;
use tracing::warn;

/// Alphabet used by bcrypt for its salt and checksum
pub const BCRYPT64_CHARS: &str =
    "./ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Alphabet used by the md5-crypt family (little-endian bit order)
pub const HASH64_CHARS: &str =
    "./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Standard base64 with `+` replaced by `.` so the output is safe inside `$`-separated hashes
pub const AB64_CHARS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789./";

/// Unpadded bcrypt base64. Trailing bits are accepted on decode so that non-canonical salts
/// can be repaired instead of rejected.
pub const BCRYPT64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::BCRYPT,
    general_purpose::NO_PAD.with_decode_allow_trailing_bits(true),
);

const AB64_ALPHABET: Alphabet = match Alphabet::new(AB64_CHARS) {
    Ok(a) => a,
    Err(_) => panic!("ab64 alphabet is invalid"),
};

/// Unpadded adapted base64. Like [`BCRYPT64`], non-zero trailing bits are ignored on decode
/// and cleared on the next encode.
pub const AB64: GeneralPurpose = GeneralPurpose::new(
    &AB64_ALPHABET,
    general_purpose::NO_PAD.with_decode_allow_trailing_bits(true),
);

/// Returns `true` if every character of `s` appears in `charset`
pub fn is_in_charset(s: &str, charset: &str) -> bool {
    s.chars().all(|c| charset.contains(c))
}

/// Number of bits of the final bcrypt64 character that carry no data
fn unused_bits(len: usize) -> u32 {
    ((len * 6) % 8) as u32
}

/// Clears the padding bits of the last character of a bcrypt64 string. Returns whether the
/// string had to be changed along with the canonical form.
///
/// A 22-character salt only uses the top two bits of its last character, so that character
/// must be one of `.Oeu`; a 31-character checksum uses the top four bits.
pub fn bcrypt64_repair_unused(s: &str) -> (bool, String) {
    let bits = unused_bits(s.len());
    let last = match s.chars().last() {
        Some(c) => c,
        None => return (false, String::new()),
    };

    if bits == 0 {
        return (false, s.to_string());
    }

    let idx = match BCRYPT64_CHARS.find(last) {
        Some(i) => i,
        None => return (false, s.to_string()),
    };

    let mask = 0x3f & !((1usize << bits) - 1);
    let fixed_idx = idx & mask;
    if fixed_idx == idx {
        return (false, s.to_string());
    }

    let mut fixed = String::with_capacity(s.len());
    fixed.push_str(&s[..s.len() - last.len_utf8()]);
    fixed.push(char::from(BCRYPT64_CHARS.as_bytes()[fixed_idx]));
    (true, fixed)
}

/// Repairs a bcrypt64 string in place, emitting an advisory when it was non-canonical
pub fn bcrypt64_repair_with_warning(handler: &str, what: &str, s: &str) -> (bool, String) {
    let (repaired, fixed) = bcrypt64_repair_unused(s);
    if repaired {
        warn!(
            handler,
            "encountered a {} with non-zero padding bits; {:?} has been repaired to {:?}",
            what,
            s,
            fixed
        );
    }

    (repaired, fixed)
}

/// Encodes three bytes as four hash64 characters, least significant six bits first
pub fn h64_encode_int24(out: &mut String, b2: u8, b1: u8, b0: u8) {
    let mut v = (u32::from(b2) << 16) | (u32::from(b1) << 8) | u32::from(b0);
    for _ in 0..4 {
        out.push(char::from(HASH64_CHARS.as_bytes()[(v & 0x3f) as usize]));
        v >>= 6;
    }
}

/// Encodes one byte as two hash64 characters
pub fn h64_encode_int8(out: &mut String, b: u8) {
    let mut v = u32::from(b);
    for _ in 0..2 {
        out.push(char::from(HASH64_CHARS.as_bytes()[(v & 0x3f) as usize]));
        v >>= 6;
    }
}

/// Decodes an unpadded ab64 string
pub fn ab64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    AB64.decode(s)
}

/// Encodes bytes as ab64
pub fn ab64_encode(data: &[u8]) -> String {
    AB64.encode(data)
}

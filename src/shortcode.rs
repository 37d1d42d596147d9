use rand::{
    rngs::{OsRng, StdRng},
    Rng, RngCore, SeedableRng,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of every generated short code.
pub const CODE_LEN: usize = 8;

pub const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// Largest multiple of 62 that fits in a byte. Bytes at or above it are
// rejected so every symbol stays equally likely.
const ACCEPT_BELOW: u8 = 248;

/// Generate a random 8-character alphanumeric short code from the OS CSPRNG.
///
/// Never fails: if the OS source errors, a time-seeded PRNG is used instead
/// and a warning is logged. Uniqueness is not checked here; the `links`
/// table's UNIQUE constraints are the guard.
pub fn generate() -> String {
    generate_with(&mut OsRng)
}

pub fn generate_with<R: RngCore>(rng: &mut R) -> String {
    match sample(rng) {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(
                "Secure random source unavailable ({}); short code generated from time-seeded fallback",
                e
            );
            fallback()
        }
    }
}

fn sample<R: RngCore>(rng: &mut R) -> Result<String, rand::Error> {
    let mut out = String::with_capacity(CODE_LEN);
    let mut buf = [0u8; 16];

    while out.len() < CODE_LEN {
        rng.try_fill_bytes(&mut buf)?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            out.push(ALPHABET[(b as usize) % ALPHABET.len()] as char);
            if out.len() == CODE_LEN {
                break;
            }
        }
    }

    Ok(out)
}

fn fallback() -> String {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed);

    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy source offline"))
        }
    }

    fn in_alphabet(code: &str) -> bool {
        code.bytes().all(|b| ALPHABET.contains(&b))
    }

    #[test]
    fn codes_have_fixed_length_and_alphabet() {
        for _ in 0..2_000 {
            let code = generate();
            assert_eq!(code.len(), CODE_LEN);
            assert!(in_alphabet(&code), "unexpected symbol in {code}");
        }
    }

    #[test]
    fn independent_codes_differ() {
        let codes: HashSet<String> = (0..10_000).map(|_| generate()).collect();
        assert_eq!(codes.len(), 10_000);
    }

    #[test]
    fn symbols_are_roughly_uniform() {
        let mut counts: HashMap<u8, usize> = HashMap::new();
        for _ in 0..10_000 {
            for b in generate().bytes() {
                *counts.entry(b).or_default() += 1;
            }
        }

        // 80_000 draws over 62 symbols: ~1290 each, sd ~35.
        assert_eq!(counts.len(), ALPHABET.len());
        for (symbol, n) in counts {
            assert!(
                (1_000..=1_600).contains(&n),
                "symbol {} drawn {} times",
                symbol as char,
                n
            );
        }
    }

    #[test]
    fn broken_source_falls_back() {
        let code = generate_with(&mut BrokenRng);
        assert_eq!(code.len(), CODE_LEN);
        assert!(in_alphabet(&code));
    }

    #[test]
    fn rejection_sampling_skips_high_bytes() {
        // 0xFF is always rejected; 0x0A maps to 'a'.
        struct Fixed;
        impl RngCore for Fixed {
            fn next_u32(&mut self) -> u32 {
                0
            }
            fn next_u64(&mut self) -> u64 {
                0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                for (i, b) in dest.iter_mut().enumerate() {
                    *b = if i % 2 == 0 { 0xFF } else { 0x0A };
                }
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                self.fill_bytes(dest);
                Ok(())
            }
        }

        assert_eq!(generate_with(&mut Fixed), "aaaaaaaa");
    }
}
